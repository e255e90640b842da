//! Decodes a stored clip into an in-order stream of RGB24 frames.
//!
//! A video decoder is stateful, so frames are pulled straight through in
//! stream order rather than seeking around; the caller decides which of them
//! to look at. Every frame goes through a swscale context to guarantee rgb24,
//! which keeps the detection and OCR input handling uniform.

extern crate ffmpeg_next as ffmpeg;

use std::path::{Path, PathBuf};

use ffmpeg::format::{input, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as Scaler, flag::Flags};
use opencv::core::{Mat, Point3_};

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("could not open {path}: {source}")]
    Open {
        path: PathBuf,
        source: ffmpeg::Error,
    },
    #[error("{path} has no video stream")]
    NoVideoStream { path: PathBuf },
    #[error("could not build a decoder for {path}: {source}")]
    Decoder {
        path: PathBuf,
        source: ffmpeg::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("decode failed: {0}")]
    Decode(#[from] ffmpeg::Error),
    #[error("frame conversion failed: {0}")]
    Convert(#[from] opencv::Error),
}

/// One decoded image plus its 0-based index in the stream.
pub struct Frame {
    pub index: u64,
    pub mat: Mat,
}

/// An opened clip. Dropping it releases the decoder on every exit path.
pub struct VideoSource {
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: Scaler,
    stream_index: usize,
    frame_rate: f64,
    frame_count: i64,
    next_index: u64,
    flushed: bool,
}

impl VideoSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OpenError> {
        let path = path.as_ref();
        let ictx = input(&path).map_err(|source| OpenError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let (stream_index, frame_rate, frame_count, parameters) = {
            let stream = ictx
                .streams()
                .best(Type::Video)
                .ok_or_else(|| OpenError::NoVideoStream {
                    path: path.to_path_buf(),
                })?;
            (
                stream.index(),
                f64::from(stream.avg_frame_rate()),
                stream.frames(),
                stream.parameters(),
            )
        };

        let build = || -> Result<(ffmpeg::decoder::Video, Scaler), ffmpeg::Error> {
            let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)?
                .decoder()
                .video()?;
            let scaler = Scaler::get(
                decoder.format(),
                decoder.width(),
                decoder.height(),
                Pixel::RGB24,
                decoder.width(),
                decoder.height(),
                Flags::FAST_BILINEAR,
            )?;
            Ok((decoder, scaler))
        };
        let (decoder, scaler) = build().map_err(|source| OpenError::Decoder {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(
            "opened {} ({frame_rate:.2} fps, ~{frame_count} frames)",
            path.display()
        );

        Ok(Self {
            ictx,
            decoder,
            scaler,
            stream_index,
            frame_rate,
            frame_count,
            next_index: 0,
            flushed: false,
        })
    }

    /// Average frame rate as reported by the container; 0.0 when unknown.
    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    /// Container's frame count. Best effort; 0 when the container does not
    /// record one.
    pub fn frame_count(&self) -> i64 {
        self.frame_count
    }

    /// Next frame in stream order, or `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        loop {
            // Drain anything the decoder already has buffered before
            // feeding it more packets.
            let mut decoded = ffmpeg::frame::Video::empty();
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb = ffmpeg::frame::Video::empty();
                self.scaler.run(&decoded, &mut rgb)?;
                let mat = conv_to_mat(&rgb)?;
                let index = self.next_index;
                self.next_index += 1;
                return Ok(Some(Frame { index, mat }));
            }

            if self.flushed {
                return Ok(None);
            }

            let mut packets = self.ictx.packets();
            match packets.next() {
                Some((stream, packet)) => {
                    if stream.index() == self.stream_index {
                        self.decoder.send_packet(&packet)?;
                    }
                }
                None => {
                    // EOF: flush the decoder and drain whatever is left.
                    self.decoder.send_eof()?;
                    self.flushed = true;
                }
            }
        }
    }
}

/// Converts an rgb24 video frame into an opencv mat.
fn conv_to_mat(video: &ffmpeg::frame::Video) -> Result<Mat, opencv::Error> {
    let width = video.width() as i32;
    let height = video.height() as i32;
    let row_len = video.width() as usize * 3;
    let stride = video.stride(0);
    let data = video.data(0);

    if stride == row_len {
        return Mat::new_rows_cols_with_bytes::<Point3_<u8>>(height, width, data)
            .map(|r| r.clone_pointee());
    }

    // The decoder may pad scanlines; repack them tightly first.
    let mut packed = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        packed.extend_from_slice(&data[start..start + row_len]);
    }
    Mat::new_rows_cols_with_bytes::<Point3_<u8>>(height, width, &packed)
        .map(|r| r.clone_pointee())
}
