//! The per-clip analysis pipeline and the batch driver.
//!
//! One clip is processed start to finish before the next begins. Frames are
//! sampled at roughly one per second of footage, every sampled frame goes
//! through the detector with a very low floor, and a running fold keeps the
//! single most confident detection for the whole clip.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use trailscout_detect::ocr::Ocr;
use trailscout_detect::{DetectError, Detection, Detector};
use trailscout_io::{Frame, FrameError, OpenError, VideoSource};

use crate::sink::{LogRecord, LogSink};
use crate::timestamp;

/// Cast the widest possible net per frame; with sparse training data a real
/// animal can score very low.
pub const CONFIDENCE_FLOOR: f32 = 0.01;

/// Extensions the batch driver picks up, case-insensitive.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "m4v"];

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error("decode failed: {0}")]
    Decode(#[from] FrameError),
    #[error("detection failed: {0}")]
    Detect(#[from] DetectError),
}

/// The single most confident detection across all sampled frames of a clip.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BestDetection {
    pub species: String,
    pub confidence: f32,
    /// 0-based stream index of the frame the winning detection came from.
    pub frame_index: u64,
}

/// Samples one frame per second of footage. Unknown, zero, or garbage frame
/// rates clamp to sampling every frame rather than dividing by zero.
fn sample_stride(frame_rate: f64) -> u64 {
    if !frame_rate.is_finite() {
        return 1;
    }
    (frame_rate.round() as i64).max(1) as u64
}

/// Folds one frame's candidates into the running best. Replacement requires
/// strictly more confidence than both the current best and the floor, so
/// exact ties keep the earliest detection seen.
fn fold_candidates(
    mut best: Option<BestDetection>,
    frame_index: u64,
    candidates: Vec<Detection>,
) -> Option<BestDetection> {
    for candidate in candidates {
        let current = best.as_ref().map(|b| b.confidence).unwrap_or(0.0);
        if candidate.confidence > current && candidate.confidence > CONFIDENCE_FLOOR {
            best = Some(BestDetection {
                species: candidate.label,
                confidence: candidate.confidence,
                frame_index,
            });
        }
    }
    best
}

fn best_detection<D: Detector>(
    detector: &mut D,
    stride: u64,
    mut next: impl FnMut() -> Result<Option<Frame>, FrameError>,
) -> Result<Option<BestDetection>, ProcessError> {
    let mut best = None;
    while let Some(frame) = next()? {
        if frame.index % stride != 0 {
            continue;
        }
        let candidates = detector.detect(&frame.mat, CONFIDENCE_FLOOR)?;
        best = fold_candidates(best, frame.index, candidates);
    }
    Ok(best)
}

/// Analyzes one clip and returns its best detection, or `None` when nothing
/// cleared the floor. Open and detection failures are returned as errors so
/// a batch caller can contain them per item; the decoder is released on
/// every path.
pub fn process_video<D: Detector>(
    path: &Path,
    detector: &mut D,
) -> Result<Option<BestDetection>, ProcessError> {
    let mut source = VideoSource::open(path)?;
    let stride = sample_stride(source.frame_rate());
    tracing::debug!(
        "sampling {} at stride {stride} (~{} frames)",
        path.display(),
        source.frame_count()
    );
    best_detection(detector, stride, || source.next_frame())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BatchSummary {
    /// Videos attempted, including ones that failed or had no animals.
    pub processed: usize,
    /// Videos whose detection made it into the log sink.
    pub logged: usize,
}

fn has_video_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Video files directly inside `folder`, sorted for a deterministic batch
/// order.
pub fn eligible_videos(folder: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_video_extension(path))
        .collect();
    files.sort();
    Ok(files)
}

/// Processes every eligible video in a folder independently. A failure on
/// one file never halts the rest; the timestamp is only recovered for clips
/// that actually contain an animal.
pub fn process_folder<D: Detector>(
    folder: &Path,
    detector: &mut D,
    ocr: Option<&Ocr>,
    mut sink: Option<&mut dyn LogSink>,
) -> anyhow::Result<BatchSummary> {
    let files = eligible_videos(folder)
        .with_context(|| format!("could not list videos in {}", folder.display()))?;
    tracing::info!("found {} videos in {}", files.len(), folder.display());

    let bar = indicatif::ProgressBar::new(files.len() as u64);
    let mut summary = BatchSummary {
        processed: 0,
        logged: 0,
    };

    for path in &files {
        summary.processed += 1;
        let best = match process_video(path, detector) {
            Ok(Some(best)) => best,
            Ok(None) => {
                tracing::info!("no animals found in {}", path.display());
                bar.inc(1);
                continue;
            }
            Err(e) => {
                tracing::warn!("skipping {}: {e}", path.display());
                bar.inc(1);
                continue;
            }
        };

        let stamp = timestamp::get_timestamp(path, ocr);
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        tracing::info!(
            "{file_name}: {} ({:.2}%) at {} {}",
            best.species,
            best.confidence * 100.0,
            stamp.date,
            stamp.time
        );

        if let Some(sink) = sink.as_deref_mut() {
            let record = LogRecord::new(&stamp, &best, file_name);
            match sink.append(&record) {
                Ok(()) => summary.logged += 1,
                Err(e) => tracing::warn!("failed to log {file_name}: {e}"),
            }
        }
        bar.inc(1);
    }

    bar.finish_and_clear();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::Mat;
    use trailscout_detect::MockDetector;

    fn frame_stream(count: u64) -> impl FnMut() -> Result<Option<Frame>, FrameError> {
        let mut next = 0;
        move || {
            if next < count {
                let frame = Frame {
                    index: next,
                    mat: Mat::default(),
                };
                next += 1;
                Ok(Some(frame))
            } else {
                Ok(None)
            }
        }
    }

    #[test]
    fn stride_rounds_frame_rate() {
        assert_eq!(sample_stride(29.97), 30);
        assert_eq!(sample_stride(24.0), 24);
    }

    #[test]
    fn stride_clamps_degenerate_frame_rates() {
        assert_eq!(sample_stride(0.0), 1);
        assert_eq!(sample_stride(0.4), 1);
        assert_eq!(sample_stride(f64::NAN), 1);
        assert_eq!(sample_stride(f64::INFINITY), 1);
    }

    #[test]
    fn later_stronger_detection_wins() {
        let mut detector = MockDetector::with_confidences(vec![
            vec![("fox", 0.4)],
            vec![("raccoon", 0.9)],
            vec![],
        ]);
        let best = best_detection(&mut detector, 30, frame_stream(90))
            .unwrap()
            .unwrap();
        assert_eq!(best.species, "raccoon");
        assert_eq!(best.confidence, 0.9);
        assert_eq!(best.frame_index, 30);
        // Only frames 0, 30 and 60 were sampled.
        assert_eq!(detector.calls(), 3);
    }

    #[test]
    fn exact_tie_keeps_the_earliest() {
        let mut detector =
            MockDetector::with_confidences(vec![vec![("fox", 0.5)], vec![("coyote", 0.5)]]);
        let best = best_detection(&mut detector, 1, frame_stream(2))
            .unwrap()
            .unwrap();
        assert_eq!(best.species, "fox");
        assert_eq!(best.frame_index, 0);
    }

    #[test]
    fn nothing_above_the_floor_is_absent() {
        // 0.01 is not strictly above the floor, so it never qualifies.
        let mut detector = MockDetector::with_confidences(vec![vec![("ghost", 0.01)], vec![]]);
        let best = best_detection(&mut detector, 1, frame_stream(2)).unwrap();
        assert!(best.is_none());
    }

    #[test]
    fn detector_errors_bubble_out_of_the_scan() {
        struct Failing;
        impl Detector for Failing {
            fn detect(
                &mut self,
                _frame: &Mat,
                _confidence_floor: f32,
            ) -> Result<Vec<Detection>, DetectError> {
                Err(DetectError::OutputShape(vec![]))
            }
        }
        let result = best_detection(&mut Failing, 1, frame_stream(1));
        assert!(matches!(result, Err(ProcessError::Detect(_))));
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(has_video_extension(Path::new("clip.MP4")));
        assert!(has_video_extension(Path::new("clip.mov")));
        assert!(!has_video_extension(Path::new("clip.txt")));
        assert!(!has_video_extension(Path::new("clip")));
    }

    #[test]
    fn eligible_videos_are_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mp4", "a.AVI", "notes.txt", "c.m4v"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let files = eligible_videos(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["a.AVI", "b.mp4", "c.m4v"]);
    }

    #[test]
    fn corrupt_files_are_counted_but_never_abort_the_batch() {
        trailscout_io::init().unwrap();
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("bad_{i}.mp4")), b"not a video").unwrap();
        }
        let mut detector = MockDetector::new(vec![]);
        let summary = process_folder(dir.path(), &mut detector, None, None).unwrap();
        assert_eq!(summary.processed, 5);
        assert_eq!(summary.logged, 0);
    }
}
