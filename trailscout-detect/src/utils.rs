use opencv::core::{self as cvcore, Mat};
use opencv::imgproc;
use opencv::prelude::*;

/// A crop region in relative coordinates: proportions between 0.0..1.0 where
/// (0.0, 0.0) is the top-left and (1.0, 1.0) the bottom-right of the frame.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct RelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl RelRect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Crops `rect` out of `frame` as an owned mat. Edges are clamped to the
/// frame, so a strip that rounds past the border still crops cleanly.
pub fn extract_roi(frame: &Mat, rect: RelRect) -> Result<Mat, opencv::Error> {
    let size = frame.size()?;
    let x0 = ((rect.x * size.width as f64).round() as i32).clamp(0, size.width - 1);
    let y0 = ((rect.y * size.height as f64).round() as i32).clamp(0, size.height - 1);
    let x1 = (((rect.x + rect.width) * size.width as f64).round() as i32).clamp(x0 + 1, size.width);
    let y1 =
        (((rect.y + rect.height) * size.height as f64).round() as i32).clamp(y0 + 1, size.height);

    let roi = Mat::roi(frame, cvcore::Rect::new(x0, y0, x1 - x0, y1 - y0))?;
    Ok(roi.clone_pointee())
}

/// Resizes to an exact pixel size.
pub fn resize_exact(src: &Mat, width: i32, height: i32) -> Result<Mat, opencv::Error> {
    let mut out = Mat::default();
    imgproc::resize(
        src,
        &mut out,
        cvcore::Size::new(width, height),
        0.0,
        0.0,
        imgproc::INTER_AREA,
    )?;
    Ok(out)
}
