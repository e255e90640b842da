//! The species detection model.
//!
//! Inference runs through an ONNX session; the network is a YOLO-style
//! single-stage detector whose output is `[1, 4 + classes, anchors]` with
//! boxes as center-x/center-y/width/height in input pixels. The class list
//! ships next to the weights as a JSON array, which doubles as the
//! label-index-to-name mapping.

use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};

use ndarray::Array4;
use opencv::core::{Mat, Rect, Scalar, CV_8UC3};
use opencv::prelude::*;
use ort::session::Session;
use ort::value::Value;

use crate::utils;

/// Side length of the square model input.
const INPUT_SIZE: i32 = 640;

/// IoU above which two same-species boxes are considered duplicates.
const NMS_IOU: f32 = 0.45;

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("model error: {0}")]
    Model(#[from] ort::Error),
    #[error("could not read labels {path}: {message}")]
    Labels { path: PathBuf, message: String },
    #[error("frame access failed: {0}")]
    Frame(#[from] opencv::Error),
    #[error("unexpected model output shape {0:?}")]
    OutputShape(Vec<i64>),
}

/// One detector output for a single frame.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Detection {
    /// Species label from the model's class list.
    pub label: String,
    /// Model score in 0.0..1.0.
    pub confidence: f32,
    /// center-x, center-y, width, height in frame pixels.
    pub bbox: [f32; 4],
}

/// Anything that can find animals in a frame. The floor is passed down so
/// the model itself can discard anchors below it before NMS.
pub trait Detector {
    fn detect(&mut self, frame: &Mat, confidence_floor: f32)
        -> Result<Vec<Detection>, DetectError>;
}

pub struct SpeciesModel {
    session: Session,
    labels: Vec<String>,
}

impl SpeciesModel {
    pub fn new(model_path: &Path, labels_path: &Path) -> Result<Self, DetectError> {
        let labels_err = |message: String| DetectError::Labels {
            path: labels_path.to_path_buf(),
            message,
        };
        let file = File::open(labels_path).map_err(|e| labels_err(e.to_string()))?;
        let labels: Vec<String> =
            serde_json::from_reader(file).map_err(|e| labels_err(e.to_string()))?;

        tracing::info!(
            "loading species model {} ({} classes)",
            model_path.display(),
            labels.len()
        );
        let session = Session::builder()?.commit_from_file(model_path)?;
        Ok(Self { session, labels })
    }

    /// Class-index-to-species mapping, in model output order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl Detector for SpeciesModel {
    fn detect(
        &mut self,
        frame: &Mat,
        confidence_floor: f32,
    ) -> Result<Vec<Detection>, DetectError> {
        let (tensor, letterbox) = preprocess(frame)?;
        let input = Value::from_array(tensor)?;
        let outputs = self.session.run(ort::inputs![input])?;
        let (shape, data) = outputs["output0"].try_extract_tensor::<f32>()?;
        decode(&self.labels, &shape, data, confidence_floor, letterbox)
    }
}

/// How the frame was fitted into the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Letterboxes the frame into `INPUT_SIZE`² and converts HWC u8 to a
/// normalized CHW f32 tensor.
fn preprocess(frame: &Mat) -> Result<(Array4<f32>, Letterbox), DetectError> {
    let size = frame.size()?;
    let scale = (INPUT_SIZE as f64 / size.width as f64).min(INPUT_SIZE as f64 / size.height as f64);
    let new_w = ((size.width as f64 * scale) as i32).max(1);
    let new_h = ((size.height as f64 * scale) as i32).max(1);
    let pad_x = (INPUT_SIZE - new_w) / 2;
    let pad_y = (INPUT_SIZE - new_h) / 2;

    let resized = utils::resize_exact(frame, new_w, new_h)?;
    let mut canvas = Mat::new_rows_cols_with_default(
        INPUT_SIZE,
        INPUT_SIZE,
        CV_8UC3,
        Scalar::all(114.0),
    )?;
    {
        let mut roi = Mat::roi_mut(&mut canvas, Rect::new(pad_x, pad_y, new_w, new_h))?;
        resized.copy_to(&mut *roi)?;
    }

    let data = canvas.data_bytes()?;
    let side = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for y in 0..side {
        for x in 0..side {
            let pixel = (y * side + x) * 3;
            for c in 0..3 {
                tensor[[0, c, y, x]] = data[pixel + c] as f32 / 255.0;
            }
        }
    }

    Ok((
        tensor,
        Letterbox {
            scale: scale as f32,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    ))
}

/// Decodes raw model output into floor-filtered, NMS-deduplicated
/// detections with boxes mapped back to frame pixels.
fn decode(
    labels: &[String],
    shape: &[i64],
    data: &[f32],
    confidence_floor: f32,
    letterbox: Letterbox,
) -> Result<Vec<Detection>, DetectError> {
    if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
        return Err(DetectError::OutputShape(shape.to_vec()));
    }
    let rows = shape[1] as usize;
    let anchors = shape[2] as usize;
    let classes = rows - 4;
    let at = |row: usize, anchor: usize| data[row * anchors + anchor];

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0;
        let mut best_score = 0.0_f32;
        for class in 0..classes {
            let score = at(4 + class, anchor);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if best_score < confidence_floor {
            continue;
        }

        let label = labels
            .get(best_class)
            .cloned()
            .unwrap_or_else(|| format!("class {best_class}"));
        let cx = (at(0, anchor) - letterbox.pad_x) / letterbox.scale;
        let cy = (at(1, anchor) - letterbox.pad_y) / letterbox.scale;
        let w = at(2, anchor) / letterbox.scale;
        let h = at(3, anchor) / letterbox.scale;
        candidates.push(Detection {
            label,
            confidence: best_score,
            bbox: [cx, cy, w, h],
        });
    }

    Ok(nms(candidates, NMS_IOU))
}

/// Greedy per-species NMS, highest confidence first.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    'candidates: for detection in detections {
        for survivor in &kept {
            if survivor.label == detection.label
                && iou(&survivor.bbox, &detection.bbox) > iou_threshold
            {
                continue 'candidates;
            }
        }
        kept.push(detection);
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let corners = |r: &[f32; 4]| {
        (
            r[0] - r[2] / 2.0,
            r[1] - r[3] / 2.0,
            r[0] + r[2] / 2.0,
            r[1] + r[3] / 2.0,
        )
    };
    let (ax1, ay1, ax2, ay2) = corners(a);
    let (bx1, by1, bx2, by2) = corners(b);
    let iw = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
    let ih = (ay2.min(by2) - ay1.max(by1)).max(0.0);
    let inter = iw * ih;
    let union = (ax2 - ax1) * (ay2 - ay1) + (bx2 - bx1) * (by2 - by1) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Scripted detector for tests: pops one pre-baked detection list per call.
pub struct MockDetector {
    script: VecDeque<Vec<Detection>>,
    calls: usize,
}

impl MockDetector {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script: script.into(),
            calls: 0,
        }
    }

    /// Convenience for scripts that only care about label and confidence.
    pub fn with_confidences(script: Vec<Vec<(&str, f32)>>) -> Self {
        Self::new(
            script
                .into_iter()
                .map(|frame| {
                    frame
                        .into_iter()
                        .map(|(label, confidence)| Detection {
                            label: label.to_string(),
                            confidence,
                            bbox: [0.0; 4],
                        })
                        .collect()
                })
                .collect(),
        )
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl Detector for MockDetector {
    fn detect(
        &mut self,
        _frame: &Mat,
        confidence_floor: f32,
    ) -> Result<Vec<Detection>, DetectError> {
        self.calls += 1;
        Ok(self
            .script
            .pop_front()
            .unwrap_or_default()
            .into_iter()
            .filter(|d| d.confidence >= confidence_floor)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: Letterbox = Letterbox {
        scale: 1.0,
        pad_x: 0.0,
        pad_y: 0.0,
    };

    fn labels() -> Vec<String> {
        vec!["fox".to_string(), "raccoon".to_string()]
    }

    // Output layout is [rows][anchors]: rows 0..4 are cx/cy/w/h, the rest
    // are per-class scores.
    fn output() -> Vec<f32> {
        vec![
            100.0, 102.0, 300.0, // cx
            100.0, 101.0, 200.0, // cy
            20.0, 20.0, 40.0, // w
            20.0, 20.0, 40.0, // h
            0.4, 0.35, 0.0, // fox
            0.1, 0.0, 0.9, // raccoon
        ]
    }

    #[test]
    fn decodes_and_suppresses_duplicates() {
        let detections =
            decode(&labels(), &[1, 6, 3], &output(), 0.01, IDENTITY).unwrap();
        // Anchors 0 and 1 are the same fox; NMS keeps the stronger one.
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label, "raccoon");
        assert_eq!(detections[0].confidence, 0.9);
        assert_eq!(detections[1].label, "fox");
        assert_eq!(detections[1].confidence, 0.4);
        assert_eq!(detections[1].bbox, [100.0, 100.0, 20.0, 20.0]);
    }

    #[test]
    fn floor_discards_weak_anchors() {
        let detections =
            decode(&labels(), &[1, 6, 3], &output(), 0.5, IDENTITY).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "raccoon");
    }

    #[test]
    fn letterbox_offsets_are_undone() {
        let letterbox = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 140.0,
        };
        let detections =
            decode(&labels(), &[1, 6, 3], &output(), 0.8, letterbox).unwrap();
        assert_eq!(detections.len(), 1);
        // cx 300 / 0.5, (cy 200 - 140) / 0.5, w/h 40 / 0.5
        assert_eq!(detections[0].bbox, [600.0, 120.0, 80.0, 80.0]);
    }

    #[test]
    fn rejects_malformed_output() {
        let result = decode(&labels(), &[1, 3], &output(), 0.01, IDENTITY);
        assert!(matches!(result, Err(DetectError::OutputShape(_))));
    }

    #[test]
    fn mock_applies_floor_and_counts_calls() {
        let mut mock = MockDetector::with_confidences(vec![
            vec![("fox", 0.4), ("raccoon", 0.005)],
            vec![],
        ]);
        let frame = Mat::default();
        let first = mock.detect(&frame, 0.01).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].label, "fox");
        assert!(mock.detect(&frame, 0.01).unwrap().is_empty());
        assert_eq!(mock.calls(), 2);
    }
}
