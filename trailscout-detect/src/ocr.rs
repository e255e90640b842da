//! Region-restricted text reading, used for burned-in timestamp recovery.

use std::path::{Path, PathBuf};

use ocrs::{OcrEngine, OcrEngineParams};
use opencv::core::Mat;
use opencv::prelude::*;

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("could not load OCR model {path}: {message}")]
    ModelLoad { path: PathBuf, message: String },
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("frame access failed: {0}")]
    Frame(#[from] opencv::Error),
}

pub struct Ocr {
    engine: OcrEngine,
}

impl Ocr {
    /// Builds an engine from rten text detection and recognition models on
    /// disk. The models are user-supplied, so they are loaded from paths
    /// rather than embedded.
    pub fn new(detection_model: &Path, recognition_model: &Path) -> Result<Self, OcrError> {
        let load = |path: &Path| {
            rten::Model::load_file(path).map_err(|e| OcrError::ModelLoad {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        };
        let engine = OcrEngine::new(OcrEngineParams {
            detection_model: Some(load(detection_model)?),
            recognition_model: Some(load(recognition_model)?),
            decode_method: ocrs::DecodeMethod::Greedy,
            ..Default::default()
        })
        .map_err(|e| OcrError::Engine(e.to_string()))?;
        Ok(Self { engine })
    }

    /// Extracts recognized text lines from an RGB u8 mat. Line order is not
    /// semantically meaningful.
    pub fn read_text(&self, region: &Mat) -> Result<Vec<String>, OcrError> {
        let size = region.size()?;
        let src = ocrs::ImageSource::from_bytes(
            region.data_bytes()?,
            (size.width as u32, size.height as u32),
        )
        .map_err(|e| OcrError::Engine(e.to_string()))?;
        let input = self
            .engine
            .prepare_input(src)
            .map_err(|e| OcrError::Engine(e.to_string()))?;
        let text = self
            .engine
            .get_text(&input)
            .map_err(|e| OcrError::Engine(e.to_string()))?;
        Ok(text
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }
}

impl core::fmt::Debug for Ocr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Ocr").finish()
    }
}
