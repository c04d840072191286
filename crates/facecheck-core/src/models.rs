//! Model file locations.

use std::path::{Path, PathBuf};

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// Default model directory: `$XDG_DATA_HOME/facecheck/models`, falling back to
/// `$HOME/.local/share/facecheck/models`.
pub fn default_model_dir() -> PathBuf {
    data_dir_from(
        std::env::var_os("XDG_DATA_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
    .join("models")
}

fn data_dir_from(xdg_data_home: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    xdg_data_home
        .filter(|p| p.is_absolute())
        .unwrap_or_else(|| home.unwrap_or_else(|| PathBuf::from("/tmp")).join(".local/share"))
        .join("facecheck")
}

/// Paths of the two ONNX models inside a model directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl ModelPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_MODEL_FILE),
            recognizer: dir.join(RECOGNIZER_MODEL_FILE),
        }
    }
}
