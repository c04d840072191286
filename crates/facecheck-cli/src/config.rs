use anyhow::{bail, Context, Result};
use facecheck_core::matcher::DEFAULT_MATCH_THRESHOLD;
use facecheck_core::{
    DetectorMode, DistanceMatcher, DistanceMetric, ModelPaths, MultipleFacePolicy,
    ReferenceOptions, SessionConfig,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI configuration: TOML file, then `FACECHECK_*` environment, then flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum embedding distance accepted as a match (strict).
    pub match_threshold: f32,
    pub metric: DistanceMetric,
    /// Detector mode for the document photo.
    pub document_detector: DetectorMode,
    /// Detector mode for live frames.
    pub live_detector: DetectorMode,
    pub multiple_faces: MultipleFacePolicy,
    /// Frames discarded after the camera opens (AGC/AE stabilization).
    pub warmup_frames: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_frames: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: facecheck_core::models::default_model_dir(),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            metric: DistanceMetric::Cosine,
            document_detector: DetectorMode::HighAccuracy,
            live_detector: DetectorMode::LowLatency,
            multiple_faces: MultipleFacePolicy::Reject,
            warmup_frames: 4,
            max_frames: None,
            timeout_secs: None,
        }
    }
}

impl Config {
    /// Load from the resolved config file (if any) and apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    pub fn load_with(explicit: Option<&Path>, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match config_location(explicit, &lookup) {
            Some((path, true)) => Self::from_file(&path)?,
            Some((path, false)) if path.exists() => Self::from_file(&path)?,
            Some((path, false)) => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(lookup);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = toml::from_str(&text)
            .with_context(|| format!("invalid config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `FACECHECK_*` overrides. Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(device) = lookup("FACECHECK_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        if let Some(dir) = lookup("FACECHECK_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(v) = parse_env(&lookup, "FACECHECK_MATCH_THRESHOLD") {
            self.match_threshold = v;
        }
        if let Some(v) = parse_env(&lookup, "FACECHECK_WARMUP_FRAMES") {
            self.warmup_frames = v;
        }
        if let Some(v) = parse_env(&lookup, "FACECHECK_MAX_FRAMES") {
            self.max_frames = Some(v);
        }
        if let Some(v) = parse_env(&lookup, "FACECHECK_TIMEOUT_SECS") {
            self.timeout_secs = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            bail!("match_threshold must be a positive number, got {}", self.match_threshold);
        }
        if self.camera_device.is_empty() {
            bail!("camera_device must not be empty");
        }
        Ok(())
    }

    pub fn matcher(&self) -> DistanceMatcher {
        DistanceMatcher::new(self.match_threshold, self.metric)
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }

    pub fn reference_options(&self) -> ReferenceOptions {
        ReferenceOptions {
            detector_mode: self.document_detector,
            multiple_faces: self.multiple_faces,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            live_detector: self.live_detector,
            warmup_frames: self.warmup_frames,
            max_frames: self.max_frames,
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Config file path and whether it must exist.
fn config_location(
    explicit: Option<&Path>,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Option<(PathBuf, bool)> {
    if let Some(path) = explicit {
        return Some((path.to_path_buf(), true));
    }
    if let Some(path) = lookup("FACECHECK_CONFIG").filter(|p| !p.is_empty()) {
        return Some((PathBuf::from(path), true));
    }
    let config_home = lookup("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .or_else(|| lookup("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some((config_home.join("facecheck").join("config.toml"), false))
}

fn parse_env<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
