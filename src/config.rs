use anyhow::{Context, Result};
use facegate_vision::{pipeline::DetectorParams, ModelPaths};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gate::GateParams;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_CONFIG_PATH").unwrap_or("/usr/local/etc/facegate/config.toml"))
});

pub static MODEL_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_MODEL_PREFIX").unwrap_or("/usr/local/share/facegate"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 capture device.
    pub camera: String,
    /// Reference photos, one identity per file.
    pub known_faces_dir: PathBuf,
    pub detector_model: PathBuf,
    pub recognizer_model: PathBuf,
    /// Maximum embedding distance that still counts as a match.
    ///
    /// Embeddings are unit length, so a Euclidean distance `d` is a cosine
    /// similarity of `1 - d²/2`: the default 0.6 asks for cosine >= 0.82.
    /// That is strict for SFace; raise it toward 1.0 if known people are
    /// reported as unknown, and check `facegate check <photo>` distances
    /// when tuning.
    pub distance_threshold: f32,
    pub detection_threshold: f32,
    pub nms_threshold: f32,
    /// Seconds a known face must stay in view to be admitted.
    pub dwell_secs: f64,
    /// Seconds without any known face before the attempt is rejected.
    pub absence_secs: f64,
    /// Flip frames horizontally before detection.
    pub mirror: bool,
    /// Seconds to wait for one camera frame before the capture fails.
    pub frame_timeout_secs: f64,
    /// Where to write the annotated preview frame, if anywhere.
    pub preview_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            known_faces_dir: PathBuf::from("./assets/known_faces"),
            detector_model: MODEL_PREFIX.join("face_detection_yunet_2023mar.onnx"),
            recognizer_model: MODEL_PREFIX.join("face_recognition_sface_2021dec.onnx"),
            distance_threshold: crate::catalog::CONFIDENCE_THRESHOLD,
            detection_threshold: 0.6,
            nms_threshold: 0.3,
            dwell_secs: 10.0,
            absence_secs: 30.0,
            mirror: true,
            frame_timeout_secs: 2.0,
            preview_path: None,
        }
    }
}

impl Config {
    pub fn gate_params(&self) -> Result<GateParams> {
        Ok(GateParams {
            dwell: Duration::try_from_secs_f64(self.dwell_secs)
                .with_context(|| format!("invalid dwell_secs {}", self.dwell_secs))?,
            absence: Duration::try_from_secs_f64(self.absence_secs)
                .with_context(|| format!("invalid absence_secs {}", self.absence_secs))?,
        })
    }

    pub fn frame_timeout(&self) -> Result<Duration> {
        match Duration::try_from_secs_f64(self.frame_timeout_secs) {
            Ok(timeout) if !timeout.is_zero() => Ok(timeout),
            _ => anyhow::bail!("invalid frame_timeout_secs {}", self.frame_timeout_secs),
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            detector: self.detector_model.clone(),
            recognizer: self.recognizer_model.clone(),
        }
    }

    pub fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            score_threshold: self.detection_threshold,
            nms_threshold: self.nms_threshold,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(*CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(*CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
