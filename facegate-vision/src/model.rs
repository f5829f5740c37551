use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
#[cfg(any(feature = "openvino", feature = "cuda"))]
use ort::ep::{self, ExecutionProvider};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};

/// Locations of the two ONNX models the pipeline needs.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    /// YuNet face detector.
    pub detector: PathBuf,
    /// SFace face recognizer.
    pub recognizer: PathBuf,
}

/// Session builder with every compiled-in execution provider that the
/// linked runtime actually supports. CPU is always the fallback.
pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    try_register(&mut builder, ep::OpenVINO::default(), "openvino")?;
    #[cfg(feature = "cuda")]
    try_register(&mut builder, ep::CUDA::default(), "cuda")?;

    Ok(builder)
}

#[cfg(any(feature = "openvino", feature = "cuda"))]
fn try_register<E: ExecutionProvider>(
    builder: &mut SessionBuilder,
    provider: E,
    name: &str,
) -> Result<()> {
    if provider.is_available()? {
        provider.register(builder)?;
        log::debug!("registered {} execution provider", name);
    } else {
        log::warn!("{} feature is enabled, onnx runtime not compiled with {}", name, name);
    }
    Ok(())
}

fn load(path: &Path, what: &str) -> Result<Session> {
    if !path.exists() {
        anyhow::bail!("{} model not found at {}", what, path.display());
    }
    let session = session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load {} model from {}", what, path.display()))?;
    log::debug!("loaded {} model from {}", what, path.display());
    Ok(session)
}

pub fn recog_session(path: &Path) -> Result<Session> {
    load(path, "recognition")
}

pub fn detector_session(path: &Path) -> Result<Session> {
    load(path, "detector")
}
