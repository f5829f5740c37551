//! Model-backed checks. Set `FACEGATE_MODEL_DIR` to a directory holding
//! `face_detection_yunet_2023mar.onnx` and `face_recognition_sface_2021dec.onnx`;
//! without it these tests return early.

use anyhow::Result;
use facegate_vision::{pipeline::DetectorParams, ModelPaths, Pipeline};
use image::DynamicImage;
use std::path::PathBuf;

fn model_paths() -> Option<ModelPaths> {
    let dir = PathBuf::from(std::env::var_os("FACEGATE_MODEL_DIR")?);
    let paths = ModelPaths {
        detector: dir.join("face_detection_yunet_2023mar.onnx"),
        recognizer: dir.join("face_recognition_sface_2021dec.onnx"),
    };
    if paths.detector.exists() && paths.recognizer.exists() {
        Some(paths)
    } else {
        eprintln!("Skipping: models not found in {}", dir.display());
        None
    }
}

#[test]
fn test_blank_image_has_no_faces() -> Result<()> {
    env_logger::try_init().ok();
    let Some(paths) = model_paths() else {
        return Ok(());
    };
    let mut pipeline = Pipeline::load(&paths, DetectorParams::default())?;

    let blank = DynamicImage::new_rgb8(640, 480);
    assert!(pipeline.faces(&blank)?.is_empty());
    assert!(pipeline.reference_embedding(&blank)?.is_none());
    Ok(())
}

#[test]
fn test_missing_model_is_reported() {
    let paths = ModelPaths {
        detector: PathBuf::from("/nonexistent/yunet.onnx"),
        recognizer: PathBuf::from("/nonexistent/sface.onnx"),
    };
    let err = Pipeline::load(&paths, DetectorParams::default())
        .err()
        .expect("loading from a missing path must fail");
    assert!(err.to_string().contains("not found"));
}
