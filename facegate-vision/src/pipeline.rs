use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{self, Detection, Embedding};
use crate::model::{self, ModelPaths};

/// Detection tuning passed to YuNet on every call.
#[derive(Debug, Clone, Copy)]
pub struct DetectorParams {
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    detector: Session,
    encoder: Session,
    params: DetectorParams,
}

impl Pipeline {
    pub fn load(paths: &ModelPaths, params: DetectorParams) -> Result<Self> {
        Ok(Self {
            detector: model::detector_session(&paths.detector)?,
            encoder: model::recog_session(&paths.recognizer)?,
            params,
        })
    }

    /// Every face in the image with its embedding, in detector order
    /// (highest score first).
    pub fn faces(&mut self, img: &DynamicImage) -> Result<Vec<(Detection, Embedding)>> {
        let detections = face::detect_faces(
            &mut self.detector,
            img,
            self.params.score_threshold,
            self.params.nms_threshold,
        )
        .context("detecting faces")?;

        let mut faces = Vec::with_capacity(detections.len());
        for detection in detections {
            let aligned = match face::align_face(img, &detection, face::ENCODER_INPUT) {
                Ok(aligned) => aligned,
                Err(e) => {
                    log::debug!("skipping detection at {:?}: {}", detection.bbox, e);
                    continue;
                }
            };
            let embedding =
                face::encode_face(&mut self.encoder, &aligned).context("encoding face")?;
            faces.push((detection, embedding));
        }
        Ok(faces)
    }

    /// Embedding of the best face in a reference photo, `None` when the photo
    /// has no detectable face.
    pub fn reference_embedding(&mut self, img: &DynamicImage) -> Result<Option<Embedding>> {
        Ok(self
            .faces(img)?
            .into_iter()
            .next()
            .map(|(_, embedding)| embedding))
    }
}
