use anyhow::Result;
use image::DynamicImage;

use crate::{Embedding, Pipeline};

/// Face location in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl From<[f32; 4]> for BoundingBox {
    fn from(b: [f32; 4]) -> Self {
        Self {
            x: b[0],
            y: b[1],
            width: b[2],
            height: b[3],
        }
    }
}

/// One face found in a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceObservation {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Face detection and embedding, as seen by the gate.
pub trait Recognizer {
    /// Every face in a live frame. An empty vector is an ordinary result.
    fn observe(&mut self, frame: &DynamicImage) -> Result<Vec<FaceObservation>>;

    /// Embedding of the face in a reference photo, `None` if there is none.
    fn embed_reference(&mut self, image: &DynamicImage) -> Result<Option<Embedding>>;
}

impl Recognizer for Pipeline {
    fn observe(&mut self, frame: &DynamicImage) -> Result<Vec<FaceObservation>> {
        Ok(self
            .faces(frame)?
            .into_iter()
            .map(|(detection, embedding)| FaceObservation {
                bbox: detection.bbox.into(),
                embedding,
            })
            .collect())
    }

    fn embed_reference(&mut self, image: &DynamicImage) -> Result<Option<Embedding>> {
        self.reference_embedding(image)
    }
}
