//! Known identities and nearest-neighbour matching against them.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;

use crate::recognizer::{FaceObservation, Recognizer};
use crate::Embedding;

/// Default maximum distance for a positive match.
pub const CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Label shown for faces that match nobody.
pub const UNKNOWN: &str = "Unknown";

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot list reference directory {}", path.display())]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnownIdentity {
    pub name: String,
    pub embedding: Embedding,
}

/// Outcome of comparing one observed face against the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Nearest identity, set only when it is within the threshold.
    pub identity: Option<String>,
    /// Distance to the nearest identity; infinite for an empty catalog.
    pub distance: f32,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        self.identity.is_some()
    }

    pub fn label(&self) -> &str {
        self.identity.as_deref().unwrap_or(UNKNOWN)
    }
}

/// Immutable set of reference embeddings, in stable (filename) order.
#[derive(Debug, Clone)]
pub struct FaceCatalog {
    identities: Vec<KnownIdentity>,
    threshold: f32,
}

impl FaceCatalog {
    pub fn new(identities: Vec<KnownIdentity>, threshold: f32) -> Self {
        Self {
            identities,
            threshold,
        }
    }

    /// Build from a directory of reference photos, one identity per file
    /// named after the file stem.
    ///
    /// Files the recognizer cannot use (unreadable, no face, inference
    /// failure) are skipped; only an unlistable directory is an error.
    pub fn build<R>(dir: &Path, recognizer: &mut R, threshold: f32) -> Result<Self, CatalogError>
    where
        R: Recognizer + ?Sized,
    {
        let files = reference_files(dir)?;
        let mut identities = Vec::with_capacity(files.len());

        for path in files {
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let img = match image::open(&path) {
                Ok(img) => img,
                Err(e) => {
                    warn!("skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            match recognizer.embed_reference(&img) {
                Ok(Some(embedding)) => {
                    debug!("loaded identity {} from {}", name, path.display());
                    identities.push(KnownIdentity { name, embedding });
                }
                Ok(None) => debug!("no face in {}, skipped", path.display()),
                Err(e) => warn!("skipping {}: {:#}", path.display(), e),
            }
        }

        info!(
            "catalog: {} identities from {}",
            identities.len(),
            dir.display()
        );
        Ok(Self::new(identities, threshold))
    }

    pub fn identities(&self) -> &[KnownIdentity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Nearest identity by embedding distance. Ties go to the identity that
    /// comes first in catalog order. NaN distances never win.
    pub fn match_embedding(&self, query: &Embedding) -> MatchResult {
        let nearest = self
            .identities
            .iter()
            .map(|known| (known, known.embedding.distance(query)))
            .filter(|(_, d)| !d.is_nan())
            .fold(None, |best: Option<(&KnownIdentity, f32)>, (known, d)| match best {
                Some((_, best_d)) if best_d <= d => best,
                _ => Some((known, d)),
            });

        match nearest {
            Some((known, distance)) if distance <= self.threshold => MatchResult {
                identity: Some(known.name.clone()),
                distance,
            },
            Some((_, distance)) => MatchResult {
                identity: None,
                distance,
            },
            None => MatchResult {
                identity: None,
                distance: f32::INFINITY,
            },
        }
    }

    pub fn match_observation(&self, observation: &FaceObservation) -> MatchResult {
        self.match_embedding(&observation.embedding)
    }
}

fn reference_files(dir: &Path) -> Result<Vec<PathBuf>, CatalogError> {
    let entries = std::fs::read_dir(dir).map_err(|source| CatalogError::ListDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_image_extension(path))
        .collect();
    files.sort();
    Ok(files)
}

/// Extension match is exact: `photo.JPG` is not a reference image.
pub(crate) fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext))
}
