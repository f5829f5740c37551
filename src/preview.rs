//! Preview surface for the annotated camera feed.

use std::path::PathBuf;

use anyhow::{Context, Result};
use image::ImageFormat;

use crate::gate::FrameVerdict;
use crate::overlay;
use crate::recognizer::FaceObservation;
use crate::session::Frame;

pub trait Preview {
    fn show(
        &mut self,
        frame: &Frame,
        observations: &[FaceObservation],
        verdict: &FrameVerdict,
    ) -> Result<()>;

    /// Tear the surface down. Called once when the session ends.
    fn close(&mut self);
}

/// Headless sessions.
pub struct NoPreview;

impl Preview for NoPreview {
    fn show(&mut self, _: &Frame, _: &[FaceObservation], _: &FrameVerdict) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}
}

/// Keeps the latest annotated frame as a PNG on disk, for a viewer that
/// reloads the file. The file is removed on close.
pub struct SnapshotPreview {
    path: PathBuf,
    every: u64,
    seen: u64,
}

impl SnapshotPreview {
    pub fn new(path: PathBuf) -> Self {
        Self::every(path, 1)
    }

    /// Only write every `n`th frame.
    pub fn every(path: PathBuf, n: u64) -> Self {
        Self {
            path,
            every: n.max(1),
            seen: 0,
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Preview for SnapshotPreview {
    fn show(
        &mut self,
        frame: &Frame,
        observations: &[FaceObservation],
        verdict: &FrameVerdict,
    ) -> Result<()> {
        self.seen += 1;
        if (self.seen - 1) % self.every != 0 {
            return Ok(());
        }

        let mut img = frame.image.to_rgb8();
        overlay::annotate(&mut img, observations, verdict);

        // Write then rename so a viewer never sees a half-written file.
        let tmp = self.tmp_path();
        img.save_with_format(&tmp, ImageFormat::Png)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    fn close(&mut self) {
        for path in [self.tmp_path(), self.path.clone()] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("removing preview {}: {}", path.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::Decision;
    use image::DynamicImage;
    use std::time::Instant;

    fn frame() -> Frame {
        Frame {
            image: DynamicImage::new_rgb8(16, 16),
            captured_at: Instant::now(),
        }
    }

    fn idle() -> FrameVerdict {
        FrameVerdict {
            decision: Decision::Continue,
            matches: vec![],
            recognized: vec![],
            dwell_elapsed: None,
            dwell_remaining: None,
        }
    }

    #[test]
    fn test_snapshot_written_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.png");
        let mut preview = SnapshotPreview::new(path.clone());

        preview.show(&frame(), &[], &idle()).unwrap();
        assert!(path.exists());
        assert_eq!(image::open(&path).unwrap().width(), 16);

        preview.close();
        assert!(!path.exists());
    }

    #[test]
    fn test_snapshot_every_nth_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.png");
        let mut preview = SnapshotPreview::every(path.clone(), 3);

        preview.show(&frame(), &[], &idle()).unwrap();
        assert!(path.exists());
        std::fs::remove_file(&path).unwrap();

        preview.show(&frame(), &[], &idle()).unwrap();
        preview.show(&frame(), &[], &idle()).unwrap();
        assert!(!path.exists());
        preview.show(&frame(), &[], &idle()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_close_without_frames_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let mut preview = SnapshotPreview::new(dir.path().join("never.png"));
        preview.close();
    }
}
