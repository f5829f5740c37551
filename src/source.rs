//! Frame sources: the live camera and a recorded image sequence.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use facegate_vision::Camera;
use image::DynamicImage;
use log::info;

use crate::catalog::has_image_extension;
use crate::session::{Frame, FrameSource};

pub struct CameraSource {
    camera: Option<Camera>,
    device: String,
    mirror: bool,
}

impl CameraSource {
    /// `timeout` bounds each frame wait; a stalled device fails the capture.
    pub fn open(device: &str, mirror: bool, timeout: Duration) -> Result<Self> {
        let camera = Camera::with_timeout(device, timeout).context("Failed to open camera")?;
        Ok(Self {
            camera: Some(camera),
            device: device.to_string(),
            mirror,
        })
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("camera {} already released", self.device))?;
        let mut rgb = camera.frame()?;
        let captured_at = Instant::now();
        if self.mirror {
            image::imageops::flip_horizontal_in_place(&mut rgb);
        }
        Ok(Some(Frame {
            image: DynamicImage::ImageRgb8(rgb),
            captured_at,
        }))
    }

    fn release(&mut self) {
        if self.camera.take().is_some() {
            info!("camera {} closed", self.device);
        }
    }
}

/// Replays the jpg/jpeg/png frames of a directory in filename order,
/// timestamped as if captured at a fixed rate starting when the source was
/// opened. Other files are ignored.
pub struct ReplaySource {
    frames: std::vec::IntoIter<PathBuf>,
    interval: Duration,
    start: Instant,
    index: u32,
}

impl ReplaySource {
    pub fn open(dir: &Path, fps: f64) -> Result<Self> {
        if !(fps.is_finite() && fps > 0.0) {
            anyhow::bail!("fps must be positive, got {}", fps);
        }
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("reading frames from {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();
        frames.sort();
        info!("replaying {} frames from {}", frames.len(), dir.display());

        Ok(Self {
            frames: frames.into_iter(),
            interval: Duration::from_secs_f64(1.0 / fps),
            start: Instant::now(),
            index: 0,
        })
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.frames.next() else {
            return Ok(None);
        };
        let image = image::open(&path).with_context(|| format!("decoding {}", path.display()))?;
        let captured_at = self.start + self.interval * self.index;
        self.index += 1;
        Ok(Some(Frame { image, captured_at }))
    }

    fn release(&mut self) {
        // Drop whatever was not replayed.
        self.frames = Vec::new().into_iter();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_replay_in_order_with_fixed_interval() {
        let dir = tempfile::tempdir().unwrap();
        for (name, shade) in [("002.png", 2u8), ("000.png", 0), ("001.png", 1)] {
            RgbImage::from_pixel(2, 2, Rgb([shade, 0, 0]))
                .save(dir.path().join(name))
                .unwrap();
        }

        let mut source = ReplaySource::open(dir.path(), 4.0).unwrap();
        let mut shades = Vec::new();
        let mut stamps = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            shades.push(frame.image.to_rgb8().get_pixel(0, 0)[0]);
            stamps.push(frame.captured_at);
        }
        assert_eq!(shades, vec![0, 1, 2]);
        assert_eq!(stamps[2] - stamps[0], Duration::from_millis(500));
    }

    #[test]
    fn test_replay_skips_non_image_files() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(2, 2).save(dir.path().join("000.png")).unwrap();
        std::fs::write(dir.path().join(".DS_Store"), b"\x00\x00\x00\x01Bud1").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "frames from the lobby").unwrap();

        let mut source = ReplaySource::open(dir.path(), 10.0).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_replay_undecodable_frame_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"nope").unwrap();
        let mut source = ReplaySource::open(dir.path(), 10.0).unwrap();
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn test_replay_release_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(2, 2).save(dir.path().join("a.png")).unwrap();
        let mut source = ReplaySource::open(dir.path(), 10.0).unwrap();
        source.release();
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_replay_rejects_bad_fps() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ReplaySource::open(dir.path(), 0.0).is_err());
    }
}
