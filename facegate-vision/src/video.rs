use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

const RGB3: [u8; 4] = *b"RGB3";
const YUYV: [u8; 4] = *b"YUYV";
const GREY: [u8; 4] = *b"GREY";

/// How long `frame` waits for the driver before giving up.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// V4L2 capture device streaming through mmap buffers. The device is
/// released when the camera is dropped.
pub struct Camera {
    stream: Stream<'static>,
    path: String,
    width: u32,
    height: u32,
    fourcc: FourCC,
    timeout: Duration,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self> {
        Self::with_timeout(device, DEFAULT_FRAME_TIMEOUT)
    }

    /// Open with a bound on each frame wait. A stalled device then surfaces
    /// as an error from [`Camera::frame`] instead of blocking forever.
    pub fn with_timeout(device: &str, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            anyhow::bail!("frame timeout must be positive");
        }
        let dev = Device::with_path(device).with_context(|| format!("open camera {}", device))?;
        let mut fmt = dev.format().context("get format")?;
        // Prefer RGB, fallback to YUYV, else accept existing format
        let desired = Format::new(fmt.width, fmt.height, FourCC::new(&RGB3));
        fmt = dev.set_format(&desired).unwrap_or(fmt);
        if fmt.fourcc != FourCC::new(&RGB3) {
            let yuyv = Format::new(fmt.width, fmt.height, FourCC::new(&YUYV));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }
        let mut stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("stream")?;
        // v4l keeps the timeout as i32 milliseconds.
        stream.set_timeout(timeout.min(Duration::from_millis(i32::MAX as u64)));
        log::info!(
            "camera {} opened: {}x{} {:?}",
            device,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );
        Ok(Self {
            stream,
            path: device.to_string(),
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
            timeout,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Wait for the next frame, up to the configured timeout, and convert it
    /// to RGB.
    pub fn frame(&mut self) -> Result<RgbImage> {
        let timeout = self.timeout;
        let (data, meta) = self
            .stream
            .next()
            .map_err(|e| capture_error(&self.path, timeout, e))?;
        log::trace!(
            "captured frame: seq={} len={} fourcc={:?}",
            meta.sequence,
            data.len(),
            self.fourcc
        );
        let buf = to_rgb(self.fourcc, self.width, self.height, data)?;
        RgbImage::from_raw(self.width, self.height, buf)
            .ok_or_else(|| anyhow::anyhow!("failed to build image buffer"))
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        log::debug!("camera {} released", self.path);
    }
}

fn capture_error(device: &str, timeout: Duration, err: io::Error) -> anyhow::Error {
    match err.kind() {
        io::ErrorKind::TimedOut => {
            anyhow::anyhow!("camera {} delivered no frame within {:?}", device, timeout)
        }
        io::ErrorKind::Interrupted => anyhow::anyhow!("capture on {} interrupted", device),
        _ => anyhow::Error::new(err).context(format!("capture frame from {}", device)),
    }
}

fn to_rgb(fourcc: FourCC, width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let pixels = (width * height) as usize;
    let mut buf = match fourcc.repr {
        RGB3 => data.to_vec(),
        YUYV => yuyv_to_rgb(pixels, data)?,
        GREY => grey_to_rgb(pixels, data)?,
        other => anyhow::bail!("unsupported pixel format {:?}", FourCC::new(&other)),
    };
    if buf.len() < pixels * 3 {
        anyhow::bail!("buffer too small: got {}, expected {}", buf.len(), pixels * 3);
    }
    buf.truncate(pixels * 3);
    Ok(buf)
}

fn yuyv_to_rgb(pixels: usize, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < pixels * 2 {
        anyhow::bail!("short YUYV buffer");
    }
    let mut out = Vec::with_capacity(pixels * 3);
    for chunk in data[..pixels * 2].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

fn grey_to_rgb(pixels: usize, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < pixels {
        anyhow::bail!("short GREY buffer");
    }
    Ok(data[..pixels].iter().flat_map(|&y| [y, y, y]).collect())
}
