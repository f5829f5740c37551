use crate::yunet;
use anyhow::Result;
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// YuNet input side length.
pub const DETECTOR_INPUT: u32 = 640;
/// SFace input side length.
pub const ENCODER_INPUT: u32 = 112;

/// ArcFace reference eye positions in a 112x112 crop.
const REF_LEFT_EYE: (f32, f32) = (38.2946, 51.6963);
const REF_RIGHT_EYE: (f32, f32) = (73.5318, 51.5014);

/// Detection result from YuNet, in source image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// L2-normalized face embedding (SFace output).
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from(values),
        }
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    /// Scale to unit length. A zero vector is returned unchanged.
    pub fn normalized(mut self) -> Self {
        let norm = self.vector.dot(&self.vector).sqrt();
        if norm > 0.0 {
            self.vector.mapv_inplace(|x| x / norm);
        }
        self
    }

    /// Euclidean distance. Embeddings of different dimension are infinitely
    /// far apart so they can never produce a match.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.len() != other.len() {
            return f32::INFINITY;
        }
        let diff = &self.vector - &other.vector;
        diff.dot(&diff).sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Aspect-preserving resize onto a black square canvas.
struct Letterbox {
    canvas: RgbImage,
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl Letterbox {
    fn new(img: &DynamicImage, side: u32) -> Self {
        let (w, h) = img.dimensions();
        let scale = side as f32 / w.max(h) as f32;
        let new_w = ((w as f32 * scale) as u32).max(1);
        let new_h = ((h as f32 * scale) as u32).max(1);
        let resized = img
            .resize_exact(new_w, new_h, image::imageops::FilterType::Triangle)
            .to_rgb8();

        let offset_x = (side - new_w) / 2;
        let offset_y = (side - new_h) / 2;
        let mut canvas = RgbImage::new(side, side);
        image::imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

        Self {
            canvas,
            scale,
            offset_x: offset_x as f32,
            offset_y: offset_y as f32,
        }
    }

    /// Map a normalized canvas coordinate back to source pixels.
    fn to_source(&self, nx: f32, ny: f32) -> (f32, f32) {
        let side = self.canvas.width() as f32;
        (
            (nx * side - self.offset_x) / self.scale,
            (ny * side - self.offset_y) / self.scale,
        )
    }

    fn to_source_len(&self, n: f32) -> f32 {
        n * self.canvas.width() as f32 / self.scale
    }
}

/// Planar BGR float tensor `[1, 3, H, W]` with raw 0..255 values, the layout
/// both YuNet and SFace expect.
fn bgr_tensor(img: &RgbImage) -> Result<Array4<f32>> {
    let (w, h) = img.dimensions();
    let plane = (w * h) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    let (b, rest) = data.split_at_mut(plane);
    let (g, r) = rest.split_at_mut(plane);
    for (i, px) in img.pixels().enumerate() {
        r[i] = px[0] as f32;
        g[i] = px[1] as f32;
        b[i] = px[2] as f32;
    }
    Ok(Array4::from_shape_vec((1, 3, h as usize, w as usize), data)?)
}

/// Detect every face in an image using the YuNet detector.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let letterbox = Letterbox::new(img, DETECTOR_INPUT);
    let input_tensor = Value::from_array(bgr_tensor(&letterbox.canvas)?)?;

    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut owned: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        owned.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let output_refs: Vec<(&[i64], &[f32])> = owned
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let heads = yunet::parse_outputs(&output_refs, DETECTOR_INPUT as usize)?;
    let raw = yunet::decode(&heads, score_threshold, DETECTOR_INPUT as usize)?;

    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let (x, y) = letterbox.to_source(d.bbox[0], d.bbox[1]);
            let mut landmarks = [0.0f32; 10];
            for k in 0..5 {
                let (lx, ly) = letterbox.to_source(d.landmarks[k * 2], d.landmarks[k * 2 + 1]);
                landmarks[k * 2] = lx;
                landmarks[k * 2 + 1] = ly;
            }
            Detection {
                bbox: [
                    x,
                    y,
                    letterbox.to_source_len(d.bbox[2]),
                    letterbox.to_source_len(d.bbox[3]),
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    log::debug!("yunet: {} raw detections", detections.len());

    if nms_threshold < 1.0 {
        Ok(nms(&detections, nms_threshold))
    } else {
        Ok(detections)
    }
}

/// Greedy non-maximum suppression, highest score first.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::with_capacity(sorted.len());
    for det in sorted {
        if keep.iter().all(|k| compute_iou(&k.bbox, &det.bbox) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Rotate, scale and crop the face so the eyes land on the reference
/// positions of a `size`x`size` crop.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    let k = size as f32 / ENCODER_INPUT as f32;
    let left = (detection.landmarks[0], detection.landmarks[1]);
    let right = (detection.landmarks[2], detection.landmarks[3]);

    let (dx, dy) = (right.0 - left.0, right.1 - left.1);
    let eye_dist = (dx * dx + dy * dy).sqrt();
    if eye_dist < f32::EPSILON {
        anyhow::bail!("degenerate landmarks: eyes coincide");
    }
    let ref_dist = ((REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).powi(2)
        + (REF_RIGHT_EYE.1 - REF_LEFT_EYE.1).powi(2))
    .sqrt();

    let scale = k * ref_dist / eye_dist;
    let angle = dy.atan2(dx);
    let (sin, cos) = angle.sin_cos();

    let src_center = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
    let dst_center = (
        k * (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0,
        k * (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0,
    );

    let src = img.to_rgb8();
    let (w, h) = src.dimensions();
    let mut out = RgbImage::new(size, size);

    // Inverse map: output pixel → source pixel, undoing scale then rotation.
    for (ox, oy, px) in out.enumerate_pixels_mut() {
        let u = (ox as f32 - dst_center.0) / scale;
        let v = (oy as f32 - dst_center.1) / scale;
        let sx = src_center.0 + u * cos - v * sin;
        let sy = src_center.1 + u * sin + v * cos;
        if sx < 0.0 || sy < 0.0 || sx > (w - 1) as f32 || sy > (h - 1) as f32 {
            continue;
        }
        *px = bilinear(&src, sx, sy);
    }

    Ok(DynamicImage::ImageRgb8(out))
}

fn bilinear(src: &RgbImage, x: f32, y: f32) -> image::Rgb<u8> {
    let (w, h) = src.dimensions();
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = src.get_pixel(x0, y0);
    let p10 = src.get_pixel(x1, y0);
    let p01 = src.get_pixel(x0, y1);
    let p11 = src.get_pixel(x1, y1);

    let mut rgb = [0u8; 3];
    for (c, out) in rgb.iter_mut().enumerate() {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        *out = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    image::Rgb(rgb)
}

/// Encode an aligned face crop to an L2-normalized embedding using SFace.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let face = face_img
        .resize_exact(ENCODER_INPUT, ENCODER_INPUT, image::imageops::FilterType::Triangle)
        .to_rgb8();
    let input_tensor = Value::from_array(bgr_tensor(&face)?)?;

    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // Expecting shape [1, 128]
    let dim = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if dim == 0 || dim > data.len() {
        anyhow::bail!("unexpected embedding shape {:?}", shape);
    }

    Ok(Embedding::new(data[..dim].to_vec()).normalized())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_iou() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let iou = compute_iou(&a, &b);
        assert!(iou > 0.0 && iou < 1.0);

        let c = [100.0, 100.0, 10.0, 10.0];
        assert_eq!(compute_iou(&a, &c), 0.0);
    }

    #[test]
    fn test_nms() {
        let detections = vec![
            det([10.0, 10.0, 20.0, 20.0], 0.9),
            det([12.0, 12.0, 20.0, 20.0], 0.8),
            det([100.0, 100.0, 20.0, 20.0], 0.85),
        ];

        let result = nms(&detections, 0.3);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].score, 0.9);
        assert_eq!(result[1].score, 0.85);
    }

    #[test]
    fn test_embedding_distance() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert_relative_eq!(a.distance(&b), 2f32.sqrt(), epsilon = 1e-6);
        assert_eq!(a.distance(&a), 0.0);
    }

    #[test]
    fn test_embedding_dimension_mismatch_is_infinite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!(a.distance(&b).is_infinite());
    }

    #[test]
    fn test_normalized() {
        let e = Embedding::new(vec![3.0, 4.0]).normalized();
        assert_relative_eq!(e.vector[0], 0.6, epsilon = 1e-6);
        assert_relative_eq!(e.vector[1], 0.8, epsilon = 1e-6);
        let zero = Embedding::new(vec![0.0, 0.0]).normalized();
        assert_eq!(zero.vector.to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_letterbox_maps_back_to_source() {
        let img = DynamicImage::new_rgb8(320, 160);
        let lb = Letterbox::new(&img, DETECTOR_INPUT);
        // 320x160 → 640x320, padded 160px top and bottom
        let (x, y) = lb.to_source(0.5, 0.5);
        assert_abs_diff_eq!(x, 160.0, epsilon = 1e-3);
        assert_abs_diff_eq!(y, 80.0, epsilon = 1e-3);
        assert_abs_diff_eq!(lb.to_source_len(0.25), 80.0, epsilon = 1e-3);
    }

    #[test]
    fn test_align_face_keeps_eyes_on_reference() {
        // Place bright pixels at the source eye positions; after alignment
        // they should land near the reference eye positions.
        let mut src = RgbImage::new(200, 200);
        for (x, y) in [(80u32, 100u32), (120, 100)] {
            for dx in 0..3 {
                for dy in 0..3 {
                    src.put_pixel(x + dx - 1, y + dy - 1, image::Rgb([255, 255, 255]));
                }
            }
        }
        let mut landmarks = [0.0f32; 10];
        landmarks[..4].copy_from_slice(&[80.0, 100.0, 120.0, 100.0]);
        let detection = Detection {
            bbox: [60.0, 60.0, 80.0, 80.0],
            score: 0.9,
            landmarks,
        };

        let aligned = align_face(&DynamicImage::ImageRgb8(src), &detection, ENCODER_INPUT)
            .unwrap()
            .to_rgb8();
        let lx = REF_LEFT_EYE.0.round() as u32;
        let ly = REF_LEFT_EYE.1.round() as u32;
        assert!(aligned.get_pixel(lx, ly)[0] > 100);
    }
}
