//! YuNet post-processing: anchor-free grid decoding.
//!
//! The 2023mar export emits twelve tensors, four heads per stride (8, 16, 32),
//! grouped by head: `cls_*`, `obj_*`, `bbox_*`, `kps_*`. Each location of a
//! `size / stride` square grid predicts one face:
//!
//! cx = (col + dx) * stride, cy = (row + dy) * stride
//! w = dw * stride, h = dh * stride
//!
//! All decoded coordinates are normalized to the square input size.

use anyhow::Result;
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

const BBOX_WIDTH: usize = 4;
const KPS_WIDTH: usize = 10;

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h (normalized [0,1])
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5 (normalized [0,1])
}

/// Per-stride prediction heads, already shaped `[locations, width]`.
#[derive(Debug, Clone)]
pub struct StrideHeads {
    pub stride: usize,
    /// Face probability, sqrt(cls * obj).
    pub scores: Array2<f32>,
    pub bboxes: Array2<f32>,
    pub landmarks: Array2<f32>,
}

fn grid_side(input_size: usize, stride: usize) -> usize {
    input_size / stride
}

fn take_head(
    outputs: &[(&[i64], &[f32])],
    index: usize,
    locations: usize,
    width: usize,
    name: &str,
) -> Result<Array2<f32>> {
    let (shape, data) = outputs
        .get(index)
        .ok_or_else(|| anyhow::anyhow!("missing {} output at index {}", name, index))?;
    let expected = [1, locations as i64, width as i64];
    if **shape != expected[..] {
        anyhow::bail!(
            "unexpected {} shape at index {}: {:?}, expected {:?}",
            name,
            index,
            shape,
            expected
        );
    }
    Ok(Array2::from_shape_vec((locations, width), data.to_vec())?)
}

/// Split raw YuNet outputs into one [`StrideHeads`] per stride.
///
/// The exported heads are already activated; the face score is the geometric
/// mean of cls and obj, as OpenCV's `FaceDetectorYN` computes it.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Vec<StrideHeads>> {
    let n = STRIDES.len();
    STRIDES
        .iter()
        .enumerate()
        .map(|(i, &stride)| {
            let side = grid_side(input_size, stride);
            let locations = side * side;
            let cls = take_head(outputs, i, locations, 1, "cls")?;
            let obj = take_head(outputs, i + n, locations, 1, "obj")?;
            let bboxes = take_head(outputs, i + 2 * n, locations, BBOX_WIDTH, "bbox")?;
            let landmarks = take_head(outputs, i + 3 * n, locations, KPS_WIDTH, "kps")?;

            let mut scores = cls.mapv(|c| c.clamp(0.0, 1.0));
            scores.zip_mut_with(&obj, |c, &o| *c = (*c * o.clamp(0.0, 1.0)).sqrt());

            Ok(StrideHeads {
                stride,
                scores,
                bboxes,
                landmarks,
            })
        })
        .collect()
}

/// Decode every grid location whose score reaches `score_threshold`, with
/// the same box parameterisation as OpenCV's `FaceDetectorYN`: offsets in
/// grid cells, width and height as `exp(d) * stride`.
pub fn decode(heads: &[StrideHeads], score_threshold: f32, input_size: usize) -> Result<Vec<RawDetection>> {
    let size = input_size as f32;
    let mut detections = Vec::new();

    for head in heads {
        let side = grid_side(input_size, head.stride);
        if head.scores.nrows() != side * side {
            anyhow::bail!(
                "stride {} expects a {}x{} grid, got {} locations",
                head.stride,
                side,
                side,
                head.scores.nrows()
            );
        }
        let stride = head.stride as f32;

        for row in 0..side {
            for col in 0..side {
                let idx = row * side + col;
                let score = head.scores[[idx, 0]];
                if score < score_threshold {
                    continue;
                }

                let cx = (col as f32 + head.bboxes[[idx, 0]]) * stride;
                let cy = (row as f32 + head.bboxes[[idx, 1]]) * stride;
                // Sizes are regressed in log space.
                let w = head.bboxes[[idx, 2]].exp() * stride;
                let h = head.bboxes[[idx, 3]].exp() * stride;

                let mut landmarks = [0.0f32; 10];
                for k in 0..5 {
                    landmarks[k * 2] = (col as f32 + head.landmarks[[idx, k * 2]]) * stride / size;
                    landmarks[k * 2 + 1] =
                        (row as f32 + head.landmarks[[idx, k * 2 + 1]]) * stride / size;
                }

                detections.push(RawDetection {
                    bbox: [(cx - w / 2.0) / size, (cy - h / 2.0) / size, w / size, h / size],
                    score,
                    landmarks,
                });
            }
        }
    }

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_heads(input_size: usize) -> Vec<StrideHeads> {
        STRIDES
            .iter()
            .map(|&stride| {
                let locations = grid_side(input_size, stride).pow(2);
                StrideHeads {
                    stride,
                    scores: Array2::zeros((locations, 1)),
                    bboxes: Array2::zeros((locations, BBOX_WIDTH)),
                    landmarks: Array2::zeros((locations, KPS_WIDTH)),
                }
            })
            .collect()
    }

    #[test]
    fn test_decode_single_cell() {
        let input_size = 640;
        let mut heads = empty_heads(input_size);

        // stride 32, cell (row 10, col 10)
        let head = &mut heads[2];
        let idx = 10 * 20 + 10;
        head.scores[[idx, 0]] = 0.9;
        head.bboxes[[idx, 0]] = 0.5;
        head.bboxes[[idx, 1]] = 0.3;
        head.bboxes[[idx, 2]] = 4f32.ln();
        head.bboxes[[idx, 3]] = 4f32.ln();

        let detections = decode(&heads, 0.5, input_size).unwrap();
        assert_eq!(detections.len(), 1);
        let det = &detections[0];

        // center (336, 329.6), size 128 → x = 0.525 - 0.1, y = 0.515 - 0.1
        assert!((det.bbox[0] - 0.425).abs() < 1e-5);
        assert!((det.bbox[1] - 0.415).abs() < 1e-5);
        assert!((det.bbox[2] - 0.2).abs() < 1e-5);
        assert!((det.bbox[3] - 0.2).abs() < 1e-5);
        assert!((det.score - 0.9).abs() < 1e-5);
        assert!((det.landmarks[0] - 0.5).abs() < 1e-5);
        assert!((det.landmarks[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_decode_zero_size_logit_is_one_stride() {
        let mut heads = empty_heads(640);
        heads[0].scores[[0, 0]] = 0.8;
        let detections = decode(&heads, 0.5, 640).unwrap();
        assert_eq!(detections.len(), 1);
        // exp(0) * 8 px on a 640 px input
        assert!((detections[0].bbox[2] - 8.0 / 640.0).abs() < 1e-6);
        assert!((detections[0].bbox[3] - 8.0 / 640.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_below_threshold_is_dropped() {
        let mut heads = empty_heads(320);
        heads[0].scores[[0, 0]] = 0.4;
        assert!(decode(&heads, 0.5, 320).unwrap().is_empty());
    }

    #[test]
    fn test_parse_outputs_rejects_bad_shape() {
        let data = vec![0.0f32; 4];
        let shape = [1i64, 4, 1];
        let outputs = vec![(&shape[..], &data[..]); 12];
        assert!(parse_outputs(&outputs, 640).is_err());
    }

    #[test]
    fn test_parse_outputs_combines_cls_and_obj() {
        let input_size = 64;
        let mut owned: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
        for (width, fill) in [(1usize, 0.25f32), (1, 1.0), (BBOX_WIDTH, 0.0), (KPS_WIDTH, 0.0)] {
            for &stride in &STRIDES {
                let locations = grid_side(input_size, stride).pow(2);
                owned.push((
                    vec![1, locations as i64, width as i64],
                    vec![fill; locations * width],
                ));
            }
        }
        let outputs: Vec<(&[i64], &[f32])> = owned
            .iter()
            .map(|(s, d)| (s.as_slice(), d.as_slice()))
            .collect();

        let heads = parse_outputs(&outputs, input_size).unwrap();
        assert_eq!(heads.len(), 3);
        // sqrt(0.25 * 1.0)
        assert!((heads[0].scores[[0, 0]] - 0.5).abs() < 1e-6);
    }
}
