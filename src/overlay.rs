//! Frame annotation for the preview. Reads the verdict, never changes it.
//!
//! Text uses a built-in 3x5 pixel font covering A-Z, 0-9 and a little
//! punctuation; lowercase is drawn as uppercase and anything else as `?`.

use image::{Rgb, RgbImage};

use crate::gate::FrameVerdict;
use crate::recognizer::{BoundingBox, FaceObservation};

pub const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const PROGRESS: Rgb<u8> = Rgb([255, 255, 255]);

const BOX_THICKNESS: u32 = 2;
const BAR_HEIGHT: u32 = 8;
const TEXT_SCALE: u32 = 2;
const GLYPH_WIDTH: u32 = 3;
const GLYPH_HEIGHT: u32 = 5;

/// Outline and label each face (green when recognized, red otherwise).
/// While the presence clock runs, draw a dwell progress bar along the top
/// edge with the time remaining under it.
pub fn annotate(img: &mut RgbImage, observations: &[FaceObservation], verdict: &FrameVerdict) {
    for (obs, result) in observations.iter().zip(&verdict.matches) {
        let color = if result.is_match() { KNOWN_COLOR } else { UNKNOWN_COLOR };
        outline(img, &obs.bbox, color);

        let text_height = GLYPH_HEIGHT * TEXT_SCALE;
        let top = obs.bbox.y.max(0.0) as u32;
        // Above the box when there is room, otherwise just inside it.
        let y = match top.checked_sub(text_height + TEXT_SCALE) {
            Some(y) => y,
            None => top + BOX_THICKNESS + TEXT_SCALE,
        };
        draw_text(img, obs.bbox.x.max(0.0) as u32, y, result.label(), color, TEXT_SCALE);
    }

    if let Some(progress) = verdict.dwell_progress() {
        let width = (img.width() as f32 * progress).round() as u32;
        fill(img, 0, 0, width, BAR_HEIGHT, PROGRESS);
        if let Some(remaining) = verdict.dwell_remaining {
            let text = format!("{:.1}S LEFT", remaining.as_secs_f32());
            draw_text(img, TEXT_SCALE, BAR_HEIGHT + TEXT_SCALE, &text, PROGRESS, TEXT_SCALE);
        }
    }
}

/// Draw `text` with its top-left corner at (x, y), clipped to the image.
pub fn draw_text(img: &mut RgbImage, x: u32, y: u32, text: &str, color: Rgb<u8>, scale: u32) {
    let advance = (GLYPH_WIDTH + 1) * scale;
    for (i, ch) in text.chars().enumerate() {
        let gx = x.saturating_add(advance.saturating_mul(i as u32));
        if gx >= img.width() {
            break;
        }
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0b100 >> col) != 0 {
                    fill(
                        img,
                        gx + col * scale,
                        y.saturating_add(row as u32 * scale),
                        scale,
                        scale,
                        color,
                    );
                }
            }
        }
    }
}

/// Rows top to bottom, three bits each, leftmost pixel in the high bit.
fn glyph(ch: char) -> [u8; 5] {
    match ch.to_ascii_uppercase() {
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b010],
        'K' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b110, 0b101, 0b101, 0b101, 0b101],
        'O' => [0b010, 0b101, 0b101, 0b101, 0b010],
        'P' => [0b110, 0b101, 0b110, 0b100, 0b100],
        'Q' => [0b010, 0b101, 0b101, 0b110, 0b011],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b110, 0b001, 0b010, 0b100, 0b111],
        '3' => [0b110, 0b001, 0b010, 0b001, 0b110],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b110, 0b001, 0b110],
        '6' => [0b011, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b110],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        '_' => [0b000, 0b000, 0b000, 0b000, 0b111],
        ' ' => [0; 5],
        _ => [0b110, 0b001, 0b010, 0b000, 0b010],
    }
}

fn outline(img: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let x0 = bbox.x.max(0.0) as u32;
    let y0 = bbox.y.max(0.0) as u32;
    let x1 = (bbox.x + bbox.width).max(0.0) as u32;
    let y1 = (bbox.y + bbox.height).max(0.0) as u32;
    if x1 <= x0 || y1 <= y0 {
        return;
    }
    let w = x1 - x0;
    let h = y1 - y0;
    let t = BOX_THICKNESS;

    fill(img, x0, y0, w, t, color);
    fill(img, x0, y1.saturating_sub(t), w, t, color);
    fill(img, x0, y0, t, h, color);
    fill(img, x1.saturating_sub(t), y0, t, h, color);
}

/// Fill a rectangle, clipped to the image.
fn fill(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x_end = x.saturating_add(w).min(img.width());
    let y_end = y.saturating_add(h).min(img.height());
    for py in y..y_end {
        for px in x..x_end {
            img.put_pixel(px, py, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MatchResult;
    use crate::gate::Decision;
    use crate::Embedding;
    use std::time::Duration;

    fn observation(x: f32, y: f32, size: f32) -> FaceObservation {
        FaceObservation {
            bbox: BoundingBox {
                x,
                y,
                width: size,
                height: size,
            },
            embedding: Embedding::new(vec![0.0]),
        }
    }

    fn verdict(matches: Vec<MatchResult>, dwell: Option<(u64, u64)>) -> FrameVerdict {
        FrameVerdict {
            decision: Decision::Continue,
            recognized: matches.iter().filter_map(|m| m.identity.clone()).collect(),
            matches,
            dwell_elapsed: dwell.map(|(e, _)| Duration::from_secs(e)),
            dwell_remaining: dwell.map(|(_, r)| Duration::from_secs(r)),
        }
    }

    #[test]
    fn test_boxes_are_colored_by_match() {
        let mut img = RgbImage::new(100, 100);
        let observations = [observation(10.0, 20.0, 20.0), observation(60.0, 60.0, 20.0)];
        let v = verdict(
            vec![
                MatchResult {
                    identity: Some("alice".into()),
                    distance: 0.2,
                },
                MatchResult {
                    identity: None,
                    distance: 0.9,
                },
            ],
            None,
        );
        annotate(&mut img, &observations, &v);

        assert_eq!(*img.get_pixel(10, 20), KNOWN_COLOR);
        assert_eq!(*img.get_pixel(60, 60), UNKNOWN_COLOR);
        // interior untouched
        assert_eq!(*img.get_pixel(20, 30), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_boxes_are_clipped() {
        let mut img = RgbImage::new(50, 50);
        let observations = [observation(-10.0, 40.0, 30.0)];
        let v = verdict(
            vec![MatchResult {
                identity: None,
                distance: 1.0,
            }],
            None,
        );
        annotate(&mut img, &observations, &v);
        assert_eq!(*img.get_pixel(0, 40), UNKNOWN_COLOR);
    }

    #[test]
    fn test_draw_text_glyph_pixels() {
        let mut img = RgbImage::new(8, 5);
        draw_text(&mut img, 0, 0, "Ti", KNOWN_COLOR, 1);
        // T: full top row, then the centre column
        assert_eq!(*img.get_pixel(0, 0), KNOWN_COLOR);
        assert_eq!(*img.get_pixel(2, 0), KNOWN_COLOR);
        assert_eq!(*img.get_pixel(1, 4), KNOWN_COLOR);
        assert_eq!(*img.get_pixel(0, 1), Rgb([0, 0, 0]));
        // gap column, then I drawn as uppercase
        assert_eq!(*img.get_pixel(3, 0), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(4, 0), KNOWN_COLOR);
        assert_eq!(*img.get_pixel(5, 2), KNOWN_COLOR);
    }

    #[test]
    fn test_face_label_drawn_above_box() {
        let mut img = RgbImage::new(100, 100);
        let observations = [observation(10.0, 40.0, 20.0)];
        let v = verdict(
            vec![MatchResult {
                identity: Some("ada".into()),
                distance: 0.1,
            }],
            None,
        );
        annotate(&mut img, &observations, &v);
        // "A" top row is 0b010: its middle pixel, scaled by 2, starts at
        // x = 10 + 2, y = 40 - 12.
        assert_eq!(*img.get_pixel(12, 28), KNOWN_COLOR);
        assert_eq!(*img.get_pixel(10, 28), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_time_remaining_drawn_under_bar() {
        let mut img = RgbImage::new(100, 40);
        annotate(&mut img, &[], &verdict(vec![], Some((5, 5))));
        let text_rows = BAR_HEIGHT + TEXT_SCALE..BAR_HEIGHT + TEXT_SCALE * (GLYPH_HEIGHT + 1);
        let lit = text_rows
            .flat_map(|y| (0..100).map(move |x| (x, y)))
            .filter(|&(x, y)| *img.get_pixel(x, y) == PROGRESS)
            .count();
        assert!(lit > 0);
    }

    #[test]
    fn test_progress_bar_width() {
        let mut img = RgbImage::new(100, 20);
        annotate(&mut img, &[], &verdict(vec![], Some((5, 5))));
        assert_eq!(*img.get_pixel(49, 0), PROGRESS);
        assert_eq!(*img.get_pixel(50, 0), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(49, BAR_HEIGHT), Rgb([0, 0, 0]));
    }
}
