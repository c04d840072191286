//! On-frame annotation: face boxes and verdict labels.
//!
//! Labels are drawn with a built-in 5×7 bitmap font covering the characters
//! a verdict label can contain (upper-case letters of the verdict words,
//! digits, `.`, `-`, parentheses, space). Anything else renders as a blank cell.

use crate::matcher::MatchDecision;
use crate::types::FaceRegion;
use image::{Rgb, RgbImage};

const BOX_THICKNESS: u32 = 2;
const FONT_SCALE: u32 = 2;
const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
/// Horizontal advance per character, in font pixels.
const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;
/// Gap between the box top and the label's bottom edge.
const LABEL_GAP: u32 = 10;

/// Label text for one face: verdict plus distance to two decimals.
pub fn label_text(decision: &MatchDecision) -> String {
    format!("{} ({:.2})", decision.verdict.label(), decision.distance)
}

/// Draw the box and label for one compared face.
pub fn annotate_face(frame: &mut RgbImage, region: &FaceRegion, decision: &MatchDecision) {
    let color = Rgb(decision.verdict.color());
    draw_rect(frame, region, color, BOX_THICKNESS);

    let text = label_text(decision);
    let text_height = GLYPH_HEIGHT * FONT_SCALE;
    let y = if region.top >= LABEL_GAP + text_height {
        region.top - LABEL_GAP - text_height
    } else {
        // No room above the box: draw just inside its top edge.
        region.top + BOX_THICKNESS + 2
    };
    draw_text(frame, region.left, y, &text, color, FONT_SCALE);
}

/// Outline `region` with a `thickness`-pixel border growing inward. Clips at frame edges.
pub fn draw_rect(frame: &mut RgbImage, region: &FaceRegion, color: Rgb<u8>, thickness: u32) {
    for t in 0..thickness {
        let (left, right) = (region.left + t, region.right.saturating_sub(t));
        let (top, bottom) = (region.top + t, region.bottom.saturating_sub(t));
        if left > right || top > bottom {
            break;
        }
        for x in left..=right {
            put_clipped(frame, x, top, color);
            put_clipped(frame, x, bottom, color);
        }
        for y in top..=bottom {
            put_clipped(frame, left, y, color);
            put_clipped(frame, right, y, color);
        }
    }
}

/// Render `text` with its top-left corner at (`x`, `y`).
pub fn draw_text(frame: &mut RgbImage, x: u32, y: u32, text: &str, color: Rgb<u8>, scale: u32) {
    for (i, ch) in text.chars().enumerate() {
        let origin_x = x + i as u32 * GLYPH_ADVANCE * scale;
        for (row, bits) in glyph(ch).into_iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        put_clipped(
                            frame,
                            origin_x + col * scale + dx,
                            y + row as u32 * scale + dy,
                            color,
                        );
                    }
                }
            }
        }
    }
}

fn put_clipped(frame: &mut RgbImage, x: u32, y: u32, color: Rgb<u8>) {
    if x < frame.width() && y < frame.height() {
        frame.put_pixel(x, y, color);
    }
}

/// Row bitmaps (bit 4 = leftmost column) for one character.
fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        _ => [0x00; 7],
    }
}
