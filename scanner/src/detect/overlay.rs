use image::{Rgb, RgbImage};

use super::font::{glyph, GLYPH_HEIGHT, GLYPH_WIDTH};
use super::traits::Corner;

pub const VALID_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const INVALID_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

pub const VALID_LABEL: &str = "Member Found!";
pub const INVALID_LABEL: &str = "Invalid QR Code";

const OUTLINE_THICKNESS: u32 = 3;
const LABEL_SCALE: u32 = 2;
const LABEL_GAP: i32 = 10;

/// Outline the code and write `label` just above its first corner.
pub fn annotate(image: &mut RgbImage, corners: &[Corner; 4], label: &str, color: Rgb<u8>) {
    draw_polygon(image, corners, color, OUTLINE_THICKNESS);
    draw_label(image, corners[0], label, color);
}

/// Closed polygon through `corners`.
pub fn draw_polygon(image: &mut RgbImage, corners: &[Corner], color: Rgb<u8>, thickness: u32) {
    for (i, &from) in corners.iter().enumerate() {
        let to = corners[(i + 1) % corners.len()];
        draw_line(image, from, to, color, thickness);
    }
}

/// Bresenham line, stamping a `thickness`-wide square at each step.
fn draw_line(image: &mut RgbImage, from: Corner, to: Corner, color: Rgb<u8>, thickness: u32) {
    let (mut x, mut y) = (from.x, from.y);
    let dx = (to.x - from.x).abs();
    let dy = -(to.y - from.y).abs();
    let sx = if from.x < to.x { 1 } else { -1 };
    let sy = if from.y < to.y { 1 } else { -1 };
    let mut err = dx + dy;
    let half = (thickness.max(1) / 2) as i32;

    loop {
        for oy in -half..=half {
            for ox in -half..=half {
                put_pixel(image, x + ox, y + oy, color);
            }
        }
        if x == to.x && y == to.y {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Width in pixels of `text` at label scale.
pub fn label_width(text: &str) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        return 0;
    }
    n * (GLYPH_WIDTH + 1) * LABEL_SCALE - LABEL_SCALE
}

/// Text whose bottom edge sits `LABEL_GAP` pixels above `anchor`, clamped
/// inside the frame.
pub fn draw_label(image: &mut RgbImage, anchor: Corner, text: &str, color: Rgb<u8>) {
    let text_h = (GLYPH_HEIGHT * LABEL_SCALE) as i32;
    let max_x = image.width() as i32 - label_width(text) as i32;
    let max_y = image.height() as i32 - text_h;
    let left = anchor.x.min(max_x).max(0);
    let top = (anchor.y - LABEL_GAP - text_h).min(max_y).max(0);

    let advance = ((GLYPH_WIDTH + 1) * LABEL_SCALE) as i32;
    for (i, ch) in text.chars().enumerate() {
        let origin_x = left + i as i32 * advance;
        for (row, bits) in glyph(ch).into_iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1u8 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                let px = origin_x + (col * LABEL_SCALE) as i32;
                let py = top + (row as u32 * LABEL_SCALE) as i32;
                for sy in 0..LABEL_SCALE as i32 {
                    for sx in 0..LABEL_SCALE as i32 {
                        put_pixel(image, px + sx, py + sy, color);
                    }
                }
            }
        }
    }
}

fn put_pixel(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x < 0 || y < 0 {
        return;
    }
    let (x, y) = (x as u32, y as u32);
    if x < image.width() && y < image.height() {
        image.put_pixel(x, y, color);
    }
}
