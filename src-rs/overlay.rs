//! Preview of the selection as the user sees it: the displayed image with
//! everything outside the selection dimmed, an outline and a size label.

use crate::geometry::{SelectionRect, Size};
use crate::source::SourceImage;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::imageops::FilterType;
use image::{Rgba, RgbaImage};

const MASK: Rgba<u8> = Rgba([0, 0, 0, 128]);
const OUTLINE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const LABEL_BG: Rgba<u8> = Rgba([0, 0, 0, 200]);

/// Renders the preview at the displayed size (rounded). `label` is drawn
/// just above the selection, or inside it when there is no room.
pub fn render_selection_preview(
    source: &SourceImage,
    selection: &SelectionRect,
    label: Option<&str>,
) -> RgbaImage {
    let (w, h) = displayed_pixels(source.displayed_size());
    let mut out = source
        .raster()
        .resize_exact(w, h, FilterType::Triangle)
        .to_rgba8();

    let x0 = selection.x.round() as i64;
    let y0 = selection.y.round() as i64;
    let x1 = selection.right().round() as i64;
    let y1 = selection.bottom().round() as i64;

    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let (x, y) = (i64::from(x), i64::from(y));
        if x < x0 || x >= x1 || y < y0 || y >= y1 {
            *pixel = blend_pixel(*pixel, MASK);
        }
    }

    draw_outline(&mut out, x0, y0, x1 - 1, y1 - 1, OUTLINE);

    if let Some(text) = label.filter(|t| !t.is_empty()) {
        let text_w = text.chars().count() as i64 * 8;
        let ty = if y0 >= 12 { y0 - 11 } else { y0 + 2 };
        let tx = x0.clamp(0, (i64::from(w) - text_w - 4).max(0));
        fill_rect(&mut out, tx, ty, tx + text_w + 3, ty + 9, LABEL_BG);
        draw_text(&mut out, tx + 2, ty + 1, text, OUTLINE);
    }
    out
}

fn displayed_pixels(size: Size) -> (u32, u32) {
    let side = |v: f64| {
        if v.is_finite() && v >= 1.0 {
            v.round() as u32
        } else {
            1
        }
    };
    (side(size.width), side(size.height))
}

fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let a = f64::from(src[3]) / 255.0;
    let inv = 1.0 - a;
    let mix = |d: u8, s: u8| (f64::from(d) * inv + f64::from(s) * a).round().clamp(0.0, 255.0) as u8;
    Rgba([mix(dst[0], src[0]), mix(dst[1], src[1]), mix(dst[2], src[2]), dst[3]])
}

fn put_blended(img: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x < 0 || y < 0 || x >= i64::from(img.width()) || y >= i64::from(img.height()) {
        return;
    }
    let (x, y) = (x as u32, y as u32);
    let dst = *img.get_pixel(x, y);
    img.put_pixel(x, y, blend_pixel(dst, color));
}

fn draw_outline(img: &mut RgbaImage, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgba<u8>) {
    if x1 < x0 || y1 < y0 {
        return;
    }
    for x in x0..=x1 {
        put_blended(img, x, y0, color);
        put_blended(img, x, y1, color);
    }
    for y in y0..=y1 {
        put_blended(img, x0, y, color);
        put_blended(img, x1, y, color);
    }
}

fn fill_rect(img: &mut RgbaImage, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgba<u8>) {
    for y in y0..=y1 {
        for x in x0..=x1 {
            put_blended(img, x, y, color);
        }
    }
}

fn draw_text(img: &mut RgbaImage, x: i64, y: i64, text: &str, color: Rgba<u8>) {
    let mut cursor_x = x;
    for ch in text.chars() {
        if let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) {
            for (row_idx, row) in glyph.iter().enumerate() {
                for col in 0..8 {
                    if (row >> col) & 1 == 1 {
                        put_blended(img, cursor_x + col, y + row_idx as i64, color);
                    }
                }
            }
        }
        cursor_x += 8;
    }
}
