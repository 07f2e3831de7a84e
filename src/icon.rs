use image::{Rgba, RgbaImage};

pub const ICON_SIZE: u32 = 16;

const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);
const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

// 5x7 bitmap digits, one bit per pixel, MSB = leftmost column.
const GLYPH_W: usize = 5;
const GLYPH_H: usize = 7;

fn glyph_rows(ch: char) -> [u8; GLYPH_H] {
    match ch {
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        _ => [0; GLYPH_H],
    }
}

/// The live icon image. Converting it to a platform handle happens at the
/// tray boundary; swapping the handle in releases the superseded one.
pub struct RenderedIcon {
    pub image: RgbaImage,
}

#[cfg(windows)]
impl RenderedIcon {
    pub fn to_tray_icon(&self) -> Result<tray_icon::Icon, tray_icon::BadIcon> {
        tray_icon::Icon::from_rgba(
            self.image.as_raw().clone(),
            self.image.width(),
            self.image.height(),
        )
    }
}

fn text_width(chars: usize, gap: usize) -> usize {
    chars * GLYPH_W + chars.saturating_sub(1) * gap
}

/// Renders the wattage as an integer, white on an opaque black 16x16
/// canvas, centered from the measured text width. Digits keep a one-pixel
/// gap unless that overflows the canvas (three digits), in which case the
/// gap collapses to zero; 0..=999 always fits.
pub fn render(watts: f32) -> RenderedIcon {
    let text = format!("{watts:.0}");
    let mut image = RgbaImage::from_pixel(ICON_SIZE, ICON_SIZE, BACKGROUND);

    let canvas = ICON_SIZE as usize;
    let chars = text.chars().count();
    let gap = if text_width(chars, 1) > canvas { 0 } else { 1 };
    let x = canvas.saturating_sub(text_width(chars, gap)) / 2;
    let y = (canvas - GLYPH_H) / 2;
    draw_text(&mut image, x, y, gap, &text);

    RenderedIcon { image }
}

fn draw_text(image: &mut RgbaImage, x: usize, y: usize, gap: usize, text: &str) {
    let mut pen_x = x;
    for ch in text.chars() {
        let rows = glyph_rows(ch);
        for (row_y, row_bits) in rows.iter().enumerate() {
            for col_x in 0..GLYPH_W {
                if (row_bits >> (GLYPH_W - 1 - col_x)) & 1 == 1 {
                    let px = (pen_x + col_x) as u32;
                    let py = (y + row_y) as u32;
                    if px < image.width() && py < image.height() {
                        image.put_pixel(px, py, TEXT_COLOR);
                    }
                }
            }
        }
        pen_x += GLYPH_W + gap;
    }
}
