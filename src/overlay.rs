//! Box and label drawing on RGB frames.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::geometry::BBox;

pub const INTRUDER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const ACTION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const OBJECT_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
pub const DIAGNOSTIC_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const LINE_THICKNESS: u32 = 2;
const TEXT_HEIGHT: f32 = 16.0;
/// Approximate glyph advance used for the font-less label tab.
const TAB_CHAR_WIDTH: u32 = 6;

/// Draws annotation boxes and labels. Text uses a TrueType font when one is
/// configured; otherwise a solid tab sized to the label stands in for it.
pub struct Overlay {
    font: Option<FontVec>,
}

impl Overlay {
    /// Overlay without a font.
    pub fn new() -> Self {
        Self { font: None }
    }

    pub fn with_font_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| anyhow!("invalid font {}: {}", path.display(), e))?;
        Ok(Self { font: Some(font) })
    }

    /// Load the configured font, degrading to the font-less overlay.
    pub fn load(font_path: Option<&Path>) -> Self {
        match font_path {
            Some(path) => Self::with_font_file(path).unwrap_or_else(|e| {
                log::warn!("{}; labels drawn without text", e);
                Self::new()
            }),
            None => Self::new(),
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Outline `bbox` and write `label` just above its top-left corner.
    pub fn draw_box(&self, image: &mut RgbImage, bbox: &BBox, label: &str, color: Rgb<u8>) {
        let (w, h) = image.dimensions();
        let Some((x, y, bw, bh)) = bbox.to_pixel_rect(w, h) else {
            return;
        };
        for inset in 0..LINE_THICKNESS {
            if bw <= inset * 2 || bh <= inset * 2 {
                break;
            }
            let rect = Rect::at((x + inset) as i32, (y + inset) as i32)
                .of_size(bw - inset * 2, bh - inset * 2);
            draw_hollow_rect_mut(image, rect, color);
        }
        let label_y = y.saturating_sub(TEXT_HEIGHT as u32 + 2);
        self.draw_text(image, x, label_y, label, color);
    }

    /// Write a line of text with its top-left corner at `(x, y)`.
    pub fn draw_text(&self, image: &mut RgbImage, x: u32, y: u32, text: &str, color: Rgb<u8>) {
        if text.is_empty() {
            return;
        }
        match &self.font {
            Some(font) => draw_text_mut(
                image,
                color,
                x as i32,
                y as i32,
                PxScale::from(TEXT_HEIGHT),
                font,
                text,
            ),
            None => {
                let (w, h) = image.dimensions();
                if x >= w || y >= h {
                    return;
                }
                let tab_w = (text.chars().count() as u32 * TAB_CHAR_WIDTH).min(w - x);
                let tab_h = (TEXT_HEIGHT as u32 / 2).min(h - y);
                if tab_w == 0 || tab_h == 0 {
                    return;
                }
                draw_filled_rect_mut(
                    image,
                    Rect::at(x as i32, y as i32).of_size(tab_w, tab_h),
                    color,
                );
            }
        }
    }
}

impl Default for Overlay {
    fn default() -> Self {
        Self::new()
    }
}
