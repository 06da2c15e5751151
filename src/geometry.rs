//! Axis-aligned box geometry shared by detectors, the action recognizer and
//! the overlay renderer.

use serde::{Deserialize, Serialize};

/// Guards the IoU denominator against zero-area boxes.
pub const IOU_EPSILON: f32 = 1e-6;

/// Axis-aligned box in pixel coordinates, `(x1, y1)` top-left and `(x2, y2)`
/// bottom-right.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box from a top-left corner and a size.
    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self::new(x, y, x + w, y + h)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Area with negative extents counted as zero.
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Overlapping rectangle, or `None` when the overlap has no area.
    pub fn intersection(&self, other: &BBox) -> Option<BBox> {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        if x2 > x1 && y2 > y1 {
            Some(BBox::new(x1, y1, x2, y2))
        } else {
            None
        }
    }

    /// Smallest box enclosing both boxes.
    pub fn union(&self, other: &BBox) -> BBox {
        BBox::new(
            self.x1.min(other.x1),
            self.y1.min(other.y1),
            self.x2.max(other.x2),
            self.y2.max(other.y2),
        )
    }

    /// Clamp all coordinates into `[0, width] x [0, height]`.
    pub fn clamp(&self, width: u32, height: u32) -> BBox {
        let w = width as f32;
        let h = height as f32;
        BBox::new(
            self.x1.clamp(0.0, w),
            self.y1.clamp(0.0, h),
            self.x2.clamp(0.0, w),
            self.y2.clamp(0.0, h),
        )
    }

    /// Integer pixel rectangle `(x, y, w, h)` inside an image of the given
    /// size, or `None` if nothing of the box lies inside it.
    pub fn to_pixel_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let clamped = self.clamp(width, height);
        let x1 = clamped.x1.floor() as u32;
        let y1 = clamped.y1.floor() as u32;
        let x2 = clamped.x2.ceil() as u32;
        let y2 = clamped.y2.ceil() as u32;
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// Intersection area over union area.
///
/// Disjoint boxes yield 0. Malformed boxes (negative extents) count as zero
/// area rather than erroring.
pub fn iou(a: &BBox, b: &BBox) -> f32 {
    let inter = a.intersection(b).map(|r| r.area()).unwrap_or(0.0);
    let union = a.area() + b.area() - inter + IOU_EPSILON;
    (inter / union).clamp(0.0, 1.0)
}
