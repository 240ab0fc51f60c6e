//! Coordinate types shared by the selector and the converter.
//!
//! Displayed-space values are CSS-like pixels measured from the top-left of
//! the on-screen image; native-space values are true raster pixels.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Clamps both coordinates into `[0, bounds.width] x [0, bounds.height]`.
    /// NaN collapses to the origin edge instead of leaking into a rectangle.
    pub fn clamp_to(self, bounds: Size) -> Self {
        Self {
            x: clamp_coord(self.x, bounds.width),
            y: clamp_coord(self.y, bounds.height),
        }
    }

    pub fn offset_by(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x - dx,
            y: self.y - dy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn from_pixels(width: u32, height: u32) -> Self {
        Self {
            width: f64::from(width),
            height: f64::from(height),
        }
    }

    /// True when both sides are finite and strictly positive.
    pub fn is_measurable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    pub fn to_rect(self) -> SelectionRect {
        SelectionRect::new(0.0, 0.0, self.width.max(0.0), self.height.max(0.0))
    }
}

/// Rectangle in displayed-image space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectionRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl SelectionRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Zero-sized rectangle anchored at `point`.
    pub fn at(point: Point) -> Self {
        Self::new(point.x, point.y, 0.0, 0.0)
    }

    /// Axis-aligned bounding box of two corners.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (b.x - a.x).abs(),
            height: (b.y - a.y).abs(),
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn fits_within(&self, bounds: Size) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.width >= 0.0
            && self.height >= 0.0
            && self.right() <= bounds.width
            && self.bottom() <= bounds.height
    }

    /// Forces the rectangle inside `bounds`, shrinking it where it overhangs.
    pub fn clamp_to(self, bounds: Size) -> Self {
        let top_left = Point::new(self.x, self.y).clamp_to(bounds);
        let bottom_right = Point::new(self.right(), self.bottom()).clamp_to(bounds);
        Self::from_corners(top_left, bottom_right)
    }

    pub fn meets_minimum(&self, min_side: f64) -> bool {
        self.width >= min_side && self.height >= min_side
    }
}

/// Rectangle in native raster space. Kept fractional until rasterization.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NativeRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NativeRect {
    /// Integer pixel box `(x, y, w, h)` with each component rounded.
    pub fn rounded(&self) -> (i64, i64, u32, u32) {
        (
            self.x.round() as i64,
            self.y.round() as i64,
            round_extent(self.width),
            round_extent(self.height),
        )
    }
}

/// Displayed-to-native multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    pub x: f64,
    pub y: f64,
}

impl Scale {
    pub fn uniform(value: f64) -> Self {
        Self { x: value, y: value }
    }

    pub fn is_uniform(&self) -> bool {
        (self.x - self.y).abs() <= f64::EPSILON * self.x.abs().max(1.0)
    }
}

fn clamp_coord(value: f64, max: f64) -> f64 {
    let max = if max.is_finite() { max.max(0.0) } else { 0.0 };
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, max)
}

fn round_extent(value: f64) -> u32 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    value.round().min(f64::from(u32::MAX)) as u32
}
