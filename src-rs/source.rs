//! Decoded source image with its native and displayed sizes.

use crate::error::CropError;
use crate::geometry::{SelectionRect, Size};
use image::{DynamicImage, GenericImageView};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Immutable decoded raster. A new layout produces a new value that shares
/// the pixel data.
#[derive(Debug, Clone)]
pub struct SourceImage {
    raster: Arc<DynamicImage>,
    displayed: Size,
}

impl SourceImage {
    /// Wraps a raster, displayed at its native size.
    pub fn from_raster(raster: DynamicImage) -> Self {
        let (w, h) = raster.dimensions();
        Self {
            raster: Arc::new(raster),
            displayed: Size::from_pixels(w, h),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CropError> {
        let raster = image::load_from_memory(bytes).map_err(CropError::Decode)?;
        debug!(
            width = raster.width(),
            height = raster.height(),
            "decoded source image"
        );
        Ok(Self::from_raster(raster))
    }

    pub fn open(path: &Path) -> Result<Self, CropError> {
        let bytes = std::fs::read(path)?;
        Self::decode(&bytes)
    }

    /// Same pixels laid out at a different on-screen size.
    pub fn with_displayed_size(&self, displayed: Size) -> Self {
        Self {
            raster: Arc::clone(&self.raster),
            displayed,
        }
    }

    /// Same pixels scaled down (never up) to fit inside `max`, keeping the
    /// aspect ratio.
    pub fn fitted_within(&self, max: Size) -> Self {
        self.with_displayed_size(fit_within(self.native_size(), max))
    }

    pub fn raster(&self) -> &DynamicImage {
        &self.raster
    }

    pub fn native_dimensions(&self) -> (u32, u32) {
        self.raster.dimensions()
    }

    pub fn native_size(&self) -> Size {
        let (w, h) = self.native_dimensions();
        Size::from_pixels(w, h)
    }

    pub fn displayed_size(&self) -> Size {
        self.displayed
    }

    /// Default selection covering the whole displayed image.
    pub fn full_rect(&self) -> SelectionRect {
        self.displayed.to_rect()
    }
}

/// Largest size with `native`'s aspect ratio that fits in `max`, capped at
/// `native` itself.
pub fn fit_within(native: Size, max: Size) -> Size {
    if !native.is_measurable() || !max.is_measurable() {
        return native;
    }
    let ratio = (max.width / native.width)
        .min(max.height / native.height)
        .min(1.0);
    Size::new(native.width * ratio, native.height * ratio)
}
