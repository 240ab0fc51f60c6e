//! Displayed-space selection to native raster, then to an encoded payload.

use crate::error::CropError;
use crate::geometry::{NativeRect, Scale, SelectionRect};
use crate::source::SourceImage;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::{debug, warn};

pub const DEFAULT_JPEG_QUALITY: f32 = 0.8;

/// Per-side limit of a drawing surface.
pub const MAX_SURFACE_SIDE: u32 = 16_384;
/// Total pixel limit of a drawing surface.
pub const MAX_SURFACE_PIXELS: u64 = 268_435_456;

/// How the displayed-to-native factor is derived.
///
/// `Uniform` takes `native_width / displayed_width` for both axes and assumes
/// the on-screen image keeps its aspect ratio. `PerAxis` derives x from the
/// widths and y from the heights, for layouts that stretch one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScaleMode {
    #[default]
    Uniform,
    PerAxis,
}

pub fn compute_scale(source: &SourceImage, mode: ScaleMode) -> Result<Scale, CropError> {
    let displayed = source.displayed_size();
    let native = source.native_size();
    let degenerate = || CropError::DegenerateImage {
        width: displayed.width,
        height: displayed.height,
    };
    if !displayed.width.is_finite() || displayed.width <= 0.0 {
        return Err(degenerate());
    }
    let x = native.width / displayed.width;
    match mode {
        ScaleMode::Uniform => Ok(Scale::uniform(x)),
        ScaleMode::PerAxis => {
            if !displayed.height.is_finite() || displayed.height <= 0.0 {
                return Err(degenerate());
            }
            Ok(Scale {
                x,
                y: native.height / displayed.height,
            })
        }
    }
}

pub fn map_to_native(rect: &SelectionRect, scale: Scale) -> NativeRect {
    NativeRect {
        x: rect.x * scale.x,
        y: rect.y * scale.y,
        width: rect.width * scale.x,
        height: rect.height * scale.y,
    }
}

/// Source of blank output rasters.
pub trait RasterSurface {
    fn acquire(&self, width: u32, height: u32) -> Result<RgbaImage, CropError>;
}

/// In-memory surface with canvas-like size limits.
#[derive(Debug, Clone, Copy)]
pub struct CpuSurface {
    pub max_side: u32,
    pub max_pixels: u64,
}

impl Default for CpuSurface {
    fn default() -> Self {
        Self {
            max_side: MAX_SURFACE_SIDE,
            max_pixels: MAX_SURFACE_PIXELS,
        }
    }
}

impl RasterSurface for CpuSurface {
    fn acquire(&self, width: u32, height: u32) -> Result<RgbaImage, CropError> {
        let pixels = u64::from(width) * u64::from(height);
        if width > self.max_side || height > self.max_side || pixels > self.max_pixels {
            return Err(CropError::RenderContextUnavailable {
                width,
                height,
                reason: format!(
                    "exceeds surface limits ({} px per side, {} px total)",
                    self.max_side, self.max_pixels
                ),
            });
        }
        Ok(RgbaImage::new(width, height))
    }
}

/// Copies the native region into a fresh raster of
/// `round(width) x round(height)`. Parts of the region outside the source
/// stay transparent.
pub fn rasterize(
    source: &SourceImage,
    native: &NativeRect,
    surface: &dyn RasterSurface,
) -> Result<RgbaImage, CropError> {
    let (x, y, w, h) = native.rounded();
    if w == 0 || h == 0 {
        return Err(CropError::EmptyRegion);
    }
    let mut out = surface.acquire(w, h)?;

    let (src_w, src_h) = source.native_dimensions();
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = x.saturating_add(i64::from(w)).min(i64::from(src_w));
    let y1 = y.saturating_add(i64::from(h)).min(i64::from(src_h));
    if x1 > x0 && y1 > y0 {
        let part = source
            .raster()
            .crop_imm(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32)
            .to_rgba8();
        imageops::replace(&mut out, &part, x0 - x, y0 - y);
    } else {
        warn!(?native, "crop region lies outside the source raster");
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodeFormat {
    #[default]
    Jpeg,
    Png,
}

impl EncodeFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            EncodeFormat::Jpeg => "image/jpeg",
            EncodeFormat::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            EncodeFormat::Jpeg => "jpg",
            EncodeFormat::Png => "png",
        }
    }
}

/// Compressed crop ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub format: EncodeFormat,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.format.mime(), self.to_base64())
    }

    pub fn decode(&self) -> Result<DynamicImage, CropError> {
        image::load_from_memory(&self.bytes).map_err(CropError::Decode)
    }
}

/// Encodes a raster. `quality` is in `[0, 1]` and only affects JPEG; JPEG
/// output is flattened onto white.
pub fn encode(
    raster: &RgbaImage,
    format: EncodeFormat,
    quality: f32,
) -> Result<EncodedImage, CropError> {
    let mut bytes = Vec::new();
    match format {
        EncodeFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut bytes, jpeg_quality(quality));
            DynamicImage::ImageRgb8(flatten_on_white(raster))
                .write_with_encoder(encoder)
                .map_err(CropError::Encode)?;
        }
        EncodeFormat::Png => {
            let mut cursor = Cursor::new(&mut bytes);
            raster
                .write_to(&mut cursor, ImageFormat::Png)
                .map_err(CropError::Encode)?;
        }
    }
    debug!(
        format = format.mime(),
        width = raster.width(),
        height = raster.height(),
        bytes = bytes.len(),
        "encoded crop"
    );
    Ok(EncodedImage {
        bytes,
        format,
        width: raster.width(),
        height: raster.height(),
    })
}

fn jpeg_quality(quality: f32) -> u8 {
    let q = if quality.is_finite() {
        quality.clamp(0.0, 1.0)
    } else {
        DEFAULT_JPEG_QUALITY
    };
    ((q * 100.0).round() as u8).max(1)
}

fn flatten_on_white(raster: &RgbaImage) -> RgbImage {
    let mut out = RgbImage::new(raster.width(), raster.height());
    for (x, y, Rgba([r, g, b, a])) in raster.enumerate_pixels() {
        let alpha = u16::from(*a);
        let blend = |channel: u8| -> u8 {
            ((u16::from(channel) * alpha + 255 * (255 - alpha)) / 255) as u8
        };
        out.put_pixel(x, y, Rgb([blend(*r), blend(*g), blend(*b)]));
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropOptions {
    pub scale_mode: ScaleMode,
    pub format: EncodeFormat,
    pub quality: f32,
}

impl Default for CropOptions {
    fn default() -> Self {
        Self {
            scale_mode: ScaleMode::Uniform,
            format: EncodeFormat::Jpeg,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Everything produced by one crop.
#[derive(Debug, Clone)]
pub struct CropOutput {
    pub selection: SelectionRect,
    pub scale: Scale,
    pub native: NativeRect,
    pub encoded: EncodedImage,
}

/// Full converter pass: scale, map, rasterize, encode.
pub fn crop_and_encode(
    source: &SourceImage,
    selection: &SelectionRect,
    options: &CropOptions,
    surface: &dyn RasterSurface,
) -> Result<CropOutput, CropError> {
    let scale = compute_scale(source, options.scale_mode)?;
    let native = map_to_native(selection, scale);
    let raster = rasterize(source, &native, surface)?;
    let encoded = encode(&raster, options.format, options.quality)?;
    Ok(CropOutput {
        selection: *selection,
        scale,
        native,
        encoded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Size;
    use image::{GenericImageView, ImageBuffer};

    /// 1200x900 image whose red channel encodes x / 5 and green y / 4.
    fn gradient_source() -> SourceImage {
        let img = ImageBuffer::from_fn(1200, 900, |x, y| {
            Rgba([(x / 5) as u8, (y / 4) as u8, 128, 255])
        });
        SourceImage::from_raster(DynamicImage::ImageRgba8(img))
            .with_displayed_size(Size::new(400.0, 300.0))
    }

    struct NoSurface;

    impl RasterSurface for NoSurface {
        fn acquire(&self, width: u32, height: u32) -> Result<RgbaImage, CropError> {
            Err(CropError::RenderContextUnavailable {
                width,
                height,
                reason: "no context".to_string(),
            })
        }
    }

    #[test]
    fn scale_is_native_over_displayed_width() {
        let src = gradient_source();
        assert_eq!(
            compute_scale(&src, ScaleMode::Uniform).unwrap(),
            Scale::uniform(3.0)
        );
    }

    #[test]
    fn zero_displayed_width_is_degenerate() {
        let src = gradient_source().with_displayed_size(Size::new(0.0, 300.0));
        assert!(matches!(
            compute_scale(&src, ScaleMode::Uniform),
            Err(CropError::DegenerateImage { .. })
        ));
        let src = gradient_source().with_displayed_size(Size::new(f64::NAN, 300.0));
        assert!(compute_scale(&src, ScaleMode::PerAxis).is_err());
    }

    #[test]
    fn full_rect_maps_to_native_size() {
        let src = gradient_source();
        let scale = compute_scale(&src, ScaleMode::Uniform).unwrap();
        let native = map_to_native(&src.full_rect(), scale);
        assert_eq!(native.rounded(), (0, 0, 1200, 900));
    }

    #[test]
    fn quarter_display_selection_maps_to_native_crop() {
        let src = gradient_source();
        let rect = SelectionRect::new(50.0, 50.0, 100.0, 70.0);
        let scale = compute_scale(&src, ScaleMode::Uniform).unwrap();
        let native = map_to_native(&rect, scale);
        assert_eq!(
            native,
            NativeRect {
                x: 150.0,
                y: 150.0,
                width: 300.0,
                height: 210.0
            }
        );
        let raster = rasterize(&src, &native, &CpuSurface::default()).unwrap();
        assert_eq!(raster.dimensions(), (300, 210));
        // Top-left output pixel comes from native (150, 150).
        assert_eq!(raster.get_pixel(0, 0).0, [30, 37, 128, 255]);
    }

    #[test]
    fn encoded_crop_decodes_to_expected_size() {
        let src = gradient_source();
        let rect = SelectionRect::new(50.0, 50.0, 100.0, 70.0);
        let out = crop_and_encode(&src, &rect, &CropOptions::default(), &CpuSurface::default())
            .unwrap();
        assert_eq!(out.encoded.format, EncodeFormat::Jpeg);
        assert_eq!(&out.encoded.bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(out.encoded.decode().unwrap().dimensions(), (300, 210));

        let png = CropOptions {
            format: EncodeFormat::Png,
            ..CropOptions::default()
        };
        let out = crop_and_encode(&src, &rect, &png, &CpuSurface::default()).unwrap();
        assert_eq!(out.encoded.decode().unwrap().dimensions(), (300, 210));
    }

    #[test]
    fn surface_failure_is_reported() {
        let src = gradient_source();
        let native = map_to_native(&src.full_rect(), Scale::uniform(3.0));
        assert!(matches!(
            rasterize(&src, &native, &NoSurface),
            Err(CropError::RenderContextUnavailable { .. })
        ));
    }

    #[test]
    fn oversized_surface_is_refused() {
        let surface = CpuSurface {
            max_side: 100,
            max_pixels: 5_000,
        };
        assert!(surface.acquire(100, 50).is_ok());
        assert!(surface.acquire(101, 10).is_err());
        assert!(surface.acquire(80, 80).is_err());
    }

    #[test]
    fn empty_region_blocks_submission() {
        let src = gradient_source();
        let native = map_to_native(&SelectionRect::new(10.0, 10.0, 0.1, 50.0), Scale::uniform(3.0));
        assert!(matches!(
            rasterize(&src, &native, &CpuSurface::default()),
            Err(CropError::EmptyRegion)
        ));
    }

    #[test]
    fn far_away_region_is_blank_not_a_panic() {
        let src = gradient_source();
        for (x, y) in [(1e300, 0.0), (0.0, 1e300), (-1e300, -1e300)] {
            let native = NativeRect {
                x,
                y,
                width: 20.0,
                height: 20.0,
            };
            let raster = rasterize(&src, &native, &CpuSurface::default()).unwrap();
            assert_eq!(raster.dimensions(), (20, 20));
            assert!(raster.pixels().all(|px| px.0[3] == 0));
        }
    }

    #[test]
    fn uniform_scale_miscrops_stretched_display() {
        // Displayed 400x600 for a 1200x900 image: the layout stretches y.
        let src = gradient_source().with_displayed_size(Size::new(400.0, 600.0));
        let full = src.full_rect();

        let uniform = compute_scale(&src, ScaleMode::Uniform).unwrap();
        assert_eq!(map_to_native(&full, uniform).rounded(), (0, 0, 1200, 1800));

        let per_axis = compute_scale(&src, ScaleMode::PerAxis).unwrap();
        assert!(!per_axis.is_uniform());
        assert_eq!(map_to_native(&full, per_axis).rounded(), (0, 0, 1200, 900));
    }

    #[test]
    fn overhang_past_source_is_flattened_white() {
        let src = gradient_source();
        let native = NativeRect {
            x: 1190.0,
            y: 0.0,
            width: 20.0,
            height: 4.0,
        };
        let raster = rasterize(&src, &native, &CpuSurface::default()).unwrap();
        assert_eq!(raster.get_pixel(15, 0).0, [0, 0, 0, 0]);
        let flat = flatten_on_white(&raster);
        assert_eq!(flat.get_pixel(15, 0).0, [255, 255, 255]);
        assert_eq!(flat.get_pixel(0, 0).0, [238, 0, 128]);
    }

    #[test]
    fn quality_maps_to_jpeg_scale() {
        assert_eq!(jpeg_quality(0.8), 80);
        assert_eq!(jpeg_quality(0.0), 1);
        assert_eq!(jpeg_quality(7.0), 100);
        assert_eq!(jpeg_quality(f32::NAN), 80);
    }

    #[test]
    fn data_url_carries_mime() {
        let encoded = EncodedImage {
            bytes: vec![1, 2, 3],
            format: EncodeFormat::Png,
            width: 1,
            height: 1,
        };
        assert_eq!(encoded.data_url(), "data:image/png;base64,AQID");
    }
}
