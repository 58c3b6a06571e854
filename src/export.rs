use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};

use crate::raster;
use crate::schema::ExportFormat;

/// Resizes to exactly `width x height` (no-op when already that size) and
/// encodes. JPEG drops alpha; `quality` only applies to JPEG.
pub fn export_to_size(
    image: &RgbaImage,
    width: u32,
    height: u32,
    format: ExportFormat,
    quality: u8,
) -> Result<Vec<u8>> {
    if width == 0 || height == 0 {
        bail!("cannot export to {width}x{height}");
    }
    let resized = raster::resize_exact(image, width, height);
    encode(&resized, format, quality)
}

pub fn encode(image: &RgbaImage, format: ExportFormat, quality: u8) -> Result<Vec<u8>> {
    let (width, height) = image.dimensions();
    let mut bytes = Vec::new();
    match format {
        ExportFormat::Png => {
            PngEncoder::new(&mut bytes)
                .write_image(image.as_raw(), width, height, ExtendedColorType::Rgba8)
                .context("failed to encode PNG")?;
        }
        ExportFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(image.clone()).into_rgb8();
            JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
                .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
                .context("failed to encode JPEG")?;
        }
    }
    Ok(bytes)
}
