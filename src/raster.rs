//! Straight-alpha raster helpers shared by the background, frame and text
//! passes. Canvases are `image::RgbaImage`; vector shapes go through a
//! tiny-skia pixmap and are demultiplied on the way out.

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use tiny_skia::{BlendMode, FillRule, Paint, Path, PathBuilder, Pixmap, Rect, Transform};

use crate::color::Color;

/// Cubic approximation of a quarter circle.
const KAPPA: f32 = 0.552_284_8;

/// Straight-alpha "over" of `src` onto `dst`.
pub fn blend_pixel(dst: &mut Rgba<u8>, src: [u8; 4]) {
    let sa = u32::from(src[3]);
    if sa == 0 {
        return;
    }
    if sa == 255 {
        *dst = Rgba(src);
        return;
    }

    let da = u32::from(dst.0[3]);
    let inv = 255 - sa;
    let out_a = sa * 255 + da * inv;
    if out_a == 0 {
        *dst = Rgba([0, 0, 0, 0]);
        return;
    }
    for channel in 0..3 {
        let s = u32::from(src[channel]);
        let d = u32::from(dst.0[channel]);
        dst.0[channel] = ((s * sa * 255 + d * da * inv + out_a / 2) / out_a) as u8;
    }
    dst.0[3] = ((out_a + 127) / 255) as u8;
}

/// Blends an 8-bit coverage mask (e.g. a rasterized glyph) in `color`.
pub fn blend_coverage(
    canvas: &mut RgbaImage,
    x: i32,
    y: i32,
    mask_width: usize,
    mask_height: usize,
    mask: &[u8],
    color: Color,
) {
    let (width, height) = (canvas.width() as i32, canvas.height() as i32);
    for row in 0..mask_height {
        let py = y + row as i32;
        if py < 0 || py >= height {
            continue;
        }
        for col in 0..mask_width {
            let px = x + col as i32;
            if px < 0 || px >= width {
                continue;
            }
            let coverage = mask[row * mask_width + col];
            if coverage == 0 {
                continue;
            }
            let alpha = ((u16::from(coverage) * u16::from(color.a)) / 255) as u8;
            blend_pixel(
                canvas.get_pixel_mut(px as u32, py as u32),
                [color.r, color.g, color.b, alpha],
            );
        }
    }
}

/// Composites `src` over `dst` with its top-left at `(x, y)`. Offsets may be
/// negative; whatever falls outside `dst` is clipped.
pub fn overlay_at(dst: &mut RgbaImage, src: &RgbaImage, x: i64, y: i64) {
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + i64::from(src.width())).min(i64::from(dst.width()));
    let y1 = (y + i64::from(src.height())).min(i64::from(dst.height()));
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    for dy in y0..y1 {
        for dx in x0..x1 {
            let pixel = src.get_pixel((dx - x) as u32, (dy - y) as u32).0;
            blend_pixel(dst.get_pixel_mut(dx as u32, dy as u32), pixel);
        }
    }
}

pub fn solid(width: u32, height: u32, color: Color) -> RgbaImage {
    RgbaImage::from_pixel(width, height, color.into())
}

pub fn resize_exact(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Lanczos3)
}

pub fn crop(image: &RgbaImage, x: u32, y: u32, width: u32, height: u32) -> RgbaImage {
    imageops::crop_imm(image, x, y, width, height).to_image()
}

/// Multiplies every alpha value by the matching alpha of `mask`.
pub fn apply_alpha_mask(image: &mut RgbaImage, mask: &RgbaImage) {
    for (pixel, mask_pixel) in image.pixels_mut().zip(mask.pixels()) {
        let alpha = u16::from(pixel.0[3]) * u16::from(mask_pixel.0[3]);
        pixel.0[3] = ((alpha + 127) / 255) as u8;
    }
}

/// Gaussian blur approximated by three box passes. `sigma` is in pixels;
/// anything below half a pixel leaves the image unchanged.
///
/// Works on premultiplied values so transparent pixels do not bleed black
/// into colored edges. Borders extend the edge pixel.
pub fn gaussian_blur(image: &RgbaImage, sigma: f32) -> RgbaImage {
    if !sigma.is_finite() || sigma < 0.5 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let (width, height) = (image.width() as usize, image.height() as usize);

    let mut buffer: Vec<[f32; 4]> = image
        .pixels()
        .map(|pixel| {
            let a = f32::from(pixel.0[3]) / 255.0;
            [
                f32::from(pixel.0[0]) * a,
                f32::from(pixel.0[1]) * a,
                f32::from(pixel.0[2]) * a,
                f32::from(pixel.0[3]),
            ]
        })
        .collect();

    let mut line_in = Vec::with_capacity(width.max(height));
    let mut line_out = Vec::with_capacity(width.max(height));
    for radius in box_radii(sigma) {
        for y in 0..height {
            line_in.clear();
            line_in.extend_from_slice(&buffer[y * width..(y + 1) * width]);
            box_blur_line(&line_in, &mut line_out, radius);
            buffer[y * width..(y + 1) * width].copy_from_slice(&line_out);
        }
        for x in 0..width {
            line_in.clear();
            line_in.extend((0..height).map(|y| buffer[y * width + x]));
            box_blur_line(&line_in, &mut line_out, radius);
            for (y, value) in line_out.iter().enumerate() {
                buffer[y * width + x] = *value;
            }
        }
    }

    let mut out = RgbaImage::new(image.width(), image.height());
    for (pixel, value) in out.pixels_mut().zip(buffer.iter()) {
        let alpha = value[3].clamp(0.0, 255.0);
        if alpha < 0.5 {
            *pixel = Rgba([0, 0, 0, 0]);
            continue;
        }
        let unpremultiply = 255.0 / alpha;
        *pixel = Rgba([
            (value[0] * unpremultiply).round().clamp(0.0, 255.0) as u8,
            (value[1] * unpremultiply).round().clamp(0.0, 255.0) as u8,
            (value[2] * unpremultiply).round().clamp(0.0, 255.0) as u8,
            alpha.round() as u8,
        ]);
    }
    out
}

/// Box radii whose three-pass convolution has standard deviation `sigma`.
fn box_radii(sigma: f32) -> [usize; 3] {
    const PASSES: f32 = 3.0;
    let ideal = (12.0 * sigma * sigma / PASSES + 1.0).sqrt();
    let mut lower = ideal.floor() as i64;
    if lower % 2 == 0 {
        lower -= 1;
    }
    let lower = lower.max(1);
    let upper = lower + 2;
    let lower_f = lower as f32;
    let lower_passes = ((12.0 * sigma * sigma
        - PASSES * lower_f * lower_f
        - 4.0 * PASSES * lower_f
        - 3.0 * PASSES)
        / (-4.0 * lower_f - 4.0))
        .round() as i64;

    let mut radii = [0usize; 3];
    for (index, radius) in radii.iter_mut().enumerate() {
        let size = if (index as i64) < lower_passes { lower } else { upper };
        *radius = ((size - 1) / 2) as usize;
    }
    radii
}

fn box_blur_line(input: &[[f32; 4]], output: &mut Vec<[f32; 4]>, radius: usize) {
    output.clear();
    let len = input.len();
    if len == 0 {
        return;
    }
    let last = len - 1;
    let window = (2 * radius + 1) as f32;

    let mut acc = [0.0f32; 4];
    for channel in 0..4 {
        acc[channel] = input[0][channel] * (radius + 1) as f32;
    }
    for offset in 1..=radius {
        let value = input[offset.min(last)];
        for channel in 0..4 {
            acc[channel] += value[channel];
        }
    }

    for index in 0..len {
        output.push([
            acc[0] / window,
            acc[1] / window,
            acc[2] / window,
            acc[3] / window,
        ]);
        let incoming = input[(index + radius + 1).min(last)];
        let outgoing = input[index.saturating_sub(radius)];
        for channel in 0..4 {
            acc[channel] += incoming[channel] - outgoing[channel];
        }
    }
}

/// Filled disc for [`circles_layer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub cx: f32,
    pub cy: f32,
    pub radius: f32,
    pub color: Color,
}

/// Transparent layer with each circle written over whatever is below it
/// (later circles replace earlier ones where they overlap).
pub fn circles_layer(width: u32, height: u32, circles: &[Circle]) -> Result<RgbaImage> {
    let mut pixmap = Pixmap::new(width, height)
        .with_context(|| format!("failed to allocate {width}x{height} shape layer"))?;
    for circle in circles {
        if circle.radius <= 0.0 {
            continue;
        }
        let Some(path) = PathBuilder::from_circle(circle.cx, circle.cy, circle.radius) else {
            continue;
        };
        fill_replace(&mut pixmap, &path, circle.color, false);
    }
    Ok(pixmap_to_rgba(&pixmap))
}

/// `width x height` layer holding one anti-aliased rounded rectangle covering
/// the whole area.
pub fn rounded_rect_layer(width: u32, height: u32, radius: f32, color: Color) -> Result<RgbaImage> {
    if radius <= 0.0 {
        return Ok(solid(width, height, color));
    }
    let mut pixmap = Pixmap::new(width, height)
        .with_context(|| format!("failed to allocate {width}x{height} shape layer"))?;
    let path = rounded_rect_path(0.0, 0.0, width as f32, height as f32, radius)
        .context("failed to build rounded rectangle path")?;
    fill_replace(&mut pixmap, &path, color, true);
    Ok(pixmap_to_rgba(&pixmap))
}

fn fill_replace(pixmap: &mut Pixmap, path: &Path, color: Color, anti_alias: bool) {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color.r, color.g, color.b, color.a);
    paint.anti_alias = anti_alias;
    paint.blend_mode = BlendMode::Source;
    pixmap.fill_path(path, &paint, FillRule::Winding, Transform::identity(), None);
}

pub fn rounded_rect_path(x: f32, y: f32, width: f32, height: f32, radius: f32) -> Option<Path> {
    let radius = radius.max(0.0).min(width / 2.0).min(height / 2.0);
    if radius <= 0.0 {
        return Some(PathBuilder::from_rect(Rect::from_xywh(x, y, width, height)?));
    }

    let (right, bottom) = (x + width, y + height);
    let handle = radius * KAPPA;
    let mut builder = PathBuilder::new();
    builder.move_to(x + radius, y);
    builder.line_to(right - radius, y);
    builder.cubic_to(right - radius + handle, y, right, y + radius - handle, right, y + radius);
    builder.line_to(right, bottom - radius);
    builder.cubic_to(
        right,
        bottom - radius + handle,
        right - radius + handle,
        bottom,
        right - radius,
        bottom,
    );
    builder.line_to(x + radius, bottom);
    builder.cubic_to(x + radius - handle, bottom, x, bottom - radius + handle, x, bottom - radius);
    builder.line_to(x, y + radius);
    builder.cubic_to(x, y + radius - handle, x + radius - handle, y, x + radius, y);
    builder.close();
    builder.finish()
}

pub fn pixmap_to_rgba(pixmap: &Pixmap) -> RgbaImage {
    let mut out = RgbaImage::new(pixmap.width(), pixmap.height());
    for (dst, src) in out.pixels_mut().zip(pixmap.pixels()) {
        let color = src.demultiply();
        *dst = Rgba([color.red(), color.green(), color.blue(), color.alpha()]);
    }
    out
}
