use std::f32::consts::PI;
use std::path::Path;

use anyhow::{bail, Result};
use image::{Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::color::{interpolate, Color, GradientStop};
use crate::raster::{self, Circle};
use crate::schema::{BackgroundKind, BackgroundSpec, Blob, ColorPoint, GradientSpec, NoiseSpec};

pub const DEFAULT_LINEAR_ANGLE: f32 = 180.0;
pub const DEFAULT_GLASS_ANGLE: f32 = 135.0;
pub const DEFAULT_PANORAMIC_ANGLE: f32 = 90.0;
pub const GLASS_FALLBACK: Color = Color::rgb(102, 126, 234);

const MESH_MIN_RADIUS: f32 = 1e-6;
const MESH_MIN_WEIGHT: f32 = 1e-4;

/// Renders `spec` onto a fresh `width x height` canvas. Relative image paths
/// resolve against `assets_dir`.
pub fn render_background(
    width: u32,
    height: u32,
    spec: &BackgroundSpec,
    assets_dir: &Path,
) -> Result<RgbaImage> {
    log::debug!(
        "rendering {} background at {}x{}",
        spec.type_name(),
        width,
        height
    );
    let mut image = render_kind(width, height, &spec.kind, assets_dir, None)?;
    if let Some(noise) = &spec.noise {
        apply_noise(&mut image, noise);
    }
    Ok(image)
}

fn render_kind(
    width: u32,
    height: u32,
    kind: &BackgroundKind,
    assets_dir: &Path,
    forced_linear_angle: Option<f32>,
) -> Result<RgbaImage> {
    let image = match kind {
        BackgroundKind::Solid { color } => raster::solid(width, height, *color),
        BackgroundKind::Gradient { gradient } => {
            render_gradient(width, height, gradient, DEFAULT_LINEAR_ANGLE, forced_linear_angle)
        }
        BackgroundKind::Mesh { color_points } => mesh_gradient(width, height, color_points),
        BackgroundKind::Glassmorphism {
            base_gradient,
            blobs,
            blob_blur,
        } => {
            let mut base = match base_gradient {
                Some(gradient) => glass_base(width, height, gradient),
                None => raster::solid(width, height, GLASS_FALLBACK),
            };
            let layer = blob_layer(width, height, blobs, *blob_blur)?;
            raster::overlay_at(&mut base, &layer, 0, 0);
            base
        }
        BackgroundKind::Blobs {
            base_color,
            base_gradient,
            blobs,
            blur,
        } => {
            let mut base = match base_gradient {
                Some(gradient) => {
                    render_gradient(width, height, gradient, DEFAULT_LINEAR_ANGLE, None)
                }
                None => raster::solid(width, height, *base_color),
            };
            let layer = blob_layer(width, height, blobs, *blur)?;
            raster::overlay_at(&mut base, &layer, 0, 0);
            base
        }
        BackgroundKind::Image { image_url } => match image_url {
            Some(path) => load_image_fill(width, height, path, assets_dir),
            None => {
                log::warn!("image background has no image_url, using white");
                raster::solid(width, height, Color::WHITE)
            }
        },
        BackgroundKind::Unknown => {
            log::warn!("unknown background type, using white");
            raster::solid(width, height, Color::WHITE)
        }
    };
    Ok(image)
}

fn glass_base(width: u32, height: u32, gradient: &GradientSpec) -> RgbaImage {
    let default_stops = [
        GradientStop::new(Color::rgb(0x66, 0x7E, 0xEA), 0.0),
        GradientStop::new(Color::rgb(0x76, 0x4B, 0xA2), 1.0),
    ];
    let stops = match gradient.stops() {
        [] => &default_stops[..],
        stops => stops,
    };
    match gradient {
        GradientSpec::Linear { angle, .. } => {
            linear_gradient(width, height, stops, angle.unwrap_or(DEFAULT_GLASS_ANGLE))
        }
        GradientSpec::Radial {
            center_x, center_y, ..
        } => radial_gradient(width, height, stops, *center_x, *center_y),
        GradientSpec::Conic {
            center_x,
            center_y,
            start_angle,
            ..
        } => conic_gradient(width, height, stops, *center_x, *center_y, *start_angle),
    }
}

pub fn render_gradient(
    width: u32,
    height: u32,
    gradient: &GradientSpec,
    default_angle: f32,
    forced_linear_angle: Option<f32>,
) -> RgbaImage {
    match gradient {
        GradientSpec::Linear { stops, angle, .. } => {
            let angle = forced_linear_angle.unwrap_or(angle.unwrap_or(default_angle));
            linear_gradient(width, height, stops, angle)
        }
        GradientSpec::Radial {
            stops,
            center_x,
            center_y,
        } => radial_gradient(width, height, stops, *center_x, *center_y),
        GradientSpec::Conic {
            stops,
            center_x,
            center_y,
            start_angle,
        } => conic_gradient(width, height, stops, *center_x, *center_y, *start_angle),
    }
}

fn degenerate_fill(width: u32, height: u32, stops: &[GradientStop]) -> Option<RgbaImage> {
    match stops {
        [] => Some(raster::solid(width, height, Color::WHITE)),
        [only] => Some(raster::solid(width, height, only.color)),
        _ => None,
    }
}

/// `t = nx * sin(angle) + ny * cos(angle) + 0.5` with coordinates normalized
/// to `[-0.5, 0.5)` around the canvas center.
pub fn linear_gradient(width: u32, height: u32, stops: &[GradientStop], angle: f32) -> RgbaImage {
    if let Some(fill) = degenerate_fill(width, height, stops) {
        return fill;
    }
    let (sin, cos) = angle.to_radians().sin_cos();
    let column_terms: Vec<f32> = (0..width)
        .map(|x| (x as f32 / width as f32 - 0.5) * sin)
        .collect();
    let row_terms: Vec<f32> = (0..height)
        .map(|y| (y as f32 / height as f32 - 0.5) * cos + 0.5)
        .collect();

    let mut image = RgbaImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let t = column_terms[x as usize] + row_terms[y as usize];
        *pixel = interpolate(stops, t.clamp(0.0, 1.0)).into();
    }
    image
}

pub fn radial_gradient(
    width: u32,
    height: u32,
    stops: &[GradientStop],
    center_x: f32,
    center_y: f32,
) -> RgbaImage {
    if let Some(fill) = degenerate_fill(width, height, stops) {
        return fill;
    }
    let (w, h) = (width as f32, height as f32);
    let cx = (w * center_x).floor();
    let cy = (h * center_y).floor();
    let mut max_dist = cx.max(w - cx).hypot(cy.max(h - cy));
    if max_dist <= 0.0 {
        max_dist = 1.0;
    }

    let dx2: Vec<f32> = (0..width).map(|x| (x as f32 - cx).powi(2)).collect();
    let dy2: Vec<f32> = (0..height).map(|y| (y as f32 - cy).powi(2)).collect();

    let mut image = RgbaImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let dist = (dx2[x as usize] + dy2[y as usize]).sqrt();
        *pixel = interpolate(stops, (dist / max_dist).clamp(0.0, 1.0)).into();
    }
    image
}

pub fn conic_gradient(
    width: u32,
    height: u32,
    stops: &[GradientStop],
    center_x: f32,
    center_y: f32,
    start_angle: f32,
) -> RgbaImage {
    if let Some(fill) = degenerate_fill(width, height, stops) {
        return fill;
    }
    let cx = (width as f32 * center_x).floor();
    let cy = (height as f32 * center_y).floor();
    let offset = PI - start_angle.to_radians();

    let mut image = RgbaImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let angle = (y as f32 - cy).atan2(x as f32 - cx);
        let t = ((angle + offset) / (2.0 * PI)).rem_euclid(1.0);
        *pixel = interpolate(stops, t).into();
    }
    image
}

/// Gaussian-weighted average of the color points. The weight is separable,
/// so each point contributes one column table and one row table.
pub fn mesh_gradient(width: u32, height: u32, points: &[ColorPoint]) -> RgbaImage {
    let reach = width.max(height) as f32;
    let tables: Vec<(Vec<f32>, Vec<f32>, [f32; 4])> = points
        .iter()
        .map(|point| {
            let px = (point.x * width as f32).floor();
            let py = (point.y * height as f32).floor();
            let radius = (point.radius * reach).max(MESH_MIN_RADIUS);
            let denom = 2.0 * radius * radius;
            let wx = (0..width)
                .map(|x| (-(x as f32 - px).powi(2) / denom).exp())
                .collect();
            let wy = (0..height)
                .map(|y| (-(y as f32 - py).powi(2) / denom).exp())
                .collect();
            let c = point.color;
            (
                wx,
                wy,
                [
                    f32::from(c.r),
                    f32::from(c.g),
                    f32::from(c.b),
                    f32::from(c.a),
                ],
            )
        })
        .collect();

    let mut image = RgbaImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let mut sum = 0.0f32;
        let mut acc = [0.0f32; 4];
        for (wx, wy, color) in &tables {
            let weight = wx[x as usize] * wy[y as usize];
            sum += weight;
            for channel in 0..4 {
                acc[channel] += color[channel] * weight;
            }
        }
        let divisor = sum.max(MESH_MIN_WEIGHT);
        *pixel = Rgba(acc.map(|value| (value / divisor).clamp(0.0, 255.0) as u8));
    }
    image
}

/// Blurred layer of opaque-replace circles, transparent elsewhere.
pub fn blob_layer(width: u32, height: u32, blobs: &[Blob], blur: f32) -> Result<RgbaImage> {
    let (w, h) = (width as f32, height as f32);
    let short_edge = width.min(height) as f32;
    let circles: Vec<Circle> = blobs
        .iter()
        .map(|blob| Circle {
            cx: (blob.x * w).floor(),
            cy: (blob.y * h).floor(),
            radius: (blob.size * short_edge).floor(),
            color: blob.color,
        })
        .collect();
    let layer = raster::circles_layer(width, height, &circles)?;
    Ok(raster::gaussian_blur(&layer, blur))
}

/// Loads and stretches an image to exactly `width x height`. Missing or
/// undecodable files give opaque white.
pub fn load_image_fill(width: u32, height: u32, path: &Path, assets_dir: &Path) -> RgbaImage {
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        assets_dir.join(path)
    };
    match image::open(&resolved) {
        Ok(decoded) => raster::resize_exact(&decoded.to_rgba8(), width, height),
        Err(error) => {
            log::warn!(
                "background image {} unavailable ({}), using white",
                resolved.display(),
                error
            );
            raster::solid(width, height, Color::WHITE)
        }
    }
}

/// Adds Gaussian grain to RGB in place. Alpha is untouched.
pub fn apply_noise(image: &mut RgbaImage, noise: &NoiseSpec) {
    if !noise.enabled || noise.intensity <= 0.0 {
        return;
    }
    let mut rng = match noise.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let scale = noise.intensity * 255.0;
    let shift = |value: u8, delta: f32| (f32::from(value) + delta).clamp(0.0, 255.0) as u8;

    for pixel in image.pixels_mut() {
        if noise.monochrome {
            let sample: f32 = rng.sample(StandardNormal);
            let delta = sample * scale;
            for channel in 0..3 {
                pixel.0[channel] = shift(pixel.0[channel], delta);
            }
        } else {
            for channel in 0..3 {
                let sample: f32 = rng.sample(StandardNormal);
                pixel.0[channel] = shift(pixel.0[channel], sample * scale);
            }
        }
    }
}

/// One continuous background spanning several screenshots side by side.
#[derive(Debug, Clone)]
pub struct PanoramicBackground {
    image: RgbaImage,
    slice_width: u32,
    count: u32,
}

impl PanoramicBackground {
    pub fn slice(&self, index: u32) -> Option<RgbaImage> {
        if index >= self.count {
            return None;
        }
        Some(raster::crop(
            &self.image,
            index * self.slice_width,
            0,
            self.slice_width,
            self.image.height(),
        ))
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn full(&self) -> &RgbaImage {
        &self.image
    }
}

/// Renders `spec` once at `width * count` wide. Linear gradients use their
/// `panoramic_angle` (default 90) so the sweep runs across the whole strip.
pub fn render_panoramic(
    width: u32,
    height: u32,
    count: u32,
    spec: &BackgroundSpec,
    assets_dir: &Path,
) -> Result<PanoramicBackground> {
    if count == 0 {
        bail!("panoramic background needs at least one screenshot");
    }
    let Some(total_width) = width.checked_mul(count) else {
        bail!("panoramic background {width}x{count} overflows");
    };

    let forced = match &spec.kind {
        BackgroundKind::Gradient {
            gradient: GradientSpec::Linear { panoramic_angle, .. },
        } => Some(panoramic_angle.unwrap_or(DEFAULT_PANORAMIC_ANGLE)),
        _ => None,
    };
    log::debug!(
        "rendering panoramic {} background {}x{} for {} screenshots",
        spec.type_name(),
        total_width,
        height,
        count
    );
    let mut image = render_kind(total_width, height, &spec.kind, assets_dir, forced)?;
    if let Some(noise) = &spec.noise {
        apply_noise(&mut image, noise);
    }
    Ok(PanoramicBackground {
        image,
        slice_width: width,
        count,
    })
}

pub fn render_panoramic_slice(
    width: u32,
    height: u32,
    spec: &BackgroundSpec,
    index: u32,
    count: u32,
    assets_dir: &Path,
) -> Result<RgbaImage> {
    let panorama = render_panoramic(width, height, count, spec, assets_dir)?;
    match panorama.slice(index) {
        Some(slice) => Ok(slice),
        None => bail!("panoramic index {index} out of range for {count} screenshots"),
    }
}
