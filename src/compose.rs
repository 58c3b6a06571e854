use std::path::Path;

use anyhow::Result;
use image::RgbaImage;

use crate::catalog::DeviceCatalog;
use crate::device_frame::create_device_frame;
use crate::raster;
use crate::schema::{BackgroundSpec, DevicePlacement, ScreenshotSpec, TextStyle};
use crate::text::{draw_text, FontCache};

/// Share of the canvas width text may occupy before wrapping.
const TEXT_WIDTH_RATIO: f32 = 0.85;

/// Text already resolved to one locale.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub content: String,
    pub style: TextStyle,
    pub position_y: f32,
}

/// Everything one screenshot render needs, built by the caller and consumed
/// by [`compose_screenshot`].
#[derive(Debug, Clone)]
pub struct ScreenshotComposite {
    pub background: BackgroundSpec,
    pub screen: Option<RgbaImage>,
    pub device: DevicePlacement,
    pub texts: Vec<TextBlock>,
}

impl ScreenshotComposite {
    /// Resolves texts for `locale` and loads the screen capture. A missing or
    /// unreadable capture leaves `screen` empty so the render is text-only.
    pub fn from_spec(spec: &ScreenshotSpec, locale: &str, assets_dir: &Path) -> Self {
        let screen = spec.image.as_ref().and_then(|image| {
            let path = if image.url.is_absolute() {
                image.url.clone()
            } else {
                assets_dir.join(&image.url)
            };
            match image::open(&path) {
                Ok(decoded) => Some(decoded.to_rgba8()),
                Err(error) => {
                    log::warn!(
                        "screenshot '{}': screen image {} unavailable ({}), rendering text only",
                        spec.id,
                        path.display(),
                        error
                    );
                    None
                }
            }
        });

        let texts = spec
            .texts
            .iter()
            .filter_map(|text| {
                text.resolve(locale).map(|content| TextBlock {
                    content: content.to_owned(),
                    style: text.style.clone(),
                    position_y: text.position_y,
                })
            })
            .collect();

        Self {
            background: spec.template.background.clone(),
            screen,
            device: spec.device.clone(),
            texts,
        }
    }
}

/// Places the framed screen and the text blocks onto `background`.
pub fn compose_screenshot(
    mut canvas: RgbaImage,
    composite: &ScreenshotComposite,
    catalog: &DeviceCatalog,
    fonts: &FontCache,
) -> Result<RgbaImage> {
    let (width, height) = canvas.dimensions();

    if let Some(screen) = &composite.screen {
        let placement = &composite.device;
        let geometry = catalog.resolve(&placement.model);
        let frame = create_device_frame(
            screen,
            geometry,
            &placement.color,
            placement.style,
            &placement.shadow_spec(),
        )?;

        let frame_width = (placement.scale * width as f32).floor().max(0.0) as u32;
        let frame_height = (frame.height() as f32 * frame_width as f32 / frame.width() as f32)
            .floor() as u32;
        if frame_width > 0 && frame_height > 0 {
            let scaled = raster::resize_exact(&frame, frame_width, frame_height);
            let (x, y) = frame_origin(
                (width, height),
                (frame_width, frame_height),
                placement.position_x,
                placement.position_y,
            );
            log::debug!(
                "placing {} frame {}x{} at ({}, {})",
                geometry.id,
                frame_width,
                frame_height,
                x,
                y
            );
            raster::overlay_at(&mut canvas, &scaled, x, y);
        }
    }

    let max_width = (width as f32 * TEXT_WIDTH_RATIO).floor() as u32;
    let anchor_x = i64::from(width / 2);
    for block in &composite.texts {
        if block.content.trim().is_empty() {
            continue;
        }
        let style = &block.style;
        let font = fonts.resolve(&style.font_family, style.font_size, style.font_weight);
        let anchor_y = (height as f32 * block.position_y).floor() as i64;
        draw_text(
            &mut canvas,
            &block.content,
            (anchor_x, anchor_y),
            style,
            &font,
            Some(max_width),
        )?;
    }
    Ok(canvas)
}

/// Top-left of a frame centred on `(w * px, h * py)`. The half extent is
/// integer-halved and the result truncated toward zero.
fn frame_origin(canvas: (u32, u32), frame: (u32, u32), px: f32, py: f32) -> (i64, i64) {
    let x = canvas.0 as f32 * px - (frame.0 / 2) as f32;
    let y = canvas.1 as f32 * py - (frame.1 / 2) as f32;
    (x as i64, y as i64)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::catalog::DeviceGeometry;
    use crate::color::Color;
    use crate::schema::{DeviceStyle, ImageRef, LocalizedText, TextAlignment, TextKind};

    #[test]
    fn frame_origin_halves_odd_frames_down() {
        assert_eq!(frame_origin((100, 200), (41, 81), 0.5, 0.5), (30, 60));
        assert_eq!(frame_origin((100, 200), (40, 80), 0.5, 0.5), (30, 60));
        assert_eq!(frame_origin((101, 200), (41, 81), 0.5, 0.75), (30, 110));
        // Off the left edge truncates toward zero.
        assert_eq!(frame_origin((10, 100), (51, 51), 0.25, 0.5), (-22, 25));
    }

    fn tiny_catalog() -> DeviceCatalog {
        let device = DeviceGeometry {
            id: "tiny".to_owned(),
            name: "Tiny".to_owned(),
            display_size: String::new(),
            category: "iphone".to_owned(),
            width: 20,
            height: 40,
            frame_width: 20,
            frame_height: 40,
            screen_offset_x: 0,
            screen_offset_y: 0,
            screen_width: 20,
            screen_height: 40,
            corner_radius: 0,
            required: false,
        };
        DeviceCatalog::new(vec![device], "tiny").unwrap()
    }

    fn flat_device(scale: f32) -> DevicePlacement {
        DevicePlacement {
            model: "unknown-model".to_owned(),
            style: DeviceStyle::Flat,
            shadow: false,
            scale,
            position_x: 0.5,
            position_y: 0.5,
            ..DevicePlacement::default()
        }
    }

    #[test]
    fn frame_is_scaled_and_centered_on_anchor() {
        let composite = ScreenshotComposite {
            background: BackgroundSpec::default(),
            screen: Some(raster::solid(20, 40, Color::rgb(0, 0, 255))),
            device: flat_device(0.5),
            texts: Vec::new(),
        };
        let canvas = raster::solid(100, 100, Color::WHITE);
        let out =
            compose_screenshot(canvas, &composite, &tiny_catalog(), &FontCache::builtin_only())
                .unwrap();
        // 50x100 frame centered at (50, 50): x 25..75, y 0..100
        assert_eq!(out.get_pixel(50, 50).0, [0, 0, 255, 255]);
        assert_eq!(out.get_pixel(30, 5).0, [0, 0, 255, 255]);
        assert_eq!(out.get_pixel(10, 50).0, [255, 255, 255, 255]);
        assert_eq!(out.get_pixel(90, 50).0, [255, 255, 255, 255]);
    }

    #[test]
    fn text_only_render_without_screen() {
        let style = TextStyle {
            font_size: 8,
            color: Color::BLACK,
            alignment: TextAlignment::Center,
            ..TextStyle::default()
        };
        let composite = ScreenshotComposite {
            background: BackgroundSpec::default(),
            screen: None,
            device: flat_device(0.85),
            texts: vec![
                TextBlock {
                    content: "HI".to_owned(),
                    style: style.clone(),
                    position_y: 0.1,
                },
                TextBlock {
                    content: "   ".to_owned(),
                    style,
                    position_y: 0.5,
                },
            ],
        };
        let canvas = raster::solid(100, 100, Color::WHITE);
        let out =
            compose_screenshot(canvas, &composite, &tiny_catalog(), &FontCache::builtin_only())
                .unwrap();
        // "HI" is 16px wide, centered on x = 50, top at y = 10
        assert_eq!(out.get_pixel(42, 10).0, [0, 0, 0, 255]);
        assert!(out
            .enumerate_pixels()
            .filter(|(_, y, _)| *y < 10 || *y >= 18)
            .all(|(_, _, pixel)| pixel.0 == [255, 255, 255, 255]));
    }

    #[test]
    fn from_spec_resolves_locale_and_tolerates_missing_screen() {
        let dir = tempfile::tempdir().unwrap();
        let mut translations = BTreeMap::new();
        translations.insert("en".to_owned(), "Hello".to_owned());
        translations.insert("de".to_owned(), "Hallo".to_owned());
        let mut only_french = BTreeMap::new();
        only_french.insert("fr".to_owned(), "Bonjour".to_owned());

        let spec = ScreenshotSpec {
            id: "s1".to_owned(),
            image: Some(ImageRef {
                url: "missing.png".into(),
            }),
            texts: vec![
                LocalizedText {
                    id: "t1".to_owned(),
                    kind: TextKind::Headline,
                    translations,
                    style: TextStyle::default(),
                    position_y: 0.1,
                },
                LocalizedText {
                    id: "t2".to_owned(),
                    kind: TextKind::Subtitle,
                    translations: only_french,
                    style: TextStyle::default(),
                    position_y: 0.2,
                },
            ],
            ..ScreenshotSpec::default()
        };
        let composite = ScreenshotComposite::from_spec(&spec, "de", dir.path());
        assert!(composite.screen.is_none());
        assert_eq!(composite.texts.len(), 1);
        assert_eq!(composite.texts[0].content, "Hallo");

        raster::solid(4, 4, Color::BLACK)
            .save(dir.path().join("missing.png"))
            .unwrap();
        let composite = ScreenshotComposite::from_spec(&spec, "ja", dir.path());
        assert!(composite.screen.is_some());
        assert_eq!(composite.texts[0].content, "Hello");
    }
}
