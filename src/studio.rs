use std::path::Path;

use anyhow::{bail, Context, Result};
use image::RgbaImage;

use crate::background::render_background;
use crate::catalog::DeviceCatalog;
use crate::compose::{compose_screenshot, ScreenshotComposite};
use crate::config::StudioConfig;
use crate::export::encode;
use crate::schema::{validate_canvas, ExportFormat, RenderRequest, ScreenshotSpec};
use crate::text::FontCache;

/// Long-lived render service: configuration, the device catalog and the
/// font cache. Shared across export workers behind an `Arc`.
#[derive(Debug)]
pub struct Studio {
    config: StudioConfig,
    catalog: DeviceCatalog,
    fonts: FontCache,
}

impl Studio {
    pub fn new(config: StudioConfig) -> Result<Self> {
        config.validate()?;
        let catalog = config
            .device_catalog()
            .context("failed to load device catalog")?;
        Ok(Self::with_catalog(config, catalog))
    }

    pub fn with_catalog(config: StudioConfig, catalog: DeviceCatalog) -> Self {
        let fonts = FontCache::new(config.fonts_dir.clone(), config.system_fonts.clone());
        Self {
            config,
            catalog,
            fonts,
        }
    }

    pub fn with_fonts(mut self, fonts: FontCache) -> Self {
        self.fonts = fonts;
        self
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    pub fn fonts(&self) -> &FontCache {
        &self.fonts
    }

    pub fn assets_dir(&self) -> &Path {
        &self.config.assets_dir
    }

    /// Renders one screenshot at `width x height`. `background` replaces the
    /// template background (panoramic slices) and must match the canvas size.
    pub fn render_screenshot_image(
        &self,
        screenshot: &ScreenshotSpec,
        locale: &str,
        width: u32,
        height: u32,
        background: Option<RgbaImage>,
    ) -> Result<RgbaImage> {
        validate_canvas(width, height)?;
        let canvas = match background {
            Some(image) => {
                if image.dimensions() != (width, height) {
                    bail!(
                        "background is {}x{}, canvas is {}x{}",
                        image.width(),
                        image.height(),
                        width,
                        height
                    );
                }
                image
            }
            None => render_background(
                width,
                height,
                &screenshot.template.background,
                self.assets_dir(),
            )?,
        };
        let composite = ScreenshotComposite::from_spec(screenshot, locale, self.assets_dir());
        compose_screenshot(canvas, &composite, &self.catalog, &self.fonts)
            .with_context(|| format!("failed to compose screenshot '{}'", screenshot.id))
    }

    /// Single synchronous render to PNG bytes.
    pub fn render_preview(&self, request: &RenderRequest) -> Result<Vec<u8>> {
        request.validate()?;
        log::debug!(
            "preview '{}' locale={} {}x{}",
            request.screenshot.id,
            request.locale,
            request.width,
            request.height
        );
        let image = self.render_screenshot_image(
            &request.screenshot,
            &request.locale,
            request.width,
            request.height,
            None,
        )?;
        encode(&image, ExportFormat::Png, 100)
    }
}
