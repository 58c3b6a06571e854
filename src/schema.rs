use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::color::{Color, GradientStop};
use crate::error_codes::{CodedError, INVALID_CANVAS_SIZE, INVALID_EXPORT_REQUEST};

/// Largest edge accepted for a single canvas. Panoramic renders multiply the
/// width by the screenshot count, so they are checked separately.
pub const MAX_CANVAS_EDGE: u32 = 8192;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundSpec {
    #[serde(flatten)]
    pub kind: BackgroundKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise: Option<NoiseSpec>,
}

impl BackgroundSpec {
    pub fn solid(color: Color) -> Self {
        Self {
            kind: BackgroundKind::Solid { color },
            noise: None,
        }
    }

    pub fn with_noise(mut self, noise: NoiseSpec) -> Self {
        self.noise = Some(noise);
        self
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            BackgroundKind::Solid { .. } => "solid",
            BackgroundKind::Gradient { .. } => "gradient",
            BackgroundKind::Mesh { .. } => "mesh",
            BackgroundKind::Glassmorphism { .. } => "glassmorphism",
            BackgroundKind::Blobs { .. } => "blobs",
            BackgroundKind::Image { .. } => "image",
            BackgroundKind::Unknown => "unknown",
        }
    }
}

impl Default for BackgroundSpec {
    fn default() -> Self {
        Self::solid(Color::WHITE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackgroundKind {
    Solid {
        #[serde(default)]
        color: Color,
    },
    Gradient {
        #[serde(default)]
        gradient: GradientSpec,
    },
    Mesh {
        #[serde(default = "default_mesh_points")]
        color_points: Vec<ColorPoint>,
    },
    Glassmorphism {
        #[serde(default)]
        base_gradient: Option<GradientSpec>,
        #[serde(default)]
        blobs: Vec<Blob>,
        #[serde(default = "default_blob_blur")]
        blob_blur: f32,
    },
    Blobs {
        #[serde(default = "default_blobs_base_color")]
        base_color: Color,
        #[serde(default)]
        base_gradient: Option<GradientSpec>,
        #[serde(default)]
        blobs: Vec<Blob>,
        #[serde(default = "default_blob_blur")]
        blur: f32,
    },
    Image {
        #[serde(default)]
        image_url: Option<PathBuf>,
    },
    /// Any unrecognized `type`; renders as opaque white.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GradientSpec {
    Linear {
        #[serde(default)]
        stops: Vec<GradientStop>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        angle: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        panoramic_angle: Option<f32>,
    },
    Radial {
        #[serde(default)]
        stops: Vec<GradientStop>,
        #[serde(default = "default_center")]
        center_x: f32,
        #[serde(default = "default_center")]
        center_y: f32,
    },
    Conic {
        #[serde(default)]
        stops: Vec<GradientStop>,
        #[serde(default = "default_center")]
        center_x: f32,
        #[serde(default = "default_center")]
        center_y: f32,
        #[serde(default)]
        start_angle: f32,
    },
}

impl GradientSpec {
    pub fn linear(stops: Vec<GradientStop>, angle: f32) -> Self {
        Self::Linear {
            stops,
            angle: Some(angle),
            panoramic_angle: None,
        }
    }

    pub fn stops(&self) -> &[GradientStop] {
        match self {
            Self::Linear { stops, .. } | Self::Radial { stops, .. } | Self::Conic { stops, .. } => {
                stops
            }
        }
    }
}

impl Default for GradientSpec {
    fn default() -> Self {
        Self::Linear {
            stops: Vec::new(),
            angle: None,
            panoramic_angle: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorPoint {
    pub color: Color,
    #[serde(default = "default_center")]
    pub x: f32,
    #[serde(default = "default_center")]
    pub y: f32,
    #[serde(default = "default_center")]
    pub radius: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    pub color: Color,
    #[serde(default = "default_center")]
    pub x: f32,
    #[serde(default = "default_center")]
    pub y: f32,
    #[serde(default = "default_blob_size")]
    pub size: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_noise_intensity")]
    pub intensity: f32,
    #[serde(default = "default_true")]
    pub monochrome: bool,
    /// Fixed seed for reproducible grain. Fresh entropy when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for NoiseSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            intensity: default_noise_intensity(),
            monochrome: true,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStyle {
    Realistic,
    Clay,
    Flat,
    None,
}

impl DeviceStyle {
    pub fn draws_bezel(self) -> bool {
        matches!(self, Self::Realistic | Self::Clay)
    }
}

impl Default for DeviceStyle {
    fn default() -> Self {
        Self::Realistic
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicePlacement {
    #[serde(default = "default_device_model")]
    pub model: String,
    #[serde(default = "default_device_color")]
    pub color: String,
    #[serde(default)]
    pub style: DeviceStyle,
    #[serde(default = "default_device_scale")]
    pub scale: f32,
    #[serde(default = "default_center")]
    pub position_x: f32,
    #[serde(default = "default_device_position_y")]
    pub position_y: f32,
    #[serde(default = "default_true")]
    pub shadow: bool,
    #[serde(default = "default_shadow_blur")]
    pub shadow_blur: u32,
    #[serde(default = "default_shadow_opacity")]
    pub shadow_opacity: f32,
    /// Reserved; frames are always composited upright.
    #[serde(default)]
    pub rotation: f32,
}

impl DevicePlacement {
    pub fn shadow_spec(&self) -> ShadowSpec {
        ShadowSpec {
            enabled: self.shadow,
            blur: self.shadow_blur,
            opacity: self.shadow_opacity,
        }
    }
}

impl Default for DevicePlacement {
    fn default() -> Self {
        Self {
            model: default_device_model(),
            color: default_device_color(),
            style: DeviceStyle::default(),
            scale: default_device_scale(),
            position_x: default_center(),
            position_y: default_device_position_y(),
            shadow: true,
            shadow_blur: default_shadow_blur(),
            shadow_opacity: default_shadow_opacity(),
            rotation: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowSpec {
    pub enabled: bool,
    pub blur: u32,
    pub opacity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextAlignment {
    Left,
    Center,
    Right,
}

impl Default for TextAlignment {
    fn default() -> Self {
        Self::Center
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextPlate {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_plate_color")]
    pub color: Color,
    #[serde(default = "default_plate_padding")]
    pub padding: u32,
    #[serde(default = "default_plate_radius")]
    pub border_radius: u32,
    #[serde(default = "default_plate_opacity")]
    pub opacity: f32,
}

impl Default for TextPlate {
    fn default() -> Self {
        Self {
            enabled: false,
            color: default_plate_color(),
            padding: default_plate_padding(),
            border_radius: default_plate_radius(),
            opacity: default_plate_opacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextStyle {
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default = "default_font_weight")]
    pub font_weight: u32,
    #[serde(default = "default_text_color")]
    pub color: Color,
    #[serde(default)]
    pub alignment: TextAlignment,
    #[serde(default = "default_line_height")]
    pub line_height: f32,
    #[serde(default)]
    pub letter_spacing: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<TextPlate>,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_family: default_font_family(),
            font_size: default_font_size(),
            font_weight: default_font_weight(),
            color: default_text_color(),
            alignment: TextAlignment::default(),
            line_height: default_line_height(),
            letter_spacing: 0.0,
            background: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextKind {
    Headline,
    Subtitle,
    Badge,
}

impl Default for TextKind {
    fn default() -> Self {
        Self::Headline
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizedText {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: TextKind,
    #[serde(default)]
    pub translations: BTreeMap<String, String>,
    #[serde(default)]
    pub style: TextStyle,
    #[serde(default = "default_text_position_y")]
    pub position_y: f32,
}

impl LocalizedText {
    /// Requested locale if it has an entry, otherwise English. A present but
    /// empty entry does not fall back; the text is skipped.
    pub fn resolve(&self, locale: &str) -> Option<&str> {
        self.translations
            .get(locale)
            .or_else(|| self.translations.get(FALLBACK_LOCALE))
            .map(String::as_str)
            .filter(|text| !text.is_empty())
    }
}

pub const FALLBACK_LOCALE: &str = "en";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemplateRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub background: BackgroundSpec,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenshotSpec {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub template: TemplateRef,
    #[serde(default)]
    pub device: DevicePlacement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    #[serde(default)]
    pub texts: Vec<LocalizedText>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub screenshot: ScreenshotSpec,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_canvas_width")]
    pub width: u32,
    #[serde(default = "default_canvas_height")]
    pub height: u32,
}

impl RenderRequest {
    pub fn validate(&self) -> Result<()> {
        validate_canvas(self.width, self.height)
    }
}

pub fn validate_canvas(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 || width > MAX_CANVAS_EDGE || height > MAX_CANVAS_EDGE {
        return Err(anyhow!(CodedError::usage(
            INVALID_CANVAS_SIZE,
            format!("canvas must be between 1x1 and {MAX_CANVAS_EDGE}x{MAX_CANVAS_EDGE}, got {width}x{height}"),
        )
        .with_details(json!({ "width": width, "height": height }))));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_project_name")]
    pub name: String,
    #[serde(default)]
    pub screenshots: Vec<ScreenshotSpec>,
    /// When set, every screenshot gets its slice of one continuous background
    /// instead of its own template background.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panoramic_background: Option<BackgroundSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }
}

impl Default for ExportFormat {
    fn default() -> Self {
        Self::Png
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_devices")]
    pub devices: Vec<String>,
    #[serde(default = "default_export_locales")]
    pub locales: Vec<String>,
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default = "default_naming_pattern")]
    pub naming_pattern: String,
}

impl ExportConfig {
    pub fn validate(&self) -> Result<()> {
        let problem = if self.devices.is_empty() {
            Some("at least one device is required")
        } else if self.locales.is_empty() {
            Some("at least one locale is required")
        } else if !(1..=100).contains(&self.quality) {
            Some("quality must be between 1 and 100")
        } else if self.naming_pattern.trim().is_empty() {
            Some("naming_pattern cannot be empty")
        } else {
            None
        };

        match problem {
            Some(message) => Err(anyhow!(CodedError::usage(INVALID_EXPORT_REQUEST, message)
                .with_details(json!({
                    "devices": self.devices,
                    "locales": self.locales,
                    "quality": self.quality,
                    "naming_pattern": self.naming_pattern,
                })))),
            None => Ok(()),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            devices: default_export_devices(),
            locales: default_export_locales(),
            format: ExportFormat::default(),
            quality: default_quality(),
            naming_pattern: default_naming_pattern(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub project: Project,
    #[serde(default)]
    pub config: ExportConfig,
}

fn default_center() -> f32 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_mesh_points() -> Vec<ColorPoint> {
    vec![
        ColorPoint {
            color: Color::rgb(0x66, 0x7E, 0xEA),
            x: 0.2,
            y: 0.2,
            radius: 0.6,
        },
        ColorPoint {
            color: Color::rgb(0x76, 0x4B, 0xA2),
            x: 0.8,
            y: 0.8,
            radius: 0.6,
        },
    ]
}

fn default_blob_blur() -> f32 {
    150.0
}

fn default_blobs_base_color() -> Color {
    Color::rgb(0x1A, 0x1A, 0x2E)
}

fn default_blob_size() -> f32 {
    0.3
}

fn default_noise_intensity() -> f32 {
    0.03
}

fn default_device_model() -> String {
    "iphone-6.9".to_owned()
}

fn default_device_color() -> String {
    "natural-titanium".to_owned()
}

fn default_device_scale() -> f32 {
    0.85
}

fn default_device_position_y() -> f32 {
    0.55
}

fn default_shadow_blur() -> u32 {
    40
}

fn default_shadow_opacity() -> f32 {
    0.3
}

fn default_plate_color() -> Color {
    Color::BLACK
}

fn default_plate_padding() -> u32 {
    8
}

fn default_plate_radius() -> u32 {
    4
}

fn default_plate_opacity() -> f32 {
    0.8
}

fn default_font_family() -> String {
    "SF Pro Display".to_owned()
}

fn default_font_size() -> u32 {
    120
}

fn default_font_weight() -> u32 {
    700
}

fn default_text_color() -> Color {
    Color::BLACK
}

fn default_line_height() -> f32 {
    1.2
}

fn default_text_position_y() -> f32 {
    0.1
}

fn default_locale() -> String {
    FALLBACK_LOCALE.to_owned()
}

fn default_canvas_width() -> u32 {
    1290
}

fn default_canvas_height() -> u32 {
    2796
}

fn default_project_name() -> String {
    "Untitled Project".to_owned()
}

fn default_export_devices() -> Vec<String> {
    vec![
        "iphone-6.9".to_owned(),
        "iphone-6.5".to_owned(),
        "ipad-13".to_owned(),
    ]
}

fn default_export_locales() -> Vec<String> {
    vec![FALLBACK_LOCALE.to_owned()]
}

fn default_quality() -> u8 {
    95
}

fn default_naming_pattern() -> String {
    "{locale}/{device}/{index}".to_owned()
}
