use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::color::Color;

pub const DEFAULT_DEVICE_ID: &str = "iphone-6.9";

/// Bezel color for color ids missing from [`DEVICE_COLORS`].
pub const DEFAULT_BEZEL_COLOR: Color = Color::rgb(31, 31, 31);

/// Device frame record. `width`/`height` are the App Store export size, the
/// remaining fields describe the frame silhouette used for compositing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceGeometry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_size: String,
    pub category: String,
    pub width: u32,
    pub height: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub screen_offset_x: u32,
    pub screen_offset_y: u32,
    pub screen_width: u32,
    pub screen_height: u32,
    pub corner_radius: u32,
    #[serde(default)]
    pub required: bool,
}

impl DeviceGeometry {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            bail!("device id cannot be empty");
        }
        if self.width == 0 || self.height == 0 {
            bail!("device '{}': export size must be positive", self.id);
        }
        if self.screen_width == 0 || self.screen_height == 0 {
            bail!("device '{}': screen size must be positive", self.id);
        }
        if self.screen_offset_x + self.screen_width > self.frame_width
            || self.screen_offset_y + self.screen_height > self.frame_height
        {
            bail!(
                "device '{}': screen {}x{} at ({}, {}) does not fit frame {}x{}",
                self.id,
                self.screen_width,
                self.screen_height,
                self.screen_offset_x,
                self.screen_offset_y,
                self.frame_width,
                self.frame_height
            );
        }
        Ok(())
    }
}

/// Bezel colors by device color id.
pub const DEVICE_COLORS: [(&str, Color); 13] = [
    ("natural-titanium", Color::rgb(138, 138, 143)),
    ("blue-titanium", Color::rgb(60, 76, 92)),
    ("white-titanium", Color::rgb(245, 245, 240)),
    ("black-titanium", Color::rgb(46, 46, 48)),
    ("space-black", Color::rgb(31, 31, 31)),
    ("silver", Color::rgb(227, 228, 229)),
    ("gold", Color::rgb(245, 231, 208)),
    ("space-gray", Color::rgb(110, 110, 115)),
    ("blue", Color::rgb(167, 193, 217)),
    ("pink", Color::rgb(249, 209, 207)),
    ("midnight", Color::rgb(29, 29, 31)),
    ("starlight", Color::rgb(249, 243, 238)),
    ("white", Color::rgb(245, 245, 245)),
];

pub fn bezel_color(color_id: &str) -> Color {
    DEVICE_COLORS
        .iter()
        .find(|(id, _)| *id == color_id)
        .map(|(_, color)| *color)
        .unwrap_or(DEFAULT_BEZEL_COLOR)
}

/// Read-only device lookup table. The renderer only ever reads from it.
#[derive(Debug, Clone)]
pub struct DeviceCatalog {
    devices: Vec<DeviceGeometry>,
    default_id: String,
}

impl DeviceCatalog {
    pub fn builtin() -> Self {
        Self {
            devices: builtin_devices(),
            default_id: DEFAULT_DEVICE_ID.to_owned(),
        }
    }

    pub fn new(devices: Vec<DeviceGeometry>, default_id: &str) -> Result<Self> {
        if devices.is_empty() {
            bail!("device catalog must contain at least one device");
        }
        for device in &devices {
            device.validate()?;
        }
        if !devices.iter().any(|device| device.id == default_id) {
            bail!("default device '{}' is not in the catalog", default_id);
        }
        Ok(Self {
            devices,
            default_id: default_id.to_owned(),
        })
    }

    /// Loads a JSON array of device records, replacing the built-in table.
    pub fn from_json_file(path: &Path, default_id: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read device catalog {}", path.display()))?;
        let devices: Vec<DeviceGeometry> = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse device catalog {}", path.display()))?;
        Self::new(devices, default_id)
            .with_context(|| format!("invalid device catalog {}", path.display()))
    }

    pub fn with_default(mut self, default_id: &str) -> Result<Self> {
        if self.get(default_id).is_none() {
            bail!("default device '{}' is not in the catalog", default_id);
        }
        self.default_id = default_id.to_owned();
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<&DeviceGeometry> {
        self.devices.iter().find(|device| device.id == id)
    }

    pub fn default_device(&self) -> &DeviceGeometry {
        self.get(&self.default_id)
            .unwrap_or_else(|| &self.devices[0])
    }

    /// Like [`DeviceCatalog::get`] but unknown ids resolve to the default device.
    pub fn resolve(&self, id: &str) -> &DeviceGeometry {
        match self.get(id) {
            Some(device) => device,
            None => {
                log::warn!(
                    "unknown device '{}', falling back to '{}'",
                    id,
                    self.default_id
                );
                self.default_device()
            }
        }
    }

    pub fn all(&self) -> &[DeviceGeometry] {
        &self.devices
    }

    pub fn by_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a DeviceGeometry> {
        self.devices
            .iter()
            .filter(move |device| device.category == category)
    }
}

impl Default for DeviceCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn device(
    id: &str,
    name: &str,
    display_size: &str,
    category: &str,
    export: (u32, u32),
    frame: (u32, u32),
    offset: (u32, u32),
    corner_radius: u32,
    required: bool,
) -> DeviceGeometry {
    DeviceGeometry {
        id: id.to_owned(),
        name: name.to_owned(),
        display_size: display_size.to_owned(),
        category: category.to_owned(),
        width: export.0,
        height: export.1,
        frame_width: frame.0,
        frame_height: frame.1,
        screen_offset_x: offset.0,
        screen_offset_y: offset.1,
        screen_width: export.0,
        screen_height: export.1,
        corner_radius,
        required,
    }
}

fn builtin_devices() -> Vec<DeviceGeometry> {
    vec![
        device("iphone-6.9", "iPhone 16 Pro Max", "6.9\"", "iphone", (1320, 2868), (1420, 2980), (50, 56), 140, true),
        device("iphone-6.9-alt", "iPhone 15 Pro Max", "6.9\"", "iphone", (1290, 2796), (1390, 2908), (50, 56), 135, false),
        device("iphone-6.5", "iPhone 14 Plus", "6.5\"", "iphone", (1284, 2778), (1384, 2890), (50, 56), 130, false),
        device("iphone-6.1", "iPhone 15", "6.1\"", "iphone", (1179, 2556), (1279, 2668), (50, 56), 120, false),
        device("iphone-5.5", "iPhone 8 Plus", "5.5\"", "iphone", (1242, 2208), (1342, 2360), (50, 76), 0, false),
        device("ipad-13", "iPad Pro 13\"", "13\"", "ipad", (2064, 2752), (2184, 2880), (60, 64), 40, true),
        device("ipad-12.9", "iPad Pro 12.9\"", "12.9\"", "ipad", (2048, 2732), (2168, 2860), (60, 64), 40, false),
        device("ipad-11", "iPad Pro 11\"", "11\"", "ipad", (1668, 2388), (1788, 2516), (60, 64), 36, false),
        device("watch-ultra", "Apple Watch Ultra", "49mm", "watch", (422, 514), (502, 614), (40, 50), 80, false),
        device("watch-series-9", "Apple Watch Series 9", "45mm", "watch", (410, 502), (490, 602), (40, 50), 75, false),
        device("apple-tv-4k", "Apple TV 4K", "TV", "tv", (3840, 2160), (3840, 2160), (0, 0), 0, false),
        device("apple-tv-hd", "Apple TV HD", "TV", "tv", (1920, 1080), (1920, 1080), (0, 0), 0, false),
        device("mac-16", "MacBook Pro 16\"", "16\"", "mac", (2880, 1800), (3000, 1980), (60, 90), 20, false),
        device("mac-14", "MacBook Pro 14\"", "14\"", "mac", (2560, 1600), (2680, 1780), (60, 90), 18, false),
        device("vision-pro", "Apple Vision Pro", "visionOS", "vision", (3840, 2160), (3840, 2160), (0, 0), 0, false),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = DeviceCatalog::builtin();
        assert_eq!(catalog.all().len(), 15);
        for device in catalog.all() {
            device.validate().expect("builtin device should validate");
        }
        let required = catalog
            .all()
            .iter()
            .filter(|device| device.required)
            .map(|device| device.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(required, vec!["iphone-6.9", "ipad-13"]);
    }

    #[test]
    fn unknown_device_resolves_to_default() {
        let catalog = DeviceCatalog::builtin();
        assert!(catalog.get("iphone-15-pro-max").is_none());
        let resolved = catalog.resolve("iphone-15-pro-max");
        assert_eq!(resolved.id, DEFAULT_DEVICE_ID);
        assert_eq!(resolved.frame_width, 1420);
        assert_eq!(catalog.resolve("ipad-11").id, "ipad-11");
    }

    #[test]
    fn category_filter() {
        let catalog = DeviceCatalog::builtin();
        let watches = catalog
            .by_category("watch")
            .map(|device| device.id.clone())
            .collect::<Vec<_>>();
        assert_eq!(watches, vec!["watch-ultra", "watch-series-9"]);
    }

    #[test]
    fn bezel_colors_fall_back_to_dark_default() {
        assert_eq!(bezel_color("gold"), Color::rgb(245, 231, 208));
        assert_eq!(bezel_color("chartreuse"), DEFAULT_BEZEL_COLOR);
    }

    #[test]
    fn custom_catalog_rejects_missing_default_and_bad_geometry() {
        let mut small = builtin_devices();
        small.truncate(2);
        assert!(DeviceCatalog::new(small.clone(), "ipad-13").is_err());
        assert!(DeviceCatalog::new(small.clone(), "iphone-6.9-alt").is_ok());

        small[0].screen_offset_x = 500;
        assert!(DeviceCatalog::new(small, "iphone-6.9").is_err());
    }

    #[test]
    fn catalog_loads_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        let devices = vec![builtin_devices().remove(5)];
        fs::write(&path, serde_json::to_string(&devices).unwrap()).unwrap();

        let catalog = DeviceCatalog::from_json_file(&path, "ipad-13").unwrap();
        assert_eq!(catalog.resolve("anything").id, "ipad-13");
        assert!(DeviceCatalog::from_json_file(&path, "iphone-6.9").is_err());
    }
}
