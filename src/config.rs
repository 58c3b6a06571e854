use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::catalog::{DeviceCatalog, DEFAULT_DEVICE_ID};
use crate::text::DEFAULT_SYSTEM_FONTS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StudioConfig {
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,
    #[serde(default = "default_fonts_dir")]
    pub fonts_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_device")]
    pub default_device: String,
    #[serde(default = "default_system_fonts")]
    pub system_fonts: Vec<PathBuf>,
    /// JSON array of device records replacing the builtin catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices_file: Option<PathBuf>,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            assets_dir: default_assets_dir(),
            fonts_dir: default_fonts_dir(),
            output_dir: default_output_dir(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            default_device: default_device(),
            system_fonts: default_system_fonts(),
            devices_file: None,
        }
    }
}

impl StudioConfig {
    /// Reads YAML (or JSON for `.json` files). Relative paths inside the file
    /// resolve against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: Self = read_document(path, "config")?;

        let base = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        config.rebase(&base);
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        let rebase = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        rebase(&mut self.assets_dir);
        rebase(&mut self.fonts_dir);
        rebase(&mut self.output_dir);
        if let Some(devices_file) = self.devices_file.as_mut() {
            rebase(devices_file);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be > 0");
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be > 0");
        }
        if self.default_device.trim().is_empty() {
            bail!("default_device cannot be empty");
        }
        Ok(())
    }

    /// Builtin catalog, or the one in `devices_file`, defaulting to
    /// `default_device`.
    pub fn device_catalog(&self) -> Result<DeviceCatalog> {
        match &self.devices_file {
            Some(path) => DeviceCatalog::from_json_file(path, &self.default_device),
            None => DeviceCatalog::builtin()
                .with_default(&self.default_device)
                .with_context(|| {
                    format!("default_device '{}' is not a builtin device", self.default_device)
                }),
        }
    }
}

/// Parses a YAML document, or JSON when the extension is `.json`. YAML
/// errors carry their line and column.
pub fn read_document<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        return serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse json {what} {}", path.display()));
    }
    serde_yaml::from_str(&contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        anyhow!(
            "failed to parse yaml {what} {} at {}: {}",
            path.display(),
            location,
            error
        )
    })
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("assets")
}

fn default_fonts_dir() -> PathBuf {
    PathBuf::from("assets/fonts")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    16
}

fn default_device() -> String {
    DEFAULT_DEVICE_ID.to_owned()
}

fn default_system_fonts() -> Vec<PathBuf> {
    DEFAULT_SYSTEM_FONTS.iter().map(PathBuf::from).collect()
}
