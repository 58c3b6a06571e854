use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::background::{render_panoramic, PanoramicBackground};
use crate::export::export_to_size;
use crate::schema::{ExportConfig, Project, ScreenshotSpec};
use crate::studio::Studio;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub entries: Vec<String>,
    pub skipped_devices: Vec<String>,
}

/// Substitutes `{locale}`, `{device}` and `{index}` (1-based) and appends
/// the format extension.
pub fn format_filename(
    pattern: &str,
    locale: &str,
    device: &str,
    index: usize,
    extension: &str,
) -> String {
    let name = pattern
        .replace("{locale}", locale)
        .replace("{device}", device)
        .replace("{index}", &index.to_string());
    format!("{name}.{extension}")
}

/// Screenshots in `order`; ties keep their position in the project.
pub fn ordered_screenshots(project: &Project) -> Vec<&ScreenshotSpec> {
    let mut screenshots = project.screenshots.iter().collect::<Vec<_>>();
    screenshots.sort_by_key(|screenshot| screenshot.order);
    screenshots
}

/// Renders locale x device x screenshot into a zip at `output_path`.
///
/// The archive is written next to the target and renamed into place only
/// once complete, so a failed export never leaves a partial file behind.
/// Unknown device ids are skipped. `progress` receives `(done, total)`
/// after every image.
pub fn build_archive(
    studio: &Studio,
    project: &Project,
    config: &ExportConfig,
    output_path: &Path,
    mut progress: impl FnMut(usize, usize),
) -> Result<ArchiveSummary> {
    config.validate()?;
    if let Some(parent) = output_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory {}", parent.display()))?;
    }

    let partial_path = partial_path(output_path);
    let result = write_archive(studio, project, config, &partial_path, &mut progress);
    match result {
        Ok((entries, skipped_devices)) => {
            fs::rename(&partial_path, output_path).with_context(|| {
                format!(
                    "failed to move finished archive to {}",
                    output_path.display()
                )
            })?;
            Ok(ArchiveSummary {
                path: output_path.to_path_buf(),
                entries,
                skipped_devices,
            })
        }
        Err(error) => {
            let _ = fs::remove_file(&partial_path);
            Err(error)
        }
    }
}

fn partial_path(output_path: &Path) -> PathBuf {
    let mut name = output_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "export.zip".into());
    name.push(".part");
    output_path.with_file_name(name)
}

fn write_archive(
    studio: &Studio,
    project: &Project,
    config: &ExportConfig,
    path: &Path,
    progress: &mut dyn FnMut(usize, usize),
) -> Result<(Vec<String>, Vec<String>)> {
    let file = File::create(path)
        .with_context(|| format!("failed to create archive {}", path.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let screenshots = ordered_screenshots(project);
    let (devices, skipped_devices): (Vec<_>, Vec<_>) = config
        .devices
        .iter()
        .partition(|id| studio.catalog().get(id).is_some());
    let skipped_devices = skipped_devices
        .into_iter()
        .cloned()
        .collect::<Vec<_>>();
    for id in &skipped_devices {
        log::warn!("export: unknown device '{id}', skipping");
    }

    let total = config.locales.len() * devices.len() * screenshots.len();
    let mut done = 0usize;
    let mut entries = Vec::with_capacity(total);
    let extension = config.format.extension();

    for locale in &config.locales {
        for device_id in &devices {
            let Some(device) = studio.catalog().get(device_id) else {
                continue;
            };
            let panorama: Option<PanoramicBackground> = match &project.panoramic_background {
                Some(spec) if !screenshots.is_empty() => Some(render_panoramic(
                    device.width,
                    device.height,
                    screenshots.len() as u32,
                    spec,
                    studio.assets_dir(),
                )?),
                _ => None,
            };

            for (position, screenshot) in screenshots.iter().enumerate() {
                let background = panorama
                    .as_ref()
                    .and_then(|panorama| panorama.slice(position as u32));
                let image = studio
                    .render_screenshot_image(
                        screenshot,
                        locale,
                        device.width,
                        device.height,
                        background,
                    )
                    .with_context(|| {
                        format!(
                            "failed to render screenshot '{}' for {} / {}",
                            screenshot.id, locale, device.id
                        )
                    })?;
                let bytes = export_to_size(
                    &image,
                    device.width,
                    device.height,
                    config.format,
                    config.quality,
                )?;

                let name = format_filename(
                    &config.naming_pattern,
                    locale,
                    &device.id,
                    position + 1,
                    extension,
                );
                zip.start_file(name.as_str(), options)
                    .with_context(|| format!("failed to add {name} to archive"))?;
                zip.write_all(&bytes)
                    .with_context(|| format!("failed to write {name} to archive"))?;
                log::debug!("export: wrote {name} ({} bytes)", bytes.len());
                entries.push(name);

                done += 1;
                progress(done, total);
            }
        }
    }

    let mut writer = zip.finish().context("failed to finalize archive")?;
    writer.flush().context("failed to flush archive")?;
    Ok((entries, skipped_devices))
}
