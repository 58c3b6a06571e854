use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use image::RgbaImage;
use serde_json::json;
use storeshots::background::render_panoramic;
use storeshots::batch::build_archive;
use storeshots::color::{Color, GradientStop};
use storeshots::config::StudioConfig;
use storeshots::schema::{
    BackgroundSpec, ExportConfig, ExportFormat, GradientSpec, Project, ScreenshotSpec,
};
use storeshots::studio::Studio;
use storeshots::text::FontCache;
use tempfile::tempdir;
use zip::ZipArchive;

fn write_tiny_catalog(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("devices.json");
    let device = |id: &str, width: u32, height: u32| {
        json!({
            "id": id,
            "name": id,
            "category": "iphone",
            "width": width,
            "height": height,
            "frame_width": 40,
            "frame_height": 80,
            "screen_offset_x": 2,
            "screen_offset_y": 2,
            "screen_width": 36,
            "screen_height": 76,
            "corner_radius": 6
        })
    };
    let devices = json!([device("tiny-phone", 24, 48), device("tiny-tab", 36, 48)]);
    fs::write(&path, serde_json::to_vec_pretty(&devices).unwrap()).unwrap();
    path
}

fn studio(dir: &Path) -> Studio {
    let config = StudioConfig {
        assets_dir: dir.to_path_buf(),
        output_dir: dir.join("out"),
        default_device: "tiny-phone".to_owned(),
        devices_file: Some(write_tiny_catalog(dir)),
        ..StudioConfig::default()
    };
    let catalog = config.device_catalog().unwrap();
    Studio::with_catalog(config, catalog).with_fonts(FontCache::builtin_only())
}

fn screenshot(id: &str, order: u32, color: Color) -> ScreenshotSpec {
    let mut screenshot = ScreenshotSpec {
        id: id.to_owned(),
        order,
        ..ScreenshotSpec::default()
    };
    screenshot.template.background = BackgroundSpec::solid(color);
    screenshot
}

fn read_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|index| {
            let mut entry = archive.by_index(index).unwrap();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).unwrap();
            (entry.name().to_owned(), bytes)
        })
        .collect()
}

#[test]
fn archive_names_follow_pattern_and_screenshot_order() {
    let dir = tempdir().unwrap();
    let studio = studio(dir.path());
    let project = Project {
        id: "demo".to_owned(),
        screenshots: vec![
            screenshot("second", 1, Color::rgb(0, 0, 255)),
            screenshot("first", 0, Color::rgb(255, 0, 0)),
        ],
        ..Project::default()
    };
    let config = ExportConfig {
        devices: vec!["tiny-phone".to_owned()],
        locales: vec!["en".to_owned()],
        ..ExportConfig::default()
    };
    let output = dir.path().join("out/export.zip");

    let mut ticks = Vec::new();
    let summary = build_archive(&studio, &project, &config, &output, |done, total| {
        ticks.push((done, total))
    })
    .unwrap();

    assert_eq!(summary.entries, vec!["en/tiny-phone/1.png", "en/tiny-phone/2.png"]);
    assert_eq!(ticks, vec![(1, 2), (2, 2)]);
    assert!(!dir.path().join("out/export.zip.part").exists());

    let entries = read_entries(&output);
    assert_eq!(entries.len(), 2);
    let first = image::load_from_memory(&entries[0].1).unwrap().to_rgba8();
    assert_eq!(first.dimensions(), (24, 48));
    assert_eq!(first.get_pixel(0, 0).0, [255, 0, 0, 255]);
    let second = image::load_from_memory(&entries[1].1).unwrap().to_rgba8();
    assert_eq!(second.get_pixel(0, 0).0, [0, 0, 255, 255]);
}

#[test]
fn unknown_devices_are_skipped_and_formats_honored() {
    let dir = tempdir().unwrap();
    let studio = studio(dir.path());
    let project = Project {
        screenshots: vec![screenshot("only", 0, Color::rgb(10, 200, 10))],
        ..Project::default()
    };
    let config = ExportConfig {
        devices: vec!["tiny-tab".to_owned(), "iphone-99".to_owned()],
        locales: vec!["de".to_owned(), "fr".to_owned()],
        format: ExportFormat::Jpeg,
        quality: 80,
        naming_pattern: "{device}_{locale}_{index}".to_owned(),
    };
    let output = dir.path().join("jpeg.zip");

    let summary = build_archive(&studio, &project, &config, &output, |_, _| {}).unwrap();
    assert_eq!(summary.skipped_devices, vec!["iphone-99".to_owned()]);
    assert_eq!(
        summary.entries,
        vec!["tiny-tab_de_1.jpeg", "tiny-tab_fr_1.jpeg"]
    );

    for (_, bytes) in read_entries(&output) {
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (36, 48));
    }
}

#[test]
fn invalid_config_leaves_no_archive_behind() {
    let dir = tempdir().unwrap();
    let studio = studio(dir.path());
    let project = Project {
        screenshots: vec![screenshot("only", 0, Color::WHITE)],
        ..Project::default()
    };
    let config = ExportConfig {
        devices: vec!["tiny-phone".to_owned()],
        locales: vec!["en".to_owned()],
        quality: 0,
        ..ExportConfig::default()
    };
    let output = dir.path().join("bad.zip");

    assert!(build_archive(&studio, &project, &config, &output, |_, _| {}).is_err());
    assert!(!output.exists());
    assert!(!dir.path().join("bad.zip.part").exists());
}

#[test]
fn panoramic_slices_reassemble_into_the_full_strip() {
    let dir = tempdir().unwrap();
    let studio = studio(dir.path());
    let panorama = BackgroundSpec {
        kind: storeshots::schema::BackgroundKind::Gradient {
            gradient: GradientSpec::linear(
                vec![
                    GradientStop::new(Color::rgb(255, 0, 0), 0.0),
                    GradientStop::new(Color::rgb(0, 0, 255), 1.0),
                ],
                180.0,
            ),
        },
        noise: None,
    };
    let project = Project {
        screenshots: (0..3)
            .map(|index| screenshot(&format!("s{index}"), index, Color::WHITE))
            .collect(),
        panoramic_background: Some(panorama.clone()),
        ..Project::default()
    };
    let config = ExportConfig {
        devices: vec!["tiny-phone".to_owned()],
        locales: vec!["en".to_owned()],
        ..ExportConfig::default()
    };
    let output = dir.path().join("pano.zip");
    build_archive(&studio, &project, &config, &output, |_, _| {}).unwrap();

    let full = render_panoramic(24, 48, 3, &panorama, dir.path()).unwrap();
    let mut stitched = RgbaImage::new(72, 48);
    for (index, (_, bytes)) in read_entries(&output).iter().enumerate() {
        let slice = image::load_from_memory(bytes).unwrap().to_rgba8();
        image::imageops::replace(&mut stitched, &slice, index as i64 * 24, 0);
    }
    assert_eq!(&stitched, full.full());

    // The sweep runs left to right across screenshots, not within each one.
    let left = stitched.get_pixel(0, 24).0;
    let right = stitched.get_pixel(71, 24).0;
    assert!(left[0] > right[0]);
    assert!(left[2] < right[2]);
}
