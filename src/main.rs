use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use storeshots::config::{read_document, StudioConfig};
use storeshots::error_codes::find_coded_error;
use storeshots::jobs::{JobQueue, JobState};
use storeshots::logging::{init_logging, LoggingConfig};
use storeshots::schema::{ExportRequest, RenderRequest};
use storeshots::studio::Studio;

const EXPORT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Parser)]
#[command(name = "storeshots")]
#[command(about = "App store screenshot compositor")]
struct Cli {
    /// Studio config (YAML or JSON). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides `assets_dir` from the config.
    #[arg(long, global = true)]
    assets_dir: Option<PathBuf>,
    /// Overrides `output_dir` from the config.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
    /// Overrides `workers` from the config.
    #[arg(long, global = true)]
    workers: Option<usize>,
    /// Log filter, e.g. `debug` or `storeshots=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    log: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render one screenshot to a PNG.
    Render {
        request: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        #[arg(long)]
        locale: Option<String>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
    },
    /// Export a project as a zip of every locale and device.
    Export {
        request: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
    /// List the device catalog.
    Devices {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Validate a render or export request without rendering.
    Check { request: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(LoggingConfig {
        env_filter: cli.log.clone(),
        ..LoggingConfig::default()
    });

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => report(&error),
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => StudioConfig::load(path)?,
        None => StudioConfig::default(),
    };
    if let Some(assets_dir) = cli.assets_dir {
        config.assets_dir = assets_dir;
    }
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.validate()?;

    match cli.command {
        Commands::Render {
            request,
            output,
            locale,
            width,
            height,
        } => run_render(config, &request, &output, locale, width, height),
        Commands::Export { request, output } => run_export(config, &request, &output),
        Commands::Devices { category, json } => run_devices(config, category.as_deref(), json),
        Commands::Check { request } => run_check(config, &request),
    }
}

/// Coded errors go to stderr as a JSON envelope, everything else as text.
fn report(error: &anyhow::Error) -> ExitCode {
    match find_coded_error(error) {
        Some(coded) => {
            match serde_json::to_string_pretty(&coded.envelope()) {
                Ok(json) => eprintln!("{json}"),
                Err(_) => eprintln!("error: {coded}"),
            }
            ExitCode::from(2)
        }
        None => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_render(
    config: StudioConfig,
    request_path: &Path,
    output_path: &Path,
    locale: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
) -> Result<()> {
    let mut request: RenderRequest = read_document(request_path, "render request")?;
    if let Some(locale) = locale {
        request.locale = locale;
    }
    request.width = width.unwrap_or(request.width);
    request.height = height.unwrap_or(request.height);

    let studio = Studio::new(config)?;
    let png = studio.render_preview(&request)?;
    write_output(output_path, &png)?;
    println!(
        "Wrote {} ({}x{}, {})",
        output_path.display(),
        request.width,
        request.height,
        request.locale
    );
    Ok(())
}

fn run_export(config: StudioConfig, request_path: &Path, output_path: &Path) -> Result<()> {
    let request: ExportRequest = read_document(request_path, "export request")?;
    let studio = Arc::new(Studio::new(config)?);
    let queue = JobQueue::new(studio)?;

    let handle = queue.submit(request)?;
    let mut last_reported = None;
    let status = handle.wait(EXPORT_TIMEOUT, |status| {
        let bucket = status.progress / 10;
        if last_reported != Some(bucket) {
            last_reported = Some(bucket);
            eprintln!("export {}: {}%", status.job_id, status.progress);
        }
    })?;

    if status.status == JobState::Failed {
        anyhow::bail!(
            "export {} failed: {}",
            status.job_id,
            status.error.unwrap_or_default()
        );
    }
    let archive = queue.download_path(handle.id())?;
    move_file(&archive, output_path)?;
    println!("Wrote {}", output_path.display());
    Ok(())
}

fn run_devices(config: StudioConfig, category: Option<&str>, json: bool) -> Result<()> {
    let catalog = config.device_catalog()?;
    let devices = catalog
        .all()
        .iter()
        .filter(|device| category.map_or(true, |category| device.category == category))
        .collect::<Vec<_>>();

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    for device in devices {
        let marker = if device.id == catalog.default_device().id {
            " (default)"
        } else {
            ""
        };
        println!(
            "{:<16} {:<8} {:>5}x{:<5} {}{}",
            device.id, device.category, device.width, device.height, device.name, marker
        );
    }
    Ok(())
}

fn run_check(config: StudioConfig, request_path: &Path) -> Result<()> {
    let catalog = config.device_catalog()?;
    if let Ok(request) = read_document::<ExportRequest>(request_path, "export request") {
        request.config.validate()?;
        let unknown = request
            .config
            .devices
            .iter()
            .filter(|id| catalog.get(id).is_none())
            .cloned()
            .collect::<Vec<_>>();
        println!(
            "OK: {} (export, {} screenshots, {} locales, {} devices)",
            request_path.display(),
            request.project.screenshots.len(),
            request.config.locales.len(),
            request.config.devices.len() - unknown.len()
        );
        if !unknown.is_empty() {
            println!("Skipped devices: {}", unknown.join(", "));
        }
        return Ok(());
    }

    let request: RenderRequest = read_document(request_path, "render request")?;
    request.validate()?;
    println!(
        "OK: {} (render, {}x{}, {}, {} texts)",
        request_path.display(),
        request.width,
        request.height,
        request.locale,
        request.screenshot.texts.len()
    );
    Ok(())
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

/// Rename, falling back to copy when the archive lives on another filesystem.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).with_context(|| {
        format!("failed to copy {} to {}", from.display(), to.display())
    })?;
    let _ = fs::remove_file(from);
    Ok(())
}
