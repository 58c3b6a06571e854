use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::batch::build_archive;
use crate::error_codes::{
    CodedError, EXPORT_NOT_READY, JOB_NOT_FOUND, JOB_QUEUE_CLOSED, JOB_QUEUE_FULL,
};
use crate::schema::ExportRequest;
use crate::studio::Studio;

const JOB_ID_LEN: usize = 16;
const PROGRESS_STARTED: u8 = 10;
const PROGRESS_RENDERED: u8 = 99;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub status: JobState,
    /// 0..=100.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    fn pending(job_id: String) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status: JobState::Pending,
            progress: 0,
            download_path: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Shared job records. Cloning shares the same table.
#[derive(Debug, Clone, Default)]
pub struct JobTable {
    inner: Arc<RwLock<HashMap<String, JobStatus>>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, status: JobStatus) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(status.job_id.clone(), status);
    }

    fn update(&self, job_id: &str, apply: impl FnOnce(&mut JobStatus)) {
        let mut jobs = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(status) = jobs.get_mut(job_id) {
            apply(status);
            status.updated_at = Utc::now();
        }
    }

    pub fn get(&self, job_id: &str) -> Option<JobStatus> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self, job_id: &str) -> Result<JobStatus> {
        self.get(job_id).ok_or_else(|| {
            anyhow!(CodedError::not_found(
                JOB_NOT_FOUND,
                format!("job '{job_id}' does not exist")
            ))
        })
    }

    /// Archive path of a completed job.
    pub fn download_path(&self, job_id: &str) -> Result<PathBuf> {
        let status = self.status(job_id)?;
        match (status.status, status.download_path) {
            (JobState::Completed, Some(path)) => Ok(path),
            (state, _) => Err(anyhow!(CodedError::conflict(
                EXPORT_NOT_READY,
                format!("job '{job_id}' is {}", state_label(state))
            ))),
        }
    }
}

fn state_label(state: JobState) -> &'static str {
    match state {
        JobState::Pending => "pending",
        JobState::Processing => "processing",
        JobState::Completed => "completed",
        JobState::Failed => "failed",
    }
}

struct ExportJob {
    id: String,
    request: ExportRequest,
}

/// Bounded queue of export jobs drained by a fixed pool of worker threads.
/// `submit` never blocks: a full queue is reported as `JOB_QUEUE_FULL`.
pub struct JobQueue {
    table: JobTable,
    sender: Option<SyncSender<ExportJob>>,
    workers: Vec<JoinHandle<()>>,
    counter: AtomicU64,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("jobs", &self.table.len())
            .field("workers", &self.workers.len())
            .field("open", &self.sender.is_some())
            .finish()
    }
}

impl JobQueue {
    pub fn new(studio: Arc<Studio>) -> Result<Self> {
        let worker_count = studio.config().workers.max(1);
        let (sender, receiver) = mpsc::sync_channel::<ExportJob>(studio.config().queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let table = JobTable::new();

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let studio = Arc::clone(&studio);
            let receiver = Arc::clone(&receiver);
            let table = table.clone();
            let worker = thread::Builder::new()
                .name(format!("storeshots-export-{index}"))
                .spawn(move || worker_loop(&studio, &receiver, &table))
                .context("failed to spawn export worker thread")?;
            workers.push(worker);
        }
        log::debug!("export queue started with {worker_count} workers");

        Ok(Self {
            table,
            sender: Some(sender),
            workers,
            counter: AtomicU64::new(0),
        })
    }

    pub fn table(&self) -> &JobTable {
        &self.table
    }

    /// Validates and enqueues an export. The job is visible as `pending`
    /// before this returns.
    pub fn submit(&self, request: ExportRequest) -> Result<JobHandle> {
        request.config.validate()?;
        let sender = self.sender.as_ref().ok_or_else(queue_closed)?;

        let id = self.next_job_id(&request.project.id);
        self.table.insert(JobStatus::pending(id.clone()));
        let job = ExportJob {
            id: id.clone(),
            request,
        };
        if let Err(error) = sender.try_send(job) {
            let (reason, error) = match error {
                TrySendError::Full(_) => ("export queue full", queue_full(&id)),
                TrySendError::Disconnected(_) => ("export queue closed", queue_closed()),
            };
            self.table.update(&id, |status| {
                status.status = JobState::Failed;
                status.error = Some(reason.to_owned());
            });
            log::warn!("export {id}: rejected, {reason}");
            return Err(error);
        }
        log::info!("export {id}: queued");

        Ok(JobHandle {
            id,
            table: self.table.clone(),
        })
    }

    pub fn status(&self, job_id: &str) -> Result<JobStatus> {
        self.table.status(job_id)
    }

    pub fn download_path(&self, job_id: &str) -> Result<PathBuf> {
        self.table.download_path(job_id)
    }

    /// Stops accepting jobs, lets workers drain the queue and joins them.
    pub fn shutdown(&mut self) {
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("export").to_owned();
            if worker.join().is_err() {
                log::error!("{name} exited with a panic");
            }
        }
    }

    fn next_job_id(&self, project_id: &str) -> String {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let mut hasher = Sha256::new();
        hasher.update(project_id.as_bytes());
        hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();
        let mut id = String::with_capacity(JOB_ID_LEN);
        for byte in digest.iter().take(JOB_ID_LEN / 2) {
            id.push_str(&format!("{byte:02x}"));
        }
        id
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn queue_full(job_id: &str) -> anyhow::Error {
    anyhow!(CodedError::unavailable(
        JOB_QUEUE_FULL,
        "export queue is full, retry once running jobs finish"
    )
    .with_details(serde_json::json!({ "job_id": job_id })))
}

fn queue_closed() -> anyhow::Error {
    anyhow!(CodedError::unavailable(
        JOB_QUEUE_CLOSED,
        "export queue is no longer accepting jobs"
    ))
}

fn worker_loop(studio: &Studio, receiver: &Mutex<Receiver<ExportJob>>, table: &JobTable) {
    loop {
        let next = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();
        let Ok(job) = next else {
            return;
        };
        run_job(studio, table, job);
    }
}

fn run_job(studio: &Studio, table: &JobTable, job: ExportJob) {
    let ExportJob { id, request } = job;
    table.update(&id, |status| {
        status.status = JobState::Processing;
        status.progress = PROGRESS_STARTED;
    });
    log::info!("export {id}: processing");

    let output_path = studio
        .config()
        .output_dir
        .join(format!("export_{id}.zip"));
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        build_archive(
            studio,
            &request.project,
            &request.config,
            &output_path,
            |done, total| {
                let progress = scale_progress(done, total);
                table.update(&id, |status| status.progress = progress);
            },
        )
    }))
    .unwrap_or_else(|_| Err(anyhow!("export worker panicked")));

    match outcome {
        Ok(summary) => {
            log::info!(
                "export {id}: completed ({} images) -> {}",
                summary.entries.len(),
                summary.path.display()
            );
            table.update(&id, |status| {
                status.status = JobState::Completed;
                status.progress = 100;
                status.download_path = Some(summary.path);
            });
        }
        Err(error) => {
            let message = format!("{error:#}");
            log::error!("export {id}: failed: {message}");
            table.update(&id, |status| {
                status.status = JobState::Failed;
                status.error = Some(message);
            });
        }
    }
}

/// Maps rendering progress into the `10..=99` band reserved for it.
fn scale_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return PROGRESS_RENDERED;
    }
    let span = usize::from(PROGRESS_RENDERED - PROGRESS_STARTED);
    let scaled = usize::from(PROGRESS_STARTED) + done.min(total) * span / total;
    scaled as u8
}

/// Caller-side view of one submitted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: String,
    table: JobTable,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> Result<JobStatus> {
        self.table.status(&self.id)
    }

    /// Polls until the job reaches a terminal state. `on_progress` sees every
    /// observed status, terminal included.
    pub fn wait(
        &self,
        timeout: Duration,
        mut on_progress: impl FnMut(&JobStatus),
    ) -> Result<JobStatus> {
        let started = Instant::now();
        loop {
            let status = self.status()?;
            on_progress(&status);
            if status.status.is_terminal() {
                return Ok(status);
            }
            if started.elapsed() >= timeout {
                bail!(
                    "export {} still {} after {:?}",
                    self.id,
                    state_label(status.status),
                    timeout
                );
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DeviceCatalog;
    use crate::config::StudioConfig;
    use crate::error_codes::{find_coded_error, INVALID_EXPORT_REQUEST};
    use crate::schema::FALLBACK_LOCALE;
    use crate::schema::{ExportConfig, Project, ScreenshotSpec};
    use crate::text::FontCache;

    fn queue(output_dir: PathBuf) -> JobQueue {
        queue_with_capacity(output_dir, 4)
    }

    fn queue_with_capacity(output_dir: PathBuf, queue_capacity: usize) -> JobQueue {
        let config = StudioConfig {
            output_dir,
            workers: 1,
            queue_capacity,
            ..StudioConfig::default()
        };
        let studio = Studio::with_catalog(config, DeviceCatalog::builtin())
            .with_fonts(FontCache::builtin_only());
        JobQueue::new(Arc::new(studio)).unwrap()
    }

    fn tiny_request() -> ExportRequest {
        ExportRequest {
            project: Project {
                id: "p1".to_owned(),
                screenshots: vec![ScreenshotSpec {
                    id: "s1".to_owned(),
                    ..ScreenshotSpec::default()
                }],
                ..Project::default()
            },
            config: ExportConfig {
                devices: vec!["iphone-6.9".to_owned()],
                locales: vec!["en".to_owned()],
                ..ExportConfig::default()
            },
        }
    }

    #[test]
    fn progress_stays_in_rendering_band() {
        assert_eq!(scale_progress(0, 4), 10);
        assert_eq!(scale_progress(2, 4), 54);
        assert_eq!(scale_progress(4, 4), 99);
        assert_eq!(scale_progress(9, 4), 99);
        assert_eq!(scale_progress(0, 0), 99);
    }

    #[test]
    fn unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue(dir.path().to_path_buf());
        let error = queue.status("missing").unwrap_err();
        assert_eq!(
            find_coded_error(&error).map(|coded| coded.code),
            Some(JOB_NOT_FOUND)
        );
    }

    #[test]
    fn invalid_config_is_rejected_before_queueing() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue(dir.path().to_path_buf());
        let mut request = tiny_request();
        request.config.locales.clear();
        let error = queue.submit(request).unwrap_err();
        assert_eq!(
            find_coded_error(&error).map(|coded| coded.code),
            Some(INVALID_EXPORT_REQUEST)
        );
        assert!(queue.table().is_empty());
    }

    #[test]
    fn job_completes_with_archive_in_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue(dir.path().to_path_buf());
        let handle = queue.submit(tiny_request()).unwrap();
        assert_eq!(handle.id().len(), JOB_ID_LEN);

        let mut seen = Vec::new();
        let status = handle
            .wait(Duration::from_secs(120), |status| seen.push(status.progress))
            .unwrap();
        assert_eq!(status.status, JobState::Completed, "{:?}", status.error);
        assert_eq!(status.progress, 100);
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));

        let path = queue.download_path(handle.id()).unwrap();
        assert_eq!(path, dir.path().join(format!("export_{}.zip", handle.id())));
        assert!(path.is_file());
    }

    fn slow_request() -> ExportRequest {
        let mut request = tiny_request();
        request.project.screenshots = (0..3)
            .map(|index| ScreenshotSpec {
                id: format!("s{index}"),
                order: index,
                ..ScreenshotSpec::default()
            })
            .collect();
        request.config.locales = vec![FALLBACK_LOCALE.to_owned(), "de".to_owned()];
        request
    }

    #[test]
    fn submit_returns_immediately_when_queue_is_full() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with_capacity(dir.path().to_path_buf(), 1);

        let mut rejected = Vec::new();
        for _ in 0..4 {
            let started = Instant::now();
            let outcome = queue.submit(slow_request());
            assert!(
                started.elapsed() < Duration::from_millis(500),
                "submit blocked for {:?}",
                started.elapsed()
            );
            if let Err(error) = outcome {
                let coded = find_coded_error(&error).expect("rejection should be coded");
                assert_eq!(coded.code, JOB_QUEUE_FULL);
                assert_eq!(coded.kind, crate::error_codes::CodedErrorKind::Unavailable);
                let job_id = coded
                    .details
                    .as_ref()
                    .and_then(|details| details["job_id"].as_str())
                    .expect("rejection names the job")
                    .to_owned();
                rejected.push(job_id);
            }
        }

        assert!(!rejected.is_empty(), "one worker and one slot cannot hold four jobs");
        for job_id in rejected {
            let status = queue.status(&job_id).unwrap();
            assert_eq!(status.status, JobState::Failed);
            assert_eq!(status.error.as_deref(), Some("export queue full"));
        }
    }

    #[test]
    fn shutdown_closes_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = queue(dir.path().to_path_buf());
        queue.shutdown();
        let error = queue.submit(tiny_request()).unwrap_err();
        assert_eq!(
            find_coded_error(&error).map(|coded| coded.code),
            Some(JOB_QUEUE_CLOSED)
        );
    }

    #[test]
    fn pending_job_download_is_not_ready() {
        let table = JobTable::new();
        table.insert(JobStatus::pending("abc".to_owned()));
        let error = table.download_path("abc").unwrap_err();
        assert_eq!(
            find_coded_error(&error).map(|coded| coded.code),
            Some(EXPORT_NOT_READY)
        );
    }
}
