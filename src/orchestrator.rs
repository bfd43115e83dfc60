//! Front door of the pipeline: accepts submissions, answers polls, serves
//! finished files.

use chrono::Utc;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{AudioFormat, Config};
use crate::engine::{EngineFactory, EngineProvisioning};
use crate::error::{ConvertError, Result};
use crate::registry::{ConversionTask, TaskId, TaskRegistry};
use crate::worker::{ConversionJob, ConversionWorker};

const JANITOR_MAX_INTERVAL: Duration = Duration::from_secs(60);

static INVALID_FILENAME_CHARS: OnceLock<Regex> = OnceLock::new();

/// A finished audiobook opened for download.
#[derive(Debug)]
pub struct AudioStream {
    pub file: tokio::fs::File,
    pub len: u64,
    pub content_type: &'static str,
}

pub struct Orchestrator {
    registry: Arc<TaskRegistry>,
    worker: Arc<ConversionWorker>,
    output_lock: Arc<Mutex<()>>,
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    output_dir: PathBuf,
    format: AudioFormat,
    retention: Option<Duration>,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        registry: Arc<TaskRegistry>,
        engines: EngineProvisioning,
    ) -> Result<Self> {
        config.validate()?;
        let worker = ConversionWorker::new(config, Arc::clone(&registry), engines);

        Ok(Self {
            registry,
            output_lock: worker.output_lock(),
            worker: Arc::new(worker),
            slots: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            output_dir: config.output_dir.clone(),
            format: config.output_format,
            retention: config.retention(),
        })
    }

    /// Builds engine provisioning from the configured policy.
    pub fn with_factory(config: &Config, factory: Arc<dyn EngineFactory>) -> Result<Self> {
        let engines =
            EngineProvisioning::new(config.engine_policy, factory, config.engine_pool_size);
        Self::new(config, Arc::new(TaskRegistry::new()), engines)
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Registers a task and starts its worker in the background.
    ///
    /// The task waits in `queued` until one of `max_concurrent_tasks` slots
    /// frees up.
    pub fn submit(&self, text: &str, filename: &str) -> Result<TaskId> {
        if self.tracker.is_closed() {
            return Err(ConvertError::InvalidArgument(
                "no new tasks are accepted during shutdown".to_string(),
            ));
        }
        if text.trim().is_empty() {
            return Err(ConvertError::InvalidArgument(
                "text must not be empty".to_string(),
            ));
        }

        let output_name = output_file_name(filename, self.format);
        let task_id = self.registry.create(filename);
        let job = ConversionJob {
            task_id,
            text: text.to_string(),
            output_name,
        };

        let worker = Arc::clone(&self.worker);
        let slots = Arc::clone(&self.slots);
        self.tracker.spawn(async move {
            let Ok(_slot) = slots.acquire_owned().await else {
                return;
            };
            worker.run(job).await;
        });

        log::info!("Task {} queued for {}", task_id, filename);
        Ok(task_id)
    }

    pub fn poll(&self, task_id: TaskId) -> Result<ConversionTask> {
        self.registry.get(task_id)
    }

    /// Opens a finished file from the output store. Only bare file names are
    /// accepted.
    pub async fn fetch(&self, output_file: &str) -> Result<AudioStream> {
        let not_found = || ConvertError::NotFound(format!("output file {}", output_file));

        if output_file.is_empty()
            || output_file.contains(['/', '\\'])
            || output_file.starts_with('.')
        {
            return Err(not_found());
        }

        let path = self.output_dir.join(output_file);
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(not_found());
        }

        Ok(AudioStream {
            file,
            len: metadata.len(),
            content_type: content_type_for(output_file),
        })
    }

    /// Drops terminal records older than `ttl` along with any output file no
    /// remaining record names.
    pub async fn sweep_expired(&self, ttl: Duration) -> Vec<TaskId> {
        sweep(&self.registry, &self.output_lock, &self.output_dir, ttl).await
    }

    /// Starts the periodic sweep if a retention period is configured.
    pub fn start_retention_janitor(&self) -> bool {
        let Some(ttl) = self.retention else {
            return false;
        };

        let registry = Arc::clone(&self.registry);
        let output_lock = Arc::clone(&self.output_lock);
        let output_dir = self.output_dir.clone();
        let shutdown = self.shutdown.clone();
        let period = ttl.min(JANITOR_MAX_INTERVAL).max(Duration::from_millis(10));

        self.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = sweep(&registry, &output_lock, &output_dir, ttl).await;
                        if !evicted.is_empty() {
                            log::info!("Evicted {} expired tasks", evicted.len());
                        }
                    }
                }
            }
        });
        true
    }

    /// Number of workers (and the janitor) still running.
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Refuses further submissions and waits for every running task to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn sweep(
    registry: &TaskRegistry,
    output_lock: &Mutex<()>,
    output_dir: &Path,
    ttl: Duration,
) -> Vec<TaskId> {
    let Some(cutoff) = chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
    else {
        return Vec::new();
    };

    // No task may publish between deciding a file is orphaned and removing it.
    let _store = output_lock.lock().await;
    let eviction = registry.evict_finished_before(cutoff);
    for name in &eviction.orphaned_outputs {
        match tokio::fs::remove_file(output_dir.join(name)).await {
            Ok(()) => log::debug!("Removed expired output {}", name),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Could not remove expired output {}: {}", name, e),
        }
    }
    eviction.task_ids
}

/// `<base>_audiobook.<ext>` for a caller-supplied filename.
pub fn output_file_name(filename: &str, format: AudioFormat) -> String {
    format!("{}_audiobook.{}", base_name(filename), format.extension())
}

fn base_name(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or_default().trim();

    let lower = name.to_ascii_lowercase();
    let stem = [".epub", ".txt"]
        .iter()
        .find(|suffix| lower.ends_with(*suffix))
        .map_or(name, |suffix| &name[..name.len() - suffix.len()]);

    let invalid_chars = INVALID_FILENAME_CHARS
        .get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("invalid filename pattern"));
    let sanitized = invalid_chars.replace_all(stem, "_");
    let sanitized = sanitized.trim_start_matches('.').trim();

    if sanitized.is_empty() {
        "untitled".to_string()
    } else {
        sanitized.to_string()
    }
}

fn content_type_for(output_file: &str) -> &'static str {
    output_file
        .rsplit_once('.')
        .and_then(|(_, ext)| AudioFormat::parse(ext))
        .map_or("application/octet-stream", |format| format.content_type())
}
