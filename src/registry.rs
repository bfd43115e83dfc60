//! Task records and the registry that holds them.
//!
//! The registry is the only place task state lives. Workers mutate a record
//! through [`TaskRegistry::update`], pollers read clones through
//! [`TaskRegistry::get`]; both go through the same lock so a reader never
//! sees a half-applied update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::{ConvertError, Result};

/// Portion of the progress bar reserved for synthesis; the rest covers assembly.
pub const SYNTHESIS_PROGRESS_SHARE: f64 = 90.0;
pub const COMBINING_PROGRESS: u8 = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(TaskId)
            .map_err(|_| ConvertError::NotFound(format!("task {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Combining,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedChunk {
    pub index: usize,
    pub reason: String,
}

/// Status record of one conversion. This is also the poll snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionTask {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: u8,
    pub current_chunk: usize,
    pub total_chunks: usize,
    pub message: String,
    pub output_file: Option<String>,
    pub error: Option<String>,
    pub skipped_chunks: Vec<SkippedChunk>,
    pub source_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ConversionTask {
    fn new(task_id: TaskId, source_name: &str) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            status: TaskStatus::Queued,
            progress: 0,
            current_chunk: 0,
            total_chunks: 0,
            message: "Waiting for a worker".to_string(),
            output_file: None,
            error: None,
            skipped_chunks: Vec::new(),
            source_name: source_name.to_string(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn start_processing(&mut self) {
        self.status = TaskStatus::Processing;
        self.message = "Preparing text".to_string();
    }

    pub fn set_total_chunks(&mut self, total: usize) {
        self.total_chunks = total;
        self.message = format!("Split text into {} chunks", total);
    }

    pub fn begin_chunk(&mut self, index: usize) {
        self.current_chunk = index;
        self.message = format!("Synthesizing chunk {} of {}", index + 1, self.total_chunks);
    }

    /// Progress after `index` (0-based) has been attempted.
    pub fn finish_chunk(&mut self, index: usize) {
        self.current_chunk = index;
        self.progress = synthesis_progress(index, self.total_chunks);
    }

    pub fn record_skip(&mut self, index: usize, reason: impl Into<String>) {
        self.skipped_chunks.push(SkippedChunk {
            index,
            reason: reason.into(),
        });
    }

    pub fn begin_combining(&mut self) {
        self.status = TaskStatus::Combining;
        self.progress = COMBINING_PROGRESS;
        self.message = "Combining audio segments".to_string();
    }

    pub fn complete(&mut self, output_file: impl Into<String>) {
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.output_file = Some(output_file.into());
        self.error = None;
        self.finished_at = Some(Utc::now());
        self.message = if self.skipped_chunks.is_empty() {
            "Conversion complete".to_string()
        } else {
            format!(
                "Conversion complete with {} of {} chunks skipped",
                self.skipped_chunks.len(),
                self.total_chunks
            )
        };
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.status = TaskStatus::Failed;
        self.output_file = None;
        self.message = format!("Conversion failed: {}", error);
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
    }
}

/// `round((index + 1) / total * 90)`
pub fn synthesis_progress(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let done = (index + 1).min(total) as f64;
    (done / total as f64 * SYNTHESIS_PROGRESS_SHARE).round() as u8
}

/// Process-lifetime store of task records.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, ConversionTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh `queued` record.
    pub fn create(&self, source_name: &str) -> TaskId {
        let task_id = TaskId::new();
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        tasks.insert(task_id, ConversionTask::new(task_id, source_name));
        task_id
    }

    /// Applies `mutator` to a copy of the record and publishes it atomically.
    ///
    /// Terminal records are frozen. Progress never moves backwards, and only
    /// a completed record may report 100.
    pub fn update<F>(&self, task_id: TaskId, mutator: F) -> Result<ConversionTask>
    where
        F: FnOnce(&mut ConversionTask),
    {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let record = tasks
            .get_mut(&task_id)
            .ok_or_else(|| ConvertError::NotFound(format!("task {}", task_id)))?;

        if record.status.is_terminal() {
            return Err(ConvertError::TaskFinalized(task_id));
        }

        let mut next = record.clone();
        mutator(&mut next);

        next.task_id = task_id;
        next.progress = next.progress.max(record.progress).min(100);
        if next.status != TaskStatus::Completed {
            next.progress = next.progress.min(99);
        }
        if !next.status.is_terminal() {
            next.output_file = None;
            next.error = None;
            next.finished_at = None;
        }
        next.updated_at = Utc::now();

        *record = next;
        Ok(record.clone())
    }

    pub fn get(&self, task_id: TaskId) -> Result<ConversionTask> {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| ConvertError::NotFound(format!("task {}", task_id)))
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    /// Removes terminal records that finished before `cutoff`.
    ///
    /// Output files are shared by name, so only files that no remaining
    /// record points at are reported as orphaned.
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> Eviction {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let expired: Vec<TaskId> = tasks
            .values()
            .filter(|task| task.status.is_terminal())
            .filter(|task| task.finished_at.is_some_and(|at| at < cutoff))
            .map(|task| task.task_id)
            .collect();

        let evicted: Vec<ConversionTask> = expired
            .into_iter()
            .filter_map(|task_id| tasks.remove(&task_id))
            .collect();

        let claimed: HashSet<&str> = tasks
            .values()
            .filter_map(|task| task.output_file.as_deref())
            .collect();
        let mut orphaned_outputs: Vec<String> = evicted
            .iter()
            .filter_map(|task| task.output_file.clone())
            .filter(|name| !claimed.contains(name.as_str()))
            .collect();
        orphaned_outputs.sort();
        orphaned_outputs.dedup();

        Eviction {
            task_ids: evicted.iter().map(|task| task.task_id).collect(),
            orphaned_outputs,
        }
    }
}

/// Result of a retention sweep over the registry.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub task_ids: Vec<TaskId>,
    pub orphaned_outputs: Vec<String>,
}
