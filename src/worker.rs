//! Drives one task from raw text to a finished audiobook.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::assembler::{self, Assembler};
use crate::chunker::{Chunker, TextChunk};
use crate::config::Config;
use crate::engine::{EnginePool, EngineProvisioning};
use crate::error::{ConvertError, Result};
use crate::registry::{ConversionTask, TaskId, TaskRegistry};
use crate::segment::AudioSegment;

/// Everything a worker needs to know about one submission.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub task_id: TaskId,
    pub text: String,
    pub output_name: String,
}

pub struct ConversionWorker {
    registry: Arc<TaskRegistry>,
    engines: EngineProvisioning,
    chunker: Chunker,
    assembler: Assembler,
    chunk_size: usize,
    work_dir: PathBuf,
    output_dir: PathBuf,
    output_lock: Arc<Mutex<()>>,
}

impl ConversionWorker {
    pub fn new(config: &Config, registry: Arc<TaskRegistry>, engines: EngineProvisioning) -> Self {
        Self {
            registry,
            engines,
            chunker: Chunker::new(),
            assembler: Assembler::new(config),
            chunk_size: config.chunk_size,
            work_dir: config.work_dir.clone(),
            output_dir: config.output_dir.clone(),
            output_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Held while a finished file enters the output store and its task is
    /// marked completed. Retention sweeps take it too.
    pub(crate) fn output_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.output_lock)
    }

    /// Runs the job to a terminal state. Failures end up on the task record,
    /// never with the caller.
    pub async fn run(&self, job: ConversionJob) {
        let task_id = job.task_id;
        if let Err(e) = self.convert(&job).await {
            log::error!("Task {} failed: {}", task_id, e);
            let message = e.to_string();
            self.record(task_id, |task| task.fail(message));
        }
    }

    async fn convert(&self, job: &ConversionJob) -> Result<()> {
        let task_id = job.task_id;
        self.record(task_id, ConversionTask::start_processing);
        log::info!("Task {} processing", task_id);

        let pool = self.engines.pool_for_task();
        pool.warm_up().await?;

        let chunks = self.chunker.split(&job.text, self.chunk_size)?;
        if chunks.is_empty() {
            return Err(ConvertError::InvalidArgument(
                "text contains nothing to synthesize".to_string(),
            ));
        }
        let total = chunks.len();
        self.record(task_id, |task| task.set_total_chunks(total));
        log::info!("Task {} split into {} chunks", task_id, total);

        let work_dir = self.work_dir.join(task_id.to_string());
        tokio::fs::create_dir_all(&work_dir).await?;

        let mut segments = Vec::with_capacity(total);
        for chunk in &chunks {
            self.record(task_id, |task| task.begin_chunk(chunk.index));

            match self.synthesize_chunk(&pool, chunk, &work_dir).await {
                Ok(segment) => segments.push(segment),
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => {
                    log::warn!("Task {}: skipping chunk {}: {}", task_id, chunk.index, e);
                    let reason = e.to_string();
                    self.record(task_id, |task| task.record_skip(chunk.index, reason));
                }
            }

            self.record(task_id, |task| task.finish_chunk(chunk.index));
        }

        if segments.is_empty() {
            return Err(ConvertError::Engine(format!(
                "all {} chunks failed to synthesize",
                total
            )));
        }
        if segments.len() < total {
            log::warn!(
                "Task {}: {} of {} chunks skipped",
                task_id,
                total - segments.len(),
                total
            );
        }

        self.record(task_id, ConversionTask::begin_combining);
        log::info!("Task {} combining {} segments", task_id, segments.len());

        let encoded = self
            .assembler
            .assemble(&segments, &work_dir, &job.output_name)
            .await?;

        let output = self.output_dir.join(&job.output_name);
        {
            let _store = self.output_lock.lock().await;
            assembler::publish(&encoded, &output).await?;
            self.record(task_id, |task| task.complete(job.output_name.as_str()));
        }

        if let Err(e) = tokio::fs::remove_dir(&work_dir).await {
            log::debug!("Leaving {}: {}", work_dir.display(), e);
        }

        log::info!("Task {} completed: {}", task_id, output.display());
        Ok(())
    }

    async fn synthesize_chunk(
        &self,
        pool: &EnginePool,
        chunk: &TextChunk,
        work_dir: &Path,
    ) -> Result<AudioSegment> {
        let mut lease = pool.acquire().await?;
        let index = chunk.index;
        let text = chunk.text.clone();
        let dir = work_dir.to_path_buf();

        let result = tokio::task::spawn_blocking(move || {
            let buffers = lease.synthesize(&text)?;
            drop(lease);
            if buffers.iter().all(Vec::is_empty) {
                return Err(ConvertError::Engine("engine returned no audio".to_string()));
            }
            AudioSegment::write(&dir, index, &buffers)
        })
        .await
        .map_err(|e| ConvertError::synthesis(index, e.to_string()))?;

        result.map_err(|e| match e {
            ConvertError::ResourceInit(_) | ConvertError::ChunkSynthesis { .. } => e,
            other => ConvertError::synthesis(index, other.to_string()),
        })
    }

    fn record<F>(&self, task_id: TaskId, mutator: F)
    where
        F: FnOnce(&mut ConversionTask),
    {
        if let Err(e) = self.registry.update(task_id, mutator) {
            log::warn!("Could not update task {}: {}", task_id, e);
        }
    }
}
