//! The TTS engine seam and the pool that rations engine instances.

use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::EnginePolicy;
use crate::error::{ConvertError, Result};

/// Turns text into raw mono samples at [`crate::config::SAMPLE_RATE`].
///
/// Calls block; the worker runs them on the blocking thread pool.
pub trait SpeechEngine: Send {
    /// May return the audio as several buffers; they are played back to back.
    fn synthesize(&mut self, text: &str) -> Result<Vec<Vec<f32>>>;
}

/// Brings up engine instances. Failure here is a [`ConvertError::ResourceInit`].
pub trait EngineFactory: Send + Sync {
    fn name(&self) -> &str;
    fn create(&self) -> Result<Box<dyn SpeechEngine>>;
}

type IdleEngines = Arc<Mutex<Vec<Box<dyn SpeechEngine>>>>;

/// At most `capacity` engine instances, created lazily and reused.
pub struct EnginePool {
    factory: Arc<dyn EngineFactory>,
    idle: IdleEngines,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl EnginePool {
    pub fn new(factory: Arc<dyn EngineFactory>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            factory,
            idle: Arc::new(Mutex::new(Vec::with_capacity(capacity))),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Waits for a free slot, then hands out an idle engine or builds one.
    pub async fn acquire(&self) -> Result<EngineLease> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ConvertError::ResourceInit("engine pool is closed".to_string()))?;

        let idle = self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop();
        let engine = match idle {
            Some(engine) => engine,
            None => {
                log::info!("Starting {} engine instance", self.factory.name());
                let factory = Arc::clone(&self.factory);
                tokio::task::spawn_blocking(move || factory.create())
                    .await
                    .map_err(|e| ConvertError::ResourceInit(e.to_string()))??
            }
        };

        Ok(EngineLease {
            engine: Some(engine),
            idle: Arc::clone(&self.idle),
            _permit: permit,
        })
    }

    /// Makes sure at least one engine can be brought up.
    pub async fn warm_up(&self) -> Result<()> {
        self.acquire().await.map(drop)
    }
}

/// Exclusive use of one engine. Dropping the lease returns the engine.
pub struct EngineLease {
    engine: Option<Box<dyn SpeechEngine>>,
    idle: IdleEngines,
    _permit: OwnedSemaphorePermit,
}

impl EngineLease {
    pub fn synthesize(&mut self, text: &str) -> Result<Vec<Vec<f32>>> {
        match self.engine.as_mut() {
            Some(engine) => engine.synthesize(text),
            None => Err(ConvertError::ResourceInit(
                "engine lease already released".to_string(),
            )),
        }
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.idle
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(engine);
        }
    }
}

/// Where a task gets its engines from.
#[derive(Clone)]
pub enum EngineProvisioning {
    Shared(Arc<EnginePool>),
    PerTask(Arc<dyn EngineFactory>),
}

impl EngineProvisioning {
    pub fn new(policy: EnginePolicy, factory: Arc<dyn EngineFactory>, pool_size: usize) -> Self {
        match policy {
            EnginePolicy::Shared => {
                EngineProvisioning::Shared(Arc::new(EnginePool::new(factory, pool_size)))
            }
            EnginePolicy::PerTask => EngineProvisioning::PerTask(factory),
        }
    }

    /// The pool a single task should draw from for its whole lifetime.
    pub fn pool_for_task(&self) -> Arc<EnginePool> {
        match self {
            EngineProvisioning::Shared(pool) => Arc::clone(pool),
            EngineProvisioning::PerTask(factory) => Arc::new(EnginePool::new(Arc::clone(factory), 1)),
        }
    }
}
