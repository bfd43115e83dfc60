//! Error taxonomy for the conversion pipeline.

use thiserror::Error;

use crate::registry::TaskId;

#[derive(Debug, Error)]
pub enum ConvertError {
    /// Malformed input, rejected before anything enters the pipeline.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A single chunk could not be synthesized. The worker skips it.
    #[error("Synthesis failed for chunk {index}: {message}")]
    ChunkSynthesis { index: usize, message: String },

    /// The engine ran but did not produce usable audio.
    #[error("TTS engine error: {0}")]
    Engine(String),

    /// The TTS engine (or whatever it runs on) could not be brought up.
    #[error("Engine initialization failed: {0}")]
    ResourceInit(String),

    #[error("Audio assembly failed: {0}")]
    Assembly(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Task {0} has already finished")]
    TaskFinalized(TaskId),

    #[error("Failed to read EPUB: {0}")]
    Epub(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl ConvertError {
    /// Only per-chunk synthesis failures are absorbed by the worker.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ConvertError::ChunkSynthesis { .. })
    }

    pub(crate) fn synthesis(index: usize, message: impl Into<String>) -> Self {
        ConvertError::ChunkSynthesis {
            index,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
