//! Asynchronous text-to-audiobook conversion.
//!
//! Text is split into sentence-aligned chunks, each chunk is synthesized by
//! a TTS engine into a WAV segment, and the segments are merged into one
//! compressed file by ffmpeg. Submissions return a [`TaskId`] immediately;
//! progress is polled from the [`TaskRegistry`].

pub mod assembler;
pub mod chunker;
pub mod config;
pub mod engine;
pub mod error;
pub mod espeak;
pub mod extract;
pub mod orchestrator;
pub mod registry;
pub mod segment;
pub mod text;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use crate::chunker::{Chunker, TextChunk};
pub use crate::config::{AudioFormat, Config, EnginePolicy, SAMPLE_RATE};
pub use crate::engine::{EngineFactory, EnginePool, EngineProvisioning, SpeechEngine};
pub use crate::error::{ConvertError, Result};
pub use crate::orchestrator::{output_file_name, AudioStream, Orchestrator};
pub use crate::registry::{
    ConversionTask, Eviction, SkippedChunk, TaskId, TaskRegistry, TaskStatus,
};
