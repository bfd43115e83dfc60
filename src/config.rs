use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConvertError, Result};

/// Sample rate every synthesized segment is persisted at.
pub const SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunk_size: usize,
    pub output_format: AudioFormat,
    pub bitrate_kbps: u32,
    pub voice: String,
    pub voice_speed: f32,
    pub voice_pitch: f32,
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub assembly_timeout_secs: u64,
    pub engine_policy: EnginePolicy,
    pub engine_pool_size: usize,
    pub max_concurrent_tasks: usize,
    pub retention_secs: Option<u64>,
    pub preprocessing_aggressive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Vorbis,
}

/// How TTS engine instances are shared between tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnginePolicy {
    /// One pool of `engine_pool_size` instances shared by every task.
    Shared,
    /// Every task brings up its own private instance.
    PerTask,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            output_format: AudioFormat::Mp3,
            bitrate_kbps: 192,
            voice: "en".to_string(),
            voice_speed: 1.0,
            voice_pitch: 1.0,
            output_dir: PathBuf::from("./audiobooks"),
            work_dir: PathBuf::from("./work"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            assembly_timeout_secs: 600,
            engine_policy: EnginePolicy::Shared,
            engine_pool_size: 1,
            max_concurrent_tasks: num_cpus::get(),
            retention_secs: None,
            preprocessing_aggressive: true,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("chunk_size", self.chunk_size as u64),
            ("engine_pool_size", self.engine_pool_size as u64),
            ("max_concurrent_tasks", self.max_concurrent_tasks as u64),
            ("assembly_timeout_secs", self.assembly_timeout_secs),
            ("bitrate_kbps", u64::from(self.bitrate_kbps)),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConvertError::InvalidArgument(format!(
                    "{} must be greater than zero",
                    key
                )));
            }
        }
        if !(self.voice_speed > 0.0 && self.voice_pitch > 0.0) {
            return Err(ConvertError::InvalidArgument(
                "voice_speed and voice_pitch must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn assembly_timeout(&self) -> Duration {
        Duration::from_secs(self.assembly_timeout_secs)
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention_secs.map(Duration::from_secs)
    }
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Vorbis => "ogg",
        }
    }

    /// ffmpeg encoder name.
    pub fn codec(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "libmp3lame",
            AudioFormat::Vorbis => "libvorbis",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Vorbis => "audio/ogg",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "vorbis" | "ogg" => Some(AudioFormat::Vorbis),
            _ => None,
        }
    }
}

impl EnginePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "shared" => Some(EnginePolicy::Shared),
            "per-task" => Some(EnginePolicy::PerTask),
            _ => None,
        }
    }
}
