use std::path::{Path, PathBuf};

use crate::config::SAMPLE_RATE;
use crate::error::Result;

/// One chunk's synthesized audio, persisted as a WAV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    pub ordinal: usize,
    pub path: PathBuf,
    pub sample_rate: u32,
    pub sample_count: usize,
}

impl AudioSegment {
    pub fn file_name(ordinal: usize) -> String {
        format!("chunk_{:04}.wav", ordinal)
    }

    /// Concatenates `buffers` and writes them as 16-bit mono PCM.
    pub fn write(dir: &Path, ordinal: usize, buffers: &[Vec<f32>]) -> Result<Self> {
        let samples = concatenate(buffers);
        let path = dir.join(Self::file_name(ordinal));

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)?;
        for sample in &samples {
            writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;

        Ok(Self {
            ordinal,
            path,
            sample_rate: SAMPLE_RATE,
            sample_count: samples.len(),
        })
    }
}

pub fn concatenate(buffers: &[Vec<f32>]) -> Vec<f32> {
    let total = buffers.iter().map(Vec::len).sum();
    let mut samples = Vec::with_capacity(total);
    for buffer in buffers {
        samples.extend_from_slice(buffer);
    }
    samples
}
