use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::{Config, SAMPLE_RATE};
use crate::engine::{EngineFactory, SpeechEngine};
use crate::error::{ConvertError, Result};

const ENGINES: [&str; 2] = ["espeak-ng", "espeak"];

/// Brings up an espeak-ng (or classic espeak) engine found on `PATH`.
pub struct EspeakFactory {
    voice: String,
    voice_speed: f32,
    voice_pitch: f32,
}

impl EspeakFactory {
    pub fn new(config: &Config) -> Self {
        Self {
            voice: config.voice.clone(),
            voice_speed: config.voice_speed,
            voice_pitch: config.voice_pitch,
        }
    }
}

impl EngineFactory for EspeakFactory {
    fn name(&self) -> &str {
        "espeak"
    }

    fn create(&self) -> Result<Box<dyn SpeechEngine>> {
        let program = ENGINES
            .iter()
            .find(|engine| tool_available(engine))
            .ok_or_else(|| {
                ConvertError::ResourceInit(
                    "No TTS engine found. Please install espeak-ng or espeak".to_string(),
                )
            })?;

        log::debug!("Using {} for synthesis", program);
        Ok(Box::new(EspeakEngine {
            program: program.to_string(),
            voice: self.voice.clone(),
            words_per_minute: (self.voice_speed * 175.0) as u32,
            pitch: ((self.voice_pitch * 50.0) as u32).min(99),
        }))
    }
}

pub struct EspeakEngine {
    program: String,
    voice: String,
    words_per_minute: u32,
    pitch: u32,
}

impl SpeechEngine for EspeakEngine {
    fn synthesize(&mut self, text: &str) -> Result<Vec<Vec<f32>>> {
        let wav = tempfile::Builder::new()
            .prefix("tts-")
            .suffix(".wav")
            .tempfile()?;

        let mut child = Command::new(&self.program)
            .arg("-v")
            .arg(&self.voice)
            .arg("-s")
            .arg(self.words_per_minute.to_string())
            .arg("-p")
            .arg(self.pitch.to_string())
            .arg("-a")
            .arg("100")
            .arg("-w")
            .arg(wav.path())
            .arg("--stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(ConvertError::Engine(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let samples = read_wav(wav.path())?;
        if samples.is_empty() {
            return Err(ConvertError::Engine(format!(
                "{} produced no audio",
                self.program
            )));
        }
        Ok(vec![samples])
    }
}

fn tool_available(tool: &str) -> bool {
    Command::new("which")
        .arg(tool)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Reads a WAV file as mono `f32` at [`SAMPLE_RATE`].
fn read_wav(path: &Path) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|s| s as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let channels = usize::from(spec.channels.max(1));
    let mono: Vec<f32> = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(resample_linear(&mono, spec.sample_rate, SAMPLE_RATE))
}

fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let position = i as f64 * ratio;
            let left = (position.floor() as usize).min(last);
            let right = (left + 1).min(last);
            let fraction = (position - left as f64) as f32;
            samples[left] + (samples[right] - samples[left]) * fraction
        })
        .collect()
}
