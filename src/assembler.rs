//! Merges per-chunk WAV segments into the final compressed audiobook.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::fs;
use tokio::process::Command;

use crate::config::{AudioFormat, Config};
use crate::error::{ConvertError, Result};
use crate::segment::AudioSegment;

pub const MANIFEST_NAME: &str = "manifest.txt";

/// Keeps error messages readable when ffmpeg is chatty.
const STDERR_TAIL: usize = 500;

pub struct Assembler {
    ffmpeg: PathBuf,
    format: AudioFormat,
    bitrate_kbps: u32,
    timeout: Duration,
}

impl Assembler {
    pub fn new(config: &Config) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            format: config.output_format,
            bitrate_kbps: config.bitrate_kbps,
            timeout: config.assembly_timeout(),
        }
    }

    /// ffmpeg arguments: concat-demux the manifest, encode at a fixed bitrate.
    pub fn arguments(&self, manifest: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-y",
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(manifest.as_os_str().to_owned());
        args.push("-c:a".into());
        args.push(self.format.codec().into());
        args.push("-b:a".into());
        args.push(format!("{}k", self.bitrate_kbps).into());
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Writes the manifest into `work_dir` and has ffmpeg encode
    /// `work_dir/<output_name>`. On success the segments and the manifest are
    /// removed and the encoded path is returned. On failure everything,
    /// including any partial encode, is left in place.
    pub async fn assemble(
        &self,
        segments: &[AudioSegment],
        work_dir: &Path,
        output_name: &str,
    ) -> Result<PathBuf> {
        if segments.is_empty() {
            return Err(ConvertError::Assembly(
                "there are no audio segments to combine".to_string(),
            ));
        }

        let mut ordered: Vec<&AudioSegment> = segments.iter().collect();
        ordered.sort_by_key(|segment| segment.ordinal);

        let manifest = work_dir.join(MANIFEST_NAME);
        fs::write(&manifest, render_manifest(&ordered).await?).await?;

        let encoded = work_dir.join(output_name);
        self.run_ffmpeg(&manifest, &encoded).await?;

        for segment in &ordered {
            if let Err(e) = fs::remove_file(&segment.path).await {
                log::warn!("Could not remove {}: {}", segment.path.display(), e);
            }
        }
        fs::remove_file(&manifest).await?;

        Ok(encoded)
    }

    async fn run_ffmpeg(&self, manifest: &Path, output: &Path) -> Result<()> {
        let args = self.arguments(manifest, output);
        log::debug!("Running {} {:?}", self.ffmpeg.display(), args);

        let child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ConvertError::Assembly(format!("could not start {}: {}", self.ffmpeg.display(), e))
            })?;

        let result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ConvertError::Assembly(format!(
                    "{} timed out after {:?}",
                    self.ffmpeg.display(),
                    self.timeout
                )))
            }
        };

        log::debug!("{} finished with {}", self.ffmpeg.display(), result.status);
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let stderr = stderr.trim();
            let tail_start = stderr
                .char_indices()
                .rev()
                .nth(STDERR_TAIL)
                .map_or(0, |(index, _)| index);
            let exit = match result.status.code() {
                Some(code) => format!("exit code {}", code),
                None => "termination by signal".to_string(),
            };
            return Err(ConvertError::Assembly(format!(
                "{} failed with {}: {}",
                self.ffmpeg.display(),
                exit,
                &stderr[tail_start..]
            )));
        }

        Ok(())
    }
}

/// One concat-demuxer line per segment, absolute paths, single quotes escaped.
async fn render_manifest(ordered: &[&AudioSegment]) -> Result<String> {
    let mut manifest = String::new();
    for segment in ordered {
        let path = fs::canonicalize(&segment.path).await?;
        let escaped = path.to_string_lossy().replace('\'', r"'\''");
        manifest.push_str(&format!("file '{}'\n", escaped));
    }
    Ok(manifest)
}

/// Moves a finished encode into the output store. Across filesystems the
/// file is copied to a hidden name first, so `output` only ever appears
/// complete.
pub async fn publish(encoded: &Path, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).await?;
    }

    if let Err(e) = fs::rename(encoded, output).await {
        log::debug!("Rename into the output store failed ({}), copying", e);
        let file_name = output
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = output.with_file_name(format!(".{}.partial", file_name));
        fs::copy(encoded, &staging).await?;
        fs::rename(&staging, output).await?;
        fs::remove_file(encoded).await?;
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{fake_ffmpeg, FakeFfmpeg};

    fn segments(dir: &Path, ordinals: &[usize]) -> Vec<AudioSegment> {
        ordinals
            .iter()
            .map(|&ordinal| AudioSegment::write(dir, ordinal, &[vec![0.1; 240]]).unwrap())
            .collect()
    }

    fn assembler(ffmpeg: PathBuf, timeout: Duration) -> Assembler {
        Assembler {
            ffmpeg,
            format: AudioFormat::Mp3,
            bitrate_kbps: 128,
            timeout,
        }
    }

    #[test]
    fn arguments_are_a_plain_vector() {
        let assembler = assembler(PathBuf::from("ffmpeg"), Duration::from_secs(1));
        let args = assembler.arguments(Path::new("/w/manifest.txt"), Path::new("/o/it's; rm -rf.mp3"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args[args.len() - 1], "/o/it's; rm -rf.mp3");
        assert!(args.windows(2).any(|w| w == ["-b:a", "128k"]));
        assert!(args.windows(2).any(|w| w == ["-c:a", "libmp3lame"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/w/manifest.txt"]));
    }

    #[tokio::test]
    async fn success_removes_intermediates() {
        let tools = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(tools.path(), FakeFfmpeg::CopyManifest);

        let segments = segments(work.path(), &[5, 0, 2]);
        let encoded = assembler(ffmpeg, Duration::from_secs(10))
            .assemble(&segments, work.path(), "book_audiobook.mp3")
            .await
            .unwrap();
        assert_eq!(encoded, work.path().join("book_audiobook.mp3"));

        // The stand-in copies the manifest into the output file.
        let manifest = std::fs::read_to_string(&encoded).unwrap();
        let lines: Vec<&str> = manifest.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("chunk_0000.wav'"));
        assert!(lines[1].ends_with("chunk_0002.wav'"));
        assert!(lines[2].ends_with("chunk_0005.wav'"));

        assert!(segments.iter().all(|s| !s.path.exists()));
        assert!(!work.path().join(MANIFEST_NAME).exists());
    }

    #[tokio::test]
    async fn failure_keeps_intermediates() {
        let tools = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(tools.path(), FakeFfmpeg::Exit(3));

        let segments = segments(work.path(), &[0, 1]);
        let err = assembler(ffmpeg, Duration::from_secs(10))
            .assemble(&segments, work.path(), "out.mp3")
            .await
            .unwrap_err();

        assert!(matches!(&err, ConvertError::Assembly(msg) if msg.contains("exit code 3")));
        assert!(err.to_string().contains("encoder exploded"));
        assert!(segments.iter().all(|s| s.path.exists()));
        assert!(work.path().join(MANIFEST_NAME).exists());
    }

    #[tokio::test]
    async fn partial_encode_stays_in_the_work_dir() {
        let tools = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(tools.path(), FakeFfmpeg::Truncate);

        let segments = segments(work.path(), &[0, 1]);
        let err = assembler(ffmpeg, Duration::from_secs(10))
            .assemble(&segments, work.path(), "out.mp3")
            .await
            .unwrap_err();

        assert!(matches!(err, ConvertError::Assembly(_)));
        let partial = std::fs::read_to_string(work.path().join("out.mp3")).unwrap();
        assert_eq!(partial, "PARTIAL");
        assert!(segments.iter().all(|s| s.path.exists()));
    }

    #[tokio::test]
    async fn hung_tool_times_out() {
        let tools = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(tools.path(), FakeFfmpeg::Hang);

        let segments = segments(work.path(), &[0]);
        let err = assembler(ffmpeg, Duration::from_millis(200))
            .assemble(&segments, work.path(), "out.mp3")
            .await
            .unwrap_err();

        assert!(matches!(&err, ConvertError::Assembly(msg) if msg.contains("timed out")));
        assert!(segments[0].path.exists());
    }

    #[tokio::test]
    async fn missing_tool_is_an_assembly_error() {
        let work = tempfile::tempdir().unwrap();
        let segments = segments(work.path(), &[0]);
        let err = assembler(work.path().join("no-such-ffmpeg"), Duration::from_secs(1))
            .assemble(&segments, work.path(), "out.mp3")
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Assembly(_)));
    }

    #[tokio::test]
    async fn nothing_to_assemble() {
        let work = tempfile::tempdir().unwrap();
        let err = assembler(PathBuf::from("ffmpeg"), Duration::from_secs(1))
            .assemble(&[], work.path(), "out.mp3")
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Assembly(_)));
    }

    #[tokio::test]
    async fn publish_moves_the_encode_into_the_store() {
        let work = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        let encoded = work.path().join("book_audiobook.mp3");
        std::fs::write(&encoded, "AUDIO").unwrap();

        let output = store.path().join("nested/book_audiobook.mp3");
        publish(&encoded, &output).await.unwrap();

        assert_eq!(std::fs::read_to_string(&output).unwrap(), "AUDIO");
        assert!(!encoded.exists());
    }
}
