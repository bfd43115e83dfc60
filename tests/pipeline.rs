#![cfg(unix)]

use audiobook_pipeline::{
    Chunker, Config, ConversionTask, ConvertError, EngineFactory, Orchestrator, SpeechEngine,
    TaskId, TaskStatus,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct ToneEngine;

impl SpeechEngine for ToneEngine {
    fn synthesize(&mut self, text: &str) -> audiobook_pipeline::Result<Vec<Vec<f32>>> {
        if text.contains("unpronounceable") {
            return Err(ConvertError::Engine("cannot say that".to_string()));
        }
        let samples = (0..text.len() * 100)
            .map(|i| (i as f32 * 0.05).sin() * 0.3)
            .collect();
        Ok(vec![samples])
    }
}

struct ToneFactory;

impl EngineFactory for ToneFactory {
    fn name(&self) -> &str {
        "tone"
    }

    fn create(&self) -> audiobook_pipeline::Result<Box<dyn SpeechEngine>> {
        Ok(Box::new(ToneEngine))
    }
}

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("ffmpeg");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Writes a placeholder file at the output path (the last argument).
fn working_ffmpeg(dir: &Path) -> PathBuf {
    write_script(dir, "for out in \"$@\"; do :; done\nprintf 'ID3fake' > \"$out\"")
}

fn broken_ffmpeg(dir: &Path) -> PathBuf {
    write_script(dir, "echo 'Invalid data found when processing input' >&2\nexit 1")
}

/// Starts writing the output, then stops responding.
fn stalling_ffmpeg(dir: &Path) -> PathBuf {
    write_script(dir, "for out in \"$@\"; do :; done\nprintf 'PARTIAL' > \"$out\"\nsleep 30")
}

/// Writes a few bytes of output, then fails.
fn truncating_ffmpeg(dir: &Path) -> PathBuf {
    write_script(dir, "for out in \"$@\"; do :; done\nprintf 'X' > \"$out\"\nexit 1")
}

struct Harness {
    tools: TempDir,
    root: TempDir,
    orchestrator: Orchestrator,
}

impl Harness {
    fn new(ffmpeg: fn(&Path) -> PathBuf) -> Self {
        Self::with_timeout(ffmpeg, 20)
    }

    fn with_timeout(ffmpeg: fn(&Path) -> PathBuf, assembly_timeout_secs: u64) -> Self {
        let tools = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let config = Config {
            chunk_size: 30,
            output_dir: root.path().join("audiobooks"),
            work_dir: root.path().join("work"),
            ffmpeg_path: ffmpeg(tools.path()),
            assembly_timeout_secs,
            ..Default::default()
        };
        let orchestrator = Orchestrator::with_factory(&config, Arc::new(ToneFactory)).unwrap();
        Self {
            tools,
            root,
            orchestrator,
        }
    }

    async fn watch(&self, task_id: TaskId) -> Vec<ConversionTask> {
        let mut history = Vec::new();
        for _ in 0..2000 {
            let task = self.orchestrator.poll(task_id).unwrap();
            let done = task.status.is_terminal();
            history.push(task);
            if done {
                return history;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {} never finished", task_id);
    }

    fn work_dir(&self, task_id: TaskId) -> PathBuf {
        self.root.path().join("work").join(task_id.to_string())
    }
}

fn assert_well_formed(history: &[ConversionTask]) {
    for pair in history.windows(2) {
        assert!(pair[1].progress >= pair[0].progress, "progress went backwards");
    }
    for task in history {
        assert_eq!(task.progress == 100, task.status == TaskStatus::Completed);
        assert!(!(task.output_file.is_some() && task.error.is_some()));
        if !task.status.is_terminal() {
            assert!(task.output_file.is_none() && task.error.is_none());
        }
    }
}

#[test]
fn chunker_scenario() {
    let chunks = Chunker::new()
        .split("Hello there. How are you? I am fine.", 15)
        .unwrap();
    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, ["Hello there.", "How are you?", "I am fine."]);
}

#[tokio::test]
async fn short_book_completes() {
    let harness = Harness::new(working_ffmpeg);
    let task_id = harness.orchestrator.submit("Some text.", "book.epub").unwrap();

    let history = harness.watch(task_id).await;
    assert_well_formed(&history);

    let last = history.last().unwrap();
    assert_eq!(last.status, TaskStatus::Completed);
    assert_eq!(last.progress, 100);
    assert_eq!(last.output_file.as_deref(), Some("book_audiobook.mp3"));

    let stream = harness.orchestrator.fetch("book_audiobook.mp3").await.unwrap();
    assert_eq!(stream.content_type, "audio/mpeg");
    assert_eq!(stream.len, 7);
    assert!(!harness.work_dir(task_id).exists());
}

#[tokio::test]
async fn long_text_moves_through_every_phase() {
    let harness = Harness::new(working_ffmpeg);
    let text = "The ship left the harbour at dawn. Gulls followed it out. \
                By noon the coast was a grey line. Nobody on deck spoke. "
        .repeat(10);
    let task_id = harness.orchestrator.submit(&text, "voyage.txt").unwrap();

    let history = harness.watch(task_id).await;
    assert_well_formed(&history);

    let last = history.last().unwrap();
    assert_eq!(last.status, TaskStatus::Completed);
    assert_eq!(last.output_file.as_deref(), Some("voyage_audiobook.mp3"));
    assert_eq!(last.current_chunk + 1, last.total_chunks);
    assert!(last.total_chunks > 10);
    assert!(harness
        .root
        .path()
        .join("audiobooks/voyage_audiobook.mp3")
        .exists());
}

#[tokio::test]
async fn degraded_output_is_flagged() {
    let harness = Harness::new(working_ffmpeg);
    let task_id = harness
        .orchestrator
        .submit(
            "A normal opening line. Something unpronounceable here. A normal ending.",
            "odd.txt",
        )
        .unwrap();

    let last = harness.watch(task_id).await.pop().unwrap();
    assert_eq!(last.status, TaskStatus::Completed);
    assert_eq!(last.skipped_chunks.len(), 1);
    assert_eq!(last.skipped_chunks[0].index, 1);
    assert!(last.skipped_chunks[0].reason.contains("cannot say that"));
}

#[tokio::test]
async fn every_chunk_failing_fails_the_task() {
    let harness = Harness::new(working_ffmpeg);
    let task_id = harness
        .orchestrator
        .submit("Totally unpronounceable.", "bad.txt")
        .unwrap();

    let history = harness.watch(task_id).await;
    assert_well_formed(&history);

    let last = history.last().unwrap();
    assert_eq!(last.status, TaskStatus::Failed);
    assert!(last.output_file.is_none());
    assert!(last.error.as_deref().is_some_and(|e| !e.is_empty()));
}

#[tokio::test]
async fn assembly_failure_preserves_intermediates() {
    let harness = Harness::new(broken_ffmpeg);
    let task_id = harness
        .orchestrator
        .submit("First sentence here. Second sentence here.", "book.epub")
        .unwrap();

    let last = harness.watch(task_id).await.pop().unwrap();
    assert_eq!(last.status, TaskStatus::Failed);
    let error = last.error.unwrap();
    assert!(error.contains("exit code 1"), "{}", error);
    assert!(error.contains("Invalid data found"), "{}", error);

    let work_dir = harness.work_dir(task_id);
    assert!(work_dir.join("chunk_0000.wav").exists());
    assert!(work_dir.join("chunk_0001.wav").exists());
    assert!(work_dir.join("manifest.txt").exists());
    assert!(matches!(
        harness.orchestrator.fetch("book_audiobook.mp3").await,
        Err(ConvertError::NotFound(_))
    ));
}

#[tokio::test]
async fn timed_out_assembly_leaves_nothing_to_fetch() {
    let harness = Harness::with_timeout(stalling_ffmpeg, 1);
    let task_id = harness.orchestrator.submit("Some text.", "book.epub").unwrap();

    let last = harness.watch(task_id).await.pop().unwrap();
    assert_eq!(last.status, TaskStatus::Failed);
    assert!(last.error.unwrap().contains("timed out"));
    assert!(matches!(
        harness.orchestrator.fetch("book_audiobook.mp3").await,
        Err(ConvertError::NotFound(_))
    ));
}

#[tokio::test]
async fn failing_task_keeps_an_earlier_book_intact() {
    let harness = Harness::new(working_ffmpeg);
    let first = harness.orchestrator.submit("Some text.", "book.epub").unwrap();
    assert_eq!(
        harness.watch(first).await.pop().unwrap().status,
        TaskStatus::Completed
    );

    truncating_ffmpeg(harness.tools.path());
    let second = harness.orchestrator.submit("Other text.", "book.epub").unwrap();
    assert_eq!(
        harness.watch(second).await.pop().unwrap().status,
        TaskStatus::Failed
    );

    let delivered = std::fs::read(harness.root.path().join("audiobooks/book_audiobook.mp3")).unwrap();
    assert_eq!(delivered, b"ID3fake");
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let harness = Harness::new(working_ffmpeg);
    let result = "nonexistent-id"
        .parse::<TaskId>()
        .and_then(|task_id| harness.orchestrator.poll(task_id));
    assert!(matches!(result, Err(ConvertError::NotFound(_))));
    assert!(matches!(
        harness.orchestrator.poll(TaskId::new()),
        Err(ConvertError::NotFound(_))
    ));
}

#[tokio::test]
async fn concurrent_submissions_all_finish() {
    let harness = Harness::new(working_ffmpeg);
    let ids: Vec<TaskId> = (0..5)
        .map(|i| {
            harness
                .orchestrator
                .submit("One line of text. Another line of text.", &format!("book{}.txt", i))
                .unwrap()
        })
        .collect();

    harness.orchestrator.shutdown().await;

    for (i, task_id) in ids.into_iter().enumerate() {
        let task = harness.orchestrator.poll(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.output_file, Some(format!("book{}_audiobook.mp3", i)));
    }
}
