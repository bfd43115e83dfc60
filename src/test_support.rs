//! Stand-ins for the external collaborators, shared by the unit tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::engine::{EngineFactory, SpeechEngine};
use crate::error::{ConvertError, Result};

/// Shell snippet that writes `PARTIAL` to the last argument.
#[cfg(unix)]
const WRITE_PARTIAL: &str = "for out in \"$@\"; do :; done\nprintf PARTIAL > \"$out\"";

/// Behaviour of the scripted ffmpeg replacement.
pub(crate) enum FakeFfmpeg {
    /// Copies the concat manifest to the output path.
    CopyManifest,
    /// Prints to stderr and exits with the given code.
    Exit(i32),
    /// Writes `PARTIAL` to the output path, then exits 1.
    Truncate,
    /// Writes `PARTIAL` to the output path, then never returns.
    Hang,
}

#[cfg(unix)]
pub(crate) fn fake_ffmpeg(dir: &Path, behaviour: FakeFfmpeg) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let body = match behaviour {
        FakeFfmpeg::CopyManifest => r#"manifest=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then manifest="$arg"; fi
  prev="$arg"
done
cp "$manifest" "$prev""#
            .to_string(),
        FakeFfmpeg::Exit(code) => format!("echo 'encoder exploded' >&2\nexit {}", code),
        FakeFfmpeg::Truncate => format!("{}\nexit 1", WRITE_PARTIAL),
        FakeFfmpeg::Hang => format!("{}\nsleep 30", WRITE_PARTIAL),
    };

    let path = dir.join("ffmpeg");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Engine factory whose engines fail on any text containing `FAIL`.
#[derive(Default)]
pub(crate) struct ScriptedFactory {
    pub broken: bool,
    pub delay: Duration,
    pub created: AtomicUsize,
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn working() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            broken: true,
            ..Default::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }
}

impl EngineFactory for ScriptedFactory {
    fn name(&self) -> &str {
        "scripted"
    }

    fn create(&self) -> Result<Box<dyn SpeechEngine>> {
        if self.broken {
            return Err(ConvertError::ResourceInit("no accelerator found".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEngine {
            delay: self.delay,
            active: Arc::clone(&self.active),
            max_active: Arc::clone(&self.max_active),
        }))
    }
}

struct ScriptedEngine {
    delay: Duration,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl SpeechEngine for ScriptedEngine {
    fn synthesize(&mut self, text: &str) -> Result<Vec<Vec<f32>>> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);

        if text.contains("FAIL") {
            return Err(ConvertError::Engine("scripted failure".to_string()));
        }
        Ok(vec![vec![0.1; 120], vec![-0.1; 60]])
    }
}
