use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant, SystemTime},
};

use crate::{
    credentials,
    error::{GctxError, Result},
};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const SETTLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
struct FileState {
    modified: SystemTime,
    size: u64,
}

impl FileState {
    fn read(path: &Path) -> Option<FileState> {
        let meta = fs::metadata(path).ok()?;
        Some(FileState {
            modified: meta.modified().ok()?,
            size: meta.len(),
        })
    }

    /// Whether `current` signals that a login finished writing since `baseline`.
    fn is_superseded_by(baseline: Option<FileState>, current: Option<FileState>) -> bool {
        match (baseline, current) {
            (None, Some(_)) => true,
            (Some(before), Some(now)) => now.modified > before.modified,
            _ => false,
        }
    }
}

/// Polls the shared ADC file until an out-of-band login has produced fresh,
/// parseable credentials.
#[derive(Debug, Clone)]
pub struct Watcher {
    path: PathBuf,
    interval: Duration,
    settle: Duration,
}

impl Watcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Watcher {
            path: path.into(),
            interval: POLL_INTERVAL,
            settle: SETTLE_DELAY,
        }
    }

    #[cfg(test)]
    pub fn with_timing(mut self, interval: Duration, settle: Duration) -> Self {
        self.interval = interval;
        self.settle = settle;
        self
    }

    /// Block until the file is created or its mtime moves forward and it
    /// validates, or until `timeout` elapses.
    ///
    /// At the deadline a file that already validates counts as success: a
    /// login that changed nothing may never touch the file.
    pub fn wait_for_update(&self, timeout: Duration) -> Result<()> {
        let baseline = FileState::read(&self.path);
        let deadline = Instant::now() + timeout;

        tracing::debug!(
            "watching {} (baseline: {:?}, timeout: {:?})",
            self.path.display(),
            baseline,
            timeout
        );

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(self.interval.min(deadline - now));

            let current = FileState::read(&self.path);
            if !FileState::is_superseded_by(baseline, current) {
                continue;
            }
            if let Some(state) = current {
                tracing::debug!("{} changed ({} bytes)", self.path.display(), state.size);
            }

            // Give a still-running writer a moment to finish.
            thread::sleep(self.settle);
            match credentials::validate(&self.path) {
                Ok(_) => {
                    tracing::debug!("fresh credentials at {}", self.path.display());
                    return Ok(());
                }
                Err(e) => tracing::debug!("change detected but not yet valid: {e}"),
            }
        }

        match credentials::validate(&self.path) {
            Ok(_) => {
                tracing::debug!("no change seen, but {} is already valid", self.path.display());
                Ok(())
            }
            Err(_) => Err(GctxError::Timeout(timeout)),
        }
    }
}
