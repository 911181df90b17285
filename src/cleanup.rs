//! Retrying removal of scratch files.
//!
//! A staged document can be briefly locked after the engine returns
//! (antivirus scanners and Windows file handles are the usual suspects), so a
//! single `remove_file` is not enough. Removal is retried with a linear
//! backoff: 100 ms, 200 ms, 300 ms, … A file that is already gone counts as
//! removed. Running out of attempts is logged and otherwise ignored: cleanup
//! never fails a request.

use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// How often and how patiently to retry a deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Default: 5.
    pub attempts: u32,
    /// Delay unit; attempt `n` (0-based) waits `base * (n + 1)` after failing.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt `attempt` (0-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * (attempt + 1)
    }
}

/// Remove `path`, retrying per `policy`.
///
/// Returns `true` once the file is gone, `false` when every attempt failed.
pub async fn release_with_retry(path: &Path, policy: RetryPolicy) -> bool {
    for attempt in 0..policy.attempts {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Removed staged file");
                return true;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return true,
            Err(e) => {
                if attempt + 1 == policy.attempts {
                    warn_exhausted(path, policy.attempts, &e);
                    return false;
                }
                let delay = policy.delay_after(attempt);
                debug!(
                    path = %path.display(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Staged file removal failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
    false
}

/// Blocking twin of [`release_with_retry`], for `Drop` paths and worker threads.
pub fn release_with_retry_blocking(path: &Path, policy: RetryPolicy) -> bool {
    for attempt in 0..policy.attempts {
        match std::fs::remove_file(path) {
            Ok(()) => return true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return true,
            Err(e) => {
                if attempt + 1 == policy.attempts {
                    warn_exhausted(path, policy.attempts, &e);
                    return false;
                }
                std::thread::sleep(policy.delay_after(attempt));
            }
        }
    }
    false
}

fn warn_exhausted(path: &Path, attempts: u32, error: &io::Error) {
    warn!(
        path = %path.display(),
        attempts,
        error = %error,
        "Could not remove staged file; leaving it behind"
    );
}
