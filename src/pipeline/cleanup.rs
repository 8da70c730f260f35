//! Deferred removal of staged files.

use std::path::PathBuf;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Delete `path` after `delay`.
///
/// A file that is already gone is not an error. Other failures are logged.
async fn remove_later(path: PathBuf, delay: Duration) {
    tokio::time::sleep(delay).await;
    match tokio::fs::remove_file(&path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

/// Starts the removal timer for a file when dropped.
///
/// Held by a response body, the delay counts from the end of the transfer.
#[derive(Debug)]
pub struct RemoveOnDrop {
    path: Option<PathBuf>,
    delay: Duration,
}

impl RemoveOnDrop {
    pub fn new(path: PathBuf, delay: Duration) -> Self {
        Self {
            path: Some(path),
            delay,
        }
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(remove_later(path, self.delay));
            }
            Err(_) => warn!("No runtime to remove {}; leaving it", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timer_starts_when_guard_drops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "a,b\n").unwrap();

        let guard = RemoveOnDrop::new(path.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(path.exists(), "removed while the guard was still held");

        drop(guard);
        assert!(path.exists());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        remove_later(dir.path().join("never.csv"), Duration::ZERO).await;
    }
}
