//! Best-effort removal of per-request temporary files

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Delete every path, then its parent directory once that is empty
///
/// Never fails. Errors are logged and the remaining paths are still
/// processed.
pub async fn cleanup(paths: &[PathBuf]) {
    if paths.is_empty() {
        return;
    }

    let paths = paths.to_vec();
    if let Err(e) = tokio::task::spawn_blocking(move || cleanup_blocking(&paths)).await {
        warn!("Cleanup task did not complete: {}", e);
    }
}

/// Synchronous variant of [`cleanup`], usable from `Drop`
pub fn cleanup_blocking(paths: &[PathBuf]) {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!("Removed {}", path.display());
                remove_parent_if_empty(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Nothing to remove at {}", path.display());
            }
            Err(e) => {
                warn!("Error deleting file {}: {}", path.display(), e);
            }
        }
    }
}

fn remove_parent_if_empty(path: &Path) {
    let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) else {
        return;
    };

    // remove_dir refuses non-empty directories, which is the check we want
    if std::fs::remove_dir(dir).is_ok() {
        debug!("Removed empty directory {}", dir.display());
    }
}

/// Set once a [`CleanupGuard`] has been dropped without finishing
///
/// Blocking jobs keep running after their request future is gone. A job
/// that writes a registered path checks this after writing and removes its
/// own output, since the guard's sweep may already have run.
#[derive(Debug, Clone, Default)]
pub struct Abandoned(Arc<AtomicBool>);

impl Abandoned {
    pub fn is_abandoned(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Owns the cleanup set of one request
///
/// Paths are registered as soon as they are known. [`CleanupGuard::finish`]
/// runs the cleanup exactly once; if the guard is dropped without being
/// finished (the request future was cancelled, a panic unwound) the
/// cleanup runs synchronously from `Drop`. Writers that outlive the
/// request hold an [`Abandoned`] flag from [`CleanupGuard::abandoned`].
#[derive(Debug, Default)]
pub struct CleanupGuard {
    paths: Vec<PathBuf>,
    finished: bool,
    abandoned: Abandoned,
}

impl CleanupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn abandoned(&self) -> Abandoned {
        self.abandoned.clone()
    }

    pub async fn finish(mut self) {
        self.finished = true;
        cleanup(&self.paths).await;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Cleanup guard dropped early, removing {} paths", self.paths.len());
            // Flag first, so a late writer either sees it or finished before the sweep
            self.abandoned.set();
            cleanup_blocking(&self.paths);
        }
    }
}
