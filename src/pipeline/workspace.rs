//! Run-owned temporary artifacts.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::broadcast::SessionId;

/// Temporary files belonging to one run.
///
/// Every path is prefixed with the session id, so concurrent runs can
/// share one temp directory. [`cleanup`](Self::cleanup) removes whatever
/// exists; dropping an uncleaned workspace removes it synchronously.
#[derive(Debug)]
pub struct RunWorkspace {
    dir: PathBuf,
    session: SessionId,
    segments: usize,
    cleaned: bool,
}

impl RunWorkspace {
    #[must_use]
    pub fn new(dir: &Path, session: SessionId, segments: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            session,
            segments,
            cleaned: false,
        }
    }

    /// Make sure the shared temp directory exists.
    pub async fn prepare(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn narration_path(&self) -> PathBuf {
        self.dir.join(format!("{}-narration.mp3", self.session))
    }

    #[must_use]
    pub fn image_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}-image-{index}.png", self.session))
    }

    /// Encoder output before it is published.
    #[must_use]
    pub fn render_path(&self) -> PathBuf {
        self.dir.join(format!("{}-render.mp4", self.session))
    }

    /// All paths this run may create.
    #[must_use]
    pub fn owned_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(self.segments + 2);
        paths.push(self.narration_path());
        paths.extend((0..self.segments).map(|i| self.image_path(i)));
        paths.push(self.render_path());
        paths
    }

    /// Remove every run-owned file that exists. Failures are logged, not
    /// returned. Returns the number of files removed.
    pub async fn cleanup(&mut self) -> usize {
        self.cleaned = true;
        let mut removed = 0;
        for path in self.owned_paths() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {:?}: {}", path, e),
            }
        }
        debug!("Session {}: removed {} temporary files", self.session, removed);
        removed
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        for path in self.owned_paths() {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {:?}: {}", path, e),
            }
        }
    }
}
