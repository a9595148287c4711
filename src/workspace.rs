//! Per-request scratch directories.
//!
//! Every run gets its own directory under the workspace root, named after the
//! request id, so concurrent runs never touch each other's files. The arena
//! remembers every file it hands out and removes them on release; the owning
//! arena additionally removes the directory itself, sweeping up anything the
//! downloader or a slicer left behind.

use crate::defaults::WORKSPACE_PREFIX;
use crate::error::{Result, SubflowError};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub struct ResourceArena {
    dir: PathBuf,
    owns_dir: bool,
    tracked: Mutex<Vec<PathBuf>>,
    released: AtomicBool,
}

impl ResourceArena {
    /// Create a fresh workspace `<root>/run-<request_id>`.
    ///
    /// Fails if the directory already exists.
    pub fn acquire(root: &Path, request_id: &str) -> Result<Self> {
        if request_id.is_empty() || request_id.contains(['/', '\\']) || request_id.contains("..")
        {
            return Err(SubflowError::InvalidRequest {
                message: format!("invalid request id '{}'", request_id),
            });
        }

        std::fs::create_dir_all(root)?;
        let dir = root.join(format!("{}{}", WORKSPACE_PREFIX, request_id));
        std::fs::create_dir(&dir).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                SubflowError::InvalidRequest {
                    message: format!("workspace {} is already in use", dir.display()),
                }
            } else {
                SubflowError::Io(e)
            }
        })?;

        tracing::debug!(workspace = %dir.display(), "Workspace acquired");
        Ok(Self {
            dir,
            owns_dir: true,
            tracked: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        })
    }

    /// Register files inside a workspace owned by another process.
    ///
    /// Release removes the tracked files but leaves the directory to its owner.
    pub fn adopt(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(SubflowError::InvalidRequest {
                message: format!("workspace {} does not exist", dir.display()),
            });
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            owns_dir: false,
            tracked: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        })
    }

    /// The workspace directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Return a tracked path for `name` inside the workspace.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        let path = self.dir.join(name);
        self.track(&path)?;
        Ok(path)
    }

    /// Track a file created by someone else inside the workspace.
    pub fn track(&self, path: &Path) -> Result<()> {
        if !path.starts_with(&self.dir) {
            return Err(SubflowError::Other(format!(
                "{} is outside workspace {}",
                path.display(),
                self.dir.display()
            )));
        }
        let mut tracked = self
            .tracked
            .lock()
            .map_err(|_| SubflowError::Other("workspace tracking lock poisoned".to_string()))?;
        if !tracked.iter().any(|p| p == path) {
            tracked.push(path.to_path_buf());
        }
        Ok(())
    }

    /// Number of files currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Remove everything this arena is responsible for.
    ///
    /// Safe to call repeatedly and from error paths: removal failures are
    /// logged, never returned.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        let tracked = match self.tracked.lock() {
            Ok(mut tracked) => std::mem::take(&mut *tracked),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        for path in &tracked {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!(file = %path.display(), "Removed temporary file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Could not remove file")
                }
            }
        }

        if self.owns_dir {
            match std::fs::remove_dir_all(&self.dir) {
                Ok(()) => tracing::debug!(workspace = %self.dir.display(), "Workspace removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    workspace = %self.dir.display(),
                    error = %e,
                    "Could not remove workspace"
                ),
            }
        }
    }
}

impl Drop for ResourceArena {
    fn drop(&mut self) {
        self.release();
    }
}
