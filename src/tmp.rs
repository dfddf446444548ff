//! Scratch directories for staging files.

use std::{
    io,
    path::{Path, PathBuf},
};

use log::debug;
use tempfile::TempDir;

/// A temporary directory that is deleted with everything in it when dropped.
///
/// Dropping happens on every way out of a job, including an error returned
/// with `?` and cancellation of the task that owns the workspace.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn acquire() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("celltower-").tempdir()?;
        debug!("acquired workspace {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Location of a file named `name` inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Remove the directory now, reporting failures instead of ignoring them.
    pub fn close(self) -> io::Result<()> {
        debug!("removing workspace {}", self.dir.path().display());
        self.dir.close()
    }
}
