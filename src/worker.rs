//! Worker-location markers.
//!
//! Each task instance can record where it is running by writing a small
//! marker file under a per-deployment directory. Operators use the marker
//! to find the host and log file serving a given topology.

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Identity of one running task instance: where its marker goes and what
/// the marker says.
#[derive(Debug, Clone)]
pub struct WorkerIdentity {
    /// Base directory for all deployment markers.
    pub base: PathBuf,
    /// Deployment (topology) name; becomes the marker's subdirectory.
    pub deployment: String,
    /// Hostname the instance is running on.
    pub host: String,
    /// Worker slot identifier, used to name the log file.
    pub worker: String,
}

impl WorkerIdentity {
    /// Build an identity rooted at `base`.
    pub fn new(
        base: impl Into<PathBuf>,
        deployment: impl Into<String>,
        host: impl Into<String>,
        worker: impl Into<String>,
    ) -> Self {
        Self {
            base: base.into(),
            deployment: deployment.into(),
            host: host.into(),
            worker: worker.into(),
        }
    }

    /// Path of the marker file for this identity.
    pub fn marker_path(&self) -> PathBuf {
        self.base.join(&self.deployment).join("worker")
    }
}

/// Write the worker-location marker: host on the first line, log file name
/// on the second. The deployment directory is created if needed, and an
/// existing marker is overwritten.
pub fn write_worker_marker(identity: &WorkerIdentity) -> Result<()> {
    let path = identity.marker_path();
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let contents = format!("{}\nworker-{}.log\n", identity.host, identity.worker);
    fs::write(&path, contents)?;
    debug!(marker = %path.display(), host = %identity.host, "worker marker written");
    Ok(())
}

/// Read a previously written marker, returning `(host, log_file)`.
pub fn read_worker_marker(path: &Path) -> Result<(String, String)> {
    let contents = fs::read_to_string(path)?;
    let mut lines = contents.lines();
    let host = lines.next().unwrap_or_default().to_string();
    let log = lines.next().unwrap_or_default().to_string();
    Ok((host, log))
}
