// Scratch directory for one download: `<output_dir>/temp_<name>`.

use crate::DownloadError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct TempWorkspace {
    path: PathBuf,
    removed: bool,
}

impl TempWorkspace {
    /// Directory name used for `name`; path separators are flattened so the
    /// workspace always sits directly under the output directory.
    pub fn dir_name(name: &str) -> String {
        let flat: String = name
            .chars()
            .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
            .collect();
        format!("temp_{flat}")
    }

    /// Create a fresh workspace, replacing any leftover from an earlier run.
    pub async fn create(output_dir: &Path, name: &str) -> Result<Self, DownloadError> {
        let path = output_dir.join(Self::dir_name(name));

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!(path = %path.display(), "Removing stale workspace");
            tokio::fs::remove_dir_all(&path)
                .await
                .map_err(|e| DownloadError::workspace(&path, e))?;
        }

        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| DownloadError::workspace(&path, e))?;
        debug!(path = %path.display(), "Created workspace");

        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the workspace and everything in it.
    pub async fn cleanup(mut self) -> Result<(), DownloadError> {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed workspace");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DownloadError::workspace(&self.path, e)),
        }
    }
}

impl Drop for TempWorkspace {
    // Reached when the owning future is dropped or unwinds before `cleanup`.
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "Failed to remove workspace");
        }
    }
}
