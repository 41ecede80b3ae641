//! Best-effort cleanup of per-user transient files after disconnect

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

/// Hook run after the last live connection of a user closes
#[async_trait]
pub trait DisconnectCleanup: Send + Sync {
    async fn on_disconnect(&self, user_id: Uuid) -> io::Result<()>;
}

/// Removes `<root>/<user_id>`, the user's temporary upload directory
#[derive(Debug, Clone)]
pub struct TempDirCleanup {
    root: PathBuf,
}

impl TempDirCleanup {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn user_dir(&self, user_id: Uuid) -> PathBuf {
        self.root.join(user_id.to_string())
    }
}

#[async_trait]
impl DisconnectCleanup for TempDirCleanup {
    async fn on_disconnect(&self, user_id: Uuid) -> io::Result<()> {
        let dir = self.user_dir(user_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(user_id = %user_id, "Removed temporary files in {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Cleanup that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCleanup;

#[async_trait]
impl DisconnectCleanup for NoopCleanup {
    async fn on_disconnect(&self, _user_id: Uuid) -> io::Result<()> {
        Ok(())
    }
}
