//! Incident log: one JSON line per concluded conversation

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use super::ConversationSession;
use crate::Result;

#[derive(Debug, Clone)]
pub struct IncidentLog {
    path: PathBuf,
}

impl IncidentLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a session, creating the file and its directory if needed
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub async fn append(&self, session: &ConversationSession) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut line = serde_json::to_vec(session)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        tracing::debug!(path = %self.path.display(), session = %session.id, "incident recorded");
        Ok(())
    }
}
