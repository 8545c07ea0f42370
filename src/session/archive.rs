//! Persisted session records.
//!
//! One JSON document per session, written exactly once at session end.
//! Storage layout: `<base>/YYYY/MM/DD/<session_id>/session.json`. The
//! write is atomic: serialize to a temp file in the session directory,
//! then rename over the final name.

use chrono::Datelike;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use super::SessionResult;

const RECORD_FILE: &str = "session.json";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to create results directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize session record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write session record {0}: {1}")]
    Write(PathBuf, std::io::Error),
}

pub struct SessionArchive {
    base: PathBuf,
}

impl SessionArchive {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Dated directory for one session record.
    pub fn session_dir(&self, result: &SessionResult) -> PathBuf {
        let date = result.started_at;
        self.base
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
            .join(result.session_id.to_string())
    }

    /// Persist the finalized record. Returns the path of the written file.
    pub fn persist(&self, result: &SessionResult) -> Result<PathBuf, ArchiveError> {
        let dir = self.session_dir(result);
        fs::create_dir_all(&dir).map_err(|e| ArchiveError::CreateDir(dir.clone(), e))?;

        let content = serde_json::to_string_pretty(result)?;
        let final_path = dir.join(RECORD_FILE);
        let tmp_path = dir.join(format!("{}.tmp", RECORD_FILE));

        write_file(&tmp_path, content.as_bytes())
            .map_err(|e| ArchiveError::Write(tmp_path.clone(), e))?;
        fs::rename(&tmp_path, &final_path)
            .map_err(|e| ArchiveError::Write(final_path.clone(), e))?;

        info!("Session record persisted to {:?}", final_path);
        Ok(final_path)
    }

    /// Read a persisted record back. Used by reporting tools and tests.
    pub fn load(path: &Path) -> Result<SessionResult, ArchiveError> {
        let content =
            fs::read_to_string(path).map_err(|e| ArchiveError::Write(path.to_path_buf(), e))?;
        Ok(serde_json::from_str(&content)?)
    }
}

fn write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(content)?;
    file.sync_all()?;
    debug!("Wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}
