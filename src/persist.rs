use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;

use crate::utils::{get_random_string, is_safe_file_stem, ARCHIVE_EXTENSION};

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("persist_invalid_name: {0:?} cannot be used as a filename")]
    InvalidName(String),
    #[error("persist_write: {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Stores archives as `<output_dir>/<shadow id>.wacz`.
pub struct ArchiveWriter {
    output_dir: PathBuf,
}

impl ArchiveWriter {
    pub fn new(output_dir: &Path) -> Self {
        ArchiveWriter {
            output_dir: output_dir.to_path_buf(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn archive_path(&self, shadow_id: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", shadow_id, ARCHIVE_EXTENSION))
    }

    /// Writes `archive`, replacing any existing file of the same name. The
    /// data lands in a temp file first and is renamed into place, so readers
    /// never see a partial archive.
    pub async fn write(&self, shadow_id: &str, archive: &[u8]) -> Result<PathBuf, PersistError> {
        if !is_safe_file_stem(shadow_id) {
            return Err(PersistError::InvalidName(shadow_id.into()));
        }
        let path = self.archive_path(shadow_id);
        let tmp = self.output_dir.join(format!(
            ".{}.{}.{}.tmp",
            shadow_id,
            ARCHIVE_EXTENSION,
            get_random_string(8)
        ));

        if let Err(e) = fs::write(&tmp, archive).await {
            return Err(PersistError::Write { path: tmp, source: e });
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            if let Err(rm) = fs::remove_file(&tmp).await {
                warn!("could not remove temp file {:?}: {}", tmp, rm);
            }
            return Err(PersistError::Write { path, source: e });
        }
        debug!("archive written to {:?} ({} bytes)", path, archive.len());
        Ok(path)
    }
}
