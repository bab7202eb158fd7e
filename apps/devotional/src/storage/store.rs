//! Artifact store: one JSON file per calendar date.
//!
//! Writes go to a temp file in the same directory and are renamed into place,
//! so a crash never leaves a half-written devotional behind. Without an
//! explicit overwrite the rename refuses to clobber, which makes two racing
//! runs for the same date resolve to exactly one artifact.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::artifact::{Artifact, LegacyRecord};
use crate::storage::render::render_markdown;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse `{path}`: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("an artifact for {0} already exists")]
    AlreadyExists(NaiveDate),

    #[error("refusing to persist artifact for {date}: {reason}")]
    Invalid { date: NaiveDate, reason: &'static str },
}

impl StoreError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    write_markdown: bool,
}

impl ArtifactStore {
    /// Creates a handle without touching the filesystem.
    pub fn new(dir: impl Into<PathBuf>, write_markdown: bool) -> Self {
        Self {
            dir: dir.into(),
            write_markdown,
        }
    }

    /// Creates the directory if needed and returns a handle to it.
    pub fn open(dir: impl Into<PathBuf>, write_markdown: bool) -> Result<Self, StoreError> {
        let store = Self::new(dir, write_markdown);
        std::fs::create_dir_all(&store.dir).map_err(|e| StoreError::io(&store.dir, e))?;
        Ok(store)
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    pub fn markdown_path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.md", date.format("%Y-%m-%d")))
    }

    pub fn exists(&self, date: NaiveDate) -> bool {
        self.path_for(date).is_file()
    }

    /// Dates with a persisted artifact file, ascending. A missing directory is empty.
    pub fn list_dates(&self) -> Result<Vec<NaiveDate>, StoreError> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };

        let mut dates = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(date) = parse_artifact_file_name(name) {
                dates.push(date);
            }
        }

        dates.sort();
        Ok(dates)
    }

    pub fn read(&self, date: NaiveDate) -> Result<Artifact, StoreError> {
        self.read_as(date)
    }

    /// Reads the file for `date` in the older `{date, content_markdown}` shape.
    pub fn read_legacy(&self, date: NaiveDate) -> Result<LegacyRecord, StoreError> {
        self.read_as(date)
    }

    fn read_as<T: DeserializeOwned>(&self, date: NaiveDate) -> Result<T, StoreError> {
        let path = self.path_for(date);
        let raw = std::fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Persists an artifact atomically. Without `overwrite`, an existing file
    /// for the same date yields `StoreError::AlreadyExists` and is left untouched.
    pub fn write(&self, artifact: &Artifact, overwrite: bool) -> Result<PathBuf, StoreError> {
        if let Some(reason) = artifact.persistence_violation() {
            return Err(StoreError::Invalid {
                date: artifact.date,
                reason,
            });
        }

        let path = self.path_for(artifact.date);
        let json = serde_json::to_string_pretty(artifact)?;

        match write_atomic(&self.dir, &path, json.as_bytes(), overwrite) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && !overwrite => {
                return Err(StoreError::AlreadyExists(artifact.date));
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        }
        info!("Wrote devotional for {} to {}", artifact.date, path.display());

        if self.write_markdown {
            let md_path = self.markdown_path_for(artifact.date);
            // The markdown file is a derived view; the JSON record is authoritative.
            match write_atomic(&self.dir, &md_path, render_markdown(artifact).as_bytes(), true) {
                Ok(()) => debug!("Rendered markdown to {}", md_path.display()),
                Err(e) => warn!("Failed to render markdown to {}: {e}", md_path.display()),
            }
        }

        Ok(path)
    }
}

/// Writes `bytes` to a temp file in `dir`, syncs it, and renames it to `path`.
pub(crate) fn write_atomic(
    dir: &Path,
    path: &Path,
    bytes: &[u8],
    overwrite: bool,
) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;

    let persisted = if overwrite {
        tmp.persist(path)
    } else {
        tmp.persist_noclobber(path)
    };
    persisted.map(|_| ()).map_err(|e| e.error)
}

/// `YYYY-MM-DD.json` → date; anything else is ignored.
fn parse_artifact_file_name(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_suffix(".json")?;
    if stem.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}
