//! Tracker index: `content_tracker.json`, a summary of every persisted
//! devotional. Derived entirely from the artifact store, so it can be rebuilt
//! at any time and a stale or missing index is never a correctness problem.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::artifact::Season;
use crate::storage::store::{write_atomic, ArtifactStore, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRecord {
    pub date: NaiveDate,
    pub file: String,
    pub title: String,
    pub scripture_reference: Option<String>,
    pub theme: Option<String>,
    pub season: Season,
    pub created_at: DateTime<Utc>,
    pub provenance: String,
    pub is_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerIndex {
    /// Newest record, if any.
    pub latest: Option<IndexRecord>,
    pub count: usize,
    /// Ascending by date.
    pub files: Vec<IndexRecord>,
    pub updated_at: DateTime<Utc>,
}

impl TrackerIndex {
    /// Scans the store. Unreadable artifacts are skipped with a warning.
    pub fn build(store: &ArtifactStore) -> Result<Self, StoreError> {
        let mut files = Vec::new();

        for date in store.list_dates()? {
            match store.read(date) {
                Ok(artifact) => files.push(IndexRecord {
                    date,
                    file: format!("{}.json", date.format("%Y-%m-%d")),
                    title: artifact.title,
                    scripture_reference: artifact.scripture_reference,
                    theme: artifact.theme,
                    season: artifact.season,
                    created_at: artifact.created_at,
                    provenance: artifact.provenance.to_string(),
                    is_fallback: artifact.is_fallback,
                }),
                Err(e) => warn!("Leaving {date} out of the tracker index: {e}"),
            }
        }

        Ok(Self {
            latest: files.last().cloned(),
            count: files.len(),
            files,
            updated_at: Utc::now(),
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), StoreError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        let json = serde_json::to_string_pretty(self)?;
        write_atomic(dir, path, json.as_bytes(), true).map_err(|e| StoreError::io(path, e))
    }

    #[cfg(test)]
    pub fn read(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Rebuilds the index from the store and writes it to `path`.
pub fn refresh(store: &ArtifactStore, path: &Path) -> Result<TrackerIndex, StoreError> {
    let index = TrackerIndex::build(store)?;
    index.write(path)?;
    info!(
        "Tracker index refreshed: {} devotionals, latest {}",
        index.count,
        index
            .latest
            .as_ref()
            .map(|r| r.date.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    Ok(index)
}
