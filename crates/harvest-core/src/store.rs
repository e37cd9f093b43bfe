//! JSON file persistence for records and crawl progress.
//!
//! Both documents are replaced atomically: the new content is written to a
//! sibling `.tmp` file and renamed over the target, so a crash mid-write
//! leaves the previous document intact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::HarvestError;
use crate::models::{Record, RecordSet};
use crate::progress::CrawlProgress;
use crate::traits::{ProgressStore, RecordStore};

/// Records stored as a pretty-printed JSON array.
#[derive(Debug, Clone)]
pub struct JsonRecordStore {
    path: PathBuf,
}

impl JsonRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for JsonRecordStore {
    async fn load(&self) -> Result<RecordSet, HarvestError> {
        let records: Option<Vec<Record>> = read_json(&self.path).await?;
        let records = records.unwrap_or_default();
        tracing::debug!(path = %self.path.display(), count = records.len(), "Loaded records");
        Ok(RecordSet::from_records(records))
    }

    async fn save(&self, records: &RecordSet) -> Result<(), HarvestError> {
        write_json_atomic(&self.path, records.records()).await?;
        tracing::debug!(path = %self.path.display(), count = records.len(), "Saved records");
        Ok(())
    }
}

/// Crawl progress stored as a pretty-printed JSON object.
#[derive(Debug, Clone)]
pub struct JsonProgressStore {
    path: PathBuf,
}

impl JsonProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProgressStore for JsonProgressStore {
    async fn load(&self) -> Result<Option<CrawlProgress>, HarvestError> {
        read_json(&self.path).await
    }

    async fn checkpoint(&self, progress: &CrawlProgress) -> Result<(), HarvestError> {
        write_json_atomic(&self.path, progress).await
    }
}

/// `None` when the file does not exist.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, HarvestError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&raw)?))
}

async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), HarvestError> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
