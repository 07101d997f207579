//! Snapshot persistence for the last successful scrape.
//!
//! One file holds the serialized `(variants, countries, stats)` triple. It is
//! replaced atomically on every save, so a crash mid-write leaves the previous
//! snapshot in place. The format is opaque and unversioned: a snapshot written
//! by an incompatible build simply fails to decode.

use crate::models::Dataset;
use crate::utils::{looks_truncated, write_atomic};
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no snapshot at {path}")]
    Missing { path: String },
    #[error("snapshot {path} could not be read: {source}")]
    Unreadable {
        path: String,
        source: std::io::Error,
    },
    #[error("snapshot {path} could not be decoded: {source}")]
    Decode {
        path: String,
        source: serde_json::Error,
    },
    #[error("snapshot {path} is inconsistent: {reason}")]
    Invalid { path: String, reason: String },
    #[error("could not encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("could not write snapshot {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// File-backed snapshot of one [`Dataset`].
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[cfg(test)]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Serialize `dataset` and atomically overwrite any prior snapshot.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub async fn save(&self, dataset: &Dataset) -> Result<(), SnapshotError> {
        let bytes = serde_json::to_vec(dataset).map_err(SnapshotError::Encode)?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|source| SnapshotError::Write {
                path: self.path.display().to_string(),
                source,
            })?;
        info!(
            bytes = bytes.len(),
            variants = dataset.variants.len(),
            countries = dataset.countries.len(),
            "Saved snapshot"
        );
        Ok(())
    }

    /// Read the snapshot back.
    ///
    /// Every failure is recoverable for the caller, which keeps an empty
    /// dataset and asks the operator to scrape again.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub async fn load(&self) -> Result<Dataset, SnapshotError> {
        let path = self.path.display().to_string();
        let bytes = tokio::fs::read(&self.path).await.map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                SnapshotError::Missing { path: path.clone() }
            } else {
                SnapshotError::Unreadable {
                    path: path.clone(),
                    source,
                }
            }
        })?;

        let dataset: Dataset = serde_json::from_slice(&bytes).map_err(|source| {
            if looks_truncated(&source) {
                warn!(bytes = bytes.len(), "Snapshot appears truncated");
            }
            SnapshotError::Decode {
                path: path.clone(),
                source,
            }
        })?;

        dataset
            .validate()
            .map_err(|reason| SnapshotError::Invalid { path, reason })?;

        info!(
            variants = dataset.variants.len(),
            countries = dataset.countries.len(),
            scraped_at = ?dataset.scraped_at,
            "Loaded snapshot"
        );
        Ok(dataset)
    }

    /// Load the snapshot, logging and falling back to an empty dataset on any failure.
    pub async fn load_or_empty(&self) -> Dataset {
        match self.load().await {
            Ok(dataset) => dataset,
            Err(SnapshotError::Missing { path }) => {
                warn!(%path, "No snapshot yet; run a scrape first");
                Dataset::default()
            }
            Err(e) => {
                warn!(error = %e, "Snapshot unavailable; run a scrape first");
                Dataset::default()
            }
        }
    }
}
