//! Snapshot source access and decoding.
//!
//! A snapshot is one point-in-time capture of every checkpoint's queue
//! status, produced externally on a fixed cadence. Freshness is judged
//! against the source's last-modified timestamp, not its content, so a
//! scheduler that stops refreshing the file halts ingestion instead of
//! silently re-counting the same capture.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::Deserialize;
use thiserror::Error;

use crate::model::{Checkpoint, QueueMeasurement};
use chrono::{DateTime, Utc};

/// Errors raised before any write happens.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot {path} does not exist")]
    Missing { path: String },

    #[error("reading snapshot {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("snapshot is {age:?} old (max {max_age:?})")]
    Stale { age: Duration, max_age: Duration },

    #[error("malformed snapshot: {reason}")]
    Malformed { reason: String },
}

/// Read access to a snapshot blob and its modification time.
///
/// The file-backed implementation is the production path; tests swap in
/// an in-memory source.
pub trait SnapshotSource {
    /// Human-readable description of the source, for logging.
    fn describe(&self) -> String;

    /// Last-modified instant of the source.
    fn last_modified(&self) -> Result<SystemTime, SnapshotError>;

    /// Full snapshot contents.
    fn read(&self) -> Result<Vec<u8>, SnapshotError>;
}

/// Snapshot stored as a local file, refreshed by an external fetcher.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn path_string(&self) -> String {
        self.path.display().to_string()
    }

    fn map_io(&self, err: io::Error) -> SnapshotError {
        if err.kind() == io::ErrorKind::NotFound {
            SnapshotError::Missing {
                path: self.path_string(),
            }
        } else {
            SnapshotError::Io {
                path: self.path_string(),
                source: err,
            }
        }
    }
}

impl SnapshotSource for FileSource {
    fn describe(&self) -> String {
        self.path_string()
    }

    fn last_modified(&self) -> Result<SystemTime, SnapshotError> {
        let meta = fs::metadata(&self.path).map_err(|e| self.map_io(e))?;
        meta.modified().map_err(|e| self.map_io(e))
    }

    fn read(&self) -> Result<Vec<u8>, SnapshotError> {
        fs::read(&self.path).map_err(|e| self.map_io(e))
    }
}

/// One checkpoint-status record as it appears in the snapshot feed.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotRecord {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub tooltip: Option<String>,
    pub country_id: i64,
    pub for_vehicle_type: String,
    pub queue_flow: String,
    pub lng: f64,
    pub lat: f64,
    pub is_paused: bool,
    pub cancel_after: Option<i64>,
    pub wait_time: Option<f64>,
    #[serde(default)]
    pub vehicle_in_active_queues_counts: serde_json::Value,
}

impl SnapshotRecord {
    /// Dimension projection: the slowly-changing checkpoint fields.
    pub fn to_checkpoint(&self) -> Checkpoint {
        Checkpoint {
            id: self.id,
            title: self.title.clone(),
            tooltip: self.tooltip.clone(),
            country_id: self.country_id,
            for_vehicle_type: self.for_vehicle_type.clone(),
            queue_flow: self.queue_flow.clone(),
            lng: self.lng,
            lat: self.lat,
            order_id: None,
        }
    }

    /// Fact projection, stamped with the run's single measurement instant.
    pub fn to_measurement(&self, measured_at: DateTime<Utc>) -> QueueMeasurement {
        QueueMeasurement {
            checkpoint_id: self.id,
            created_at: measured_at,
            is_paused: self.is_paused,
            cancel_after: self.cancel_after,
            wait_time: self.wait_time,
            vehicle_in_active_queues_counts: self.vehicle_in_active_queues_counts.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotBody {
    data: Vec<SnapshotRecord>,
}

/// Checks the freshness gate and returns the source's modification time.
///
/// The returned instant becomes the measurement timestamp for every fact
/// row of the run; processing latency must not skew it.
pub fn check_freshness(
    source: &impl SnapshotSource,
    max_age: Duration,
    now: SystemTime,
) -> Result<SystemTime, SnapshotError> {
    let modified = source.last_modified()?;
    let age = now.duration_since(modified).unwrap_or(Duration::ZERO);

    if age > max_age {
        return Err(SnapshotError::Stale { age, max_age });
    }

    Ok(modified)
}

/// Decodes a snapshot blob into its checkpoint-status records.
pub fn parse(bytes: &[u8]) -> Result<Vec<SnapshotRecord>, SnapshotError> {
    let body: SnapshotBody =
        serde_json::from_slice(bytes).map_err(|e| SnapshotError::Malformed {
            reason: e.to_string(),
        })?;

    Ok(body.data)
}

/// In-memory snapshot source, used by tests and offline tooling.
pub struct StaticSource {
    pub body: Vec<u8>,
    pub modified: SystemTime,
}

impl SnapshotSource for StaticSource {
    fn describe(&self) -> String {
        "static".to_string()
    }

    fn last_modified(&self) -> Result<SystemTime, SnapshotError> {
        Ok(self.modified)
    }

    fn read(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(self.body.clone())
    }
}
