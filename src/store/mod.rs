//! Repository interface over the backing data store.
//!
//! The core only needs equality/range filtering, ordering, batched insert,
//! and upsert-by-primary-key. Everything else (connection handling, view
//! maintenance, timeouts) belongs to the concrete adapter.

pub mod clickhouse;
pub mod memory;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::model::{Checkpoint, Country, LatestStatus, QueueMeasurement};

pub use clickhouse::ClickHouseStore;
pub use memory::MemoryStore;

/// Half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

/// Store consumes dimension and fact rows and serves filtered reads.
pub trait Store: Send + Sync {
    /// Upsert checkpoint rows by primary key, as one batch. A repeated
    /// `id` replaces all mutable fields, never duplicates.
    fn upsert_checkpoints(
        &self,
        rows: &[Checkpoint],
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Append measurement rows, as one batch. Facts are never updated
    /// or deleted.
    fn insert_measurements(
        &self,
        rows: &[QueueMeasurement],
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// All checkpoints, ordered by `order_id` ascending with nulls last,
    /// ties broken by `title` descending.
    fn list_checkpoints(&self) -> impl std::future::Future<Output = Result<Vec<Checkpoint>>> + Send;

    /// Measurements for one checkpoint inside `range`, ordered by
    /// `created_at` ascending.
    fn measurements_in_range(
        &self,
        checkpoint_id: i64,
        range: &TimeRange,
    ) -> impl std::future::Future<Output = Result<Vec<QueueMeasurement>>> + Send;

    /// Newest measurement per checkpoint, from the store's
    /// `latest_queue_status` view.
    fn latest_status(&self) -> impl std::future::Future<Output = Result<Vec<LatestStatus>>> + Send;

    /// Country dimension pass-through.
    fn list_countries(&self) -> impl std::future::Future<Output = Result<Vec<Country>>> + Send;
}
