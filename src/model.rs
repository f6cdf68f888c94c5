//! Row types shared between the ingestion pipeline, the store, and the API.
//!
//! `Checkpoint` is the slowly-changing dimension (upserted by id),
//! `QueueMeasurement` is the append-only fact stream. Both serialize
//! directly as API payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A border crossing point. Dimension row, at most one per `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: i64,
    pub title: String,
    pub tooltip: Option<String>,
    pub country_id: i64,
    /// Vehicle class this checkpoint serves (e.g. "car", "truck", "bus").
    pub for_vehicle_type: String,
    /// Directionality of the queue (e.g. "entry", "exit").
    pub queue_flow: String,
    pub lng: f64,
    pub lat: f64,
    /// Display ordering hint. `None` sorts after all explicit orders.
    pub order_id: Option<i64>,
}

/// One immutable observation of a checkpoint's queue state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMeasurement {
    pub checkpoint_id: i64,
    /// Snapshot capture time (UTC), shared by every row of one ingestion run.
    pub created_at: DateTime<Utc>,
    pub is_paused: bool,
    /// Opaque threshold field, passed through unmodified.
    pub cancel_after: Option<i64>,
    /// Wait time in minutes. `None` means unmeasured and is excluded
    /// from all averaging.
    pub wait_time: Option<f64>,
    /// Opaque structured payload, passed through unmodified.
    pub vehicle_in_active_queues_counts: serde_json::Value,
}

/// Country dimension row. Read-only to this service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub id: i64,
    pub name: String,
}

/// Newest measurement per checkpoint, as exposed by the store's
/// `latest_queue_status` view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestStatus {
    pub checkpoint_id: i64,
    pub created_at: DateTime<Utc>,
    pub is_paused: bool,
    pub cancel_after: Option<i64>,
    pub wait_time: Option<f64>,
    pub vehicle_in_active_queues_counts: serde_json::Value,
}
