//! In-memory store used by tests and local development.
//!
//! Implements the full `Store` contract (replace-by-id upsert, range
//! filtering, latest-per-checkpoint) without network access, plus
//! injectable write failures for exercising the ingestion retry path.

use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::{bail, Result};
use parking_lot::Mutex;

use crate::model::{Checkpoint, Country, LatestStatus, QueueMeasurement};

use super::{Store, TimeRange};

#[derive(Default)]
struct State {
    checkpoints: HashMap<i64, Checkpoint>,
    measurements: Vec<QueueMeasurement>,
    countries: Vec<Country>,
    upsert_failures: u32,
    insert_failures: u32,
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` checkpoint upserts fail with a transient error.
    pub fn fail_upserts(&self, n: u32) {
        self.state.lock().upsert_failures = n;
    }

    /// Makes the next `n` measurement inserts fail.
    pub fn fail_inserts(&self, n: u32) {
        self.state.lock().insert_failures = n;
    }

    /// Seeds the country dimension.
    pub fn put_countries(&self, countries: Vec<Country>) {
        self.state.lock().countries = countries;
    }

    /// Number of stored checkpoint rows.
    pub fn checkpoint_count(&self) -> usize {
        self.state.lock().checkpoints.len()
    }

    /// Number of stored measurement rows.
    pub fn measurement_count(&self) -> usize {
        self.state.lock().measurements.len()
    }

    /// Snapshot of one checkpoint row, if present.
    pub fn checkpoint(&self, id: i64) -> Option<Checkpoint> {
        self.state.lock().checkpoints.get(&id).cloned()
    }
}

/// Listing order: `order_id` ascending with nulls last, then `title`
/// descending.
fn listing_order(a: &Checkpoint, b: &Checkpoint) -> Ordering {
    match (a.order_id, b.order_id) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| b.title.cmp(&a.title)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.title.cmp(&a.title),
    }
}

impl Store for MemoryStore {
    async fn upsert_checkpoints(&self, rows: &[Checkpoint]) -> Result<()> {
        let mut state = self.state.lock();

        if state.upsert_failures > 0 {
            state.upsert_failures -= 1;
            bail!("injected upsert failure");
        }

        for row in rows {
            state.checkpoints.insert(row.id, row.clone());
        }

        Ok(())
    }

    async fn insert_measurements(&self, rows: &[QueueMeasurement]) -> Result<()> {
        let mut state = self.state.lock();

        if state.insert_failures > 0 {
            state.insert_failures -= 1;
            bail!("injected insert failure");
        }

        state.measurements.extend_from_slice(rows);

        Ok(())
    }

    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        let state = self.state.lock();
        let mut rows: Vec<Checkpoint> = state.checkpoints.values().cloned().collect();
        rows.sort_by(listing_order);
        Ok(rows)
    }

    async fn measurements_in_range(
        &self,
        checkpoint_id: i64,
        range: &TimeRange,
    ) -> Result<Vec<QueueMeasurement>> {
        let state = self.state.lock();
        let mut rows: Vec<QueueMeasurement> = state
            .measurements
            .iter()
            .filter(|m| m.checkpoint_id == checkpoint_id && range.contains(m.created_at))
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    async fn latest_status(&self) -> Result<Vec<LatestStatus>> {
        let state = self.state.lock();
        let mut newest: HashMap<i64, &QueueMeasurement> = HashMap::new();

        for m in &state.measurements {
            match newest.get(&m.checkpoint_id) {
                Some(existing) if existing.created_at >= m.created_at => {}
                _ => {
                    newest.insert(m.checkpoint_id, m);
                }
            }
        }

        let mut rows: Vec<LatestStatus> = newest
            .into_values()
            .map(|m| LatestStatus {
                checkpoint_id: m.checkpoint_id,
                created_at: m.created_at,
                is_paused: m.is_paused,
                cancel_after: m.cancel_after,
                wait_time: m.wait_time,
                vehicle_in_active_queues_counts: m.vehicle_in_active_queues_counts.clone(),
            })
            .collect();
        rows.sort_by_key(|s| s.checkpoint_id);
        Ok(rows)
    }

    async fn list_countries(&self) -> Result<Vec<Country>> {
        Ok(self.state.lock().countries.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    fn checkpoint(id: i64, title: &str, order_id: Option<i64>) -> Checkpoint {
        Checkpoint {
            id,
            title: title.to_string(),
            tooltip: None,
            country_id: 1,
            for_vehicle_type: "car".to_string(),
            queue_flow: "exit".to_string(),
            lng: 23.0,
            lat: 49.0,
            order_id,
        }
    }

    fn measurement(checkpoint_id: i64, secs: i64, wait_time: Option<f64>) -> QueueMeasurement {
        QueueMeasurement {
            checkpoint_id,
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
            is_paused: false,
            cancel_after: None,
            wait_time,
            vehicle_in_active_queues_counts: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = MemoryStore::new();
        store
            .upsert_checkpoints(&[checkpoint(1, "old title", None)])
            .await
            .unwrap();
        store
            .upsert_checkpoints(&[checkpoint(1, "new title", Some(3))])
            .await
            .unwrap();

        assert_eq!(store.checkpoint_count(), 1);
        let row = store.checkpoint(1).unwrap();
        assert_eq!(row.title, "new title");
        assert_eq!(row.order_id, Some(3));
    }

    #[tokio::test]
    async fn test_listing_order_nulls_last_title_desc() {
        let store = MemoryStore::new();
        store
            .upsert_checkpoints(&[
                checkpoint(1, "Alpha", None),
                checkpoint(2, "Bravo", Some(2)),
                checkpoint(3, "Charlie", Some(1)),
                checkpoint(4, "Zulu", None),
            ])
            .await
            .unwrap();

        let rows = store.list_checkpoints().await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|c| c.id).collect();
        // Explicit orders first (1 then 2), then nulls with title descending.
        assert_eq!(ids, vec![3, 2, 4, 1]);
    }

    #[tokio::test]
    async fn test_range_filter_is_half_open() {
        let store = MemoryStore::new();
        store
            .insert_measurements(&[
                measurement(1, 100, Some(10.0)),
                measurement(1, 200, Some(20.0)),
                measurement(1, 300, Some(30.0)),
                measurement(2, 200, Some(99.0)),
            ])
            .await
            .unwrap();

        let range = TimeRange {
            start: Utc.timestamp_opt(100, 0).unwrap(),
            end: Utc.timestamp_opt(300, 0).unwrap(),
        };
        let rows = store.measurements_in_range(1, &range).await.unwrap();
        let waits: Vec<Option<f64>> = rows.iter().map(|m| m.wait_time).collect();
        assert_eq!(waits, vec![Some(10.0), Some(20.0)]);
    }

    #[tokio::test]
    async fn test_latest_status_picks_newest_per_checkpoint() {
        let store = MemoryStore::new();
        store
            .insert_measurements(&[
                measurement(1, 100, Some(10.0)),
                measurement(1, 500, Some(50.0)),
                measurement(2, 200, None),
            ])
            .await
            .unwrap();

        let rows = store.latest_status().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].checkpoint_id, 1);
        assert_eq!(rows[0].wait_time, Some(50.0));
        assert_eq!(rows[1].checkpoint_id, 2);
        assert_eq!(rows[1].wait_time, None);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_upserts(1);

        assert!(store
            .upsert_checkpoints(&[checkpoint(1, "t", None)])
            .await
            .is_err());
        assert!(store
            .upsert_checkpoints(&[checkpoint(1, "t", None)])
            .await
            .is_ok());
    }
}
