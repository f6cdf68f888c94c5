//! ClickHouse adapter for the repository interface.
//!
//! Uses the native TCP protocol via `clickhouse-rs`. The dimension table
//! is a `ReplacingMergeTree` keyed by checkpoint id, so an upsert is a
//! plain batched INSERT stamped with the replacement version column;
//! reads go through `FINAL`. Facts land in an ordinary MergeTree ordered
//! by `(checkpoint_id, created_at)`.

use std::fmt::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clickhouse_rs::types::{ColumnType, Row};
use clickhouse_rs::Pool;

use crate::config::ClickHouseConfig;
use crate::model::{Checkpoint, Country, LatestStatus, QueueMeasurement};

use super::{Store, TimeRange};

const CHECKPOINT_COLUMNS: &str =
    "id, title, tooltip, country_id, for_vehicle_type, queue_flow, lng, lat, order_id";

const MEASUREMENT_COLUMNS: &str =
    "checkpoint_id, created_at, is_paused, cancel_after, wait_time, vehicle_in_active_queues_counts";

/// Store implementation backed by a ClickHouse connection pool.
pub struct ClickHouseStore {
    pool: Pool,
    database: String,
}

impl ClickHouseStore {
    /// Creates a store from configuration. The pool connects lazily.
    pub fn new(cfg: &ClickHouseConfig) -> Self {
        Self {
            pool: Pool::new(cfg.dsn()),
            database: cfg.database.clone(),
        }
    }

    /// Verifies connectivity with a ping.
    pub async fn connect(&self) -> Result<()> {
        let mut handle = self
            .pool
            .get_handle()
            .await
            .context("opening ClickHouse connection")?;

        handle.ping().await.context("pinging ClickHouse")?;

        tracing::info!(database = %self.database, "ClickHouse store connected");

        Ok(())
    }

    /// Returns the underlying pool, for the migration runner.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl Store for ClickHouseStore {
    async fn upsert_checkpoints(&self, rows: &[Checkpoint]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let table = format!("{}.checkpoints", self.database);
        let mut sql = String::with_capacity(120 + table.len() + rows.len() * 160);
        let _ = write!(
            sql,
            "INSERT INTO {table} ({CHECKPOINT_COLUMNS}, updated_at) VALUES "
        );

        for (idx, c) in rows.iter().enumerate() {
            if idx > 0 {
                sql.push_str(", ");
            }

            let _ = write!(
                sql,
                "({}, '{}', {}, {}, '{}', '{}', {}, {}, {}, now())",
                c.id,
                escape_sql(&c.title),
                format_nullable_string(c.tooltip.as_deref()),
                c.country_id,
                escape_sql(&c.for_vehicle_type),
                escape_sql(&c.queue_flow),
                c.lng,
                c.lat,
                format_nullable_i64(c.order_id),
            );
        }

        let mut handle = self
            .pool
            .get_handle()
            .await
            .context("getting handle for checkpoint upsert")?;

        handle
            .execute(sql.as_str())
            .await
            .context("sending checkpoint batch")?;

        Ok(())
    }

    async fn insert_measurements(&self, rows: &[QueueMeasurement]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let table = format!("{}.queue_measurements", self.database);
        let mut sql = String::with_capacity(120 + table.len() + rows.len() * 140);
        let _ = write!(sql, "INSERT INTO {table} ({MEASUREMENT_COLUMNS}) VALUES ");

        for (idx, m) in rows.iter().enumerate() {
            if idx > 0 {
                sql.push_str(", ");
            }

            let counts = serde_json::to_string(&m.vehicle_in_active_queues_counts)
                .context("encoding vehicle counts payload")?;

            let _ = write!(
                sql,
                "({}, {}, {}, {}, {}, '{}')",
                m.checkpoint_id,
                format_datetime(m.created_at),
                u8::from(m.is_paused),
                format_nullable_i64(m.cancel_after),
                format_nullable_f64(m.wait_time),
                escape_sql(&counts),
            );
        }

        let mut handle = self
            .pool
            .get_handle()
            .await
            .context("getting handle for measurement insert")?;

        handle
            .execute(sql.as_str())
            .await
            .context("sending measurement batch")?;

        Ok(())
    }

    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        let sql = format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM {}.checkpoints FINAL \
             ORDER BY order_id ASC NULLS LAST, title DESC",
            self.database
        );

        let mut handle = self
            .pool
            .get_handle()
            .await
            .context("getting handle for checkpoint listing")?;

        let block = handle
            .query(sql.as_str())
            .fetch_all()
            .await
            .context("querying checkpoints")?;

        let mut rows = Vec::with_capacity(block.row_count());
        for row in block.rows() {
            rows.push(Checkpoint {
                id: row.get("id").context("reading id")?,
                title: row.get("title").context("reading title")?,
                tooltip: row.get("tooltip").context("reading tooltip")?,
                country_id: row.get("country_id").context("reading country_id")?,
                for_vehicle_type: row
                    .get("for_vehicle_type")
                    .context("reading for_vehicle_type")?,
                queue_flow: row.get("queue_flow").context("reading queue_flow")?,
                lng: row.get("lng").context("reading lng")?,
                lat: row.get("lat").context("reading lat")?,
                order_id: row.get("order_id").context("reading order_id")?,
            });
        }

        Ok(rows)
    }

    async fn measurements_in_range(
        &self,
        checkpoint_id: i64,
        range: &TimeRange,
    ) -> Result<Vec<QueueMeasurement>> {
        let sql = format!(
            "SELECT checkpoint_id, toInt64(toUnixTimestamp(created_at)) AS created_at_ts, \
             is_paused, cancel_after, wait_time, vehicle_in_active_queues_counts \
             FROM {}.queue_measurements \
             WHERE checkpoint_id = {checkpoint_id} \
             AND created_at >= {} AND created_at < {} \
             ORDER BY created_at ASC",
            self.database,
            format_datetime(range.start),
            format_datetime(range.end),
        );

        let mut handle = self
            .pool
            .get_handle()
            .await
            .context("getting handle for measurement query")?;

        let block = handle
            .query(sql.as_str())
            .fetch_all()
            .await
            .context("querying measurements")?;

        let mut rows = Vec::with_capacity(block.row_count());
        for row in block.rows() {
            rows.push(read_measurement_row(&row)?);
        }

        Ok(rows)
    }

    async fn latest_status(&self) -> Result<Vec<LatestStatus>> {
        let sql = format!(
            "SELECT checkpoint_id, toInt64(toUnixTimestamp(created_at)) AS created_at_ts, \
             is_paused, cancel_after, wait_time, vehicle_in_active_queues_counts \
             FROM {}.latest_queue_status ORDER BY checkpoint_id",
            self.database
        );

        let mut handle = self
            .pool
            .get_handle()
            .await
            .context("getting handle for latest status query")?;

        let block = handle
            .query(sql.as_str())
            .fetch_all()
            .await
            .context("querying latest status")?;

        let mut rows = Vec::with_capacity(block.row_count());
        for row in block.rows() {
            let m = read_measurement_row(&row)?;
            rows.push(LatestStatus {
                checkpoint_id: m.checkpoint_id,
                created_at: m.created_at,
                is_paused: m.is_paused,
                cancel_after: m.cancel_after,
                wait_time: m.wait_time,
                vehicle_in_active_queues_counts: m.vehicle_in_active_queues_counts,
            });
        }

        Ok(rows)
    }

    async fn list_countries(&self) -> Result<Vec<Country>> {
        let sql = format!("SELECT id, name FROM {}.countries ORDER BY id", self.database);

        let mut handle = self
            .pool
            .get_handle()
            .await
            .context("getting handle for country listing")?;

        let block = handle
            .query(sql.as_str())
            .fetch_all()
            .await
            .context("querying countries")?;

        let mut rows = Vec::with_capacity(block.row_count());
        for row in block.rows() {
            rows.push(Country {
                id: row.get("id").context("reading id")?,
                name: row.get("name").context("reading name")?,
            });
        }

        Ok(rows)
    }
}

fn read_measurement_row<K: ColumnType>(row: &Row<'_, K>) -> Result<QueueMeasurement> {
    let created_at_ts: i64 = row.get("created_at_ts").context("reading created_at")?;
    let created_at = DateTime::<Utc>::from_timestamp(created_at_ts, 0)
        .with_context(|| format!("timestamp {created_at_ts} out of range"))?;

    let is_paused: u8 = row.get("is_paused").context("reading is_paused")?;

    let counts_raw: String = row
        .get("vehicle_in_active_queues_counts")
        .context("reading vehicle counts")?;
    let vehicle_in_active_queues_counts =
        serde_json::from_str(&counts_raw).unwrap_or(serde_json::Value::Null);

    Ok(QueueMeasurement {
        checkpoint_id: row.get("checkpoint_id").context("reading checkpoint_id")?,
        created_at,
        is_paused: is_paused != 0,
        cancel_after: row.get("cancel_after").context("reading cancel_after")?,
        wait_time: row.get("wait_time").context("reading wait_time")?,
        vehicle_in_active_queues_counts,
    })
}

/// Formats a UTC instant as a quoted ClickHouse DateTime literal.
fn format_datetime(t: DateTime<Utc>) -> String {
    format!("'{}'", t.format("%Y-%m-%d %H:%M:%S"))
}

/// Escapes a string value for SQL insertion (single-quote escaping).
fn escape_sql(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn format_nullable_string(value: Option<&str>) -> String {
    match value {
        Some(s) => format!("'{}'", escape_sql(s)),
        None => "NULL".to_string(),
    }
}

fn format_nullable_i64(value: Option<i64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "NULL".to_string(),
    }
}

fn format_nullable_f64(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "NULL".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_datetime() {
        let t = Utc.with_ymd_and_hms(2024, 3, 9, 22, 0, 0).unwrap();
        assert_eq!(format_datetime(t), "'2024-03-09 22:00:00'");
    }

    #[test]
    fn test_escape_sql() {
        assert_eq!(escape_sql("Krakivets'"), "Krakivets\\'");
        assert_eq!(escape_sql(r"a\b"), r"a\\b");
    }

    #[test]
    fn test_format_nullable_values() {
        assert_eq!(format_nullable_string(None), "NULL");
        assert_eq!(format_nullable_string(Some("x'y")), "'x\\'y'");
        assert_eq!(format_nullable_i64(Some(5)), "5");
        assert_eq!(format_nullable_i64(None), "NULL");
        assert_eq!(format_nullable_f64(Some(2.5)), "2.5");
        assert_eq!(format_nullable_f64(None), "NULL");
    }
}
