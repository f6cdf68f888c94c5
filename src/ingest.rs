//! The snapshot ingestion pipeline.
//!
//! One invocation runs a single linear sequence: freshness gate, parse,
//! timestamp derivation, dimension upsert (retried), fact insert
//! (unretried). Any failure is fatal to the run and reported to the
//! caller as a typed error; the binary maps it to a non-zero exit so a
//! cron scheduler can alert. Re-running a within-policy snapshot
//! duplicates fact rows: the fact stream is append-only observations,
//! only the dimension upsert is idempotent.

use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::model::{Checkpoint, QueueMeasurement};
use crate::snapshot::{self, SnapshotError, SnapshotSource};
use crate::store::Store;

/// Total attempts for the dimension upsert, including the first.
const UPSERT_ATTEMPTS: u32 = 3;

/// Backoff grows linearly: 2s after the first failure, 4s after the second.
const BACKOFF_STEP: Duration = Duration::from_secs(2);

/// Fatal ingestion failures.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Missing, stale, or malformed snapshot. Raised before any write.
    #[error(transparent)]
    Source(#[from] SnapshotError),

    /// A store write failed: dimension upsert after exhausting retries,
    /// or the fact insert on its single attempt.
    #[error("writing {stage}: {source}")]
    Persistence {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Outcome of a completed run, for logging and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub checkpoints: usize,
    pub measurements: usize,
    pub measured_at: DateTime<Utc>,
}

/// Runs one full ingestion pass.
///
/// `now` is taken as a parameter so the freshness gate is testable; the
/// binary passes `SystemTime::now()`.
pub async fn run<S: Store>(
    source: &impl SnapshotSource,
    store: &S,
    max_age: Duration,
    now: SystemTime,
) -> Result<IngestReport, IngestError> {
    let modified = snapshot::check_freshness(source, max_age, now)?;
    let measured_at: DateTime<Utc> = modified.into();

    let bytes = source.read()?;
    let records = snapshot::parse(&bytes)?;

    info!(
        source = %source.describe(),
        records = records.len(),
        measured_at = %measured_at,
        "snapshot loaded"
    );

    let checkpoints: Vec<Checkpoint> = records.iter().map(|r| r.to_checkpoint()).collect();
    upsert_with_retry(store, &checkpoints).await?;
    info!(count = checkpoints.len(), "checkpoints upserted");

    let measurements: Vec<QueueMeasurement> = records
        .iter()
        .map(|r| r.to_measurement(measured_at))
        .collect();

    // Unretried: the dimension upsert above is idempotent and safe to
    // redo on the next scheduled run, so no rollback is attempted here.
    if let Err(e) = store.insert_measurements(&measurements).await {
        error!(error = %e, "measurement insert failed");
        return Err(IngestError::Persistence {
            stage: "measurement insert",
            source: e,
        });
    }
    info!(count = measurements.len(), "measurements inserted");

    Ok(IngestReport {
        checkpoints: checkpoints.len(),
        measurements: measurements.len(),
        measured_at,
    })
}

async fn upsert_with_retry<S: Store>(
    store: &S,
    checkpoints: &[Checkpoint],
) -> Result<(), IngestError> {
    let mut attempt = 1u32;

    loop {
        match store.upsert_checkpoints(checkpoints).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < UPSERT_ATTEMPTS => {
                let backoff = BACKOFF_STEP * attempt;
                warn!(
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    error = %e,
                    "checkpoint upsert failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                error!(attempts = UPSERT_ATTEMPTS, error = %e, "checkpoint upsert exhausted retries");
                return Err(IngestError::Persistence {
                    stage: "checkpoint upsert",
                    source: e,
                });
            }
        }
    }
}
