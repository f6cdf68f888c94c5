//! Time-windowed and bucketed views over the measurement stream.
//!
//! All windows are computed in UTC. Callers express their timezone as a
//! minute offset following the JavaScript `Date.getTimezoneOffset()`
//! convention: `utc = local + tz_offset`, so UTC+2 arrives as -120. An
//! inverted sign silently shifts every bucket the wrong way, which is why
//! the conversion lives here, in one place, with the literal example
//! pinned in tests.

use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeDelta, Timelike, Utc};
use serde::Serialize;

use crate::model::QueueMeasurement;
use crate::store::{Store, TimeRange};

/// How far back the heatmap looks, in days.
pub const HEATMAP_LOOKBACK_DAYS: i64 = 30;

/// Days of week times hours of day.
pub const HEATMAP_BUCKETS: usize = 7 * 24;

/// One cell of the day-of-week x hour-of-day grid. Monday is day 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapBucket {
    pub day_of_week: u8,
    pub hour: u8,
    /// Mean of non-null wait times, or null when the bucket has no
    /// qualifying samples.
    pub avg_wait_time: Option<f64>,
    pub sample_size: u64,
}

/// Day view payload: the requested local day, plus the same window one
/// week earlier when comparison was requested.
#[derive(Debug, Clone, Serialize)]
pub struct DayView {
    pub current: Vec<QueueMeasurement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_week: Option<Vec<QueueMeasurement>>,
}

/// UTC window covering one local calendar day.
///
/// `[local_midnight + tz_offset, +24h)` in UTC terms.
pub fn day_window(date: NaiveDate, tz_offset_minutes: i32) -> TimeRange {
    let local_midnight = date.and_time(NaiveTime::MIN).and_utc();
    let start = local_midnight + TimeDelta::minutes(i64::from(tz_offset_minutes));

    TimeRange {
        start,
        end: start + TimeDelta::days(1),
    }
}

/// The same window shifted exactly seven days earlier.
pub fn previous_week(range: &TimeRange) -> TimeRange {
    TimeRange {
        start: range.start - TimeDelta::days(7),
        end: range.end - TimeDelta::days(7),
    }
}

/// Trailing lookback window ending at `now`.
pub fn trailing_window(now: DateTime<Utc>, days: i64) -> TimeRange {
    TimeRange {
        start: now - TimeDelta::days(days),
        end: now,
    }
}

/// Buckets measurements into the full 7x24 grid.
///
/// Rows with a null `wait_time` contribute to no bucket. The output is
/// always exactly 168 entries in (day, hour) order; consumers rely on a
/// fixed grid, not a sparse list.
pub fn heatmap(measurements: &[QueueMeasurement], tz_offset_minutes: i32) -> Vec<HeatmapBucket> {
    let mut sums = [[0f64; 24]; 7];
    let mut counts = [[0u64; 24]; 7];

    for m in measurements {
        let Some(wait) = m.wait_time else {
            continue;
        };

        let local = m.created_at - TimeDelta::minutes(i64::from(tz_offset_minutes));
        let day = local.weekday().num_days_from_monday() as usize;
        let hour = local.hour() as usize;

        sums[day][hour] += wait;
        counts[day][hour] += 1;
    }

    let mut buckets = Vec::with_capacity(HEATMAP_BUCKETS);
    for day in 0..7u8 {
        for hour in 0..24u8 {
            let count = counts[day as usize][hour as usize];
            buckets.push(HeatmapBucket {
                day_of_week: day,
                hour,
                avg_wait_time: (count > 0)
                    .then(|| sums[day as usize][hour as usize] / count as f64),
                sample_size: count,
            });
        }
    }

    buckets
}

/// Fetches the ordered day window for a checkpoint, optionally paired
/// with the week-earlier window. The two fetches are independent and
/// either may come back empty.
pub async fn day_view<S: Store>(
    store: &S,
    checkpoint_id: i64,
    date: NaiveDate,
    tz_offset_minutes: i32,
    compare: bool,
) -> Result<DayView> {
    let window = day_window(date, tz_offset_minutes);
    let current = store.measurements_in_range(checkpoint_id, &window).await?;

    let previous = if compare {
        let shifted = previous_week(&window);
        Some(store.measurements_in_range(checkpoint_id, &shifted).await?)
    } else {
        None
    };

    Ok(DayView {
        current,
        previous_week: previous,
    })
}

/// Fetches the trailing 30-day window and buckets it into the heatmap
/// grid. The lookback is anchored to `now` in UTC; the timezone offset
/// only affects bucket classification.
pub async fn heatmap_view<S: Store>(
    store: &S,
    checkpoint_id: i64,
    tz_offset_minutes: i32,
    now: DateTime<Utc>,
) -> Result<Vec<HeatmapBucket>> {
    let window = trailing_window(now, HEATMAP_LOOKBACK_DAYS);
    let measurements = store.measurements_in_range(checkpoint_id, &window).await?;

    Ok(heatmap(&measurements, tz_offset_minutes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn measurement(at: &str, wait_time: Option<f64>) -> QueueMeasurement {
        QueueMeasurement {
            checkpoint_id: 1,
            created_at: DateTime::parse_from_rfc3339(at).unwrap().with_timezone(&Utc),
            is_paused: false,
            cancel_after: None,
            wait_time,
            vehicle_in_active_queues_counts: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_day_window_utc_plus_two() {
        // tz_offset = -120 is UTC+2 in the getTimezoneOffset convention.
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let window = day_window(date, -120);

        assert_eq!(
            window.start,
            Utc.with_ymd_and_hms(2024, 3, 9, 22, 0, 0).unwrap()
        );
        assert_eq!(
            window.end,
            Utc.with_ymd_and_hms(2024, 3, 10, 22, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_day_window_utc() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let window = day_window(date, 0);

        assert_eq!(
            window.start,
            Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()
        );
        assert_eq!(
            window.end,
            Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_previous_week_shift() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let window = day_window(date, -120);
        let shifted = previous_week(&window);

        assert_eq!(shifted.start, window.start - TimeDelta::days(7));
        assert_eq!(shifted.end, window.end - TimeDelta::days(7));
        assert_eq!(
            shifted.start,
            Utc.with_ymd_and_hms(2024, 3, 2, 22, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_heatmap_always_full_grid() {
        let buckets = heatmap(&[], 0);
        assert_eq!(buckets.len(), HEATMAP_BUCKETS);

        // Fixed (day, hour) order.
        assert_eq!((buckets[0].day_of_week, buckets[0].hour), (0, 0));
        assert_eq!((buckets[23].day_of_week, buckets[23].hour), (0, 23));
        assert_eq!((buckets[24].day_of_week, buckets[24].hour), (1, 0));
        assert_eq!((buckets[167].day_of_week, buckets[167].hour), (6, 23));

        for b in &buckets {
            assert_eq!(b.sample_size, 0);
            assert_eq!(b.avg_wait_time, None);
        }
    }

    #[test]
    fn test_heatmap_buckets_by_local_time() {
        // 2024-03-10 is a Sunday. At UTC+2, 23:30 UTC on Saturday the 9th
        // becomes 01:30 local on Sunday.
        let rows = vec![measurement("2024-03-09T23:30:00Z", Some(60.0))];
        let buckets = heatmap(&rows, -120);

        let sunday_0130 = &buckets[6 * 24 + 1];
        assert_eq!(sunday_0130.day_of_week, 6);
        assert_eq!(sunday_0130.hour, 1);
        assert_eq!(sunday_0130.sample_size, 1);
        assert_eq!(sunday_0130.avg_wait_time, Some(60.0));

        // The same instant bucketed in UTC stays on Saturday 23:00.
        let buckets_utc = heatmap(&rows, 0);
        let saturday_2330 = &buckets_utc[5 * 24 + 23];
        assert_eq!(saturday_2330.sample_size, 1);
    }

    #[test]
    fn test_heatmap_averages_within_bucket() {
        let rows = vec![
            measurement("2024-03-11T08:10:00Z", Some(30.0)),
            measurement("2024-03-11T08:40:00Z", Some(90.0)),
            measurement("2024-03-18T08:05:00Z", Some(60.0)),
        ];
        let buckets = heatmap(&rows, 0);

        // All three fall on Monday 08:00.
        let monday_8 = &buckets[8];
        assert_eq!(monday_8.day_of_week, 0);
        assert_eq!(monday_8.hour, 8);
        assert_eq!(monday_8.sample_size, 3);
        assert_eq!(monday_8.avg_wait_time, Some(60.0));
    }

    #[test]
    fn test_heatmap_excludes_null_wait_times() {
        let rows = vec![
            measurement("2024-03-11T08:10:00Z", Some(30.0)),
            measurement("2024-03-11T08:40:00Z", None),
            measurement("2024-03-12T09:00:00Z", None),
        ];
        let buckets = heatmap(&rows, 0);

        let monday_8 = &buckets[8];
        assert_eq!(monday_8.sample_size, 1);
        assert_eq!(monday_8.avg_wait_time, Some(30.0));

        let total: u64 = buckets.iter().map(|b| b.sample_size).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_heatmap_sample_size_conservation() {
        let rows: Vec<QueueMeasurement> = (0..50)
            .map(|i| {
                let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
                    + TimeDelta::hours(i * 7);
                QueueMeasurement {
                    checkpoint_id: 1,
                    created_at: at,
                    is_paused: false,
                    cancel_after: None,
                    wait_time: (i % 3 != 0).then_some(10.0),
                    vehicle_in_active_queues_counts: serde_json::Value::Null,
                }
            })
            .collect();

        let non_null = rows.iter().filter(|m| m.wait_time.is_some()).count() as u64;
        let buckets = heatmap(&rows, -180);

        assert_eq!(buckets.len(), HEATMAP_BUCKETS);
        let total: u64 = buckets.iter().map(|b| b.sample_size).sum();
        assert_eq!(total, non_null);
    }

    #[test]
    fn test_trailing_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        let window = trailing_window(now, HEATMAP_LOOKBACK_DAYS);

        assert_eq!(window.end, now);
        assert_eq!(
            window.start,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
    }
}
