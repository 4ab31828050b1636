//! Trip records and the duration filter applied before training.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shortest trip kept for training, in minutes (inclusive).
pub const MIN_DURATION_MINUTES: f64 = 1.0;
/// Longest trip kept for training, in minutes (inclusive).
pub const MAX_DURATION_MINUTES: f64 = 60.0;

/// A single taxi trip, reduced to the columns the pipelines use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub pickup: DateTime<Utc>,
    pub dropoff: DateTime<Utc>,
    pub pu_location_id: String,
    pub do_location_id: String,
    pub trip_distance: f64,
    /// Dropoff minus pickup, in minutes.
    pub duration: f64,
}

impl TripRecord {
    pub fn new(
        pickup: DateTime<Utc>,
        dropoff: DateTime<Utc>,
        pu_location_id: i64,
        do_location_id: i64,
        trip_distance: f64,
    ) -> Self {
        Self {
            pickup,
            dropoff,
            pu_location_id: pu_location_id.to_string(),
            do_location_id: do_location_id.to_string(),
            trip_distance,
            duration: duration_minutes(pickup, dropoff),
        }
    }

    /// Combined route key, `"{PULocationID}_{DOLocationID}"`.
    pub fn pu_do(&self) -> String {
        format!("{}_{}", self.pu_location_id, self.do_location_id)
    }

    pub fn in_duration_range(&self) -> bool {
        (MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&self.duration)
    }
}

fn duration_minutes(pickup: DateTime<Utc>, dropoff: DateTime<Utc>) -> f64 {
    let delta = dropoff - pickup;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 60_000_000.0,
        None => delta.num_seconds() as f64 / 60.0,
    }
}

/// Filtered trips for one window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TripTable {
    records: Vec<TripRecord>,
    raw_rows: usize,
}

impl TripTable {
    /// Keep only trips whose duration lies in the training range.
    pub fn prepare(raw: Vec<TripRecord>) -> Self {
        let raw_rows = raw.len();
        let records = raw
            .into_iter()
            .filter(TripRecord::in_duration_range)
            .collect();
        Self { records, raw_rows }
    }

    pub fn records(&self) -> &[TripRecord] {
        &self.records
    }

    /// Row count before the duration filter.
    pub fn raw_rows(&self) -> usize {
        self.raw_rows
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Regression target: trip durations in minutes.
    pub fn durations(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.duration).collect()
    }
}
