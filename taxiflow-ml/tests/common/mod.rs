//! Shared fixtures: synthetic trips and an in-memory parquet writer.

#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use parquet::data_type::{DoubleType, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::writer::{SerializedFileWriter, SerializedRowGroupWriter};
use parquet::schema::parser::parse_message_type;
use std::io::Write;
use std::sync::Arc;
use taxiflow_core::TaxiColor;
use taxiflow_ml::{TripRecord, TripWindow};

/// Deterministic trips for `window`. Durations depend on distance and route;
/// every tenth trip falls outside the 1..=60 minute range.
pub fn synthetic_trips(window: TripWindow, n: usize) -> Vec<TripRecord> {
    let start = Utc
        .with_ymd_and_hms(window.year(), window.month(), 1, 0, 0, 0)
        .unwrap();
    (0..n)
        .map(|i| {
            let pu = 1 + (i % 5) as i64;
            let dl = 1 + ((i * 3) % 7) as i64;
            let distance = 0.5 + (i % 10) as f64;
            let minutes = match i % 10 {
                0 => 0.5,
                5 => 75.0,
                _ => 2.0 + 3.0 * distance + pu as f64 - 0.5 * dl as f64,
            };
            let pickup = start + Duration::minutes(i as i64);
            let dropoff = pickup + Duration::seconds((minutes * 60.0) as i64);
            TripRecord::new(pickup, dropoff, pu, dl, distance)
        })
        .collect()
}

/// How the pickup and dropoff columns are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampEncoding {
    /// Legacy `TIMESTAMP_MICROS` converted type.
    Micros,
    /// `TIMESTAMP(NANOS,false)` logical type, as pandas writes it.
    Nanos,
    /// Bare INT64 with no timestamp annotation.
    Untyped,
}

impl TimestampEncoding {
    fn annotation(self) -> &'static str {
        match self {
            TimestampEncoding::Micros => " (TIMESTAMP_MICROS)",
            TimestampEncoding::Nanos => " (TIMESTAMP(NANOS,false))",
            TimestampEncoding::Untyped => "",
        }
    }

    fn encode(self, ts: chrono::DateTime<Utc>) -> i64 {
        match self {
            TimestampEncoding::Nanos => ts.timestamp_nanos_opt().unwrap(),
            TimestampEncoding::Micros | TimestampEncoding::Untyped => ts.timestamp_micros(),
        }
    }
}

/// Encode `trips` as a parquet file with the column names used by `color`.
pub fn trips_to_parquet(trips: &[TripRecord], color: TaxiColor) -> Vec<u8> {
    trips_to_parquet_with(trips, color, TimestampEncoding::Micros)
}

/// [`trips_to_parquet`] with a chosen timestamp encoding.
pub fn trips_to_parquet_with(
    trips: &[TripRecord],
    color: TaxiColor,
    encoding: TimestampEncoding,
) -> Vec<u8> {
    let prefix = color.timestamp_prefix();
    let ts = encoding.annotation();
    let message = format!(
        "message schema {{
            REQUIRED INT64 VendorID;
            REQUIRED INT64 {prefix}_pickup_datetime{ts};
            REQUIRED INT64 {prefix}_dropoff_datetime{ts};
            REQUIRED INT64 PULocationID;
            REQUIRED INT64 DOLocationID;
            REQUIRED DOUBLE trip_distance;
        }}"
    );
    let schema = Arc::new(parse_message_type(&message).unwrap());
    let props = Arc::new(WriterProperties::builder().build());

    let mut buf = Vec::new();
    {
        let mut writer = SerializedFileWriter::new(&mut buf, schema, props).unwrap();
        let mut row_group = writer.next_row_group().unwrap();

        write_i64(&mut row_group, &vec![2; trips.len()]);
        write_i64(
            &mut row_group,
            &trips.iter().map(|t| encoding.encode(t.pickup)).collect::<Vec<_>>(),
        );
        write_i64(
            &mut row_group,
            &trips.iter().map(|t| encoding.encode(t.dropoff)).collect::<Vec<_>>(),
        );
        write_i64(
            &mut row_group,
            &trips
                .iter()
                .map(|t| t.pu_location_id.parse::<i64>().unwrap())
                .collect::<Vec<_>>(),
        );
        write_i64(
            &mut row_group,
            &trips
                .iter()
                .map(|t| t.do_location_id.parse::<i64>().unwrap())
                .collect::<Vec<_>>(),
        );

        let mut col = row_group.next_column().unwrap().unwrap();
        col.typed::<DoubleType>()
            .write_batch(
                &trips.iter().map(|t| t.trip_distance).collect::<Vec<_>>(),
                None,
                None,
            )
            .unwrap();
        col.close().unwrap();

        row_group.close().unwrap();
        writer.close().unwrap();
    }
    buf
}

fn write_i64<W: Write + Send>(row_group: &mut SerializedRowGroupWriter<'_, W>, values: &[i64]) {
    let mut col = row_group.next_column().unwrap().unwrap();
    col.typed::<Int64Type>()
        .write_batch(values, None, None)
        .unwrap();
    col.close().unwrap();
}
