//! Parquet loading from disk and over HTTP.

mod common;

use pretty_assertions::assert_eq;
use std::sync::Arc;
use taxiflow_core::{RecordingObserver, TaxiColor, Task, TaskState};
use common::TimestampEncoding;
use taxiflow_ml::{
    HttpParquetSource, LocalParquetSource, MlError, TripSource, TripTable, TripWindow,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn local_source_decodes_generated_file() {
    let dir = TempDir::new().unwrap();
    let window = TripWindow::new(2023, 1).unwrap();
    let trips = common::synthetic_trips(window, 25);
    std::fs::write(
        dir.path().join("green_tripdata_2023-01.parquet"),
        common::trips_to_parquet(&trips, TaxiColor::Green),
    )
    .unwrap();

    let loaded = LocalParquetSource::new(dir.path())
        .load(window, TaxiColor::Green)
        .await
        .unwrap();

    assert_eq!(loaded, trips);
}

#[tokio::test]
async fn nanosecond_timestamps_keep_minute_durations() {
    let dir = TempDir::new().unwrap();
    let window = TripWindow::new(2023, 1).unwrap();
    let trips = common::synthetic_trips(window, 20);
    std::fs::write(
        dir.path().join("green_tripdata_2023-01.parquet"),
        common::trips_to_parquet_with(&trips, TaxiColor::Green, TimestampEncoding::Nanos),
    )
    .unwrap();

    let loaded = LocalParquetSource::new(dir.path())
        .load(window, TaxiColor::Green)
        .await
        .unwrap();
    assert_eq!(loaded, trips);

    let micros = TripTable::prepare(trips);
    let nanos = TripTable::prepare(loaded);
    assert_eq!(nanos.len(), 16);
    assert_eq!(nanos.durations(), micros.durations());
}

#[tokio::test]
async fn untyped_timestamp_columns_are_rejected() {
    let dir = TempDir::new().unwrap();
    let window = TripWindow::new(2023, 1).unwrap();
    let trips = common::synthetic_trips(window, 5);
    std::fs::write(
        dir.path().join("green_tripdata_2023-01.parquet"),
        common::trips_to_parquet_with(&trips, TaxiColor::Green, TimestampEncoding::Untyped),
    )
    .unwrap();

    let err = LocalParquetSource::new(dir.path())
        .load(window, TaxiColor::Green)
        .await
        .unwrap_err();

    assert!(matches!(err, MlError::Dataset(_)));
    assert!(err.to_string().contains("lpep_pickup_datetime"));
}

#[tokio::test]
async fn wrong_color_reports_missing_columns() {
    let dir = TempDir::new().unwrap();
    let window = TripWindow::new(2023, 1).unwrap();
    let trips = common::synthetic_trips(window, 5);
    // Green column names under a yellow file name.
    std::fs::write(
        dir.path().join("yellow_tripdata_2023-01.parquet"),
        common::trips_to_parquet(&trips, TaxiColor::Green),
    )
    .unwrap();

    let err = LocalParquetSource::new(dir.path())
        .load(window, TaxiColor::Yellow)
        .await
        .unwrap_err();

    assert!(matches!(err, MlError::Dataset(_)));
    assert!(err.to_string().contains("tpep_pickup_datetime"));
}

#[tokio::test]
async fn http_source_retries_after_server_error() {
    let server = MockServer::start().await;
    let window = TripWindow::new(2023, 2).unwrap();
    let trips = common::synthetic_trips(window, 40);
    let body = common::trips_to_parquet(&trips, TaxiColor::Yellow);

    Mock::given(method("GET"))
        .and(path("/trip-data/yellow_tripdata_2023-02.parquet"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/trip-data/yellow_tripdata_2023-02.parquet"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&server)
        .await;

    let source = HttpParquetSource::new(
        reqwest::Client::new(),
        format!("{}/trip-data", server.uri()),
    );
    let observer = Arc::new(RecordingObserver::new());
    let task = Task::new("read_dataframe").retries(3);

    let loaded = task
        .run_observed(observer.clone(), |_| source.load(window, TaxiColor::Yellow))
        .await
        .unwrap();

    assert_eq!(loaded.len(), 40);
    assert_eq!(loaded[0], trips[0]);
    assert_eq!(observer.count("read_dataframe", TaskState::FailedRetrying), 1);
    assert_eq!(observer.count("read_dataframe", TaskState::Succeeded), 1);
}

#[tokio::test]
async fn http_source_gives_up_on_persistent_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let source = HttpParquetSource::new(reqwest::Client::new(), server.uri());
    let window = TripWindow::new(2023, 1).unwrap();
    let task = Task::new("read_dataframe").retries(1);

    let err = task
        .run(|_| source.load(window, TaxiColor::Green))
        .await
        .unwrap_err();

    assert!(matches!(err, MlError::Dataset(_)));
    assert!(err.to_string().contains("404"));
}
