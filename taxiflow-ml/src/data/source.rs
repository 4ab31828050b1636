//! Trip-data sources: the public CDN, a local mirror, and a static source.

use crate::data::decode::decode_trips;
use crate::data::trips::TripRecord;
use crate::data::window::TripWindow;
use crate::error::MlError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use taxiflow_core::TaxiColor;
use tracing::{debug, info};

/// Loads the raw trips of one monthly window.
#[async_trait]
pub trait TripSource: Send + Sync {
    /// Load every trip of the window, before any filtering.
    async fn load(&self, window: TripWindow, color: TaxiColor) -> Result<Vec<TripRecord>, MlError>;

    /// Human-readable location of the window's data.
    fn location(&self, window: TripWindow, color: TaxiColor) -> String;
}

async fn decode_off_thread(data: Bytes, color: TaxiColor) -> Result<Vec<TripRecord>, MlError> {
    tokio::task::spawn_blocking(move || decode_trips(data, color))
        .await
        .map_err(|e| MlError::dataset(format!("parquet decoder task failed: {e}")))?
}

// ---------------------------------------------------------------------------
// HttpParquetSource
// ---------------------------------------------------------------------------

/// Downloads `{base_url}/{color}_tripdata_{YYYY}-{MM}.parquet`.
pub struct HttpParquetSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpParquetSource {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TripSource for HttpParquetSource {
    async fn load(&self, window: TripWindow, color: TaxiColor) -> Result<Vec<TripRecord>, MlError> {
        let url = self.location(window, color);
        info!(url = %url, "Downloading trip data");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(MlError::dataset(format!(
                "download of {url} failed with status {}",
                response.status()
            )));
        }
        let body = response.bytes().await?;
        debug!(url = %url, bytes = body.len(), "Trip data downloaded");

        decode_off_thread(body, color).await
    }

    fn location(&self, window: TripWindow, color: TaxiColor) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            window.file_name(color)
        )
    }
}

// ---------------------------------------------------------------------------
// LocalParquetSource
// ---------------------------------------------------------------------------

/// Reads the published file names from a local directory.
pub struct LocalParquetSource {
    dir: PathBuf,
}

impl LocalParquetSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, window: TripWindow, color: TaxiColor) -> PathBuf {
        self.dir.join(window.file_name(color))
    }
}

#[async_trait]
impl TripSource for LocalParquetSource {
    async fn load(&self, window: TripWindow, color: TaxiColor) -> Result<Vec<TripRecord>, MlError> {
        let path = self.path(window, color);
        if !path.exists() {
            return Err(MlError::not_found(format!(
                "trip data file {}",
                path.display()
            )));
        }
        let data = tokio::fs::read(&path).await?;
        decode_off_thread(Bytes::from(data), color).await
    }

    fn location(&self, window: TripWindow, color: TaxiColor) -> String {
        self.path(window, color).display().to_string()
    }
}

// ---------------------------------------------------------------------------
// StaticSource
// ---------------------------------------------------------------------------

/// Serves pre-built records from memory. Missing windows are `NotFound`.
#[derive(Debug, Default, Clone)]
pub struct StaticSource {
    windows: HashMap<(TripWindow, TaxiColor), Vec<TripRecord>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(
        mut self,
        window: TripWindow,
        color: TaxiColor,
        records: Vec<TripRecord>,
    ) -> Self {
        self.windows.insert((window, color), records);
        self
    }
}

#[async_trait]
impl TripSource for StaticSource {
    async fn load(&self, window: TripWindow, color: TaxiColor) -> Result<Vec<TripRecord>, MlError> {
        self.windows
            .get(&(window, color))
            .cloned()
            .ok_or_else(|| MlError::not_found(format!("no trips for {color} {window}")))
    }

    fn location(&self, window: TripWindow, color: TaxiColor) -> String {
        format!("memory://{}", window.file_name(color))
    }
}
