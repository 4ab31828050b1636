//! Monthly trip-data windows.

use crate::error::MlError;
use serde::{Deserialize, Serialize};
use std::fmt;
use taxiflow_core::TaxiColor;

/// Years a window may fall in; file names carry a four-digit year.
pub const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1..=9999;

/// One calendar month of published trip data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TripWindow {
    year: i32,
    month: u32,
}

impl TripWindow {
    /// Build a window, rejecting months outside `1..=12` and years outside
    /// [`YEAR_RANGE`].
    pub fn new(year: i32, month: u32) -> Result<Self, MlError> {
        if !YEAR_RANGE.contains(&year) {
            return Err(MlError::invalid_input(format!(
                "year must be between {} and {}, got {year}",
                YEAR_RANGE.start(),
                YEAR_RANGE.end()
            )));
        }
        if !(1..=12).contains(&month) {
            return Err(MlError::invalid_input(format!(
                "month must be between 1 and 12, got {month}"
            )));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The following calendar month. December rolls over into January.
    ///
    /// Fails past December of the last year in [`YEAR_RANGE`].
    pub fn next(&self) -> Result<Self, MlError> {
        if self.month == 12 {
            Self::new(self.year + 1, 1)
        } else {
            Self::new(self.year, self.month + 1)
        }
    }

    /// Published file name, e.g. `green_tripdata_2023-01.parquet`.
    pub fn file_name(&self, color: TaxiColor) -> String {
        format!("{color}_tripdata_{:04}-{:02}.parquet", self.year, self.month)
    }
}

impl fmt::Display for TripWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}
