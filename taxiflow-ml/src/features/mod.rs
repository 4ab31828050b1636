//! Feature encoding for trip tables.

pub mod vectorizer;

pub use vectorizer::{DictVectorizer, FeatureDict, FeatureValue};

use crate::data::{TripRecord, TripTable};
use crate::error::MlError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sparse design matrix produced by the encoder.
pub type DesignMatrix = nalgebra_sparse::CsrMatrix<f64>;

/// Which columns of a trip feed the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSet {
    /// `PU_DO` route key (categorical) plus `trip_distance` (numeric).
    Route,
    /// `PULocationID` and `DOLocationID` as separate categoricals.
    Locations,
}

impl FeatureSet {
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureSet::Route => "route",
            FeatureSet::Locations => "locations",
        }
    }

    pub fn to_dict(self, trip: &TripRecord) -> FeatureDict {
        let mut dict = FeatureDict::new();
        match self {
            FeatureSet::Route => {
                dict.insert("PU_DO".into(), FeatureValue::Str(trip.pu_do()));
                dict.insert(
                    "trip_distance".into(),
                    FeatureValue::Num(trip.trip_distance),
                );
            }
            FeatureSet::Locations => {
                dict.insert(
                    "PULocationID".into(),
                    FeatureValue::Str(trip.pu_location_id.clone()),
                );
                dict.insert(
                    "DOLocationID".into(),
                    FeatureValue::Str(trip.do_location_id.clone()),
                );
            }
        }
        dict
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode a table into a design matrix.
///
/// Without an encoder a new one is fitted on `table`; with one, the table is
/// only transformed. The encoder is handed back either way.
pub fn encode(
    table: &TripTable,
    features: FeatureSet,
    encoder: Option<DictVectorizer>,
) -> Result<(DesignMatrix, DictVectorizer), MlError> {
    let dicts: Vec<FeatureDict> = table
        .records()
        .iter()
        .map(|trip| features.to_dict(trip))
        .collect();

    match encoder {
        Some(dv) => {
            let x = dv.transform(&dicts)?;
            Ok((x, dv))
        }
        None => {
            let (dv, x) = DictVectorizer::fit_transform(&dicts)?;
            Ok((x, dv))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn table(routes: &[(i64, i64)]) -> TripTable {
        let pickup = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        TripTable::prepare(
            routes
                .iter()
                .map(|&(pu, dl)| {
                    TripRecord::new(pickup, pickup + Duration::minutes(10), pu, dl, 2.0)
                })
                .collect(),
        )
    }

    #[test]
    fn test_validation_uses_training_width() {
        let train = table(&[(1, 2), (3, 4), (5, 6)]);
        let val = table(&[(1, 2), (7, 8)]);

        let (x_train, dv) = encode(&train, FeatureSet::Route, None).unwrap();
        let (x_val, _) = encode(&val, FeatureSet::Route, Some(dv)).unwrap();

        assert_eq!(x_train.ncols(), 4);
        assert_eq!(x_val.ncols(), x_train.ncols());
        assert_eq!(x_val.nrows(), 2);
    }

    #[test]
    fn test_locations_feature_set() {
        let train = table(&[(1, 2), (1, 3)]);
        let (x, dv) = encode(&train, FeatureSet::Locations, None).unwrap();
        assert_eq!(
            dv.feature_names(),
            &["DOLocationID=2", "DOLocationID=3", "PULocationID=1"]
        );
        assert_eq!(x.nnz(), 4);
    }
}
