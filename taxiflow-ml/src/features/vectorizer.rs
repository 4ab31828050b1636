//! Dictionary vectorizer: one-hot for strings, passthrough for numbers.

use crate::artifact::{load_gz_json, save_gz_json};
use crate::error::MlError;
use crate::features::DesignMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// A single feature value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Str(String),
    Num(f64),
}

impl From<&str> for FeatureValue {
    fn from(s: &str) -> Self {
        FeatureValue::Str(s.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(s: String) -> Self {
        FeatureValue::Str(s)
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Num(v)
    }
}

/// One row: feature key to value.
pub type FeatureDict = BTreeMap<String, FeatureValue>;

/// Maps feature dictionaries onto a fixed, sorted column space.
///
/// A string value `v` under key `k` becomes the indicator column `k=v`; a
/// numeric value under `k` is written as-is into column `k`. The vocabulary
/// is frozen by [`DictVectorizer::fit`]; anything unseen at fit time is
/// dropped by [`DictVectorizer::transform`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictVectorizer {
    separator: String,
    feature_names: Vec<String>,
    vocabulary: BTreeMap<String, usize>,
}

impl DictVectorizer {
    /// Learn the vocabulary of `dicts`.
    pub fn fit(dicts: &[FeatureDict]) -> Self {
        let separator = "=".to_string();
        let names: BTreeSet<String> = dicts
            .iter()
            .flat_map(|d| d.iter())
            .map(|(key, value)| column_name(&separator, key, value))
            .collect();
        let feature_names: Vec<String> = names.into_iter().collect();
        let vocabulary = feature_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            separator,
            feature_names,
            vocabulary,
        }
    }

    /// Fit on `dicts` and encode them in one pass.
    pub fn fit_transform(dicts: &[FeatureDict]) -> Result<(Self, DesignMatrix), MlError> {
        let vectorizer = Self::fit(dicts);
        let matrix = vectorizer.transform(dicts)?;
        Ok((vectorizer, matrix))
    }

    /// Encode `dicts` into a matrix of width [`Self::n_features`].
    pub fn transform(&self, dicts: &[FeatureDict]) -> Result<DesignMatrix, MlError> {
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut values = Vec::new();
        for (i, d) in dicts.iter().enumerate() {
            for (key, value) in d {
                let name = column_name(&self.separator, key, value);
                let Some(&col) = self.vocabulary.get(&name) else {
                    continue;
                };
                rows.push(i);
                cols.push(col);
                values.push(match value {
                    FeatureValue::Str(_) => 1.0,
                    FeatureValue::Num(n) => *n,
                });
            }
        }
        let coo =
            CooMatrix::try_from_triplets(dicts.len(), self.n_features(), rows, cols, values)?;
        Ok(CsrMatrix::from(&coo))
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn save(&self, path: &Path) -> Result<(), MlError> {
        save_gz_json(path, self)
    }

    pub fn load(path: &Path) -> Result<Self, MlError> {
        load_gz_json(path)
    }
}

fn column_name(separator: &str, key: &str, value: &FeatureValue) -> String {
    match value {
        FeatureValue::Str(s) => format!("{key}{separator}{s}"),
        FeatureValue::Num(_) => key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;
    use pretty_assertions::assert_eq;

    fn dict(route: &str, distance: f64) -> FeatureDict {
        let mut d = FeatureDict::new();
        d.insert("PU_DO".into(), route.into());
        d.insert("trip_distance".into(), distance.into());
        d
    }

    #[test]
    fn test_vocabulary_is_sorted() {
        let dv = DictVectorizer::fit(&[dict("74_75", 1.0), dict("10_20", 2.0), dict("74_75", 3.0)]);
        assert_eq!(
            dv.feature_names(),
            &["PU_DO=10_20", "PU_DO=74_75", "trip_distance"]
        );
    }

    #[test]
    fn test_transform_one_hot_and_numeric() {
        let train = vec![dict("74_75", 1.5), dict("10_20", 2.0)];
        let (dv, x) = DictVectorizer::fit_transform(&train).unwrap();
        assert_eq!(
            DMatrix::from(&x),
            DMatrix::from_row_slice(2, 3, &[0.0, 1.0, 1.5, 1.0, 0.0, 2.0])
        );

        let val = dv.transform(&[dict("99_99", 4.0)]).unwrap();
        assert_eq!(val.ncols(), dv.n_features());
        assert_eq!(DMatrix::from(&val), DMatrix::from_row_slice(1, 3, &[0.0, 0.0, 4.0]));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("preprocessor.b");
        let dv = DictVectorizer::fit(&[dict("1_2", 0.5)]);
        dv.save(&path).unwrap();
        assert_eq!(DictVectorizer::load(&path).unwrap(), dv);
    }
}
