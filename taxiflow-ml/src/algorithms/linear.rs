//! Ordinary least squares on a sparse design matrix.
//!
//! The intercept is handled by centering: the coefficients are the
//! minimum-norm least-squares solution over the centered columns, and the
//! intercept is `ȳ - x̄·w`. Fully one-hot encoded categoricals are rank
//! deficient once centered, so the solve goes through an SVD and drops
//! singular values below `rcond` times the largest one.
//!
//! The normal matrix is accumulated row by row from the sparse design, so
//! memory grows with the square of the feature count and not with the number
//! of trips.

use crate::artifact::{load_gz_json, save_gz_json};
use crate::error::MlError;
use crate::features::DesignMatrix;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Solver settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressionParams {
    /// Singular values below `rcond · σ_max` are treated as zero.
    pub rcond: f64,
}

impl Default for LinearRegressionParams {
    fn default() -> Self {
        Self { rcond: 1e-10 }
    }
}

/// A fitted linear model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegression {
    intercept: f64,
    coefficients: Vec<f64>,
    rank: usize,
}

impl LinearRegression {
    pub fn fit(
        x: &DesignMatrix,
        y: &[f64],
        params: &LinearRegressionParams,
    ) -> Result<Self, MlError> {
        let n = x.nrows();
        if n == 0 {
            return Err(MlError::training("cannot fit on an empty training set"));
        }
        if n != y.len() {
            return Err(MlError::training(format!(
                "design matrix has {n} rows but target has {}",
                y.len()
            )));
        }

        let p = x.ncols();
        let n_f = n as f64;
        let y_mean = y.iter().sum::<f64>() / n_f;

        // XᵀX, Xᵀy and column sums in one pass over the stored entries.
        let mut gram = DMatrix::<f64>::zeros(p, p);
        let mut xty = DVector::<f64>::zeros(p);
        let mut col_sum = DVector::<f64>::zeros(p);
        for (row, &target) in x.row_iter().zip(y) {
            let cols = row.col_indices();
            let vals = row.values();
            for (a, (&j, &xj)) in cols.iter().zip(vals).enumerate() {
                col_sum[j] += xj;
                xty[j] += xj * target;
                for (&k, &xk) in cols[a..].iter().zip(&vals[a..]) {
                    gram[(j, k)] += xj * xk;
                }
            }
        }
        // Only the upper triangle was filled.
        for j in 0..p {
            for k in 0..j {
                gram[(j, k)] = gram[(k, j)];
            }
        }

        // Center: XcᵀXc = XᵀX - n x̄x̄ᵀ and Xcᵀyc = Xᵀy - n x̄ȳ.
        let x_mean = col_sum / n_f;
        gram -= (&x_mean * x_mean.transpose()) * n_f;
        let rhs = xty - &x_mean * (n_f * y_mean);

        let (coefficients, rank) = if p == 0 {
            (DVector::zeros(0), 0)
        } else {
            let svd = gram.svd(true, true);
            let eps = svd.singular_values.max() * params.rcond;
            let rank = svd.rank(eps);
            let w = svd.solve(&rhs, eps).map_err(MlError::training)?;
            (w, rank)
        };
        let intercept = y_mean - x_mean.dot(&coefficients);

        debug!(rows = n, features = p, rank, "Linear regression fitted");
        Ok(Self {
            intercept,
            coefficients: coefficients.iter().copied().collect(),
            rank,
        })
    }

    pub fn predict(&self, x: &DesignMatrix) -> Result<Vec<f64>, MlError> {
        if x.ncols() != self.coefficients.len() {
            return Err(MlError::model(format!(
                "model expects {} features, got {}",
                self.coefficients.len(),
                x.ncols()
            )));
        }
        Ok(x
            .row_iter()
            .map(|row| {
                let dot: f64 = row
                    .col_indices()
                    .iter()
                    .zip(row.values())
                    .map(|(&j, v)| v * self.coefficients[j])
                    .sum();
                dot + self.intercept
            })
            .collect())
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Numerical rank of the centered design.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn save(&self, path: &Path) -> Result<(), MlError> {
        save_gz_json(path, self)
    }

    pub fn load(path: &Path) -> Result<Self, MlError> {
        load_gz_json(path)
    }
}
