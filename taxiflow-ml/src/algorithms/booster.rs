//! Gradient-boosted regression trees on top of XGBoost.
//!
//! Training adds one round at a time and scores the validation set after
//! each, so early stopping works the same way whatever the round budget.
//! The native booster handle is not `Send`; everything here is synchronous
//! and callers keep it off `.await` points.

use crate::error::MlError;
use crate::features::DesignMatrix;
use crate::training::metrics::rmse;
use std::path::Path;
use taxiflow_core::BoosterParams;
use tracing::{debug, info};
use xgboost::parameters::learning::{LearningTaskParametersBuilder, Objective};
use xgboost::parameters::tree::TreeBoosterParametersBuilder;
use xgboost::parameters::{BoosterParameters, BoosterParametersBuilder, BoosterType};
use xgboost::{Booster, DMatrix};

/// A trained booster and the validation score of its best round.
pub struct GradientBoosting {
    booster: Booster,
    best_round: u32,
    best_rmse: f64,
    rounds: u32,
}

impl std::fmt::Debug for GradientBoosting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GradientBoosting")
            .field("best_round", &self.best_round)
            .field("best_rmse", &self.best_rmse)
            .field("rounds", &self.rounds)
            .finish()
    }
}

impl GradientBoosting {
    /// Train on `(x_train, y_train)`, watching `(x_val, y_val)`.
    pub fn fit(
        x_train: &DesignMatrix,
        y_train: &[f64],
        x_val: &DesignMatrix,
        y_val: &[f64],
        params: &BoosterParams,
    ) -> Result<Self, MlError> {
        if x_train.nrows() == 0 {
            return Err(MlError::training("cannot fit on an empty training set"));
        }
        if x_val.nrows() == 0 {
            return Err(MlError::training("cannot validate on an empty set"));
        }
        if x_val.ncols() != x_train.ncols() {
            return Err(MlError::training(format!(
                "validation has {} features, training has {}",
                x_val.ncols(),
                x_train.ncols()
            )));
        }

        let dtrain = to_dmatrix(x_train, Some(y_train))?;
        let dval = to_dmatrix(x_val, Some(y_val))?;
        let booster_params = booster_parameters(params)?;
        let mut booster = Booster::new_with_cached_dmats(&booster_params, &[&dtrain, &dval])?;

        let mut best_round = 0;
        let mut best_rmse = f64::INFINITY;
        let mut rounds = 0;
        for round in 0..params.num_boost_round {
            booster.update(&dtrain, round as i32)?;
            rounds = round + 1;
            let pred = widen(booster.predict(&dval)?);
            let score = rmse(y_val, &pred)?;
            debug!(round, validation_rmse = score, "Boosting round");
            if score < best_rmse {
                best_rmse = score;
                best_round = round;
            } else if round - best_round >= params.early_stopping_rounds {
                info!(round, best_round, "Stopping early, validation RMSE stopped improving");
                break;
            }
        }

        Ok(Self {
            booster,
            best_round,
            best_rmse,
            rounds,
        })
    }

    pub fn predict(&self, x: &DesignMatrix) -> Result<Vec<f64>, MlError> {
        let dmat = to_dmatrix(x, None)?;
        Ok(widen(self.booster.predict(&dmat)?))
    }

    /// Rounds actually trained.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn best_round(&self) -> u32 {
        self.best_round
    }

    pub fn best_rmse(&self) -> f64 {
        self.best_rmse
    }

    /// Write the native model file.
    pub fn save(&self, path: &Path) -> Result<(), MlError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.booster.save(path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, MlError> {
        let booster = Booster::load(path)?;
        Ok(Self {
            booster,
            best_round: 0,
            best_rmse: f64::NAN,
            rounds: 0,
        })
    }
}

fn booster_parameters(params: &BoosterParams) -> Result<BoosterParameters, MlError> {
    let tree = TreeBoosterParametersBuilder::default()
        .eta(params.learning_rate as f32)
        .max_depth(params.max_depth)
        .min_child_weight(params.min_child_weight as f32)
        .alpha(params.reg_alpha as f32)
        .lambda(params.reg_lambda as f32)
        .build()
        .map_err(MlError::training)?;
    let learning = LearningTaskParametersBuilder::default()
        .objective(Objective::RegLinear)
        .seed(params.seed)
        .build()
        .map_err(MlError::training)?;
    BoosterParametersBuilder::default()
        .booster_type(BoosterType::Tree(tree))
        .learning_params(learning)
        .verbose(false)
        .build()
        .map_err(MlError::training)
}

/// CSR design to an XGBoost matrix, with optional labels.
fn to_dmatrix(x: &DesignMatrix, labels: Option<&[f64]>) -> Result<DMatrix, MlError> {
    let values: Vec<f32> = x.values().iter().map(|&v| v as f32).collect();
    let mut dmat = DMatrix::from_csr(x.row_offsets(), x.col_indices(), &values, Some(x.ncols()))?;
    if let Some(labels) = labels {
        if labels.len() != x.nrows() {
            return Err(MlError::training(format!(
                "design matrix has {} rows but target has {}",
                x.nrows(),
                labels.len()
            )));
        }
        let labels: Vec<f32> = labels.iter().map(|&v| v as f32).collect();
        dmat.set_labels(&labels)?;
    }
    Ok(dmat)
}

fn widen(pred: Vec<f32>) -> Vec<f64> {
    pred.into_iter().map(f64::from).collect()
}
