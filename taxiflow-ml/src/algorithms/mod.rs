//! Regression algorithms.

pub mod booster;
pub mod linear;

pub use booster::GradientBoosting;
pub use linear::{LinearRegression, LinearRegressionParams};
pub use taxiflow_core::BoosterParams;
