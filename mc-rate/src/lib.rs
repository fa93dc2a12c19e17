//! # mc-rate: per-cell methylation rate estimates
//!
//! Raw `mc / cov` rates are noisy for features with little coverage. The posterior rate
//! shrinks each feature towards a per-cell beta prior fit by the method of moments.

#![deny(missing_docs)]

/// Empirical-Bayes posterior methylation rate
pub mod posterior;

/// Background-corrected GpC accessibility rate
pub mod gch;

pub use gch::calculate_gch_rate;
pub use posterior::{calculate_posterior_mc_rate, calculate_posterior_mc_rate_chunked, BetaPrior};
