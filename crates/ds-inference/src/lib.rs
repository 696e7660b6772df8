//! # ds-inference
//!
//! Discovery test harness for DiscoStat.
//!
//! This crate provides:
//! - Parameter bounds normalization before fitting
//! - Global observable binding from auxiliary tables
//! - Null and alternate hypothesis models
//! - The profile-likelihood discovery test statistic
//! - Toy ensembles for frequentist calibration
//! - Global significance over mass scans, failed-fit listing and retry merging
//!
//! ## Architecture
//!
//! Evaluation code depends on the `Likelihood` and `FittingService` traits
//! from ds-core. [`MaximumLikelihoodEstimator`] is the bundled fitting
//! service.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Run configuration.
pub mod config;
/// Global significance from toy scans over mass hypotheses.
pub mod global;
/// Global observable binding from auxiliary tables.
pub mod globs;
/// End-to-end evaluation from stored inputs.
pub mod harness;
/// Null and alternate hypothesis models.
pub mod hypothesis;
/// Maximum-likelihood estimation via bounded L-BFGS.
pub mod mle;
/// Parameter bounds normalization.
pub mod normalize;
/// Bounded numerical optimizer.
pub mod optimizer;
/// Profile-likelihood discovery test statistic.
pub mod profile_likelihood;
/// Toy-based frequentist calculator.
pub mod toybased;
/// Pseudo-dataset generation.
pub mod toys;

#[cfg(test)]
mod testing;

pub use config::RunConfig;
pub use global::{
    GlobalConfig, GlobalSignificance, MassDiagnostics, MassPointResult, failed_fits,
    global_significance, merge_retries,
};
pub use globs::{BindReport, BinderConfig, Channel, ChannelBinding, bind_global_observables};
pub use harness::{AuxSource, EvaluateRequest, ToysRequest, evaluate, run_toys};
pub use hypothesis::{build_null_model, ensure_alt_snapshot, prepare_poi};
pub use mle::MaximumLikelihoodEstimator;
pub use normalize::{GammaRangePolicy, NormalizeReport, NormalizerConfig, normalize_parameters};
pub use optimizer::{BoundedLbfgs, ObjectiveFunction, OptimizationResult, OptimizerConfig};
pub use profile_likelihood::{
    DetailedOutput, ProfileLikelihoodTestStat, TestStatConfig, TestStatisticResult,
};
pub use toybased::{
    EmpiricalSignificance, EnsembleResult, FrequentistCalculator, Hypothesis, TailConvention,
    ToyConfig, ToyMcSampler, empirical_p_value, significance_from_p_value, toy_seed,
};
