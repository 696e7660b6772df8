//! Core traits for DiscoStat
//!
//! The harness never depends on a concrete likelihood or optimizer. Both are
//! consumed through the capability traits below, so any backend that can
//! evaluate a binned likelihood, minimize it and sample from it can be
//! plugged in.

use crate::{Constraint, Dataset, FitOutcome, Parameter, ParameterSet, Result};

/// Binned likelihood over a fixed, ordered parameter list.
///
/// `values` slices are always in the order returned by [`Likelihood::parameters`]
/// and include global observables, which act as constants.
pub trait Likelihood: Send + Sync + std::fmt::Debug {
    /// Likelihood name
    fn name(&self) -> &str;

    /// Declared parameters with default values and ranges.
    fn parameters(&self) -> Vec<Parameter>;

    /// Number of main bins (flat over all channels).
    fn n_bins(&self) -> usize;

    /// Expected main-bin yields.
    fn expected_main(&self, values: &[f64]) -> Result<Vec<f64>>;

    /// Negative log-likelihood of `data` at `values`.
    fn nll(&self, values: &[f64], data: &Dataset) -> Result<f64>;

    /// Constraint term of a nuisance parameter, if it has one.
    fn constraint(&self, parameter: &str) -> Option<Constraint>;
}

/// Dataset generation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateMode {
    /// Poisson-fluctuate each main bin.
    Binned,
    /// Event-level generation.
    Unbinned,
}

/// Options for one generated dataset.
#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    /// Generation mode
    pub mode: GenerateMode,
    /// RNG seed for this dataset
    pub seed: u64,
    /// Also draw global observables from their constraint terms
    pub randomize_global_observables: bool,
}

/// Minimization and sampling service.
pub trait FittingService: Send + Sync {
    /// Minimize the NLL of `data`.
    ///
    /// Parameters named in `fixed`, constant parameters and global observables
    /// stay at their current values. On return `params` holds the best fit.
    fn minimize(
        &self,
        likelihood: &dyn Likelihood,
        data: &Dataset,
        params: &mut ParameterSet,
        fixed: &[&str],
    ) -> Result<FitOutcome>;

    /// Draw one pseudo-dataset at the given parameter point.
    fn generate(
        &self,
        likelihood: &dyn Likelihood,
        params: &ParameterSet,
        options: GenerateOptions,
    ) -> Result<Dataset>;
}
