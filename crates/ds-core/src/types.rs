//! Common data types for DiscoStat

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Role of a parameter inside a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamRole {
    /// Parameter of interest (signal strength).
    Poi,
    /// Constrained or free nuisance parameter, profiled in fits.
    Nuisance,
    /// Auxiliary measurement value; never floated.
    GlobalObservable,
}

/// Value type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    /// Continuous real-valued parameter.
    #[default]
    Real,
    /// Category-like parameter that cannot carry a range or a real value.
    Discrete,
}

/// Model parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name (unique within a model)
    pub name: String,
    /// Current value
    pub value: f64,
    /// Allowed range (min, max)
    pub bounds: (f64, f64),
    /// Role tag
    pub role: ParamRole,
    /// Value type
    #[serde(default)]
    pub kind: ParameterKind,
    /// Held constant in every fit
    #[serde(default)]
    pub constant: bool,
}

impl Parameter {
    /// Create a real-valued parameter.
    pub fn new(name: impl Into<String>, value: f64, bounds: (f64, f64), role: ParamRole) -> Self {
        Self {
            name: name.into(),
            value,
            bounds,
            role,
            kind: ParameterKind::Real,
            constant: role == ParamRole::GlobalObservable,
        }
    }

    /// True if the parameter holds a real value.
    pub fn is_real(&self) -> bool {
        self.kind == ParameterKind::Real
    }

    /// Set the value, clipped into the current range.
    pub fn set_value(&mut self, value: f64) {
        let (lo, hi) = self.bounds;
        self.value = value.clamp(lo, hi);
    }

    /// Replace the range; the current value is clipped into it.
    pub fn set_range(&mut self, lo: f64, hi: f64) {
        self.bounds = (lo, hi);
        self.value = self.value.clamp(lo, hi);
    }
}

/// Ordered parameter collection (likelihood order).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    params: Vec<Parameter>,
}

impl ParameterSet {
    /// Build a set; names must be unique and ranges well-formed.
    pub fn new(params: Vec<Parameter>) -> Result<Self> {
        for (i, p) in params.iter().enumerate() {
            if params[..i].iter().any(|q| q.name == p.name) {
                return Err(Error::Validation(format!("duplicate parameter name '{}'", p.name)));
            }
            if !(p.bounds.0 <= p.bounds.1) {
                return Err(Error::Validation(format!(
                    "parameter '{}' has invalid bounds ({}, {})",
                    p.name, p.bounds.0, p.bounds.1
                )));
            }
        }
        Ok(Self { params })
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// True if there are no parameters
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Iterate in likelihood order.
    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.params.iter()
    }

    /// Mutable iteration in likelihood order.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Parameter> {
        self.params.iter_mut()
    }

    /// Parameters carrying the given role.
    pub fn with_role(&self, role: ParamRole) -> impl Iterator<Item = &Parameter> {
        self.params.iter().filter(move |p| p.role == role)
    }

    /// Position of a named parameter.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    /// Look up a parameter by name.
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Mutable lookup by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.iter_mut().find(|p| p.name == name)
    }

    /// Value of a named parameter; a missing name is a configuration error.
    pub fn value(&self, name: &str) -> Result<f64> {
        self.get(name)
            .map(|p| p.value)
            .ok_or_else(|| Error::Config(format!("parameter '{name}' not found")))
    }

    /// Values in likelihood order.
    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value).collect()
    }

    /// Overwrite all values (likelihood order). Values are taken verbatim.
    pub fn set_values(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.params.len() {
            return Err(Error::Validation(format!(
                "parameter value length mismatch: expected {}, got {}",
                self.params.len(),
                values.len()
            )));
        }
        for (p, &v) in self.params.iter_mut().zip(values) {
            p.value = v;
        }
        Ok(())
    }

    /// Bounds in likelihood order.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.params.iter().map(|p| p.bounds).collect()
    }

    /// Borrow as a slice.
    pub fn as_slice(&self) -> &[Parameter] {
        &self.params
    }
}

/// Named, frozen set of parameter values marking a hypothesis point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot name
    pub name: String,
    /// Parameter name -> frozen value
    pub values: BTreeMap<String, f64>,
}

impl Snapshot {
    /// Single-parameter snapshot.
    pub fn single(name: impl Into<String>, param: impl Into<String>, value: f64) -> Self {
        let mut values = BTreeMap::new();
        values.insert(param.into(), value);
        Self { name: name.into(), values }
    }

    /// Frozen value of a parameter, if recorded.
    pub fn get(&self, param: &str) -> Option<f64> {
        self.values.get(param).copied()
    }
}

/// Observed or generated binned dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Dataset name
    pub name: String,
    /// Main-bin counts, flat in likelihood bin order
    pub counts: Vec<f64>,
    /// Global observable values that belong to this dataset (toys only)
    #[serde(default)]
    pub global_observables: BTreeMap<String, f64>,
}

impl Dataset {
    /// Dataset with main counts only.
    pub fn new(name: impl Into<String>, counts: Vec<f64>) -> Self {
        Self { name: name.into(), counts, global_observables: BTreeMap::new() }
    }

    /// Attach global observable values.
    pub fn with_global_observables(mut self, globs: BTreeMap<String, f64>) -> Self {
        self.global_observables = globs;
        self
    }

    /// Number of main bins.
    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }
}

/// Constraint term attached to a nuisance parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    /// `Gauss(glob | theta, width)`
    Gaussian {
        /// Global observable holding the auxiliary measurement.
        global_observable: String,
        /// Constraint width.
        width: f64,
    },
    /// `Pois(glob | gamma * tau)`
    Poisson {
        /// Global observable holding the auxiliary count.
        global_observable: String,
        /// Constraint scale; the relative width is `sqrt(1/tau)`.
        tau: f64,
    },
}

impl Constraint {
    /// Name of the global observable bound to this constraint.
    pub fn global_observable(&self) -> &str {
        match self {
            Constraint::Gaussian { global_observable, .. }
            | Constraint::Poisson { global_observable, .. } => global_observable,
        }
    }
}

/// Minimizer status, Minuit numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    /// Converged with a valid covariance.
    Converged,
    /// Converged, covariance had to be forced positive definite.
    CovarianceForcedPosDef,
    /// Converged, Hessian could not be inverted.
    HesseFailed,
    /// Stopped without meeting the tolerance.
    EdmAboveMax,
    /// Iteration limit reached.
    CallLimit,
    /// Any other failure.
    Failed,
}

impl FitStatus {
    /// Integer status code (0 = converged).
    pub fn code(self) -> i32 {
        match self {
            FitStatus::Converged => 0,
            FitStatus::CovarianceForcedPosDef => 1,
            FitStatus::HesseFailed => 2,
            FitStatus::EdmAboveMax => 3,
            FitStatus::CallLimit => 4,
            FitStatus::Failed => 5,
        }
    }
}

/// Covariance matrix quality, Minuit numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovQuality {
    /// Not computed.
    NotCalculated,
    /// Diagonal approximation only.
    Approximate,
    /// Full matrix, forced positive definite.
    ForcedPosDef,
    /// Full accurate matrix.
    Accurate,
}

impl CovQuality {
    /// Integer quality code (3 = accurate).
    pub fn code(self) -> i32 {
        match self {
            CovQuality::NotCalculated => 0,
            CovQuality::Approximate => 1,
            CovQuality::ForcedPosDef => 2,
            CovQuality::Accurate => 3,
        }
    }
}

/// Parameter value after a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedParameter {
    /// Parameter name
    pub name: String,
    /// Best-fit value
    pub value: f64,
    /// Symmetric uncertainty (0 for parameters held fixed)
    pub error: f64,
    /// Whether the parameter floated in this fit
    pub floating: bool,
}

/// Result of one minimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitOutcome {
    /// Status code (0 = converged, nonzero = fit-quality issue)
    pub status: i32,
    /// Minimized negative log-likelihood
    pub min_nll: f64,
    /// Covariance quality code
    pub cov_qual: i32,
    /// All model parameters after the fit, likelihood order
    pub parameters: Vec<FittedParameter>,
    /// Covariance of floating parameters (row-major). `None` if unavailable.
    pub covariance: Option<Vec<f64>>,
    /// Optimizer iterations
    pub n_iter: u64,
    /// Objective evaluations
    pub n_fev: usize,
    /// Optimizer termination message
    pub message: String,
}

impl FitOutcome {
    /// True if status is 0.
    pub fn converged(&self) -> bool {
        self.status == 0
    }

    /// Fitted value of a parameter.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.parameters.iter().find(|p| p.name == name).map(|p| p.value)
    }

    /// Fitted uncertainty of a parameter.
    pub fn error(&self, name: &str) -> Option<f64> {
        self.parameters.iter().find(|p| p.name == name).map(|p| p.error)
    }

    /// Number of floating parameters.
    pub fn n_floating(&self) -> usize {
        self.parameters.iter().filter(|p| p.floating).count()
    }
}
