//! Maximum likelihood estimation
//!
//! [`MaximumLikelihoodEstimator`] is the reference [`FittingService`]: it
//! minimizes the NLL over the floating parameters with bounded L-BFGS and
//! estimates their covariance from a finite-difference Hessian. Fit quality
//! is reported with Minuit numbering:
//!
//! | status | meaning                                     | covQual |
//! |--------|---------------------------------------------|---------|
//! | 0      | converged, Hessian positive definite        | 3       |
//! | 1      | converged, Hessian needed diagonal damping  | 2       |
//! | 2      | converged, Hessian not invertible           | 1       |
//! | 3      | stopped without meeting the tolerance       | any     |
//! | 4      | iteration limit reached                     | any     |

use crate::optimizer::{BoundedLbfgs, ObjectiveFunction, OptimizerConfig};
use crate::toys;
use ds_core::{
    CovQuality, Dataset, Error, FitOutcome, FitStatus, FittedParameter, FittingService,
    GenerateOptions, Likelihood, ParamRole, ParameterSet, Result,
};
use nalgebra::DMatrix;

/// NLL restricted to a subset of floating parameters; the rest stay at `base`.
struct FloatingObjective<'a> {
    likelihood: &'a dyn Likelihood,
    data: &'a Dataset,
    base: Vec<f64>,
    floating: &'a [usize],
}

impl FloatingObjective<'_> {
    fn expand(&self, x: &[f64]) -> Vec<f64> {
        let mut full = self.base.clone();
        for (&idx, &v) in self.floating.iter().zip(x) {
            full[idx] = v;
        }
        full
    }
}

impl ObjectiveFunction for FloatingObjective<'_> {
    fn eval(&self, x: &[f64]) -> Result<f64> {
        self.likelihood.nll(&self.expand(x), self.data)
    }
}

/// Covariance estimate and its quality.
struct Covariance {
    matrix: Option<DMatrix<f64>>,
    errors: Vec<f64>,
    quality: CovQuality,
}

/// Maximum likelihood estimator
#[derive(Debug, Clone, Default)]
pub struct MaximumLikelihoodEstimator {
    optimizer: BoundedLbfgs,
}

impl MaximumLikelihoodEstimator {
    /// Estimator with default optimizer settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Estimator with custom optimizer settings
    pub fn with_config(config: OptimizerConfig) -> Self {
        Self { optimizer: BoundedLbfgs::new(config) }
    }

    /// Optimizer settings
    pub fn config(&self) -> &OptimizerConfig {
        self.optimizer.config()
    }

    /// Indices of parameters that float: real-valued, not constant, not a
    /// global observable and not listed in `fixed`.
    fn floating_indices(params: &ParameterSet, fixed: &[&str]) -> Vec<usize> {
        params
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                p.role != ParamRole::GlobalObservable
                    && p.is_real()
                    && !p.constant
                    && !fixed.contains(&p.name.as_str())
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Hessian by forward differences of the gradient, symmetrized.
    fn compute_hessian(objective: &dyn ObjectiveFunction, best: &[f64]) -> Result<DMatrix<f64>> {
        let n = best.len();
        let g0 = objective.gradient(best)?;
        let mut hessian = DMatrix::zeros(n, n);
        let mut shifted = best.to_vec();
        for j in 0..n {
            let h = 1e-4 * best[j].abs().max(1.0);
            shifted[j] = best[j] + h;
            let g = objective.gradient(&shifted)?;
            shifted[j] = best[j];
            for i in 0..n {
                hessian[(i, j)] = (g[i] - g0[i]) / h;
            }
        }
        let ht = hessian.transpose();
        Ok((&hessian + &ht) * 0.5)
    }

    /// Invert the Hessian by Cholesky, adding diagonal damping if needed.
    ///
    /// Returns the covariance and whether damping was applied.
    fn invert_hessian(hessian: &DMatrix<f64>) -> Option<(DMatrix<f64>, bool)> {
        let n = hessian.nrows();
        let identity = DMatrix::identity(n, n);
        let scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

        let mut damped = hessian.clone();
        let mut damping = 0.0_f64;
        for attempt in 0..10 {
            if let Some(chol) = nalgebra::linalg::Cholesky::new(damped.clone()) {
                let cov = chol.solve(&identity);
                if (0..n).all(|i| cov[(i, i)].is_finite() && cov[(i, i)] > 0.0) {
                    return Some((cov, attempt > 0));
                }
            }
            let next = if damping == 0.0 { scale * 1e-9 } else { damping * 10.0 };
            for i in 0..n {
                damped[(i, i)] += next - damping;
            }
            damping = next;
        }
        None
    }

    fn covariance(hessian: &DMatrix<f64>) -> Covariance {
        let n = hessian.nrows();
        match Self::invert_hessian(hessian) {
            Some((cov, damped)) => {
                let errors = (0..n).map(|i| cov[(i, i)].sqrt()).collect();
                let quality = if damped { CovQuality::ForcedPosDef } else { CovQuality::Accurate };
                Covariance { matrix: Some(cov), errors, quality }
            }
            None => {
                log::warn!("Hessian inversion failed, using diagonal approximation");
                let errors =
                    (0..n).map(|i| 1.0 / hessian[(i, i)].abs().max(1e-12).sqrt()).collect();
                Covariance { matrix: None, errors, quality: CovQuality::Approximate }
            }
        }
    }
}

impl FittingService for MaximumLikelihoodEstimator {
    fn minimize(
        &self,
        likelihood: &dyn Likelihood,
        data: &Dataset,
        params: &mut ParameterSet,
        fixed: &[&str],
    ) -> Result<FitOutcome> {
        if data.n_bins() != likelihood.n_bins() {
            return Err(Error::Validation(format!(
                "dataset '{}' has {} bins, likelihood '{}' has {}",
                data.name,
                data.n_bins(),
                likelihood.name(),
                likelihood.n_bins()
            )));
        }

        let floating = Self::floating_indices(params, fixed);
        let objective =
            FloatingObjective { likelihood, data, base: params.values(), floating: &floating };

        if floating.is_empty() {
            let nll = objective.eval(&[])?;
            return Ok(FitOutcome {
                status: FitStatus::Converged.code(),
                min_nll: nll,
                cov_qual: CovQuality::NotCalculated.code(),
                parameters: params
                    .iter()
                    .map(|p| FittedParameter {
                        name: p.name.clone(),
                        value: p.value,
                        error: 0.0,
                        floating: false,
                    })
                    .collect(),
                covariance: None,
                n_iter: 0,
                n_fev: 1,
                message: "no floating parameters".to_string(),
            });
        }

        let all_bounds = params.bounds();
        let init: Vec<f64> = floating.iter().map(|&i| objective.base[i]).collect();
        let bounds: Vec<(f64, f64)> = floating.iter().map(|&i| all_bounds[i]).collect();
        let res = self.optimizer.minimize(&objective, &init, &bounds)?;

        let hessian = Self::compute_hessian(&objective, &res.parameters)?;
        let cov = Self::covariance(&hessian);

        let status = if res.converged {
            match cov.quality {
                CovQuality::Accurate => FitStatus::Converged,
                CovQuality::ForcedPosDef => FitStatus::CovarianceForcedPosDef,
                _ => FitStatus::HesseFailed,
            }
        } else if res.hit_max_iter {
            FitStatus::CallLimit
        } else {
            FitStatus::EdmAboveMax
        };
        if status != FitStatus::Converged {
            log::debug!("fit on '{}' status {}: {}", data.name, status.code(), res.message);
        }

        let best = objective.expand(&res.parameters);
        params.set_values(&best)?;

        let mut errors = vec![0.0; best.len()];
        for (k, &idx) in floating.iter().enumerate() {
            errors[idx] = cov.errors[k];
        }
        let parameters = params
            .iter()
            .enumerate()
            .map(|(i, p)| FittedParameter {
                name: p.name.clone(),
                value: p.value,
                error: errors[i],
                floating: floating.contains(&i),
            })
            .collect();

        Ok(FitOutcome {
            status: status.code(),
            min_nll: res.fval,
            cov_qual: cov.quality.code(),
            parameters,
            covariance: cov.matrix.map(|m| m.transpose().iter().copied().collect()),
            n_iter: res.n_iter,
            n_fev: res.n_fev,
            message: res.message,
        })
    }

    fn generate(
        &self,
        likelihood: &dyn Likelihood,
        params: &ParameterSet,
        options: GenerateOptions,
    ) -> Result<Dataset> {
        toys::generate_binned(likelihood, params, options)
    }
}
