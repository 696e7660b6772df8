//! Bounded L-BFGS minimization
//!
//! Thin wrapper around argmin's L-BFGS with a More-Thuente line search.
//! Bounds are enforced by clamping every trial point and projecting the
//! gradient at active bounds.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use ds_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Minimizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum number of iterations
    pub max_iter: u64,
    /// Gradient-norm tolerance
    pub tol: f64,
    /// L-BFGS history size
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-6, m: 10 }
    }
}

/// Outcome of one minimization
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best point found (clamped into bounds)
    pub parameters: Vec<f64>,
    /// Objective at the best point
    pub fval: f64,
    /// Iterations
    pub n_iter: u64,
    /// Objective evaluations
    pub n_fev: usize,
    /// Gradient evaluations
    pub n_gev: usize,
    /// Solver reported convergence
    pub converged: bool,
    /// Iteration limit was the stopping reason
    pub hit_max_iter: bool,
    /// Termination message
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fval={:.6} n_iter={} n_fev={} n_gev={} converged={}",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

/// Scalar objective over a flat parameter vector.
pub trait ObjectiveFunction: Send + Sync {
    /// Objective value
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient; central differences unless overridden.
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let mut grad = Vec::with_capacity(params.len());
        let mut shifted = params.to_vec();
        for i in 0..params.len() {
            let h = 1e-8 * params[i].abs().max(1.0);
            shifted[i] = params[i] + h;
            let up = self.eval(&shifted)?;
            shifted[i] = params[i] - h;
            let down = self.eval(&shifted)?;
            shifted[i] = params[i];
            grad.push((up - down) / (2.0 * h));
        }
        Ok(grad)
    }
}

fn clamp_into(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

#[derive(Default)]
struct EvalCounter {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

struct BoundedProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
    counter: Arc<EvalCounter>,
}

impl CostFunction for BoundedProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<f64, argmin::core::Error> {
        self.counter.cost.fetch_add(1, Ordering::Relaxed);
        self.objective
            .eval(&clamp_into(params, self.bounds))
            .map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl Gradient for BoundedProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, params: &Self::Param) -> std::result::Result<Vec<f64>, argmin::core::Error> {
        self.counter.grad.fetch_add(1, Ordering::Relaxed);
        let x = clamp_into(params, self.bounds);
        let mut g =
            self.objective.gradient(&x).map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        // Zero components that push outward at an active bound.
        const AT_BOUND: f64 = 1e-12;
        for ((gi, &xi), &(lo, hi)) in g.iter_mut().zip(&x).zip(self.bounds) {
            if (xi <= lo + AT_BOUND && *gi > 0.0) || (xi >= hi - AT_BOUND && *gi < 0.0) {
                *gi = 0.0;
            }
        }
        Ok(g)
    }
}

/// L-BFGS minimizer with box bounds
#[derive(Debug, Clone, Default)]
pub struct BoundedLbfgs {
    config: OptimizerConfig,
}

impl BoundedLbfgs {
    /// Minimizer with the given settings
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Settings in use
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Minimize `objective` from `init` inside `bounds`.
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init.len() != bounds.len() {
            return Err(Error::Validation(format!(
                "start point has {} entries, bounds have {}",
                init.len(),
                bounds.len()
            )));
        }

        let counter = Arc::new(EvalCounter::default());
        let problem = BoundedProblem { objective, bounds, counter: Arc::clone(&counter) };

        // argmin's default cost tolerance is ~EPS, far below NLL resolution.
        let tol_cost = if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(MoreThuenteLineSearch::new(), self.config.m)
            .with_tolerance_grad(self.config.tol)
            .and_then(|s| s.with_tolerance_cost(tol_cost))
            .map_err(|e| Error::Validation(format!("invalid optimizer tolerance: {e}")))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(clamp_into(init, bounds)).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("minimization failed: {e}")))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("minimizer produced no best point".to_string()))?;
        let termination = state.get_termination_status();

        Ok(OptimizationResult {
            parameters: clamp_into(best, bounds),
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: counter.cost.load(Ordering::Relaxed),
            n_gev: counter.grad.load(Ordering::Relaxed),
            converged: matches!(
                termination,
                TerminationStatus::Terminated(
                    TerminationReason::SolverConverged | TerminationReason::TargetCostReached
                )
            ),
            hit_max_iter: matches!(
                termination,
                TerminationStatus::Terminated(TerminationReason::MaxItersReached)
            ),
            message: termination.to_string(),
        })
    }
}
