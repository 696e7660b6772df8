//! Global significance from toy scans over mass hypotheses.
//!
//! Each toy experiment is evaluated at every mass point. A toy counts only
//! when all of its fits succeeded. Its largest local significance
//! `Z = sqrt(q0)` is compared with the observed local significance to give
//! the global p-value. The same maxima also fix a trial factor `N`, the
//! number of independent standard normals whose maximum best describes them.
//!
//! The p-value interval is the 68% binomial likelihood interval
//! (`-2 Δ ln L = 1`) around `k / n`.

use crate::profile_likelihood::TestStatisticResult;
use crate::toybased::significance_from_p_value;
use argmin::core::{CostFunction, Executor, State};
use argmin::solver::brent::BrentRoot;
use ds_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Normalization factor reported in the `*_zhf` columns.
pub const ZHF_NORM: &str = "ATLAS_norm_Zhf";
/// Normalization factor reported in the `*_ttbar` columns.
pub const TTBAR_NORM: &str = "ATLAS_norm_ttbar";

fn nan() -> f64 {
    f64::NAN
}

fn secondary(map: &BTreeMap<String, f64>, name: &str) -> f64 {
    map.get(name).copied().unwrap_or(f64::NAN)
}

/// One evaluation of one experiment at one mass hypothesis.
///
/// This is also the CSV row layout of `discostat evaluate --format csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MassPointResult {
    /// Experiment (toy) index
    pub index: usize,
    /// Mass hypothesis
    pub mass: f64,
    /// Test statistic
    pub q0: f64,
    /// Unconditional best-fit POI
    pub muhat: f64,
    /// Unconditional fit status
    pub uncond_status: i32,
    /// Unconditional minimum NLL
    #[serde(rename = "uncond_minNLL")]
    pub uncond_min_nll: f64,
    /// Conditional fit status
    pub cond_status: i32,
    /// Conditional minimum NLL
    #[serde(rename = "cond_minNLL")]
    pub cond_min_nll: f64,
    /// Zhf normalization after the conditional fit
    #[serde(default = "nan")]
    pub cond_zhf: f64,
    /// Zhf normalization after the unconditional fit
    #[serde(default = "nan")]
    pub uncond_zhf: f64,
    /// ttbar normalization after the conditional fit
    #[serde(default = "nan")]
    pub cond_ttbar: f64,
    /// ttbar normalization after the unconditional fit
    #[serde(default = "nan")]
    pub uncond_ttbar: f64,
    /// Unconditional covariance quality
    #[serde(rename = "uncond_covQual", default)]
    pub uncond_cov_qual: i32,
    /// Conditional covariance quality
    #[serde(rename = "cond_covQual", default)]
    pub cond_cov_qual: i32,
    /// POI range half-width used for the fits
    pub mu_range: f64,
}

impl MassPointResult {
    /// Row for an evaluation result.
    pub fn from_result(index: usize, mass: f64, mu_range: f64, r: &TestStatisticResult) -> Self {
        Self {
            index,
            mass,
            q0: r.ts,
            muhat: r.muhat,
            uncond_status: r.uncond_status,
            uncond_min_nll: r.uncond_min_nll,
            cond_status: r.cond_status,
            cond_min_nll: r.cond_min_nll,
            cond_zhf: secondary(&r.cond_secondary, ZHF_NORM),
            uncond_zhf: secondary(&r.uncond_secondary, ZHF_NORM),
            cond_ttbar: secondary(&r.cond_secondary, TTBAR_NORM),
            uncond_ttbar: secondary(&r.uncond_secondary, TTBAR_NORM),
            uncond_cov_qual: r.uncond_cov_qual,
            cond_cov_qual: r.cond_cov_qual,
            mu_range,
        }
    }

    /// Either fit reported a nonzero status.
    pub fn failed(&self) -> bool {
        self.cond_status != 0 || self.uncond_status != 0
    }

    fn key(&self) -> (usize, u64) {
        (self.index, self.mass.to_bits())
    }
}

/// Global analysis settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Negative `q0` down to `-negative_q0_tolerance` is fit noise and is silently zeroed.
    /// Anything lower is zeroed with a warning.
    pub negative_q0_tolerance: f64,
    /// Allowed range of the fitted trial factor
    pub trial_factor_bounds: (f64, f64),
    /// Iteration cap of the interval root searches
    pub max_iter: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self { negative_q0_tolerance: 0.05, trial_factor_bounds: (10.0, 21.0), max_iter: 100 }
    }
}

/// Fit diagnostics of the successful fits at one mass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MassDiagnostics {
    /// Mass hypothesis
    pub mass: f64,
    /// Successful fits
    pub n_fits: usize,
    /// Fraction of all results at this mass with a failed fit
    pub fail_rate: f64,
    /// Smallest `muhat`
    pub muhat_min: f64,
    /// Largest `muhat`
    pub muhat_max: f64,
    /// Mean `muhat`
    pub muhat_mean: f64,
    /// Sample standard deviation of `muhat`
    pub muhat_std: f64,
    /// Standard error of the mean
    pub mean_error: f64,
    /// `muhat_mean / mean_error`
    pub bias_significance: f64,
    /// Smallest POI range half-width
    pub mu_range: f64,
    /// `muhat_max / mu_range`
    pub max_muhat_over_range: f64,
    /// `max(-muhat_min, muhat_max)`
    pub muhat_abs_max: f64,
    /// `muhat_abs_max / muhat_std`
    pub muhat_abs_max_over_std: f64,
}

/// Global p-value, significance and trial factor of a toy scan.
///
/// Infinite significances (at `p = 0`) serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalSignificance {
    /// Observed maximum local significance
    pub observed_z: f64,
    /// Distinct toy experiments
    pub n_toys: usize,
    /// Toys whose fits all succeeded
    pub n_good_toys: usize,
    /// Results with a failed fit
    pub n_failed_fits: usize,
    /// Good-toy results with `q0` below the noise tolerance
    pub n_negative_q0: usize,
    /// Good toys whose maximum exceeds `observed_z`
    pub n_exceeding: usize,
    /// Global p-value
    pub p_value: f64,
    /// 68% interval on the global p-value
    pub p_value_interval: (f64, f64),
    /// Global significance
    pub significance: f64,
    /// 68% interval on the global significance
    pub significance_interval: (f64, f64),
    /// No toy exceeded the observation, so `significance` is taken at `p = 1/n`
    pub significance_is_lower_bound: bool,
    /// Fitted trial factor
    pub trial_factor: f64,
    /// Global significance from the local one and the trial factor
    pub trial_factor_significance: f64,
    /// Per-mass fit diagnostics
    pub masses: Vec<MassDiagnostics>,
}

fn check_unique(records: &[MassPointResult]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for r in records {
        if !seen.insert(r.key()) {
            return Err(Error::Validation(format!(
                "duplicate result for toy {} at mass {}",
                r.index, r.mass
            )));
        }
    }
    Ok(())
}

fn check_complete(records: &[MassPointResult]) -> Result<()> {
    let masses: BTreeSet<u64> = records.iter().map(|r| r.mass.to_bits()).collect();
    let mut per_toy: BTreeMap<usize, usize> = BTreeMap::new();
    for r in records {
        *per_toy.entry(r.index).or_default() += 1;
    }
    match per_toy.iter().find(|&(_, &n)| n != masses.len()) {
        Some((index, n)) => Err(Error::Validation(format!(
            "toy {index} has {n} of {} mass points",
            masses.len()
        ))),
        None => Ok(()),
    }
}

/// `(index, mass)` of every result with a failed fit, in input order.
pub fn failed_fits(records: &[MassPointResult]) -> Vec<(usize, f64)> {
    records.iter().filter(|r| r.failed()).map(|r| (r.index, r.mass)).collect()
}

/// Merge retried evaluations into the original results.
///
/// For each `(index, mass)` a successful result beats a failed one, and an
/// original beats a retry of the same outcome. The merged results are sorted
/// by index then mass, and every toy must have a result at every mass.
pub fn merge_retries(
    original: Vec<MassPointResult>,
    retries: Vec<MassPointResult>,
) -> Result<Vec<MassPointResult>> {
    let n_retries = retries.len();
    let mut all = original;
    all.extend(retries);
    all.sort_by_key(MassPointResult::failed);

    let mut seen = BTreeSet::new();
    let mut merged: Vec<MassPointResult> = all.into_iter().filter(|r| seen.insert(r.key())).collect();
    merged.sort_by(|a, b| a.index.cmp(&b.index).then(a.mass.total_cmp(&b.mass)));
    check_complete(&merged)?;
    log::info!(
        "merged {} retries: {} results, {} still failed",
        n_retries,
        merged.len(),
        merged.iter().filter(|r| r.failed()).count()
    );
    Ok(merged)
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

/// Per-mass diagnostics of `muhat` over the successful fits, by increasing mass.
pub fn mass_diagnostics(records: &[MassPointResult]) -> Vec<MassDiagnostics> {
    let mut masses: Vec<f64> = records.iter().map(|r| r.mass).collect();
    masses.sort_by(f64::total_cmp);
    masses.dedup_by(|a, b| a.to_bits() == b.to_bits());

    masses
        .into_iter()
        .map(|mass| {
            let at_mass: Vec<&MassPointResult> =
                records.iter().filter(|r| r.mass.to_bits() == mass.to_bits()).collect();
            let good: Vec<&MassPointResult> = at_mass.iter().copied().filter(|r| !r.failed()).collect();
            let muhat: Vec<f64> = good.iter().map(|r| r.muhat).collect();

            let muhat_min = muhat.iter().copied().fold(f64::INFINITY, f64::min);
            let muhat_max = muhat.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let (muhat_mean, muhat_std) = mean_std(&muhat);
            let mean_error = muhat_std / (muhat.len() as f64).sqrt();
            let mu_range = good.iter().map(|r| r.mu_range).fold(f64::INFINITY, f64::min);
            let muhat_abs_max = (-muhat_min).max(muhat_max);

            MassDiagnostics {
                mass,
                n_fits: good.len(),
                fail_rate: (at_mass.len() - good.len()) as f64 / at_mass.len() as f64,
                muhat_min,
                muhat_max,
                muhat_mean,
                muhat_std,
                mean_error,
                bias_significance: muhat_mean / mean_error,
                mu_range,
                max_muhat_over_range: muhat_max / mu_range,
                muhat_abs_max,
                muhat_abs_max_over_std: muhat_abs_max / muhat_std,
            }
        })
        .collect()
}

fn binomial_log_likelihood(p: f64, k: f64, n: f64) -> f64 {
    // 0 * ln(0) = 0 at the edges
    let hits = if k > 0.0 { k * p.ln() } else { 0.0 };
    let misses = if n > k { (n - k) * (1.0 - p).ln() } else { 0.0 };
    hits + misses
}

/// `-2 Δ ln L(p) - 1`, zero at the edges of the 68% interval.
#[derive(Clone, Copy)]
struct IntervalEdge {
    k: f64,
    n: f64,
    max_log_likelihood: f64,
}

impl CostFunction for IntervalEdge {
    type Param = f64;
    type Output = f64;

    fn cost(&self, p: &f64) -> std::result::Result<f64, argmin::core::Error> {
        Ok(2.0 * (self.max_log_likelihood - binomial_log_likelihood(*p, self.k, self.n)) - 1.0)
    }
}

fn find_edge(edge: IntervalEdge, lo: f64, hi: f64, max_iter: u64) -> Result<f64> {
    let res = Executor::new(edge, BrentRoot::new(lo, hi, 1e-12))
        .configure(|state| state.max_iters(max_iter))
        .run()
        .map_err(|e| Error::Computation(format!("binomial interval search failed: {e}")))?;
    res.state()
        .get_best_param()
        .copied()
        .ok_or_else(|| Error::Computation("binomial interval search found no root".into()))
}

/// 68% likelihood interval on a binomial rate with `k` hits in `n` trials.
pub fn binomial_interval(k: usize, n: usize, max_iter: u64) -> Result<(f64, f64)> {
    if n == 0 || k > n {
        return Err(Error::Validation(format!("no binomial interval for {k} of {n}")));
    }
    const EDGE: f64 = 1e-12;
    let (kf, nf) = (k as f64, n as f64);
    let p_hat = kf / nf;
    let edge =
        IntervalEdge { k: kf, n: nf, max_log_likelihood: binomial_log_likelihood(p_hat, kf, nf) };
    let lo = if k == 0 { 0.0 } else { find_edge(edge, EDGE, p_hat, max_iter)? };
    let hi = if k == n { 1.0 } else { find_edge(edge, p_hat, 1.0 - EDGE, max_iter)? };
    Ok((lo, hi))
}

fn ln_normal_cdf(z: f64) -> f64 {
    (0.5 * statrs::function::erf::erfc(-z / std::f64::consts::SQRT_2)).ln()
}

/// Trial factor `N` maximizing the likelihood of `z_max` as maxima of `N`
/// standard normals, `ln N + (N - 1) ln Φ(z) - z² / 2` per toy.
///
/// The likelihood is concave in `N` with its stationary point at
/// `N = -m / Σ ln Φ(z)`, which is clamped to `bounds`.
pub fn fit_trial_factor(z_max: &[f64], bounds: (f64, f64)) -> f64 {
    let sum_ln_cdf: f64 = z_max.iter().map(|&z| ln_normal_cdf(z)).sum();
    if sum_ln_cdf >= 0.0 {
        return bounds.1;
    }
    (-(z_max.len() as f64) / sum_ln_cdf).clamp(bounds.0, bounds.1)
}

/// Global significance of `observed_z` from per-toy, per-mass results.
pub fn global_significance(
    records: &[MassPointResult],
    observed_z: f64,
    config: &GlobalConfig,
) -> Result<GlobalSignificance> {
    if !observed_z.is_finite() {
        return Err(Error::Validation(format!("observed significance {observed_z} is not finite")));
    }
    check_unique(records)?;

    let bad_toys: BTreeSet<usize> = records.iter().filter(|r| r.failed()).map(|r| r.index).collect();
    let n_toys = records.iter().map(|r| r.index).collect::<BTreeSet<_>>().len();
    let n_failed_fits = records.iter().filter(|r| r.failed()).count();

    let mut z_max: BTreeMap<usize, f64> = BTreeMap::new();
    let mut n_negative_q0 = 0;
    for r in records.iter().filter(|r| !bad_toys.contains(&r.index)) {
        let mut q0 = if r.muhat <= 0.0 { 0.0 } else { r.q0 };
        if q0 < 0.0 {
            if q0 <= -config.negative_q0_tolerance {
                n_negative_q0 += 1;
            }
            q0 = 0.0;
        }
        let z = q0.sqrt();
        z_max.entry(r.index).and_modify(|m| *m = m.max(z)).or_insert(z);
    }
    if n_negative_q0 > 0 {
        log::warn!(
            "{n_negative_q0} results with q0 below -{} set to 0",
            config.negative_q0_tolerance
        );
    }
    let n = z_max.len();
    if n == 0 {
        return Err(Error::Validation(format!(
            "no toy without failed fits among {n_toys} toys"
        )));
    }
    let z_max: Vec<f64> = z_max.into_values().collect();

    let k = z_max.iter().filter(|&&z| z > observed_z).count();
    let p_value = k as f64 / n as f64;
    let significance_is_lower_bound = k == 0;
    let significance = if significance_is_lower_bound {
        significance_from_p_value(1.0 / n as f64)
    } else {
        significance_from_p_value(p_value)
    };
    let (p_lo, p_hi) = binomial_interval(k, n, config.max_iter)?;

    let trial_factor = fit_trial_factor(&z_max, config.trial_factor_bounds);
    let p_local = 0.5 * statrs::function::erf::erfc(observed_z / std::f64::consts::SQRT_2);
    let p_global_tf = -(trial_factor * (-p_local).ln_1p()).exp_m1();

    log::info!(
        "global: {k} of {n} good toys exceed Z = {observed_z:.3}, p = {p_value:.4}, trial factor {trial_factor:.2}"
    );

    Ok(GlobalSignificance {
        observed_z,
        n_toys,
        n_good_toys: n,
        n_failed_fits,
        n_negative_q0,
        n_exceeding: k,
        p_value,
        p_value_interval: (p_lo, p_hi),
        significance,
        significance_interval: (significance_from_p_value(p_hi), significance_from_p_value(p_lo)),
        significance_is_lower_bound,
        trial_factor,
        trial_factor_significance: significance_from_p_value(p_global_tf),
        masses: mass_diagnostics(records),
    })
}
