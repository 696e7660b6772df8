//! Profile-likelihood discovery test statistic.
//!
//! For one dataset the evaluator runs a conditional fit with the POI held at
//! the null snapshot value, then an unconditional fit warm-started from the
//! conditional minimum, and reports
//!
//! `ts = 2 * (minNLL_cond - minNLL_uncond)`
//!
//! together with the per-fit diagnostics. Diagnostics are first published as a
//! flat detailed-output map (`fitCond_minNLL`, `fitUncond_<poi>_pull`, ...)
//! from which [`TestStatisticResult`] is extracted.

use ds_core::{Dataset, Error, FitOutcome, FittingService, ModelConfig, ParameterSet, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Prefix of conditional-fit keys in the detailed output.
pub const COND_PREFIX: &str = "fitCond_";
/// Prefix of unconditional-fit keys in the detailed output.
pub const UNCOND_PREFIX: &str = "fitUncond_";

/// Flat per-evaluation diagnostics keyed by `fitCond_*` / `fitUncond_*`.
pub type DetailedOutput = BTreeMap<String, f64>;

/// Evaluator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestStatConfig {
    /// Clamp `ts` at 0 and zero it when the best-fit POI is below the null value.
    pub one_sided_discovery: bool,
    /// Nuisance parameters reported from both fits.
    pub secondary_parameters: Vec<String>,
}

impl Default for TestStatConfig {
    fn default() -> Self {
        Self {
            one_sided_discovery: false,
            secondary_parameters: vec!["ATLAS_norm_Zhf".into(), "ATLAS_norm_ttbar".into()],
        }
    }
}

/// Test statistic and fit diagnostics for one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStatisticResult {
    /// Test statistic
    pub ts: f64,
    /// Unconditional best-fit POI
    pub muhat: f64,
    /// `(muhat - mu0) / error(muhat)`
    pub muhat_pull: f64,
    /// Conditional fit status
    pub cond_status: i32,
    /// Unconditional fit status
    pub uncond_status: i32,
    /// Conditional minimum NLL
    pub cond_min_nll: f64,
    /// Unconditional minimum NLL
    pub uncond_min_nll: f64,
    /// Conditional covariance quality
    pub cond_cov_qual: i32,
    /// Unconditional covariance quality
    pub uncond_cov_qual: i32,
    /// Secondary parameters after the conditional fit
    pub cond_secondary: BTreeMap<String, f64>,
    /// Secondary parameters after the unconditional fit
    pub uncond_secondary: BTreeMap<String, f64>,
}

fn required(map: &DetailedOutput, key: &str) -> Result<f64> {
    map.get(key)
        .copied()
        .ok_or_else(|| Error::Contract(format!("detailed output has no '{key}'")))
}

fn status_code(value: f64) -> i32 {
    value.round() as i32
}

impl TestStatisticResult {
    /// Extract the result from a detailed-output map; a missing key is a
    /// contract violation.
    pub fn from_detailed_output(
        ts: f64,
        map: &DetailedOutput,
        poi: &str,
        secondary: &[String],
    ) -> Result<Self> {
        let c = |k: &str| required(map, &format!("{COND_PREFIX}{k}"));
        let u = |k: &str| required(map, &format!("{UNCOND_PREFIX}{k}"));

        let mut cond_secondary = BTreeMap::new();
        let mut uncond_secondary = BTreeMap::new();
        for name in secondary {
            cond_secondary.insert(name.clone(), c(name)?);
            uncond_secondary.insert(name.clone(), u(name)?);
        }

        Ok(Self {
            ts,
            muhat: u(poi)?,
            muhat_pull: u(&format!("{poi}_pull"))?,
            cond_status: status_code(c("fitStatus")?),
            uncond_status: status_code(u("fitStatus")?),
            cond_min_nll: c("minNLL")?,
            uncond_min_nll: u("minNLL")?,
            cond_cov_qual: status_code(c("covQual")?),
            uncond_cov_qual: status_code(u("covQual")?),
            cond_secondary,
            uncond_secondary,
        })
    }

    /// Either fit reported a non-zero status.
    pub fn failed_fit(&self) -> bool {
        self.cond_status != 0 || self.uncond_status != 0
    }

    /// Discovery `q0`: the statistic, or 0 when `muhat <= 0`.
    pub fn q0_one_sided(&self) -> f64 {
        if self.muhat <= 0.0 { 0.0 } else { self.ts }
    }
}

/// Publish one fit into the detailed output under `prefix`.
pub fn publish_fit(
    map: &mut DetailedOutput,
    prefix: &str,
    fit: &FitOutcome,
    poi: &str,
    mu0: f64,
    secondary: &[String],
) {
    map.insert(format!("{prefix}fitStatus"), f64::from(fit.status));
    map.insert(format!("{prefix}minNLL"), fit.min_nll);
    map.insert(format!("{prefix}covQual"), f64::from(fit.cov_qual));
    if let Some(mu) = fit.value(poi) {
        map.insert(format!("{prefix}{poi}"), mu);
        // NaN when the POI was held fixed or has no usable error
        let pull = match fit.error(poi).filter(|e| *e > 0.0) {
            Some(err) => (mu - mu0) / err,
            None => f64::NAN,
        };
        map.insert(format!("{prefix}{poi}_pull"), pull);
    }
    for name in secondary {
        if let Some(v) = fit.value(name) {
            map.insert(format!("{prefix}{name}"), v);
        }
    }
}

/// Profile-likelihood ratio test statistic
#[derive(Clone)]
pub struct ProfileLikelihoodTestStat {
    fitter: Arc<dyn FittingService>,
    config: TestStatConfig,
}

impl std::fmt::Debug for ProfileLikelihoodTestStat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileLikelihoodTestStat").field("config", &self.config).finish()
    }
}

impl ProfileLikelihoodTestStat {
    /// Test statistic backed by `fitter`.
    pub fn new(fitter: Arc<dyn FittingService>, config: TestStatConfig) -> Self {
        Self { fitter, config }
    }

    /// Settings in use
    pub fn config(&self) -> &TestStatConfig {
        &self.config
    }

    /// Evaluate on `data` with a private copy of the alternate model's parameters.
    pub fn evaluate(
        &self,
        alt: &ModelConfig,
        null: &ModelConfig,
        data: &Dataset,
    ) -> Result<TestStatisticResult> {
        let mut working = alt.parameters().clone();
        self.evaluate_into(alt, null, data, &mut working)
    }

    /// Evaluate on `data` using `working` as the parameter copy.
    ///
    /// On success `working` holds the conditional-fit values.
    pub fn evaluate_into(
        &self,
        alt: &ModelConfig,
        null: &ModelConfig,
        data: &Dataset,
        working: &mut ParameterSet,
    ) -> Result<TestStatisticResult> {
        let (ts, detailed) = self.evaluate_detailed(alt, null, data, working)?;
        TestStatisticResult::from_detailed_output(
            ts,
            &detailed,
            alt.poi()?,
            &self.config.secondary_parameters,
        )
    }

    /// Run both fits and return the statistic with the detailed output.
    pub fn evaluate_detailed(
        &self,
        alt: &ModelConfig,
        null: &ModelConfig,
        data: &Dataset,
        working: &mut ParameterSet,
    ) -> Result<(f64, DetailedOutput)> {
        let poi = alt.poi()?;
        let mu0 = null_poi_value(null, poi)?;
        let likelihood = alt.likelihood();
        if data.n_bins() != likelihood.n_bins() {
            return Err(Error::Config(format!(
                "dataset '{}' has {} bins, model '{}' expects {}",
                data.name,
                data.n_bins(),
                alt.name(),
                likelihood.n_bins()
            )));
        }

        for (name, &value) in &data.global_observables {
            let p = working.get_mut(name).ok_or_else(|| {
                Error::Config(format!("dataset '{}' sets unknown observable '{name}'", data.name))
            })?;
            p.value = value;
        }

        working
            .get_mut(poi)
            .ok_or_else(|| Error::Config(format!("POI '{poi}' not found")))?
            .value = mu0;
        let cond = self.fitter.minimize(likelihood, data, working, &[poi])?;

        let mut free = working.clone();
        let uncond = self.fitter.minimize(likelihood, data, &mut free, &[])?;

        let mut ts = 2.0 * (cond.min_nll - uncond.min_nll);
        let muhat = uncond.value(poi).unwrap_or(f64::NAN);
        if self.config.one_sided_discovery {
            ts = if muhat < mu0 { 0.0 } else { ts.max(0.0) };
        }
        log::debug!(
            "{}: ts={ts:.6} muhat={muhat:.4} cond(status={}, nll={:.6}) uncond(status={}, nll={:.6})",
            data.name,
            cond.status,
            cond.min_nll,
            uncond.status,
            uncond.min_nll
        );

        let secondary = &self.config.secondary_parameters;
        let mut detailed = DetailedOutput::new();
        publish_fit(&mut detailed, COND_PREFIX, &cond, poi, mu0, secondary);
        publish_fit(&mut detailed, UNCOND_PREFIX, &uncond, poi, mu0, secondary);
        Ok((ts, detailed))
    }
}

/// POI value frozen in the null model's snapshot.
pub fn null_poi_value(null: &ModelConfig, poi: &str) -> Result<f64> {
    let snapshot = null
        .snapshot()
        .ok_or_else(|| Error::Config(format!("null model '{}' has no snapshot", null.name())))?;
    snapshot.get(poi).ok_or_else(|| {
        Error::Config(format!("snapshot '{}' does not fix POI '{poi}'", snapshot.name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypothesis::{build_null_model, prepare_poi};
    use crate::mle::MaximumLikelihoodEstimator;
    use crate::normalize::{NormalizerConfig, normalize_parameters};
    use crate::testing::{observed, toy_model};
    use approx::assert_relative_eq;

    fn setup() -> (ModelConfig, ModelConfig) {
        let mut alt = toy_model();
        normalize_parameters(&mut alt, &NormalizerConfig::default()).unwrap();
        prepare_poi(&mut alt, 40.0).unwrap();
        let null = build_null_model(&alt).unwrap();
        (alt, null)
    }

    fn stat(config: TestStatConfig) -> ProfileLikelihoodTestStat {
        ProfileLikelihoodTestStat::new(Arc::new(MaximumLikelihoodEstimator::new()), config)
    }

    #[test]
    fn test_asimov_signal_gives_positive_ts_and_muhat() {
        let (alt, null) = setup();
        let mut truth = alt.parameters().clone();
        truth.get_mut("SigXsecOverSM").unwrap().value = 5.0;
        let expected = alt.likelihood().expected_main(&truth.values()).unwrap();
        let data = Dataset::new("asimov_mu5", expected);

        let res = stat(TestStatConfig::default()).evaluate(&alt, &null, &data).unwrap();
        assert!(res.ts >= 0.0, "ts = {}", res.ts);
        assert_relative_eq!(res.muhat, 5.0, epsilon = 0.1);
        assert!(res.muhat_pull > 0.0);
        assert!(res.cond_min_nll >= res.uncond_min_nll - 1e-6);
        assert!(res.cond_secondary.contains_key("ATLAS_norm_Zhf"));
        assert!(res.uncond_secondary.contains_key("ATLAS_norm_ttbar"));
    }

    #[test]
    fn test_working_copy_left_at_conditional_values() {
        let (alt, null) = setup();
        let mut working = alt.parameters().clone();
        stat(TestStatConfig::default()).evaluate_into(&alt, &null, &observed(), &mut working).unwrap();
        assert_eq!(working.value("SigXsecOverSM").unwrap(), 0.0);
        // caller's model untouched
        assert_eq!(alt.parameters().value("ATLAS_norm_Zhf").unwrap(), 1.35);
    }

    #[test]
    fn test_one_sided_mode_zeroes_negative_muhat() {
        let (alt, null) = setup();
        let mut truth = alt.parameters().clone();
        truth.get_mut("SigXsecOverSM").unwrap().value = -4.0;
        let expected = alt.likelihood().expected_main(&truth.values()).unwrap();
        let data = Dataset::new("deficit", expected);

        let two_sided = stat(TestStatConfig::default()).evaluate(&alt, &null, &data).unwrap();
        assert!(two_sided.muhat < 0.0);
        assert!(two_sided.ts > 0.0);
        assert_eq!(two_sided.q0_one_sided(), 0.0);

        let config = TestStatConfig { one_sided_discovery: true, ..Default::default() };
        let one_sided = stat(config).evaluate(&alt, &null, &data).unwrap();
        assert_eq!(one_sided.ts, 0.0);
    }

    #[test]
    fn test_missing_detailed_key_is_contract_error() {
        let mut map = DetailedOutput::new();
        map.insert("fitUncond_SigXsecOverSM".into(), 1.0);
        let err = TestStatisticResult::from_detailed_output(0.0, &map, "SigXsecOverSM", &[])
            .unwrap_err();
        assert!(matches!(err, Error::Contract(_)));
    }

    #[test]
    fn test_unknown_secondary_parameter_is_contract_error() {
        let (alt, null) = setup();
        let config = TestStatConfig {
            secondary_parameters: vec!["ATLAS_norm_Zll".into()],
            ..Default::default()
        };
        let err = stat(config).evaluate(&alt, &null, &observed()).unwrap_err();
        assert!(matches!(err, Error::Contract(_)));
    }

    #[test]
    fn test_null_without_snapshot_rejected_before_fitting() {
        let (alt, _) = setup();
        let err = stat(TestStatConfig::default()).evaluate(&alt, &alt.derive("x"), &observed()).unwrap_err();
        assert!(err.is_config());
        let short = Dataset::new("short", vec![1.0, 2.0]);
        let null = build_null_model(&alt).unwrap();
        assert!(stat(TestStatConfig::default()).evaluate(&alt, &null, &short).unwrap_err().is_config());
    }

    #[test]
    fn test_pull_is_nan_without_error() {
        let fit = |error: f64| FitOutcome {
            status: 0,
            min_nll: 4.0,
            cov_qual: 3,
            parameters: vec![ds_core::FittedParameter {
                name: "SigXsecOverSM".into(),
                value: 2.0,
                error,
                floating: error > 0.0,
            }],
            covariance: None,
            n_iter: 1,
            n_fev: 1,
            message: String::new(),
        };
        let mut map = DetailedOutput::new();
        publish_fit(&mut map, COND_PREFIX, &fit(0.0), "SigXsecOverSM", 0.0, &[]);
        publish_fit(&mut map, UNCOND_PREFIX, &fit(0.5), "SigXsecOverSM", 0.0, &[]);
        assert!(map["fitCond_SigXsecOverSM_pull"].is_nan());
        assert_relative_eq!(map["fitUncond_SigXsecOverSM_pull"], 4.0);
    }

    #[test]
    fn test_failed_fit_and_q0() {
        let mut r = TestStatisticResult {
            ts: 3.2,
            muhat: 1.1,
            muhat_pull: 1.8,
            cond_status: 0,
            uncond_status: 0,
            cond_min_nll: 10.0,
            uncond_min_nll: 8.4,
            cond_cov_qual: 3,
            uncond_cov_qual: 3,
            cond_secondary: BTreeMap::new(),
            uncond_secondary: BTreeMap::new(),
        };
        assert!(!r.failed_fit());
        assert_eq!(r.q0_one_sided(), 3.2);
        r.uncond_status = 4;
        assert!(r.failed_fit());
        r.muhat = 0.0;
        assert_eq!(r.q0_one_sided(), 0.0);
    }
}
