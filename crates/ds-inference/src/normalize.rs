//! Name-driven parameter value and range adjustments applied before fitting.

use ds_core::{Constraint, Error, ModelConfig, ParamRole, Parameter, Result};
use serde::{Deserialize, Serialize};

/// How `gamma_stat_` ranges are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GammaRangePolicy {
    /// `[max(0, 1 - n·e), 1 + n·e]` with `e = sqrt(1/tau)` from the Poisson constraint.
    #[default]
    ConstraintWidth,
    /// Keep the upper bound, lower bound becomes `max(2 - upper, 0)`.
    MirrorUpper,
}

/// Fixed value and range for a named normalization factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormFactorOverride {
    /// Parameter name
    pub name: String,
    /// Starting value
    pub value: f64,
    /// Allowed range
    pub range: (f64, f64),
}

/// Normalizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Normalization-factor overrides, matched by exact name
    pub norm_factors: Vec<NormFactorOverride>,
    /// Prefix of per-bin statistical parameters
    pub gamma_prefix: String,
    /// Range half-width in units of the constraint width
    pub n_sigma: f64,
    /// Range policy for per-bin parameters
    pub gamma_policy: GammaRangePolicy,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            norm_factors: vec![
                NormFactorOverride { name: "ATLAS_norm_Zhf".into(), value: 1.35, range: (0.5, 2.5) },
                NormFactorOverride { name: "ATLAS_norm_ttbar".into(), value: 0.97, range: (0.5, 2.5) },
            ],
            gamma_prefix: "gamma_stat_".into(),
            n_sigma: 5.0,
            gamma_policy: GammaRangePolicy::ConstraintWidth,
        }
    }
}

/// What the normalizer changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizeReport {
    /// Normalization factors set to their configured value and range
    pub overridden: Vec<String>,
    /// Per-bin parameters whose range was clipped
    pub clipped: Vec<String>,
    /// Per-bin parameters left alone (no usable constraint)
    pub skipped: Vec<String>,
}

enum Adjustment {
    Override { value: f64, range: (f64, f64) },
    Range((f64, f64)),
}

fn require_real(p: &Parameter) -> Result<()> {
    if p.is_real() {
        Ok(())
    } else {
        Err(Error::Config(format!("parameter '{}' is not real-valued", p.name)))
    }
}

/// Range of a per-bin parameter under the constraint-width policy, if it has one.
pub fn gamma_range(constraint: Option<&Constraint>, n_sigma: f64) -> Option<(f64, f64)> {
    match constraint {
        Some(Constraint::Poisson { tau, .. }) if *tau > 0.0 && tau.is_finite() => {
            let error = (1.0 / tau).sqrt();
            Some(((1.0 - n_sigma * error).max(0.0), 1.0 + n_sigma * error))
        }
        _ => None,
    }
}

/// Apply normalization-factor overrides and per-bin range clipping to the
/// nuisance parameters of `model`.
pub fn normalize_parameters(
    model: &mut ModelConfig,
    config: &NormalizerConfig,
) -> Result<NormalizeReport> {
    let mut report = NormalizeReport::default();
    let mut plan = Vec::new();

    for p in model.parameters().with_role(ParamRole::Nuisance) {
        if let Some(o) = config.norm_factors.iter().find(|o| o.name == p.name) {
            require_real(p)?;
            plan.push((p.name.clone(), Adjustment::Override { value: o.value, range: o.range }));
            report.overridden.push(p.name.clone());
        } else if p.name.starts_with(&config.gamma_prefix) {
            require_real(p)?;
            let range = match config.gamma_policy {
                GammaRangePolicy::ConstraintWidth => {
                    gamma_range(model.likelihood().constraint(&p.name).as_ref(), config.n_sigma)
                }
                GammaRangePolicy::MirrorUpper => Some(((2.0 - p.bounds.1).max(0.0), p.bounds.1)),
            };
            match range {
                Some(range) => {
                    plan.push((p.name.clone(), Adjustment::Range(range)));
                    report.clipped.push(p.name.clone());
                }
                None => {
                    log::debug!("{}: no Poisson constraint width, range kept", p.name);
                    report.skipped.push(p.name.clone());
                }
            }
        }
    }

    let params = model.parameters_mut();
    for (name, adjustment) in plan {
        let Some(p) = params.get_mut(&name) else { continue };
        match adjustment {
            Adjustment::Override { value, range } => {
                p.set_range(range.0, range.1);
                p.set_value(value);
                log::info!("{name}: value {value}, range [{}, {}]", range.0, range.1);
            }
            Adjustment::Range((lo, hi)) => {
                p.set_range(lo, hi);
                log::debug!("{name}: range [{lo}, {hi}]");
            }
        }
    }

    log::info!(
        "normalized parameters: {} overridden, {} clipped, {} skipped",
        report.overridden.len(),
        report.clipped.len(),
        report.skipped.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::toy_model;
    use approx::assert_relative_eq;
    use ds_core::ParameterKind;

    #[test]
    fn test_norm_factor_overrides() {
        let mut model = toy_model();
        let report = normalize_parameters(&mut model, &NormalizerConfig::default()).unwrap();
        let zhf = model.parameters().get("ATLAS_norm_Zhf").unwrap();
        assert_eq!(zhf.value, 1.35);
        assert_eq!(zhf.bounds, (0.5, 2.5));
        let tt = model.parameters().get("ATLAS_norm_ttbar").unwrap();
        assert_eq!(tt.value, 0.97);
        assert_eq!(tt.bounds, (0.5, 2.5));
        assert_eq!(report.overridden.len(), 2);
    }

    #[test]
    fn test_gamma_range_from_constraint_width() {
        let mut model = toy_model();
        let name = "gamma_stat_Region_Y2015_SpcTauHH_L0_bin_0";
        let tau = match model.likelihood().constraint(name) {
            Some(Constraint::Poisson { tau, .. }) => tau,
            other => panic!("unexpected constraint {other:?}"),
        };
        normalize_parameters(&mut model, &NormalizerConfig::default()).unwrap();
        let e = (1.0 / tau).sqrt();
        let (lo, hi) = model.parameters().get(name).unwrap().bounds;
        assert_relative_eq!(lo, (1.0 - 5.0 * e).max(0.0), epsilon = 1e-12);
        assert_relative_eq!(hi, 1.0 + 5.0 * e, epsilon = 1e-12);
    }

    #[test]
    fn test_gamma_range_never_negative() {
        let c = Constraint::Poisson { global_observable: "nom".into(), tau: 4.0 };
        assert_eq!(gamma_range(Some(&c), 5.0), Some((0.0, 3.5)));
        let g = Constraint::Gaussian { global_observable: "nom".into(), width: 1.0 };
        assert_eq!(gamma_range(Some(&g), 5.0), None);
        assert_eq!(gamma_range(None, 5.0), None);
    }

    #[test]
    fn test_mirror_upper_policy() {
        let mut model = toy_model();
        let name = "gamma_stat_Region_Y2015_SpcTauHH_L0_bin_0";
        model.parameters_mut().get_mut(name).unwrap().set_range(0.0, 1.4);
        let config =
            NormalizerConfig { gamma_policy: GammaRangePolicy::MirrorUpper, ..Default::default() };
        normalize_parameters(&mut model, &config).unwrap();
        let (lo, hi) = model.parameters().get(name).unwrap().bounds;
        assert_relative_eq!(lo, 0.6, epsilon = 1e-12);
        assert_eq!(hi, 1.4);
    }

    #[test]
    fn test_non_real_match_is_config_error() {
        let mut model = toy_model();
        model.parameters_mut().get_mut("ATLAS_norm_Zhf").unwrap().kind = ParameterKind::Discrete;
        let err = normalize_parameters(&mut model, &NormalizerConfig::default()).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_unrelated_parameters_untouched() {
        let mut model = toy_model();
        let before = model.parameters().get("alpha_JES").unwrap().clone();
        normalize_parameters(&mut model, &NormalizerConfig::default()).unwrap();
        assert_eq!(model.parameters().get("alpha_JES").unwrap(), &before);
    }
}
