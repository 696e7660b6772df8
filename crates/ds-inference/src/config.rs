//! Run configuration shared by the harness and the CLI.

use crate::global::GlobalConfig;
use crate::globs::BinderConfig;
use crate::normalize::NormalizerConfig;
use crate::optimizer::OptimizerConfig;
use crate::profile_likelihood::TestStatConfig;
use crate::toybased::ToyConfig;
use serde::{Deserialize, Serialize};

/// Every tunable of one evaluation or toy run.
///
/// All sections are optional in a config file and fall back to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Parameter bounds normalizer
    pub normalizer: NormalizerConfig,
    /// Global observable binder
    pub binder: BinderConfig,
    /// Profile-likelihood evaluator
    pub evaluator: TestStatConfig,
    /// Minimizer
    pub optimizer: OptimizerConfig,
    /// Toy ensembles
    pub toys: ToyConfig,
    /// Global significance over mass scans
    pub global: GlobalConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::GammaRangePolicy;

    #[test]
    fn test_partial_config_uses_defaults() {
        let cfg: RunConfig = serde_json::from_str(
            r#"{"evaluator": {"one_sided_discovery": true}, "toys": {"n_toys_null": 25}}"#,
        )
        .unwrap();
        assert!(cfg.evaluator.one_sided_discovery);
        assert_eq!(cfg.evaluator.secondary_parameters.len(), 2);
        assert_eq!(cfg.toys.n_toys_null, 25);
        assert!(cfg.toys.generate_binned);
        assert_eq!(cfg.normalizer, NormalizerConfig::default());
        assert_eq!(cfg.optimizer.max_iter, 1000);
        assert_eq!(cfg.global.trial_factor_bounds, (10.0, 21.0));
    }

    #[test]
    fn test_global_section() {
        let cfg: RunConfig = serde_json::from_str(
            r#"{"global": {"trial_factor_bounds": [5.0, 30.0], "negative_q0_tolerance": 0.1}}"#,
        )
        .unwrap();
        assert_eq!(cfg.global.trial_factor_bounds, (5.0, 30.0));
        assert_eq!(cfg.global.negative_q0_tolerance, 0.1);
        assert_eq!(cfg.global.max_iter, 100);
    }

    #[test]
    fn test_gamma_policy_by_name() {
        let cfg: RunConfig =
            serde_json::from_str(r#"{"normalizer": {"gamma_policy": "mirror_upper"}}"#).unwrap();
        assert_eq!(cfg.normalizer.gamma_policy, GammaRangePolicy::MirrorUpper);
        assert_eq!(cfg.normalizer.n_sigma, 5.0);
    }
}
