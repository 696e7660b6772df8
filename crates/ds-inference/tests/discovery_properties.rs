//! Property and scenario tests through the public API.

use approx::assert_relative_eq;
use ds_core::{Constraint, Dataset, FittingService, ModelConfig};
use ds_inference::normalize::gamma_range;
use ds_inference::{
    EnsembleResult, MaximumLikelihoodEstimator, NormalizerConfig, ProfileLikelihoodTestStat,
    TailConvention, TestStatConfig, build_null_model, ensure_alt_snapshot, normalize_parameters,
    prepare_poi, significance_from_p_value,
};
use ds_translate::WorkspaceStore;
use proptest::prelude::*;
use std::sync::Arc;

fn alternate() -> ModelConfig {
    let json = include_str!("../../../tests/fixtures/discovery_store.json");
    let store = WorkspaceStore::from_json_str(json).unwrap();
    let mut alt = store.model_config("combined", "ModelConfig").unwrap();
    normalize_parameters(&mut alt, &NormalizerConfig::default()).unwrap();
    alt
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn prop_gamma_range_from_tau(tau in 0.01f64..1e6) {
        let c = Constraint::Poisson { global_observable: "nom_gamma".into(), tau };
        let (lo, hi) = gamma_range(Some(&c), 5.0).unwrap();
        let e = (1.0 / tau).sqrt();
        prop_assert!(lo >= 0.0);
        prop_assert!((lo - (1.0 - 5.0 * e).max(0.0)).abs() < 1e-12);
        prop_assert!((hi - (1.0 + 5.0 * e)).abs() < 1e-12);
    }

    #[test]
    fn prop_null_snapshot_ignores_alternate_value(mu in -40.0f64..40.0) {
        let mut alt = alternate();
        alt.parameters_mut().get_mut("SigXsecOverSM").unwrap().value = mu;
        let null = build_null_model(&alt).unwrap();
        prop_assert_eq!(null.snapshot().unwrap().get("SigXsecOverSM"), Some(0.0));
    }

    #[test]
    fn prop_significance_decreases_with_p(p in 1e-9f64..0.5, dp in 1e-6f64..0.4) {
        prop_assert!(significance_from_p_value(p) > significance_from_p_value(p + dp));
    }
}

#[test]
fn asimov_at_five_recovers_muhat() {
    let mut alt = alternate();
    prepare_poi(&mut alt, 40.0).unwrap();
    ensure_alt_snapshot(&mut alt, Some(5.0)).unwrap();
    let null = build_null_model(&alt).unwrap();

    let mut truth = alt.parameters().values();
    let poi = alt.parameters().index_of("SigXsecOverSM").unwrap();
    truth[poi] = 5.0;
    let counts = alt.likelihood().expected_main(&truth).unwrap();
    let asimov = Dataset::new("asimov_mu5", counts);

    let fitter: Arc<dyn FittingService> = Arc::new(MaximumLikelihoodEstimator::new());
    let stat = ProfileLikelihoodTestStat::new(fitter, TestStatConfig::default());
    let res = stat.evaluate(&alt, &null, &asimov).unwrap();
    assert!(res.ts >= 0.0);
    assert_relative_eq!(res.muhat, 5.0, epsilon = 0.1);
}

#[test]
fn p_values_follow_right_tail() {
    let json = include_str!("../../../tests/fixtures/discovery_store.json");
    let store = WorkspaceStore::from_json_str(json).unwrap();
    let data = store.dataset("combined", "obsData").unwrap();
    let mut alt = alternate();
    prepare_poi(&mut alt, 40.0).unwrap();
    let null = build_null_model(&alt).unwrap();
    let fitter: Arc<dyn FittingService> = Arc::new(MaximumLikelihoodEstimator::new());
    let stat = ProfileLikelihoodTestStat::new(fitter, TestStatConfig::default());
    let observed = stat.evaluate(&alt, &null, &data).unwrap();

    let toy = |ts: f64| {
        let mut r = observed.clone();
        r.ts = ts;
        r
    };
    let obs_ts = observed.ts;
    let res = EnsembleResult {
        observed: observed.clone(),
        null: vec![toy(obs_ts - 1.0), toy(obs_ts), toy(obs_ts + 1.0), toy(obs_ts - 2.0)],
        alt: vec![toy(obs_ts + 3.0), toy(obs_ts - 0.5)],
        tail: TailConvention::RightTail,
        background_is_null: true,
    };
    assert_relative_eq!(res.null_p_value(), 0.5);
    assert_relative_eq!(res.alt_p_value(), 0.5);
    assert_relative_eq!(res.significance(), 0.0, epsilon = 1e-12);
}
