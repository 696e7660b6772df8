//! End-to-end discovery evaluation from stored inputs.
//!
//! Both entry points run the same preparation: open the store, load the
//! model and dataset, bind global observables (when an auxiliary source is
//! given), normalize parameter bounds, set the POI range, then derive the
//! null model. Every failure surfaces before the first fit.

use crate::config::RunConfig;
use crate::globs::{BindReport, bind_global_observables};
use crate::hypothesis::{build_null_model, ensure_alt_snapshot, prepare_poi};
use crate::mle::MaximumLikelihoodEstimator;
use crate::normalize::{NormalizeReport, normalize_parameters};
use crate::profile_likelihood::{ProfileLikelihoodTestStat, TestStatisticResult};
use crate::toybased::{EnsembleResult, FrequentistCalculator, ToyConfig};
use ds_core::{Dataset, FittingService, ModelConfig, Result};
use ds_translate::{AuxStore, WorkspaceStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Auxiliary global-observable table file and pseudo-experiment index.
#[derive(Debug, Clone, PartialEq)]
pub struct AuxSource {
    /// Auxiliary store path
    pub path: PathBuf,
    /// Row index in every table
    pub index: usize,
}

/// One observed-data evaluation.
#[derive(Debug, Clone)]
pub struct EvaluateRequest {
    /// Model store path
    pub store_path: PathBuf,
    /// Workspace name
    pub workspace: String,
    /// Model configuration name
    pub model_config: String,
    /// Dataset name
    pub data: String,
    /// POI range half-width
    pub poi_range: f64,
    /// Optional auxiliary global observables
    pub aux: Option<AuxSource>,
    /// Run settings
    pub config: RunConfig,
}

impl EvaluateRequest {
    /// Request with default settings and no auxiliary source.
    pub fn new(
        store_path: impl Into<PathBuf>,
        workspace: impl Into<String>,
        model_config: impl Into<String>,
        data: impl Into<String>,
        poi_range: f64,
    ) -> Self {
        Self {
            store_path: store_path.into(),
            workspace: workspace.into(),
            model_config: model_config.into(),
            data: data.into(),
            poi_range,
            aux: None,
            config: RunConfig::default(),
        }
    }
}

/// One toy run: observed evaluation plus a null-hypothesis ensemble.
#[derive(Debug, Clone)]
pub struct ToysRequest {
    /// Model store path
    pub store_path: PathBuf,
    /// Workspace name
    pub workspace: String,
    /// Model configuration name
    pub model_config: String,
    /// Dataset name
    pub data: String,
    /// Number of null toys
    pub n_toys: usize,
    /// POI range half-width
    pub poi_range: f64,
    /// Base seed of the null ensemble
    pub seed: u64,
    /// Optional auxiliary global observables
    pub aux: Option<AuxSource>,
    /// Run settings; toy count and seed come from the request
    pub config: RunConfig,
}

/// Prepared alternate and null models with the observed dataset.
#[derive(Debug, Clone)]
pub struct Hypotheses {
    /// Signal-plus-background model
    pub alt: ModelConfig,
    /// Background-only model
    pub null: ModelConfig,
    /// Observed dataset
    pub data: Dataset,
    /// Normalizer changes
    pub normalized: NormalizeReport,
    /// Binder assignments, when an auxiliary source was given
    pub bound: Option<BindReport>,
}

/// Load and prepare both hypotheses.
pub fn prepare(
    store_path: &Path,
    workspace: &str,
    model_config: &str,
    data: &str,
    poi_range: f64,
    aux: Option<&AuxSource>,
    config: &RunConfig,
) -> Result<Hypotheses> {
    let store = WorkspaceStore::open(store_path)?;
    let mut alt = store.model_config(workspace, model_config)?;
    let data = store.dataset(workspace, data)?;

    let bound = match aux {
        Some(src) => {
            let aux_store = AuxStore::open(&src.path)?;
            Some(bind_global_observables(&mut alt, &aux_store, &config.binder, src.index)?)
        }
        None => None,
    };
    let normalized = normalize_parameters(&mut alt, &config.normalizer)?;

    let poi = alt.poi()?.to_string();
    let nominal = alt.parameters().value(&poi)?;
    prepare_poi(&mut alt, poi_range)?;
    ensure_alt_snapshot(&mut alt, Some(nominal))?;
    let null = build_null_model(&alt)?;

    Ok(Hypotheses { alt, null, data, normalized, bound })
}

fn fitter(config: &RunConfig) -> Arc<dyn FittingService> {
    Arc::new(MaximumLikelihoodEstimator::with_config(config.optimizer.clone()))
}

/// Evaluate the discovery test statistic on observed data.
pub fn evaluate(req: &EvaluateRequest) -> Result<TestStatisticResult> {
    let hyp = prepare(
        &req.store_path,
        &req.workspace,
        &req.model_config,
        &req.data,
        req.poi_range,
        req.aux.as_ref(),
        &req.config,
    )?;
    let stat = ProfileLikelihoodTestStat::new(fitter(&req.config), req.config.evaluator.clone());
    let result = stat.evaluate(&hyp.alt, &hyp.null, &hyp.data)?;
    log::info!(
        "{}: ts = {:.6}, muhat = {:.4} (status cond {}, uncond {})",
        hyp.data.name,
        result.ts,
        result.muhat,
        result.cond_status,
        result.uncond_status
    );
    Ok(result)
}

/// Evaluate observed data and a null toy ensemble.
pub fn run_toys(req: &ToysRequest) -> Result<EnsembleResult> {
    let hyp = prepare(
        &req.store_path,
        &req.workspace,
        &req.model_config,
        &req.data,
        req.poi_range,
        req.aux.as_ref(),
        &req.config,
    )?;
    let fitter = fitter(&req.config);
    let stat = ProfileLikelihoodTestStat::new(Arc::clone(&fitter), req.config.evaluator.clone());
    let toys = ToyConfig { n_toys_null: req.n_toys, seed: req.seed, ..req.config.toys.clone() };
    FrequentistCalculator::new(hyp.data, hyp.alt, hyp.null, fitter, stat).with_config(toys).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../tests/fixtures").join(name)
    }

    fn request() -> EvaluateRequest {
        EvaluateRequest::new(fixture("discovery_store.json"), "combined", "ModelConfig", "obsData", 40.0)
    }

    #[test]
    fn test_prepare_sets_up_both_hypotheses() {
        let req = request();
        let hyp = prepare(
            &req.store_path,
            "combined",
            "ModelConfig",
            "obsData",
            40.0,
            None,
            &RunConfig::default(),
        )
        .unwrap();
        assert_eq!(hyp.null.snapshot().unwrap().get("SigXsecOverSM"), Some(0.0));
        assert_eq!(hyp.alt.snapshot().unwrap().get("SigXsecOverSM"), Some(1.0));
        assert_eq!(hyp.alt.parameters().get("SigXsecOverSM").unwrap().bounds, (-40.0, 40.0));
        assert_eq!(hyp.normalized.overridden.len(), 2);
        assert!(hyp.bound.is_none());
    }

    #[test]
    fn test_evaluate_observed() {
        let res = evaluate(&request()).unwrap();
        assert!(res.ts.is_finite());
        assert!(res.cond_min_nll >= res.uncond_min_nll - 1e-6);
        assert!(res.uncond_secondary.contains_key("ATLAS_norm_Zhf"));
    }

    #[test]
    fn test_evaluate_with_aux_binding() {
        let mut req = request();
        req.aux = Some(AuxSource { path: fixture("aux_globs.json"), index: 2 });
        let res = evaluate(&req).unwrap();
        assert!(res.ts.is_finite());

        req.aux = Some(AuxSource { path: fixture("aux_globs.json"), index: 99 });
        assert!(evaluate(&req).unwrap_err().is_config());
    }

    #[test]
    fn test_missing_inputs_are_config_errors() {
        let mut req = request();
        req.workspace = "nope".into();
        let err = evaluate(&req).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("nope"));

        let mut req = request();
        req.data = "asimovData".into();
        assert!(evaluate(&req).unwrap_err().is_config());

        let mut req = request();
        req.store_path = fixture("missing.json");
        assert!(evaluate(&req).unwrap_err().is_config());
    }

    #[test]
    fn test_run_toys_counts_and_seed() {
        let req = ToysRequest {
            store_path: fixture("discovery_store.json"),
            workspace: "combined".into(),
            model_config: "ModelConfig".into(),
            data: "obsData".into(),
            n_toys: 3,
            poi_range: 40.0,
            seed: 10001,
            aux: None,
            config: RunConfig::default(),
        };
        let res = run_toys(&req).unwrap();
        assert_eq!(res.null.len(), 3);
        assert!(res.alt.is_empty());
        let again = run_toys(&req).unwrap();
        assert_eq!(res.null_distribution(), again.null_distribution());

        let empty = run_toys(&ToysRequest { n_toys: 0, ..req }).unwrap();
        assert!(empty.null.is_empty());
        assert!(empty.observed.ts.is_finite());
    }
}
