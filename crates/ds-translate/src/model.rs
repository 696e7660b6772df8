//! Reference binned likelihood
//!
//! Converts a store [`Workspace`] into a HistFactory-style binned Poisson
//! likelihood. Parameter naming follows HistFactory exports:
//!
//! - `normfactor` `X` → free parameter `X`
//! - `normsys`/`histosys` `S` → nuisance `alpha_S`, Gaussian constraint with
//!   unit width around global observable `nom_alpha_S`
//! - `staterror` in channel `C` → per-bin nuisance `gamma_stat_C_bin_i`, Poisson
//!   constraint `Pois(nom_gamma_stat_C_bin_i | gamma * tau)` with
//!   `tau = 1 / rel_err^2`; the global observable defaults to `tau`

use crate::schema::*;
use ds_core::{
    Constraint, Dataset, Error, Likelihood, ParamRole, Parameter, Result,
};
use statrs::function::gamma::ln_gamma;
use std::collections::HashMap;

const NORM_BOUNDS: (f64, f64) = (0.0, 10.0);
const ALPHA_BOUNDS: (f64, f64) = (-5.0, 5.0);
const ALPHA_GLOB_BOUNDS: (f64, f64) = (-10.0, 10.0);
const GAMMA_BOUNDS: (f64, f64) = (0.0, 10.0);
const GAMMA_GLOB_BOUNDS: (f64, f64) = (0.0, f64::MAX);
const MIN_EXPECTED: f64 = 1e-10;

/// Binned likelihood built from a workspace
#[derive(Debug, Clone)]
pub struct BinnedModel {
    name: String,
    parameters: Vec<Parameter>,
    constraints: Vec<ModelConstraint>,
    channels: Vec<ModelChannel>,
}

#[derive(Debug, Clone)]
struct ModelConstraint {
    param_idx: usize,
    glob_idx: usize,
    kind: ConstraintKind,
}

#[derive(Debug, Clone, Copy)]
enum ConstraintKind {
    Gaussian { width: f64 },
    Poisson { tau: f64 },
}

#[derive(Debug, Clone)]
struct ModelChannel {
    name: String,
    n_bins: usize,
    samples: Vec<ModelSample>,
}

#[derive(Debug, Clone)]
struct ModelSample {
    nominal: Vec<f64>,
    modifiers: Vec<ModelModifier>,
}

#[derive(Debug, Clone)]
enum ModelModifier {
    NormFactor { param_idx: usize },
    NormSys { param_idx: usize, hi: f64, lo: f64 },
    HistoSys { param_idx: usize, hi: Vec<f64>, lo: Vec<f64> },
    StatError { param_indices: Vec<Option<usize>> },
}

/// Parameter list under construction, deduplicated by name.
#[derive(Default)]
struct Registry {
    params: Vec<Parameter>,
    index: HashMap<String, usize>,
    constraints: Vec<ModelConstraint>,
}

impl Registry {
    fn get_or_insert(&mut self, param: Parameter) -> usize {
        if let Some(&idx) = self.index.get(&param.name) {
            return idx;
        }
        let idx = self.params.len();
        self.index.insert(param.name.clone(), idx);
        self.params.push(param);
        idx
    }

    fn alpha(&mut self, sys: &str) -> usize {
        let name = format!("alpha_{sys}");
        if let Some(&idx) = self.index.get(&name) {
            return idx;
        }
        let param_idx =
            self.get_or_insert(Parameter::new(name, 0.0, ALPHA_BOUNDS, ParamRole::Nuisance));
        let glob_idx = self.get_or_insert(Parameter::new(
            format!("nom_alpha_{sys}"),
            0.0,
            ALPHA_GLOB_BOUNDS,
            ParamRole::GlobalObservable,
        ));
        self.constraints.push(ModelConstraint {
            param_idx,
            glob_idx,
            kind: ConstraintKind::Gaussian { width: 1.0 },
        });
        param_idx
    }

    fn gamma(&mut self, channel: &str, bin: usize, tau: f64) -> usize {
        let name = format!("gamma_stat_{channel}_bin_{bin}");
        if let Some(&idx) = self.index.get(&name) {
            return idx;
        }
        let param_idx =
            self.get_or_insert(Parameter::new(name, 1.0, GAMMA_BOUNDS, ParamRole::Nuisance));
        let glob_idx = self.get_or_insert(Parameter::new(
            format!("nom_gamma_stat_{channel}_bin_{bin}"),
            tau,
            GAMMA_GLOB_BOUNDS,
            ParamRole::GlobalObservable,
        ));
        self.constraints.push(ModelConstraint {
            param_idx,
            glob_idx,
            kind: ConstraintKind::Poisson { tau },
        });
        param_idx
    }
}

fn check_len(what: &str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(Error::Validation(format!(
            "{what}: expected {expected} bins, got {got}"
        )));
    }
    Ok(())
}

impl BinnedModel {
    /// Build the likelihood from a workspace.
    pub fn from_workspace(ws: &Workspace) -> Result<Self> {
        let mut reg = Registry::default();
        let mut channels = Vec::with_capacity(ws.channels.len());

        for channel in &ws.channels {
            let n_bins = channel.samples.first().map(|s| s.data.len()).unwrap_or(0);

            // Combined relative MC stat error per bin over all staterror samples.
            let mut sum_nom = vec![0.0; n_bins];
            let mut sum_err2 = vec![0.0; n_bins];
            for sample in &channel.samples {
                check_len(
                    &format!("channel '{}' sample '{}'", channel.name, sample.name),
                    sample.data.len(),
                    n_bins,
                )?;
                for modifier in &sample.modifiers {
                    if let Modifier::StatError { data, .. } = modifier {
                        check_len(
                            &format!("staterror of sample '{}'", sample.name),
                            data.len(),
                            n_bins,
                        )?;
                        for i in 0..n_bins {
                            sum_nom[i] += sample.data[i];
                            sum_err2[i] += data[i] * data[i];
                        }
                    }
                }
            }
            let gammas: Vec<Option<usize>> = (0..n_bins)
                .map(|i| {
                    let rel = if sum_nom[i] > 0.0 { sum_err2[i].sqrt() / sum_nom[i] } else { 0.0 };
                    if rel > 0.0 && rel.is_finite() {
                        Some(reg.gamma(&channel.name, i, 1.0 / (rel * rel)))
                    } else {
                        None
                    }
                })
                .collect();

            let mut samples = Vec::with_capacity(channel.samples.len());
            for sample in &channel.samples {
                let mut modifiers = Vec::with_capacity(sample.modifiers.len());
                for modifier in &sample.modifiers {
                    let m = match modifier {
                        Modifier::NormFactor { name } => ModelModifier::NormFactor {
                            param_idx: reg.get_or_insert(Parameter::new(
                                name.clone(),
                                1.0,
                                NORM_BOUNDS,
                                ParamRole::Nuisance,
                            )),
                        },
                        Modifier::NormSys { name, data } => ModelModifier::NormSys {
                            param_idx: reg.alpha(name),
                            hi: data.hi,
                            lo: data.lo,
                        },
                        Modifier::HistoSys { name, data } => {
                            check_len(&format!("histosys '{name}' hi"), data.hi_data.len(), n_bins)?;
                            check_len(&format!("histosys '{name}' lo"), data.lo_data.len(), n_bins)?;
                            ModelModifier::HistoSys {
                                param_idx: reg.alpha(name),
                                hi: data.hi_data.clone(),
                                lo: data.lo_data.clone(),
                            }
                        }
                        Modifier::StatError { .. } => {
                            ModelModifier::StatError { param_indices: gammas.clone() }
                        }
                    };
                    modifiers.push(m);
                }
                samples.push(ModelSample { nominal: sample.data.clone(), modifiers });
            }

            channels.push(ModelChannel { name: channel.name.clone(), n_bins, samples });
        }

        let mut model = Self {
            name: ws.name.clone(),
            parameters: reg.params,
            constraints: reg.constraints,
            channels,
        };
        model.apply_overrides(&ws.parameters)?;
        Ok(model)
    }

    fn apply_overrides(&mut self, specs: &[ParameterSpec]) -> Result<()> {
        for spec in specs {
            let p = self.parameters.iter_mut().find(|p| p.name == spec.name).ok_or_else(|| {
                Error::Validation(format!("override for unknown parameter '{}'", spec.name))
            })?;
            if let Some((lo, hi)) = spec.bounds {
                if !(lo <= hi) {
                    return Err(Error::Validation(format!(
                        "parameter '{}' override has invalid bounds ({lo}, {hi})",
                        spec.name
                    )));
                }
                p.set_range(lo, hi);
            }
            if let Some(init) = spec.init {
                p.set_value(init);
            }
            if let Some(kind) = spec.kind {
                p.kind = kind;
            }
            p.constant |= spec.fixed;
        }
        Ok(())
    }

    /// Flatten a named observation into a dataset in likelihood bin order.
    pub fn dataset_from_observation(&self, obs: &Observation) -> Result<Dataset> {
        let mut counts = Vec::with_capacity(self.n_bins());
        for channel in &self.channels {
            let data = obs.data.get(&channel.name).ok_or_else(|| {
                Error::Config(format!(
                    "observation '{}' has no data for channel '{}'",
                    obs.name, channel.name
                ))
            })?;
            check_len(
                &format!("observation '{}' channel '{}'", obs.name, channel.name),
                data.len(),
                channel.n_bins,
            )?;
            counts.extend_from_slice(data);
        }
        Ok(Dataset::new(obs.name.clone(), counts))
    }

    fn validate_values_len(&self, got: usize) -> Result<()> {
        if got != self.parameters.len() {
            return Err(Error::Validation(format!(
                "Parameter length mismatch: expected {}, got {}",
                self.parameters.len(),
                got
            )));
        }
        Ok(())
    }

    fn poisson_term(obs: f64, exp: f64) -> f64 {
        let exp = exp.max(MIN_EXPECTED);
        if obs > 0.0 { exp - obs * exp.ln() + ln_gamma(obs + 1.0) } else { exp }
    }
}

/// Exponential (HistFactory code 1) interpolation of a normalisation factor.
fn normsys_factor(alpha: f64, hi: f64, lo: f64) -> f64 {
    if hi <= 0.0 || lo <= 0.0 {
        return if alpha >= 0.0 { 1.0 + alpha * (hi - 1.0) } else { 1.0 - alpha * (1.0 - lo) };
    }
    if alpha >= 0.0 { hi.powf(alpha) } else { lo.powf(-alpha) }
}

/// Piecewise-linear (code 0) template interpolation; returns the additive delta.
fn histosys_delta(alpha: f64, lo: f64, nom: f64, hi: f64) -> f64 {
    if alpha >= 0.0 { alpha * (hi - nom) } else { alpha * (nom - lo) }
}

impl Likelihood for BinnedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.parameters.clone()
    }

    fn n_bins(&self) -> usize {
        self.channels.iter().map(|c| c.n_bins).sum()
    }

    fn expected_main(&self, values: &[f64]) -> Result<Vec<f64>> {
        self.validate_values_len(values.len())?;
        let mut out = Vec::with_capacity(self.n_bins());

        for channel in &self.channels {
            let mut channel_expected = vec![0.0; channel.n_bins];
            for sample in &channel.samples {
                let mut deltas = vec![0.0; channel.n_bins];
                let mut factors = vec![1.0; channel.n_bins];

                for modifier in &sample.modifiers {
                    match modifier {
                        ModelModifier::NormFactor { param_idx } => {
                            let norm = values[*param_idx];
                            factors.iter_mut().for_each(|f| *f *= norm);
                        }
                        ModelModifier::NormSys { param_idx, hi, lo } => {
                            let factor = normsys_factor(values[*param_idx], *hi, *lo);
                            factors.iter_mut().for_each(|f| *f *= factor);
                        }
                        ModelModifier::HistoSys { param_idx, hi, lo } => {
                            let alpha = values[*param_idx];
                            for (i, d) in deltas.iter_mut().enumerate() {
                                *d += histosys_delta(alpha, lo[i], sample.nominal[i], hi[i]);
                            }
                        }
                        ModelModifier::StatError { param_indices } => {
                            for (f, idx) in factors.iter_mut().zip(param_indices) {
                                if let Some(idx) = idx {
                                    *f *= values[*idx];
                                }
                            }
                        }
                    }
                }

                for i in 0..channel.n_bins {
                    channel_expected[i] += (sample.nominal[i] + deltas[i]) * factors[i];
                }
            }
            out.extend(channel_expected);
        }

        Ok(out)
    }

    fn nll(&self, values: &[f64], data: &Dataset) -> Result<f64> {
        let expected = self.expected_main(values)?;
        if data.counts.len() != expected.len() {
            return Err(Error::Validation(format!(
                "dataset '{}' has {} bins, likelihood '{}' has {}",
                data.name,
                data.counts.len(),
                self.name,
                expected.len()
            )));
        }

        let mut nll: f64 =
            data.counts.iter().zip(&expected).map(|(&n, &lam)| Self::poisson_term(n, lam)).sum();

        for c in &self.constraints {
            let theta = values[c.param_idx];
            let glob = values[c.glob_idx];
            nll += match c.kind {
                ConstraintKind::Gaussian { width } => {
                    let pull = (glob - theta) / width;
                    0.5 * pull * pull + width.ln() + 0.5 * (2.0 * std::f64::consts::PI).ln()
                }
                ConstraintKind::Poisson { tau } => Self::poisson_term(glob, theta * tau),
            };
        }

        if !nll.is_finite() {
            return Err(Error::Computation(format!("non-finite NLL in '{}'", self.name)));
        }
        Ok(nll)
    }

    fn constraint(&self, parameter: &str) -> Option<Constraint> {
        let c = self.constraints.iter().find(|c| self.parameters[c.param_idx].name == parameter)?;
        let global_observable = self.parameters[c.glob_idx].name.clone();
        Some(match c.kind {
            ConstraintKind::Gaussian { width } => Constraint::Gaussian { global_observable, width },
            ConstraintKind::Poisson { tau } => Constraint::Poisson { global_observable, tau },
        })
    }
}
