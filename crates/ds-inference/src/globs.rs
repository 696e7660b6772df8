//! Global observable binding from pre-computed auxiliary tables.
//!
//! Two schemes run in order:
//!
//! - exact key: every `nom_alpha_*` global observable is looked up by its own
//!   name in a name-keyed row;
//! - channel pattern: every `nom_gamma_stat_*` observable whose name matches a
//!   channel pattern takes element `bin` of that channel's array row, with the
//!   bin parsed from the trailing `bin_<n>`.

use ds_core::{Error, ModelConfig, ParamRole, Result};
use ds_translate::AuxStore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Analysis region with per-bin statistical global observables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Hadronic-hadronic signal region
    Hadhad,
    /// Lepton-hadron single-lepton-trigger region
    Slt,
    /// Lepton-hadron lepton-plus-tau-trigger region
    Ltt,
    /// Z+heavy-flavour control region
    Zcr,
}

impl Channel {
    /// All channels, binding order.
    pub const ALL: [Channel; 4] = [Channel::Hadhad, Channel::Slt, Channel::Ltt, Channel::Zcr];

    /// Name pattern; capture group 1 is the bin index.
    pub fn pattern_str(self) -> &'static str {
        match self {
            Channel::Hadhad => r"^nom_gamma_stat_.*SpcTauHH.*bin_(\d+)$",
            Channel::Slt => r"^nom_gamma_stat_.*SpcTauLH_.*LTT0.*bin_(\d+)$",
            Channel::Ltt => r"^nom_gamma_stat_.*SpcTauLH_.*LTT1.*bin_(\d+)$",
            Channel::Zcr => r"^nom_gamma_stat_.*DZllbbCR.*bin_(\d+)$",
        }
    }

    /// Default backing table.
    pub fn default_table(self) -> &'static str {
        match self {
            Channel::Hadhad => "globs_hadhad",
            Channel::Slt => "globs_slt",
            Channel::Ltt => "globs_ltt",
            Channel::Zcr => "globs_ZCR",
        }
    }

    /// Compiled pattern, built once per channel.
    pub fn pattern(self) -> Result<&'static Regex> {
        static HADHAD: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
        static SLT: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
        static LTT: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
        static ZCR: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
        let cell = match self {
            Channel::Hadhad => &HADHAD,
            Channel::Slt => &SLT,
            Channel::Ltt => &LTT,
            Channel::Zcr => &ZCR,
        };
        cell.get_or_init(|| Regex::new(self.pattern_str()))
            .as_ref()
            .map_err(|e| Error::Computation(format!("{self:?} pattern: {e}")))
    }

    /// Bin index encoded in `name`, if it belongs to this channel.
    pub fn bin_index(self, name: &str) -> Result<Option<usize>> {
        let Some(caps) = self.pattern()?.captures(name) else { return Ok(None) };
        caps[1]
            .parse::<usize>()
            .map(Some)
            .map_err(|e| Error::Config(format!("'{name}': bad bin index: {e}")))
    }
}

/// Channel bound to an auxiliary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelBinding {
    /// Channel
    pub channel: Channel,
    /// Array table backing it
    pub table: String,
}

/// Binder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinderConfig {
    /// Prefix of exact-key observables
    pub alpha_prefix: String,
    /// Name-keyed table for exact-key observables
    pub alpha_table: String,
    /// Prefix of channel-pattern observables
    pub gamma_prefix: String,
    /// Channels to bind, in order
    pub channels: Vec<ChannelBinding>,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            alpha_prefix: "nom_alpha_".into(),
            alpha_table: "globs_alphas".into(),
            gamma_prefix: "nom_gamma_stat_".into(),
            channels: Channel::ALL
                .iter()
                .map(|&channel| ChannelBinding { channel, table: channel.default_table().into() })
                .collect(),
        }
    }
}

/// One value written into a global observable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    /// Global observable
    pub name: String,
    /// Value before binding
    pub old: f64,
    /// Value from the auxiliary table
    pub new: f64,
}

/// All assignments of one binding run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BindReport {
    /// Exact-key assignments
    pub alphas: Vec<Assignment>,
    /// Channel-pattern assignments, channel order
    pub gammas: Vec<Assignment>,
}

impl BindReport {
    /// Total assignments
    pub fn len(&self) -> usize {
        self.alphas.len() + self.gammas.len()
    }

    /// True if nothing was bound
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn assign(model: &mut ModelConfig, name: &str, new: f64) -> Result<Assignment> {
    let p = model
        .parameters_mut()
        .get_mut(name)
        .ok_or_else(|| Error::Config(format!("global observable '{name}' not found")))?;
    if !p.is_real() {
        return Err(Error::Config(format!("global observable '{name}' is not real-valued")));
    }
    let old = p.value;
    p.value = new;
    log::info!("{name}: {old} -> {new}");
    Ok(Assignment { name: name.to_string(), old, new })
}

/// Exact-key scheme: each prefixed observable must be present in the row.
pub fn bind_alphas(
    model: &mut ModelConfig,
    aux: &AuxStore,
    config: &BinderConfig,
    index: usize,
) -> Result<Vec<Assignment>> {
    let row = aux.named_row(&config.alpha_table, index)?;
    let names: Vec<String> = model
        .parameters()
        .with_role(ParamRole::GlobalObservable)
        .filter(|p| p.name.starts_with(&config.alpha_prefix))
        .map(|p| p.name.clone())
        .collect();

    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let value = *row.get(&name).ok_or_else(|| {
            Error::Config(format!(
                "'{name}' missing from row {index} of table '{}'",
                config.alpha_table
            ))
        })?;
        out.push(assign(model, &name, value)?);
    }
    Ok(out)
}

/// Channel-pattern scheme for one channel; non-matching observables are left alone.
pub fn bind_channel(
    model: &mut ModelConfig,
    aux: &AuxStore,
    binding: &ChannelBinding,
    gamma_prefix: &str,
    index: usize,
) -> Result<Vec<Assignment>> {
    let mut targets = Vec::new();
    for p in model.parameters().with_role(ParamRole::GlobalObservable) {
        if !p.name.starts_with(gamma_prefix) {
            continue;
        }
        if let Some(bin) = binding.channel.bin_index(&p.name)? {
            targets.push((p.name.clone(), bin));
        }
    }
    if targets.is_empty() {
        log::debug!("{:?}: no matching global observables", binding.channel);
        return Ok(Vec::new());
    }

    let row = aux.array_row(&binding.table, index)?;
    let mut out = Vec::with_capacity(targets.len());
    for (name, bin) in targets {
        let value = *row.get(bin).ok_or_else(|| {
            Error::Config(format!(
                "'{name}': bin {bin} out of range for row {index} of table '{}' ({} entries)",
                binding.table,
                row.len()
            ))
        })?;
        out.push(assign(model, &name, value)?);
    }
    Ok(out)
}

/// Bind every configured scheme for pseudo-experiment `index`.
pub fn bind_global_observables(
    model: &mut ModelConfig,
    aux: &AuxStore,
    config: &BinderConfig,
    index: usize,
) -> Result<BindReport> {
    let alphas = bind_alphas(model, aux, config, index)?;
    let mut gammas = Vec::new();
    for binding in &config.channels {
        gammas.extend(bind_channel(model, aux, binding, &config.gamma_prefix, index)?);
    }
    let report = BindReport { alphas, gammas };
    log::info!("bound {} global observables from index {index}", report.len());
    Ok(report)
}
