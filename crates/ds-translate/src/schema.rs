//! Model store JSON schema types
//!
//! A store file holds one or more named workspaces. Each workspace carries
//! HistFactory-style channels, named observations and model configurations:
//!
//! ```json
//! {
//!   "workspaces": [{
//!     "name": "combined",
//!     "channels": [{"name": "SR", "samples": [...]}],
//!     "observations": [{"name": "obsData", "data": {"SR": [12, 7]}}],
//!     "model_configs": [{"name": "ModelConfig", "pois": ["SigXsecOverSM"]}],
//!     "parameters": [{"name": "SigXsecOverSM", "init": 1.0, "bounds": [-40, 40]}]
//!   }]
//! }
//! ```

use ds_core::ParameterKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level store file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    /// Workspaces in this store
    pub workspaces: Vec<Workspace>,
}

/// Workspace: channels, observations and model configurations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    /// Workspace name
    pub name: String,
    /// Channels (regions), in likelihood bin order
    pub channels: Vec<Channel>,
    /// Named observed datasets
    #[serde(default)]
    pub observations: Vec<Observation>,
    /// Model configurations
    #[serde(default)]
    pub model_configs: Vec<ModelConfigSpec>,
    /// Parameter overrides (initial value, bounds, kind)
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

/// Channel (region)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    /// Channel name
    pub name: String,
    /// Samples in this channel
    pub samples: Vec<Sample>,
}

/// Sample (process)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    /// Sample name
    pub name: String,
    /// Expected event counts per bin
    pub data: Vec<f64>,
    /// Modifiers (normalisations and systematics)
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
}

/// Modifier (systematic uncertainty or normalisation)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Modifier {
    /// normfactor: free-floating normalization (e.g., POI)
    #[serde(rename = "normfactor")]
    NormFactor {
        /// Parameter name.
        name: String,
    },

    /// normsys: exponentially interpolated normalization uncertainty
    #[serde(rename = "normsys")]
    NormSys {
        /// Systematic name; the nuisance parameter is `alpha_<name>`.
        name: String,
        /// Up/down factors.
        data: NormSysData,
    },

    /// histosys: linearly interpolated shape uncertainty
    #[serde(rename = "histosys")]
    HistoSys {
        /// Systematic name; the nuisance parameter is `alpha_<name>`.
        name: String,
        /// Up/down templates.
        data: HistoSysData,
    },

    /// staterror: per-bin MC statistical uncertainty, shared per channel
    #[serde(rename = "staterror")]
    StatError {
        /// Modifier name (informational; gammas are keyed by channel).
        name: String,
        /// Absolute per-bin uncertainties of this sample.
        data: Vec<f64>,
    },
}

/// normsys payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormSysData {
    /// Factor at alpha = +1
    pub hi: f64,
    /// Factor at alpha = -1
    pub lo: f64,
}

/// histosys payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoSysData {
    /// Template at alpha = +1
    pub hi_data: Vec<f64>,
    /// Template at alpha = -1
    pub lo_data: Vec<f64>,
}

/// Observed dataset: channel name -> bin counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Dataset name
    pub name: String,
    /// Per-channel counts
    pub data: BTreeMap<String, Vec<f64>>,
}

/// Model configuration entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfigSpec {
    /// Model configuration name
    pub name: String,
    /// Parameters of interest
    pub pois: Vec<String>,
    /// Optional persisted snapshot (parameter -> value)
    #[serde(default)]
    pub snapshot: Option<BTreeMap<String, f64>>,
}

/// Parameter override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name
    pub name: String,
    /// Initial value
    #[serde(default)]
    pub init: Option<f64>,
    /// Bounds
    #[serde(default)]
    pub bounds: Option<(f64, f64)>,
    /// Held constant in fits
    #[serde(default)]
    pub fixed: bool,
    /// Value type override
    #[serde(default)]
    pub kind: Option<ParameterKind>,
}
