//! Run configuration files.

use anyhow::{Context, Result};
use ds_inference::RunConfig;
use std::path::Path;

/// Read a run config; `.json` is parsed as JSON, anything else as YAML.
pub fn read_run_config(path: &Path) -> Result<RunConfig> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("reading run config {}", path.display()))?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let cfg: RunConfig = if ext == "json" {
        serde_json::from_slice(&bytes)?
    } else {
        serde_yaml_ng::from_slice(&bytes)?
    };
    Ok(cfg)
}

/// Run config from `path`, or defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(p) => read_run_config(p),
        None => Ok(RunConfig::default()),
    }
}
