//! Null (background-only) and alternate hypothesis models.

use ds_core::{Error, ModelConfig, Result, Snapshot};

/// Suffix appended to the alternate model name for the null model.
pub const NULL_MODEL_SUFFIX: &str = "B_only";

/// Set the POI range to `[-|r|, |r|]` and its value to 0.
pub fn prepare_poi(model: &mut ModelConfig, range: f64) -> Result<()> {
    let poi = model.poi()?.to_string();
    let r = range.abs();
    if !r.is_finite() {
        return Err(Error::Validation(format!("POI range must be finite, got {range}")));
    }
    let p = model
        .parameters_mut()
        .get_mut(&poi)
        .ok_or_else(|| Error::Config(format!("POI '{poi}' not found")))?;
    p.set_range(-r, r);
    p.value = 0.0;
    log::info!("{poi}: range [{}, {r}], value 0", -r);
    Ok(())
}

/// Derive the background-only model: POI fixed at 0 and snapshotted.
pub fn build_null_model(alt: &ModelConfig) -> Result<ModelConfig> {
    let poi = alt.poi()?.to_string();
    let mut null = alt.derive(format!("{}{NULL_MODEL_SUFFIX}", alt.name()));
    let p = null
        .parameters_mut()
        .get_mut(&poi)
        .ok_or_else(|| Error::Config(format!("POI '{poi}' not found")))?;
    p.value = 0.0;
    let name = format!("{}__snapshot", null.name());
    null.set_snapshot(Snapshot::single(name, poi, 0.0))?;
    Ok(null)
}

/// Give the alternate model a POI snapshot if it has none.
///
/// The snapshot takes `value` when given, else the current POI value. The
/// working POI value is restored afterwards. Returns whether a snapshot was
/// recorded.
pub fn ensure_alt_snapshot(alt: &mut ModelConfig, value: Option<f64>) -> Result<bool> {
    if alt.snapshot().is_some() {
        return Ok(false);
    }
    let poi = alt.poi()?.to_string();
    let current = alt.parameters().value(&poi)?;
    let frozen = value.unwrap_or(current);
    let name = format!("{}__snapshot", alt.name());
    alt.set_snapshot(Snapshot::single(name, poi.as_str(), frozen))?;
    if let Some(p) = alt.parameters_mut().get_mut(&poi) {
        p.value = current;
    }
    log::info!("{}: snapshot {poi} = {frozen}", alt.name());
    Ok(true)
}
