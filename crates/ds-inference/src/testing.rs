//! Shared fixtures for unit tests.

use ds_core::{Dataset, ModelConfig};
use ds_translate::{AuxStore, AuxTable, WorkspaceStore};
use std::collections::BTreeMap;

pub(crate) const STORE_JSON: &str = include_str!("../../../tests/fixtures/discovery_store.json");
pub(crate) const AUX_JSON: &str = include_str!("../../../tests/fixtures/aux_globs.json");

pub(crate) fn store() -> WorkspaceStore {
    WorkspaceStore::from_json_str(STORE_JSON).unwrap()
}

/// Signal-plus-background model of the four-region fixture.
pub(crate) fn toy_model() -> ModelConfig {
    store().model_config("combined", "ModelConfig").unwrap()
}

pub(crate) fn observed() -> Dataset {
    store().dataset("combined", "obsData").unwrap()
}

pub(crate) fn aux() -> AuxStore {
    let tables: BTreeMap<String, AuxTable> = serde_json::from_str(AUX_JSON).unwrap();
    AuxStore::from_tables(tables).unwrap()
}
