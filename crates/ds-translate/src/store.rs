//! Model store and auxiliary record store
//!
//! The model store holds named workspaces, their model configurations and
//! observed datasets. The auxiliary store holds pre-computed global
//! observable values, one row per pseudo-experiment index:
//!
//! ```json
//! {
//!   "globs_alphas": [{"nom_alpha_JES": 0.12, "nom_alpha_ttbar_XS": -0.4}],
//!   "globs_hadhad": [[401.2, 380.9, 377.0, 395.5]]
//! }
//! ```

use crate::model::BinnedModel;
use crate::schema::{Store, Workspace};
use ds_core::{Dataset, Error, ModelConfig, Result, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Snapshot name used when a model configuration carries persisted values.
pub const STORED_SNAPSHOT_NAME: &str = "ModelConfig__snapshot";

/// Opened model store.
#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    store: Store,
}

impl WorkspaceStore {
    /// Open a store file. A missing file is a configuration error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::Config(format!("model store not found: {}", path.display())));
        }
        let text = std::fs::read_to_string(path)?;
        log::debug!("opened model store {}", path.display());
        Self::from_json_str(&text)
    }

    /// Parse a store from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let store: Store = serde_json::from_str(text)?;
        Ok(Self { store })
    }

    /// Look up a workspace by name.
    pub fn workspace(&self, name: &str) -> Result<&Workspace> {
        self.store
            .workspaces
            .iter()
            .find(|w| w.name == name)
            .ok_or_else(|| Error::Config(format!("workspace '{name}' not found in store")))
    }

    /// Build the named model configuration of a workspace.
    ///
    /// A persisted snapshot in the store is recorded on the returned model.
    pub fn model_config(&self, workspace: &str, name: &str) -> Result<ModelConfig> {
        let ws = self.workspace(workspace)?;
        let spec = ws.model_configs.iter().find(|m| m.name == name).ok_or_else(|| {
            Error::Config(format!("model configuration '{name}' not found in workspace '{workspace}'"))
        })?;
        let likelihood = BinnedModel::from_workspace(ws)?;
        let mut model = ModelConfig::new(spec.name.clone(), Arc::new(likelihood), spec.pois.clone())?;
        if let Some(values) = &spec.snapshot {
            model.set_snapshot(Snapshot {
                name: STORED_SNAPSHOT_NAME.to_string(),
                values: values.clone(),
            })?;
        }
        Ok(model)
    }

    /// Named observed dataset of a workspace, flattened in likelihood bin order.
    pub fn dataset(&self, workspace: &str, name: &str) -> Result<Dataset> {
        let ws = self.workspace(workspace)?;
        let obs = ws.observations.iter().find(|o| o.name == name).ok_or_else(|| {
            Error::Config(format!("dataset '{name}' not found in workspace '{workspace}'"))
        })?;
        BinnedModel::from_workspace(ws)?.dataset_from_observation(obs)
    }
}

/// One auxiliary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuxTable {
    /// Rows keyed by global observable name.
    Named(Vec<BTreeMap<String, f64>>),
    /// Fixed-length rows addressed by bin index.
    Array(Vec<Vec<f64>>),
}

impl AuxTable {
    /// Number of rows
    pub fn n_rows(&self) -> usize {
        match self {
            AuxTable::Named(rows) => rows.len(),
            AuxTable::Array(rows) => rows.len(),
        }
    }
}

/// Opened auxiliary record store.
#[derive(Debug, Clone, Default)]
pub struct AuxStore {
    tables: BTreeMap<String, AuxTable>,
}

impl AuxStore {
    /// Open an auxiliary store file. A missing file is a configuration error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::Config(format!("auxiliary store not found: {}", path.display())));
        }
        let text = std::fs::read_to_string(path)?;
        let tables: BTreeMap<String, AuxTable> = serde_json::from_str(&text)?;
        let store = Self::from_tables(tables)?;
        log::debug!("opened auxiliary store {} ({} tables)", path.display(), store.tables.len());
        Ok(store)
    }

    /// Build from in-memory tables. Array rows must share one length.
    pub fn from_tables(tables: BTreeMap<String, AuxTable>) -> Result<Self> {
        for (name, table) in &tables {
            let AuxTable::Array(rows) = table else { continue };
            let Some(first) = rows.first() else { continue };
            if let Some(bad) = rows.iter().position(|r| r.len() != first.len()) {
                return Err(Error::Validation(format!(
                    "auxiliary table '{name}': row {bad} has {} entries, expected {}",
                    rows[bad].len(),
                    first.len()
                )));
            }
        }
        Ok(Self { tables })
    }

    fn table(&self, name: &str) -> Result<&AuxTable> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::Config(format!("auxiliary table '{name}' not found")))
    }

    fn row_error(table: &str, index: usize, n_rows: usize) -> Error {
        Error::Config(format!(
            "auxiliary table '{table}' has {n_rows} rows; index {index} is out of range"
        ))
    }

    /// Name-keyed row at `index`.
    pub fn named_row(&self, table: &str, index: usize) -> Result<&BTreeMap<String, f64>> {
        match self.table(table)? {
            AuxTable::Named(rows) => {
                rows.get(index).ok_or_else(|| Self::row_error(table, index, rows.len()))
            }
            AuxTable::Array(_) => Err(Error::Config(format!(
                "auxiliary table '{table}' holds array rows, expected name-keyed rows"
            ))),
        }
    }

    /// Array row at `index`.
    pub fn array_row(&self, table: &str, index: usize) -> Result<&[f64]> {
        match self.table(table)? {
            AuxTable::Array(rows) => rows
                .get(index)
                .map(Vec::as_slice)
                .ok_or_else(|| Self::row_error(table, index, rows.len())),
            AuxTable::Named(_) => Err(Error::Config(format!(
                "auxiliary table '{table}' holds name-keyed rows, expected array rows"
            ))),
        }
    }

    /// Rows in a table.
    pub fn n_rows(&self, table: &str) -> Result<usize> {
        Ok(self.table(table)?.n_rows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORE: &str = r#"{
      "workspaces": [{
        "name": "combined",
        "channels": [
          {"name": "SR", "samples": [
            {"name": "sig", "data": [1.0, 2.0],
             "modifiers": [{"type": "normfactor", "name": "mu"}]},
            {"name": "bkg", "data": [10.0, 8.0],
             "modifiers": [{"type": "staterror", "name": "stat", "data": [1.0, 0.8]}]}
          ]},
          {"name": "CR", "samples": [
            {"name": "bkg", "data": [50.0], "modifiers": []}
          ]}
        ],
        "observations": [{"name": "obsData", "data": {"CR": [52.0], "SR": [12.0, 9.0]}}],
        "model_configs": [
          {"name": "ModelConfig", "pois": ["mu"]},
          {"name": "WithSnap", "pois": ["mu"], "snapshot": {"mu": 2.0}}
        ]
      }]
    }"#;

    #[test]
    fn test_model_config_and_dataset() {
        let store = WorkspaceStore::from_json_str(STORE).unwrap();
        let model = store.model_config("combined", "ModelConfig").unwrap();
        assert_eq!(model.poi().unwrap(), "mu");
        assert!(model.snapshot().is_none());
        assert_eq!(model.likelihood().n_bins(), 3);

        let data = store.dataset("combined", "obsData").unwrap();
        // channel order of the workspace, not key order of the observation
        assert_eq!(data.counts, vec![12.0, 9.0, 52.0]);
    }

    #[test]
    fn test_stored_snapshot_is_recorded() {
        let store = WorkspaceStore::from_json_str(STORE).unwrap();
        let model = store.model_config("combined", "WithSnap").unwrap();
        assert_eq!(model.snapshot().unwrap().get("mu"), Some(2.0));
    }

    #[test]
    fn test_missing_objects_are_config_errors() {
        let store = WorkspaceStore::from_json_str(STORE).unwrap();
        assert!(store.workspace("nope").unwrap_err().is_config());
        assert!(store.model_config("combined", "nope").unwrap_err().is_config());
        assert!(store.dataset("combined", "asimov").unwrap_err().is_config());
        assert!(WorkspaceStore::open("/nonexistent/store.json").unwrap_err().is_config());
    }

    fn aux() -> AuxStore {
        let text = r#"{
          "globs_alphas": [{"nom_alpha_JES": 0.5}, {"nom_alpha_JES": -0.25}],
          "globs_hadhad": [[0.1, 0.2, 0.3, 0.4], [1.0, 2.0, 3.0, 4.0]]
        }"#;
        let tables: BTreeMap<String, AuxTable> = serde_json::from_str(text).unwrap();
        AuxStore::from_tables(tables).unwrap()
    }

    #[test]
    fn test_aux_rows() {
        let aux = aux();
        assert_eq!(aux.named_row("globs_alphas", 1).unwrap()["nom_alpha_JES"], -0.25);
        assert_eq!(aux.array_row("globs_hadhad", 0).unwrap()[3], 0.4);
        assert_eq!(aux.n_rows("globs_hadhad").unwrap(), 2);
    }

    #[test]
    fn test_aux_errors() {
        let aux = aux();
        assert!(aux.named_row("globs_ltt", 0).unwrap_err().is_config());
        assert!(aux.array_row("globs_hadhad", 2).unwrap_err().is_config());
        assert!(aux.array_row("globs_alphas", 0).unwrap_err().is_config());
        assert!(aux.named_row("globs_hadhad", 0).unwrap_err().is_config());
    }

    #[test]
    fn test_ragged_array_table_rejected() {
        let mut tables = BTreeMap::new();
        tables.insert("globs_slt".to_string(), AuxTable::Array(vec![vec![1.0, 2.0], vec![1.0]]));
        assert!(AuxStore::from_tables(tables).is_err());
    }
}
