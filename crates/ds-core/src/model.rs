//! Model configuration: a likelihood, its working parameters and a snapshot.

use crate::traits::Likelihood;
use crate::{Error, ParamRole, ParameterSet, Result, Snapshot};
use std::sync::Arc;

/// A named model: shared likelihood plus an owned copy of its parameters.
///
/// The likelihood is immutable and shared between derived models; parameter
/// values and ranges belong to each `ModelConfig`. The snapshot is
/// append-only: once recorded it cannot be replaced.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    name: String,
    likelihood: Arc<dyn Likelihood>,
    parameters: ParameterSet,
    pois: Vec<String>,
    snapshot: Option<Snapshot>,
}

impl ModelConfig {
    /// Build a model from a likelihood and the names of its parameters of interest.
    pub fn new(
        name: impl Into<String>,
        likelihood: Arc<dyn Likelihood>,
        pois: Vec<String>,
    ) -> Result<Self> {
        let name = name.into();
        let mut parameters = ParameterSet::new(likelihood.parameters())?;
        for poi in &pois {
            let p = parameters.get_mut(poi).ok_or_else(|| {
                Error::Config(format!("model '{name}': POI '{poi}' is not a likelihood parameter"))
            })?;
            p.role = ParamRole::Poi;
        }
        Ok(Self { name, likelihood, parameters, pois, snapshot: None })
    }

    /// Model name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the model.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Borrow the likelihood.
    pub fn likelihood(&self) -> &dyn Likelihood {
        self.likelihood.as_ref()
    }

    /// Shared handle to the likelihood.
    pub fn likelihood_arc(&self) -> Arc<dyn Likelihood> {
        Arc::clone(&self.likelihood)
    }

    /// Working parameters.
    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// Mutable working parameters.
    pub fn parameters_mut(&mut self) -> &mut ParameterSet {
        &mut self.parameters
    }

    /// Names of the parameters of interest.
    pub fn pois(&self) -> &[String] {
        &self.pois
    }

    /// The single parameter of interest.
    ///
    /// Zero or several POIs make the hypothesis ambiguous and are a
    /// configuration error.
    pub fn poi(&self) -> Result<&str> {
        match self.pois.as_slice() {
            [only] => Ok(only.as_str()),
            [] => Err(Error::Config(format!("model '{}' has no parameter of interest", self.name))),
            many => Err(Error::Config(format!(
                "model '{}' has {} parameters of interest; expected exactly one",
                self.name,
                many.len()
            ))),
        }
    }

    /// Recorded snapshot, if any.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Record the snapshot. Fails if one is already present.
    pub fn set_snapshot(&mut self, snapshot: Snapshot) -> Result<()> {
        if let Some(existing) = &self.snapshot {
            return Err(Error::Validation(format!(
                "model '{}' already has snapshot '{}'",
                self.name, existing.name
            )));
        }
        for key in snapshot.values.keys() {
            if self.parameters.get(key).is_none() {
                return Err(Error::Config(format!(
                    "snapshot '{}' names unknown parameter '{key}'",
                    snapshot.name
                )));
            }
        }
        self.snapshot = Some(snapshot);
        Ok(())
    }

    /// Clone under a new name with a fresh copy of parameters and no snapshot.
    pub fn derive(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            likelihood: Arc::clone(&self.likelihood),
            parameters: self.parameters.clone(),
            pois: self.pois.clone(),
            snapshot: None,
        }
    }

    /// Names of nuisance parameters, likelihood order.
    pub fn nuisance_names(&self) -> Vec<String> {
        self.parameters.with_role(ParamRole::Nuisance).map(|p| p.name.clone()).collect()
    }

    /// Names of global observables, likelihood order.
    pub fn global_observable_names(&self) -> Vec<String> {
        self.parameters.with_role(ParamRole::GlobalObservable).map(|p| p.name.clone()).collect()
    }
}
