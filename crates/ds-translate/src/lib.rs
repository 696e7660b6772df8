//! # ds-translate
//!
//! Storage and reference likelihood for DiscoStat.
//!
//! - [`store::WorkspaceStore`]: JSON model store (workspaces, model
//!   configurations, observed datasets)
//! - [`store::AuxStore`]: pre-computed global observable tables
//! - [`BinnedModel`]: HistFactory-style binned Poisson likelihood

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod model;
pub mod schema;
pub mod store;

pub use model::BinnedModel;
pub use store::{AuxStore, AuxTable, WorkspaceStore};
