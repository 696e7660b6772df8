//! # ds-core
//!
//! Core types and traits for DiscoStat.
//!
//! The inference crate depends only on the [`Likelihood`] and
//! [`FittingService`] traits defined here, never on a concrete backend.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod model;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use model::ModelConfig;
pub use traits::{FittingService, GenerateMode, GenerateOptions, Likelihood};
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
