//! # xs-core
//!
//! Core types, traits, and error handling for xsfit.
//!
//! This crate provides:
//! - The error taxonomy shared by every crate
//! - Model traits consumed by the inference layer
//! - The [`FitResult`] record

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{FixedParamModel, LogDensityModel, PoiModel};
pub use types::FitResult;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
