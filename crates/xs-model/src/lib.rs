//! # xs-model
//!
//! Binned template model for xsfit.
//!
//! Channels own an observed-data histogram and process templates; nuisances attach
//! fractional normalization effects or up/down shape templates to (channel, process)
//! pairs. [`BinnedModel::compile`] flattens the current state into a
//! [`CompiledModel`] that evaluates `-2 ln L` and its gradient.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod histogram;
pub mod layout;
pub mod likelihood;
pub mod model;
pub mod nuisance;
pub mod templates;
pub mod workspace;

pub use histogram::{Binning, Histogram};
pub use layout::{POI_INDEX, ParameterLayout};
pub use likelihood::CompiledModel;
pub use model::BinnedModel;
pub use nuisance::NuisanceRegistry;
pub use templates::TemplateStore;
pub use workspace::Workspace;
