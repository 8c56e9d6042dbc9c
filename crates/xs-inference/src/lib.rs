//! # xs-inference
//!
//! Statistical inference for xsfit.
//!
//! This crate provides:
//! - Minimizer backends behind the [`Minimizer`] capability (argmin L-BFGS, Nelder–Mead)
//! - Hesse covariance estimation
//! - The [`Fitter`] driver (maximum-likelihood fit of the signal strength)
//! - Lazy profile-likelihood scans
//! - Signal-strength to cross-section conversion

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fit;
pub mod hesse;
pub mod optimizer;
pub mod profile_likelihood;
pub mod xsec;

pub use fit::{Fitter, minimize_model};
pub use optimizer::{
    Algorithm, ArgminMinimizer, Minimizer, MinimizerConfig, MinimizerStatus, ObjectiveFunction,
    create_minimizer,
};
pub use profile_likelihood::{ProfileScan, ScanPoint};
pub use xsec::CrossSection;
