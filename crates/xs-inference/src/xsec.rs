//! Signal strength to cross-section conversion.

use serde::{Deserialize, Serialize};
use xs_core::FitResult;

/// Measured cross section in the units of the reference value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossSection {
    /// `mu × sigma_ref`.
    pub value: f64,
    /// `mu_uncertainty × sigma_ref`.
    pub uncertainty: f64,
}

impl CrossSection {
    /// Convert a fit result.
    pub fn from_fit(fr: &FitResult, sigma_ref: f64) -> Self {
        Self {
            value: cross_section(fr, sigma_ref),
            uncertainty: cross_section_uncertainty(fr, sigma_ref),
        }
    }
}

/// Best-fit cross section.
pub fn cross_section(fr: &FitResult, sigma_ref: f64) -> f64 {
    fr.mu * sigma_ref
}

/// Symmetric cross-section uncertainty.
pub fn cross_section_uncertainty(fr: &FitResult, sigma_ref: f64) -> f64 {
    fr.mu_uncertainty * sigma_ref
}
