//! Common data types for xsfit

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fit result: best-fit signal strength, nuisance pulls and their uncertainties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Minimizer status code (0 = converged; see `MinimizerStatus` in xs-inference).
    pub status: i32,

    /// Whether the minimization itself converged (independent of the Hesse outcome).
    pub converged: bool,

    /// Negative log-likelihood at the minimum, natural units (`-ln L`).
    pub nll: f64,

    /// Best-fit signal strength.
    pub mu: f64,

    /// Symmetric uncertainty on `mu` from the inverse Hessian.
    pub mu_uncertainty: f64,

    /// Best-fit nuisance values keyed by parameter name.
    pub nuisance_values: BTreeMap<String, f64>,

    /// Nuisance uncertainties keyed by parameter name.
    pub nuisance_uncertainties: BTreeMap<String, f64>,

    /// Parameter names in layout order (`mu` first).
    pub parameter_names: Vec<String>,

    /// Best-fit parameter values in layout order.
    pub parameters: Vec<f64>,

    /// Parameter uncertainties in layout order.
    pub uncertainties: Vec<f64>,

    /// Covariance matrix (row-major, N×N). `None` if Hessian inversion failed.
    pub covariance: Option<Vec<f64>>,

    /// Number of objective evaluations.
    pub n_evaluations: usize,

    /// Optimizer termination message.
    pub message: String,
}

impl FitResult {
    /// Assemble a fit result from layout-ordered vectors. Index 0 is the signal strength.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parameters(
        status: i32,
        converged: bool,
        nll: f64,
        parameter_names: Vec<String>,
        parameters: Vec<f64>,
        uncertainties: Vec<f64>,
        covariance: Option<Vec<f64>>,
        n_evaluations: usize,
        message: String,
    ) -> Self {
        let mu = parameters.first().copied().unwrap_or(f64::NAN);
        let mu_uncertainty = uncertainties.first().copied().unwrap_or(f64::NAN);

        let mut nuisance_values = BTreeMap::new();
        let mut nuisance_uncertainties = BTreeMap::new();
        for (i, name) in parameter_names.iter().enumerate().skip(1) {
            if let Some(&v) = parameters.get(i) {
                nuisance_values.insert(name.clone(), v);
            }
            if let Some(&e) = uncertainties.get(i) {
                nuisance_uncertainties.insert(name.clone(), e);
            }
        }

        Self {
            status,
            converged,
            nll,
            mu,
            mu_uncertainty,
            nuisance_values,
            nuisance_uncertainties,
            parameter_names,
            parameters,
            uncertainties,
            covariance,
            n_evaluations,
            message,
        }
    }

    /// True when the status code reports a clean minimum with a valid covariance.
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    /// Get correlation matrix element (i, j). Returns `None` if covariance is unavailable.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let n = self.parameters.len();
        if i >= n || j >= n {
            return None;
        }
        let sigma_i = self.uncertainties[i];
        let sigma_j = self.uncertainties[j];
        if sigma_i <= 0.0 || sigma_j <= 0.0 {
            return None;
        }
        Some(cov[i * n + j] / (sigma_i * sigma_j))
    }
}
