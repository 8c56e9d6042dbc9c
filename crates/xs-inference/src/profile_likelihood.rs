//! Profile likelihood scan over the signal strength.
//!
//! For each grid value the POI is fixed (degenerate bounds), the nuisances are
//! re-minimized from their nominal seeds and the result is reported as
//! `Δ(−2 ln L) = 2·(nll(mu) − nll_hat)`, clipped at zero.

use crate::fit::{log_level, minimize_model};
use crate::optimizer::{MinimizerConfig, MinimizerStatus};
use serde::Serialize;
use xs_core::traits::{FixedParamModel, PoiModel};
use xs_core::{Error, Result};
use xs_model::CompiledModel;

/// Single point in a profile likelihood scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanPoint {
    /// Tested POI value.
    pub mu: f64,
    /// `max(0, 2·(nll_mu − nll_hat))`.
    pub delta_twice_nll: f64,
    /// Conditional NLL at `mu` (natural units).
    pub nll_mu: f64,
    /// Conditional minimization status.
    pub status: MinimizerStatus,
    /// Conditional minimization found a valid minimum.
    pub converged: bool,
    /// Conditional best-fit parameters (layout order, POI included).
    pub parameters: Vec<f64>,
}

fn poi_index(model: &(impl PoiModel + ?Sized)) -> Result<usize> {
    model.poi_index().ok_or_else(|| Error::Validation("No POI defined".to_string()))
}

/// `n` equally spaced values from `lo` to `hi`, both included.
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => {
            let step = (hi - lo) / (n - 1) as f64;
            (0..n).map(|i| if i + 1 == n { hi } else { lo + step * i as f64 }).collect()
        }
    }
}

/// Lazily evaluated profile scan.
///
/// Holds its own likelihood snapshot and the global minimum; each call to
/// [`ProfileScan::iter`] starts a fresh pass over the grid, and every point is
/// minimized independently of the others.
#[derive(Debug, Clone)]
pub struct ProfileScan {
    model: CompiledModel,
    poi: usize,
    mu_hat: f64,
    nll_hat: f64,
    global_status: MinimizerStatus,
    mu_values: Vec<f64>,
    backend: String,
    algorithm: String,
    config: MinimizerConfig,
    verbose: bool,
}

impl ProfileScan {
    /// Run the global fit and prepare the grid.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: CompiledModel,
        mu_min: f64,
        mu_max: f64,
        n_points: usize,
        backend: &str,
        algorithm: &str,
        config: MinimizerConfig,
        verbose: bool,
    ) -> Result<Self> {
        let poi = poi_index(&model)?;

        let global = minimize_model(&model, backend, algorithm, &config, verbose)?;
        let mu_hat = global.parameters()[poi];
        let nll_hat = global.min_value();
        let global_status = global.status();
        if !global_status.is_minimum_valid() {
            log::warn!("profile scan: global minimization status {global_status}");
        }
        log::log!(
            log_level(verbose),
            "profile scan: mu_hat = {mu_hat:.6}, nll_hat = {nll_hat:.6}, {n_points} points in [{mu_min}, {mu_max}]"
        );

        Ok(Self {
            model,
            poi,
            mu_hat,
            nll_hat,
            global_status,
            mu_values: linspace(mu_min, mu_max, n_points),
            backend: backend.to_string(),
            algorithm: algorithm.to_string(),
            config,
            verbose,
        })
    }

    /// Unconditional best-fit POI.
    pub fn mu_hat(&self) -> f64 {
        self.mu_hat
    }

    /// Unconditional NLL at the global minimum.
    pub fn nll_hat(&self) -> f64 {
        self.nll_hat
    }

    /// Status of the global minimization.
    pub fn global_status(&self) -> MinimizerStatus {
        self.global_status
    }

    /// Grid of POI values.
    pub fn mu_values(&self) -> &[f64] {
        &self.mu_values
    }

    /// Number of grid points.
    pub fn len(&self) -> usize {
        self.mu_values.len()
    }

    /// True for an empty grid.
    pub fn is_empty(&self) -> bool {
        self.mu_values.is_empty()
    }

    /// Minimize the nuisances with the POI fixed at `mu`.
    pub fn point(&self, mu: f64) -> Result<ScanPoint> {
        let fixed = self.model.with_fixed_param(self.poi, mu);
        let m = minimize_model(&fixed, &self.backend, &self.algorithm, &self.config, self.verbose)?;
        let nll_mu = m.min_value();
        let delta = 2.0 * (nll_mu - self.nll_hat);
        if delta < -1e-6 {
            log::debug!("profile scan: mu = {mu} lies below the global minimum by {:.3e}", -delta);
        }
        let status = m.status();
        let point = ScanPoint {
            mu,
            delta_twice_nll: delta.max(0.0),
            nll_mu,
            status,
            converged: status.is_minimum_valid(),
            parameters: m.parameters(),
        };
        log::log!(
            log_level(self.verbose),
            "profile scan: mu = {:.6}, delta = {:.6}, status = {}",
            point.mu,
            point.delta_twice_nll,
            status
        );
        Ok(point)
    }

    /// Start a pass over the grid.
    pub fn iter(&self) -> ScanIter<'_> {
        ScanIter { scan: self, next: 0 }
    }

    /// Evaluate every grid point.
    pub fn collect_points(&self) -> Result<Vec<ScanPoint>> {
        self.iter().collect()
    }
}

/// Iterator over scan points; each `next` runs one conditional minimization.
pub struct ScanIter<'a> {
    scan: &'a ProfileScan,
    next: usize,
}

impl Iterator for ScanIter<'_> {
    type Item = Result<ScanPoint>;

    fn next(&mut self) -> Option<Self::Item> {
        let mu = *self.scan.mu_values.get(self.next)?;
        self.next += 1;
        Some(self.scan.point(mu))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.scan.mu_values.len() - self.next;
        (rest, Some(rest))
    }
}

impl ExactSizeIterator for ScanIter<'_> {}

impl<'a> IntoIterator for &'a ProfileScan {
    type Item = Result<ScanPoint>;
    type IntoIter = ScanIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
