//! Mutable binned model: registration surface plus likelihood settings.

use crate::histogram::Histogram;
use crate::layout::ParameterLayout;
use crate::likelihood::CompiledModel;
use crate::nuisance::NuisanceRegistry;
use crate::templates::TemplateStore;
use xs_core::{Error, Result};

/// Default signal-strength bounds.
pub const DEFAULT_MU_BOUNDS: (f64, f64) = (0.0, 10.0);
/// Default per-bin expectation floor.
pub const DEFAULT_YIELD_FLOOR: f64 = 1e-9;
/// Floor substituted when a non-positive one is requested.
const FALLBACK_YIELD_FLOOR: f64 = 1e-12;

/// Templates, nuisances and likelihood settings for one measurement.
///
/// Registration validates eagerly; every fit or scan compiles a fresh
/// [`CompiledModel`] so later registrations are always picked up.
#[derive(Debug, Clone)]
pub struct BinnedModel {
    store: TemplateStore,
    registry: NuisanceRegistry,
    mu_bounds: (f64, f64),
    yield_floor: f64,
}

impl BinnedModel {
    /// Empty model; processes named `signal_label` are treated as signal.
    pub fn new(signal_label: impl Into<String>) -> Self {
        Self {
            store: TemplateStore::new(signal_label),
            registry: NuisanceRegistry::new(),
            mu_bounds: DEFAULT_MU_BOUNDS,
            yield_floor: DEFAULT_YIELD_FLOOR,
        }
    }

    /// Register a channel with its observed data.
    pub fn add_channel(&mut self, name: &str, data: &Histogram) -> Result<()> {
        self.store.add_channel(name, data)
    }

    /// Register a process template under an existing channel.
    pub fn add_process(
        &mut self,
        channel: &str,
        process: &str,
        nominal: &Histogram,
        is_signal: bool,
    ) -> Result<()> {
        self.store.add_process(channel, process, nominal, is_signal)
    }

    /// Change the signal label and re-flag every process.
    pub fn mark_signal_process(&mut self, process: &str) {
        self.store.mark_signal_process(process);
    }

    /// Register a normalization nuisance.
    pub fn add_norm_systematic(&mut self, name: &str, log_normal: bool) -> Result<()> {
        self.registry.add_norm_systematic(name, log_normal)
    }

    /// Attach a fractional normalization effect.
    pub fn set_norm_effect(
        &mut self,
        name: &str,
        channel: &str,
        process: &str,
        frac: f64,
    ) -> Result<()> {
        self.registry.set_norm_effect(&self.store, name, channel, process, frac)
    }

    /// Register a shape nuisance.
    pub fn add_shape_systematic(&mut self, name: &str) -> Result<()> {
        self.registry.add_shape_systematic(name)
    }

    /// Attach up/down shape templates.
    pub fn set_shape_effect(
        &mut self,
        name: &str,
        channel: &str,
        process: &str,
        up: &Histogram,
        down: &Histogram,
    ) -> Result<()> {
        self.registry.set_shape_effect(&self.store, name, channel, process, up, down)
    }

    /// Set the signal-strength range. Both ends must be finite with `lo < hi`.
    pub fn set_mu_bounds(&mut self, lo: f64, hi: f64) -> Result<()> {
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(Error::Validation(format!("invalid mu bounds [{lo}, {hi}]")));
        }
        self.mu_bounds = (lo, hi);
        Ok(())
    }

    /// Set the per-bin expectation floor. Non-positive (or NaN) values become `1e-12`.
    pub fn set_yield_floor(&mut self, eps: f64) {
        self.yield_floor = if eps > 0.0 { eps } else { FALLBACK_YIELD_FLOOR };
    }

    /// `[mu_lo, mu_hi]`.
    pub fn mu_bounds(&self) -> (f64, f64) {
        self.mu_bounds
    }

    /// Per-bin expectation floor.
    pub fn yield_floor(&self) -> f64 {
        self.yield_floor
    }

    /// Registered channels and processes.
    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    /// Registered nuisances.
    pub fn registry(&self) -> &NuisanceRegistry {
        &self.registry
    }

    /// Current parameter layout.
    pub fn layout(&self) -> ParameterLayout {
        ParameterLayout::build(&self.registry)
    }

    /// Snapshot the current state into an evaluator.
    pub fn compile(&self) -> CompiledModel {
        CompiledModel::compile(&self.store, &self.registry, self.mu_bounds, self.yield_floor)
    }

    /// `-2 ln L` at `params` (layout order: mu, norm nuisances, shape nuisances).
    pub fn negative_log_likelihood(&self, params: &[f64]) -> Result<f64> {
        self.compile().twice_nll(params)
    }

    /// Fail unless there is at least one channel and at least one signal process.
    pub fn check_fittable(&self) -> Result<()> {
        if self.store.is_empty() {
            return Err(Error::Validation("no channels registered".to_string()));
        }
        if !self.store.has_signal() {
            return Err(Error::Validation(format!(
                "no signal process registered (signal label '{}')",
                self.store.signal_label()
            )));
        }
        Ok(())
    }
}

impl Default for BinnedModel {
    fn default() -> Self {
        Self::new("signal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn h(v: &[f64]) -> Histogram {
        Histogram::new(0.0, v.len() as f64, v.to_vec()).unwrap()
    }

    fn two_bin() -> BinnedModel {
        let mut m = BinnedModel::default();
        m.add_channel("numu", &h(&[10.0, 20.0])).unwrap();
        m.add_process("numu", "background", &h(&[8.0, 15.0]), false).unwrap();
        m.add_process("numu", "signal", &h(&[2.0, 5.0]), true).unwrap();
        m
    }

    #[test]
    fn test_settings_validation() {
        let mut m = BinnedModel::default();
        assert_eq!(m.mu_bounds(), DEFAULT_MU_BOUNDS);
        assert!(m.set_mu_bounds(1.0, 1.0).is_err());
        assert!(m.set_mu_bounds(2.0, 1.0).is_err());
        assert!(m.set_mu_bounds(0.0, f64::INFINITY).is_err());
        m.set_mu_bounds(-1.0, 5.0).unwrap();
        assert_eq!(m.mu_bounds(), (-1.0, 5.0));

        m.set_yield_floor(0.0);
        assert_eq!(m.yield_floor(), 1e-12);
        m.set_yield_floor(-3.0);
        assert_eq!(m.yield_floor(), 1e-12);
        m.set_yield_floor(1e-6);
        assert_eq!(m.yield_floor(), 1e-6);
    }

    #[test]
    fn test_check_fittable() {
        let mut m = BinnedModel::default();
        assert!(m.check_fittable().is_err());
        m.add_channel("numu", &h(&[1.0])).unwrap();
        m.add_process("numu", "bkg", &h(&[1.0]), false).unwrap();
        assert!(m.check_fittable().is_err());
        m.mark_signal_process("bkg");
        assert!(m.check_fittable().is_ok());
    }

    #[test]
    fn test_negative_log_likelihood_tracks_registration() {
        let mut m = two_bin();
        let before = m.negative_log_likelihood(&[1.0]).unwrap();
        m.add_norm_systematic("bkg_norm", true).unwrap();
        // New parameter must be supplied once registered.
        assert!(m.negative_log_likelihood(&[1.0]).is_err());
        let after = m.negative_log_likelihood(&[1.0, 0.0]).unwrap();
        assert_relative_eq!(before, after, epsilon = 1e-12);

        m.set_norm_effect("bkg_norm", "numu", "background", 0.2).unwrap();
        assert!(m.negative_log_likelihood(&[1.0, 1.0]).unwrap() > after);
        assert_eq!(m.layout().names(), ["mu", "theta_norm_bkg_norm"]);
    }

    #[test]
    fn test_yield_floor_reaches_likelihood() {
        let mut m = BinnedModel::default();
        m.add_channel("c", &h(&[0.0])).unwrap();
        m.add_process("c", "signal", &h(&[1.0]), true).unwrap();
        m.set_yield_floor(1e-3);
        assert_relative_eq!(m.negative_log_likelihood(&[0.0]).unwrap(), 2e-3, epsilon = 1e-15);
    }
}
