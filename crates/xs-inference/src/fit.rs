//! Fit driver.
//!
//! [`Fitter`] owns a [`BinnedModel`] plus the settings needed to turn it into a
//! measurement: minimizer configuration and the reference cross section. Every fit or
//! scan compiles a fresh likelihood snapshot, so registrations made between calls are
//! always honoured.

use crate::optimizer::{
    MinimizerConfig, Minimizer, ModelObjective, create_minimizer, declare_model_variables,
};
use crate::profile_likelihood::ProfileScan;
use crate::xsec::{self, CrossSection};
use xs_core::traits::LogDensityModel;
use xs_core::{Error, FitResult, Result};
use xs_model::workspace::Workspace;
use xs_model::{BinnedModel, CompiledModel, Histogram};

/// Create a minimizer for `model`, declare its parameters and minimize.
///
/// Backend names are resolved before the model is evaluated even once.
pub fn minimize_model(
    model: &(impl LogDensityModel + ?Sized),
    backend: &str,
    algorithm: &str,
    config: &MinimizerConfig,
    verbose: bool,
) -> Result<Box<dyn Minimizer>> {
    let mut minimizer = create_minimizer(backend, algorithm, config)?;
    minimizer.set_print_level(if verbose { 1 } else { 0 });
    declare_model_variables(minimizer.as_mut(), model, config.initial_step)?;
    minimizer.minimize(&ModelObjective::new(model))?;
    Ok(minimizer)
}

pub(crate) fn log_level(verbose: bool) -> log::Level {
    if verbose { log::Level::Info } else { log::Level::Debug }
}

/// Profile-likelihood fitter for a signal-strength measurement.
#[derive(Debug, Clone)]
pub struct Fitter {
    model: BinnedModel,
    sigma_ref: f64,
    config: MinimizerConfig,
}

impl Fitter {
    /// Empty fitter; processes named `signal_label` are treated as signal.
    pub fn new(signal_label: impl Into<String>) -> Self {
        Self { model: BinnedModel::new(signal_label), sigma_ref: 1.0, config: MinimizerConfig::default() }
    }

    /// Build from a JSON workspace (registration goes through the validated API).
    pub fn from_workspace(ws: &Workspace) -> Result<Self> {
        let model = BinnedModel::from_workspace(ws)?;
        Ok(Self { model, sigma_ref: ws.config.sigma_ref, config: MinimizerConfig::default() })
    }

    /// Underlying model.
    pub fn model(&self) -> &BinnedModel {
        &self.model
    }

    /// Register a channel with its observed data.
    pub fn add_channel(&mut self, name: &str, data: &Histogram) -> Result<()> {
        self.model.add_channel(name, data)
    }

    /// Register a process template; `is_signal` is OR'd with the signal-label match.
    pub fn add_process(
        &mut self,
        channel: &str,
        process: &str,
        nominal: &Histogram,
        is_signal: bool,
    ) -> Result<()> {
        self.model.add_process(channel, process, nominal, is_signal)
    }

    /// Change the signal label and re-flag every process.
    pub fn mark_signal_process(&mut self, process: &str) {
        self.model.mark_signal_process(process);
    }

    /// Register a normalization nuisance.
    pub fn add_norm_systematic(&mut self, name: &str, log_normal: bool) -> Result<()> {
        self.model.add_norm_systematic(name, log_normal)
    }

    /// Attach a fractional normalization effect to (channel, process).
    pub fn set_norm_effect(
        &mut self,
        name: &str,
        channel: &str,
        process: &str,
        frac: f64,
    ) -> Result<()> {
        self.model.set_norm_effect(name, channel, process, frac)
    }

    /// Register a shape nuisance.
    pub fn add_shape_systematic(&mut self, name: &str) -> Result<()> {
        self.model.add_shape_systematic(name)
    }

    /// Attach up/down templates to (channel, process).
    pub fn set_shape_effect(
        &mut self,
        name: &str,
        channel: &str,
        process: &str,
        up: &Histogram,
        down: &Histogram,
    ) -> Result<()> {
        self.model.set_shape_effect(name, channel, process, up, down)
    }

    /// Signal-strength range used by fits and the likelihood clamp.
    pub fn set_mu_bounds(&mut self, lo: f64, hi: f64) -> Result<()> {
        self.model.set_mu_bounds(lo, hi)
    }

    /// Per-bin expectation floor (non-positive values become 1e-12).
    pub fn set_yield_floor(&mut self, eps: f64) {
        self.model.set_yield_floor(eps);
    }

    /// Reference cross section that converts mu into a physical value.
    pub fn set_sigma_ref(&mut self, sigma_ref: f64) {
        self.sigma_ref = sigma_ref;
    }

    /// Current reference cross section.
    pub fn sigma_ref(&self) -> f64 {
        self.sigma_ref
    }

    /// Replace the minimizer settings.
    pub fn set_minimizer_config(&mut self, config: MinimizerConfig) {
        self.config = config;
    }

    /// Current minimizer settings.
    pub fn minimizer_config(&self) -> &MinimizerConfig {
        &self.config
    }

    /// `-2 ln L` at `params` in layout order.
    pub fn negative_log_likelihood(&self, params: &[f64]) -> Result<f64> {
        self.model.negative_log_likelihood(params)
    }

    /// Parameter names in layout order.
    pub fn parameter_names(&self) -> Vec<String> {
        self.model.layout().names().to_vec()
    }

    fn compile_checked(&self) -> Result<CompiledModel> {
        self.model.check_fittable()?;
        Ok(self.model.compile())
    }

    /// Maximum-likelihood fit followed by a Hesse pass.
    ///
    /// A non-converged minimization is reported through `status`, not as an error.
    pub fn fit(&self, backend: &str, algorithm: &str, verbose: bool) -> Result<FitResult> {
        let compiled = self.compile_checked()?;
        let level = log_level(verbose);
        log::log!(
            level,
            "fit: {} parameters, mu in [{}, {}], seed mu = {:.6}",
            compiled.n_params(),
            compiled.mu_bounds().0,
            compiled.mu_bounds().1,
            compiled.seed_mu()
        );

        let mut minimizer = minimize_model(&compiled, backend, algorithm, &self.config, verbose)?;
        let converged = minimizer.status().is_minimum_valid();
        let status = minimizer.hesse(&ModelObjective::new(&compiled))?;

        let result = FitResult::from_parameters(
            status.code(),
            converged,
            minimizer.min_value(),
            minimizer.variable_names(),
            minimizer.parameters(),
            minimizer.errors(),
            minimizer.covariance(),
            minimizer.n_evaluations(),
            minimizer.message(),
        );

        log::log!(
            level,
            "fit: mu = {:.6} +/- {:.6}, nll = {:.6}, status = {} ({status})",
            result.mu,
            result.mu_uncertainty,
            result.nll,
            result.status
        );
        for (name, v) in &result.nuisance_values {
            let e = result.nuisance_uncertainties.get(name).copied().unwrap_or(f64::NAN);
            log::log!(level, "  {name} = {v:.6} +/- {e:.6}");
        }
        Ok(result)
    }

    /// Profile scan of Δ(−2 ln L) over `n_points` equally spaced mu values in
    /// `[mu_min, mu_max]`.
    ///
    /// The global minimum is found eagerly; the grid points are minimized lazily as the
    /// returned scan is iterated.
    pub fn scan_delta_nll(
        &self,
        mu_min: f64,
        mu_max: f64,
        n_points: usize,
        backend: &str,
        algorithm: &str,
        verbose: bool,
    ) -> Result<ProfileScan> {
        if !(mu_min.is_finite() && mu_max.is_finite() && mu_min < mu_max) {
            return Err(Error::InvalidArgument(format!(
                "scan range must be finite with mu_min < mu_max, got [{mu_min}, {mu_max}]"
            )));
        }
        if n_points < 3 {
            return Err(Error::InvalidArgument(format!(
                "scan needs at least 3 points, got {n_points}"
            )));
        }
        let compiled = self.compile_checked()?;
        ProfileScan::new(
            compiled,
            mu_min,
            mu_max,
            n_points,
            backend,
            algorithm,
            self.config.clone(),
            verbose,
        )
    }

    /// Expected yields per channel at the fitted parameters.
    pub fn expected_yields(&self, fr: &FitResult) -> Result<Vec<(String, Vec<f64>)>> {
        let compiled = self.model.compile();
        let yields = compiled.expected_yields(&fr.parameters)?;
        Ok(compiled.channel_names().into_iter().map(String::from).zip(yields).collect())
    }

    /// `mu × sigma_ref`.
    pub fn cross_section(&self, fr: &FitResult) -> f64 {
        xsec::cross_section(fr, self.sigma_ref)
    }

    /// `mu_uncertainty × sigma_ref`.
    pub fn cross_section_uncertainty(&self, fr: &FitResult) -> f64 {
        xsec::cross_section_uncertainty(fr, self.sigma_ref)
    }

    /// Cross section with its symmetric uncertainty.
    pub fn measure(&self, fr: &FitResult) -> CrossSection {
        CrossSection::from_fit(fr, self.sigma_ref)
    }
}

impl Default for Fitter {
    fn default() -> Self {
        Self::new("signal")
    }
}
