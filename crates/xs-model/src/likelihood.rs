//! Binned Poisson likelihood with Gaussian-constrained nuisances.
//!
//! [`CompiledModel`] is an immutable snapshot of the template store and nuisance
//! registry, flattened for repeated evaluation: every (channel, process) carries the
//! parameter indices and pre-computed effects that touch it.
//!
//! The evaluator works in `-2 ln L` units:
//!
//! ```text
//! -2 ln L = -2 Σ_bins [n ln ν − ν] + Σ_nuisances θ²
//! ```
//!
//! The `ln n!` term is omitted; it is constant in the parameters and cancels in every
//! likelihood ratio, so absolute NLL values are offsets, not normalized likelihoods.

use crate::layout::{POI_INDEX, ParameterLayout};
use crate::nuisance::NuisanceRegistry;
use crate::templates::TemplateStore;
use xs_core::traits::{FixedParamModel, LogDensityModel, PoiModel};
use xs_core::{Error, Result};

#[derive(Debug, Clone, Copy)]
enum NormTerm {
    /// `exp(ln(1+frac)·θ)`
    LogNormal { param: usize, ln_kappa: f64 },
    /// `max(0, 1+frac·θ)`
    Linear { param: usize, frac: f64 },
}

impl NormTerm {
    fn param(&self) -> usize {
        match *self {
            NormTerm::LogNormal { param, .. } | NormTerm::Linear { param, .. } => param,
        }
    }

    fn factor(&self, params: &[f64]) -> f64 {
        match *self {
            NormTerm::LogNormal { param, ln_kappa } => (ln_kappa * params[param]).exp(),
            NormTerm::Linear { param, frac } => (1.0 + frac * params[param]).max(0.0),
        }
    }

    fn dfactor(&self, params: &[f64]) -> f64 {
        match *self {
            NormTerm::LogNormal { param, ln_kappa } => ln_kappa * (ln_kappa * params[param]).exp(),
            NormTerm::Linear { param, frac } => {
                if 1.0 + frac * params[param] > 0.0 {
                    frac
                } else {
                    0.0
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct ShapeTerm {
    param: usize,
    /// `0.5·(up − down)` per bin.
    half_delta: Vec<f64>,
}

#[derive(Debug, Clone)]
struct CompiledProcess {
    name: String,
    is_signal: bool,
    nominal: Vec<f64>,
    norms: Vec<NormTerm>,
    shapes: Vec<ShapeTerm>,
}

impl CompiledProcess {
    /// Morphed yield before clipping.
    fn raw_yield(&self, bin: usize, params: &[f64]) -> f64 {
        let mut y = self.nominal[bin];
        for s in &self.shapes {
            y += params[s.param] * s.half_delta[bin];
        }
        y
    }

    fn scale(&self, params: &[f64]) -> f64 {
        let mut scale = 1.0;
        for t in &self.norms {
            scale *= t.factor(params);
        }
        scale
    }

    fn contribution(&self, bin: usize, params: &[f64], mu: f64) -> f64 {
        let raw = self.raw_yield(bin, params);
        let y = if raw < 0.0 { 0.0 } else { raw };
        let scale = self.scale(params);
        if self.is_signal { mu * scale * y } else { scale * y }
    }
}

#[derive(Debug, Clone)]
struct CompiledChannel {
    name: String,
    observed: Vec<f64>,
    processes: Vec<CompiledProcess>,
}

/// Immutable likelihood snapshot, rebuilt before every fit or scan.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    layout: ParameterLayout,
    channels: Vec<CompiledChannel>,
    mu_bounds: (f64, f64),
    yield_floor: f64,
    bounds: Vec<(f64, f64)>,
    init: Vec<f64>,
}

impl CompiledModel {
    /// Flatten the current store and registry.
    pub fn compile(
        store: &TemplateStore,
        registry: &NuisanceRegistry,
        mu_bounds: (f64, f64),
        yield_floor: f64,
    ) -> Self {
        let layout = ParameterLayout::build(registry);

        let channels = store
            .channels()
            .iter()
            .map(|ch| {
                let processes = ch
                    .processes()
                    .map(|p| {
                        let norms = registry
                            .norm()
                            .iter()
                            .enumerate()
                            .filter_map(|(i, nn)| {
                                let frac = nn.effect(ch.name(), p.name())?;
                                let param = layout.norm_index(i);
                                Some(if nn.log_normal() {
                                    NormTerm::LogNormal { param, ln_kappa: (1.0 + frac).ln() }
                                } else {
                                    NormTerm::Linear { param, frac }
                                })
                            })
                            .collect();
                        let shapes = registry
                            .shape()
                            .iter()
                            .enumerate()
                            .filter_map(|(i, sn)| {
                                let v = sn.variation(ch.name(), p.name())?;
                                let half_delta = v
                                    .up
                                    .contents()
                                    .iter()
                                    .zip(v.down.contents())
                                    .map(|(u, d)| 0.5 * (u - d))
                                    .collect();
                                Some(ShapeTerm { param: layout.shape_index(i), half_delta })
                            })
                            .collect();
                        CompiledProcess {
                            name: p.name().to_string(),
                            is_signal: p.is_signal(),
                            nominal: p.nominal().contents().to_vec(),
                            norms,
                            shapes,
                        }
                    })
                    .collect();
                CompiledChannel {
                    name: ch.name().to_string(),
                    observed: ch.data().contents().to_vec(),
                    processes,
                }
            })
            .collect();

        let mut bounds = vec![(f64::NEG_INFINITY, f64::INFINITY); layout.len()];
        bounds[POI_INDEX] = mu_bounds;

        let mut model =
            Self { layout, channels, mu_bounds, yield_floor, bounds, init: Vec::new() };
        let mut init = vec![0.0; model.layout.len()];
        init[POI_INDEX] = model.seed_mu();
        model.init = init;
        model
    }

    /// Parameter layout this snapshot was compiled against.
    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    /// Number of parameters.
    pub fn n_params(&self) -> usize {
        self.layout.len()
    }

    /// `[mu_lo, mu_hi]`.
    pub fn mu_bounds(&self) -> (f64, f64) {
        self.mu_bounds
    }

    /// Floor applied to each bin's total expectation.
    pub fn yield_floor(&self) -> f64 {
        self.yield_floor
    }

    /// Channel names in evaluation order.
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name.as_str()).collect()
    }

    /// Closed-form starting value: `(Σdata − Σbackground) / Σsignal`, clamped to the bounds.
    ///
    /// Falls back to 1.0 when there is no signal yield or the ratio is not finite.
    pub fn seed_mu(&self) -> f64 {
        let (mut s, mut b, mut d) = (0.0, 0.0, 0.0);
        for ch in &self.channels {
            d += ch.observed.iter().sum::<f64>();
            for p in &ch.processes {
                let y: f64 = p.nominal.iter().sum();
                if p.is_signal {
                    s += y;
                } else {
                    b += y;
                }
            }
        }
        let mut mu = if s > 0.0 { (d - b) / s } else { 1.0 };
        if !mu.is_finite() {
            mu = 1.0;
        }
        mu.clamp(self.mu_bounds.0, self.mu_bounds.1)
    }

    fn validate_params_len(&self, got: usize) -> Result<()> {
        let expected = self.layout.len();
        if got != expected {
            return Err(Error::Validation(format!(
                "Parameter length mismatch: expected {expected}, got {got}"
            )));
        }
        Ok(())
    }

    /// `-2 ln L` at `params` (µ is clamped into its bounds before use).
    pub fn twice_nll(&self, params: &[f64]) -> Result<f64> {
        self.validate_params_len(params.len())?;
        let (lo, hi) = self.mu_bounds;
        let mu = params[POI_INDEX].clamp(lo, hi);

        let mut logl = 0.0;
        for &th in &params[1..] {
            logl += -0.5 * th * th;
        }

        for ch in &self.channels {
            for (bin, &nobs) in ch.observed.iter().enumerate() {
                let mut nu = 0.0;
                for p in &ch.processes {
                    nu += p.contribution(bin, params, mu);
                }
                let ex = if nu > self.yield_floor { nu } else { self.yield_floor };
                if nobs > 0.0 {
                    logl += nobs * ex.ln() - ex;
                } else {
                    logl += -ex;
                }
            }
        }
        Ok(-2.0 * logl)
    }

    /// Analytic gradient of [`Self::twice_nll`].
    ///
    /// Clamped quantities (µ outside its bounds, clipped yields, linear factors at zero,
    /// floored bin totals) contribute zero.
    pub fn grad_twice_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.validate_params_len(params.len())?;
        let (lo, hi) = self.mu_bounds;
        let mu_raw = params[POI_INDEX];
        let mu = mu_raw.clamp(lo, hi);
        let mu_active = mu_raw >= lo && mu_raw <= hi;

        let mut grad = vec![0.0; params.len()];
        for (g, &th) in grad.iter_mut().zip(params.iter()).skip(1) {
            *g = 2.0 * th;
        }

        for ch in &self.channels {
            for (bin, &nobs) in ch.observed.iter().enumerate() {
                let mut nu = 0.0;
                for p in &ch.processes {
                    nu += p.contribution(bin, params, mu);
                }
                if nu <= self.yield_floor {
                    continue;
                }
                // d/dν of -2(n ln ν − ν)
                let w = if nobs > 0.0 { -2.0 * (nobs / nu - 1.0) } else { 2.0 };

                for p in &ch.processes {
                    let raw = p.raw_yield(bin, params);
                    let y = if raw < 0.0 { 0.0 } else { raw };
                    let scale = p.scale(params);
                    let m = if p.is_signal { mu } else { 1.0 };

                    if p.is_signal && mu_active {
                        grad[POI_INDEX] += w * scale * y;
                    }
                    if y > 0.0 {
                        for (j, term) in p.norms.iter().enumerate() {
                            let others: f64 = p
                                .norms
                                .iter()
                                .enumerate()
                                .filter(|(k, _)| *k != j)
                                .map(|(_, t)| t.factor(params))
                                .product();
                            grad[term.param()] += w * m * y * others * term.dfactor(params);
                        }
                    }
                    if raw > 0.0 {
                        for s in &p.shapes {
                            grad[s.param] += w * m * scale * s.half_delta[bin];
                        }
                    }
                }
            }
        }
        Ok(grad)
    }

    /// Expected total per bin for every channel (floored like the likelihood sees it).
    pub fn expected_yields(&self, params: &[f64]) -> Result<Vec<Vec<f64>>> {
        self.validate_params_len(params.len())?;
        let mu = params[POI_INDEX].clamp(self.mu_bounds.0, self.mu_bounds.1);
        Ok(self
            .channels
            .iter()
            .map(|ch| {
                (0..ch.observed.len())
                    .map(|bin| {
                        let nu: f64 =
                            ch.processes.iter().map(|p| p.contribution(bin, params, mu)).sum();
                        nu.max(self.yield_floor)
                    })
                    .collect()
            })
            .collect())
    }

    /// One process's contribution per bin at `params` (µ applied if it is the signal).
    pub fn process_yields(&self, channel: &str, process: &str, params: &[f64]) -> Result<Vec<f64>> {
        self.validate_params_len(params.len())?;
        let mu = params[POI_INDEX].clamp(self.mu_bounds.0, self.mu_bounds.1);
        let ch = self
            .channels
            .iter()
            .find(|c| c.name == channel)
            .ok_or_else(|| Error::Validation(format!("unknown channel {channel}")))?;
        let p = ch
            .processes
            .iter()
            .find(|p| p.name == process)
            .ok_or_else(|| Error::Validation(format!("unknown process {channel},{process}")))?;
        Ok((0..p.nominal.len()).map(|bin| p.contribution(bin, params, mu)).collect())
    }
}

impl LogDensityModel for CompiledModel {
    fn dim(&self) -> usize {
        self.layout.len()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.layout.names().to_vec()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        self.bounds.clone()
    }

    fn parameter_init(&self) -> Vec<f64> {
        self.init.clone()
    }

    fn nll(&self, params: &[f64]) -> Result<f64> {
        Ok(0.5 * self.twice_nll(params)?)
    }

    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        let mut g = self.grad_twice_nll(params)?;
        for gi in &mut g {
            *gi *= 0.5;
        }
        Ok(g)
    }
}

impl PoiModel for CompiledModel {
    fn poi_index(&self) -> Option<usize> {
        Some(POI_INDEX)
    }
}

impl FixedParamModel for CompiledModel {
    fn with_fixed_param(&self, param_idx: usize, value: f64) -> Self {
        let mut m = self.clone();
        if param_idx < m.bounds.len() {
            m.bounds[param_idx] = (value, value);
            m.init[param_idx] = value;
        }
        m
    }
}
