//! Nuisance registry: normalization and shape systematics.

use crate::histogram::Histogram;
use crate::templates::TemplateStore;
use std::collections::HashMap;
use xs_core::{Error, Result};

/// (channel, process) key for per-template nuisance effects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelProcess {
    /// Channel name.
    pub channel: String,
    /// Process name.
    pub process: String,
}

impl ChannelProcess {
    /// Build a key.
    pub fn new(channel: &str, process: &str) -> Self {
        Self { channel: channel.to_string(), process: process.to_string() }
    }
}

/// Multiplicative normalization systematic.
#[derive(Debug, Clone)]
pub struct NormNuisance {
    name: String,
    log_normal: bool,
    effects: HashMap<ChannelProcess, f64>,
}

impl NormNuisance {
    /// Nuisance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `exp(ln(1+frac)·θ)` when true, `max(0, 1+frac·θ)` otherwise.
    pub fn log_normal(&self) -> bool {
        self.log_normal
    }

    /// Fractional effect on (channel, process), if any.
    pub fn effect(&self, channel: &str, process: &str) -> Option<f64> {
        self.effects.get(&ChannelProcess::new(channel, process)).copied()
    }

    /// Number of templates this nuisance touches.
    pub fn n_effects(&self) -> usize {
        self.effects.len()
    }
}

/// Up/down template pair for one (channel, process).
#[derive(Debug, Clone)]
pub struct ShapeVariation {
    /// Template at θ = +1.
    pub up: Histogram,
    /// Template at θ = -1.
    pub down: Histogram,
}

/// Per-bin shape systematic with linear template morphing.
#[derive(Debug, Clone)]
pub struct ShapeNuisance {
    name: String,
    variations: HashMap<ChannelProcess, ShapeVariation>,
}

impl ShapeNuisance {
    /// Nuisance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Up/down variants for (channel, process), if any.
    pub fn variation(&self, channel: &str, process: &str) -> Option<&ShapeVariation> {
        self.variations.get(&ChannelProcess::new(channel, process))
    }

    /// Number of templates this nuisance touches.
    pub fn n_effects(&self) -> usize {
        self.variations.len()
    }
}

/// Norm and shape nuisances, each kept in registration order.
#[derive(Debug, Clone, Default)]
pub struct NuisanceRegistry {
    norm: Vec<NormNuisance>,
    shape: Vec<ShapeNuisance>,
}

impl NuisanceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a normalization nuisance.
    pub fn add_norm_systematic(&mut self, name: &str, log_normal: bool) -> Result<()> {
        if self.norm.iter().any(|n| n.name == name) {
            return Err(Error::Validation(format!("norm nuisance already exists: {name}")));
        }
        self.norm.push(NormNuisance { name: name.to_string(), log_normal, effects: HashMap::new() });
        Ok(())
    }

    /// Attach a fractional effect to a registered (channel, process).
    pub fn set_norm_effect(
        &mut self,
        store: &TemplateStore,
        name: &str,
        channel: &str,
        process: &str,
        frac: f64,
    ) -> Result<()> {
        let nn = self
            .norm
            .iter_mut()
            .find(|n| n.name == name)
            .ok_or_else(|| Error::Validation(format!("unknown norm nuisance: {name}")))?;
        if !store.has_process(channel, process) {
            return Err(Error::Validation(format!(
                "set_norm_effect: unknown (channel, process): {channel},{process}"
            )));
        }
        if !(frac.is_finite() && frac >= 0.0) {
            return Err(Error::Validation(format!(
                "set_norm_effect({name}): frac must be finite and >= 0, got {frac}"
            )));
        }
        nn.effects.insert(ChannelProcess::new(channel, process), frac);
        Ok(())
    }

    /// Register a shape nuisance.
    pub fn add_shape_systematic(&mut self, name: &str) -> Result<()> {
        if self.shape.iter().any(|s| s.name == name) {
            return Err(Error::Validation(format!("shape nuisance already exists: {name}")));
        }
        self.shape.push(ShapeNuisance { name: name.to_string(), variations: HashMap::new() });
        Ok(())
    }

    /// Attach up/down templates to a registered (channel, process).
    pub fn set_shape_effect(
        &mut self,
        store: &TemplateStore,
        name: &str,
        channel: &str,
        process: &str,
        up: &Histogram,
        down: &Histogram,
    ) -> Result<()> {
        let sn = self
            .shape
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::Validation(format!("unknown shape nuisance: {name}")))?;
        let nominal = store.process(channel, process).map(|p| p.nominal()).ok_or_else(|| {
            Error::Validation(format!(
                "set_shape_effect: unknown (channel, process): {channel},{process}"
            ))
        })?;
        if up.n_bins() == 0 || down.n_bins() == 0 {
            return Err(Error::Validation(format!(
                "set_shape_effect({name}): up/down histograms must be non-empty"
            )));
        }
        nominal.ensure_same_binning(up, &format!("set_shape_effect(up:{channel},{process},{name})"))?;
        nominal
            .ensure_same_binning(down, &format!("set_shape_effect(down:{channel},{process},{name})"))?;
        sn.variations.insert(
            ChannelProcess::new(channel, process),
            ShapeVariation { up: up.clone(), down: down.clone() },
        );
        Ok(())
    }

    /// Normalization nuisances in registration order.
    pub fn norm(&self) -> &[NormNuisance] {
        &self.norm
    }

    /// Shape nuisances in registration order.
    pub fn shape(&self) -> &[ShapeNuisance] {
        &self.shape
    }

    /// Total number of nuisance parameters.
    pub fn len(&self) -> usize {
        self.norm.len() + self.shape.len()
    }

    /// True when no nuisance is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
