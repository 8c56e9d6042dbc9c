//! JSON workspace schema.
//!
//! A workspace bundles everything one measurement needs: channels with observed
//! counts, process templates, systematics and the likelihood settings.
//!
//! ```json
//! {
//!   "signal": "signal",
//!   "config": { "mu_bounds": [0.0, 10.0], "yield_floor": 1e-9, "sigma_ref": 1.0 },
//!   "channels": [
//!     { "name": "numu", "data": [10, 20], "processes": [
//!         { "name": "background", "nominal": [8, 15] },
//!         { "name": "signal", "nominal": [2, 5], "is_signal": true } ] }
//!   ],
//!   "norm_systematics": [
//!     { "name": "bkg_norm", "effects": [ { "channel": "numu", "process": "background", "frac": 0.1 } ] }
//!   ],
//!   "shape_systematics": []
//! }
//! ```

use crate::histogram::Histogram;
use crate::model::{BinnedModel, DEFAULT_MU_BOUNDS, DEFAULT_YIELD_FLOOR};
use serde::{Deserialize, Serialize};
use xs_core::Result;

fn default_signal() -> String {
    "signal".to_string()
}

fn default_true() -> bool {
    true
}

fn default_mu_bounds() -> (f64, f64) {
    DEFAULT_MU_BOUNDS
}

fn default_yield_floor() -> f64 {
    DEFAULT_YIELD_FLOOR
}

fn default_sigma_ref() -> f64 {
    1.0
}

/// Measurement workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    /// Signal process label.
    #[serde(default = "default_signal")]
    pub signal: String,
    /// Likelihood and conversion settings.
    #[serde(default)]
    pub config: MeasurementConfig,
    /// Analysis regions.
    pub channels: Vec<ChannelSpec>,
    /// Normalization systematics.
    #[serde(default)]
    pub norm_systematics: Vec<NormSystematicSpec>,
    /// Shape systematics.
    #[serde(default)]
    pub shape_systematics: Vec<ShapeSystematicSpec>,
}

/// `config` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementConfig {
    /// `[mu_lo, mu_hi]`.
    #[serde(default = "default_mu_bounds")]
    pub mu_bounds: (f64, f64),
    /// Per-bin expectation floor.
    #[serde(default = "default_yield_floor")]
    pub yield_floor: f64,
    /// Reference cross section used to convert mu.
    #[serde(default = "default_sigma_ref")]
    pub sigma_ref: f64,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            mu_bounds: DEFAULT_MU_BOUNDS,
            yield_floor: DEFAULT_YIELD_FLOOR,
            sigma_ref: default_sigma_ref(),
        }
    }
}

/// Channel with observed counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Channel name.
    pub name: String,
    /// Observed counts per bin.
    pub data: Vec<f64>,
    /// Axis range; unit-width bins from 0 when absent.
    #[serde(default)]
    pub range: Option<(f64, f64)>,
    /// Process templates.
    pub processes: Vec<ProcessSpec>,
}

/// Process template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Process name.
    pub name: String,
    /// Nominal yield per bin.
    pub nominal: Vec<f64>,
    /// Scaled by mu (also implied by matching the signal label).
    #[serde(default)]
    pub is_signal: bool,
    /// Axis range; defaults to the channel's.
    #[serde(default)]
    pub range: Option<(f64, f64)>,
}

/// Normalization systematic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormSystematicSpec {
    /// Nuisance name.
    pub name: String,
    /// Log-normal (default) or linear response.
    #[serde(default = "default_true")]
    pub log_normal: bool,
    /// Per-template fractional effects.
    #[serde(default)]
    pub effects: Vec<NormEffectSpec>,
}

/// One fractional normalization effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormEffectSpec {
    /// Channel name.
    pub channel: String,
    /// Process name.
    pub process: String,
    /// Fractional effect at θ = 1.
    pub frac: f64,
}

/// Shape systematic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeSystematicSpec {
    /// Nuisance name.
    pub name: String,
    /// Per-template up/down variants.
    #[serde(default)]
    pub effects: Vec<ShapeEffectSpec>,
}

/// Up/down variants for one template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeEffectSpec {
    /// Channel name.
    pub channel: String,
    /// Process name.
    pub process: String,
    /// Template at θ = +1.
    pub up: Vec<f64>,
    /// Template at θ = -1.
    pub down: Vec<f64>,
}

impl Workspace {
    /// Parse a workspace from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

fn histogram(contents: &[f64], range: Option<(f64, f64)>) -> Result<Histogram> {
    match range {
        Some((lo, hi)) => Histogram::new(lo, hi, contents.to_vec()),
        None => Histogram::from_counts(contents.to_vec()),
    }
}

impl BinnedModel {
    /// Build a model by replaying every workspace entry through the validated
    /// registration operations.
    pub fn from_workspace(ws: &Workspace) -> Result<Self> {
        let mut model = BinnedModel::new(ws.signal.clone());
        model.set_mu_bounds(ws.config.mu_bounds.0, ws.config.mu_bounds.1)?;
        model.set_yield_floor(ws.config.yield_floor);

        for ch in &ws.channels {
            model.add_channel(&ch.name, &histogram(&ch.data, ch.range)?)?;
            for p in &ch.processes {
                let nominal = histogram(&p.nominal, p.range.or(ch.range))?;
                model.add_process(&ch.name, &p.name, &nominal, p.is_signal)?;
            }
        }

        for ns in &ws.norm_systematics {
            model.add_norm_systematic(&ns.name, ns.log_normal)?;
            for e in &ns.effects {
                model.set_norm_effect(&ns.name, &e.channel, &e.process, e.frac)?;
            }
        }

        for ss in &ws.shape_systematics {
            model.add_shape_systematic(&ss.name)?;
            for e in &ss.effects {
                // Variants share the nominal's axis.
                let range = model
                    .store()
                    .process(&e.channel, &e.process)
                    .map(|p| p.nominal().binning())
                    .map(|b| (b.lo, b.hi));
                let up = histogram(&e.up, range)?;
                let down = histogram(&e.down, range)?;
                model.set_shape_effect(&ss.name, &e.channel, &e.process, &up, &down)?;
            }
        }

        log::debug!(
            "workspace loaded: {} channels, {} nuisances",
            model.store().channels().len(),
            model.registry().len()
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const WS: &str = r#"{
        "config": { "mu_bounds": [0.0, 5.0] },
        "channels": [
            { "name": "numu", "data": [10, 20], "processes": [
                { "name": "background", "nominal": [8, 15] },
                { "name": "signal", "nominal": [2, 5] } ] }
        ],
        "norm_systematics": [
            { "name": "bkg_norm", "effects": [ { "channel": "numu", "process": "background", "frac": 0.1 } ] }
        ],
        "shape_systematics": [
            { "name": "xsec_shape", "effects": [
                { "channel": "numu", "process": "signal", "up": [3, 6], "down": [1, 4] } ] }
        ]
    }"#;

    #[test]
    fn test_parse_and_build() {
        let ws = Workspace::from_json(WS).unwrap();
        assert_eq!(ws.signal, "signal");
        assert_relative_eq!(ws.config.sigma_ref, 1.0);
        assert!(ws.norm_systematics[0].log_normal);

        let model = BinnedModel::from_workspace(&ws).unwrap();
        assert_eq!(model.mu_bounds(), (0.0, 5.0));
        assert_eq!(model.yield_floor(), DEFAULT_YIELD_FLOOR);
        assert!(model.store().process("numu", "signal").unwrap().is_signal());
        assert_eq!(
            model.layout().names(),
            ["mu", "theta_norm_bkg_norm", "theta_shape_xsec_shape"]
        );
        assert!(model.check_fittable().is_ok());
    }

    #[test]
    fn test_bad_workspace_is_rejected() {
        assert!(Workspace::from_json("{").is_err());

        let mut ws = Workspace::from_json(WS).unwrap();
        ws.norm_systematics[0].effects[0].process = "dirt".to_string();
        assert!(BinnedModel::from_workspace(&ws).is_err());

        let mut ws = Workspace::from_json(WS).unwrap();
        ws.channels[0].processes[0].nominal.push(1.0);
        assert!(BinnedModel::from_workspace(&ws).is_err());

        let mut ws = Workspace::from_json(WS).unwrap();
        ws.config.mu_bounds = (3.0, 1.0);
        assert!(BinnedModel::from_workspace(&ws).is_err());
    }

    #[test]
    fn test_explicit_ranges_must_agree() {
        let mut ws = Workspace::from_json(WS).unwrap();
        ws.channels[0].range = Some((0.0, 4.0));
        ws.channels[0].processes[1].range = Some((0.0, 2.0));
        assert!(BinnedModel::from_workspace(&ws).is_err());

        ws.channels[0].processes[1].range = None;
        assert!(BinnedModel::from_workspace(&ws).is_ok());
    }
}
