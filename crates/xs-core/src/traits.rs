//! Core traits for xsfit
//!
//! Inference logic (xs-inference) depends on these traits, not on the concrete
//! binned template model, so fit drivers and profile scans can be exercised
//! against toy models in tests.

use crate::Result;

/// Model interface consumed by the fit driver and profile scanner.
///
/// `nll` is the natural-units negative log-likelihood `-ln L`; models that
/// internally work in `-2 ln L` halve before returning.
pub trait LogDensityModel: Send + Sync {
    /// Number of parameters.
    fn dim(&self) -> usize;

    /// Parameter names (stable order).
    fn parameter_names(&self) -> Vec<String>;

    /// Parameter bounds (min, max) (stable order). Unbounded parameters use infinities,
    /// fixed parameters use `lo == hi`.
    fn parameter_bounds(&self) -> Vec<(f64, f64)>;

    /// Suggested initial values (stable order).
    fn parameter_init(&self) -> Vec<f64>;

    /// Negative log-likelihood.
    fn nll(&self, params: &[f64]) -> Result<f64>;

    /// Gradient of NLL.
    ///
    /// Default: central differences with a step of `1e-8 * max(|x_i|, 1)`.
    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        let n = params.len();
        let mut grad = vec![0.0; n];
        for i in 0..n {
            let eps = 1e-8 * params[i].abs().max(1.0);

            let mut params_plus = params.to_vec();
            params_plus[i] += eps;
            let f_plus = self.nll(&params_plus)?;

            let mut params_minus = params.to_vec();
            params_minus[i] -= eps;
            let f_minus = self.nll(&params_minus)?;

            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }
        Ok(grad)
    }
}

/// Optional extension: parameter-of-interest (POI) index.
pub trait PoiModel: Send + Sync {
    /// Index of POI in the model's parameter order.
    fn poi_index(&self) -> Option<usize>;
}

/// Optional extension: create a copy of the model with one parameter fixed.
///
/// Used by profile scans: the fixed parameter gets degenerate bounds `(value, value)`.
pub trait FixedParamModel: Sized + Send + Sync {
    /// Return a copy with parameter `param_idx` fixed at `value`.
    fn with_fixed_param(&self, param_idx: usize, value: f64) -> Self;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Parabola {
        bounds: Vec<(f64, f64)>,
    }

    impl LogDensityModel for Parabola {
        fn dim(&self) -> usize {
            2
        }

        fn parameter_names(&self) -> Vec<String> {
            vec!["a".to_string(), "b".to_string()]
        }

        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            self.bounds.clone()
        }

        fn parameter_init(&self) -> Vec<f64> {
            vec![0.5, 0.0]
        }

        fn nll(&self, params: &[f64]) -> Result<f64> {
            Ok((params[0] - 1.0).powi(2) + 3.0 * params[1].powi(2))
        }
    }

    impl FixedParamModel for Parabola {
        fn with_fixed_param(&self, param_idx: usize, value: f64) -> Self {
            let mut bounds = self.bounds.clone();
            bounds[param_idx] = (value, value);
            Self { bounds }
        }
    }

    #[test]
    fn test_default_gradient_is_central_difference() {
        let m = Parabola { bounds: vec![(0.0, 2.0), (f64::NEG_INFINITY, f64::INFINITY)] };
        let g = m.grad_nll(&[0.25, 0.5]).unwrap();
        assert_relative_eq!(g[0], -1.5, epsilon = 1e-6);
        assert_relative_eq!(g[1], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_fixed_param_collapses_bounds() {
        let m = Parabola { bounds: vec![(0.0, 2.0), (f64::NEG_INFINITY, f64::INFINITY)] };
        let fixed = m.with_fixed_param(0, 1.5);
        assert_eq!(fixed.parameter_bounds()[0], (1.5, 1.5));
        assert_eq!(fixed.dim(), 2);
    }
}
