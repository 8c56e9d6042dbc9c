//! Covariance estimation at a minimum.
//!
//! The Hessian is built from forward differences of the objective's gradient over the
//! free parameters only, then inverted with a damped Cholesky solve. When inversion
//! fails entirely the diagonal of the Hessian gives fallback errors.

use crate::optimizer::ObjectiveFunction;
use nalgebra::DMatrix;
use xs_core::Result;

/// Quality of the covariance produced by [`hesse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HesseOutcome {
    /// Plain Cholesky inversion succeeded.
    Accurate,
    /// Inversion needed diagonal damping or an LU fallback.
    Forced,
    /// No usable inverse; errors come from the Hessian diagonal.
    Failed,
}

/// Covariance and errors over the full parameter vector.
#[derive(Debug, Clone)]
pub struct HesseResult {
    /// Row-major `n × n` covariance (fixed parameters have zero rows/columns).
    pub covariance: Option<Vec<f64>>,
    /// Symmetric error per parameter (0 for fixed parameters).
    pub errors: Vec<f64>,
    /// How the covariance was obtained.
    pub outcome: HesseOutcome,
    /// Gradient evaluations spent.
    pub n_gradient_evals: usize,
}

/// Hessian of `objective` at `x` restricted to the `free` indices.
///
/// H_{ij} ≈ (g_i(x + ε·e_j) − g_i(x)) / ε, stepping backwards when the forward step
/// would leave the box.
pub fn numerical_hessian(
    objective: &dyn ObjectiveFunction,
    x: &[f64],
    bounds: &[(f64, f64)],
    free: &[usize],
) -> Result<DMatrix<f64>> {
    let k = free.len();
    let g0 = objective.gradient(x)?;
    let mut h = DMatrix::zeros(k, k);

    for (col, &j) in free.iter().enumerate() {
        let (lo, hi) = bounds[j];
        let mut eps = 1e-4 * x[j].abs().max(1.0);
        if hi - lo < 2.0 * eps {
            eps = 0.25 * (hi - lo);
        }
        let forward = x[j] + eps <= hi;
        let mut xp = x.to_vec();
        xp[j] = if forward { x[j] + eps } else { x[j] - eps };
        let gp = objective.gradient(&xp)?;

        for (row, &i) in free.iter().enumerate() {
            h[(row, col)] =
                if forward { (gp[i] - g0[i]) / eps } else { (g0[i] - gp[i]) / eps };
        }
    }

    let ht = h.transpose();
    Ok((&h + &ht) * 0.5)
}

/// Invert a Hessian, damping the diagonal until Cholesky succeeds.
///
/// Returns the inverse and whether it had to be forced.
pub fn invert_hessian(hessian: &DMatrix<f64>) -> Option<(DMatrix<f64>, bool)> {
    let n = hessian.nrows();
    let identity = DMatrix::identity(n, n);
    let diag_scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

    let mut h_damped = hessian.clone();
    let mut damping = 0.0_f64;
    let max_attempts = 10;

    for attempt in 0..max_attempts {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(h_damped.clone()) {
            return Some((chol.solve(&identity), damping > 0.0));
        }
        if attempt + 1 == max_attempts {
            break;
        }
        let next = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
        let add = next - damping;
        for i in 0..n {
            h_damped[(i, i)] += add;
        }
        damping = next;
    }

    let cov = h_damped.lu().try_inverse()?;
    for i in 0..n {
        let v = cov[(i, i)];
        if !(v.is_finite() && v > 0.0) {
            return None;
        }
    }
    Some((cov, true))
}

/// `sqrt(2·up / |H_ii|)` per free parameter.
pub fn diagonal_uncertainties(hessian: &DMatrix<f64>, error_def: f64) -> Vec<f64> {
    (0..hessian.nrows())
        .map(|i| {
            let denom = hessian[(i, i)].abs().max(1e-12);
            (2.0 * error_def / denom).sqrt()
        })
        .collect()
}

/// Full Hesse pass: covariance = `2·error_def·H⁻¹` over the free parameters,
/// scattered back into the full parameter space.
pub fn hesse(
    objective: &dyn ObjectiveFunction,
    x: &[f64],
    bounds: &[(f64, f64)],
    free: &[usize],
    error_def: f64,
) -> Result<HesseResult> {
    let n = x.len();
    if free.is_empty() {
        return Ok(HesseResult {
            covariance: Some(vec![0.0; n * n]),
            errors: vec![0.0; n],
            outcome: HesseOutcome::Accurate,
            n_gradient_evals: 0,
        });
    }

    let h = numerical_hessian(objective, x, bounds, free)?;
    let n_gradient_evals = 1 + free.len();
    let scale = 2.0 * error_def;
    let mut errors = vec![0.0; n];

    match invert_hessian(&h) {
        Some((inv, forced)) => {
            let mut cov = vec![0.0; n * n];
            for (a, &i) in free.iter().enumerate() {
                for (b, &j) in free.iter().enumerate() {
                    cov[i * n + j] = scale * inv[(a, b)];
                }
                errors[i] = cov[i * n + i].max(0.0).sqrt();
            }
            if forced {
                log::warn!("Hessian not positive definite; covariance was forced");
            }
            Ok(HesseResult {
                covariance: Some(cov),
                errors,
                outcome: if forced { HesseOutcome::Forced } else { HesseOutcome::Accurate },
                n_gradient_evals,
            })
        }
        None => {
            log::warn!("Hessian inversion failed; using diagonal uncertainties");
            for (&i, e) in free.iter().zip(diagonal_uncertainties(&h, error_def)) {
                errors[i] = e;
            }
            Ok(HesseResult { covariance: None, errors, outcome: HesseOutcome::Failed, n_gradient_evals })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// f = 0.5·xᵀAx with A = [[4, 1], [1, 3]].
    struct Quadratic2;

    impl ObjectiveFunction for Quadratic2 {
        fn eval(&self, p: &[f64]) -> Result<f64> {
            Ok(0.5 * (4.0 * p[0] * p[0] + 2.0 * p[0] * p[1] + 3.0 * p[1] * p[1]))
        }

        fn gradient(&self, p: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![4.0 * p[0] + p[1], p[0] + 3.0 * p[1]])
        }
    }

    /// Saddle: f = x² − y².
    struct Saddle;

    impl ObjectiveFunction for Saddle {
        fn eval(&self, p: &[f64]) -> Result<f64> {
            Ok(p[0] * p[0] - p[1] * p[1])
        }

        fn gradient(&self, p: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![2.0 * p[0], -2.0 * p[1]])
        }
    }

    const FREE: [(f64, f64); 2] = [(f64::NEG_INFINITY, f64::INFINITY); 2];

    #[test]
    fn test_hessian_of_quadratic() {
        let h = numerical_hessian(&Quadratic2, &[0.3, -0.2], &FREE, &[0, 1]).unwrap();
        assert_relative_eq!(h[(0, 0)], 4.0, epsilon = 1e-8);
        assert_relative_eq!(h[(0, 1)], 1.0, epsilon = 1e-8);
        assert_relative_eq!(h[(1, 1)], 3.0, epsilon = 1e-8);
    }

    #[test]
    fn test_backward_step_at_upper_bound() {
        let bounds = [(0.0, 0.3), (f64::NEG_INFINITY, f64::INFINITY)];
        let h = numerical_hessian(&Quadratic2, &[0.3, 0.0], &bounds, &[0, 1]).unwrap();
        assert_relative_eq!(h[(0, 0)], 4.0, epsilon = 1e-8);
    }

    #[test]
    fn test_covariance_is_inverse_hessian_for_half_error_def() {
        let r = hesse(&Quadratic2, &[0.0, 0.0], &FREE, &[0, 1], 0.5).unwrap();
        assert_eq!(r.outcome, HesseOutcome::Accurate);
        let cov = r.covariance.unwrap();
        // A⁻¹ = [[3, -1], [-1, 4]] / 11
        assert_relative_eq!(cov[0], 3.0 / 11.0, epsilon = 1e-8);
        assert_relative_eq!(cov[1], -1.0 / 11.0, epsilon = 1e-8);
        assert_relative_eq!(cov[3], 4.0 / 11.0, epsilon = 1e-8);
        assert_relative_eq!(r.errors[0], (3.0f64 / 11.0).sqrt(), epsilon = 1e-8);
    }

    #[test]
    fn test_fixed_parameter_has_zero_row() {
        let r = hesse(&Quadratic2, &[0.0, 0.0], &FREE, &[1], 0.5).unwrap();
        let cov = r.covariance.unwrap();
        assert_eq!(cov[0], 0.0);
        assert_eq!(r.errors[0], 0.0);
        assert_relative_eq!(cov[3], 1.0 / 3.0, epsilon = 1e-8);
    }

    #[test]
    fn test_indefinite_hessian_is_forced_or_fails() {
        let r = hesse(&Saddle, &[0.0, 0.0], &FREE, &[0, 1], 0.5).unwrap();
        assert_ne!(r.outcome, HesseOutcome::Accurate);
        for e in &r.errors {
            assert!(e.is_finite() && *e > 0.0);
        }
    }
}
