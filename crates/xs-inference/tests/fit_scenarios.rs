//! End-to-end fits on small hand-checkable configurations.

use approx::assert_relative_eq;
use proptest::prelude::*;
use xs_core::Error;
use xs_inference::{Fitter, MinimizerConfig};
use xs_model::Histogram;
use xs_model::workspace::Workspace;

fn h(v: &[f64]) -> Histogram {
    Histogram::new(0.0, v.len() as f64, v.to_vec()).unwrap()
}

fn scaled(v: &[f64], k: f64) -> Vec<f64> {
    v.iter().map(|x| x * k).collect()
}

const DATA: [f64; 2] = [10.0, 20.0];
const BKG: [f64; 2] = [8.0, 15.0];
const SIG: [f64; 2] = [2.0, 5.0];

fn two_bin_with_signal(sig: &[f64]) -> Fitter {
    let mut f = Fitter::default();
    f.add_channel("numu", &h(&DATA)).unwrap();
    f.add_process("numu", "background", &h(&BKG), false).unwrap();
    f.add_process("numu", "signal", &h(sig), true).unwrap();
    f
}

fn two_bin() -> Fitter {
    two_bin_with_signal(&SIG)
}

/// -2 ln L for the two-bin channel at the given total expectations (no ln n!).
fn twice_nll(nu: [f64; 2]) -> f64 {
    -2.0 * DATA.iter().zip(nu).map(|(n, nu)| n * nu.ln() - nu).sum::<f64>()
}

#[test]
fn two_bin_fit_recovers_nominal_signal() {
    let f = two_bin();
    let fr = f.fit("argmin", "lbfgs", false).unwrap();
    assert_eq!(fr.status, 0, "{}", fr.message);
    assert!(fr.converged);
    assert!(fr.nll.is_finite());
    assert_relative_eq!(fr.mu, 1.0, epsilon = 1e-4);
    assert_relative_eq!(fr.nll, 0.5 * twice_nll([10.0, 20.0]), epsilon = 1e-8);
    assert_eq!(fr.parameter_names, ["mu"]);
}

#[test]
fn seed_is_close_to_fit_without_nuisances() {
    let f = two_bin();
    let seed = f.model().compile().seed_mu();
    let fr = f.fit("argmin", "lbfgs", false).unwrap();
    assert_relative_eq!(seed, fr.mu, epsilon = 1e-3);
}

#[test]
fn lognormal_background_norm_does_not_worsen_fit() {
    let base = two_bin().fit("argmin", "lbfgs", false).unwrap();

    let mut f = two_bin();
    f.add_norm_systematic("bkg_norm", true).unwrap();
    f.set_norm_effect("bkg_norm", "numu", "background", 0.2).unwrap();
    let fr = f.fit("argmin", "lbfgs", false).unwrap();

    assert!(fr.converged, "{}", fr.message);
    assert!(fr.nll <= base.nll + 1e-6);
    let theta = fr.nuisance_values["theta_norm_bkg_norm"];
    let sigma = fr.nuisance_uncertainties["theta_norm_bkg_norm"];
    assert!(sigma > 0.0 && sigma <= 1.0 + 1e-6);
    assert!(theta.abs() < 3.0 * sigma);
    assert!(fr.covariance.is_some());
    assert!(fr.correlation(0, 1).unwrap().abs() <= 1.0 + 1e-9);
}

#[test]
fn shape_morphing_through_negative_log_likelihood() {
    let mut f = two_bin();
    f.add_shape_systematic("xsec_shape").unwrap();
    f.set_shape_effect("xsec_shape", "numu", "signal", &h(&[3.0, 6.0]), &h(&[1.0, 4.0])).unwrap();
    assert_eq!(f.parameter_names(), ["mu", "theta_shape_xsec_shape"]);

    let up = f.negative_log_likelihood(&[1.0, 1.0]).unwrap();
    assert_relative_eq!(up, twice_nll([8.0 + 3.0, 15.0 + 6.0]) + 1.0, epsilon = 1e-10);

    let down = f.negative_log_likelihood(&[1.0, -1.0]).unwrap();
    assert_relative_eq!(down, twice_nll([8.0 + 1.0, 15.0 + 4.0]) + 1.0, epsilon = 1e-10);

    let nominal = f.negative_log_likelihood(&[1.0, 0.0]).unwrap();
    assert_relative_eq!(nominal, twice_nll([10.0, 20.0]), epsilon = 1e-10);
}

#[test]
fn signal_scaling_moves_mu_inversely() {
    let mu1 = two_bin().fit("argmin", "lbfgs", false).unwrap().mu;
    let mut prev = mu1;
    for k in [2.0, 4.0, 8.0] {
        let mu_k = two_bin_with_signal(&scaled(&SIG, k)).fit("argmin", "lbfgs", false).unwrap().mu;
        assert_relative_eq!(mu_k, mu1 / k, epsilon = 1e-4);
        assert!(mu_k < prev);
        prev = mu_k;
    }
}

#[test]
fn scan_minimum_sits_at_grid_point_nearest_mu_hat() {
    let mut f = two_bin();
    f.add_norm_systematic("bkg_norm", true).unwrap();
    f.set_norm_effect("bkg_norm", "numu", "background", 0.1).unwrap();
    let mu_hat = f.fit("argmin", "lbfgs", false).unwrap().mu;

    let scan = f.scan_delta_nll(0.0, 3.0, 13, "argmin", "lbfgs", false).unwrap();
    let points = scan.collect_points().unwrap();
    assert_eq!(points.len(), 13);
    assert_eq!(points[0].mu, 0.0);
    assert_eq!(points[12].mu, 3.0);
    assert!(points.iter().all(|p| p.delta_twice_nll >= 0.0));

    let argmin = points
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.delta_twice_nll.total_cmp(&b.1.delta_twice_nll))
        .map(|(i, _)| i)
        .unwrap();
    let nearest = points
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1.mu - mu_hat).abs().total_cmp(&(b.1.mu - mu_hat).abs()))
        .map(|(i, _)| i)
        .unwrap();
    assert_eq!(argmin, nearest);
    assert_relative_eq!(scan.mu_hat(), mu_hat, epsilon = 1e-3);
}

#[test]
fn scan_sees_registrations_made_after_earlier_fits() {
    let mut f = two_bin();
    let before = f.scan_delta_nll(0.0, 2.0, 3, "argmin", "lbfgs", false).unwrap();
    assert_eq!(before.collect_points().unwrap()[0].parameters.len(), 1);

    f.add_norm_systematic("bkg_norm", true).unwrap();
    let after = f.scan_delta_nll(0.0, 2.0, 3, "argmin", "lbfgs", false).unwrap();
    assert_eq!(after.collect_points().unwrap()[0].parameters.len(), 2);
}

#[test]
fn unknown_backend_fails_and_leaves_fitter_usable() {
    let f = two_bin();
    assert!(matches!(f.fit("NoSuchBackend", "Migrad", false), Err(Error::Backend(_))));
    assert!(f.fit("argmin", "lbfgs", false).is_ok());
}

#[test]
fn nelder_mead_agrees_with_lbfgs() {
    let mut f = two_bin();
    f.add_norm_systematic("bkg_norm", true).unwrap();
    f.set_norm_effect("bkg_norm", "numu", "background", 0.2).unwrap();
    let a = f.fit("argmin", "lbfgs", false).unwrap();
    let b = f.fit("argmin", "nelder-mead", false).unwrap();
    assert!(b.converged, "{}", b.message);
    assert_relative_eq!(a.mu, b.mu, epsilon = 1e-3);
    assert_relative_eq!(a.nll, b.nll, epsilon = 1e-6);
}

/// Seed (80 - 75) / 10 = 0.5, while d/dmu of -ln L vanishes at mu = 8.
fn seed_far_from_minimum() -> Fitter {
    let mut f = Fitter::default();
    f.add_channel("numu", &h(&[0.0, 80.0])).unwrap();
    f.add_process("numu", "background", &h(&[75.0, 0.0]), false).unwrap();
    f.add_process("numu", "signal", &h(&[5.0, 5.0]), true).unwrap();
    f
}

#[test]
fn mu_only_fit_moves_away_from_seed() {
    let f = seed_far_from_minimum();
    assert_relative_eq!(f.model().compile().seed_mu(), 0.5, epsilon = 1e-12);

    let fr = f.fit("argmin", "lbfgs", false).unwrap();
    assert_eq!(fr.status, 0, "{}", fr.message);
    assert_relative_eq!(fr.mu, 8.0, epsilon = 1e-4);
    // d2(-ln L)/dmu2 = 80 / mu^2 = 1.25 at the minimum.
    assert_relative_eq!(fr.mu_uncertainty, 0.8f64.sqrt(), epsilon = 1e-3);
    let at_eight = f.negative_log_likelihood(&[8.0]).unwrap();
    assert_relative_eq!(2.0 * fr.nll, at_eight, epsilon = 1e-8);

    let nm = f.fit("argmin", "nelder-mead", false).unwrap();
    assert_relative_eq!(nm.mu, fr.mu, epsilon = 1e-3);
}

#[test]
fn mu_only_scan_has_strict_minimum_at_nearest_grid_point() {
    let f = seed_far_from_minimum();
    let scan = f.scan_delta_nll(6.0, 10.0, 5, "argmin", "lbfgs", false).unwrap();
    assert_relative_eq!(scan.mu_hat(), 8.0, epsilon = 1e-4);

    let points = scan.collect_points().unwrap();
    let delta: Vec<f64> = points.iter().map(|p| p.delta_twice_nll).collect();
    assert_eq!(points[2].mu, 8.0);
    assert!(delta[2] < 1e-6);
    assert!(delta[1] > delta[2] && delta[3] > delta[2]);
    assert!(delta[0] > delta[1] && delta[4] > delta[3]);
    // 2 * (f(7) - f(8)) with f(mu) = 10 mu - 80 ln(5 mu) + const.
    assert_relative_eq!(delta[1], 2.0 * (-10.0 - 80.0 * (7.0f64 / 8.0).ln()), epsilon = 1e-4);
}

#[test]
fn single_bin_uncertainty_matches_poisson_curvature() {
    // n = 25, b = 5, s = 10: mu_hat = 2, sigma = nu / (s * sqrt(n)) = 0.5.
    let mut f = Fitter::default();
    f.add_channel("count", &h(&[25.0])).unwrap();
    f.add_process("count", "background", &h(&[5.0]), false).unwrap();
    f.add_process("count", "signal", &h(&[10.0]), true).unwrap();
    let fr = f.fit("argmin", "lbfgs", false).unwrap();
    assert_eq!(fr.status, 0);
    assert_relative_eq!(fr.mu, 2.0, epsilon = 1e-4);
    assert_relative_eq!(fr.mu_uncertainty, 0.5, epsilon = 1e-3);

    f.set_sigma_ref(40.0);
    let xs = f.measure(&fr);
    assert_relative_eq!(xs.value, 80.0, epsilon = 1e-2);
    assert_relative_eq!(xs.uncertainty, 20.0, epsilon = 5e-2);
}

#[test]
fn mu_bounds_clamp_the_fit() {
    let mut f = two_bin();
    f.set_mu_bounds(1.5, 4.0).unwrap();
    let fr = f.fit("argmin", "lbfgs", false).unwrap();
    assert_relative_eq!(fr.mu, 1.5, epsilon = 1e-6);
}

#[test]
fn call_limit_is_a_status_not_an_error() {
    // Data off the nominal prediction so the seed is not already the minimum.
    let mut f = Fitter::default();
    f.add_channel("numu", &h(&[14.0, 20.0])).unwrap();
    f.add_process("numu", "background", &h(&BKG), false).unwrap();
    f.add_process("numu", "signal", &h(&SIG), true).unwrap();
    f.add_norm_systematic("bkg_norm", true).unwrap();
    f.set_norm_effect("bkg_norm", "numu", "background", 0.2).unwrap();
    f.set_minimizer_config(MinimizerConfig { max_fcn: 2, ..MinimizerConfig::default() });
    let fr = f.fit("argmin", "lbfgs", false).unwrap();
    assert_eq!(fr.status, 4);
    assert!(!fr.converged);
    assert!(fr.nll.is_finite());
}

#[test]
fn workspace_fixture_fits() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../tests/fixtures/two_bin_workspace.json");
    let text = std::fs::read_to_string(path).unwrap();
    let ws = Workspace::from_json(&text).unwrap();
    let f = Fitter::from_workspace(&ws).unwrap();
    assert_eq!(f.sigma_ref(), ws.config.sigma_ref);
    let fr = f.fit("argmin", "lbfgs", false).unwrap();
    assert!(fr.converged, "{}", fr.message);
    assert!(fr.mu > 0.0);
    let json = serde_json::to_string(&fr).unwrap();
    assert!(json.contains("theta_norm_bkg_norm"));
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 16, .. ProptestConfig::default() })]

    #[test]
    fn prop_mu_hat_scales_as_inverse_signal(k in 0.5f64..5.0) {
        let mu_k = two_bin_with_signal(&scaled(&SIG, k)).fit("argmin", "lbfgs", false).unwrap().mu;
        prop_assert!((mu_k - 1.0 / k).abs() < 1e-4);
    }
}
