//! Optimization backends
//!
//! The fit driver talks to a [`Minimizer`]: a Minuit-style capability with named
//! variables that may be bounded or fixed, an explicit `minimize` / `hesse` split and
//! accessors for the result. [`ArgminMinimizer`] implements it on top of argmin's
//! L-BFGS (with box constraints via clamping), Brent (single bounded variable) and
//! Nelder–Mead solvers.

use crate::hesse;
use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::brent::BrentOpt;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use xs_core::traits::LogDensityModel;
use xs_core::{Error, Result};

/// Backend name accepted by [`create_minimizer`].
pub const ARGMIN_BACKEND: &str = "argmin";

const CALL_LIMIT_MSG: &str = "function call limit reached";

/// Minimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimizerConfig {
    /// Maximum number of solver iterations.
    pub max_iter: u64,
    /// Maximum number of objective evaluations.
    pub max_fcn: usize,
    /// Convergence tolerance (gradient norm for L-BFGS, simplex spread for Nelder–Mead).
    pub tol: f64,
    /// L-BFGS history size.
    pub m: usize,
    /// Objective change defining one standard deviation (0.5 for a negative log-likelihood).
    pub error_def: f64,
    /// Default initial step for free variables.
    pub initial_step: f64,
}

impl Default for MinimizerConfig {
    fn default() -> Self {
        Self { max_iter: 10_000, max_fcn: 100_000, tol: 1e-6, m: 10, error_def: 0.5, initial_step: 0.1 }
    }
}

/// Outcome of a minimization or Hesse pass, numbered like Minuit's fit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinimizerStatus {
    /// Converged with an accurate covariance.
    Converged,
    /// Converged, but the covariance had to be forced positive-definite.
    CovarianceForced,
    /// Converged, but the Hessian could not be inverted; errors are diagonal estimates.
    HessianFailed,
    /// Iteration ceiling reached.
    IterationLimit,
    /// Objective-call ceiling reached.
    CallLimit,
    /// Any other failure.
    Failed,
}

impl MinimizerStatus {
    /// Integer status code (0 = converged).
    pub fn code(self) -> i32 {
        match self {
            MinimizerStatus::Converged => 0,
            MinimizerStatus::CovarianceForced => 1,
            MinimizerStatus::HessianFailed => 2,
            MinimizerStatus::IterationLimit => 3,
            MinimizerStatus::CallLimit => 4,
            MinimizerStatus::Failed => 5,
        }
    }

    /// True when the minimum itself was found (covariance quality aside).
    pub fn is_minimum_valid(self) -> bool {
        matches!(
            self,
            MinimizerStatus::Converged
                | MinimizerStatus::CovarianceForced
                | MinimizerStatus::HessianFailed
        )
    }
}

impl fmt::Display for MinimizerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MinimizerStatus::Converged => "converged",
            MinimizerStatus::CovarianceForced => "covariance forced positive-definite",
            MinimizerStatus::HessianFailed => "hessian inversion failed",
            MinimizerStatus::IterationLimit => "iteration limit reached",
            MinimizerStatus::CallLimit => CALL_LIMIT_MSG,
            MinimizerStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Solver used by [`ArgminMinimizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// L-BFGS with More–Thuente line search and clamped bounds.
    Lbfgs,
    /// Derivative-free Nelder–Mead simplex.
    NelderMead,
}

impl Algorithm {
    /// Parse an algorithm name (case-insensitive). An empty name selects L-BFGS.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "lbfgs" | "l-bfgs" | "lbfgsb" | "l-bfgs-b" => Some(Algorithm::Lbfgs),
            "nelder-mead" | "neldermead" | "simplex" => Some(Algorithm::NelderMead),
            _ => None,
        }
    }

    /// Canonical name.
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Lbfgs => "lbfgs",
            Algorithm::NelderMead => "nelder-mead",
        }
    }
}

/// Objective function trait for optimization
pub trait ObjectiveFunction: Send + Sync {
    /// Evaluate function at given parameters
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Compute gradient at given parameters (numerical if not overridden)
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let n = params.len();
        let mut grad = vec![0.0; n];
        for i in 0..n {
            let eps = 1e-8 * params[i].abs().max(1.0);
            let mut p = params.to_vec();
            p[i] += eps;
            let f_plus = self.eval(&p)?;
            p[i] = params[i] - eps;
            let f_minus = self.eval(&p)?;
            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }
        Ok(grad)
    }
}

/// [`ObjectiveFunction`] view of a model's negative log-likelihood.
pub struct ModelObjective<'a, M: LogDensityModel + ?Sized> {
    model: &'a M,
}

impl<'a, M: LogDensityModel + ?Sized> ModelObjective<'a, M> {
    /// Wrap `model`.
    pub fn new(model: &'a M) -> Self {
        Self { model }
    }
}

impl<M: LogDensityModel + ?Sized> ObjectiveFunction for ModelObjective<'_, M> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        self.model.nll(params)
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.model.grad_nll(params)
    }
}

/// Minuit-style minimizer capability.
///
/// Variables are addressed by index and must be declared in order (the next free index
/// appends, a smaller index redefines). Fixed variables keep their value and get zero error.
pub trait Minimizer: Send {
    /// Backend/algorithm label.
    fn name(&self) -> String;
    /// 0 = quiet (debug logging), >0 = progress at info level.
    fn set_print_level(&mut self, level: i32);
    /// Declare an unbounded variable.
    fn set_variable(&mut self, idx: usize, name: &str, value: f64, step: f64) -> Result<()>;
    /// Declare a variable limited to `[lo, hi]`.
    fn set_bounded_variable(
        &mut self,
        idx: usize,
        name: &str,
        value: f64,
        step: f64,
        lo: f64,
        hi: f64,
    ) -> Result<()>;
    /// Freeze a declared variable at its current value.
    fn fix_variable(&mut self, idx: usize) -> Result<()>;
    /// Change the current value of a declared variable.
    fn set_variable_value(&mut self, idx: usize, value: f64) -> Result<()>;
    /// Run the minimization. Objective failures propagate as errors.
    fn minimize(&mut self, objective: &dyn ObjectiveFunction) -> Result<MinimizerStatus>;
    /// Estimate the covariance at the current point.
    fn hesse(&mut self, objective: &dyn ObjectiveFunction) -> Result<MinimizerStatus>;
    /// Variable names in index order.
    fn variable_names(&self) -> Vec<String>;
    /// Current (best) values.
    fn parameters(&self) -> Vec<f64>;
    /// Symmetric errors from the last Hesse pass (zeros before one is run).
    fn errors(&self) -> Vec<f64>;
    /// Row-major covariance from the last Hesse pass, if the Hessian could be inverted.
    fn covariance(&self) -> Option<Vec<f64>>;
    /// Objective value at the current point.
    fn min_value(&self) -> f64;
    /// Status of the last operation.
    fn status(&self) -> MinimizerStatus;
    /// Objective plus gradient evaluations so far.
    fn n_evaluations(&self) -> usize;
    /// Termination message of the last minimization.
    fn message(&self) -> String;
}

/// Build a minimizer for `backend`/`algorithm`.
///
/// Fails with [`Error::Backend`] if either name is unknown, before anything is evaluated.
pub fn create_minimizer(
    backend: &str,
    algorithm: &str,
    config: &MinimizerConfig,
) -> Result<Box<dyn Minimizer>> {
    if !backend.trim().eq_ignore_ascii_case(ARGMIN_BACKEND) {
        return Err(Error::Backend(format!(
            "minimizer backend '{backend}' (available: {ARGMIN_BACKEND})"
        )));
    }
    let algo = Algorithm::parse(algorithm).ok_or_else(|| {
        Error::Backend(format!(
            "algorithm '{algorithm}' for backend {ARGMIN_BACKEND} (available: lbfgs, nelder-mead)"
        ))
    })?;
    Ok(Box::new(ArgminMinimizer::new(algo, config.clone())))
}

#[derive(Debug, Clone)]
struct Variable {
    name: String,
    value: f64,
    step: f64,
    lo: f64,
    hi: f64,
    fixed: bool,
}

/// Result of one bounded minimization run.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best-fit parameters (full vector, bounds respected)
    pub parameters: Vec<f64>,
    /// Function value at minimum
    pub fval: f64,
    /// Number of iterations
    pub n_iter: u64,
    /// Number of objective (cost) evaluations.
    pub n_fev: usize,
    /// Number of gradient evaluations.
    pub n_gev: usize,
    /// Termination status
    pub status: MinimizerStatus,
    /// Termination message
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, n_fev={}, n_gev={}, status={})",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.status
        )
    }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

/// Objective wrapper that removes fixed parameters (bounds where lo == hi) from the
/// optimizer vector while evaluating the full objective.
struct ReducedObjective<'a> {
    objective: &'a dyn ObjectiveFunction,
    n_full: usize,
    free_idx: Vec<usize>,
    fixed: Vec<(usize, f64)>,
}

impl ReducedObjective<'_> {
    fn expand(&self, free_params: &[f64]) -> Vec<f64> {
        let mut full = vec![0.0; self.n_full];
        for &(i, v) in &self.fixed {
            full[i] = v;
        }
        for (k, &i) in self.free_idx.iter().enumerate() {
            full[i] = free_params[k];
        }
        full
    }
}

impl ObjectiveFunction for ReducedObjective<'_> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        self.objective.eval(&self.expand(params))
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let g_full = self.objective.gradient(&self.expand(params))?;
        Ok(self.free_idx.iter().map(|&i| g_full[i]).collect())
    }
}

/// Evaluation bookkeeping shared with the argmin problem.
#[derive(Default)]
struct FuncCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
    call_limit_hit: AtomicBool,
    best: Mutex<Option<(f64, Vec<f64>)>>,
}

impl FuncCounts {
    fn record(&self, fval: f64, params: &[f64]) {
        if !fval.is_finite() {
            return;
        }
        if let Ok(mut best) = self.best.lock() {
            let better = best.as_ref().is_none_or(|(f, _)| fval < *f);
            if better {
                *best = Some((fval, params.to_vec()));
            }
        }
    }

    fn best(&self) -> Option<(f64, Vec<f64>)> {
        self.best.lock().ok().and_then(|b| b.clone())
    }

    /// Count one objective call, failing once `max_fcn` is exceeded.
    fn charge(&self, max_fcn: usize) -> std::result::Result<(), argmin::core::Error> {
        let n = self.cost.fetch_add(1, Ordering::Relaxed) + 1;
        if n > max_fcn {
            self.call_limit_hit.store(true, Ordering::Relaxed);
            return Err(argmin::core::Error::msg(CALL_LIMIT_MSG));
        }
        Ok(())
    }
}

/// Wrapper to make ObjectiveFunction compatible with argmin
struct ArgminProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
    counts: &'a FuncCounts,
    max_fcn: usize,
}

impl CostFunction for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.charge(self.max_fcn)?;
        let clamped = clamp_params(params, self.bounds);
        let f = self.objective.eval(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))?;
        self.counts.record(f, &clamped);
        Ok(f)
    }
}

impl Gradient for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        let mut g = self
            .objective
            .gradient(&clamped)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))?;
        project_gradient(&mut g, &clamped, self.bounds);
        Ok(g)
    }
}

/// Scalar view of a one-variable objective for argmin's 1-D solvers.
struct LineProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    counts: &'a FuncCounts,
    max_fcn: usize,
}

impl CostFunction for LineProblem<'_> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.charge(self.max_fcn)?;
        let f = self.objective.eval(&[*x]).map_err(|e| argmin::core::Error::msg(e.to_string()))?;
        self.counts.record(f, &[*x]);
        Ok(f)
    }
}

/// Zero gradient components that point out of the box at an active bound.
fn project_gradient(g: &mut [f64], x: &[f64], bounds: &[(f64, f64)]) {
    const EPS: f64 = 1e-12;
    for (i, (&xi, &(lo, hi))) in x.iter().zip(bounds.iter()).enumerate() {
        if xi <= lo + EPS && g[i] > 0.0 {
            g[i] = 0.0;
        }
        if xi >= hi - EPS && g[i] < 0.0 {
            g[i] = 0.0;
        }
    }
}

/// Status of a solver run that returned normally. Line searches swallow the call-limit
/// error from the cost function, so the flag is checked first.
fn run_status(counts: &FuncCounts, termination: &TerminationStatus) -> MinimizerStatus {
    if counts.call_limit_hit.load(Ordering::Relaxed) {
        return MinimizerStatus::CallLimit;
    }
    status_from_termination(termination)
}

fn status_from_termination(termination: &TerminationStatus) -> MinimizerStatus {
    match termination {
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
        | TerminationStatus::Terminated(TerminationReason::TargetCostReached) => {
            MinimizerStatus::Converged
        }
        TerminationStatus::Terminated(TerminationReason::MaxItersReached) => {
            MinimizerStatus::IterationLimit
        }
        _ => MinimizerStatus::Failed,
    }
}

/// argmin-backed [`Minimizer`].
pub struct ArgminMinimizer {
    algorithm: Algorithm,
    config: MinimizerConfig,
    print_level: i32,
    vars: Vec<Variable>,
    fval: f64,
    errors: Vec<f64>,
    covariance: Option<Vec<f64>>,
    status: MinimizerStatus,
    n_eval: usize,
    message: String,
}

impl ArgminMinimizer {
    /// Create a minimizer with no variables declared.
    pub fn new(algorithm: Algorithm, config: MinimizerConfig) -> Self {
        Self {
            algorithm,
            config,
            print_level: 0,
            vars: Vec::new(),
            fval: f64::NAN,
            errors: Vec::new(),
            covariance: None,
            status: MinimizerStatus::Failed,
            n_eval: 0,
            message: "not minimized".to_string(),
        }
    }

    fn log_level(&self) -> log::Level {
        if self.print_level > 0 { log::Level::Info } else { log::Level::Debug }
    }

    fn define(&mut self, idx: usize, var: Variable) -> Result<()> {
        if !var.value.is_finite() {
            return Err(Error::Validation(format!(
                "variable {idx} ({}): initial value is not finite",
                var.name
            )));
        }
        if idx < self.vars.len() {
            self.vars[idx] = var;
        } else if idx == self.vars.len() {
            self.vars.push(var);
        } else {
            return Err(Error::InvalidArgument(format!(
                "variable index {idx} skips ahead of {} declared variables",
                self.vars.len()
            )));
        }
        self.errors.clear();
        self.covariance = None;
        Ok(())
    }

    fn var_mut(&mut self, idx: usize) -> Result<&mut Variable> {
        let n = self.vars.len();
        self.vars
            .get_mut(idx)
            .ok_or_else(|| Error::InvalidArgument(format!("variable index {idx} out of range ({n})")))
    }

    fn bounds(&self) -> Vec<(f64, f64)> {
        self.vars.iter().map(|v| if v.fixed { (v.value, v.value) } else { (v.lo, v.hi) }).collect()
    }

    /// Minimize `objective` from `init` within `bounds` (lo == hi fixes a dimension).
    pub fn run(
        &self,
        objective: &dyn ObjectiveFunction,
        init: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        self.run_with_steps(objective, init, bounds, &[])
    }

    /// Like [`ArgminMinimizer::run`], with a per-variable initial step. Missing or
    /// non-positive steps fall back to `config.initial_step`.
    pub fn run_with_steps(
        &self,
        objective: &dyn ObjectiveFunction,
        init: &[f64],
        bounds: &[(f64, f64)],
        steps: &[f64],
    ) -> Result<OptimizationResult> {
        if init.len() != bounds.len() {
            return Err(Error::Validation(format!(
                "Parameter and bounds length mismatch: {} != {}",
                init.len(),
                bounds.len()
            )));
        }
        let init_clamped = clamp_params(init, bounds);

        let mut free_idx = Vec::new();
        let mut fixed = Vec::new();
        for (i, &(lo, hi)) in bounds.iter().enumerate() {
            if hi - lo <= 0.0 {
                fixed.push((i, lo));
            } else {
                free_idx.push(i);
            }
        }

        if free_idx.is_empty() {
            let fval = objective.eval(&init_clamped)?;
            return Ok(OptimizationResult {
                parameters: init_clamped,
                fval,
                n_iter: 0,
                n_fev: 1,
                n_gev: 0,
                status: MinimizerStatus::Converged,
                message: "all parameters fixed".to_string(),
            });
        }

        if !fixed.is_empty() {
            let init_free: Vec<f64> = free_idx.iter().map(|&i| init_clamped[i]).collect();
            let bounds_free: Vec<(f64, f64)> = free_idx.iter().map(|&i| bounds[i]).collect();
            let steps_free: Vec<f64> =
                free_idx.iter().map(|&i| steps.get(i).copied().unwrap_or(0.0)).collect();
            let reduced = ReducedObjective { objective, n_full: bounds.len(), free_idx, fixed };
            let mut result = self.run_with_steps(&reduced, &init_free, &bounds_free, &steps_free)?;
            result.parameters = reduced.expand(&result.parameters);
            result.message = format!("fixed-dim reduction: {}", result.message);
            return Ok(result);
        }

        match self.algorithm {
            Algorithm::Lbfgs
                if bounds.len() == 1 && bounds[0].0.is_finite() && bounds[0].1.is_finite() =>
            {
                self.brent(objective, bounds[0])
            }
            Algorithm::Lbfgs => self.lbfgs(objective, init_clamped, bounds),
            Algorithm::NelderMead => {
                let simplex = self.initial_simplex(&init_clamped, bounds, steps);
                self.nelder_mead(objective, simplex, bounds)
            }
        }
    }

    /// Brent minimization of a single bounded variable over its whole range.
    ///
    /// The search never starts from the seed, so a minimum far from it is still found.
    fn brent(
        &self,
        objective: &dyn ObjectiveFunction,
        (lo, hi): (f64, f64),
    ) -> Result<OptimizationResult> {
        let counts = FuncCounts::default();
        let problem = LineProblem { objective, counts: &counts, max_fcn: self.config.max_fcn };
        let tol_x = if self.config.tol > 0.0 { self.config.tol } else { 1e-8 };
        let solver = BrentOpt::new(lo, hi).set_tolerance(f64::EPSILON.sqrt(), tol_x);

        let run = Executor::new(problem, solver)
            .configure(|state| state.max_iters(self.config.max_iter))
            .run();

        let mut result = match run {
            Ok(res) => {
                let state = res.state();
                let x = state
                    .get_best_param()
                    .copied()
                    .ok_or_else(|| Error::Computation("No best parameters found".to_string()))?;
                let termination = state.get_termination_status();
                OptimizationResult {
                    parameters: vec![x.clamp(lo, hi)],
                    fval: state.get_best_cost(),
                    n_iter: state.get_iter(),
                    n_fev: counts.cost.load(Ordering::Relaxed),
                    n_gev: 0,
                    status: run_status(&counts, termination),
                    message: format!("Brent: {termination}"),
                }
            }
            Err(e) => self.recover(objective, &[(lo, hi)], &counts, e.to_string())?,
        };

        if result.status == MinimizerStatus::CallLimit {
            return Ok(result);
        }
        // Brent only probes the interior; a minimum on the boundary is approached, not hit.
        for edge in [lo, hi] {
            let fe = objective.eval(&[edge])?;
            result.n_fev += 1;
            if fe < result.fval {
                result.parameters = vec![edge];
                result.fval = fe;
            }
        }
        Ok(result)
    }

    /// Starting simplex: `init` plus one vertex per variable displaced by its step,
    /// stepping inward when the upper bound is too close.
    fn initial_simplex(&self, init: &[f64], bounds: &[(f64, f64)], steps: &[f64]) -> Vec<Vec<f64>> {
        let default_step = if self.config.initial_step > 0.0 { self.config.initial_step } else { 0.1 };
        let mut simplex = vec![init.to_vec()];
        for (i, &(_, hi)) in bounds.iter().enumerate() {
            let step = steps
                .get(i)
                .copied()
                .filter(|s| *s > 0.0 && s.is_finite())
                .unwrap_or(default_step);
            let mut vertex = init.to_vec();
            vertex[i] = if init[i] + step <= hi { init[i] + step } else { init[i] - step };
            simplex.push(vertex);
        }
        simplex
    }

    fn lbfgs(
        &self,
        objective: &dyn ObjectiveFunction,
        init: Vec<f64>,
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        let counts = FuncCounts::default();
        let problem =
            ArgminProblem { objective, bounds, counts: &counts, max_fcn: self.config.max_fcn };

        let linesearch = MoreThuenteLineSearch::new();
        let tol_cost = if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(linesearch, self.config.m.max(1))
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| Error::Validation(format!("Invalid optimizer configuration (tol): {e}")))?
            .with_tolerance_cost(tol_cost)
            .map_err(|e| {
                Error::Validation(format!("Invalid optimizer configuration (tol_cost): {e}"))
            })?;

        let run = Executor::new(problem, solver)
            .configure(|state| state.param(init).max_iters(self.config.max_iter))
            .run();

        let n_fev = counts.cost.load(Ordering::Relaxed);
        let n_gev = counts.grad.load(Ordering::Relaxed);
        match run {
            Ok(res) => {
                let state = res.state();
                let best = state
                    .get_best_param()
                    .ok_or_else(|| Error::Computation("No best parameters found".to_string()))?;
                let termination = state.get_termination_status();
                Ok(OptimizationResult {
                    parameters: clamp_params(best, bounds),
                    fval: state.get_best_cost(),
                    n_iter: state.get_iter(),
                    n_fev,
                    n_gev,
                    status: run_status(&counts, termination),
                    message: termination.to_string(),
                })
            }
            Err(e) => self.recover(objective, bounds, &counts, e.to_string()),
        }
    }

    fn nelder_mead(
        &self,
        objective: &dyn ObjectiveFunction,
        simplex: Vec<Vec<f64>>,
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        let counts = FuncCounts::default();
        let problem =
            ArgminProblem { objective, bounds, counts: &counts, max_fcn: self.config.max_fcn };
        let sd_tol = if self.config.tol > 0.0 { self.config.tol } else { f64::EPSILON };
        let solver = NelderMead::new(simplex).with_sd_tolerance(sd_tol).map_err(|e| {
            Error::Validation(format!("Invalid optimizer configuration (sd_tolerance): {e}"))
        })?;

        let run = Executor::new(problem, solver)
            .configure(|state| state.max_iters(self.config.max_iter))
            .run();

        let n_fev = counts.cost.load(Ordering::Relaxed);
        match run {
            Ok(res) => {
                let state = res.state();
                let best = state
                    .get_best_param()
                    .ok_or_else(|| Error::Computation("No best parameters found".to_string()))?;
                let termination = state.get_termination_status();
                Ok(OptimizationResult {
                    parameters: clamp_params(best, bounds),
                    fval: state.get_best_cost(),
                    n_iter: state.get_iter(),
                    n_fev,
                    n_gev: 0,
                    status: run_status(&counts, termination),
                    message: termination.to_string(),
                })
            }
            Err(e) => self.recover(objective, bounds, &counts, e.to_string()),
        }
    }

    /// Classify an aborted solver run and return the best point seen.
    fn recover(
        &self,
        objective: &dyn ObjectiveFunction,
        bounds: &[(f64, f64)],
        counts: &FuncCounts,
        reason: String,
    ) -> Result<OptimizationResult> {
        let n_fev = counts.cost.load(Ordering::Relaxed);
        let n_gev = counts.grad.load(Ordering::Relaxed);
        let Some((fval, parameters)) = counts.best() else {
            return Err(Error::Computation(format!("Optimization failed: {reason}")));
        };

        let status = if counts.call_limit_hit.load(Ordering::Relaxed) {
            MinimizerStatus::CallLimit
        } else {
            // Line searches often give up right at the minimum.
            let mut g = objective.gradient(&parameters)?;
            project_gradient(&mut g, &parameters, bounds);
            let norm = g.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm <= self.config.tol.max(1e-12).sqrt() {
                MinimizerStatus::Converged
            } else {
                log::warn!("optimizer stopped with |grad| = {norm:.3e}: {reason}");
                MinimizerStatus::Failed
            }
        };

        Ok(OptimizationResult {
            parameters,
            fval,
            n_iter: 0,
            n_fev,
            n_gev,
            status,
            message: reason,
        })
    }
}

impl Minimizer for ArgminMinimizer {
    fn name(&self) -> String {
        format!("{ARGMIN_BACKEND}/{}", self.algorithm.name())
    }

    fn set_print_level(&mut self, level: i32) {
        self.print_level = level;
    }

    fn set_variable(&mut self, idx: usize, name: &str, value: f64, step: f64) -> Result<()> {
        self.define(
            idx,
            Variable {
                name: name.to_string(),
                value,
                step,
                lo: f64::NEG_INFINITY,
                hi: f64::INFINITY,
                fixed: false,
            },
        )
    }

    fn set_bounded_variable(
        &mut self,
        idx: usize,
        name: &str,
        value: f64,
        step: f64,
        lo: f64,
        hi: f64,
    ) -> Result<()> {
        if lo.is_nan() || hi.is_nan() || lo > hi {
            return Err(Error::InvalidArgument(format!(
                "variable {idx} ({name}): invalid limits [{lo}, {hi}]"
            )));
        }
        self.define(
            idx,
            Variable { name: name.to_string(), value: value.clamp(lo, hi), step, lo, hi, fixed: false },
        )
    }

    fn fix_variable(&mut self, idx: usize) -> Result<()> {
        self.var_mut(idx)?.fixed = true;
        Ok(())
    }

    fn set_variable_value(&mut self, idx: usize, value: f64) -> Result<()> {
        let v = self.var_mut(idx)?;
        v.value = value.clamp(v.lo, v.hi);
        Ok(())
    }

    fn minimize(&mut self, objective: &dyn ObjectiveFunction) -> Result<MinimizerStatus> {
        let init: Vec<f64> = self.vars.iter().map(|v| v.value).collect();
        let steps: Vec<f64> = self.vars.iter().map(|v| v.step).collect();
        let bounds = self.bounds();
        let result = self.run_with_steps(objective, &init, &bounds, &steps)?;

        log::log!(self.log_level(), "{}: {result}", self.name());
        if !result.status.is_minimum_valid() {
            log::warn!("{}: minimization did not converge ({})", self.name(), result.message);
        }

        for (v, &x) in self.vars.iter_mut().zip(result.parameters.iter()) {
            v.value = x;
        }
        self.fval = result.fval;
        self.status = result.status;
        self.n_eval += result.n_fev + result.n_gev;
        self.message = result.message;
        self.errors = vec![0.0; self.vars.len()];
        self.covariance = None;
        Ok(self.status)
    }

    fn hesse(&mut self, objective: &dyn ObjectiveFunction) -> Result<MinimizerStatus> {
        let x: Vec<f64> = self.vars.iter().map(|v| v.value).collect();
        let bounds = self.bounds();
        let free: Vec<usize> = (0..self.vars.len()).filter(|&i| !self.vars[i].fixed).collect();

        let hr = hesse::hesse(objective, &x, &bounds, &free, self.config.error_def)?;
        self.n_eval += hr.n_gradient_evals;
        self.errors = hr.errors;
        self.covariance = hr.covariance;

        let outcome = match hr.outcome {
            hesse::HesseOutcome::Accurate => MinimizerStatus::Converged,
            hesse::HesseOutcome::Forced => MinimizerStatus::CovarianceForced,
            hesse::HesseOutcome::Failed => MinimizerStatus::HessianFailed,
        };
        // A failed minimization outranks covariance quality.
        if self.status == MinimizerStatus::Converged {
            self.status = outcome;
        }
        log::log!(self.log_level(), "{}: hesse {outcome}", self.name());
        Ok(self.status)
    }

    fn variable_names(&self) -> Vec<String> {
        self.vars.iter().map(|v| v.name.clone()).collect()
    }

    fn parameters(&self) -> Vec<f64> {
        self.vars.iter().map(|v| v.value).collect()
    }

    fn errors(&self) -> Vec<f64> {
        if self.errors.len() == self.vars.len() {
            self.errors.clone()
        } else {
            vec![0.0; self.vars.len()]
        }
    }

    fn covariance(&self) -> Option<Vec<f64>> {
        self.covariance.clone()
    }

    fn min_value(&self) -> f64 {
        self.fval
    }

    fn status(&self) -> MinimizerStatus {
        self.status
    }

    fn n_evaluations(&self) -> usize {
        self.n_eval
    }

    fn message(&self) -> String {
        self.message.clone()
    }
}

/// Declare every model parameter on `minimizer`: degenerate bounds fix the variable,
/// finite bounds limit it, anything else is free.
pub fn declare_model_variables(
    minimizer: &mut dyn Minimizer,
    model: &(impl LogDensityModel + ?Sized),
    step: f64,
) -> Result<()> {
    let names = model.parameter_names();
    let bounds = model.parameter_bounds();
    let init = model.parameter_init();
    for (i, ((name, &(lo, hi)), &x0)) in names.iter().zip(&bounds).zip(&init).enumerate() {
        if lo.is_finite() && hi.is_finite() {
            minimizer.set_bounded_variable(i, name, x0, step, lo, hi)?;
            if hi - lo <= 0.0 {
                minimizer.fix_variable(i)?;
            }
        } else {
            minimizer.set_variable(i, name, x0, step)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Quadratic {
        center: Vec<f64>,
    }

    impl ObjectiveFunction for Quadratic {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            Ok(params.iter().zip(&self.center).map(|(x, c)| (x - c) * (x - c)).sum())
        }
    }

    struct Rosenbrock;

    impl ObjectiveFunction for Rosenbrock {
        fn eval(&self, p: &[f64]) -> Result<f64> {
            Ok((1.0 - p[0]).powi(2) + 100.0 * (p[1] - p[0] * p[0]).powi(2))
        }

        fn gradient(&self, p: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![
                -2.0 * (1.0 - p[0]) - 400.0 * p[0] * (p[1] - p[0] * p[0]),
                200.0 * (p[1] - p[0] * p[0]),
            ])
        }
    }

    fn lbfgs() -> ArgminMinimizer {
        ArgminMinimizer::new(Algorithm::Lbfgs, MinimizerConfig::default())
    }

    #[test]
    fn test_status_codes() {
        let codes: Vec<i32> = [
            MinimizerStatus::Converged,
            MinimizerStatus::CovarianceForced,
            MinimizerStatus::HessianFailed,
            MinimizerStatus::IterationLimit,
            MinimizerStatus::CallLimit,
            MinimizerStatus::Failed,
        ]
        .iter()
        .map(|s| s.code())
        .collect();
        assert_eq!(codes, [0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_create_minimizer_names() {
        let cfg = MinimizerConfig::default();
        assert!(create_minimizer("argmin", "lbfgs", &cfg).is_ok());
        assert!(create_minimizer("Argmin", "Nelder-Mead", &cfg).is_ok());
        assert!(create_minimizer("argmin", "", &cfg).is_ok());
        assert!(matches!(create_minimizer("NoSuchBackend", "lbfgs", &cfg), Err(Error::Backend(_))));
        assert!(matches!(create_minimizer("argmin", "migradx", &cfg), Err(Error::Backend(_))));
    }

    #[test]
    fn test_lbfgs_rosenbrock() {
        let m = lbfgs();
        let r = m.run(&Rosenbrock, &[-1.2, 1.0], &[(f64::NEG_INFINITY, f64::INFINITY); 2]).unwrap();
        assert!(r.status.is_minimum_valid(), "{r}");
        assert_relative_eq!(r.parameters[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(r.parameters[1], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_bounds_are_respected() {
        let m = lbfgs();
        let obj = Quadratic { center: vec![-3.0, 2.0] };
        let r = m.run(&obj, &[1.0, 0.0], &[(0.0, 5.0), (f64::NEG_INFINITY, f64::INFINITY)]).unwrap();
        assert_relative_eq!(r.parameters[0], 0.0, epsilon = 1e-8);
        assert_relative_eq!(r.parameters[1], 2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_fixed_dimension_is_removed() {
        let m = lbfgs();
        let obj = Quadratic { center: vec![1.0, 2.0, 3.0] };
        let r = m.run(&obj, &[0.0, 0.0, 0.0], &[(0.5, 0.5), (-10.0, 10.0), (-10.0, 10.0)]).unwrap();
        assert_eq!(r.parameters[0], 0.5);
        assert_relative_eq!(r.parameters[1], 2.0, epsilon = 1e-4);
        assert_relative_eq!(r.parameters[2], 3.0, epsilon = 1e-4);
        assert!(r.message.starts_with("fixed-dim reduction"));
    }

    #[test]
    fn test_brent_one_dimension() {
        let m = lbfgs();
        let obj = Quadratic { center: vec![2.5] };
        let r = m.run(&obj, &[1.0], &[(0.0, 10.0)]).unwrap();
        assert_eq!(r.status, MinimizerStatus::Converged);
        assert_relative_eq!(r.parameters[0], 2.5, epsilon = 1e-5);

        // Optimum on the edge.
        let obj = Quadratic { center: vec![-1.0] };
        let r = m.run(&obj, &[1.0], &[(0.0, 10.0)]).unwrap();
        assert_eq!(r.parameters[0], 0.0);
    }

    #[test]
    fn test_brent_finds_minimum_far_from_seed() {
        let m = lbfgs();
        let obj = Quadratic { center: vec![9.5] };
        let r = m.run(&obj, &[0.5], &[(0.0, 10.0)]).unwrap();
        assert_eq!(r.status, MinimizerStatus::Converged);
        assert_relative_eq!(r.parameters[0], 9.5, epsilon = 1e-5);
    }

    #[test]
    fn test_initial_simplex_uses_variable_steps() {
        let m = ArgminMinimizer::new(Algorithm::NelderMead, MinimizerConfig::default());
        let free = (f64::NEG_INFINITY, f64::INFINITY);
        let simplex = m.initial_simplex(&[1.0, 2.0, 3.0], &[free, free, (0.0, 3.2)], &[0.5, 0.0, 0.4]);
        assert_eq!(simplex.len(), 4);
        assert_eq!(simplex[0], vec![1.0, 2.0, 3.0]);
        assert_eq!(simplex[1], vec![1.5, 2.0, 3.0]);
        // Non-positive step falls back to the configured default.
        assert_eq!(simplex[2], vec![1.0, 2.1, 3.0]);
        // Too close to the upper bound: step inward.
        assert_relative_eq!(simplex[3][2], 2.6, epsilon = 1e-12);
    }

    #[test]
    fn test_nelder_mead_honours_declared_steps() {
        let mut m = ArgminMinimizer::new(Algorithm::NelderMead, MinimizerConfig::default());
        m.set_variable(0, "a", 0.0, 2.0).unwrap();
        m.set_variable(1, "b", 0.0, 2.0).unwrap();
        let obj = Quadratic { center: vec![4.0, -3.0] };
        let st = m.minimize(&obj).unwrap();
        assert!(st.is_minimum_valid(), "{}", m.message());
        let p = m.parameters();
        assert_relative_eq!(p[0], 4.0, epsilon = 1e-3);
        assert_relative_eq!(p[1], -3.0, epsilon = 1e-3);
    }

    #[test]
    fn test_nelder_mead_quadratic() {
        let m = ArgminMinimizer::new(Algorithm::NelderMead, MinimizerConfig::default());
        let obj = Quadratic { center: vec![1.5, -0.5] };
        let r = m.run(&obj, &[0.0, 0.0], &[(0.0, 10.0), (f64::NEG_INFINITY, f64::INFINITY)]).unwrap();
        assert!(r.status.is_minimum_valid(), "{r}");
        assert_relative_eq!(r.parameters[0], 1.5, epsilon = 1e-3);
        assert_relative_eq!(r.parameters[1], -0.5, epsilon = 1e-3);
    }

    #[test]
    fn test_call_limit_reported() {
        let cfg = MinimizerConfig { max_fcn: 5, ..MinimizerConfig::default() };
        let m = ArgminMinimizer::new(Algorithm::NelderMead, cfg);
        let r = m.run(&Rosenbrock, &[-1.2, 1.0], &[(f64::NEG_INFINITY, f64::INFINITY); 2]).unwrap();
        assert_eq!(r.status, MinimizerStatus::CallLimit);
        assert!(r.fval.is_finite());
    }

    #[test]
    fn test_lbfgs_call_limit_reported() {
        let cfg = MinimizerConfig { max_fcn: 5, ..MinimizerConfig::default() };
        let m = ArgminMinimizer::new(Algorithm::Lbfgs, cfg);
        let r = m.run(&Rosenbrock, &[-1.2, 1.0], &[(f64::NEG_INFINITY, f64::INFINITY); 2]).unwrap();
        assert_eq!(r.status, MinimizerStatus::CallLimit);
        assert!(r.fval.is_finite());
    }

    #[test]
    fn test_minimizer_variable_protocol() {
        let mut m = lbfgs();
        assert!(m.set_variable(1, "x", 0.0, 0.1).is_err());
        m.set_bounded_variable(0, "mu", 20.0, 0.1, 0.0, 10.0).unwrap();
        m.set_variable(1, "theta", 0.0, 0.1).unwrap();
        assert_eq!(m.parameters(), vec![10.0, 0.0]);
        assert!(m.fix_variable(2).is_err());
        assert!(m.set_bounded_variable(0, "mu", 1.0, 0.1, 3.0, 2.0).is_err());

        m.set_variable_value(0, 4.0).unwrap();
        m.fix_variable(0).unwrap();
        let obj = Quadratic { center: vec![1.0, -2.0] };
        let st = m.minimize(&obj).unwrap();
        assert_eq!(st, MinimizerStatus::Converged);
        let p = m.parameters();
        assert_eq!(p[0], 4.0);
        assert_relative_eq!(p[1], -2.0, epsilon = 1e-5);
        assert_eq!(m.variable_names(), ["mu", "theta"]);
    }

    #[test]
    fn test_hesse_on_quadratic() {
        let mut m = ArgminMinimizer::new(
            Algorithm::Lbfgs,
            MinimizerConfig { error_def: 1.0, ..MinimizerConfig::default() },
        );
        m.set_variable(0, "a", 0.0, 0.1).unwrap();
        m.set_variable(1, "b", 0.0, 0.1).unwrap();
        let obj = Quadratic { center: vec![1.0, 2.0] };
        m.minimize(&obj).unwrap();
        let st = m.hesse(&obj).unwrap();
        assert_eq!(st, MinimizerStatus::Converged);
        // f = Σ (x-c)², H = 2·I, cov = 2·up·H⁻¹ = I for up = 1.
        for e in m.errors() {
            assert_relative_eq!(e, 1.0, epsilon = 1e-4);
        }
        let cov = m.covariance().unwrap();
        assert_relative_eq!(cov[1], 0.0, epsilon = 1e-4);
    }
}
