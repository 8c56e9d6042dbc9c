//! xsfit CLI

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use xs_core::FitResult;
use xs_inference::{Fitter, MinimizerConfig, ScanPoint};
use xs_model::workspace::Workspace;

#[derive(Parser)]
#[command(name = "xsfit")]
#[command(about = "xsfit - binned profile-likelihood cross-section fitter")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

/// Minimizer selection shared by `fit` and `scan`.
#[derive(Args, Debug, Clone)]
struct MinimizerArgs {
    /// Minimizer backend
    #[arg(long, default_value = "argmin")]
    backend: String,

    /// Minimization algorithm (lbfgs, nelder-mead)
    #[arg(long, default_value = "lbfgs")]
    algorithm: String,

    /// Iteration ceiling
    #[arg(long)]
    max_iter: Option<u64>,

    /// Objective-call ceiling
    #[arg(long)]
    max_fcn: Option<usize>,

    /// Convergence tolerance
    #[arg(long)]
    tol: Option<f64>,

    /// Log per-fit progress at info level
    #[arg(long)]
    verbose: bool,
}

impl MinimizerArgs {
    fn config(&self) -> MinimizerConfig {
        let mut cfg = MinimizerConfig::default();
        if let Some(v) = self.max_iter {
            cfg.max_iter = v;
        }
        if let Some(v) = self.max_fcn {
            cfg.max_fcn = v;
        }
        if let Some(v) = self.tol {
            cfg.tol = v;
        }
        cfg
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Maximum-likelihood fit of the signal strength
    Fit {
        /// Input workspace (xsfit JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        minimizer: MinimizerArgs,
    },

    /// Profile likelihood scan of Δ(−2 ln L) over mu
    Scan {
        /// Input workspace (xsfit JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// First mu value
        #[arg(long, default_value = "0.0")]
        start: f64,

        /// Last mu value
        #[arg(long, default_value = "2.0")]
        stop: f64,

        /// Number of points (inclusive, >= 3)
        #[arg(long, default_value = "21")]
        points: usize,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        minimizer: MinimizerArgs,
    },

    /// Evaluate -2 ln L at a parameter point
    Nll {
        /// Input workspace (xsfit JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Comma-separated parameter values in layout order (mu first)
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        params: Vec<f64>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Fit { input, output, minimizer } => cmd_fit(&input, output.as_deref(), &minimizer),
        Commands::Scan { input, start, stop, points, output, minimizer } => {
            cmd_scan(&input, start, stop, points, output.as_deref(), &minimizer)
        }
        Commands::Nll { input, params, output } => cmd_nll(&input, &params, output.as_deref()),
        Commands::Version => {
            println!("xsfit {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_fitter(input: &Path) -> Result<Fitter> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read workspace {}", input.display()))?;
    let ws = Workspace::from_json(&text)
        .with_context(|| format!("failed to parse workspace {}", input.display()))?;
    let fitter = Fitter::from_workspace(&ws).context("invalid workspace")?;
    tracing::debug!(
        channels = fitter.model().store().channels().len(),
        nuisances = fitter.model().registry().len(),
        "workspace loaded"
    );
    Ok(fitter)
}

#[derive(Serialize)]
struct FitOutput<'a> {
    #[serde(flatten)]
    result: &'a FitResult,
    twice_nll: f64,
    sigma_ref: f64,
    cross_section: f64,
    cross_section_uncertainty: f64,
    expected_yields: Vec<(String, Vec<f64>)>,
}

fn cmd_fit(input: &Path, output: Option<&Path>, args: &MinimizerArgs) -> Result<()> {
    let mut fitter = load_fitter(input)?;
    fitter.set_minimizer_config(args.config());

    let result = fitter.fit(&args.backend, &args.algorithm, args.verbose)?;
    tracing::info!(mu = result.mu, nll = result.nll, status = result.status, "fit complete");
    if result.status != 0 {
        tracing::warn!(status = result.status, message = %result.message, "fit did not converge cleanly");
    }

    let xs = fitter.measure(&result);
    let out = FitOutput {
        result: &result,
        twice_nll: 2.0 * result.nll,
        sigma_ref: fitter.sigma_ref(),
        cross_section: xs.value,
        cross_section_uncertainty: xs.uncertainty,
        expected_yields: fitter.expected_yields(&result)?,
    };
    write_json(output, &out)
}

#[derive(Serialize)]
struct ScanOutput {
    mu_hat: f64,
    nll_hat: f64,
    global_status: i32,
    points: Vec<ScanPointOutput>,
}

#[derive(Serialize)]
struct ScanPointOutput {
    #[serde(flatten)]
    point: ScanPoint,
    status_code: i32,
}

fn cmd_scan(
    input: &Path,
    start: f64,
    stop: f64,
    points: usize,
    output: Option<&Path>,
    args: &MinimizerArgs,
) -> Result<()> {
    let mut fitter = load_fitter(input)?;
    fitter.set_minimizer_config(args.config());

    let scan = fitter.scan_delta_nll(start, stop, points, &args.backend, &args.algorithm, args.verbose)?;
    let mut out = ScanOutput {
        mu_hat: scan.mu_hat(),
        nll_hat: scan.nll_hat(),
        global_status: scan.global_status().code(),
        points: Vec::with_capacity(scan.len()),
    };
    for point in &scan {
        let point = point?;
        tracing::debug!(mu = point.mu, delta = point.delta_twice_nll, "scan point");
        let status_code = point.status.code();
        out.points.push(ScanPointOutput { point, status_code });
    }
    write_json(output, &out)
}

#[derive(Serialize)]
struct NllOutput {
    parameter_names: Vec<String>,
    params: Vec<f64>,
    twice_nll: f64,
    nll: f64,
}

fn cmd_nll(input: &Path, params: &[f64], output: Option<&Path>) -> Result<()> {
    let fitter = load_fitter(input)?;
    let twice_nll = fitter.negative_log_likelihood(params)?;
    let out = NllOutput {
        parameter_names: fitter.parameter_names(),
        params: params.to_vec(),
        twice_nll,
        nll: 0.5 * twice_nll,
    };
    write_json(output, &out)
}

fn write_json(output: Option<&Path>, value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    if let Some(path) = output {
        std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    } else {
        println!("{text}");
    }
    Ok(())
}
