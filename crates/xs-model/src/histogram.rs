//! Fixed-binning one-dimensional histograms.
//!
//! Templates and observed counts arrive from the histogram-production pipeline as
//! plain per-bin contents over a uniform axis. Registration copies them into engine-owned
//! storage, so a caller mutating its own [`Histogram`] afterwards has no effect on a fit.

use serde::{Deserialize, Serialize};
use xs_core::{Error, Result};

/// Uniform axis description: bin count and `[lo, hi)` range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Binning {
    /// Number of bins (always > 0).
    pub n_bins: usize,
    /// Low edge of the first bin.
    pub lo: f64,
    /// High edge of the last bin.
    pub hi: f64,
}

impl Binning {
    /// Width of a single bin.
    pub fn bin_width(&self) -> f64 {
        (self.hi - self.lo) / self.n_bins as f64
    }
}

impl std::fmt::Display for Binning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bins in [{}, {}]", self.n_bins, self.lo, self.hi)
    }
}

/// Binned counts or expected yields.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    binning: Binning,
    contents: Vec<f64>,
}

impl Histogram {
    /// Create a histogram over `[lo, hi]` with one entry per bin.
    ///
    /// Fails on an empty content vector, non-finite or inverted edges, or non-finite contents.
    pub fn new(lo: f64, hi: f64, contents: Vec<f64>) -> Result<Self> {
        if contents.is_empty() {
            return Err(Error::Validation("histogram has no bins".to_string()));
        }
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(Error::Validation(format!("invalid histogram axis range [{lo}, {hi}]")));
        }
        if let Some((i, v)) = contents.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(Error::Validation(format!("histogram bin {i} is not finite: {v}")));
        }
        Ok(Self { binning: Binning { n_bins: contents.len(), lo, hi }, contents })
    }

    /// Histogram with unit-width bins starting at zero.
    pub fn from_counts(contents: Vec<f64>) -> Result<Self> {
        let hi = contents.len() as f64;
        Self::new(0.0, hi.max(1.0), contents)
    }

    /// Axis description.
    pub fn binning(&self) -> Binning {
        self.binning
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.binning.n_bins
    }

    /// Per-bin contents.
    pub fn contents(&self) -> &[f64] {
        &self.contents
    }

    /// Mutable per-bin contents (binning is fixed).
    pub fn contents_mut(&mut self) -> &mut [f64] {
        &mut self.contents
    }

    /// Sum of all bin contents.
    pub fn integral(&self) -> f64 {
        self.contents.iter().sum()
    }

    /// Exact binning equality: bin count and both axis edges.
    pub fn same_binning(&self, other: &Histogram) -> bool {
        self.binning == other.binning
    }

    /// Fail with a validation error naming `ctx` if the binnings differ.
    pub fn ensure_same_binning(&self, other: &Histogram, ctx: &str) -> Result<()> {
        if self.same_binning(other) {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "binning mismatch in {ctx}: expected {}, got {}",
                self.binning, other.binning
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_histogram_basic() {
        let h = Histogram::new(0.0, 2.0, vec![10.0, 20.0]).unwrap();
        assert_eq!(h.n_bins(), 2);
        assert_relative_eq!(h.integral(), 30.0);
        assert_relative_eq!(h.binning().bin_width(), 1.0);
    }

    #[test]
    fn test_histogram_rejects_empty_and_bad_axis() {
        assert!(Histogram::new(0.0, 1.0, vec![]).is_err());
        assert!(Histogram::new(1.0, 1.0, vec![1.0]).is_err());
        assert!(Histogram::new(2.0, 1.0, vec![1.0]).is_err());
        assert!(Histogram::new(0.0, f64::INFINITY, vec![1.0]).is_err());
        assert!(Histogram::new(0.0, 1.0, vec![1.0, f64::NAN]).is_err());
    }

    #[test]
    fn test_same_binning_checks_range_not_only_count() {
        let a = Histogram::new(0.0, 2.0, vec![1.0, 2.0]).unwrap();
        let b = Histogram::new(0.0, 3.0, vec![1.0, 2.0]).unwrap();
        let c = Histogram::new(0.0, 2.0, vec![1.0, 2.0, 3.0]).unwrap();
        let d = Histogram::new(0.0, 2.0, vec![5.0, 6.0]).unwrap();
        assert!(!a.same_binning(&b));
        assert!(!a.same_binning(&c));
        assert!(a.same_binning(&d));

        let err = a.ensure_same_binning(&b, "add_process(numu,signal)").unwrap_err();
        assert!(err.to_string().contains("add_process(numu,signal)"));
    }
}
