//! Error types for xsfit

use thiserror::Error;

/// xsfit error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error: duplicate or unknown names, binning mismatches,
    /// negative effects, missing signal, malformed histograms.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid call argument (e.g. scan bounds).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested minimizer backend/algorithm cannot be instantiated.
    #[error("Backend unavailable: {0}")]
    Backend(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let e = Error::Validation("binning mismatch in add_process(numu,signal)".into());
        assert_eq!(e.to_string(), "Validation error: binning mismatch in add_process(numu,signal)");

        let e = Error::Backend("unknown minimizer backend 'Minuit2'".into());
        assert!(e.to_string().starts_with("Backend unavailable"));
    }

    #[test]
    fn test_io_error_converts() {
        fn read() -> Result<String> {
            Ok(std::fs::read_to_string("/definitely/not/a/real/path.json")?)
        }
        assert!(matches!(read(), Err(Error::Io(_))));
    }
}
