//! Core types and error taxonomy for the voice conversion engine.
//!
//! Every fallible operation in this crate returns [`VcResult`]. Errors carry
//! enough context (file, byte offset, field) to diagnose a failure at the
//! call site; nothing is swallowed and retried internally. The variants map
//! one-to-one onto the failure classes of the engine:
//!
//! - [`VcError::CorruptContainer`]: a codebook file is malformed or shorter
//!   than its header implies; the load aborts.
//! - [`VcError::DimensionMismatch`]: feature dimensions disagree across
//!   entries or training files. This cannot be attributed to a single record,
//!   so the whole operation aborts.
//! - [`VcError::EmptyCodebook`]: matching was attempted against a codebook
//!   with no entries.
//! - [`VcError::InvalidInput`]: a runtime query vector is empty or contains
//!   non-finite values.
//! - [`VcError::MissingResource`]: a required file (codebook, smoothed
//!   vocal tract artifact) does not exist.

use std::path::PathBuf;

/// A single acoustic feature vector (one analysis frame).
pub type FeatureVector = Vec<f64>;

/// Result type for voice conversion operations.
pub type VcResult<T> = Result<T, VcError>;

/// Errors produced by codebook I/O, training, matching, and transformation.
#[derive(Debug, thiserror::Error)]
pub enum VcError {
    /// The container file is malformed or truncated.
    #[error("corrupt codebook container {file:?} at byte {offset}: {what}")]
    CorruptContainer {
        file: PathBuf,
        offset: u64,
        what: String,
    },

    /// Feature dimensions disagree across entries or training files.
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// Matching against a codebook that holds no entries.
    #[error("codebook has no entries; matching cannot proceed")]
    EmptyCodebook,

    /// The runtime input vector is unusable.
    #[error("invalid input vector: {0}")]
    InvalidInput(String),

    /// A required file was not found.
    #[error("missing resource {file:?}: {what}")]
    MissingResource { file: PathBuf, what: String },

    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl VcError {
    /// Shorthand for a corrupt-container error.
    pub fn corrupt(file: impl Into<PathBuf>, offset: u64, what: impl Into<String>) -> Self {
        VcError::CorruptContainer {
            file: file.into(),
            offset,
            what: what.into(),
        }
    }

    /// Shorthand for a dimension-mismatch error.
    pub fn dims(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        VcError::DimensionMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }
}

/// Checks that a query vector is non-empty and fully finite.
pub fn check_input_vector(v: &[f64]) -> VcResult<()> {
    if v.is_empty() {
        return Err(VcError::InvalidInput("empty vector".into()));
    }
    if let Some(i) = v.iter().position(|x| !x.is_finite()) {
        return Err(VcError::InvalidInput(format!(
            "non-finite value at index {i}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_input_vector() {
        assert!(check_input_vector(&[1.0, 2.0]).is_ok());
        assert!(check_input_vector(&[]).is_err());
        assert!(check_input_vector(&[1.0, f64::NAN]).is_err());
        assert!(check_input_vector(&[f64::INFINITY]).is_err());
    }

    #[test]
    fn test_error_display_carries_context() {
        let e = VcError::corrupt("/tmp/x.vmcb", 42, "unexpected end of file");
        let msg = e.to_string();
        assert!(msg.contains("x.vmcb"));
        assert!(msg.contains("42"));
    }
}
