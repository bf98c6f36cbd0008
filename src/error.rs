//! Crate-wide error type.
//!
//! Only two of the three outcomes the optimizer reasons about are
//! `Result::Err` values. Infeasibility is not an error here — it is carried
//! as `SolverStatus::Infeasible` on a successfully-returned `SolverResult`,
//! since it is a domain answer ("no portfolio satisfies these constraints"),
//! not a computation failure.

use thiserror::Error;

/// The single error type returned by every public entry point in this crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Wrong shape, NaN/inf input, unknown tag, weights not summing to 1,
    /// incoherent bounds — a caller-side programming error, not a runtime
    /// condition. Names the offending field.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A specific asset column is degenerate (e.g. zero variance) in a way
    /// that makes the requested estimation meaningless.
    #[error("degenerate asset {asset}: {reason}")]
    DegenerateAsset { asset: String, reason: String },

    /// Solver non-convergence, eigendecomposition failure, or a non-finite
    /// result surviving cleanup. Carries the underlying solver/numerical
    /// message.
    #[error("numerical error: {0}")]
    Numerical(String),
}

impl CoreError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        CoreError::InvalidInput(msg.into())
    }

    pub fn degenerate_asset(asset: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::DegenerateAsset {
            asset: asset.into(),
            reason: reason.into(),
        }
    }

    pub fn numerical(msg: impl Into<String>) -> Self {
        CoreError::Numerical(msg.into())
    }
}

/// Boundary conversion for the one seam where a third-party solver reports
/// failure via a plain `anyhow::Error` (clarabel construction/shape errors).
impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Numerical(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
