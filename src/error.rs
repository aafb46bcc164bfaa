use crate::fitter::engine::FitResult;

/// Everything that can stop a fit from producing a usable result.
///
/// None of these are fatal: a caller hosting the fitter (plot window, batch
/// job) is expected to report the error and carry on.
#[derive(Debug, thiserror::Error)]
pub enum FitError {
    #[error("not enough data points: found {found} usable points, need at least {required}")]
    InsufficientData { found: usize, required: usize },

    #[error("data arrays have different lengths (x: {x}, y: {y}, sigma: {sigma:?})")]
    LengthMismatch {
        x: usize,
        y: usize,
        sigma: Option<usize>,
    },

    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("unknown constraint '{0}'")]
    UnknownConstraint(String),

    #[error("invalid constraint on parameter {index}: {reason}")]
    InvalidConstraint { index: usize, reason: String },

    #[error("expected {expected} parameters, got {found}")]
    ParameterCount { expected: usize, found: usize },

    #[error("solver did not converge after {iteration} iterations: {reason}")]
    NonConvergence {
        iteration: usize,
        reason: String,
        partial: Box<FitResult>,
    },

    #[error("normal-equations matrix is singular at iteration {iteration}")]
    SingularMatrix { iteration: usize },

    #[error("fit cancelled at iteration {iteration}")]
    Cancelled { iteration: usize },
}

impl FitError {
    /// Best parameters found before a fit gave up, if any.
    pub fn partial_result(&self) -> Option<&FitResult> {
        match self {
            Self::NonConvergence { partial, .. } => Some(partial),
            _ => None,
        }
    }
}
