//! Error types for the rod solver.

use thiserror::Error;

use crate::backend::BackendError;

pub type Result<T> = std::result::Result<T, SolverError>;

#[derive(Error, Debug)]
pub enum SolverError {
    /// Malformed or inconsistent input; reported before any output is written.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("Newton iteration did not converge: {0}")]
    ConvergenceFailure(String),

    #[error("contact search failed: {0}")]
    ContactSearchFailure(String),

    #[error("time integration diverged: {0}")]
    IntegrationDivergence(String),

    #[error("linear solver error: {0}")]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Io(#[from] rod_io::IoError),

    #[error(transparent)]
    Props(#[from] rod_props::PropsError),
}

impl SolverError {
    pub fn config(message: impl Into<String>) -> Self {
        SolverError::Configuration(message.into())
    }

    /// Failures an adaptive step controller may retry with a smaller
    /// increment.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SolverError::ConvergenceFailure(_)
                | SolverError::ContactSearchFailure(_)
                | SolverError::Backend(_)
        )
    }

    /// Configuration problems are usage errors, everything else is a
    /// runtime failure.
    pub fn is_configuration(&self) -> bool {
        matches!(self, SolverError::Configuration(_) | SolverError::Props(_))
    }
}
