//! Backend trait definitions for linear solvers.
//!
//! These traits abstract over the concrete numerical library used for the
//! global tangent systems of the Newton iteration. Element-level
//! computations remain in nalgebra (small, dense matrices).

use nalgebra::DVector;

/// Error type for backend operations.
#[derive(Debug, Clone)]
pub struct BackendError(pub String);

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BackendError {}

impl From<String> for BackendError {
    fn from(s: String) -> Self {
        BackendError(s)
    }
}

impl From<&str> for BackendError {
    fn from(s: &str) -> Self {
        BackendError(s.to_string())
    }
}

/// Sparse matrix in COO (coordinate/triplet) format.
///
/// This is the backend-agnostic interchange format between the assembly
/// layer and any solver backend. Duplicate entries are summed.
#[derive(Debug, Clone, Default)]
pub struct SparseTripletsF64 {
    pub nrows: usize,
    pub ncols: usize,
    pub row_indices: Vec<usize>,
    pub col_indices: Vec<usize>,
    pub values: Vec<f64>,
}

impl SparseTripletsF64 {
    /// Number of non-zero entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Matrix-vector product.
    pub fn mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut y = DVector::zeros(self.nrows);
        for i in 0..self.nnz() {
            y[self.row_indices[i]] += self.values[i] * x[self.col_indices[i]];
        }
        y
    }
}

/// Solver convergence and diagnostic info.
#[derive(Debug, Clone)]
pub struct SolveInfo {
    /// Number of iterations (1 for direct solvers)
    pub iterations: usize,
    /// Final residual norm (if available)
    pub residual_norm: Option<f64>,
    /// Human-readable solver name (e.g., "nalgebra-LU")
    pub solver_name: String,
}

/// A factorized tangent, reusable for several right-hand sides.
pub trait Factorization {
    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>, BackendError>;
}

/// Trait for a linear solver backend.
///
/// The path-following solvers need two solves per tangent (residual and
/// load pattern), so backends expose the factorization step.
pub trait LinearSolver: Send + Sync {
    /// Human-readable name of this backend.
    fn name(&self) -> &str;

    fn factorize(&self, matrix: &SparseTripletsF64)
    -> Result<Box<dyn Factorization>, BackendError>;

    /// Solve K * u = F once.
    fn solve_linear(
        &self,
        matrix: &SparseTripletsF64,
        rhs: &DVector<f64>,
    ) -> Result<(DVector<f64>, SolveInfo), BackendError> {
        let solution = self.factorize(matrix)?.solve(rhs)?;
        let residual = matrix.mul_vec(&solution) - rhs;
        Ok((
            solution,
            SolveInfo {
                iterations: 1,
                residual_norm: Some(residual.norm()),
                solver_name: self.name().to_string(),
            },
        ))
    }
}
