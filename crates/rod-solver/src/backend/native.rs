//! Native backend using nalgebra.
//!
//! This is the default backend. It reconstructs the dense matrix from the
//! triplets and factorizes it with partial-pivoting LU, which also covers
//! the non-symmetric tangents of follower loads and off-equilibrium
//! geometric stiffness.

use super::traits::*;
use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};

/// Native solver backend using nalgebra for all numerical operations.
///
/// Suitable for small-to-medium problems (up to ~10,000 DOFs).
pub struct NativeBackend;

struct DenseLu {
    lu: LU<f64, Dyn, Dyn>,
}

impl Factorization for DenseLu {
    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>, BackendError> {
        let u = self
            .lu
            .solve(rhs)
            .ok_or(BackendError("Singular matrix in LU decomposition".into()))?;
        if u.iter().any(|v| !v.is_finite()) {
            return Err("Non-finite solution in LU solve".into());
        }
        Ok(u)
    }
}

impl LinearSolver for NativeBackend {
    fn name(&self) -> &str {
        "nalgebra-LU"
    }

    fn factorize(
        &self,
        matrix: &SparseTripletsF64,
    ) -> Result<Box<dyn Factorization>, BackendError> {
        if matrix.nrows != matrix.ncols {
            return Err(format!(
                "LU needs a square matrix, got {}x{}",
                matrix.nrows, matrix.ncols
            )
            .into());
        }

        // Reconstruct dense matrix from COO triplets
        let n = matrix.nrows;
        let mut k = DMatrix::zeros(n, n);
        for i in 0..matrix.nnz() {
            k[(matrix.row_indices[i], matrix.col_indices[i])] += matrix.values[i];
        }

        let lu = k.lu();
        if !lu.is_invertible() {
            return Err("Singular matrix in LU decomposition".into());
        }
        Ok(Box::new(DenseLu { lu }))
    }
}
