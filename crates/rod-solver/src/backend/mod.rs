//! Numerical backend abstraction layer.
//!
//! This module provides trait-based interfaces for the linear solves of
//! the Newton iteration, allowing the assembly layer to be
//! backend-agnostic.
//!
//! # Architecture
//!
//! ```text
//! Rod elements + contact (nalgebra DMatrix, small, dense)
//!         │
//!         ▼
//! Assembly (COO -> CSR, reduced to free DOFs)
//!         │
//!         ▼
//! Backend Trait Layer (LinearSolver -> Factorization)
//!         │
//!         ▼
//! Native Backend (dense LU)
//! ```

pub mod native;
pub mod traits;

pub use native::NativeBackend;
pub use traits::*;

/// Returns the default linear solver backend.
pub fn default_backend() -> Box<dyn LinearSolver> {
    Box::new(NativeBackend)
}
