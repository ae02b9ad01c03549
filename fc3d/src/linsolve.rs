//! Iterative linear solvers for systems given only through matrix-vector products.
//!
//! These back [`SparseBlockMatrix::solve_in_place`](crate::matrix::NumericsMatrix::solve_in_place)
//! when the matrix is not symmetric and no sparse factorization applies.

mod bicgstab;

pub use bicgstab::*;

use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Error)]
pub enum Status {
    #[error("Converged")]
    Success,
    #[error("Iteration limit reached before the residual tolerance")]
    MaximumIterationsExceeded,
    #[error("Non-finite residual")]
    NanDetected,
    #[error("Breakdown: search direction orthogonal to the shadow residual")]
    Breakdown,
}

impl Default for Status {
    fn default() -> Self {
        Status::Success
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct SolveResult {
    pub iterations: u32,
    /// Residual 2-norm `‖b - Ax‖`.
    pub residual: f64,
    /// Residual relative to `‖b‖`.
    pub error: f64,
    pub status: Status,
}
