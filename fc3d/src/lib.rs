//! Solvers for the three dimensional frictional contact problem.
//!
//! Given a matrix `M`, a vector `q` and per contact friction coefficients `μ`, find reactions
//! `r` and velocities `u = Mr + q` such that at every contact `r` lies in the Coulomb cone and
//! is complementary to the modified velocity `(uₙ + μ‖uₜ‖, uₜ)`.
//!
//! Problems are built with [`FrictionContactProblem::new`] and solved with [`solve`] given one
//! of the [`SolverOptions`] strategies.
#![cfg_attr(feature = "unstable", feature(test))]

pub mod convergence;
pub mod fixed_point;
pub mod global_ac;
pub mod io;
pub mod linsolve;
pub mod local;
pub mod matrix;
pub mod nonsmooth_newton;
pub mod nsgs;
pub mod options;
pub mod problem;
pub mod projection;
pub mod proximal;
pub mod solver;
pub mod splitting;

pub use convergence::{compute_error, compute_error_tresca, ErrorEstimate};
pub use local::{LocalProblem, LocalSolveResult, LocalStatus};
pub use matrix::{
    DenseMatrix, Factorization, LinearSolveError, Matrix, NumericsMatrix, SparseBlockMatrix,
};
pub use options::*;
pub use problem::{Friction, FrictionContactProblem, GlobalFrictionContactProblem};
pub use solver::{solve, solve_global, SolveResult, Status};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Size mismatch error")]
    SizeMismatch,
    #[error("Unsupported problem dimension: {dimension}")]
    UnsupportedDimension { dimension: usize },
    #[error("Invalid parameter: {name:?}")]
    InvalidParameter { name: String },
    #[error("Missing diagonal block {block}")]
    MissingDiagonalBlock { block: usize },
    #[error("Local solver {solver:?} cannot be used with {friction} friction")]
    IncompatibleLocalSolver {
        solver: &'static str,
        friction: &'static str,
    },
    #[error("Solver {solver:?} cannot be used as the internal solver of {outer:?}")]
    IncompatibleInternalSolver {
        outer: &'static str,
        solver: &'static str,
    },
    #[error("Linear solve failed")]
    LinearSolve {
        #[from]
        source: LinearSolveError,
    },
    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("File I/O Error")]
    FileIOError {
        #[from]
        source: std::io::Error,
    },
    #[error("Snapshot serialization error")]
    SnapshotError {
        #[from]
        source: bincode::Error,
    },
    #[error("Invalid solver configuration")]
    ConfigError {
        #[from]
        source: ron::error::SpannedError,
    },
}
