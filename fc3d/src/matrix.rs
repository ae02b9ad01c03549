//! Matrix storage used by the contact problems.
//!
//! Two storage kinds are supported: dense column-major matrices and sparse block structured
//! matrices. Each implements [`NumericsMatrix`] and the [`Matrix`] enum dereferences to the
//! trait object of whichever representation it holds, so solvers never branch on storage.

mod dense;
mod sparse_block;

pub use dense::*;
pub use sparse_block::*;

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Size of a contact block.
pub const CONTACT_BLOCK_SIZE: usize = 3;

#[derive(Copy, Clone, Debug, PartialEq, thiserror::Error)]
pub enum LinearSolveError {
    #[error("Singular matrix detected")]
    Singular,
    #[error("Matrix factorization failed")]
    FactorizationFailed,
    #[error("Iterative linear solve did not converge")]
    NotConverged,
}

/// Operations every matrix storage provides.
pub trait NumericsMatrix: std::fmt::Debug {
    fn num_rows(&self) -> usize;
    fn num_cols(&self) -> usize;

    /// Computes `y := alpha*A*x + beta*y`.
    fn gemv(&self, alpha: f64, x: &[f64], beta: f64, y: &mut [f64]);

    /// Computes `y := alpha*Aᵀ*x + beta*y`.
    fn gemv_transpose(&self, alpha: f64, x: &[f64], beta: f64, y: &mut [f64]);

    /// Accumulates the product of one block row with `x` into `y`, i.e. `y += A[row_block, :]*x`.
    ///
    /// When `skip_diagonal` is set, the diagonal block does not contribute. This is the
    /// coupling term used to build local contact problems.
    fn row_block_gemv(&self, row_block: usize, x: &[f64], y: &mut [f64], skip_diagonal: bool);

    /// Borrows the diagonal block of the given block row.
    ///
    /// Returns `None` if the block is not stored.
    fn diagonal_block(&self, i: usize) -> Option<na::DMatrixView<'_, f64>>;

    /// Adds `alpha` to every diagonal entry.
    fn add_to_diagonal(&mut self, alpha: f64) -> Result<(), Error>;

    /// Computes `diag(blocks)*A` keeping the storage kind of `A`.
    fn left_block_diagonal_product(&self, blocks: &[na::Matrix3<f64>]) -> Matrix;

    /// Computes `A += diag(blocks)`.
    fn add_block_diagonal(&mut self, blocks: &[na::Matrix3<f64>]) -> Result<(), Error>;

    /// Factorizes a square matrix for repeated solves.
    fn factorize(&self) -> Result<Factorization<'_>, LinearSolveError>;

    /// Solves `Ax = b` overwriting `b` with the solution.
    ///
    /// This factorizes on every call. Use [`NumericsMatrix::factorize`] when solving with the
    /// same matrix more than once.
    fn solve_in_place(&self, b: &mut [f64]) -> Result<(), LinearSolveError> {
        self.factorize()?.solve_in_place(b)
    }

    /// Compressed sparse column representation of this matrix.
    ///
    /// This is computed on first use and cached until the matrix values change.
    fn to_csc(&self) -> &sprs::CsMat<f64>;

    fn to_dense(&self) -> na::DMatrix<f64>;
}

/// A matrix in one of the supported storage formats.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Matrix {
    Dense(DenseMatrix),
    SparseBlock(SparseBlockMatrix),
}

/// A factorized matrix.
///
/// Symmetric sparse block matrices keep their LDLᵀ factors. Unsymmetric ones have no direct
/// factorization here and are solved with preconditioned BiCGSTAB on each call.
pub struct Factorization<'a> {
    size: usize,
    kind: FactorizationKind<'a>,
}

enum FactorizationKind<'a> {
    Lu(na::LU<f64, na::Dyn, na::Dyn>),
    Ldl(sprs_ldl::LdlNumeric<f64, usize>),
    Iterative(&'a SparseBlockMatrix),
}

impl<'a> Factorization<'a> {
    pub(crate) fn lu(lu: na::LU<f64, na::Dyn, na::Dyn>, size: usize) -> Self {
        Factorization {
            size,
            kind: FactorizationKind::Lu(lu),
        }
    }

    pub(crate) fn ldl(ldl: sprs_ldl::LdlNumeric<f64, usize>) -> Self {
        Factorization {
            size: ldl.d().len(),
            kind: FactorizationKind::Ldl(ldl),
        }
    }

    pub(crate) fn iterative(m: &'a SparseBlockMatrix) -> Self {
        Factorization {
            size: m.num_rows(),
            kind: FactorizationKind::Iterative(m),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Solves `Ax = b` overwriting `b` with the solution.
    pub fn solve_in_place(&self, b: &mut [f64]) -> Result<(), LinearSolveError> {
        if b.len() != self.size {
            return Err(LinearSolveError::FactorizationFailed);
        }
        match &self.kind {
            FactorizationKind::Lu(lu) => {
                let mut rhs = na::DVectorViewMut::from(&mut *b);
                if !lu.solve_mut(&mut rhs) {
                    return Err(LinearSolveError::Singular);
                }
            }
            FactorizationKind::Ldl(ldl) => {
                let x = ldl.solve(&*b);
                b.copy_from_slice(&x);
            }
            FactorizationKind::Iterative(m) => m.iterative_solve(b)?,
        }
        if b.iter().any(|x| !x.is_finite()) {
            return Err(LinearSolveError::Singular);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Factorization<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            FactorizationKind::Lu(_) => "LU",
            FactorizationKind::Ldl(_) => "LDLᵀ",
            FactorizationKind::Iterative(_) => "BiCGSTAB",
        };
        f.debug_struct("Factorization")
            .field("kind", &kind)
            .field("size", &self.size)
            .finish()
    }
}

impl Matrix {
    /// Short name of the storage kind, used in diagnostic output.
    pub fn storage_name(&self) -> &'static str {
        match self {
            Matrix::Dense(_) => "dense",
            Matrix::SparseBlock(_) => "sparse block",
        }
    }

    pub fn is_square(&self) -> bool {
        self.num_rows() == self.num_cols()
    }
}

impl Deref for Matrix {
    type Target = dyn NumericsMatrix;
    fn deref(&self) -> &Self::Target {
        match self {
            Matrix::Dense(m) => m,
            Matrix::SparseBlock(m) => m,
        }
    }
}

impl DerefMut for Matrix {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Matrix::Dense(m) => m,
            Matrix::SparseBlock(m) => m,
        }
    }
}

impl From<DenseMatrix> for Matrix {
    fn from(m: DenseMatrix) -> Self {
        Matrix::Dense(m)
    }
}

impl From<SparseBlockMatrix> for Matrix {
    fn from(m: SparseBlockMatrix) -> Self {
        Matrix::SparseBlock(m)
    }
}

impl From<na::DMatrix<f64>> for Matrix {
    fn from(m: na::DMatrix<f64>) -> Self {
        Matrix::Dense(DenseMatrix::new(m))
    }
}

/// Builds a CSC matrix from a dense one dropping exact zeros.
pub(crate) fn dense_to_csc(m: &na::DMatrix<f64>) -> sprs::CsMat<f64> {
    let mut tri = sprs::TriMat::new(m.shape());
    for (j, col) in m.column_iter().enumerate() {
        for (i, &v) in col.iter().enumerate() {
            if v != 0.0 {
                tri.add_triplet(i, j, v);
            }
        }
    }
    tri.to_csc()
}
