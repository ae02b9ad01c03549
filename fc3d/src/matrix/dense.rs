use lazycell::LazyCell;
use serde::{Deserialize, Serialize};

use super::{
    dense_to_csc, Factorization, LinearSolveError, Matrix, NumericsMatrix, CONTACT_BLOCK_SIZE,
};
use crate::Error;

/// Dense column-major matrix.
///
/// Block operations assume square blocks of size `block_size` along the diagonal.
#[derive(Serialize, Deserialize)]
pub struct DenseMatrix {
    data: na::DMatrix<f64>,
    block_size: usize,
    #[serde(skip, default = "LazyCell::new")]
    csc: LazyCell<sprs::CsMat<f64>>,
}

impl Clone for DenseMatrix {
    fn clone(&self) -> Self {
        DenseMatrix::with_block_size(self.data.clone(), self.block_size)
    }
}

impl std::fmt::Debug for DenseMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseMatrix")
            .field("data", &self.data)
            .field("block_size", &self.block_size)
            .finish()
    }
}

impl DenseMatrix {
    pub fn new(data: na::DMatrix<f64>) -> Self {
        DenseMatrix::with_block_size(data, CONTACT_BLOCK_SIZE)
    }

    pub fn with_block_size(data: na::DMatrix<f64>, block_size: usize) -> Self {
        DenseMatrix {
            data,
            block_size,
            csc: LazyCell::new(),
        }
    }

    /// Builds a matrix from column-major values.
    pub fn from_column_slice(nrows: usize, ncols: usize, values: &[f64]) -> Self {
        DenseMatrix::new(na::DMatrix::from_column_slice(nrows, ncols, values))
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn data(&self) -> &na::DMatrix<f64> {
        &self.data
    }

    /// Mutable access to the values. Cached derived formats are dropped.
    pub fn data_mut(&mut self) -> &mut na::DMatrix<f64> {
        self.invalidate();
        &mut self.data
    }

    fn invalidate(&mut self) {
        self.csc = LazyCell::new();
    }
}

impl NumericsMatrix for DenseMatrix {
    fn num_rows(&self) -> usize {
        self.data.nrows()
    }

    fn num_cols(&self) -> usize {
        self.data.ncols()
    }

    fn gemv(&self, alpha: f64, x: &[f64], beta: f64, y: &mut [f64]) {
        debug_assert_eq!(x.len(), self.data.ncols());
        debug_assert_eq!(y.len(), self.data.nrows());
        let x = na::DVectorView::from(x);
        let mut y = na::DVectorViewMut::from(y);
        y.gemv(alpha, &self.data, &x, beta);
    }

    fn gemv_transpose(&self, alpha: f64, x: &[f64], beta: f64, y: &mut [f64]) {
        debug_assert_eq!(x.len(), self.data.nrows());
        debug_assert_eq!(y.len(), self.data.ncols());
        let x = na::DVectorView::from(x);
        let mut y = na::DVectorViewMut::from(y);
        y.gemv_tr(alpha, &self.data, &x, beta);
    }

    fn row_block_gemv(&self, row_block: usize, x: &[f64], y: &mut [f64], skip_diagonal: bool) {
        let bs = self.block_size;
        let start = row_block * bs;
        debug_assert_eq!(y.len(), bs);
        for (j, &xj) in x.iter().enumerate() {
            if xj == 0.0 || (skip_diagonal && j / bs == row_block) {
                continue;
            }
            for (i, yi) in y.iter_mut().enumerate() {
                *yi += self.data[(start + i, j)] * xj;
            }
        }
    }

    fn diagonal_block(&self, i: usize) -> Option<na::DMatrixView<'_, f64>> {
        let bs = self.block_size;
        if (i + 1) * bs > self.data.nrows().min(self.data.ncols()) {
            return None;
        }
        Some(self.data.view((i * bs, i * bs), (bs, bs)))
    }

    fn add_to_diagonal(&mut self, alpha: f64) -> Result<(), Error> {
        self.invalidate();
        for i in 0..self.data.nrows().min(self.data.ncols()) {
            self.data[(i, i)] += alpha;
        }
        Ok(())
    }

    fn left_block_diagonal_product(&self, blocks: &[na::Matrix3<f64>]) -> Matrix {
        let mut out = na::DMatrix::zeros(self.data.nrows(), self.data.ncols());
        let bs = CONTACT_BLOCK_SIZE;
        for (i, block) in blocks.iter().enumerate() {
            let rows = self.data.rows(i * bs, bs);
            out.rows_mut(i * bs, bs).copy_from(&(block * rows));
        }
        Matrix::Dense(DenseMatrix::with_block_size(out, self.block_size))
    }

    fn add_block_diagonal(&mut self, blocks: &[na::Matrix3<f64>]) -> Result<(), Error> {
        let bs = CONTACT_BLOCK_SIZE;
        if blocks.len() * bs > self.data.nrows().min(self.data.ncols()) {
            return Err(Error::SizeMismatch);
        }
        self.invalidate();
        for (i, block) in blocks.iter().enumerate() {
            let mut view = self.data.view_mut((i * bs, i * bs), (bs, bs));
            view += block;
        }
        Ok(())
    }

    fn factorize(&self) -> Result<Factorization<'_>, LinearSolveError> {
        if self.data.nrows() != self.data.ncols() {
            return Err(LinearSolveError::FactorizationFailed);
        }
        let lu = self.data.clone().lu();

        // Reject pivots that underflow relative to the largest one.
        let diag = lu.u().diagonal();
        let max_pivot = diag.iter().fold(0.0_f64, |acc, p| acc.max(p.abs()));
        let min_pivot = diag.iter().fold(f64::INFINITY, |acc, p| acc.min(p.abs()));
        if max_pivot == 0.0 || min_pivot <= 1e-14 * max_pivot {
            return Err(LinearSolveError::Singular);
        }
        Ok(Factorization::lu(lu, self.data.nrows()))
    }

    fn to_csc(&self) -> &sprs::CsMat<f64> {
        self.csc.borrow_with(|| dense_to_csc(&self.data))
    }

    fn to_dense(&self) -> na::DMatrix<f64> {
        self.data.clone()
    }
}
