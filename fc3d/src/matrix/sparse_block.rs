use ahash::AHashMap as HashMap;
use lazycell::LazyCell;
use serde::{Deserialize, Serialize};

use super::{Factorization, LinearSolveError, Matrix, NumericsMatrix, CONTACT_BLOCK_SIZE};
use crate::linsolve::{BiCGSTAB, Status as IterativeStatus};
use crate::Error;

/// Sparse block structured matrix.
///
/// Blocks are stored row by row. Within a block row, blocks are sorted by block column.
/// Derived compressed formats are cached and dropped together whenever values change.
#[derive(Serialize, Deserialize)]
pub struct SparseBlockMatrix {
    /// Offsets of the first row in each block row. Has one more entry than block rows.
    row_offsets: Vec<usize>,
    /// Offsets of the first column in each block column.
    col_offsets: Vec<usize>,
    /// Index into `col_indices` and `blocks` where each block row starts.
    row_ptr: Vec<usize>,
    col_indices: Vec<usize>,
    blocks: Vec<na::DMatrix<f64>>,
    #[serde(skip, default = "LazyCell::new")]
    csc: LazyCell<sprs::CsMat<f64>>,
    #[serde(skip, default = "LazyCell::new")]
    symmetric: LazyCell<bool>,
}

impl Clone for SparseBlockMatrix {
    fn clone(&self) -> Self {
        SparseBlockMatrix {
            row_offsets: self.row_offsets.clone(),
            col_offsets: self.col_offsets.clone(),
            row_ptr: self.row_ptr.clone(),
            col_indices: self.col_indices.clone(),
            blocks: self.blocks.clone(),
            csc: LazyCell::new(),
            symmetric: LazyCell::new(),
        }
    }
}

impl std::fmt::Debug for SparseBlockMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseBlockMatrix")
            .field("row_offsets", &self.row_offsets)
            .field("col_offsets", &self.col_offsets)
            .field("row_ptr", &self.row_ptr)
            .field("col_indices", &self.col_indices)
            .field("blocks", &self.blocks)
            .finish()
    }
}

fn offsets(sizes: &[usize]) -> Vec<usize> {
    std::iter::once(0)
        .chain(sizes.iter().scan(0, |acc, &s| {
            *acc += s;
            Some(*acc)
        }))
        .collect()
}

impl SparseBlockMatrix {
    /// Builds a block matrix from `(block_row, block_col, block)` triples.
    ///
    /// Blocks given more than once for the same position are summed.
    pub fn from_blocks<I>(row_sizes: &[usize], col_sizes: &[usize], blocks: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (usize, usize, na::DMatrix<f64>)>,
    {
        let mut map: HashMap<(usize, usize), na::DMatrix<f64>> = HashMap::new();
        for (i, j, block) in blocks {
            if i >= row_sizes.len() || j >= col_sizes.len() {
                return Err(Error::SizeMismatch);
            }
            if block.shape() != (row_sizes[i], col_sizes[j]) {
                return Err(Error::SizeMismatch);
            }
            map.entry((i, j))
                .and_modify(|b| *b += &block)
                .or_insert(block);
        }

        let mut entries: Vec<_> = map.into_iter().collect();
        entries.sort_unstable_by_key(|&(pos, _)| pos);

        let mut row_ptr = vec![0; row_sizes.len() + 1];
        for &((i, _), _) in entries.iter() {
            row_ptr[i + 1] += 1;
        }
        for i in 0..row_sizes.len() {
            row_ptr[i + 1] += row_ptr[i];
        }

        let (col_indices, blocks) = entries.into_iter().map(|((_, j), b)| (j, b)).unzip();

        Ok(SparseBlockMatrix {
            row_offsets: offsets(row_sizes),
            col_offsets: offsets(col_sizes),
            row_ptr,
            col_indices,
            blocks,
            csc: LazyCell::new(),
            symmetric: LazyCell::new(),
        })
    }

    /// Builds a matrix with `num_blocks × num_blocks` square blocks of the same size.
    pub fn uniform<I>(num_blocks: usize, block_size: usize, blocks: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (usize, usize, na::DMatrix<f64>)>,
    {
        let sizes = vec![block_size; num_blocks];
        SparseBlockMatrix::from_blocks(&sizes, &sizes, blocks)
    }

    /// Splits a dense matrix into square blocks, keeping only blocks with non-zero entries.
    ///
    /// Diagonal blocks are always kept.
    pub fn from_dense(m: &na::DMatrix<f64>, block_size: usize) -> Result<Self, Error> {
        if block_size == 0 || m.nrows() % block_size != 0 || m.ncols() % block_size != 0 {
            return Err(Error::SizeMismatch);
        }
        let nbr = m.nrows() / block_size;
        let nbc = m.ncols() / block_size;
        let mut blocks = Vec::new();
        for i in 0..nbr {
            for j in 0..nbc {
                let b = m
                    .view((i * block_size, j * block_size), (block_size, block_size))
                    .into_owned();
                if i == j || b.iter().any(|&v| v != 0.0) {
                    blocks.push((i, j, b));
                }
            }
        }
        SparseBlockMatrix::from_blocks(&vec![block_size; nbr], &vec![block_size; nbc], blocks)
    }

    pub fn num_block_rows(&self) -> usize {
        self.row_offsets.len() - 1
    }

    pub fn num_block_cols(&self) -> usize {
        self.col_offsets.len() - 1
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    pub fn col_offsets(&self) -> &[usize] {
        &self.col_offsets
    }

    /// Iterates over all stored blocks as `(block_row, block_col, block)`.
    pub fn iter_blocks(&self) -> impl Iterator<Item = (usize, usize, &na::DMatrix<f64>)> + '_ {
        (0..self.num_block_rows()).flat_map(move |i| {
            (self.row_ptr[i]..self.row_ptr[i + 1])
                .map(move |k| (i, self.col_indices[k], &self.blocks[k]))
        })
    }

    fn block_index(&self, i: usize, j: usize) -> Option<usize> {
        let range = *self.row_ptr.get(i)?..*self.row_ptr.get(i + 1)?;
        self.col_indices[range.clone()]
            .binary_search(&j)
            .ok()
            .map(|k| range.start + k)
    }

    pub fn block(&self, i: usize, j: usize) -> Option<&na::DMatrix<f64>> {
        self.block_index(i, j).map(|k| &self.blocks[k])
    }

    /// Mutable access to a stored block. Cached derived formats are dropped.
    pub fn block_mut(&mut self, i: usize, j: usize) -> Option<&mut na::DMatrix<f64>> {
        let k = self.block_index(i, j)?;
        self.invalidate();
        Some(&mut self.blocks[k])
    }

    fn invalidate(&mut self) {
        self.csc = LazyCell::new();
        self.symmetric = LazyCell::new();
    }

    fn is_symmetric(&self) -> bool {
        *self.symmetric.borrow_with(|| {
            if self.row_offsets != self.col_offsets {
                return false;
            }
            self.iter_blocks().all(|(i, j, b)| match self.block(j, i) {
                Some(bt) => {
                    let scale = 1.0 + b.amax();
                    (b - bt.transpose()).amax() <= 1e-12 * scale
                }
                None => b.amax() == 0.0,
            })
        })
    }

    fn ldl(&self) -> Result<sprs_ldl::LdlNumeric<f64, usize>, LinearSolveError> {
        let ldl = sprs_ldl::Ldl::new()
            .check_symmetry(sprs::SymmetryCheck::DontCheckSymmetry)
            .numeric(self.to_csc().view())
            .map_err(|_| LinearSolveError::FactorizationFailed)?;
        if ldl.d().iter().any(|&d| d == 0.0 || !d.is_finite()) {
            return Err(LinearSolveError::Singular);
        }
        Ok(ldl)
    }

    pub(super) fn iterative_solve(&self, b: &mut [f64]) -> Result<(), LinearSolveError> {
        let n = self.num_rows();
        // Block Jacobi preconditioner.
        let inverses: Vec<Option<na::DMatrix<f64>>> = (0..self.num_block_rows())
            .map(|i| {
                self.block(i, i)
                    .and_then(|d| if d.is_square() { d.clone().try_inverse() } else { None })
            })
            .collect();

        let apply_precond = |v: &mut [f64]| {
            for (i, inv) in inverses.iter().enumerate() {
                if let Some(inv) = inv {
                    let range = self.row_offsets[i]..self.row_offsets[i + 1];
                    let rhs = na::DVector::from_column_slice(&v[range.clone()]);
                    v[range].copy_from_slice((inv * rhs).as_slice());
                }
            }
        };

        // Left preconditioned system P⁻¹Ax = P⁻¹b.
        let mut rhs = b.to_vec();
        apply_precond(&mut rhs);
        let mut x = vec![0.0; n];
        let mut solver = BiCGSTAB::new(n, 10 * n as u32 + 100, 1e-13);
        let result = solver.solve(
            |x, out| {
                self.gemv(1.0, x, 0.0, out);
                apply_precond(out);
            },
            &mut x,
            &mut rhs,
        );
        log::trace!("Block BiCGSTAB result: {:?}", result);
        match result.status {
            IterativeStatus::Success => {
                b.copy_from_slice(&x);
                Ok(())
            }
            IterativeStatus::NanDetected => Err(LinearSolveError::Singular),
            _ => Err(LinearSolveError::NotConverged),
        }
    }
}

impl NumericsMatrix for SparseBlockMatrix {
    fn num_rows(&self) -> usize {
        *self.row_offsets.last().unwrap_or(&0)
    }

    fn num_cols(&self) -> usize {
        *self.col_offsets.last().unwrap_or(&0)
    }

    fn gemv(&self, alpha: f64, x: &[f64], beta: f64, y: &mut [f64]) {
        debug_assert_eq!(x.len(), self.num_cols());
        debug_assert_eq!(y.len(), self.num_rows());
        if beta == 0.0 {
            y.iter_mut().for_each(|v| *v = 0.0);
        } else if beta != 1.0 {
            y.iter_mut().for_each(|v| *v *= beta);
        }
        for (i, j, b) in self.iter_blocks() {
            let xj = na::DVectorView::from(&x[self.col_offsets[j]..self.col_offsets[j + 1]]);
            let mut yi =
                na::DVectorViewMut::from(&mut y[self.row_offsets[i]..self.row_offsets[i + 1]]);
            yi.gemv(alpha, b, &xj, 1.0);
        }
    }

    fn gemv_transpose(&self, alpha: f64, x: &[f64], beta: f64, y: &mut [f64]) {
        debug_assert_eq!(x.len(), self.num_rows());
        debug_assert_eq!(y.len(), self.num_cols());
        if beta == 0.0 {
            y.iter_mut().for_each(|v| *v = 0.0);
        } else if beta != 1.0 {
            y.iter_mut().for_each(|v| *v *= beta);
        }
        // Columns of A are rows of Aᵀ.
        for (col, col_vec) in self.to_csc().outer_iterator().enumerate() {
            let dot: f64 = col_vec.iter().map(|(row, &v)| v * x[row]).sum();
            y[col] += alpha * dot;
        }
    }

    fn row_block_gemv(&self, row_block: usize, x: &[f64], y: &mut [f64], skip_diagonal: bool) {
        debug_assert_eq!(
            y.len(),
            self.row_offsets[row_block + 1] - self.row_offsets[row_block]
        );
        let mut y = na::DVectorViewMut::from(y);
        for k in self.row_ptr[row_block]..self.row_ptr[row_block + 1] {
            let j = self.col_indices[k];
            if skip_diagonal && j == row_block {
                continue;
            }
            let xj = na::DVectorView::from(&x[self.col_offsets[j]..self.col_offsets[j + 1]]);
            y.gemv(1.0, &self.blocks[k], &xj, 1.0);
        }
    }

    fn diagonal_block(&self, i: usize) -> Option<na::DMatrixView<'_, f64>> {
        self.block(i, i).map(|b| b.view((0, 0), b.shape()))
    }

    fn add_to_diagonal(&mut self, alpha: f64) -> Result<(), Error> {
        for i in 0..self.num_block_rows().min(self.num_block_cols()) {
            let block = self
                .block_mut(i, i)
                .ok_or(Error::MissingDiagonalBlock { block: i })?;
            for d in 0..block.nrows().min(block.ncols()) {
                block[(d, d)] += alpha;
            }
        }
        self.invalidate();
        Ok(())
    }

    fn left_block_diagonal_product(&self, diag: &[na::Matrix3<f64>]) -> Matrix {
        let mut out = self.clone();
        for (i, j, b) in self.iter_blocks() {
            if let (Some(d), Some(k)) = (diag.get(i), out.block_index(i, j)) {
                if b.nrows() == CONTACT_BLOCK_SIZE {
                    let p = d * b;
                    out.blocks[k] =
                        na::DMatrix::from_column_slice(CONTACT_BLOCK_SIZE, p.ncols(), p.as_slice());
                }
            }
        }
        Matrix::SparseBlock(out)
    }

    fn add_block_diagonal(&mut self, diag: &[na::Matrix3<f64>]) -> Result<(), Error> {
        for (i, d) in diag.iter().enumerate() {
            let block = self
                .block_mut(i, i)
                .ok_or(Error::MissingDiagonalBlock { block: i })?;
            if block.shape() != (CONTACT_BLOCK_SIZE, CONTACT_BLOCK_SIZE) {
                return Err(Error::SizeMismatch);
            }
            *block += d;
        }
        Ok(())
    }

    fn factorize(&self) -> Result<Factorization<'_>, LinearSolveError> {
        if self.num_rows() != self.num_cols() {
            return Err(LinearSolveError::FactorizationFailed);
        }
        if self.is_symmetric() {
            Ok(Factorization::ldl(self.ldl()?))
        } else {
            Ok(Factorization::iterative(self))
        }
    }

    fn to_csc(&self) -> &sprs::CsMat<f64> {
        self.csc.borrow_with(|| {
            let mut tri = sprs::TriMat::new((self.num_rows(), self.num_cols()));
            for (i, j, b) in self.iter_blocks() {
                let (r0, c0) = (self.row_offsets[i], self.col_offsets[j]);
                for (c, col) in b.column_iter().enumerate() {
                    for (r, &v) in col.iter().enumerate() {
                        if v != 0.0 {
                            tri.add_triplet(r0 + r, c0 + c, v);
                        }
                    }
                }
            }
            tri.to_csc()
        })
    }

    fn to_dense(&self) -> na::DMatrix<f64> {
        let mut out = na::DMatrix::zeros(self.num_rows(), self.num_cols());
        for (i, j, b) in self.iter_blocks() {
            out.view_mut(
                (self.row_offsets[i], self.col_offsets[j]),
                (b.nrows(), b.ncols()),
            )
            .copy_from(b);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_blocks_accumulate() -> Result<(), Error> {
        let eye = na::DMatrix::<f64>::identity(3, 3);
        let m = SparseBlockMatrix::uniform(
            2,
            3,
            vec![
                (0, 0, eye.clone()),
                (1, 1, eye.clone()),
                (0, 0, eye.clone()),
                (1, 0, eye.clone() * 0.5),
            ],
        )?;
        assert_eq!(m.num_blocks(), 3);
        assert_eq!(m.block(0, 0).unwrap()[(1, 1)], 2.0);
        assert!(m.block(0, 1).is_none());
        assert!(!m.is_symmetric());
        Ok(())
    }

    #[test]
    fn mismatched_block_shape_is_rejected() {
        let res = SparseBlockMatrix::uniform(1, 3, vec![(0, 0, na::DMatrix::zeros(2, 3))]);
        assert!(matches!(res, Err(Error::SizeMismatch)));
    }

    #[test]
    fn caches_are_invalidated_on_update() -> Result<(), Error> {
        let eye = na::DMatrix::<f64>::identity(3, 3);
        let mut m = SparseBlockMatrix::uniform(1, 3, vec![(0, 0, eye)])?;
        assert_eq!(m.to_csc().nnz(), 3);
        assert!(m.is_symmetric());
        m.block_mut(0, 0).unwrap()[(0, 2)] = 1.0;
        assert_eq!(m.to_csc().nnz(), 4);
        assert!(!m.is_symmetric());
        Ok(())
    }

    #[test]
    fn missing_diagonal_block() -> Result<(), Error> {
        let eye = na::DMatrix::<f64>::identity(3, 3);
        let mut m = SparseBlockMatrix::uniform(2, 3, vec![(0, 0, eye)])?;
        assert!(matches!(
            m.add_to_diagonal(1.0),
            Err(Error::MissingDiagonalBlock { block: 1 })
        ));
        Ok(())
    }
}
