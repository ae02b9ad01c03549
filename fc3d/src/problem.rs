use serde::{Deserialize, Serialize};

use crate::local::LocalProblem;
use crate::matrix::{
    DenseMatrix, Factorization, Matrix, NumericsMatrix, SparseBlockMatrix, CONTACT_BLOCK_SIZE,
};
use crate::Error;

/// Friction law of a single contact.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Friction {
    /// Coulomb friction with the given coefficient.
    Coulomb(f64),
    /// Tresca friction with the given fixed threshold.
    Tresca(f64),
}

impl Friction {
    pub fn name(&self) -> &'static str {
        match self {
            Friction::Coulomb(_) => "Coulomb",
            Friction::Tresca(_) => "Tresca",
        }
    }
}

/// A three dimensional frictional contact problem `u = Mr + q`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrictionContactProblem {
    pub(crate) dimension: usize,
    pub(crate) number_of_contacts: usize,
    pub(crate) m: Matrix,
    pub(crate) q: Vec<f64>,
    pub(crate) mu: Vec<f64>,
}

impl FrictionContactProblem {
    pub fn new(
        dimension: usize,
        number_of_contacts: usize,
        m: impl Into<Matrix>,
        q: Vec<f64>,
        mu: Vec<f64>,
    ) -> Result<Self, Error> {
        let problem = FrictionContactProblem {
            dimension,
            number_of_contacts,
            m: m.into(),
            q,
            mu,
        };
        problem.validate()?;
        Ok(problem)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.dimension != CONTACT_BLOCK_SIZE {
            return Err(Error::UnsupportedDimension {
                dimension: self.dimension,
            });
        }
        let n = self.size();
        if self.m.num_rows() != n || self.m.num_cols() != n {
            return Err(Error::SizeMismatch);
        }
        if self.q.len() != n || self.mu.len() != self.number_of_contacts {
            return Err(Error::SizeMismatch);
        }
        if let Some(i) = self.mu.iter().position(|&mu| !(mu >= 0.0) || !mu.is_finite()) {
            return Err(Error::InvalidParameter {
                name: format!("mu[{}]", i),
            });
        }
        let block_sizes_match = match &self.m {
            Matrix::Dense(dense) => dense.block_size() == CONTACT_BLOCK_SIZE,
            Matrix::SparseBlock(sbm) => sbm
                .row_offsets()
                .windows(2)
                .all(|w| w[1] - w[0] == CONTACT_BLOCK_SIZE),
        };
        if !block_sizes_match {
            return Err(Error::SizeMismatch);
        }
        if let Some(block) =
            (0..self.number_of_contacts).find(|&i| self.m.diagonal_block(i).is_none())
        {
            return Err(Error::MissingDiagonalBlock { block });
        }
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn number_of_contacts(&self) -> usize {
        self.number_of_contacts
    }

    /// Total number of unknowns, `dimension × number_of_contacts`.
    pub fn size(&self) -> usize {
        self.dimension * self.number_of_contacts
    }

    pub fn m(&self) -> &Matrix {
        &self.m
    }

    pub fn q(&self) -> &[f64] {
        &self.q
    }

    pub fn mu(&self) -> &[f64] {
        &self.mu
    }

    pub(crate) fn check_sizes(&self, reaction: &[f64], velocity: &[f64]) -> Result<(), Error> {
        if reaction.len() != self.size() || velocity.len() != self.size() {
            return Err(Error::SizeMismatch);
        }
        Ok(())
    }

    /// Computes `u = Mr + q`.
    pub fn compute_velocity(&self, reaction: &[f64], velocity: &mut [f64]) {
        velocity.copy_from_slice(&self.q);
        self.m.gemv(1.0, reaction, 1.0, velocity);
    }

    /// Copies the diagonal block of contact `contact`.
    pub fn diagonal_block(&self, contact: usize) -> Result<na::Matrix3<f64>, Error> {
        self.m
            .diagonal_block(contact)
            .map(|b| b.fixed_view::<3, 3>(0, 0).into_owned())
            .ok_or(Error::MissingDiagonalBlock { block: contact })
    }

    /// Builds the Coulomb local problem of contact `contact` given the current reactions of
    /// all other contacts.
    pub fn local_problem(&self, contact: usize, reaction: &[f64]) -> Result<LocalProblem, Error> {
        self.local_problem_with_friction(contact, reaction, Friction::Coulomb(self.mu[contact]))
    }

    /// Builds the local problem `W rᵢ + qᵢ` where `W` is the diagonal block and
    /// `qᵢ = q[i] + Σ_{j≠i} M_ij r_j`.
    pub fn local_problem_with_friction(
        &self,
        contact: usize,
        reaction: &[f64],
        friction: Friction,
    ) -> Result<LocalProblem, Error> {
        let w = self.diagonal_block(contact)?;
        let start = contact * CONTACT_BLOCK_SIZE;
        let mut q = na::Vector3::from_column_slice(&self.q[start..start + CONTACT_BLOCK_SIZE]);
        self.m
            .row_block_gemv(contact, reaction, q.as_mut_slice(), true);
        Ok(LocalProblem { w, q, friction })
    }

    /// Euclidean norm of `q`.
    pub fn q_norm(&self) -> f64 {
        self.q.iter().map(|x| x * x).sum::<f64>().sqrt()
    }
}

/// A frictional contact problem in global coordinates.
///
/// `M v = H r + q`, `u = Hᵀ v + b`, with the Coulomb cone conditions on `(r, u)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GlobalFrictionContactProblem {
    pub(crate) number_of_contacts: usize,
    pub(crate) m: Matrix,
    pub(crate) h: Matrix,
    pub(crate) q: Vec<f64>,
    pub(crate) b: Vec<f64>,
    pub(crate) mu: Vec<f64>,
}

impl GlobalFrictionContactProblem {
    pub fn new(
        number_of_contacts: usize,
        m: impl Into<Matrix>,
        h: impl Into<Matrix>,
        q: Vec<f64>,
        b: Vec<f64>,
        mu: Vec<f64>,
    ) -> Result<Self, Error> {
        let m = m.into();
        let h = h.into();
        let n = m.num_rows();
        let nr = CONTACT_BLOCK_SIZE * number_of_contacts;
        if !m.is_square() || h.num_rows() != n || h.num_cols() != nr {
            return Err(Error::SizeMismatch);
        }
        if q.len() != n || b.len() != nr || mu.len() != number_of_contacts {
            return Err(Error::SizeMismatch);
        }
        if let Some(i) = mu.iter().position(|&mu| !(mu >= 0.0) || !mu.is_finite()) {
            return Err(Error::InvalidParameter {
                name: format!("mu[{}]", i),
            });
        }
        Ok(GlobalFrictionContactProblem {
            number_of_contacts,
            m,
            h,
            q,
            b,
            mu,
        })
    }

    pub fn number_of_contacts(&self) -> usize {
        self.number_of_contacts
    }

    /// Number of global degrees of freedom.
    pub fn num_dofs(&self) -> usize {
        self.m.num_rows()
    }

    pub fn m(&self) -> &Matrix {
        &self.m
    }

    pub fn h(&self) -> &Matrix {
        &self.h
    }

    pub fn q(&self) -> &[f64] {
        &self.q
    }

    pub fn b(&self) -> &[f64] {
        &self.b
    }

    pub fn mu(&self) -> &[f64] {
        &self.mu
    }

    pub(crate) fn check_sizes(
        &self,
        global_velocity: &[f64],
        reaction: &[f64],
        velocity: &[f64],
    ) -> Result<(), Error> {
        let nr = CONTACT_BLOCK_SIZE * self.number_of_contacts;
        if global_velocity.len() != self.num_dofs() || reaction.len() != nr || velocity.len() != nr
        {
            return Err(Error::SizeMismatch);
        }
        Ok(())
    }

    /// Computes `M⁻¹H` column by column with a factorization of `M`.
    pub(crate) fn m_inv_h(&self, m: &Factorization) -> Result<na::DMatrix<f64>, Error> {
        let mut m_inv_h = self.h.to_dense();
        let mut col = vec![0.0; m_inv_h.nrows()];
        for j in 0..m_inv_h.ncols() {
            col.iter_mut()
                .zip(m_inv_h.column(j).iter())
                .for_each(|(c, &h)| *c = h);
            m.solve_in_place(&mut col)?;
            m_inv_h.column_mut(j).copy_from_slice(&col);
        }
        Ok(m_inv_h)
    }

    /// Computes `q̃ = Hᵀ M⁻¹ q + b`.
    pub(crate) fn reduced_q(&self, m: &Factorization) -> Result<Vec<f64>, Error> {
        let mut m_inv_q = self.q.clone();
        m.solve_in_place(&mut m_inv_q)?;
        let mut q = self.b.clone();
        self.h.gemv_transpose(1.0, &m_inv_q, 1.0, &mut q);
        Ok(q)
    }

    /// Eliminates the global velocity, producing the equivalent local problem with
    /// `W = Hᵀ M⁻¹ H` and `q̃ = Hᵀ M⁻¹ q + b`.
    ///
    /// The storage kind of `H` is kept for `W`.
    pub fn reduce(&self) -> Result<FrictionContactProblem, Error> {
        let factorization = self.m.factorize()?;
        let w = self.h.to_dense().transpose() * self.m_inv_h(&factorization)?;
        let q = self.reduced_q(&factorization)?;

        let w: Matrix = match &self.h {
            Matrix::Dense(_) => DenseMatrix::new(w).into(),
            Matrix::SparseBlock(_) => SparseBlockMatrix::from_dense(&w, CONTACT_BLOCK_SIZE)?.into(),
        };
        FrictionContactProblem::new(
            CONTACT_BLOCK_SIZE,
            self.number_of_contacts,
            w,
            q,
            self.mu.clone(),
        )
    }

    /// Recovers the global velocity `v = M⁻¹(H r + q)`.
    pub fn global_velocity(&self, reaction: &[f64], global_velocity: &mut [f64]) -> Result<(), Error> {
        self.global_velocity_with(&self.m.factorize()?, reaction, global_velocity)
    }

    /// Same as [`global_velocity`](Self::global_velocity) with an existing factorization of `M`.
    pub(crate) fn global_velocity_with(
        &self,
        m: &Factorization,
        reaction: &[f64],
        global_velocity: &mut [f64],
    ) -> Result<(), Error> {
        global_velocity.copy_from_slice(&self.q);
        self.h.gemv(1.0, reaction, 1.0, global_velocity);
        m.solve_in_place(global_velocity)?;
        Ok(())
    }

    /// Computes the local velocity `u = Hᵀ v + b`.
    pub fn local_velocity(&self, global_velocity: &[f64], velocity: &mut [f64]) {
        velocity.copy_from_slice(&self.b);
        self.h.gemv_transpose(1.0, global_velocity, 1.0, velocity);
    }
}
