//! Non-smooth Newton method on the global formulation.
//!
//! The unknown is the triple `x = (v, u, r)` and the residual is
//!
//! ```text
//! Ψ(x) = [ -Mv + Hr + q ]
//!        [ -u + Hᵀv + b ]
//!        [  F(r, u)     ]
//! ```
//!
//! where `F` stacks the per contact Alart-Curnier or Fischer-Burmeister functions. Newton
//! systems are solved by eliminating `v` and `u`, which leaves the contact space system
//! `(A W + B) Δr = -Ψ₃ - A(HᵀM⁻¹Ψ₁ + Ψ₂)` with `W = HᵀM⁻¹H`.

use na::{DMatrix, DVector, Matrix3, Vector3};
use unroll::unroll_for_loops;

use crate::convergence::coulomb_error;
use crate::local::goldstein_price;
use crate::local::newton::evaluate;
use crate::matrix::{Factorization, CONTACT_BLOCK_SIZE};
use crate::options::{NewtonFormulation, NewtonOptions};
use crate::problem::GlobalFrictionContactProblem;
use crate::solver::{is_finite, log_debug_stats, log_debug_stats_header, SolveResult, Status};
use crate::Error;

/// Diagonal shift used to retry a singular contact space system.
const REGULARIZATION: f64 = 1e-10;

/// Iterate of the augmented problem.
#[derive(Clone, Debug)]
struct State {
    v: Vec<f64>,
    u: Vec<f64>,
    r: Vec<f64>,
}

impl State {
    fn axpy_from(&mut self, base: &State, t: f64, direction: &State) {
        let update = |x: &mut [f64], x0: &[f64], d: &[f64]| {
            x.iter_mut()
                .zip(x0.iter().zip(d.iter()))
                .for_each(|(x, (&x0, &d))| *x = x0 + t * d);
        };
        update(&mut self.v, &base.v, &direction.v);
        update(&mut self.u, &base.u, &direction.u);
        update(&mut self.r, &base.r, &direction.r);
    }

    fn stacked(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.v.len() + self.u.len() + self.r.len());
        out.extend_from_slice(&self.v);
        out.extend_from_slice(&self.u);
        out.extend_from_slice(&self.r);
        out
    }
}

/// Residual `Ψ` split by block, together with the contact Jacobian blocks.
struct Residual {
    psi: State,
    a: Vec<Matrix3<f64>>,
    b: Vec<Matrix3<f64>>,
}

impl Residual {
    fn merit(&self) -> f64 {
        0.5 * self.psi.stacked().iter().map(|x| x * x).sum::<f64>()
    }
}

/// Evaluates `Ψ` at `x`. The `v`, `u` and `r` fields of the result hold `Ψ₁`, `Ψ₂` and `Ψ₃`.
fn residual(
    problem: &GlobalFrictionContactProblem,
    formulation: NewtonFormulation,
    rhos: &[f64],
    x: &State,
) -> Residual {
    let nc = problem.number_of_contacts();

    let mut psi1 = problem.q().to_vec();
    problem.m().gemv(-1.0, &x.v, 1.0, &mut psi1);
    problem.h().gemv(1.0, &x.r, 1.0, &mut psi1);

    let mut psi2 = problem.b().to_vec();
    problem.h().gemv_transpose(1.0, &x.v, 1.0, &mut psi2);
    psi2.iter_mut().zip(x.u.iter()).for_each(|(p, &u)| *p -= u);

    let mut psi3 = vec![0.0; x.r.len()];
    let mut a = Vec::with_capacity(nc);
    let mut b = Vec::with_capacity(nc);
    for (contact, ((r, u), out)) in x
        .r
        .chunks_exact(CONTACT_BLOCK_SIZE)
        .zip(x.u.chunks_exact(CONTACT_BLOCK_SIZE))
        .zip(psi3.chunks_exact_mut(CONTACT_BLOCK_SIZE))
        .enumerate()
    {
        let local = evaluate(
            formulation,
            &Vector3::from_column_slice(r),
            &Vector3::from_column_slice(u),
            problem.mu()[contact],
            rhos[contact],
        );
        out.copy_from_slice(local.f.as_slice());
        a.push(local.a);
        b.push(local.b);
    }

    Residual {
        psi: State {
            v: psi1,
            u: psi2,
            r: psi3,
        },
        a,
        b,
    }
}

/// Assembles the augmented Jacobian `[[-M, 0, H], [Hᵀ, -I, 0], [0, A, B]]`.
fn augmented_jacobian(
    problem: &GlobalFrictionContactProblem,
    a: &[Matrix3<f64>],
    b: &[Matrix3<f64>],
) -> sprs::CsMat<f64> {
    let ndof = problem.num_dofs();
    let nr = CONTACT_BLOCK_SIZE * problem.number_of_contacts();
    let (u_off, r_off) = (ndof, ndof + nr);
    let mut tri = sprs::TriMat::new((ndof + 2 * nr, ndof + 2 * nr));

    for (col, col_vec) in problem.m().to_csc().outer_iterator().enumerate() {
        for (row, &val) in col_vec.iter() {
            tri.add_triplet(row, col, -val);
        }
    }
    for (col, col_vec) in problem.h().to_csc().outer_iterator().enumerate() {
        for (row, &val) in col_vec.iter() {
            tri.add_triplet(row, r_off + col, val);
            tri.add_triplet(u_off + col, row, val);
        }
    }
    for k in 0..nr {
        tri.add_triplet(u_off + k, u_off + k, -1.0);
    }
    for (contact, (a, b)) in a.iter().zip(b.iter()).enumerate() {
        let start = CONTACT_BLOCK_SIZE * contact;
        add_block(&mut tri, r_off + start, u_off + start, a);
        add_block(&mut tri, r_off + start, r_off + start, b);
    }
    tri.to_csc()
}

#[unroll_for_loops]
fn add_block(tri: &mut sprs::TriMat<f64>, row: usize, col: usize, block: &Matrix3<f64>) {
    for i in 0..3 {
        for j in 0..3 {
            if block[(i, j)] != 0.0 {
                tri.add_triplet(row + i, col + j, block[(i, j)]);
            }
        }
    }
}

fn csc_mul(m: &sprs::CsMat<f64>, x: &[f64]) -> Vec<f64> {
    let mut y = vec![0.0; m.rows()];
    for (col, col_vec) in m.outer_iterator().enumerate() {
        for (row, &val) in col_vec.iter() {
            y[row] += val * x[col];
        }
    }
    y
}

/// Quantities of the elimination that stay fixed during a solve. `M` is factorized once.
struct Reduction<'a> {
    m: Factorization<'a>,
    /// `M⁻¹H`.
    m_inv_h: DMatrix<f64>,
    /// `HᵀM⁻¹H`.
    w: DMatrix<f64>,
}

impl<'a> Reduction<'a> {
    fn new(problem: &'a GlobalFrictionContactProblem) -> Result<Self, Error> {
        let m = problem.m().factorize()?;
        let m_inv_h = problem.m_inv_h(&m)?;
        let w = problem.h().to_dense().transpose() * &m_inv_h;
        Ok(Reduction { m, m_inv_h, w })
    }
}

/// Solves `J Δ = -Ψ` by block elimination. Returns `None` when the contact space system is
/// singular even after regularization.
fn newton_direction(
    problem: &GlobalFrictionContactProblem,
    reduction: &Reduction,
    residual: &Residual,
) -> Result<Option<State>, Error> {
    let nr = residual.psi.r.len();

    // s = M⁻¹Ψ₁, g = Hᵀs + Ψ₂
    let mut s = residual.psi.v.clone();
    reduction.m.solve_in_place(&mut s)?;
    let mut g = residual.psi.u.clone();
    problem.h().gemv_transpose(1.0, &s, 1.0, &mut g);

    let mut schur = DMatrix::zeros(nr, nr);
    let mut rhs = DVector::zeros(nr);
    for (contact, (a, b)) in residual.a.iter().zip(residual.b.iter()).enumerate() {
        let start = CONTACT_BLOCK_SIZE * contact;
        let rows = a * reduction.w.rows(start, CONTACT_BLOCK_SIZE);
        schur.rows_mut(start, CONTACT_BLOCK_SIZE).copy_from(&rows);
        let mut diag = schur.fixed_view_mut::<3, 3>(start, start);
        diag += b;

        let g_i = Vector3::from_column_slice(&g[start..start + CONTACT_BLOCK_SIZE]);
        let psi3 = Vector3::from_column_slice(&residual.psi.r[start..start + CONTACT_BLOCK_SIZE]);
        rhs.fixed_rows_mut::<3>(start).copy_from(&(-psi3 - a * g_i));
    }

    let dr = match solve_dense(schur.clone(), &rhs) {
        Some(dr) => dr,
        None => {
            log::debug!("contact space system is singular, retrying regularized");
            for k in 0..nr {
                schur[(k, k)] += REGULARIZATION;
            }
            match solve_dense(schur, &rhs) {
                Some(dr) => dr,
                None => return Ok(None),
            }
        }
    };

    let dv = &reduction.m_inv_h * &dr + DVector::from_vec(s);
    let du = &reduction.w * &dr + DVector::from_vec(g);
    Ok(Some(State {
        v: dv.as_slice().to_vec(),
        u: du.as_slice().to_vec(),
        r: dr.as_slice().to_vec(),
    }))
}

fn solve_dense(m: DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    m.lu()
        .solve(rhs)
        .filter(|x| x.iter().all(|v| v.is_finite()))
}

/// Norm of the reduced `q̃ = HᵀM⁻¹q + b`, used to normalize the error like the reduced problem.
fn reduced_q_norm(problem: &GlobalFrictionContactProblem, m: &Factorization) -> Result<f64, Error> {
    let q = problem.reduced_q(m)?;
    Ok(q.iter().map(|x| x * x).sum::<f64>().sqrt())
}

/// Error of the reaction after recovering `v` and `u` from it.
fn global_error(
    problem: &GlobalFrictionContactProblem,
    m: &Factorization,
    q_norm: f64,
    reaction: &[f64],
    global_velocity: &mut [f64],
    velocity: &mut [f64],
) -> Result<f64, Error> {
    problem.global_velocity_with(m, reaction, global_velocity)?;
    problem.local_velocity(global_velocity, velocity);
    Ok(coulomb_error(problem.mu(), reaction, velocity, q_norm))
}

/// Solves the global problem with the non-smooth Newton method.
///
/// `global_velocity`, `reaction` and `velocity` are used as the initial iterate.
pub fn solve(
    problem: &GlobalFrictionContactProblem,
    options: &NewtonOptions,
    global_velocity: &mut [f64],
    reaction: &mut [f64],
    velocity: &mut [f64],
) -> Result<SolveResult, Error> {
    let nc = problem.number_of_contacts();
    let tolerance = options.tolerance;
    let formulation = options.formulation;

    let reduction = Reduction::new(problem)?;

    let rhos = (0..nc)
        .map(|contact| {
            let n = CONTACT_BLOCK_SIZE * contact;
            let rho = options.rho.unwrap_or_else(|| 1.0 / reduction.w[(n, n)]);
            if rho > 0.0 && rho.is_finite() {
                Ok(rho)
            } else {
                Err(Error::InvalidParameter {
                    name: format!("rho[{}]", contact),
                })
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let q_norm = reduced_q_norm(problem, &reduction.m)?;
    let mut x = State {
        v: global_velocity.to_vec(),
        u: velocity.to_vec(),
        r: reaction.to_vec(),
    };
    let mut x0 = x.clone();
    let mut v_scratch = vec![0.0; global_velocity.len()];
    let mut u_scratch = vec![0.0; velocity.len()];

    let mut current = residual(problem, formulation, &rhos, &x);
    let mut error = global_error(
        problem,
        &reduction.m,
        q_norm,
        &x.r,
        &mut v_scratch,
        &mut u_scratch,
    )?;
    let mut iterations = 0;

    log_debug_stats_header("step");
    let result = loop {
        if error <= tolerance {
            break SolveResult {
                iterations,
                error,
                status: Status::Success,
            };
        }
        if iterations >= options.max_iter {
            break SolveResult {
                iterations,
                error,
                status: Status::MaximumIterationsExceeded,
            };
        }
        iterations += 1;

        let direction = match newton_direction(problem, &reduction, &current)? {
            Some(direction) => direction,
            None => {
                break SolveResult {
                    iterations,
                    error,
                    status: Status::LinearSolveError,
                }
            }
        };

        let jacobian = augmented_jacobian(problem, &current.a, &current.b);
        let j_delta = csc_mul(&jacobian, &direction.stacked());
        let slope: f64 = current
            .psi
            .stacked()
            .iter()
            .zip(j_delta.iter())
            .map(|(p, jd)| p * jd)
            .sum();

        x0.clone_from(&x);
        let (t, ls_iter) = goldstein_price(
            current.merit(),
            slope,
            |t| {
                x.axpy_from(&x0, t, &direction);
                residual(problem, formulation, &rhos, &x).merit()
            },
            options.max_ls_iter,
        );
        log::trace!("line search: t = {:.3e} after {} trials", t, ls_iter);
        x.axpy_from(&x0, t, &direction);

        if !is_finite(&x.r) || !is_finite(&x.v) {
            x.clone_from(&x0);
            break SolveResult {
                iterations,
                error,
                status: Status::NanDetected,
            };
        }

        current = residual(problem, formulation, &rhos, &x);
        error = global_error(
            problem,
            &reduction.m,
            q_norm,
            &x.r,
            &mut v_scratch,
            &mut u_scratch,
        )?;
        log_debug_stats(iterations, error, &x.r, t);
    };

    // Return velocities consistent with the reaction.
    reaction.copy_from_slice(&x.r);
    problem.global_velocity_with(&reduction.m, reaction, global_velocity)?;
    problem.local_velocity(global_velocity, velocity);
    Ok(result)
}
