//! Generalized Newton method on the stacked contact functions of the reduced problem.
//!
//! The per contact Alart-Curnier or Fischer-Burmeister functions `Fᵢ(rᵢ, uᵢ)` are stacked into
//! `F(r)` with `u = Mr + q`. Each iteration solves `J Δ = -F` with `J = A M + B`, where `A`
//! and `B` are block diagonal, followed by a Goldstein-Price line search on `½‖F‖²`.

use na::{Matrix3, Vector3};

use crate::convergence::compute_error;
use crate::local::goldstein_price;
use crate::local::newton::evaluate;
use crate::matrix::CONTACT_BLOCK_SIZE;
use crate::options::{NewtonFormulation, NewtonOptions};
use crate::problem::FrictionContactProblem;
use crate::solver::{
    is_finite, log_debug_stats, log_debug_stats_header, rollback_non_finite, SolveResult, Status,
};
use crate::Error;

/// Diagonal shift used to retry a singular Newton system.
const REGULARIZATION: f64 = 1e-10;

/// Stacked contact functions and their Jacobian blocks.
struct Stacked {
    f: Vec<f64>,
    a: Vec<Matrix3<f64>>,
    b: Vec<Matrix3<f64>>,
}

impl Stacked {
    fn new(number_of_contacts: usize) -> Self {
        Stacked {
            f: vec![0.0; CONTACT_BLOCK_SIZE * number_of_contacts],
            a: vec![Matrix3::zeros(); number_of_contacts],
            b: vec![Matrix3::zeros(); number_of_contacts],
        }
    }

    fn merit(&self) -> f64 {
        0.5 * self.f.iter().map(|x| x * x).sum::<f64>()
    }
}

/// Evaluates `F(r)` and, when `out` is given, stores the Jacobian blocks. Returns `½‖F‖²`.
fn evaluate_stacked(
    problem: &FrictionContactProblem,
    formulation: NewtonFormulation,
    rhos: &[f64],
    reaction: &[f64],
    velocity: &mut [f64],
    mut out: Option<&mut Stacked>,
) -> f64 {
    problem.compute_velocity(reaction, velocity);
    let mut merit = 0.0;
    for (contact, ((r, u), &mu)) in reaction
        .chunks_exact(CONTACT_BLOCK_SIZE)
        .zip(velocity.chunks_exact(CONTACT_BLOCK_SIZE))
        .zip(problem.mu().iter())
        .enumerate()
    {
        let r = Vector3::from_column_slice(r);
        let u = Vector3::from_column_slice(u);
        let local = evaluate(formulation, &r, &u, mu, rhos[contact]);
        merit += local.merit();
        if let Some(stacked) = out.as_mut() {
            let start = contact * CONTACT_BLOCK_SIZE;
            stacked.f[start..start + CONTACT_BLOCK_SIZE].copy_from_slice(local.f.as_slice());
            stacked.a[contact] = local.a;
            stacked.b[contact] = local.b;
        }
    }
    merit
}

/// Augmentation parameters, either the given one or `1/W₀₀` per contact.
fn augmentation_parameters(
    problem: &FrictionContactProblem,
    rho: Option<f64>,
) -> Result<Vec<f64>, Error> {
    (0..problem.number_of_contacts())
        .map(|contact| {
            let rho = match rho {
                Some(rho) => rho,
                None => 1.0 / problem.diagonal_block(contact)?[(0, 0)],
            };
            if rho > 0.0 && rho.is_finite() {
                Ok(rho)
            } else {
                Err(Error::InvalidParameter {
                    name: format!("rho[{}]", contact),
                })
            }
        })
        .collect()
}

/// Solves the problem with the non-smooth Newton method.
pub fn solve(
    problem: &FrictionContactProblem,
    options: &NewtonOptions,
    reaction: &mut [f64],
    velocity: &mut [f64],
) -> Result<SolveResult, Error> {
    let n = problem.size();
    let tolerance = options.tolerance;
    let formulation = options.formulation;
    let rhos = augmentation_parameters(problem, options.rho)?;

    let mut stacked = Stacked::new(problem.number_of_contacts());
    let mut direction = vec![0.0; n];
    let mut jd = vec![0.0; n];
    let mut r0 = vec![0.0; n];
    let mut trial_u = vec![0.0; n];

    evaluate_stacked(problem, formulation, &rhos, reaction, velocity, Some(&mut stacked));
    let mut error = compute_error(problem, reaction, velocity, tolerance).error;
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

        let mut jacobian = problem.m().left_block_diagonal_product(&stacked.a);
        jacobian.add_block_diagonal(&stacked.b)?;

        direction
            .iter_mut()
            .zip(stacked.f.iter())
            .for_each(|(d, &f)| *d = -f);
        if let Err(e) = jacobian.solve_in_place(&mut direction) {
            log::debug!("Newton system: {}, retrying regularized", e);
            jacobian.add_to_diagonal(REGULARIZATION)?;
            direction
                .iter_mut()
                .zip(stacked.f.iter())
                .for_each(|(d, &f)| *d = -f);
            if let Err(e) = jacobian.solve_in_place(&mut direction) {
                log::debug!("regularized Newton system: {}, using -F", e);
                direction
                    .iter_mut()
                    .zip(stacked.f.iter())
                    .for_each(|(d, &f)| *d = -f);
            }
        }

        jacobian.gemv(1.0, &direction, 0.0, &mut jd);
        let slope: f64 = stacked.f.iter().zip(jd.iter()).map(|(f, j)| f * j).sum();

        r0.copy_from_slice(reaction);
        let (t, ls_iter) = goldstein_price(
            stacked.merit(),
            slope,
            |t| {
                reaction
                    .iter_mut()
                    .zip(r0.iter().zip(direction.iter()))
                    .for_each(|(r, (&r0, &d))| *r = r0 + t * d);
                evaluate_stacked(problem, formulation, &rhos, reaction, &mut trial_u, None)
            },
            options.max_ls_iter,
        );
        log::trace!("line search: t = {:.3e} after {} trials", t, ls_iter);

        reaction
            .iter_mut()
            .zip(r0.iter().zip(direction.iter()))
            .for_each(|(r, (&r0, &d))| *r = r0 + t * d);

        if !is_finite(reaction) {
            break rollback_non_finite(reaction, &r0, iterations, error);
        }

        evaluate_stacked(problem, formulation, &rhos, reaction, velocity, Some(&mut stacked));
        error = compute_error(problem, reaction, velocity, tolerance).error;
        log_debug_stats(iterations, error, reaction, t);
    };

    problem.compute_velocity(reaction, velocity);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::SparseBlockMatrix;
    use approx::assert_relative_eq;

    fn two_contacts_dense() -> na::DMatrix<f64> {
        let mut m = na::DMatrix::<f64>::identity(6, 6) * 2.0;
        m[(0, 3)] = 0.5;
        m[(3, 0)] = 0.5;
        m
    }

    #[test]
    fn both_formulations_converge() -> Result<(), Error> {
        let problem = FrictionContactProblem::new(
            3,
            2,
            two_contacts_dense(),
            vec![-1.0, 0.3, 0.0, -2.0, 0.0, 0.5],
            vec![0.3, 0.6],
        )?;
        for &formulation in [
            NewtonFormulation::AlartCurnier,
            NewtonFormulation::FischerBurmeister,
        ]
        .iter()
        {
            let options = NewtonOptions {
                formulation,
                tolerance: 1e-12,
                ..Default::default()
            };
            let mut r = [0.0; 6];
            let mut u = [0.0; 6];
            let result = solve(&problem, &options, &mut r, &mut u)?;
            assert!(result.is_success(), "{:?}: {}", formulation, result);
        }
        Ok(())
    }

    #[test]
    fn sparse_block_storage_matches_dense() -> Result<(), Error> {
        let dense = two_contacts_dense();
        let sparse = SparseBlockMatrix::from_dense(&dense, 3)?;
        let q = vec![-1.0, 0.3, 0.0, -2.0, 0.0, 0.5];
        let mu = vec![0.3, 0.6];
        let a = FrictionContactProblem::new(3, 2, dense, q.clone(), mu.clone())?;
        let b = FrictionContactProblem::new(3, 2, sparse, q, mu)?;

        let options = NewtonOptions {
            tolerance: 1e-12,
            ..Default::default()
        };
        let (mut ra, mut ua) = ([0.0; 6], [0.0; 6]);
        let (mut rb, mut ub) = ([0.0; 6], [0.0; 6]);
        solve(&a, &options, &mut ra, &mut ua)?;
        solve(&b, &options, &mut rb, &mut ub)?;
        assert_relative_eq!(&ra[..], &rb[..], epsilon = 1e-9);
        Ok(())
    }
}
