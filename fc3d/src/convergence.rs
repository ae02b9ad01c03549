//! The error measure shared by all drivers.
//!
//! Every driver calls [`compute_error`] before declaring convergence so that tolerances are
//! comparable between strategies.

use na::Vector3;

use crate::local::LocalProblem;
use crate::matrix::CONTACT_BLOCK_SIZE;
use crate::problem::{Friction, FrictionContactProblem};
use crate::projection::{desaxce_velocity, project_on_cone, project_on_cylinder};

/// The error of a global `(r, u)` pair together with a convergence flag.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ErrorEstimate {
    pub error: f64,
    pub converged: bool,
}

/// Squared projection residual of a single contact with unit step.
#[inline]
fn coulomb_residual_squared(r: &Vector3<f64>, u: &Vector3<f64>, mu: f64) -> f64 {
    let mut p = r - desaxce_velocity(u, mu);
    project_on_cone(&mut p, mu);
    (r - p).norm_squared()
}

#[inline]
fn tresca_residual_squared(r: &Vector3<f64>, u: &Vector3<f64>, radius: f64) -> f64 {
    let mut p = r - u;
    project_on_cylinder(&mut p, radius);
    (r - p).norm_squared()
}

/// Unnormalized residual of a single local problem.
pub fn local_error(problem: &LocalProblem, r: &Vector3<f64>) -> f64 {
    let u = problem.velocity(r);
    let squared = match problem.friction {
        Friction::Coulomb(mu) => coulomb_residual_squared(r, &u, mu),
        Friction::Tresca(radius) => tresca_residual_squared(r, &u, radius),
    };
    squared.sqrt()
}

fn accumulate<F>(reaction: &[f64], velocity: &[f64], q_norm: f64, mut residual: F) -> f64
where
    F: FnMut(usize, &Vector3<f64>, &Vector3<f64>) -> f64,
{
    let sum: f64 = reaction
        .chunks_exact(CONTACT_BLOCK_SIZE)
        .zip(velocity.chunks_exact(CONTACT_BLOCK_SIZE))
        .enumerate()
        .map(|(i, (r, u))| {
            residual(
                i,
                &Vector3::from_column_slice(r),
                &Vector3::from_column_slice(u),
            )
        })
        .sum();

    let error = sum.sqrt() / (q_norm + 1.0);
    debug_assert!(!error.is_nan(), "error is NaN");
    error
}

/// Coulomb error of a pair `(r, u)` that already satisfies the velocity equation.
pub(crate) fn coulomb_error(mu: &[f64], reaction: &[f64], velocity: &[f64], q_norm: f64) -> f64 {
    accumulate(reaction, velocity, q_norm, |i, r, u| {
        coulomb_residual_squared(r, u, mu[i])
    })
}

fn estimate(error: f64, tolerance: f64) -> ErrorEstimate {
    ErrorEstimate {
        error,
        converged: error <= tolerance,
    }
}

/// Recomputes `u = Mr + q` and returns `√Σᵢ‖rᵢ - Π(rᵢ - ũᵢ)‖² / (‖q‖ + 1)`.
///
/// `ũᵢ` is the modified velocity `(uₙ + μ‖uₜ‖, uₜ)` and `Π` the projection onto the Coulomb
/// cone. The error is zero exactly at solutions.
pub fn compute_error(
    problem: &FrictionContactProblem,
    reaction: &[f64],
    velocity: &mut [f64],
    tolerance: f64,
) -> ErrorEstimate {
    problem.compute_velocity(reaction, velocity);
    let error = coulomb_error(problem.mu(), reaction, velocity, problem.q_norm());
    estimate(error, tolerance)
}

/// Same as [`compute_error`] for a Tresca problem with per contact thresholds `radii`.
pub fn compute_error_tresca(
    problem: &FrictionContactProblem,
    reaction: &[f64],
    velocity: &mut [f64],
    radii: &[f64],
    tolerance: f64,
) -> ErrorEstimate {
    problem.compute_velocity(reaction, velocity);
    let error = accumulate(reaction, velocity, problem.q_norm(), |i, r, u| {
        tresca_residual_squared(r, u, radii[i])
    });
    estimate(error, tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::DenseMatrix;
    use approx::assert_relative_eq;

    fn two_contacts() -> FrictionContactProblem {
        FrictionContactProblem::new(
            3,
            2,
            na::DMatrix::<f64>::identity(6, 6),
            vec![-1.0, 0.0, 0.0, -1.0, 0.6, 0.0],
            vec![0.5, 0.5],
        )
        .unwrap()
    }

    #[test]
    fn vanishes_at_the_solution() {
        let problem = two_contacts();
        let r = [1.0, 0.0, 0.0, 1.0, -0.5, 0.0];
        let mut u = [0.0; 6];
        let estimate = compute_error(&problem, &r, &mut u, 1e-12);
        assert!(estimate.converged);
        assert_relative_eq!(estimate.error, 0.0, epsilon = 1e-15);
        assert_relative_eq!(&u[..], &[0.0, 0.0, 0.0, 0.0, 0.1, 0.0][..], epsilon = 1e-15);
    }

    #[test]
    fn normalized_by_q() {
        let problem = two_contacts();
        let r = [0.0; 6];
        let mut u = [0.0; 6];
        let estimate = compute_error(&problem, &r, &mut u, 1e-4);
        assert!(!estimate.converged);
        // Each contact contributes the projection of -ũ onto the cone.
        let mut p1 = -desaxce_velocity(&Vector3::new(-1.0, 0.0, 0.0), 0.5);
        project_on_cone(&mut p1, 0.5);
        let mut p2 = -desaxce_velocity(&Vector3::new(-1.0, 0.6, 0.0), 0.5);
        project_on_cone(&mut p2, 0.5);
        let expected = (p1.norm_squared() + p2.norm_squared()).sqrt() / (problem.q_norm() + 1.0);
        assert_relative_eq!(estimate.error, expected, epsilon = 1e-15);
    }

    #[test]
    fn invariant_to_contact_order() {
        let problem = two_contacts();
        let swapped = FrictionContactProblem::new(
            3,
            2,
            DenseMatrix::new(na::DMatrix::identity(6, 6)),
            vec![-1.0, 0.6, 0.0, -1.0, 0.0, 0.0],
            vec![0.5, 0.5],
        )
        .unwrap();
        let r = [0.3, 0.1, -0.2, 0.7, 0.05, 0.1];
        let r_swapped = [0.7, 0.05, 0.1, 0.3, 0.1, -0.2];
        let mut u = [0.0; 6];
        let a = compute_error(&problem, &r, &mut u, 0.0).error;
        let b = compute_error(&swapped, &r_swapped, &mut u, 0.0).error;
        assert_relative_eq!(a, b, epsilon = 1e-15);
    }

    #[test]
    fn tresca_error() {
        let problem = two_contacts();
        let r = [1.0, 0.0, 0.0, 1.0, -0.3, 0.0];
        let mut u = [0.0; 6];
        let estimate = compute_error_tresca(&problem, &r, &mut u, &[0.3, 0.3], 1e-12);
        assert!(estimate.converged, "{:?}", estimate);
    }
}
