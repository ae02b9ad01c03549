//! Drivers that split the Coulomb problem into simpler subproblems.
//!
//! Both alternate between fixing the friction thresholds `Rᵢ = μᵢ rₙᵢ` from the current normal
//! reactions and solving the resulting problem with fixed thresholds.

use na::{Vector2, Vector3};

use crate::convergence::compute_error;
use crate::matrix::CONTACT_BLOCK_SIZE;
use crate::nsgs::{solve_with_law, FrictionLaw, NsgsWorkspace};
use crate::options::{InnerParams, PanagiotopoulosOptions, TrescaOptions};
use crate::problem::FrictionContactProblem;
use crate::projection::project_on_disk;
use crate::solver::{
    is_finite, log_debug_stats, log_debug_stats_header, rollback_non_finite, SolveResult, Status,
};
use crate::Error;

/// Tresca thresholds `max(0, μᵢ rₙᵢ)` of the current reaction.
fn friction_thresholds(problem: &FrictionContactProblem, reaction: &[f64], radii: &mut [f64]) {
    for ((radius, r), &mu) in radii
        .iter_mut()
        .zip(reaction.chunks_exact(CONTACT_BLOCK_SIZE))
        .zip(problem.mu().iter())
    {
        *radius = (mu * r[0]).max(0.0);
    }
}

/// `(Mr + q)` restricted to one contact.
fn contact_velocity(
    problem: &FrictionContactProblem,
    contact: usize,
    reaction: &[f64],
) -> Vector3<f64> {
    let start = contact * CONTACT_BLOCK_SIZE;
    let mut u = Vector3::from_column_slice(&problem.q()[start..start + CONTACT_BLOCK_SIZE]);
    problem
        .m()
        .row_block_gemv(contact, reaction, u.as_mut_slice(), false);
    u
}

/// Projected Gauss-Seidel on the normal LCP `0 ≤ rₙ ⊥ (Mr + q)ₙ ≥ 0` with tangential
/// reactions held fixed.
///
/// Returns the number of sweeps and the final residual.
fn solve_normal_lcp(
    problem: &FrictionContactProblem,
    diagonal: &[f64],
    params: &InnerParams,
    tolerance: f64,
    reaction: &mut [f64],
) -> (u32, f64) {
    let scale = 1.0 + problem.q_norm();
    let mut residual = f64::INFINITY;
    let mut iterations = 0;
    while iterations < params.max_iter {
        iterations += 1;
        let mut sum = 0.0;
        for (contact, &w_nn) in diagonal.iter().enumerate() {
            let n = contact * CONTACT_BLOCK_SIZE;
            let w = contact_velocity(problem, contact, reaction)[0];
            let rn = reaction[n];
            let natural = rn - (rn - w).max(0.0);
            sum += natural * natural;
            reaction[n] = (rn - w / w_nn).max(0.0);
        }
        residual = sum.sqrt() / scale;
        if residual <= tolerance {
            break;
        }
    }
    (iterations, residual)
}

/// Projected fixed point on the tangential problem with disks of radii `radii` and the normal
/// reactions held fixed.
fn solve_tangent_disks(
    problem: &FrictionContactProblem,
    steps: &[f64],
    radii: &[f64],
    params: &InnerParams,
    tolerance: f64,
    reaction: &mut [f64],
) -> (u32, f64) {
    let scale = 1.0 + problem.q_norm();
    let mut residual = f64::INFINITY;
    let mut iterations = 0;
    while iterations < params.max_iter {
        iterations += 1;
        let mut sum = 0.0;
        for (contact, (&rho, &radius)) in steps.iter().zip(radii.iter()).enumerate() {
            let t = contact * CONTACT_BLOCK_SIZE + 1;
            let u = contact_velocity(problem, contact, reaction);
            let f = Vector2::new(u[1], u[2]);
            let rt = Vector2::new(reaction[t], reaction[t + 1]);

            let mut natural = rt - f;
            project_on_disk(&mut natural, radius);
            sum += (rt - natural).norm_squared();

            let mut next = rt - f * rho;
            project_on_disk(&mut next, radius);
            reaction[t] = next[0];
            reaction[t + 1] = next[1];
        }
        residual = sum.sqrt() / scale;
        if residual <= tolerance {
            break;
        }
    }
    (iterations, residual)
}

/// Solves the problem by alternating a normal LCP and a tangential disk problem.
pub fn solve_panagiotopoulos(
    problem: &FrictionContactProblem,
    options: &PanagiotopoulosOptions,
    reaction: &mut [f64],
    velocity: &mut [f64],
) -> Result<SolveResult, Error> {
    let nc = problem.number_of_contacts();
    let tolerance = options.tolerance;

    // Normal pivots and tangential steps `1/λ_max(sym(W_tt))`.
    let mut diagonal = Vec::with_capacity(nc);
    let mut steps = Vec::with_capacity(nc);
    for contact in 0..nc {
        let w = problem.diagonal_block(contact)?;
        if !(w[(0, 0)] > 0.0) {
            return Err(Error::InvalidParameter {
                name: format!("M[{}] normal pivot", contact),
            });
        }
        diagonal.push(w[(0, 0)]);

        let (a, c) = (w[(1, 1)], w[(2, 2)]);
        let b = 0.5 * (w[(1, 2)] + w[(2, 1)]);
        let lambda_max = 0.5 * (a + c) + (0.25 * (a - c) * (a - c) + b * b).sqrt();
        if !(lambda_max > 0.0) {
            return Err(Error::InvalidParameter {
                name: format!("M[{}] tangent block", contact),
            });
        }
        steps.push(1.0 / lambda_max);
    }

    let mut radii = vec![0.0; nc];
    let mut error = compute_error(problem, reaction, velocity, tolerance).error;
    let mut previous = reaction.to_vec();
    let mut iterations = 0;

    log_debug_stats_header("inner");
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
        previous.copy_from_slice(reaction);

        let normal_tolerance = options.tolerance_strategy.inner_tolerance(
            error,
            tolerance,
            nc,
            options.normal.tolerance,
        );
        let (normal_iterations, normal_residual) =
            solve_normal_lcp(problem, &diagonal, &options.normal, normal_tolerance, reaction);
        log::trace!(
            "normal LCP: {} sweeps, residual {:.3e}",
            normal_iterations,
            normal_residual
        );

        friction_thresholds(problem, reaction, &mut radii);

        let tangent_tolerance = options.tolerance_strategy.inner_tolerance(
            error,
            tolerance,
            nc,
            options.tangent.tolerance,
        );
        let (tangent_iterations, tangent_residual) = solve_tangent_disks(
            problem,
            &steps,
            &radii,
            &options.tangent,
            tangent_tolerance,
            reaction,
        );
        log::trace!(
            "tangent problem: {} iterations, residual {:.3e}",
            tangent_iterations,
            tangent_residual
        );

        if !is_finite(reaction) {
            break rollback_non_finite(reaction, &previous, iterations, error);
        }

        error = compute_error(problem, reaction, velocity, tolerance).error;
        log_debug_stats(
            iterations,
            error,
            reaction,
            (normal_iterations + tangent_iterations) as f64,
        );
    };

    problem.compute_velocity(reaction, velocity);
    Ok(result)
}

/// Solves the Coulomb problem as a fixed point on Tresca problems with thresholds
/// `μᵢ rₙᵢ`, each solved with NSGS.
pub fn solve_tresca_fixed_point(
    problem: &FrictionContactProblem,
    options: &TrescaOptions,
    reaction: &mut [f64],
    velocity: &mut [f64],
) -> Result<SolveResult, Error> {
    let nc = problem.number_of_contacts();
    let tolerance = options.tolerance;

    let mut internal = options.internal.clone();
    let mut ws = NsgsWorkspace::new(nc, internal.shuffle);
    let mut radii = vec![0.0; nc];
    let mut error = compute_error(problem, reaction, velocity, tolerance).error;
    let mut previous = reaction.to_vec();
    let mut iterations = 0;

    log_debug_stats_header("inner");
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
        previous.copy_from_slice(reaction);

        friction_thresholds(problem, reaction, &mut radii);
        internal.tolerance = options.tolerance_strategy.inner_tolerance(
            error,
            tolerance,
            nc,
            options.internal.tolerance,
        );

        let inner = solve_with_law(
            problem,
            &internal,
            FrictionLaw::Tresca(&radii),
            &mut ws,
            reaction,
            velocity,
        )?;

        if inner.status == Status::NanDetected || !is_finite(reaction) {
            break rollback_non_finite(reaction, &previous, iterations, error);
        }

        error = compute_error(problem, reaction, velocity, tolerance).error;
        log_debug_stats(iterations, error, reaction, inner.iterations as f64);
    };

    problem.compute_velocity(reaction, velocity);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn normal_lcp_of_decoupled_contacts() {
        let problem = two_contacts();
        let mut r = [0.0; 6];
        let params = InnerParams::default();
        let (iterations, residual) = solve_normal_lcp(&problem, &[1.0, 1.0], &params, 1e-12, &mut r);
        // Exact after one sweep, confirmed by the second.
        assert_eq!(iterations, 2);
        assert_eq!(residual, 0.0);
        assert_eq!(r, [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn tangent_disks_saturate() {
        let problem = two_contacts();
        let mut r = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        let params = InnerParams::default();
        solve_tangent_disks(&problem, &[1.0, 1.0], &[0.5, 0.5], &params, 1e-12, &mut r);
        assert_relative_eq!(&r[..], &[1.0, 0.0, 0.0, 1.0, -0.5, 0.0][..], epsilon = 1e-14);
    }

    #[test]
    fn panagiotopoulos_on_decoupled_contacts() -> Result<(), Error> {
        let problem = two_contacts();
        let options = PanagiotopoulosOptions {
            tolerance: 1e-12,
            ..Default::default()
        };
        let mut r = [0.0; 6];
        let mut u = [0.0; 6];
        let result = solve_panagiotopoulos(&problem, &options, &mut r, &mut u)?;
        assert!(result.is_success(), "{}", result);
        assert_relative_eq!(&r[..], &[1.0, 0.0, 0.0, 1.0, -0.5, 0.0][..], epsilon = 1e-10);
        Ok(())
    }
}
