//! Projection fixed point methods on the whole problem.
//!
//! Both methods iterate on `r ← Π_K(r - ρ ũ(Mr + q))` where `ũ` is the modified velocity and
//! `K` the product of the friction cones. The extra-gradient method adds a corrector step
//! evaluated at the predicted reaction.
//!
//! With an adaptive `ρ`, each step is searched by shrinking `ρ` by [`TAU`] until
//! `ρ‖ū - u‖ ≤ L‖r̄ - r‖` and is grown by `1/`[`TAU_MIN`] when the ratio falls below
//! [`L_MIN`] while the error decreases.

use na::Vector3;

use crate::convergence::compute_error;
use crate::local::projection::{L, L_MIN, MAX_LS_ITER, TAU, TAU_MIN};
use crate::matrix::CONTACT_BLOCK_SIZE;
use crate::options::{FixedPointOptions, Rho};
use crate::problem::FrictionContactProblem;
use crate::projection::{desaxce_velocity, project_on_cone};
use crate::solver::{
    is_finite, log_debug_stats, log_debug_stats_header, rollback_non_finite, SolveResult, Status,
};
use crate::Error;

/// Writes `Π_K(r - ρ ũ(u))` into `out`.
fn projected_step(mu: &[f64], reaction: &[f64], velocity: &[f64], rho: f64, out: &mut [f64]) {
    for (((r, u), o), &mu) in reaction
        .chunks_exact(CONTACT_BLOCK_SIZE)
        .zip(velocity.chunks_exact(CONTACT_BLOCK_SIZE))
        .zip(out.chunks_exact_mut(CONTACT_BLOCK_SIZE))
        .zip(mu.iter())
    {
        let r = Vector3::from_column_slice(r);
        let u = Vector3::from_column_slice(u);
        let mut p = r - desaxce_velocity(&u, mu) * rho;
        project_on_cone(&mut p, mu);
        o.copy_from_slice(p.as_slice());
    }
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Method {
    ExtraGradient,
    DeSaxce,
}

/// Iterates shared between both methods.
struct Workspace {
    /// Predicted reaction `r̄`.
    r_bar: Vec<f64>,
    /// `Mr̄ + q`.
    u_bar: Vec<f64>,
    r_prev: Vec<f64>,
}

impl Workspace {
    fn new(n: usize) -> Self {
        Workspace {
            r_bar: vec![0.0; n],
            u_bar: vec![0.0; n],
            r_prev: vec![0.0; n],
        }
    }
}

/// Performs one iteration with the given fixed step.
fn fixed_step(
    problem: &FrictionContactProblem,
    method: Method,
    rho: f64,
    ws: &mut Workspace,
    reaction: &mut [f64],
    velocity: &mut [f64],
) {
    problem.compute_velocity(reaction, velocity);
    match method {
        Method::DeSaxce => {
            projected_step(problem.mu(), reaction, velocity, rho, &mut ws.r_bar);
            reaction.copy_from_slice(&ws.r_bar);
        }
        Method::ExtraGradient => {
            projected_step(problem.mu(), reaction, velocity, rho, &mut ws.r_bar);
            problem.compute_velocity(&ws.r_bar, &mut ws.u_bar);
            ws.r_prev.copy_from_slice(reaction);
            projected_step(problem.mu(), &ws.r_prev, &ws.u_bar, rho, reaction);
        }
    }
}

/// Performs one iteration with a searched step starting from `rho`.
///
/// Returns the accepted step and whether the step may be enlarged.
fn adaptive_step(
    problem: &FrictionContactProblem,
    method: Method,
    rho: f64,
    ws: &mut Workspace,
    reaction: &mut [f64],
    velocity: &mut [f64],
) -> (f64, bool) {
    problem.compute_velocity(reaction, velocity);

    let mut rho_k = rho;
    let mut ratio_small = false;
    for ls in 0..=MAX_LS_ITER {
        projected_step(problem.mu(), reaction, velocity, rho_k, &mut ws.r_bar);
        problem.compute_velocity(&ws.r_bar, &mut ws.u_bar);
        let a1 = distance(&ws.u_bar, velocity);
        let a2 = distance(&ws.r_bar, reaction);
        ratio_small = rho_k * a1 < L_MIN * a2;
        if rho_k * a1 <= L * a2 || ls == MAX_LS_ITER {
            break;
        }
        rho_k *= TAU;
    }

    match method {
        Method::DeSaxce => reaction.copy_from_slice(&ws.r_bar),
        Method::ExtraGradient => {
            ws.r_prev.copy_from_slice(reaction);
            projected_step(problem.mu(), &ws.r_prev, &ws.u_bar, rho_k, reaction);
        }
    }
    (rho_k, ratio_small)
}

fn solve_fixed_point(
    problem: &FrictionContactProblem,
    options: &FixedPointOptions,
    method: Method,
    reaction: &mut [f64],
    velocity: &mut [f64],
) -> Result<SolveResult, Error> {
    let (mut rho, adaptive) = match options.rho {
        Rho::Fixed(rho) => (rho, false),
        Rho::Adaptive(rho) => (rho, true),
    };
    if !(rho > 0.0) || !rho.is_finite() {
        return Err(Error::InvalidParameter {
            name: "rho".to_string(),
        });
    }

    let tolerance = options.tolerance;
    let mut ws = Workspace::new(problem.size());
    let mut error = compute_error(problem, reaction, velocity, tolerance).error;
    let mut previous = reaction.to_vec();
    let mut iterations = 0;

    log_debug_stats_header("rho");
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

        let error_k = error;
        previous.copy_from_slice(reaction);
        if adaptive {
            let (rho_k, ratio_small) =
                adaptive_step(problem, method, rho, &mut ws, reaction, velocity);
            error = compute_error(problem, reaction, velocity, tolerance).error;
            rho = if ratio_small && error < error_k {
                rho_k / TAU_MIN
            } else {
                rho_k
            };
        } else {
            fixed_step(problem, method, rho, &mut ws, reaction, velocity);
            error = compute_error(problem, reaction, velocity, tolerance).error;
        }

        if !is_finite(reaction) {
            break rollback_non_finite(reaction, &previous, iterations, error_k);
        }

        log_debug_stats(iterations, error, reaction, rho);
    };

    problem.compute_velocity(reaction, velocity);
    Ok(result)
}

/// Solves the problem with the extra-gradient projection method.
pub fn solve_extra_gradient(
    problem: &FrictionContactProblem,
    options: &FixedPointOptions,
    reaction: &mut [f64],
    velocity: &mut [f64],
) -> Result<SolveResult, Error> {
    solve_fixed_point(problem, options, Method::ExtraGradient, reaction, velocity)
}

/// Solves the problem with De Saxcé's fixed point projection.
pub fn solve_desaxce(
    problem: &FrictionContactProblem,
    options: &FixedPointOptions,
    reaction: &mut [f64],
    velocity: &mut [f64],
) -> Result<SolveResult, Error> {
    solve_fixed_point(problem, options, Method::DeSaxce, reaction, velocity)
}
