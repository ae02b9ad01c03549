//! Proximal point regularization.
//!
//! Each outer iteration solves the better conditioned problem
//! `(M + αI) r + (q - α r_old)` with an internal solver, then measures the error of the
//! unperturbed problem.

use std::ops::{Deref, DerefMut};

use crate::convergence::compute_error;
use crate::matrix::Matrix;
use crate::options::{Alpha, ProximalOptions};
use crate::problem::FrictionContactProblem;
use crate::solver::{dispatch, is_finite, log_debug_stats, log_debug_stats_header, SolveResult, Status};
use crate::Error;

/// Smallest tolerance handed to the internal solver.
const MIN_INNER_TOLERANCE: f64 = 1e-14;

/// Replaces `M` by `M + αI` and optionally `q` by `q - α r_old` for the lifetime of the guard.
///
/// The original values are moved back into the problem on drop, so every exit path restores
/// the problem exactly.
struct Regularized<'a> {
    problem: &'a mut FrictionContactProblem,
    m: Option<Matrix>,
    q: Option<Vec<f64>>,
}

impl<'a> Regularized<'a> {
    fn new(
        problem: &'a mut FrictionContactProblem,
        alpha: f64,
        reaction_old: Option<&[f64]>,
    ) -> Result<Self, Error> {
        let mut m = problem.m.clone();
        m.add_to_diagonal(alpha)?;
        let original_m = std::mem::replace(&mut problem.m, m);

        let original_q = reaction_old.map(|r_old| {
            let q: Vec<f64> = problem
                .q
                .iter()
                .zip(r_old.iter())
                .map(|(&q, &r)| q - alpha * r)
                .collect();
            std::mem::replace(&mut problem.q, q)
        });

        Ok(Regularized {
            problem,
            m: Some(original_m),
            q: original_q,
        })
    }
}

impl Deref for Regularized<'_> {
    type Target = FrictionContactProblem;
    fn deref(&self) -> &Self::Target {
        self.problem
    }
}

impl DerefMut for Regularized<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.problem
    }
}

impl Drop for Regularized<'_> {
    fn drop(&mut self) {
        if let Some(m) = self.m.take() {
            self.problem.m = m;
        }
        if let Some(q) = self.q.take() {
            self.problem.q = q;
        }
    }
}

/// Solves the problem with proximal point iterations around the configured internal solver.
pub fn solve(
    problem: &mut FrictionContactProblem,
    options: &ProximalOptions,
    reaction: &mut [f64],
    velocity: &mut [f64],
) -> Result<SolveResult, Error> {
    let tolerance = options.tolerance;
    let mut internal = (*options.internal).clone();

    let mut error = compute_error(problem, reaction, velocity, tolerance).error;
    let mut alpha = match options.alpha {
        Alpha::Fixed(alpha) => alpha,
        Alpha::Adaptive { sigma, nu } => sigma * error.powf(nu),
    };
    if !(alpha > 0.0) || !alpha.is_finite() {
        if error <= tolerance {
            return Ok(SolveResult {
                iterations: 0,
                error,
                status: Status::Success,
            });
        }
        return Err(Error::InvalidParameter {
            name: "alpha".to_string(),
        });
    }

    let mut reaction_old = vec![0.0; reaction.len()];
    let mut iterations = 0;
    let mut internal_iterations = 0;

    log_debug_stats_header("alpha");
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

        reaction_old.copy_from_slice(reaction);
        internal.set_tolerance((alpha * error).max(MIN_INNER_TOLERANCE));

        let internal_result = {
            let shift = if options.only_regularization {
                None
            } else {
                Some(reaction_old.as_slice())
            };
            let mut regularized = Regularized::new(problem, alpha, shift)?;
            dispatch(&mut regularized, &internal, reaction, velocity)
        }?;
        internal_iterations += internal_result.iterations;

        if !is_finite(reaction) {
            reaction.copy_from_slice(&reaction_old);
            break SolveResult {
                iterations,
                error: compute_error(problem, reaction, velocity, tolerance).error,
                status: Status::NanDetected,
            };
        }

        error = compute_error(problem, reaction, velocity, tolerance).error;
        log_debug_stats(iterations, error, reaction, alpha);

        if let Alpha::Adaptive { sigma, nu } = options.alpha {
            alpha = if options.only_regularization {
                alpha / 10.0
            } else if !internal_result.is_success() {
                log::trace!("internal solver failed: {}", internal_result);
                alpha * 10.0
            } else {
                sigma * error.powf(nu)
            };
            if !(alpha > 0.0) {
                // The error vanished, the next check terminates.
                alpha = f64::MIN_POSITIVE;
            }
        }
    };

    log::debug!("Proximal internal iterations: {}", internal_iterations);
    problem.compute_velocity(reaction, velocity);
    Ok(result)
}
