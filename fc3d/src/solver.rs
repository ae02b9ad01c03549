//! Entry points dispatching to the outer drivers.

use std::time::Instant;

use crate::convergence::compute_error;
use crate::options::{NewtonOptions, NsgsOptions, SolverOptions};
use crate::problem::{FrictionContactProblem, GlobalFrictionContactProblem};
use crate::{fixed_point, global_ac, nonsmooth_newton, nsgs, proximal, splitting};
use crate::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Success,
    MaximumIterationsExceeded,
    /// A linear system could not be solved even after the fallback steps.
    LinearSolveError,
    NanDetected,
}

/// Outcome of a solve.
///
/// The returned reaction and velocity satisfy `u = Mr + q` whatever the status.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SolveResult {
    /// Number of outer iterations.
    pub iterations: u32,
    /// Error of the returned solution as computed by [`compute_error`].
    pub error: f64,
    pub status: Status,
}

impl SolveResult {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// `0` on success and `1` otherwise.
    pub fn info(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

impl std::fmt::Display for SolveResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Checks solver combinations before any iteration is attempted.
pub(crate) fn validate_options(options: &SolverOptions) -> Result<(), Error> {
    let check_positive = |name: &str, value: f64| {
        if value.is_finite() && value >= 0.0 {
            Ok(())
        } else {
            Err(Error::InvalidParameter {
                name: name.to_string(),
            })
        }
    };
    check_positive("tolerance", options.tolerance())?;
    let check_relaxation = |nsgs: &NsgsOptions| match nsgs.relaxation {
        Some(omega) if !(omega > 0.0 && omega <= 2.0) => Err(Error::InvalidParameter {
            name: "relaxation".to_string(),
        }),
        _ => Ok(()),
    };

    match options {
        SolverOptions::Nsgs(o) => {
            check_relaxation(o)?;
            if o.local_solver.is_tresca() {
                return Err(Error::IncompatibleLocalSolver {
                    solver: o.local_solver.name(),
                    friction: "Coulomb",
                });
            }
        }
        SolverOptions::Proximal(o) => {
            match *o.internal {
                SolverOptions::Nsgs(_)
                | SolverOptions::ExtraGradient(_)
                | SolverOptions::DeSaxce(_)
                | SolverOptions::NonsmoothNewton(_) => {}
                ref other => {
                    return Err(Error::IncompatibleInternalSolver {
                        outer: options.name(),
                        solver: other.name(),
                    })
                }
            }
            validate_options(&o.internal)?;
        }
        SolverOptions::TrescaFixedPoint(o) => {
            check_relaxation(&o.internal)?;
            if !o.internal.local_solver.is_tresca() {
                return Err(Error::IncompatibleLocalSolver {
                    solver: o.internal.local_solver.name(),
                    friction: "Tresca",
                });
            }
        }
        SolverOptions::ExtraGradient(_)
        | SolverOptions::DeSaxce(_)
        | SolverOptions::Panagiotopoulos(_)
        | SolverOptions::NonsmoothNewton(_) => {}
    }
    Ok(())
}

/// Runs the driver selected by `options` without the trivial problem checks.
pub(crate) fn dispatch(
    problem: &mut FrictionContactProblem,
    options: &SolverOptions,
    reaction: &mut [f64],
    velocity: &mut [f64],
) -> Result<SolveResult, Error> {
    match options {
        SolverOptions::Nsgs(o) => nsgs::solve(problem, o, reaction, velocity),
        SolverOptions::Proximal(o) => proximal::solve(problem, o, reaction, velocity),
        SolverOptions::ExtraGradient(o) => {
            fixed_point::solve_extra_gradient(problem, o, reaction, velocity)
        }
        SolverOptions::DeSaxce(o) => fixed_point::solve_desaxce(problem, o, reaction, velocity),
        SolverOptions::Panagiotopoulos(o) => {
            splitting::solve_panagiotopoulos(problem, o, reaction, velocity)
        }
        SolverOptions::TrescaFixedPoint(o) => {
            splitting::solve_tresca_fixed_point(problem, o, reaction, velocity)
        }
        SolverOptions::NonsmoothNewton(o) => {
            nonsmooth_newton::solve(problem, o, reaction, velocity)
        }
    }
}

/// Solves the frictional contact problem.
///
/// `reaction` holds the initial guess on input and the solution on output. `velocity` receives
/// `Mr + q`. Configuration errors are reported before any iteration. Numerical failures are
/// reported through the returned [`SolveResult`].
///
/// The problem is taken mutably since some strategies temporarily perturb it. It is always
/// restored before returning.
pub fn solve(
    problem: &mut FrictionContactProblem,
    options: &SolverOptions,
    reaction: &mut [f64],
    velocity: &mut [f64],
) -> Result<SolveResult, Error> {
    problem.check_sizes(reaction, velocity)?;
    validate_options(options)?;

    let tolerance = options.tolerance();

    if problem.q().iter().all(|&x| x == 0.0) {
        log::debug!("q is zero, the trivial solution is returned");
        reaction.iter_mut().for_each(|r| *r = 0.0);
        velocity.iter_mut().for_each(|u| *u = 0.0);
        return Ok(SolveResult {
            iterations: 0,
            error: 0.0,
            status: Status::Success,
        });
    }

    if options.max_iter() == 0 {
        let estimate = compute_error(problem, reaction, velocity, tolerance);
        return Ok(SolveResult {
            iterations: 0,
            error: estimate.error,
            status: Status::MaximumIterationsExceeded,
        });
    }

    let t_begin = Instant::now();
    let result = dispatch(problem, options, reaction, velocity)?;
    let solve_time = Instant::now() - t_begin;

    log::info!(
        "{} finished with {:?} after {} iterations, error = {:.3e}",
        options.name(),
        result.status,
        result.iterations,
        result.error
    );
    log::debug!("{} solve time: {}ms", options.name(), solve_time.as_millis());
    Ok(result)
}

/// Solves the frictional contact problem in global coordinates.
///
/// `global_velocity` receives `v = M⁻¹(Hr + q)` and `velocity` receives `u = Hᵀv + b`.
pub fn solve_global(
    problem: &mut GlobalFrictionContactProblem,
    options: &NewtonOptions,
    global_velocity: &mut [f64],
    reaction: &mut [f64],
    velocity: &mut [f64],
) -> Result<SolveResult, Error> {
    problem.check_sizes(global_velocity, reaction, velocity)?;
    if !(options.tolerance.is_finite() && options.tolerance >= 0.0) {
        return Err(Error::InvalidParameter {
            name: "tolerance".to_string(),
        });
    }

    let t_begin = Instant::now();
    let result = global_ac::solve(problem, options, global_velocity, reaction, velocity)?;
    let solve_time = Instant::now() - t_begin;

    log::info!(
        "Global {:?} finished with {:?} after {} iterations, error = {:.3e}",
        options.formulation,
        result.status,
        result.iterations,
        result.error
    );
    log::debug!("Global solve time: {}ms", solve_time.as_millis());
    Ok(result)
}

/*
 * Status print routines shared by the drivers.
 * i      - iteration number
 * error  - error of the current iterate
 * r-2    - 2-norm of the reaction
 * param  - driver specific quantity, named in the header
 */

pub(crate) fn log_debug_stats_header(param: &str) {
    log::debug!("    i |   error    |    r-2     | {:^10} ", param);
    log::debug!("------+------------+------------+------------");
}

pub(crate) fn log_debug_stats(iterations: u32, error: f64, reaction: &[f64], param: f64) {
    log::debug!(
        "{i:>5} | {err:10.3e} | {r:10.3e} | {p:10.3e} ",
        i = iterations,
        err = error,
        r = reaction.iter().map(|x| x * x).sum::<f64>().sqrt(),
        p = param
    );
}

/// Result of an iteration that produced non-finite values.
///
/// The iterate is rolled back to `previous` and `error` is the last one computed for it.
pub(crate) fn rollback_non_finite(
    reaction: &mut [f64],
    previous: &[f64],
    iterations: u32,
    error: f64,
) -> SolveResult {
    log::warn!("non-finite iterate after {} iterations, rolling back", iterations);
    reaction.copy_from_slice(previous);
    SolveResult {
        iterations,
        error,
        status: Status::NanDetected,
    }
}

/// Checks an iterate for non-finite values.
///
/// Fails loudly in debug builds. Release builds report [`Status::NanDetected`] instead.
pub(crate) fn is_finite(values: &[f64]) -> bool {
    let finite = values.iter().all(|x| x.is_finite());
    debug_assert!(finite, "non-finite values in iterate");
    finite
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_iterates_are_rolled_back() {
        let previous = [1.0, 0.2, -0.1];
        let mut reaction = [f64::NAN, 0.0, f64::INFINITY];
        let result = rollback_non_finite(&mut reaction, &previous, 4, 3e-3);
        assert_eq!(reaction, previous);
        assert_eq!(result.status, Status::NanDetected);
        assert_eq!(result.info(), 1);
        assert_eq!(result.iterations, 4);
        assert_eq!(result.error, 3e-3);
    }
}
