//! Solvers for a single contact.
//!
//! The outer drivers build a [`LocalProblem`] for one contact at a time from the current
//! global reactions and hand it to [`solve_local`] together with the configured
//! [`LocalSolver`].

mod alart_curnier;
mod fischer_burmeister;
mod glocker;
pub(crate) mod newton;
pub(crate) mod projection;
mod quartic;

pub use alart_curnier::alart_curnier_function;
pub use fischer_burmeister::fischer_burmeister_function;
pub use glocker::GlockerContext;
pub use newton::{goldstein_price, NonsmoothJacobian};
pub use projection::{
    projection_on_cylinder_step, projection_step, projection_with_diagonalization,
    projection_with_local_iteration, LocalProjection,
};
pub use quartic::solve_quartic;

use na::{Matrix3, Vector3};

use crate::convergence::local_error;
use crate::options::{LocalSolver, NewtonFormulation};
use crate::problem::Friction;
use crate::Error;

/// The reduced problem `u = W r + q` of a single contact.
///
/// `q` already includes the contributions of all other contacts.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LocalProblem {
    pub w: Matrix3<f64>,
    pub q: Vector3<f64>,
    pub friction: Friction,
}

impl LocalProblem {
    pub fn coulomb(w: Matrix3<f64>, q: Vector3<f64>, mu: f64) -> Self {
        LocalProblem {
            w,
            q,
            friction: Friction::Coulomb(mu),
        }
    }

    pub fn tresca(w: Matrix3<f64>, q: Vector3<f64>, radius: f64) -> Self {
        LocalProblem {
            w,
            q,
            friction: Friction::Tresca(radius),
        }
    }

    #[inline]
    pub fn velocity(&self, r: &Vector3<f64>) -> Vector3<f64> {
        self.w * r + self.q
    }

    fn friction_coefficient(&self, solver: &'static str) -> Result<f64, Error> {
        match self.friction {
            Friction::Coulomb(mu) => Ok(mu),
            Friction::Tresca(_) => Err(Error::IncompatibleLocalSolver {
                solver,
                friction: self.friction.name(),
            }),
        }
    }

    fn threshold(&self, solver: &'static str) -> Result<f64, Error> {
        match self.friction {
            Friction::Tresca(radius) => Ok(radius),
            Friction::Coulomb(_) => Err(Error::IncompatibleLocalSolver {
                solver,
                friction: self.friction.name(),
            }),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LocalStatus {
    Success,
    MaximumIterationsExceeded,
    /// A non-positive pivot or diagonal entry prevented the update.
    Singular,
    /// None of the enumerated branches is feasible.
    NoFeasibleBranch,
    NanDetected,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LocalSolveResult {
    pub iterations: u32,
    /// Local error after the solve.
    pub error: f64,
    pub status: LocalStatus,
}

impl LocalSolveResult {
    pub fn is_success(&self) -> bool {
        self.status == LocalStatus::Success
    }
}

impl std::fmt::Display for LocalSolveResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Per contact state kept between sweeps.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ContactCache {
    /// Step length adapted by the local iteration projections. Non-positive when unset.
    pub rho: f64,
}

/// Solves the local problem with the given solver, updating `r` in place.
///
/// Errors are reserved for configuration problems such as a cone solver given a Tresca
/// problem. Numerical failures are reported through [`LocalStatus`].
pub fn solve_local(
    solver: &LocalSolver,
    problem: &LocalProblem,
    r: &mut Vector3<f64>,
    cache: &mut ContactCache,
) -> Result<LocalSolveResult, Error> {
    let name = solver.name();
    let mut result = match *solver {
        LocalSolver::Projection => {
            let mu = problem.friction_coefficient(name)?;
            projection_step(problem, r, LocalProjection::Cone(mu))
        }
        LocalSolver::ProjectionWithDiagonalization => {
            let mu = problem.friction_coefficient(name)?;
            projection_with_diagonalization(problem, r, mu)
        }
        LocalSolver::ProjectionWithLocalIteration {
            max_iter,
            tolerance,
        } => {
            let mu = problem.friction_coefficient(name)?;
            projection_with_local_iteration(
                problem,
                r,
                LocalProjection::Cone(mu),
                max_iter,
                tolerance,
                cache,
            )
        }
        LocalSolver::ProjectionOnCylinder => {
            let radius = problem.threshold(name)?;
            projection_on_cylinder_step(problem, r, radius)
        }
        LocalSolver::ProjectionOnCylinderWithLocalIteration {
            max_iter,
            tolerance,
        } => {
            let radius = problem.threshold(name)?;
            projection_with_local_iteration(
                problem,
                r,
                LocalProjection::Cylinder(radius),
                max_iter,
                tolerance,
                cache,
            )
        }
        LocalSolver::AlartCurnier(params) => {
            let mu = problem.friction_coefficient(name)?;
            newton::solve_local_newton(problem, mu, r, NewtonFormulation::AlartCurnier, &params)
        }
        LocalSolver::FischerBurmeister(params) => {
            let mu = problem.friction_coefficient(name)?;
            newton::solve_local_newton(
                problem,
                mu,
                r,
                NewtonFormulation::FischerBurmeister,
                &params,
            )
        }
        LocalSolver::Quartic => {
            let mu = problem.friction_coefficient(name)?;
            solve_quartic(problem, mu, r)
        }
        LocalSolver::NcpGlocker(params) => {
            let mu = problem.friction_coefficient(name)?;
            GlockerContext::new(problem, mu).solve(r, &params)
        }
    };

    if r.iter().any(|x| !x.is_finite()) {
        debug_assert!(false, "non-finite local reaction {:?}", r);
        result.status = LocalStatus::NanDetected;
    }
    Ok(result)
}

/// Builds a result with the local error of `r`, marking it successful when the error is
/// below `tolerance`.
pub(crate) fn finish(
    problem: &LocalProblem,
    r: &Vector3<f64>,
    iterations: u32,
    tolerance: f64,
) -> LocalSolveResult {
    let error = local_error(problem, r);
    LocalSolveResult {
        iterations,
        error,
        status: if error <= tolerance {
            LocalStatus::Success
        } else {
            LocalStatus::MaximumIterationsExceeded
        },
    }
}
