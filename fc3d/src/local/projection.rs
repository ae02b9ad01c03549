use na::Vector3;

use super::{finish, ContactCache, LocalProblem, LocalSolveResult, LocalStatus};
use crate::convergence::local_error;
use crate::projection::{desaxce_velocity, project_on_cone, project_on_cylinder};

/// Parameters of the local step length search.
pub(crate) const TAU: f64 = 0.6;
pub(crate) const TAU_MIN: f64 = 0.7;
pub(crate) const L: f64 = 0.9;
pub(crate) const L_MIN: f64 = 0.3;
pub(crate) const MAX_LS_ITER: u32 = 10;

/// Convex set and velocity used by a projection step.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LocalProjection {
    /// Coulomb cone with the modified velocity `(uₙ + μ‖uₜ‖, uₜ)`.
    Cone(f64),
    /// Tresca cylinder of the given radius with the plain velocity.
    Cylinder(f64),
}

impl LocalProjection {
    fn step(&self, r: &Vector3<f64>, u: &Vector3<f64>, rho: f64) -> Vector3<f64> {
        match *self {
            LocalProjection::Cone(mu) => {
                let mut p = r - desaxce_velocity(u, mu) * rho;
                project_on_cone(&mut p, mu);
                p
            }
            LocalProjection::Cylinder(radius) => {
                let mut p = r - u * rho;
                project_on_cylinder(&mut p, radius);
                p
            }
        }
    }
}

fn singular() -> LocalSolveResult {
    LocalSolveResult {
        iterations: 0,
        error: f64::INFINITY,
        status: LocalStatus::Singular,
    }
}

/// A single projection step `r ← Π(r - ρũ(r))` with `ρ = 1/W₀₀`.
pub fn projection_step(
    problem: &LocalProblem,
    r: &mut Vector3<f64>,
    projection: LocalProjection,
) -> LocalSolveResult {
    let w00 = problem.w[(0, 0)];
    if !(w00 > 0.0) {
        return singular();
    }
    let u = problem.velocity(r);
    *r = projection.step(r, &u, 1.0 / w00);
    LocalSolveResult {
        iterations: 1,
        error: local_error(problem, r),
        status: LocalStatus::Success,
    }
}

/// Projection step onto the Tresca cylinder.
pub fn projection_on_cylinder_step(
    problem: &LocalProblem,
    r: &mut Vector3<f64>,
    radius: f64,
) -> LocalSolveResult {
    projection_step(problem, r, LocalProjection::Cylinder(radius))
}

/// Solves each component against the diagonal of `W` only, then caps the tangential part.
///
/// Off diagonal entries of `W` are moved to the right hand side using the current `r`.
pub fn projection_with_diagonalization(
    problem: &LocalProblem,
    r: &mut Vector3<f64>,
    mu: f64,
) -> LocalSolveResult {
    let w = &problem.w;
    let diag = w.diagonal();
    let q = problem.q + (w * *r - diag.component_mul(r));

    if q[0] > 0.0 {
        r.fill(0.0);
    } else {
        if diag.iter().any(|&d| d < f64::EPSILON) {
            return singular();
        }
        *r = -q.component_div(&diag);
        let norm_t = r.fixed_rows::<2>(1).norm();
        if norm_t > mu * r[0] {
            let scale = mu * r[0] / norm_t;
            r[1] *= scale;
            r[2] *= scale;
        }
    }

    LocalSolveResult {
        iterations: 1,
        error: local_error(problem, r),
        status: LocalStatus::Success,
    }
}

/// Repeated projection steps with an adaptive step length.
///
/// Each trial step `ρₖ = ρτˡ` is accepted when `ρₖ‖u(r) - u(rₖ)‖ ≤ L‖r - rₖ‖`. The step grows
/// by `1/τ_min` when the stricter `L_min` test passes and the error decreased. The adapted step
/// is stored in `cache` for the next visit of this contact.
pub fn projection_with_local_iteration(
    problem: &LocalProblem,
    r: &mut Vector3<f64>,
    projection: LocalProjection,
    max_iter: u32,
    tolerance: f64,
    cache: &mut ContactCache,
) -> LocalSolveResult {
    let w00 = problem.w[(0, 0)];
    if cache.rho <= 0.0 {
        if !(w00 > 0.0) {
            return singular();
        }
        cache.rho = 1.0 / w00;
    }
    let mut rho = cache.rho;

    let mut error = local_error(problem, r);
    let mut iterations = 0;
    while error > tolerance && iterations < max_iter {
        iterations += 1;
        let error_k = error;
        let r_k = *r;
        let u_k = problem.velocity(&r_k);

        let mut rho_k = rho;
        let mut du = 0.0;
        let mut dr = 0.0;
        for ls in 0..MAX_LS_ITER {
            rho_k = rho * TAU.powi(ls as i32);
            *r = projection.step(&r_k, &u_k, rho_k);
            let u = problem.velocity(r);
            du = (u_k - u).norm();
            dr = (r_k - *r).norm();
            if rho_k * du <= L * dr {
                break;
            }
        }

        error = local_error(problem, r);
        rho = if rho_k * du < L_MIN * dr && error < error_k {
            rho_k / TAU_MIN
        } else {
            rho_k
        };
        log::trace!("local iteration {}: rho = {:.3e}, error = {:.3e}", iterations, rho, error);
    }
    cache.rho = rho;

    finish(problem, r, iterations, tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use na::Matrix3;

    #[test]
    fn diagonalization_take_off_and_cap() {
        let lp = LocalProblem::coulomb(Matrix3::identity(), Vector3::new(1.0, 0.5, 0.0), 0.5);
        let mut r = Vector3::new(1.0, 1.0, 1.0);
        projection_with_diagonalization(&lp, &mut r, 0.5);
        assert_eq!(r, Vector3::zeros());

        let lp = LocalProblem::coulomb(
            Matrix3::from_diagonal(&Vector3::new(2.0, 1.0, 1.0)),
            Vector3::new(-2.0, 3.0, 4.0),
            0.5,
        );
        let mut r = Vector3::zeros();
        projection_with_diagonalization(&lp, &mut r, 0.5);
        assert_relative_eq!(r, Vector3::new(1.0, -0.3, -0.4), max_relative = 1e-14);
    }

    #[test]
    fn diagonalization_rejects_degenerate_diagonal() {
        let lp = LocalProblem::coulomb(
            Matrix3::from_diagonal(&Vector3::new(1.0, 0.0, 1.0)),
            Vector3::new(-1.0, 0.0, 0.0),
            0.5,
        );
        let mut r = Vector3::zeros();
        let result = projection_with_diagonalization(&lp, &mut r, 0.5);
        assert_eq!(result.status, LocalStatus::Singular);
    }

    #[test]
    fn local_iteration_keeps_step_in_cache() {
        let lp = LocalProblem::coulomb(Matrix3::identity() * 2.0, Vector3::new(-1.0, 0.6, 0.0), 0.5);
        let mut r = Vector3::zeros();
        let mut cache = ContactCache::default();
        let result =
            projection_with_local_iteration(&lp, &mut r, LocalProjection::Cone(0.5), 200, 1e-12, &mut cache);
        assert!(result.is_success(), "{}", result);
        assert!(cache.rho > 0.0);
        assert_relative_eq!(r, Vector3::new(0.5, -0.25, 0.0), epsilon = 1e-10);
    }

    #[test]
    fn cylinder_local_iteration() {
        // Sliding at the threshold in the direction opposite to the free velocity.
        let lp = LocalProblem::tresca(Matrix3::identity(), Vector3::new(-1.0, 0.0, 0.8), 0.3);
        let mut r = Vector3::zeros();
        let mut cache = ContactCache::default();
        let result = projection_with_local_iteration(
            &lp,
            &mut r,
            LocalProjection::Cylinder(0.3),
            200,
            1e-12,
            &mut cache,
        );
        assert!(result.is_success(), "{}", result);
        assert_relative_eq!(r, Vector3::new(1.0, 0.0, -0.3), epsilon = 1e-10);
    }
}
