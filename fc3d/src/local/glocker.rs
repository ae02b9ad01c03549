//! Glocker's nonlinear complementarity reformulation of the local Coulomb problem.
//!
//! The friction cone is replaced by an inscribed description in terms of five non-negative
//! unknowns `z = (Pₙ, σ₁, σ₂, k₃, k_D)`, where `σ₁` and `σ₂` are tangential reactions along
//! directions at 120 degrees from each other. The problem becomes the NCP
//! `0 ≤ z ⊥ F(z) ≥ 0` with `F(z) = M_G z + q_G + g(z)`.

use na::{SMatrix, SVector, Vector3};

use super::{finish, LocalProblem, LocalSolveResult, LocalStatus};
use crate::convergence::local_error;
use crate::options::{GlockerMethod, GlockerParams};

type Matrix5 = SMatrix<f64, 5, 5>;
type Vector5 = SVector<f64, 5>;

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Armijo parameter for the Newton backtracking.
const ARMIJO: f64 = 1e-4;
const MAX_BACKTRACKING: u32 = 30;

/// The linear part of the Glocker NCP for one local problem.
///
/// Built once per local solve and consumed by the fixed point or Newton iteration.
#[derive(Clone, Debug)]
pub struct GlockerContext {
    mg: Matrix5,
    qg: Vector5,
    mu: f64,
    problem: LocalProblem,
}

impl GlockerContext {
    pub fn new(problem: &LocalProblem, mu: f64) -> Self {
        let w = &problem.w;
        let q = &problem.q;
        let s = SQRT_3 / 3.0;

        let mut mg = Matrix5::zeros();
        mg[(0, 0)] = w[(0, 0)] + 2.0 * mu * w[(0, 2)];
        mg[(0, 1)] = -w[(0, 2)] - s * w[(0, 1)];
        mg[(0, 2)] = s * w[(0, 1)] - w[(0, 2)];

        mg[(1, 0)] = -w[(2, 0)] - s * w[(1, 0)] - 2.0 * mu * w[(2, 2)] - 2.0 * s * mu * w[(1, 2)];
        mg[(1, 1)] = w[(2, 2)] + w[(1, 1)] / 3.0 + s * (w[(2, 1)] + w[(1, 2)]);
        mg[(1, 2)] = w[(2, 2)] - w[(1, 1)] / 3.0 - s * (w[(2, 1)] - w[(1, 2)]);
        mg[(1, 3)] = 1.0;

        mg[(2, 0)] = -w[(2, 0)] + s * w[(1, 0)] - 2.0 * mu * w[(2, 2)] + 2.0 * s * mu * w[(1, 2)];
        mg[(2, 1)] = w[(2, 2)] - w[(1, 1)] / 3.0 + s * (w[(2, 1)] - w[(1, 2)]);
        mg[(2, 2)] = w[(2, 2)] + w[(1, 1)] / 3.0 - s * (w[(2, 1)] + w[(1, 2)]);
        mg[(2, 3)] = 1.0;

        mg[(3, 0)] = 3.0 * mu;
        mg[(3, 1)] = -1.0;
        mg[(3, 2)] = -1.0;

        let qg = Vector5::new(q[0], -s * q[1] - q[2], s * q[1] - q[2], 0.0, 0.0);

        GlockerContext {
            mg,
            qg,
            mu,
            problem: *problem,
        }
    }

    /// Maps a reaction to the Glocker unknowns, clamped to the non-negative orthant.
    fn to_glocker(&self, r: &Vector3<f64>) -> Vector5 {
        let mu_rn = self.mu * r[0];
        Vector5::new(
            r[0],
            mu_rn - 0.5 * SQRT_3 * r[1] - 0.5 * r[2],
            mu_rn + 0.5 * SQRT_3 * r[1] - 0.5 * r[2],
            0.0,
            0.0,
        )
        .map(|x| x.max(0.0))
    }

    fn to_reaction(&self, z: &Vector5) -> Vector3<f64> {
        let t1 = self.mu * z[0] - z[1];
        let t2 = self.mu * z[0] - z[2];
        Vector3::new(z[0], SQRT_3 / 3.0 * (t1 - t2), t1 + t2)
    }

    pub(crate) fn function(&self, z: &Vector5) -> Vector5 {
        let mu = self.mu;
        let mut f = self.mg * z + self.qg;
        f[1] += 4.0 / 3.0 * z[4] * (2.0 * z[1] + z[2] - 3.0 * mu * z[0]);
        f[2] += 4.0 / 3.0 * z[4] * (z[1] + 2.0 * z[2] - 3.0 * mu * z[0]);
        // μ²Pₙ² - ‖rₜ‖²
        f[4] += 4.0 * mu * z[0] * z[1] - 3.0 * mu * mu * z[0] * z[0] + 4.0 * mu * z[0] * z[2]
            - 4.0 / 3.0 * (z[1] * z[1] + z[1] * z[2] + z[2] * z[2]);
        f
    }

    pub(crate) fn jacobian(&self, z: &Vector5) -> Matrix5 {
        let mu = self.mu;
        let m0 = 4.0 * mu * z[0];
        let mut j = self.mg;

        j[(1, 0)] -= 4.0 * mu * z[4];
        j[(1, 1)] += 8.0 / 3.0 * z[4];
        j[(1, 2)] += 4.0 / 3.0 * z[4];
        j[(1, 4)] += 8.0 / 3.0 * z[1] + 4.0 / 3.0 * z[2] - m0;

        j[(2, 0)] -= 4.0 * mu * z[4];
        j[(2, 1)] += 4.0 / 3.0 * z[4];
        j[(2, 2)] += 8.0 / 3.0 * z[4];
        j[(2, 4)] += 4.0 / 3.0 * z[1] + 8.0 / 3.0 * z[2] - m0;

        j[(4, 0)] += 2.0 * mu * (2.0 * z[1] + 2.0 * z[2] - 3.0 * mu * z[0]);
        j[(4, 1)] += m0 - 4.0 / 3.0 * z[2] - 8.0 / 3.0 * z[1];
        j[(4, 2)] += m0 - 8.0 / 3.0 * z[2] - 4.0 / 3.0 * z[1];
        j
    }

    /// Solves the NCP starting from the given reaction and writes the result back into `r`.
    pub fn solve(&self, r: &mut Vector3<f64>, params: &GlockerParams) -> LocalSolveResult {
        let mut z = self.to_glocker(r);
        let iterations = match params.method {
            GlockerMethod::FixedPoint => self.fixed_point(&mut z, params),
            GlockerMethod::Newton => self.newton(&mut z, params),
        };
        match iterations {
            Some(iterations) => {
                *r = self.to_reaction(&z);
                finish(&self.problem, r, iterations, params.tolerance)
            }
            None => LocalSolveResult {
                iterations: 0,
                error: f64::INFINITY,
                status: LocalStatus::Singular,
            },
        }
    }

    fn converged(&self, z: &Vector5, tolerance: f64) -> bool {
        local_error(&self.problem, &self.to_reaction(z)) <= tolerance
    }

    /// Projected iteration `z ← max(0, z - ρF(z))` with `ρ` from the largest diagonal entry.
    fn fixed_point(&self, z: &mut Vector5, params: &GlockerParams) -> Option<u32> {
        let max_diag = self.mg.diagonal().iter().fold(0.0_f64, |m, &d| m.max(d));
        if max_diag <= 0.0 {
            return None;
        }
        let rho = 0.5 / max_diag;

        let mut iterations = 0;
        while iterations < params.max_iter && !self.converged(z, params.tolerance) {
            iterations += 1;
            let f = self.function(z);
            *z = (*z - f * rho).map(|x| x.max(0.0));
        }
        Some(iterations)
    }

    /// Newton iteration on `Φᵢ = zᵢ + Fᵢ - √(zᵢ² + Fᵢ²)` with Armijo backtracking.
    fn newton(&self, z: &mut Vector5, params: &GlockerParams) -> Option<u32> {
        let fb = |z: &Vector5, f: &Vector5| z.zip_map(f, |a, b| a + b - a.hypot(b));
        let diag_coefficient = 1.0 - std::f64::consts::FRAC_1_SQRT_2;

        let mut iterations = 0;
        while iterations < params.max_iter && !self.converged(z, params.tolerance) {
            let f = self.function(z);
            let phi = fb(z, &f);
            let merit = 0.5 * phi.norm_squared();
            if merit.sqrt() < 1e-14 {
                break;
            }
            iterations += 1;

            let j = self.jacobian(z);
            let mut h = Matrix5::zeros();
            for i in 0..5 {
                let s = z[i].hypot(f[i]);
                let (da, db) = if s < 1e-14 {
                    (diag_coefficient, diag_coefficient)
                } else {
                    (1.0 - z[i] / s, 1.0 - f[i] / s)
                };
                h.set_row(i, &(j.row(i) * db));
                h[(i, i)] += da;
            }

            let direction = h.lu().solve(&(-phi)).unwrap_or(-phi);

            let mut t = 1.0;
            let mut next = *z + direction;
            for _ in 0..MAX_BACKTRACKING {
                next = *z + direction * t;
                let phi_next = fb(&next, &self.function(&next));
                if 0.5 * phi_next.norm_squared() <= (1.0 - 2.0 * ARMIJO * t) * merit {
                    break;
                }
                t *= 0.5;
            }
            *z = next;

            if z.iter().any(|x| !x.is_finite()) {
                return None;
            }
        }
        Some(iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use na::Matrix3;

    #[test]
    fn glocker_map_round_trip() {
        let problem = LocalProblem::coulomb(Matrix3::identity(), Vector3::zeros(), 0.5);
        let ctx = GlockerContext::new(&problem, 0.5);
        let r = Vector3::new(1.0, 0.2, -0.3);
        assert_relative_eq!(ctx.to_reaction(&ctx.to_glocker(&r)), r, epsilon = 1e-14);
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let w = Matrix3::new(2.0, 0.3, 0.1, 0.3, 1.5, 0.2, 0.1, 0.2, 1.2);
        let problem = LocalProblem::coulomb(w, Vector3::new(-1.0, 0.7, -0.4), 0.3);
        let ctx = GlockerContext::new(&problem, 0.3);
        let z = Vector5::new(0.7, 0.3, 1.1, 0.2, 0.4);
        let f = ctx.function(&z);
        let j = ctx.jacobian(&z);
        let h = 1e-6;
        for col in 0..5 {
            let mut zp = z;
            zp[col] += h;
            let fd = (ctx.function(&zp) - f) / h;
            assert_relative_eq!(j.column(col).into_owned(), fd, epsilon = 1e-5);
        }
    }

    #[test]
    fn cone_residual_is_the_last_component() {
        let problem = LocalProblem::coulomb(Matrix3::identity(), Vector3::zeros(), 0.4);
        let ctx = GlockerContext::new(&problem, 0.4);
        let r = Vector3::new(1.0, 0.1, 0.2);
        let z = ctx.to_glocker(&r);
        let f = ctx.function(&z);
        let expected = 0.16 * r[0] * r[0] - (r[1] * r[1] + r[2] * r[2]);
        assert_relative_eq!(f[4], expected, epsilon = 1e-14);
    }
}
