use na::{Matrix3, Vector3};

use super::{LocalProblem, LocalSolveResult, LocalStatus};
use super::{alart_curnier_function, fischer_burmeister_function};
use crate::convergence::local_error;
use crate::options::{LocalNewtonParams, NewtonFormulation};

/// Determinant magnitude below which the Newton matrix is treated as singular.
pub(crate) const SINGULAR_DETERMINANT: f64 = 1e-7;

/// Goldstein-Price sufficient decrease parameters.
const M1: f64 = 0.01;
const M2: f64 = 0.99;

/// Value and generalized Jacobian of a non-smooth contact function `F(r, u)`.
///
/// `a = ∂F/∂u` and `b = ∂F/∂r`, so the Jacobian with respect to `r` for `u = Wr + q` is
/// `a W + b`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NonsmoothJacobian {
    pub f: Vector3<f64>,
    pub a: Matrix3<f64>,
    pub b: Matrix3<f64>,
}

impl NonsmoothJacobian {
    pub fn jacobian(&self, w: &Matrix3<f64>) -> Matrix3<f64> {
        self.a * w + self.b
    }

    /// Merit value `½‖F‖²`.
    #[inline]
    pub fn merit(&self) -> f64 {
        0.5 * self.f.norm_squared()
    }
}

pub(crate) fn evaluate(
    formulation: NewtonFormulation,
    r: &Vector3<f64>,
    u: &Vector3<f64>,
    mu: f64,
    rho: f64,
) -> NonsmoothJacobian {
    match formulation {
        NewtonFormulation::AlartCurnier => alart_curnier_function(r, u, mu, rho),
        NewtonFormulation::FischerBurmeister => fischer_burmeister_function(r, u, mu),
    }
}

/// Goldstein-Price line search on a merit function `φ(t)`.
///
/// `phi0` is `φ(0)` and `slope` is the directional derivative at `t = 0`. The step grows by a
/// factor of 10 until the upper bound is bracketed and is then bisected. A non-descent slope
/// takes the full step. Returns the step and the number of trials.
///
/// When the trials run out, the largest tried step with sufficient decrease is returned, or the
/// last tried step if none decreased enough. Only evaluated steps are ever returned.
pub fn goldstein_price<F>(phi0: f64, slope: f64, mut phi: F, max_iter: u32) -> (f64, u32)
where
    F: FnMut(f64) -> f64,
{
    if !(slope < 0.0) {
        return (1.0, 0);
    }

    let mut t = 1.0;
    let mut t_min = 0.0;
    let mut t_max = f64::INFINITY;
    let mut last_tried = 1.0;
    let mut iter = 0;
    while iter < max_iter {
        iter += 1;
        last_tried = t;
        let value = phi(t);
        if !value.is_finite() || value > phi0 + M1 * t * slope {
            t_max = t;
        } else if value < phi0 + M2 * t * slope {
            t_min = t;
        } else {
            return (t, iter);
        }
        t = if t_max.is_infinite() {
            10.0 * t
        } else {
            0.5 * (t_min + t_max)
        };
    }
    if t_min > 0.0 {
        (t_min, iter)
    } else {
        (last_tried, iter)
    }
}

/// Generalized Newton method on the local Alart-Curnier or Fischer-Burmeister function.
pub fn solve_local_newton(
    problem: &LocalProblem,
    mu: f64,
    r: &mut Vector3<f64>,
    formulation: NewtonFormulation,
    params: &LocalNewtonParams,
) -> LocalSolveResult {
    let w = &problem.w;
    let rho = match params.rho {
        Some(rho) => rho,
        None if w[(0, 0)] > 0.0 => 1.0 / w[(0, 0)],
        None => {
            return LocalSolveResult {
                iterations: 0,
                error: f64::INFINITY,
                status: LocalStatus::Singular,
            }
        }
    };

    let eval = |r: &Vector3<f64>| evaluate(formulation, r, &problem.velocity(r), mu, rho);

    let mut current = eval(&*r);
    let mut iterations = 0;
    while current.f.norm() > params.tolerance && iterations < params.max_iter {
        iterations += 1;
        let jac = current.jacobian(w);

        let direction = if jac.determinant().abs() < SINGULAR_DETERMINANT {
            -current.f
        } else {
            match jac.try_inverse() {
                Some(inv) => -(inv * current.f),
                None => -current.f,
            }
        };

        let slope = current.f.dot(&(jac * direction));
        let r0 = *r;
        let (t, _) = goldstein_price(
            current.merit(),
            slope,
            |t| eval(&(r0 + direction * t)).merit(),
            params.max_ls_iter,
        );
        *r = r0 + direction * t;
        let next = eval(&*r);

        if next.f.iter().any(|x| !x.is_finite()) || r.iter().any(|x| !x.is_finite()) {
            *r = r0;
            return LocalSolveResult {
                iterations,
                error: local_error(problem, r),
                status: LocalStatus::NanDetected,
            };
        }
        current = next;
    }

    LocalSolveResult {
        iterations,
        error: local_error(problem, r),
        status: if current.f.norm() <= params.tolerance {
            LocalStatus::Success
        } else {
            LocalStatus::MaximumIterationsExceeded
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn line_search_accepts_exact_quadratic_step() {
        // φ(t) = ½(1 - t)², the full Newton step satisfies both conditions.
        let (t, iters) = goldstein_price(0.5, -1.0, |t| 0.5 * (1.0 - t) * (1.0 - t), 10);
        assert_eq!(t, 1.0);
        assert_eq!(iters, 1);
    }

    #[test]
    fn line_search_brackets_and_bisects() {
        // Minimum at t = 0.01, far below the initial trial.
        let phi = |t: f64| 0.5 * (1.0 - 100.0 * t).powi(2);
        let (t, _) = goldstein_price(0.5, -100.0, phi, 100);
        assert!(phi(t) <= 0.5 - M1 * t * 100.0);
        assert!(t < 1.0);

        // Minimum at t = 500 needs expansion first.
        let phi = |t: f64| 0.5 * (1.0 - t / 500.0).powi(2);
        let (t, _) = goldstein_price(0.5, -1.0 / 500.0, phi, 100);
        assert!(t > 1.0);
    }

    #[test]
    fn exhausted_line_search_returns_a_tried_step() {
        // Never decreases: the last (smallest) trial is returned.
        let mut tried = Vec::new();
        let (t, iters) = goldstein_price(
            0.0,
            -1.0,
            |t| {
                tried.push(t);
                1.0
            },
            3,
        );
        assert_eq!(iters, 3);
        assert_eq!(tried, vec![1.0, 0.5, 0.25]);
        assert_eq!(t, 0.25);

        // Linear decrease keeps expanding: the largest step with sufficient decrease is kept.
        let mut tried = Vec::new();
        let (t, _) = goldstein_price(
            0.0,
            -1.0,
            |t| {
                tried.push(t);
                -t
            },
            3,
        );
        assert_eq!(tried, vec![1.0, 10.0, 100.0]);
        assert_eq!(t, 100.0);
    }

    #[test]
    fn non_descent_direction_takes_full_step() {
        assert_eq!(goldstein_price(1.0, 0.0, |_| 2.0, 10), (1.0, 0));
    }

    #[test]
    fn singular_newton_matrix_falls_back_to_residual() {
        // Zero W makes the sticking Alart-Curnier Jacobian singular.
        let problem = LocalProblem::coulomb(Matrix3::zeros(), Vector3::new(-1.0, 0.0, 0.0), 0.5);
        let mut r = Vector3::zeros();
        let params = LocalNewtonParams {
            rho: Some(1.0),
            max_iter: 5,
            ..Default::default()
        };
        let result =
            solve_local_newton(&problem, 0.5, &mut r, NewtonFormulation::AlartCurnier, &params);
        assert!(r.iter().all(|x| x.is_finite()));
        assert_ne!(result.status, LocalStatus::NanDetected);
    }

    #[test]
    fn user_rho_is_respected() {
        let problem = LocalProblem::coulomb(Matrix3::identity(), Vector3::new(-1.0, 0.6, 0.0), 0.5);
        let mut r = Vector3::zeros();
        let params = LocalNewtonParams {
            rho: Some(0.3),
            ..Default::default()
        };
        let result =
            solve_local_newton(&problem, 0.5, &mut r, NewtonFormulation::AlartCurnier, &params);
        assert!(result.is_success(), "{}", result);
        assert_relative_eq!(r, Vector3::new(1.0, -0.5, 0.0), epsilon = 1e-10);
    }
}
