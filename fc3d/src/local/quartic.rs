use na::{DMatrix, Vector2, Vector3};

use super::{LocalProblem, LocalSolveResult, LocalStatus};
use crate::convergence::local_error;

/// Relative size below which a leading polynomial coefficient is dropped.
const DEGENERATE_COEFFICIENT: f64 = 1e-14;
/// Relative size of the imaginary part below which an eigenvalue is taken as a real root.
const REAL_ROOT_TOLERANCE: f64 = 1e-8;

/// Real roots of `c[0] tⁿ + c[1] tⁿ⁻¹ + ... + c[n]`.
///
/// Roots are computed as eigenvalues of the companion matrix and polished with a few Newton
/// steps on the polynomial.
fn real_roots(coefficients: &[f64]) -> Vec<f64> {
    let scale = coefficients.iter().fold(0.0_f64, |m, c| m.max(c.abs()));
    if scale == 0.0 {
        return Vec::new();
    }
    let first = coefficients
        .iter()
        .position(|c| c.abs() > DEGENERATE_COEFFICIENT * scale)
        .unwrap_or(coefficients.len());
    let c = &coefficients[first..];
    let degree = c.len().saturating_sub(1);
    if degree == 0 {
        return Vec::new();
    }

    let lead = c[0];
    let mut companion = DMatrix::zeros(degree, degree);
    for j in 0..degree {
        companion[(0, j)] = -c[j + 1] / lead;
    }
    for i in 1..degree {
        companion[(i, i - 1)] = 1.0;
    }

    let eval = |t: f64| {
        c.iter().fold((0.0, 0.0), |(p, dp), &a| (p * t + a, dp * t + p))
    };

    companion
        .complex_eigenvalues()
        .iter()
        .filter(|z| z.im.abs() <= REAL_ROOT_TOLERANCE * (1.0 + z.re.abs()))
        .map(|z| {
            let mut t = z.re;
            for _ in 0..3 {
                let (p, dp) = eval(t);
                if dp == 0.0 {
                    break;
                }
                t -= p / dp;
            }
            if t.is_finite() {
                t
            } else {
                z.re
            }
        })
        .collect()
}

/// Solves the local Coulomb problem exactly by enumerating its branches.
///
/// Candidates are the take-off state `r = 0`, the sticking state `r = -W⁻¹q` and sliding
/// states along tangential directions `d` with `rₜ = -μrₙd`. Sliding directions are
/// parametrized by `t = tan(θ/2)` and are the real roots of a quartic, with the `θ = π`
/// direction checked separately. The feasible candidate with the smallest local error wins.
pub fn solve_quartic(problem: &LocalProblem, mu: f64, r: &mut Vector3<f64>) -> LocalSolveResult {
    let w = &problem.w;
    let q = &problem.q;
    let mut candidates: Vec<Vector3<f64>> = Vec::with_capacity(6);

    if q[0] >= 0.0 {
        candidates.push(Vector3::zeros());
    }

    if let Some(w_inv) = w.try_inverse() {
        let stick = -(w_inv * q);
        if stick[0] >= 0.0 && stick.fixed_rows::<2>(1).norm() <= mu * stick[0] * (1.0 + 1e-12) {
            candidates.push(stick);
        }
    }

    let wnn = w[(0, 0)];
    let c = Vector2::new(w[(0, 1)], w[(0, 2)]);
    let a = Vector2::new(w[(1, 0)], w[(2, 0)]);
    let b = w.fixed_view::<2, 2>(1, 1);
    let qn = q[0];
    let qt = Vector2::new(q[1], q[2]);

    let e = a * -qn + qt * wnn;
    let k = (b * qn - qt * c.transpose()) * mu;
    let coefficients = [
        e[1] - k[(1, 0)],
        2.0 * e[0] - 2.0 * (k[(0, 0)] - k[(1, 1)]),
        4.0 * k[(0, 1)] + 2.0 * k[(1, 0)],
        2.0 * e[0] + 2.0 * (k[(0, 0)] - k[(1, 1)]),
        -e[1] - k[(1, 0)],
    ];

    let mut directions: Vec<Vector2<f64>> = real_roots(&coefficients)
        .into_iter()
        .map(|t| Vector2::new(1.0 - t * t, 2.0 * t) / (1.0 + t * t))
        .collect();
    directions.push(Vector2::new(-1.0, 0.0));

    let alignment_tolerance = 1e-9 * (1.0 + q.norm());
    for d in directions.iter() {
        let denom = wnn - mu * c.dot(d);
        if denom.abs() < 1e-14 {
            continue;
        }
        let rn = -qn / denom;
        if rn <= 0.0 {
            continue;
        }
        let slide = Vector3::new(rn, -mu * rn * d[0], -mu * rn * d[1]);
        let u = problem.velocity(&slide);
        let ut = Vector2::new(u[1], u[2]);
        // The tangential velocity must point along the sliding direction.
        if ut.dot(d) <= 0.0 || (ut[0] * d[1] - ut[1] * d[0]).abs() > alignment_tolerance {
            continue;
        }
        candidates.push(slide);
    }

    let best = candidates
        .into_iter()
        .map(|candidate| (local_error(problem, &candidate), candidate))
        .filter(|(error, _)| error.is_finite())
        .min_by(|x, y| x.0.total_cmp(&y.0));

    match best {
        Some((error, candidate)) => {
            *r = candidate;
            LocalSolveResult {
                iterations: 1,
                error,
                status: LocalStatus::Success,
            }
        }
        None => {
            log::trace!("no feasible quartic branch for q = {:?}", q);
            LocalSolveResult {
                iterations: 1,
                error: local_error(problem, r),
                status: LocalStatus::NoFeasibleBranch,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use na::Matrix3;

    #[test]
    fn roots_of_known_polynomials() {
        // (t - 1)(t + 2)(t² + 1)
        let mut roots = real_roots(&[1.0, 1.0, -1.0, 1.0, -2.0]);
        roots.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(roots.len(), 2);
        assert_relative_eq!(roots[0], -2.0, epsilon = 1e-12);
        assert_relative_eq!(roots[1], 1.0, epsilon = 1e-12);

        // Leading zeros reduce the degree.
        let roots = real_roots(&[0.0, 0.0, 0.0, 2.0, -1.0]);
        assert_eq!(roots.len(), 1);
        assert_relative_eq!(roots[0], 0.5, epsilon = 1e-14);

        assert!(real_roots(&[0.0; 5]).is_empty());
        assert!(real_roots(&[0.0, 0.0, 0.0, 0.0, 3.0]).is_empty());
    }

    #[test]
    fn sliding_in_any_tangential_direction() {
        let w = Matrix3::identity();
        for &(q1, q2) in &[(0.6, 0.0), (-0.6, 0.0), (0.0, 0.6), (0.3, -0.5)] {
            let problem = LocalProblem::coulomb(w, Vector3::new(-1.0, q1, q2), 0.5);
            let mut r = Vector3::zeros();
            let result = solve_quartic(&problem, 0.5, &mut r);
            assert!(result.is_success());
            let qt = Vector2::new(q1, q2);
            let expected = -qt / qt.norm() * 0.5;
            assert_relative_eq!(r[0], 1.0, epsilon = 1e-10);
            assert_relative_eq!(r[1], expected[0], epsilon = 1e-10);
            assert_relative_eq!(r[2], expected[1], epsilon = 1e-10);
            assert!(result.error < 1e-10);
        }
    }
}
