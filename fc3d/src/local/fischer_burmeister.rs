use na::{Matrix3, Vector2, Vector3};

use super::NonsmoothJacobian;

/// Shift added to the spectral values when the square root lies on the cone boundary.
const SINGULAR_SHIFT: f64 = 1e-14;

/// The Jordan algebra arrow matrix `L(v) = [[v₀, v̄ᵀ], [v̄, v₀I]]`.
fn arrow(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(v[0], v[1], v[2], v[1], v[0], 0.0, v[2], 0.0, v[0])
}

/// Jordan algebra square root of `w = (w₀, w̄)` on the second order cone.
fn soc_sqrt(w0: f64, w_bar: &Vector2<f64>) -> Vector3<f64> {
    let norm = w_bar.norm();
    let l1 = (w0 - norm).max(0.0).sqrt();
    let l2 = (w0 + norm).max(0.0).sqrt();
    let dir = if norm > 0.0 {
        w_bar / norm
    } else {
        Vector2::zeros()
    };
    let z_bar = dir * (0.5 * (l2 - l1));
    Vector3::new(0.5 * (l1 + l2), z_bar[0], z_bar[1])
}

/// Scalar Fischer-Burmeister function for frictionless contacts.
fn frictionless(r: &Vector3<f64>, u: &Vector3<f64>) -> NonsmoothJacobian {
    let s = r[0].hypot(u[0]);
    let f = Vector3::new(r[0] + u[0] - s, r[1], r[2]);
    let mut a = Matrix3::zeros();
    let mut b = Matrix3::identity();
    if s > 0.0 {
        b[(0, 0)] = 1.0 - r[0] / s;
        a[(0, 0)] = 1.0 - u[0] / s;
    } else {
        b[(0, 0)] = 1.0 - std::f64::consts::FRAC_1_SQRT_2;
        a[(0, 0)] = 1.0 - std::f64::consts::FRAC_1_SQRT_2;
    }
    NonsmoothJacobian { f, a, b }
}

/// Second order cone Fischer-Burmeister function with a generalized Jacobian.
///
/// With `x = (μrₙ, rₜ)` and `y = (uₙ + μ‖uₜ‖, μuₜ)`, `F = x + y - (x² + y²)^½` where the square
/// and square root are taken in the Jordan algebra of the second order cone.
pub fn fischer_burmeister_function(r: &Vector3<f64>, u: &Vector3<f64>, mu: f64) -> NonsmoothJacobian {
    if mu == 0.0 {
        return frictionless(r, u);
    }

    let ut = Vector2::new(u[1], u[2]);
    let norm_ut = ut.norm();
    let x = Vector3::new(mu * r[0], r[1], r[2]);
    let y = Vector3::new(u[0] + mu * norm_ut, mu * u[1], mu * u[2]);

    let w0 = x.norm_squared() + y.norm_squared();
    let w_bar = (Vector2::new(x[1], x[2]) * x[0] + Vector2::new(y[1], y[2]) * y[0]) * 2.0;

    let z = soc_sqrt(w0, &w_bar);
    let f = x + y - z;

    let lz_inv = arrow(&z).try_inverse().or_else(|| {
        let z = soc_sqrt(w0 + SINGULAR_SHIFT, &w_bar);
        arrow(&z).try_inverse()
    });

    let (a, b) = match lz_inv {
        Some(lz_inv) => {
            let dx = Matrix3::identity() - lz_inv * arrow(&x);
            let dy = Matrix3::identity() - lz_inv * arrow(&y);

            let mut yu = Matrix3::from_diagonal(&Vector3::new(1.0, mu, mu));
            if norm_ut > 0.0 {
                yu[(0, 1)] = mu * u[1] / norm_ut;
                yu[(0, 2)] = mu * u[2] / norm_ut;
            }
            let xr = Matrix3::from_diagonal(&Vector3::new(mu, 1.0, 1.0));
            (dy * yu, dx * xr)
        }
        // Only reachable at x = y = 0 with a vanishing shift.
        None => (
            Matrix3::identity() * (1.0 - std::f64::consts::FRAC_1_SQRT_2),
            Matrix3::identity() * (1.0 - std::f64::consts::FRAC_1_SQRT_2),
        ),
    };

    NonsmoothJacobian { f, a, b }
}
