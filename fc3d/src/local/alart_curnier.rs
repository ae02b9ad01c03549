use na::{Matrix2, Matrix3, Vector2, Vector3};

use super::NonsmoothJacobian;

/// Alart-Curnier function with its generalized Jacobian.
///
/// ```text
/// Fₙ = rₙ - max(0, rₙ - ρuₙ)
/// Fₜ = rₜ - Π_{D(μ max(0, rₙ - ρuₙ))}(rₜ - ρuₜ)
/// ```
///
/// where `D(R)` is the disk of radius `R`. `F` vanishes exactly at solutions of the local
/// Coulomb problem for any `ρ > 0`.
pub fn alart_curnier_function(
    r: &Vector3<f64>,
    u: &Vector3<f64>,
    mu: f64,
    rho: f64,
) -> NonsmoothJacobian {
    let mut f = Vector3::zeros();
    let mut a = Matrix3::zeros();
    let mut b = Matrix3::zeros();

    let pn = r[0] - rho * u[0];
    if pn > 0.0 {
        f[0] = rho * u[0];
        a[(0, 0)] = rho;
    } else {
        f[0] = r[0];
        b[(0, 0)] = 1.0;
    }

    let radius = mu * pn.max(0.0);
    let rt = Vector2::new(r[1], r[2]);
    let ut = Vector2::new(u[1], u[2]);
    let pt = rt - ut * rho;
    let norm_pt = pt.norm();

    if norm_pt <= radius {
        // Sticking.
        f[1] = rho * u[1];
        f[2] = rho * u[2];
        a[(1, 1)] = rho;
        a[(2, 2)] = rho;
    } else {
        let n = pt / norm_pt;
        let s = radius / norm_pt;
        let proj = Matrix2::identity() - n * n.transpose();

        let ft = rt - n * radius;
        f[1] = ft[0];
        f[2] = ft[1];

        b.fixed_view_mut::<2, 2>(1, 1)
            .copy_from(&(Matrix2::identity() - proj * s));
        a.fixed_view_mut::<2, 2>(1, 1).copy_from(&(proj * (rho * s)));
        if pn > 0.0 {
            b.fixed_view_mut::<2, 1>(1, 0).copy_from(&(n * -mu));
            a.fixed_view_mut::<2, 1>(1, 0).copy_from(&(n * (mu * rho)));
        }
    }

    NonsmoothJacobian { f, a, b }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn finite_difference(
        r: &Vector3<f64>,
        u: &Vector3<f64>,
        mu: f64,
        rho: f64,
    ) -> (Matrix3<f64>, Matrix3<f64>) {
        let h = 1e-7;
        let mut a = Matrix3::zeros();
        let mut b = Matrix3::zeros();
        let f0 = alart_curnier_function(r, u, mu, rho).f;
        for j in 0..3 {
            let mut dr = *r;
            dr[j] += h;
            b.set_column(j, &((alart_curnier_function(&dr, u, mu, rho).f - f0) / h));
            let mut du = *u;
            du[j] += h;
            a.set_column(j, &((alart_curnier_function(r, &du, mu, rho).f - f0) / h));
        }
        (a, b)
    }

    #[test]
    fn vanishes_at_solutions() {
        // Sticking, sliding and take-off states of unit mass contacts.
        let states = [
            (Vector3::new(1.0, 0.0, 0.0), Vector3::zeros()),
            (Vector3::new(1.0, -0.5, 0.0), Vector3::new(0.0, 0.1, 0.0)),
            (Vector3::zeros(), Vector3::new(1.0, 0.6, 0.0)),
        ];
        for (r, u) in states.iter() {
            let jac = alart_curnier_function(r, u, 0.5, 1.0);
            assert_relative_eq!(jac.f, Vector3::zeros(), epsilon = 1e-15);
        }
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let cases = [
            // Sliding with positive normal part.
            (Vector3::new(0.7, 0.4, -0.3), Vector3::new(-0.2, 0.5, 0.1)),
            // Sticking.
            (Vector3::new(1.0, 0.05, 0.0), Vector3::new(-0.5, 0.01, 0.02)),
            // Separated.
            (Vector3::new(-0.2, 0.3, 0.1), Vector3::new(0.5, 0.2, 0.0)),
        ];
        for (r, u) in cases.iter() {
            let jac = alart_curnier_function(r, u, 0.4, 0.8);
            let (a, b) = finite_difference(r, u, 0.4, 0.8);
            assert_relative_eq!(jac.a, a, epsilon = 1e-5);
            assert_relative_eq!(jac.b, b, epsilon = 1e-5);
        }
    }
}
