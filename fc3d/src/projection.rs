//! Projections onto the friction cone and the Tresca cylinder.
//!
//! Vectors are laid out as `(normal, tangent₁, tangent₂)`.

use na::{Vector2, Vector3};

/// Which part of the cone a projected point ended up on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConeRegion {
    Interior,
    Apex,
    Boundary,
}

/// Projects `r` onto the Coulomb cone `{rₙ ≥ 0, ‖rₜ‖ ≤ μ rₙ}` and reports which region the
/// projection lies in.
pub fn project_on_cone_with_region(r: &mut Vector3<f64>, mu: f64) -> ConeRegion {
    let rn = r[0];
    let norm_t = r.fixed_rows::<2>(1).norm();
    if rn >= 0.0 && norm_t <= mu * rn {
        ConeRegion::Interior
    } else if mu * norm_t <= -rn {
        r.fill(0.0);
        ConeRegion::Apex
    } else {
        let mu2 = mu * mu;
        let rn_new = (mu * norm_t + rn) / (mu2 + 1.0);
        r[0] = rn_new;
        // norm_t > μ rₙ ≥ -norm_t/μ implies norm_t > 0 here.
        let scale = mu * rn_new / norm_t;
        r[1] *= scale;
        r[2] *= scale;
        ConeRegion::Boundary
    }
}

/// Projects `r` onto the Coulomb cone with friction coefficient `mu`.
#[inline]
pub fn project_on_cone(r: &mut Vector3<f64>, mu: f64) {
    project_on_cone_with_region(r, mu);
}

/// Projects `r` onto the positive cylinder `{rₙ ≥ 0, ‖rₜ‖ ≤ R}`.
pub fn project_on_cylinder(r: &mut Vector3<f64>, radius: f64) {
    r[0] = r[0].max(0.0);
    let mut t = Vector2::new(r[1], r[2]);
    project_on_disk(&mut t, radius);
    r[1] = t[0];
    r[2] = t[1];
}

/// Projects the tangential vector `t` onto the disk of radius `radius`.
///
/// A non-positive radius collapses the disk to the origin.
pub fn project_on_disk(t: &mut Vector2<f64>, radius: f64) {
    let radius = radius.max(0.0);
    let norm = t.norm();
    if norm > radius {
        if norm > 0.0 {
            *t *= radius / norm;
        } else {
            t.fill(0.0);
        }
    }
}

/// Modified velocity `(uₙ + μ‖uₜ‖, uₜ)`.
#[inline]
pub fn desaxce_velocity(u: &Vector3<f64>, mu: f64) -> Vector3<f64> {
    Vector3::new(u[0] + mu * u.fixed_rows::<2>(1).norm(), u[1], u[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::prelude::*;

    fn in_cone(r: &Vector3<f64>, mu: f64) -> bool {
        r[0] >= 0.0 && r.fixed_rows::<2>(1).norm() <= mu * r[0] + 1e-12
    }

    #[test]
    fn cone_regions() {
        let mut r = Vector3::new(1.0, 0.1, 0.2);
        assert_eq!(project_on_cone_with_region(&mut r, 0.5), ConeRegion::Interior);
        assert_eq!(r, Vector3::new(1.0, 0.1, 0.2));

        let mut r = Vector3::new(-1.0, 0.1, 0.0);
        assert_eq!(project_on_cone_with_region(&mut r, 0.5), ConeRegion::Apex);
        assert_eq!(r, Vector3::zeros());

        let mut r = Vector3::new(0.0, 1.0, 0.0);
        assert_eq!(project_on_cone_with_region(&mut r, 1.0), ConeRegion::Boundary);
        assert_relative_eq!(r, Vector3::new(0.5, 0.5, 0.0), max_relative = 1e-14);
    }

    #[test]
    fn degenerate_cone_points() {
        // Apex with zero tangential part.
        let mut r = Vector3::zeros();
        project_on_cone(&mut r, 0.3);
        assert_eq!(r, Vector3::zeros());

        // Zero friction projects onto the normal axis.
        let mut r = Vector3::new(2.0, 1.0, -1.0);
        project_on_cone(&mut r, 0.0);
        assert_eq!(r, Vector3::new(2.0, 0.0, 0.0));

        let mut r = Vector3::new(-2.0, 0.0, 0.0);
        assert_eq!(project_on_cone_with_region(&mut r, 0.0), ConeRegion::Apex);
        assert_eq!(r, Vector3::zeros());

        let mut r = Vector3::new(-2.0, 0.5, 0.0);
        project_on_cone(&mut r, 0.0);
        assert_eq!(r, Vector3::zeros());

        // A negative normal part is never interior, even with a degenerate cone.
        let mut r = Vector3::new(-1e-300, 0.0, 0.0);
        assert_eq!(project_on_cone_with_region(&mut r, 0.7), ConeRegion::Apex);
        assert_eq!(r, Vector3::zeros());
    }

    #[test]
    fn cone_projection_is_feasible_and_idempotent() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let mu = rng.gen_range(0.0..2.0);
            let mut r = Vector3::from_fn(|_, _| rng.gen_range(-10.0..10.0));
            project_on_cone(&mut r, mu);
            assert!(in_cone(&r, mu), "{:?} not in cone with μ = {}", r, mu);
            let mut r2 = r;
            project_on_cone(&mut r2, mu);
            assert_relative_eq!(r, r2, max_relative = 1e-12, epsilon = 1e-14);
        }
    }

    #[test]
    fn cone_projection_is_closest_point() {
        // The residual of a boundary projection is orthogonal to the projected point.
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let mu = rng.gen_range(0.1..2.0);
            let r = Vector3::from_fn(|_, _| rng.gen_range(-5.0..5.0));
            let mut p = r;
            project_on_cone(&mut p, mu);
            assert!((r - p).dot(&p).abs() < 1e-10);
        }
    }

    #[test]
    fn cylinder_projection() {
        let mut r = Vector3::new(-1.0, 3.0, 4.0);
        project_on_cylinder(&mut r, 1.0);
        assert_relative_eq!(r, Vector3::new(0.0, 0.6, 0.8), max_relative = 1e-14);

        let mut r = Vector3::new(2.0, 0.0, 0.0);
        project_on_cylinder(&mut r, 0.0);
        assert_eq!(r, Vector3::new(2.0, 0.0, 0.0));

        let mut r = Vector3::new(2.0, 0.1, 0.0);
        project_on_cylinder(&mut r, 1.0);
        assert_eq!(r, Vector3::new(2.0, 0.1, 0.0));

        let mut t = Vector2::new(1.0, 1.0);
        project_on_disk(&mut t, -1.0);
        assert_eq!(t, Vector2::zeros());
    }

    #[test]
    fn modified_velocity() {
        let u = Vector3::new(-1.0, 3.0, 4.0);
        assert_relative_eq!(desaxce_velocity(&u, 0.5), Vector3::new(1.5, 3.0, 4.0));
    }
}
