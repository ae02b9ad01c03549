use super::{SolveResult, Status};

/// BiConjugate Gradient STABilized iteration for unsymmetric systems given through a
/// matrix-vector product.
///
/// Used on left preconditioned sparse block systems, so the preconditioner is expected to be
/// folded into the product and the right-hand side by the caller.
pub struct BiCGSTAB {
    pub max_iter: u32,
    pub tol: f64,
    shadow: na::DVector<f64>,
    p: na::DVector<f64>,
    ap: na::DVector<f64>,
    as_: na::DVector<f64>,
}

impl BiCGSTAB {
    pub fn new(size: usize, max_iter: u32, tol: f64) -> Self {
        BiCGSTAB {
            max_iter,
            tol: f64::EPSILON.max(tol),
            shadow: na::DVector::zeros(size),
            p: na::DVector::zeros(size),
            ap: na::DVector::zeros(size),
            as_: na::DVector::zeros(size),
        }
    }

    /// Solves `Ax = b` starting from the given `x`. `b` is overwritten with the final residual.
    pub fn solve<F>(&mut self, mut matvec: F, x: &mut [f64], b: &mut [f64]) -> SolveResult
    where
        F: FnMut(&[f64], &mut [f64]),
    {
        let BiCGSTAB {
            max_iter,
            tol,
            ref mut shadow,
            ref mut p,
            ref mut ap,
            ref mut as_,
        } = *self;

        debug_assert_eq!(b.len(), x.len());
        debug_assert_eq!(p.len(), x.len());

        let b_norm = b.iter().map(|v| v * v).sum::<f64>().sqrt();
        let mut x = na::DVectorViewMut::from(x);
        let mut r = na::DVectorViewMut::from(b);

        if b_norm == 0.0 {
            x.fill(0.0);
            return SolveResult::default();
        }

        // r = b - Ax
        matvec(x.as_slice(), ap.as_mut_slice());
        r.axpy(-1.0, ap, 1.0);
        shadow.copy_from(&r);
        p.copy_from(&r);

        let mut rho = shadow.dot(&r);
        let mut iterations = 0;
        loop {
            let residual = r.norm();
            let error = residual / b_norm;
            let status = if !residual.is_finite() {
                Some(Status::NanDetected)
            } else if error <= tol {
                Some(Status::Success)
            } else if iterations >= max_iter {
                Some(Status::MaximumIterationsExceeded)
            } else if rho == 0.0 {
                Some(Status::Breakdown)
            } else {
                None
            };
            if let Some(status) = status {
                break SolveResult {
                    iterations,
                    residual,
                    error,
                    status,
                };
            }

            matvec(p.as_slice(), ap.as_mut_slice());
            let shadow_ap = shadow.dot(ap);
            if shadow_ap == 0.0 {
                break SolveResult {
                    iterations,
                    residual,
                    error,
                    status: Status::Breakdown,
                };
            }
            let alpha = rho / shadow_ap;

            // s = r - αAp, stored in r.
            r.axpy(-alpha, ap, 1.0);
            matvec(r.as_slice(), as_.as_mut_slice());
            let as_norm_sq = as_.norm_squared();
            let omega = if as_norm_sq > 0.0 {
                as_.dot(&r) / as_norm_sq
            } else {
                0.0
            };

            x.axpy(alpha, p, 1.0);
            x.axpy(omega, &r, 1.0);
            r.axpy(-omega, as_, 1.0);

            let rho_next = shadow.dot(&r);
            log::trace!("BiCGSTAB iteration {}: |r| = {:e}", iterations, r.norm());
            if omega != 0.0 {
                // p = r + β(p - ωAp)
                let beta = (rho_next / rho) * (alpha / omega);
                p.axpy(-omega, ap, 1.0);
                p.axpy(1.0, &r, beta);
            } else {
                p.copy_from(&r);
            }
            rho = rho_next;
            iterations += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsymmetric_two_by_two() {
        let mtx = [1.0, 2.0, 3.0, 4.0];
        let mut b = vec![5.0, 6.0];
        let mut x = vec![0.0, 0.0];

        let mut solver = BiCGSTAB::new(2, 1000, 1e-10);
        let result = solver.solve(
            |x, out| {
                out[0] = mtx[0] * x[0] + mtx[1] * x[1];
                out[1] = mtx[2] * x[0] + mtx[3] * x[1];
            },
            x.as_mut_slice(),
            b.as_mut_slice(),
        );

        assert_eq!(result.status, Status::Success);
        assert!((x[0] + 4.0).abs() < 1e-6, "expected: -4; actual: {}", x[0]);
        assert!((x[1] - 4.5).abs() < 1e-6, "expected: 4.5; actual: {}", x[1]);
    }

    #[test]
    fn zero_rhs_is_trivial() {
        let mut b = vec![0.0; 3];
        let mut x = vec![1.0; 3];
        let result = BiCGSTAB::new(3, 10, 1e-8).solve(|x, out| out.copy_from_slice(x), &mut x, &mut b);
        assert_eq!(result.iterations, 0);
        assert_eq!(x, vec![0.0; 3]);
    }
}
