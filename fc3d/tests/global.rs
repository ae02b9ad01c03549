mod test_utils;

use approx::assert_relative_eq;
use fc3d::*;
pub use test_utils::*;

/// Two contacts on a chain of three bodies with three degrees of freedom each.
fn chain(sparse: bool) -> GlobalFrictionContactProblem {
    let mut m = na::DMatrix::<f64>::identity(9, 9) * 2.0;
    for i in 0..6 {
        m[(i, i + 3)] = -0.5;
        m[(i + 3, i)] = -0.5;
    }
    let mut h = na::DMatrix::<f64>::zeros(9, 6);
    for k in 0..3 {
        h[(k, k)] = 1.0;
        h[(k + 3, k)] = -1.0;
        h[(k + 3, k + 3)] = 1.0;
        h[(k + 6, k + 3)] = -1.0;
    }
    let q = vec![-1.0, 0.4, 0.0, 0.2, -0.1, 0.3, 0.5, 0.0, -0.2];
    let b = vec![0.0, 0.0, 0.0, -0.1, 0.0, 0.0];
    let mu = vec![0.4, 0.3];
    if sparse {
        GlobalFrictionContactProblem::new(
            2,
            SparseBlockMatrix::from_dense(&m, 3).unwrap(),
            SparseBlockMatrix::from_dense(&h, 3).unwrap(),
            q,
            b,
            mu,
        )
        .unwrap()
    } else {
        GlobalFrictionContactProblem::new(2, m, h, q, b, mu).unwrap()
    }
}

#[test]
fn global_and_reduced_formulations_agree() -> Result<(), Error> {
    init_logger();
    for &sparse in [false, true].iter() {
        for &formulation in [
            NewtonFormulation::AlartCurnier,
            NewtonFormulation::FischerBurmeister,
        ]
        .iter()
        {
            let mut problem = chain(sparse);
            let options = NewtonOptions {
                tolerance: 1e-12,
                formulation,
                ..Default::default()
            };
            let mut v = vec![0.0; 9];
            let mut r = vec![0.0; 6];
            let mut u = vec![0.0; 6];
            let result = solve_global(&mut problem, &options, &mut v, &mut r, &mut u)?;
            assert!(result.is_success(), "{:?}: {}", formulation, result);

            let mut reduced = problem.reduce()?;
            let mut rr = vec![0.0; 6];
            let mut ur = vec![0.0; 6];
            let reduced_result = solve(
                &mut reduced,
                &SolverOptions::Nsgs(NsgsOptions {
                    tolerance: 1e-12,
                    ..Default::default()
                }),
                &mut rr,
                &mut ur,
            )?;
            assert!(reduced_result.is_success(), "{}", reduced_result);

            assert_relative_eq!(&r[..], &rr[..], epsilon = 1e-8);
            assert_relative_eq!(&u[..], &ur[..], epsilon = 1e-8);

            // Returned velocities satisfy both linear relations.
            let mut mv = vec![0.0; 9];
            problem.m().gemv(1.0, &v, 0.0, &mut mv);
            let mut hr = problem.q().to_vec();
            problem.h().gemv(1.0, &r, 1.0, &mut hr);
            assert_relative_eq!(&mv[..], &hr[..], epsilon = 1e-10);
            let mut hv = problem.b().to_vec();
            problem.h().gemv_transpose(1.0, &v, 1.0, &mut hv);
            assert_relative_eq!(&hv[..], &u[..], epsilon = 1e-10);
        }
    }
    Ok(())
}

#[test]
fn global_sizes_are_checked() {
    let mut problem = chain(false);
    let mut v = vec![0.0; 8];
    let mut r = vec![0.0; 6];
    let mut u = vec![0.0; 6];
    assert!(matches!(
        solve_global(
            &mut problem,
            &NewtonOptions::default(),
            &mut v,
            &mut r,
            &mut u
        ),
        Err(Error::SizeMismatch)
    ));
}
