#![allow(dead_code)]

use fc3d::*;
use rand::prelude::*;

pub fn init_logger() {
    let _ = env_logger::Builder::from_env("FC3D_LOG")
        .is_test(true)
        .try_init();
}

/// A single contact with `M = I`.
pub fn single_contact(q: [f64; 3], mu: f64) -> FrictionContactProblem {
    FrictionContactProblem::new(3, 1, na::DMatrix::<f64>::identity(3, 3), q.to_vec(), vec![mu]).unwrap()
}

/// Symmetric positive definite coupling matrix of three contacts.
pub fn coupled_matrix() -> na::DMatrix<f64> {
    na::DMatrix::from_fn(9, 9, |i, j| {
        if i == j {
            2.0
        } else {
            let (i, j) = (i as f64, j as f64);
            0.1 * (i + 2.0 * j).cos() + 0.1 * (j + 2.0 * i).cos()
        }
    })
}

/// Three coupled contacts with a unique solution, a mix of sticking and sliding.
pub fn coupled_problem() -> FrictionContactProblem {
    FrictionContactProblem::new(
        3,
        3,
        coupled_matrix(),
        vec![-1.0, 0.3, -0.2, -0.5, 0.1, 0.4, -0.8, -0.6, 0.05],
        vec![0.3, 0.5, 0.2],
    )
    .unwrap()
}

/// Same as [`coupled_problem`] with sparse block storage.
pub fn coupled_problem_sparse() -> FrictionContactProblem {
    let problem = coupled_problem();
    let m = SparseBlockMatrix::from_dense(&coupled_matrix(), 3).unwrap();
    FrictionContactProblem::new(3, 3, m, problem.q().to_vec(), problem.mu().to_vec()).unwrap()
}

/// A problem without contacts.
pub fn empty_problem() -> FrictionContactProblem {
    FrictionContactProblem::new(3, 0, na::DMatrix::<f64>::zeros(0, 0), vec![], vec![]).unwrap()
}

/// Same as [`empty_problem`] with sparse block storage.
pub fn empty_problem_sparse() -> FrictionContactProblem {
    let m = SparseBlockMatrix::from_blocks(&[], &[], Vec::new()).unwrap();
    FrictionContactProblem::new(3, 0, m, vec![], vec![]).unwrap()
}

/// A random well conditioned problem `M = AᵀA/n + I` with compressive `q`.
pub fn random_problem(nc: usize, seed: u64) -> FrictionContactProblem {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = 3 * nc;
    let a = na::DMatrix::<f64>::from_fn(n, n, |_, _| rng.gen_range(-1.0..1.0));
    let m = a.transpose() * &a / n as f64 + na::DMatrix::identity(n, n);
    let q = (0..n)
        .map(|i| {
            if i % 3 == 0 {
                rng.gen_range(-1.0..-0.2)
            } else {
                rng.gen_range(-0.5..0.5)
            }
        })
        .collect();
    let mu = (0..nc).map(|_| rng.gen_range(0.1..0.5)).collect();
    FrictionContactProblem::new(3, nc, m, q, mu).unwrap()
}

/// One configuration of every outer strategy with tight tolerances.
pub fn all_strategies(tolerance: f64) -> Vec<SolverOptions> {
    vec![
        SolverOptions::Nsgs(NsgsOptions {
            tolerance,
            ..Default::default()
        }),
        SolverOptions::Nsgs(NsgsOptions {
            tolerance,
            local_solver: LocalSolver::Quartic,
            error_evaluation: ErrorEvaluation::Incremental,
            shuffle: Shuffle::EachIteration { seed: Some(7) },
            ..Default::default()
        }),
        SolverOptions::Proximal(ProximalOptions {
            tolerance,
            ..Default::default()
        }),
        SolverOptions::ExtraGradient(FixedPointOptions {
            tolerance,
            ..Default::default()
        }),
        SolverOptions::DeSaxce(FixedPointOptions {
            tolerance,
            ..Default::default()
        }),
        SolverOptions::Panagiotopoulos(PanagiotopoulosOptions {
            tolerance,
            ..Default::default()
        }),
        SolverOptions::TrescaFixedPoint(TrescaOptions {
            tolerance,
            ..Default::default()
        }),
        SolverOptions::NonsmoothNewton(NewtonOptions {
            tolerance,
            ..Default::default()
        }),
        SolverOptions::NonsmoothNewton(NewtonOptions {
            tolerance,
            formulation: NewtonFormulation::FischerBurmeister,
            ..Default::default()
        }),
    ]
}

/// `‖u - (Mr + q)‖`.
pub fn velocity_residual(problem: &FrictionContactProblem, r: &[f64], u: &[f64]) -> f64 {
    let mut expected = vec![0.0; u.len()];
    problem.compute_velocity(r, &mut expected);
    expected
        .iter()
        .zip(u.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt()
}
