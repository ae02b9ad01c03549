mod test_utils;

use std::path::PathBuf;

use fc3d::io::*;
use fc3d::*;
pub use test_utils::*;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("fc3d-{}-{}", std::process::id(), name))
}

fn assert_same_problem(a: &FrictionContactProblem, b: &FrictionContactProblem) {
    assert_eq!(a.dimension(), b.dimension());
    assert_eq!(a.number_of_contacts(), b.number_of_contacts());
    assert_eq!(a.m().storage_name(), b.m().storage_name());
    assert_eq!(a.m().to_dense(), b.m().to_dense());
    assert_eq!(a.q(), b.q());
    assert_eq!(a.mu(), b.mu());
}

#[test]
fn text_round_trip() -> Result<(), Error> {
    let problems = [
        random_problem(4, 3),
        coupled_problem(),
        coupled_problem_sparse(),
        empty_problem(),
        empty_problem_sparse(),
    ];
    for problem in problems.iter() {
        let mut buf = Vec::new();
        write_problem(problem, &mut buf)?;
        let read = read_problem(buf.as_slice())?;
        // Shortest round trip formatting reads back bit for bit.
        assert_same_problem(problem, &read);
    }
    Ok(())
}

#[test]
fn text_file_round_trip() -> Result<(), Error> {
    let problem = coupled_problem_sparse();
    let path = temp_path("problem.dat");
    save_problem(&problem, &path)?;
    let read = load_problem(&path)?;
    std::fs::remove_file(&path)?;
    assert_same_problem(&problem, &read);
    Ok(())
}

#[test]
fn snapshot_round_trip() -> Result<(), Error> {
    for problem in [coupled_problem(), coupled_problem_sparse()].iter() {
        let path = temp_path(&format!("snapshot-{}.bin", problem.m().storage_name().len()));
        save_problem_snapshot(problem, &path)?;
        let read = load_problem_snapshot(&path)?;
        std::fs::remove_file(&path)?;
        assert_same_problem(problem, &read);

        // Derived caches are rebuilt after loading.
        assert_eq!(problem.m().to_csc().nnz(), read.m().to_csc().nnz());
    }
    Ok(())
}

#[test]
fn missing_file() {
    assert!(matches!(
        load_problem(temp_path("does-not-exist.dat")),
        Err(Error::FileIOError { .. })
    ));
    assert!(matches!(
        load_solver_options(temp_path("does-not-exist.ron")),
        Err(LoadConfigError::IO(_))
    ));
}

#[test]
fn solver_options_from_ron() -> Result<(), Error> {
    let text = r#"
        Proximal((
            max_iter: 50,
            tolerance: 1e-8,
            alpha: Adaptive(sigma: 5.0, nu: 1.0),
            internal: Nsgs((
                max_iter: 100,
                tolerance: 1e-6,
                local_solver: ProjectionWithLocalIteration(max_iter: 20, tolerance: 1e-12),
                error_evaluation: Full,
                shuffle: Once(seed: Some(3)),
            )),
            only_regularization: false,
        ))
    "#;
    let path = temp_path("options.ron");
    std::fs::write(&path, text)?;
    let options = load_solver_options(&path).expect("valid options file");
    std::fs::remove_file(&path)?;

    assert_eq!(options, parse_solver_options(text)?);
    match &options {
        SolverOptions::Proximal(o) => {
            assert_eq!(o.max_iter, 50);
            assert_eq!(o.tolerance, 1e-8);
            match &*o.internal {
                SolverOptions::Nsgs(nsgs) => {
                    assert_eq!(nsgs.shuffle, Shuffle::Once { seed: Some(3) });
                    assert_eq!(nsgs.relaxation, None);
                    assert_eq!(
                        nsgs.local_solver,
                        LocalSolver::ProjectionWithLocalIteration {
                            max_iter: 20,
                            tolerance: 1e-12
                        }
                    );
                }
                other => panic!("unexpected internal solver {:?}", other),
            }
        }
        other => panic!("unexpected options {:?}", other),
    }

    // The loaded configuration drives a solve.
    let mut problem = coupled_problem();
    let mut r = vec![0.0; 9];
    let mut u = vec![0.0; 9];
    let result = solve(&mut problem, &options, &mut r, &mut u)?;
    assert!(result.is_success(), "{}", result);
    Ok(())
}

#[test]
fn malformed_ron_is_a_config_error() {
    assert!(matches!(
        parse_solver_options("Nsgs((max_iter: ))"),
        Err(Error::ConfigError { .. })
    ));
}
