//! Non-smooth Gauss-Seidel.
//!
//! Contacts are visited one at a time. Each visit builds the local problem from the latest
//! reactions of all other contacts, so updates within a sweep are seen immediately.

use na::Vector3;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::convergence::{compute_error, compute_error_tresca, ErrorEstimate};
use crate::local::{solve_local, ContactCache, LocalStatus};
use crate::matrix::CONTACT_BLOCK_SIZE;
use crate::options::{ErrorEvaluation, NsgsOptions, Shuffle};
use crate::problem::{Friction, FrictionContactProblem};
use crate::solver::{is_finite, log_debug_stats, log_debug_stats_header, SolveResult, Status};
use crate::Error;

/// Seed used for shuffling when none is given and the `deterministic` feature is on.
const DEFAULT_SEED: u64 = 0x5eed_fc3d;

/// Friction law applied by a sweep.
#[derive(Copy, Clone, Debug)]
pub(crate) enum FrictionLaw<'a> {
    Coulomb,
    /// Tresca friction with one threshold per contact.
    Tresca(&'a [f64]),
}

impl FrictionLaw<'_> {
    fn friction(&self, problem: &FrictionContactProblem, contact: usize) -> Friction {
        match self {
            FrictionLaw::Coulomb => Friction::Coulomb(problem.mu()[contact]),
            FrictionLaw::Tresca(radii) => Friction::Tresca(radii[contact]),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FrictionLaw::Coulomb => "Coulomb",
            FrictionLaw::Tresca(_) => "Tresca",
        }
    }

    fn error(
        &self,
        problem: &FrictionContactProblem,
        reaction: &[f64],
        velocity: &mut [f64],
        tolerance: f64,
    ) -> ErrorEstimate {
        match self {
            FrictionLaw::Coulomb => compute_error(problem, reaction, velocity, tolerance),
            FrictionLaw::Tresca(radii) => {
                compute_error_tresca(problem, reaction, velocity, radii, tolerance)
            }
        }
    }
}

/// Scratch state of one NSGS solve.
pub(crate) struct NsgsWorkspace {
    /// Per contact state of the local solvers, kept across sweeps.
    pub caches: Vec<ContactCache>,
    order: Vec<usize>,
    rng: Option<StdRng>,
    reshuffle: bool,
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None if cfg!(feature = "deterministic") => StdRng::seed_from_u64(DEFAULT_SEED),
        None => StdRng::from_entropy(),
    }
}

impl NsgsWorkspace {
    pub fn new(number_of_contacts: usize, shuffle: Shuffle) -> Self {
        let (rng, reshuffle) = match shuffle {
            Shuffle::None => (None, false),
            Shuffle::Once { seed } => (Some(make_rng(seed)), false),
            Shuffle::EachIteration { seed } => (Some(make_rng(seed)), true),
        };
        let mut ws = NsgsWorkspace {
            caches: vec![ContactCache::default(); number_of_contacts],
            order: (0..number_of_contacts).collect(),
            rng,
            reshuffle,
        };
        if let Some(rng) = ws.rng.as_mut() {
            ws.order.shuffle(rng);
        }
        ws
    }

    fn next_order(&mut self, first_sweep: bool) -> &[usize] {
        if self.reshuffle && !first_sweep {
            if let Some(rng) = self.rng.as_mut() {
                self.order.shuffle(rng);
            }
        }
        &self.order
    }
}

/// Outcome of a single sweep.
struct Sweep {
    /// `Σ‖Δrᵢ‖²` over all visited contacts.
    increment: f64,
    failures: usize,
    nan: bool,
}

fn sweep(
    problem: &FrictionContactProblem,
    options: &NsgsOptions,
    law: FrictionLaw,
    ws: &mut NsgsWorkspace,
    reaction: &mut [f64],
    first_sweep: bool,
) -> Result<Sweep, Error> {
    let mut result = Sweep {
        increment: 0.0,
        failures: 0,
        nan: false,
    };

    let order = ws.next_order(first_sweep).to_vec();
    for contact in order {
        let friction = law.friction(problem, contact);
        let local = problem.local_problem_with_friction(contact, reaction, friction)?;
        let range = contact * CONTACT_BLOCK_SIZE..(contact + 1) * CONTACT_BLOCK_SIZE;
        let r_old = Vector3::from_column_slice(&reaction[range.clone()]);
        let mut r = r_old;

        let local_result =
            solve_local(&options.local_solver, &local, &mut r, &mut ws.caches[contact])?;

        match local_result.status {
            LocalStatus::Success => {}
            LocalStatus::NanDetected => {
                log::warn!("NaN in local solve of contact {}", contact);
                result.nan = true;
                return Ok(result);
            }
            _ => {
                log::warn!(
                    "{} local solver failed on contact {}: {}",
                    options.local_solver.name(),
                    contact,
                    local_result
                );
                result.failures += 1;
            }
        }

        if let Some(omega) = options.relaxation {
            r = r * omega + r_old * (1.0 - omega);
        }

        result.increment += (r - r_old).norm_squared();
        reaction[range].copy_from_slice(r.as_slice());
    }
    Ok(result)
}

/// Runs NSGS on `problem` with the given friction law.
pub(crate) fn solve_with_law(
    problem: &FrictionContactProblem,
    options: &NsgsOptions,
    law: FrictionLaw,
    ws: &mut NsgsWorkspace,
    reaction: &mut [f64],
    velocity: &mut [f64],
) -> Result<SolveResult, Error> {
    if options.local_solver.is_tresca() != matches!(law, FrictionLaw::Tresca(_)) {
        return Err(Error::IncompatibleLocalSolver {
            solver: options.local_solver.name(),
            friction: law.name(),
        });
    }

    let tolerance = options.tolerance;
    let mut iterations = 0;

    log_debug_stats_header("fails");
    let result = loop {
        if iterations >= options.max_iter {
            break SolveResult {
                iterations,
                error: law.error(problem, reaction, velocity, tolerance).error,
                status: Status::MaximumIterationsExceeded,
            };
        }

        let outcome = sweep(problem, options, law, ws, reaction, iterations == 0)?;
        iterations += 1;

        if outcome.nan || !is_finite(reaction) {
            break SolveResult {
                iterations,
                error: law.error(problem, reaction, velocity, tolerance).error,
                status: Status::NanDetected,
            };
        }

        let estimate = match options.error_evaluation {
            ErrorEvaluation::Full => law.error(problem, reaction, velocity, tolerance),
            ErrorEvaluation::Incremental => {
                let norm_r = reaction.iter().map(|x| x * x).sum::<f64>().sqrt();
                let proxy = outcome.increment.sqrt() / norm_r.max(1.0);
                if proxy <= tolerance {
                    // Confirm with the full error before stopping.
                    law.error(problem, reaction, velocity, tolerance)
                } else {
                    ErrorEstimate {
                        error: proxy,
                        converged: false,
                    }
                }
            }
        };
        let error = estimate.error;

        log_debug_stats(iterations, error, reaction, outcome.failures as f64);

        if estimate.converged {
            break SolveResult {
                iterations,
                error,
                status: Status::Success,
            };
        }
    };

    // Leaves u = Mr + q consistent with the returned reaction.
    problem.compute_velocity(reaction, velocity);
    Ok(result)
}

/// Solves the Coulomb friction problem with NSGS.
pub fn solve(
    problem: &FrictionContactProblem,
    options: &NsgsOptions,
    reaction: &mut [f64],
    velocity: &mut [f64],
) -> Result<SolveResult, Error> {
    let mut ws = NsgsWorkspace::new(problem.number_of_contacts(), options.shuffle);
    solve_with_law(problem, options, FrictionLaw::Coulomb, &mut ws, reaction, velocity)
}
