//! Solver configuration.
//!
//! Every outer strategy has its own parameter struct. All of them can be loaded from RON files
//! with [`io::load_solver_options`](crate::io::load_solver_options).

use serde::{Deserialize, Serialize};

/// Outer solver strategy together with its parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SolverOptions {
    /// Non-smooth Gauss-Seidel over contacts.
    Nsgs(NsgsOptions),
    /// Proximal point regularization around an internal solver.
    Proximal(ProximalOptions),
    /// Extra-gradient projection.
    ExtraGradient(FixedPointOptions),
    /// De Saxcé fixed point projection.
    DeSaxce(FixedPointOptions),
    /// Normal/tangential splitting.
    Panagiotopoulos(PanagiotopoulosOptions),
    /// Fixed point on a sequence of Tresca problems.
    TrescaFixedPoint(TrescaOptions),
    /// Generalized Newton on the stacked Alart-Curnier or Fischer-Burmeister function.
    NonsmoothNewton(NewtonOptions),
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions::Nsgs(NsgsOptions::default())
    }
}

impl SolverOptions {
    pub fn name(&self) -> &'static str {
        match self {
            SolverOptions::Nsgs(_) => "NSGS",
            SolverOptions::Proximal(_) => "Proximal",
            SolverOptions::ExtraGradient(_) => "ExtraGradient",
            SolverOptions::DeSaxce(_) => "DeSaxce",
            SolverOptions::Panagiotopoulos(_) => "Panagiotopoulos",
            SolverOptions::TrescaFixedPoint(_) => "TrescaFixedPoint",
            SolverOptions::NonsmoothNewton(_) => "NonsmoothNewton",
        }
    }

    pub fn max_iter(&self) -> u32 {
        match self {
            SolverOptions::Nsgs(o) => o.max_iter,
            SolverOptions::Proximal(o) => o.max_iter,
            SolverOptions::ExtraGradient(o) | SolverOptions::DeSaxce(o) => o.max_iter,
            SolverOptions::Panagiotopoulos(o) => o.max_iter,
            SolverOptions::TrescaFixedPoint(o) => o.max_iter,
            SolverOptions::NonsmoothNewton(o) => o.max_iter,
        }
    }

    pub fn tolerance(&self) -> f64 {
        match self {
            SolverOptions::Nsgs(o) => o.tolerance,
            SolverOptions::Proximal(o) => o.tolerance,
            SolverOptions::ExtraGradient(o) | SolverOptions::DeSaxce(o) => o.tolerance,
            SolverOptions::Panagiotopoulos(o) => o.tolerance,
            SolverOptions::TrescaFixedPoint(o) => o.tolerance,
            SolverOptions::NonsmoothNewton(o) => o.tolerance,
        }
    }

    pub fn set_tolerance(&mut self, tolerance: f64) {
        match self {
            SolverOptions::Nsgs(o) => o.tolerance = tolerance,
            SolverOptions::Proximal(o) => o.tolerance = tolerance,
            SolverOptions::ExtraGradient(o) | SolverOptions::DeSaxce(o) => o.tolerance = tolerance,
            SolverOptions::Panagiotopoulos(o) => o.tolerance = tolerance,
            SolverOptions::TrescaFixedPoint(o) => o.tolerance = tolerance,
            SolverOptions::NonsmoothNewton(o) => o.tolerance = tolerance,
        }
    }
}

/// How the NSGS driver measures progress after each sweep.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorEvaluation {
    /// Compute the full error after every sweep.
    Full,
    /// Use the relative reaction increment and confirm with the full error before stopping.
    Incremental,
}

/// Order in which NSGS visits the contacts.
///
/// When no seed is given, a fixed seed is used if the `deterministic` feature is enabled.
/// Otherwise the generator is seeded from entropy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shuffle {
    /// Visit contacts in index order.
    None,
    /// Shuffle the order once per solve.
    Once { seed: Option<u64> },
    /// Shuffle the order before every sweep.
    EachIteration { seed: Option<u64> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NsgsOptions {
    pub max_iter: u32,
    pub tolerance: f64,
    pub local_solver: LocalSolver,
    pub error_evaluation: ErrorEvaluation,
    pub shuffle: Shuffle,
    /// Over or under relaxation `r ← ω r_local + (1 - ω) r` of each contact update, with
    /// `0 < ω ≤ 2`. `None` takes the local solution as is.
    #[serde(default)]
    pub relaxation: Option<f64>,
}

impl Default for NsgsOptions {
    fn default() -> Self {
        NsgsOptions {
            max_iter: 1000,
            tolerance: 1e-4,
            local_solver: LocalSolver::default(),
            error_evaluation: ErrorEvaluation::Full,
            shuffle: Shuffle::None,
            relaxation: None,
        }
    }
}

/// Parameters of the local generalized Newton solvers.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalNewtonParams {
    pub max_iter: u32,
    /// Tolerance on the norm of the local non-smooth function.
    pub tolerance: f64,
    /// Augmentation parameter. `None` uses `1/W₀₀`.
    pub rho: Option<f64>,
    /// Maximum number of Goldstein-Price trials per Newton step.
    pub max_ls_iter: u32,
}

impl Default for LocalNewtonParams {
    fn default() -> Self {
        LocalNewtonParams {
            max_iter: 50,
            tolerance: 1e-12,
            rho: None,
            max_ls_iter: 100,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlockerMethod {
    /// Projected fixed point `z ← max(0, z - ρF(z))`.
    FixedPoint,
    /// Newton on the Fischer-Burmeister NCP function.
    Newton,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlockerParams {
    pub method: GlockerMethod,
    pub max_iter: u32,
    pub tolerance: f64,
}

impl Default for GlockerParams {
    fn default() -> Self {
        GlockerParams {
            method: GlockerMethod::Newton,
            max_iter: 100,
            tolerance: 1e-12,
        }
    }
}

/// Per contact solver used inside NSGS.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LocalSolver {
    /// A single projection step `r ← Π(r - ρũ(r))` with `ρ = 1/W₀₀`.
    Projection,
    /// Componentwise diagonal solve followed by a cap onto the cone.
    ProjectionWithDiagonalization,
    /// Projection steps with an adaptive step length until the local error drops below
    /// `tolerance`.
    ProjectionWithLocalIteration { max_iter: u32, tolerance: f64 },
    /// Projection step onto the Tresca cylinder.
    ProjectionOnCylinder,
    /// Adaptive projection steps onto the Tresca cylinder.
    ProjectionOnCylinderWithLocalIteration { max_iter: u32, tolerance: f64 },
    AlartCurnier(LocalNewtonParams),
    FischerBurmeister(LocalNewtonParams),
    /// Enumeration of take-off, sticking and sliding branches.
    Quartic,
    NcpGlocker(GlockerParams),
}

impl Default for LocalSolver {
    fn default() -> Self {
        LocalSolver::AlartCurnier(LocalNewtonParams::default())
    }
}

impl LocalSolver {
    pub fn name(&self) -> &'static str {
        match self {
            LocalSolver::Projection => "Projection",
            LocalSolver::ProjectionWithDiagonalization => "ProjectionWithDiagonalization",
            LocalSolver::ProjectionWithLocalIteration { .. } => "ProjectionWithLocalIteration",
            LocalSolver::ProjectionOnCylinder => "ProjectionOnCylinder",
            LocalSolver::ProjectionOnCylinderWithLocalIteration { .. } => {
                "ProjectionOnCylinderWithLocalIteration"
            }
            LocalSolver::AlartCurnier(_) => "AlartCurnier",
            LocalSolver::FischerBurmeister(_) => "FischerBurmeister",
            LocalSolver::Quartic => "Quartic",
            LocalSolver::NcpGlocker(_) => "NcpGlocker",
        }
    }

    /// Whether this solver handles Tresca local problems rather than Coulomb ones.
    pub fn is_tresca(&self) -> bool {
        matches!(
            self,
            LocalSolver::ProjectionOnCylinder
                | LocalSolver::ProjectionOnCylinderWithLocalIteration { .. }
        )
    }
}

/// Proximal parameter update rule.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Alpha {
    /// Constant α.
    Fixed(f64),
    /// `α = σ errorᵛ`, multiplied by 10 whenever the internal solver fails.
    Adaptive { sigma: f64, nu: f64 },
}

impl Default for Alpha {
    fn default() -> Self {
        Alpha::Adaptive {
            sigma: 5.0,
            nu: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProximalOptions {
    pub max_iter: u32,
    pub tolerance: f64,
    pub alpha: Alpha,
    /// Must be one of `Nsgs`, `ExtraGradient`, `DeSaxce` or `NonsmoothNewton`.
    pub internal: Box<SolverOptions>,
    /// Regularize `M` only, leaving `q` unchanged. A variable α shrinks tenfold every
    /// iteration.
    pub only_regularization: bool,
}

impl Default for ProximalOptions {
    fn default() -> Self {
        ProximalOptions {
            max_iter: 1000,
            tolerance: 1e-4,
            alpha: Alpha::default(),
            internal: Box::new(SolverOptions::NonsmoothNewton(NewtonOptions::default())),
            only_regularization: false,
        }
    }
}

/// Step length of the projection fixed point methods.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Rho {
    Fixed(f64),
    /// Adaptive step starting at the given value.
    Adaptive(f64),
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixedPointOptions {
    pub max_iter: u32,
    pub tolerance: f64,
    pub rho: Rho,
}

impl Default for FixedPointOptions {
    fn default() -> Self {
        FixedPointOptions {
            max_iter: 20000,
            tolerance: 1e-3,
            rho: Rho::Adaptive(1.0),
        }
    }
}

/// How the tolerance of inner solvers follows the outer error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToleranceStrategy {
    /// `max(error/10, tolerance/nc)`.
    Adaptive,
    /// `tolerance/2`.
    Fraction,
    /// Keep the tolerance configured on the inner solver.
    Given,
}

impl Default for ToleranceStrategy {
    fn default() -> Self {
        ToleranceStrategy::Adaptive
    }
}

impl ToleranceStrategy {
    pub fn inner_tolerance(
        &self,
        error: f64,
        tolerance: f64,
        number_of_contacts: usize,
        given: f64,
    ) -> f64 {
        match *self {
            ToleranceStrategy::Adaptive => {
                (error / 10.0).max(tolerance / number_of_contacts.max(1) as f64)
            }
            ToleranceStrategy::Fraction => tolerance / 2.0,
            ToleranceStrategy::Given => given,
        }
    }
}

/// Iteration limits of an inner solve.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InnerParams {
    pub max_iter: u32,
    pub tolerance: f64,
}

impl Default for InnerParams {
    fn default() -> Self {
        InnerParams {
            max_iter: 1000,
            tolerance: 1e-6,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PanagiotopoulosOptions {
    pub max_iter: u32,
    pub tolerance: f64,
    pub tolerance_strategy: ToleranceStrategy,
    /// Projected Gauss-Seidel on the normal LCP.
    pub normal: InnerParams,
    /// Fixed point projection on the tangential disk problem.
    pub tangent: InnerParams,
}

impl Default for PanagiotopoulosOptions {
    fn default() -> Self {
        PanagiotopoulosOptions {
            max_iter: 1000,
            tolerance: 1e-4,
            tolerance_strategy: ToleranceStrategy::default(),
            normal: InnerParams::default(),
            tangent: InnerParams::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrescaOptions {
    pub max_iter: u32,
    pub tolerance: f64,
    pub tolerance_strategy: ToleranceStrategy,
    /// Inner NSGS. Its local solver must be a cylinder projection.
    pub internal: NsgsOptions,
}

impl Default for TrescaOptions {
    fn default() -> Self {
        TrescaOptions {
            max_iter: 1000,
            tolerance: 1e-4,
            tolerance_strategy: ToleranceStrategy::default(),
            internal: NsgsOptions {
                local_solver: LocalSolver::ProjectionOnCylinderWithLocalIteration {
                    max_iter: 50,
                    tolerance: 1e-14,
                },
                ..NsgsOptions::default()
            },
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NewtonFormulation {
    AlartCurnier,
    FischerBurmeister,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewtonOptions {
    pub max_iter: u32,
    pub tolerance: f64,
    pub formulation: NewtonFormulation,
    /// Alart-Curnier augmentation parameter. `None` uses `1/W₀₀` per contact.
    pub rho: Option<f64>,
    pub max_ls_iter: u32,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        NewtonOptions {
            max_iter: 200,
            tolerance: 1e-10,
            formulation: NewtonFormulation::AlartCurnier,
            rho: None,
            max_ls_iter: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_options_roundtrip_through_ron() {
        let options = SolverOptions::Proximal(ProximalOptions {
            internal: Box::new(SolverOptions::Nsgs(NsgsOptions {
                shuffle: Shuffle::EachIteration { seed: Some(4) },
                local_solver: LocalSolver::NcpGlocker(GlockerParams::default()),
                ..NsgsOptions::default()
            })),
            ..ProximalOptions::default()
        });
        let text = ron::ser::to_string(&options).unwrap();
        let loaded: SolverOptions = ron::from_str(&text).unwrap();
        assert_eq!(loaded, options);
    }

    #[test]
    fn inner_tolerances() {
        let s = ToleranceStrategy::Adaptive;
        assert_eq!(s.inner_tolerance(1.0, 1e-4, 10, 0.0), 0.1);
        assert_eq!(s.inner_tolerance(1e-6, 1e-4, 10, 0.0), 1e-5);
        assert_eq!(ToleranceStrategy::Fraction.inner_tolerance(1.0, 1e-4, 10, 0.0), 5e-5);
        assert_eq!(ToleranceStrategy::Given.inner_tolerance(1.0, 1e-4, 10, 3e-3), 3e-3);
    }

    #[test]
    fn tolerance_accessors() {
        let mut options = SolverOptions::default();
        assert_eq!(options.max_iter(), 1000);
        options.set_tolerance(1e-8);
        assert_eq!(options.tolerance(), 1e-8);
    }
}
