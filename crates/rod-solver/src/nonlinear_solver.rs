//! Newton-Raphson equilibrium iteration.
//!
//! Solves the discrete equilibrium equation on the free dofs:
//! R(u) = F_ext - F_int(u) = 0
//!
//! where for transient problems `F_int` also carries the inertia and
//! damping forces of the time discretization.
//!
//! # Newton-Raphson Method
//!
//! 1. Compute residual: R_i = F_ext - F_int(u_i)
//! 2. Compute tangent stiffness: K_T = ∂F_int/∂u
//! 3. Solve: K_T * Δu = R_i
//! 4. Update: translations u += Δu, rotations R <- exp(Δθ) R
//! 5. Check convergence: ||R_i|| / scale < tol
//!
//! The scale is fixed at the first iteration of each increment as the
//! largest of the external force norm and the internal force norm
//! (reactions included), falling back to 1 for an unloaded structure.

use nalgebra::DVector;
use rod_io::RunLog;

use crate::assembly::{self, Evaluation};
use crate::backend::{Factorization, LinearSolver, SparseTripletsF64};
use crate::config::SolverConfig;
use crate::error::{Result, SolverError};
use crate::model::{RodModel, RodState};

/// Step fractions tried by the backtracking line search
const LINE_SEARCH_STEPS: [f64; 5] = [1.0, 0.5, 0.25, 0.125, 0.0625];

/// Nonlinear solver configuration
#[derive(Debug, Clone)]
pub struct NonlinearConfig {
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Scaled residual tolerance
    pub tolerance: f64,
    /// Failure once the scaled residual exceeds this multiple of its
    /// starting value
    pub divergence_factor: f64,
    /// Line search flag
    pub use_line_search: bool,
    /// Accept a non-converged increment below `lenient_tolerance`
    pub lenient: bool,
    pub lenient_tolerance: f64,
    /// Module name in the log lines
    pub module: String,
}

impl Default for NonlinearConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            tolerance: 1e-8,
            divergence_factor: 1e6,
            use_line_search: false,
            lenient: false,
            lenient_tolerance: 1e-4,
            module: "nonlin".to_string(),
        }
    }
}

impl NonlinearConfig {
    pub fn from_solver(config: &SolverConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
            divergence_factor: config.divergence_factor,
            use_line_search: config.line_search,
            lenient: config.lenient,
            lenient_tolerance: config.lenient_tolerance,
            ..Self::default()
        }
    }
}

/// Convergence status
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConvergenceStatus {
    /// Scaled residual below the tolerance
    Converged,
    /// Accepted in lenient mode after the iteration bound
    Lenient,
}

/// Outcome of one converged increment
#[derive(Debug, Clone)]
pub struct NonlinearResults {
    /// Number of Newton corrections
    pub num_iterations: usize,
    /// Final scaled residual
    pub residual: f64,
    pub scale: f64,
    pub status: ConvergenceStatus,
    /// Scaled residual per iteration
    pub iteration_history: Vec<f64>,
    /// Evaluation at the accepted state
    pub evaluation: Evaluation,
}

/// Residual, tangent and diagnostics at a trial state.
#[derive(Debug, Clone)]
pub struct Linearization {
    /// Out-of-balance force on the free dofs
    pub residual: DVector<f64>,
    /// Free-dof tangent `∂F_int/∂u`
    pub tangent: Option<SparseTripletsF64>,
    pub evaluation: Evaluation,
    pub external_norm: f64,
    pub internal_norm: f64,
}

/// A discretized equilibrium problem solved by [`NewtonSolver`].
pub trait EquilibriumProblem {
    /// Residual (and tangent when `want_tangent`) at `state`.
    fn linearize(&mut self, state: &RodState, want_tangent: bool) -> Result<Linearization>;

    /// Newton correction on the free dofs from the factorized tangent.
    fn correction(
        &mut self,
        _state: &RodState,
        lin: &Linearization,
        factor: &dyn Factorization,
    ) -> Result<DVector<f64>> {
        Ok(factor.solve(&lin.residual)?)
    }

    /// Applies a free-dof correction to `state`.
    fn apply(&mut self, state: &mut RodState, delta: &DVector<f64>);

    /// Problems carrying extra unknowns outside the state (arc length)
    /// cannot backtrack.
    fn supports_line_search(&self) -> bool {
        true
    }
}

/// Static equilibrium at the load factor stored in the state.
///
/// The tangent includes the load stiffness of follower loads, which makes
/// it unsymmetric when followers are present.
pub struct StaticProblem<'a> {
    model: &'a RodModel,
}

impl<'a> StaticProblem<'a> {
    pub fn new(model: &'a RodModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &'a RodModel {
        self.model
    }

    /// Free part of the load pattern at `state`.
    pub fn free_load(&self, state: &RodState) -> DVector<f64> {
        self.model
            .bcs
            .restrict(&assembly::external_force(self.model, state, 1.0))
    }
}

impl EquilibriumProblem for StaticProblem<'_> {
    fn linearize(&mut self, state: &RodState, want_tangent: bool) -> Result<Linearization> {
        let mut evaluation = assembly::evaluate(self.model, state, want_tangent)?;
        let external = assembly::external_force(self.model, state, state.load_factor);
        if let Some(k) = evaluation.tangent.as_mut() {
            assembly::push_load_stiffness(k, self.model, state, state.load_factor);
        }
        let bcs = &self.model.bcs;
        let residual = bcs.restrict(&(&external - &evaluation.internal_force));
        let tangent = evaluation
            .tangent
            .as_ref()
            .map(|k| assembly::reduce_to_free(k, bcs));
        Ok(Linearization {
            residual,
            tangent,
            external_norm: external.norm(),
            internal_norm: evaluation.internal_force.norm(),
            evaluation,
        })
    }

    fn apply(&mut self, state: &mut RodState, delta: &DVector<f64>) {
        state.apply_increment(&self.model.bcs.expand(delta));
    }
}

/// Newton-Raphson driver
pub struct NewtonSolver<'a> {
    config: NonlinearConfig,
    backend: &'a dyn LinearSolver,
}

impl<'a> NewtonSolver<'a> {
    pub fn new(config: NonlinearConfig, backend: &'a dyn LinearSolver) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> &NonlinearConfig {
        &self.config
    }

    /// Iterates `state` to equilibrium. On error the state is left at the
    /// last iterate; callers keep a copy to roll back.
    pub fn solve(
        &self,
        problem: &mut dyn EquilibriumProblem,
        state: &mut RodState,
        log: &mut RunLog,
    ) -> Result<NonlinearResults> {
        let module = self.config.module.as_str();
        let mut lin = problem.linearize(state, true)?;
        let scale = {
            let s = lin.external_norm.max(lin.internal_norm);
            if s > 1e-14 { s } else { 1.0 }
        };
        log.scale_factor(module, scale)?;

        let mut history = Vec::with_capacity(self.config.max_iterations + 1);
        let mut first = None;
        let mut iteration = 0;
        loop {
            let residual = lin.residual.norm() / scale;
            log.iteration(module, iteration, residual)?;
            history.push(residual);

            if residual < self.config.tolerance {
                return Ok(self.finish(iteration, residual, scale, ConvergenceStatus::Converged, history, lin));
            }
            let reference = *first.get_or_insert(residual.max(self.config.tolerance));
            if !residual.is_finite() || residual > self.config.divergence_factor * reference {
                return Err(SolverError::ConvergenceFailure(format!(
                    "residual diverged at iteration {iteration} (scaled residual {residual:.3e})"
                )));
            }
            if iteration == self.config.max_iterations {
                break;
            }

            let tangent = lin.tangent.as_ref().ok_or_else(|| {
                SolverError::ConvergenceFailure("tangent not available".to_string())
            })?;
            let factor = self.backend.factorize(tangent)?;
            let delta = problem.correction(state, &lin, factor.as_ref())?;
            iteration += 1;

            lin = if self.config.use_line_search && problem.supports_line_search() {
                self.line_search(problem, state, &delta, lin.residual.norm())?
            } else {
                problem.apply(state, &delta);
                problem.linearize(state, true)?
            };
        }

        let residual = history.last().copied().unwrap_or(f64::INFINITY);
        if self.config.lenient && residual < self.config.lenient_tolerance {
            log.warn(
                module,
                &format!(
                    "accepting unconverged increment after {iteration} iterations (scaled residual {residual:.3e})"
                ),
            )?;
            return Ok(self.finish(iteration, residual, scale, ConvergenceStatus::Lenient, history, lin));
        }
        Err(SolverError::ConvergenceFailure(format!(
            "no convergence after {iteration} iterations (scaled residual {residual:.3e})"
        )))
    }

    /// Backtracks along `delta` until the residual norm drops below
    /// `current`; keeps the shortest step otherwise.
    fn line_search(
        &self,
        problem: &mut dyn EquilibriumProblem,
        state: &mut RodState,
        delta: &DVector<f64>,
        current: f64,
    ) -> Result<Linearization> {
        let mut last = None;
        for alpha in LINE_SEARCH_STEPS {
            let mut trial = state.clone();
            problem.apply(&mut trial, &(delta * alpha));
            let lin = match problem.linearize(&trial, true) {
                Ok(lin) => lin,
                // a contact or material failure on a long step: try shorter
                Err(err) if err.is_recoverable() && alpha > LINE_SEARCH_STEPS[4] => continue,
                Err(err) => return Err(err),
            };
            let accepted = lin.residual.norm() < current;
            last = Some((trial, lin));
            if accepted {
                break;
            }
        }
        let (trial, lin) = last.ok_or_else(|| {
            SolverError::ConvergenceFailure("line search found no admissible step".to_string())
        })?;
        *state = trial;
        Ok(lin)
    }

    fn finish(
        &self,
        iterations: usize,
        residual: f64,
        scale: f64,
        status: ConvergenceStatus,
        history: Vec<f64>,
        lin: Linearization,
    ) -> NonlinearResults {
        NonlinearResults {
            num_iterations: iterations,
            residual,
            scale,
            status,
            iteration_history: history,
            evaluation: lin.evaluation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NativeBackend;
    use crate::contact::ContactSummary;
    use nalgebra::{Matrix3, Vector3};
    use std::collections::BTreeSet;

    /// Single hardening spring `f = k u + c u^3` stored in node 0, `dx`.
    struct Spring {
        k: f64,
        c: f64,
        load: f64,
    }

    fn make_state() -> RodState {
        RodState {
            displacement: vec![Vector3::zeros()],
            rotation: vec![Matrix3::identity()],
            rotation_vector: vec![Vector3::zeros()],
            velocity: vec![Vector3::zeros()],
            acceleration: vec![Vector3::zeros()],
            angular_velocity: vec![Vector3::zeros()],
            angular_acceleration: vec![Vector3::zeros()],
            plastic: Vec::new(),
            applied_constraints: Vec::new(),
            contact_active: BTreeSet::new(),
            load_factor: 1.0,
            time: 0.0,
            plastic_dissipation: 0.0,
            viscous_dissipation: 0.0,
        }
    }

    fn make_evaluation(force: f64) -> Evaluation {
        Evaluation {
            internal_force: DVector::from_vec(vec![force]),
            tangent: None,
            trial_plastic: Vec::new(),
            stresses: Vec::new(),
            stored_energy: 0.0,
            plastic_dissipation: 0.0,
            contact: ContactSummary::default(),
            contact_active: BTreeSet::new(),
        }
    }

    impl EquilibriumProblem for Spring {
        fn linearize(&mut self, state: &RodState, want_tangent: bool) -> Result<Linearization> {
            let u = state.displacement[0].x;
            let internal = self.k * u + self.c * u.powi(3);
            let tangent = want_tangent.then(|| SparseTripletsF64 {
                nrows: 1,
                ncols: 1,
                row_indices: vec![0],
                col_indices: vec![0],
                values: vec![self.k + 3.0 * self.c * u * u],
            });
            Ok(Linearization {
                residual: DVector::from_vec(vec![self.load - internal]),
                tangent,
                evaluation: make_evaluation(internal),
                external_norm: self.load.abs(),
                internal_norm: internal.abs(),
            })
        }

        fn apply(&mut self, state: &mut RodState, delta: &DVector<f64>) {
            state.displacement[0].x += delta[0];
        }
    }

    #[test]
    fn converges_on_hardening_spring() {
        let mut spring = Spring { k: 1.0, c: 1.0, load: 10.0 };
        let mut state = make_state();
        let solver = NewtonSolver::new(NonlinearConfig::default(), &NativeBackend);
        let result = solver
            .solve(&mut spring, &mut state, &mut RunLog::disabled())
            .expect("converges");
        assert_eq!(result.status, ConvergenceStatus::Converged);
        assert_eq!(result.scale, 10.0);
        let u = state.displacement[0].x;
        assert!((u + u.powi(3) - 10.0).abs() < 1e-7);
        assert!(result.num_iterations < 15);
        assert_eq!(result.iteration_history.len(), result.num_iterations + 1);
        assert!(result.residual < 1e-8);
    }

    #[test]
    fn converged_state_is_a_fixed_point() {
        let mut spring = Spring { k: 2.0, c: 0.5, load: 3.0 };
        let mut state = make_state();
        let solver = NewtonSolver::new(NonlinearConfig::default(), &NativeBackend);
        solver
            .solve(&mut spring, &mut state, &mut RunLog::disabled())
            .expect("converges");
        let before = state.displacement[0].x;
        let again = solver
            .solve(&mut spring, &mut state, &mut RunLog::disabled())
            .expect("converges");
        assert_eq!(again.num_iterations, 0);
        assert_eq!(state.displacement[0].x, before);
    }

    #[test]
    fn iteration_bound_fails_unless_lenient() {
        let config = NonlinearConfig {
            max_iterations: 2,
            ..NonlinearConfig::default()
        };
        let mut spring = Spring { k: 1.0, c: 1.0, load: 10.0 };
        let solver = NewtonSolver::new(config.clone(), &NativeBackend);
        let err = solver
            .solve(&mut spring, &mut make_state(), &mut RunLog::disabled())
            .unwrap_err();
        assert!(err.is_recoverable());

        let lenient = NewtonSolver::new(
            NonlinearConfig {
                lenient: true,
                lenient_tolerance: 100.0,
                ..config
            },
            &NativeBackend,
        );
        let result = lenient
            .solve(&mut spring, &mut make_state(), &mut RunLog::disabled())
            .expect("accepted");
        assert_eq!(result.status, ConvergenceStatus::Lenient);
        assert_eq!(result.num_iterations, 2);
    }

    #[test]
    fn line_search_reaches_solution() {
        let config = NonlinearConfig {
            use_line_search: true,
            max_iterations: 50,
            ..NonlinearConfig::default()
        };
        // softening spring: plain Newton overshoots from u = 0
        struct Softening;
        impl EquilibriumProblem for Softening {
            fn linearize(&mut self, state: &RodState, want_tangent: bool) -> Result<Linearization> {
                let u = state.displacement[0].x;
                let internal = u.atan();
                Ok(Linearization {
                    residual: DVector::from_vec(vec![1.4 - internal]),
                    tangent: want_tangent.then(|| SparseTripletsF64 {
                        nrows: 1,
                        ncols: 1,
                        row_indices: vec![0],
                        col_indices: vec![0],
                        values: vec![1.0 / (1.0 + u * u)],
                    }),
                    evaluation: make_evaluation(internal),
                    external_norm: 1.4,
                    internal_norm: internal.abs(),
                })
            }
            fn apply(&mut self, state: &mut RodState, delta: &DVector<f64>) {
                state.displacement[0].x += delta[0];
            }
        }
        let mut state = make_state();
        NewtonSolver::new(config, &NativeBackend)
            .solve(&mut Softening, &mut state, &mut RunLog::disabled())
            .expect("converges with line search");
        assert!((state.displacement[0].x - 1.4f64.tan()).abs() < 1e-6);
    }
}
