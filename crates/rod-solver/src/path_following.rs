//! Static path following: load control, displacement control and
//! Crisfield arc-length continuation.
//!
//! All loads and prescribed displacements are proportional to the load
//! factor `λ`. Each increment is solved by the Newton iteration; a
//! recoverable failure discards the trial state and halves the step, an
//! easy increment lets the step grow again.

use nalgebra::DVector;
use rod_io::RunLog;

use crate::assembly::{self, Evaluation};
use crate::backend::{Factorization, LinearSolver};
use crate::config::{ArcLengthConfig, SolverConfig, SolverMode, StepConfig};
use crate::contact::ContactSummary;
use crate::error::{Result, SolverError};
use crate::model::{RodModel, RodState};
use crate::nonlinear_solver::{
    ConvergenceStatus, EquilibriumProblem, Linearization, NewtonSolver, NonlinearConfig,
    NonlinearResults, StaticProblem,
};

const MODULE: &str = "path";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    ForceControl,
    DisplacementControl,
    ArcLength,
}

impl ControlMode {
    pub fn from_solver_mode(mode: SolverMode) -> Option<Self> {
        match mode {
            SolverMode::ForceControl => Some(ControlMode::ForceControl),
            SolverMode::DisplacementControl => Some(ControlMode::DisplacementControl),
            SolverMode::ArcLength => Some(ControlMode::ArcLength),
            SolverMode::Transient => None,
        }
    }
}

/// Diagnostics of one converged increment
#[derive(Debug, Clone)]
pub struct IncrementReport {
    pub step: usize,
    pub load_factor: f64,
    /// Load factor change of the increment
    pub load_increment: f64,
    /// Arc length used (arc-length control only)
    pub arc_length: Option<f64>,
    pub iterations: usize,
    pub residual: f64,
    pub status: ConvergenceStatus,
    /// Rejected attempts before this increment converged
    pub cutbacks: usize,
    pub stored_energy: f64,
    pub plastic_dissipation: f64,
    pub contact: ContactSummary,
}

/// Receives every converged increment, in order.
pub trait IncrementObserver {
    fn on_increment(
        &mut self,
        state: &RodState,
        evaluation: &Evaluation,
        report: &IncrementReport,
    ) -> Result<()>;
}

/// Observer that keeps only the reports.
#[derive(Debug, Default)]
pub struct ReportCollector {
    pub reports: Vec<IncrementReport>,
}

impl IncrementObserver for ReportCollector {
    fn on_increment(&mut self, _: &RodState, _: &Evaluation, report: &IncrementReport) -> Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PathSummary {
    pub increments: usize,
    pub load_factor: f64,
    pub total_iterations: usize,
    pub cutbacks: usize,
}

pub struct PathFollowing<'a> {
    model: &'a RodModel,
    mode: ControlMode,
    steps: StepConfig,
    arc: ArcLengthConfig,
    newton: NewtonSolver<'a>,
    backend: &'a dyn LinearSolver,
}

impl<'a> PathFollowing<'a> {
    pub fn new(
        model: &'a RodModel,
        config: &SolverConfig,
        backend: &'a dyn LinearSolver,
    ) -> Result<Self> {
        let mode = ControlMode::from_solver_mode(SolverMode::parse(&config.mode)?)
            .ok_or_else(|| SolverError::config("path following needs a static solver.mode"))?;
        let arc = config.arc_length.clone();
        if mode == ControlMode::ArcLength {
            if !(arc.initial_load_increment > 0.0) {
                return Err(SolverError::config(
                    "solver.arc_length.initial_load_increment must be positive",
                ));
            }
            if !(arc.min_ratio > 0.0) || arc.min_ratio > 1.0 || arc.max_ratio < 1.0 {
                return Err(SolverError::config(
                    "solver.arc_length: need 0 < min_ratio <= 1 <= max_ratio",
                ));
            }
        }
        Ok(Self {
            model,
            mode,
            steps: config.steps.clone(),
            arc,
            newton: NewtonSolver::new(NonlinearConfig::from_solver(config), backend),
            backend,
        })
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    /// Runs the configured path from `state` to the terminal load factor or
    /// step count.
    pub fn run(
        &self,
        state: &mut RodState,
        log: &mut RunLog,
        observer: &mut dyn IncrementObserver,
    ) -> Result<PathSummary> {
        match self.mode {
            ControlMode::ForceControl | ControlMode::DisplacementControl => {
                self.run_load_steps(state, log, observer)
            }
            ControlMode::ArcLength => self.run_arc_length(state, log, observer),
        }
    }

    fn run_load_steps(
        &self,
        state: &mut RodState,
        log: &mut RunLog,
        observer: &mut dyn IncrementObserver,
    ) -> Result<PathSummary> {
        let target = self.steps.max_load_factor;
        let end_tolerance = 1e-12 * target.abs().max(1.0);
        let mut step = self.steps.initial.min(self.steps.max);
        let mut summary = PathSummary {
            increments: 0,
            load_factor: state.load_factor,
            total_iterations: 0,
            cutbacks: 0,
        };
        let mut cutbacks = 0;

        while state.load_factor < target - end_tolerance && summary.increments < self.steps.max_steps {
            let delta = step.min(target - state.load_factor);
            match self.solve_increment(state, delta, log) {
                Ok((next, result)) => {
                    summary.increments += 1;
                    summary.total_iterations += result.num_iterations;
                    let report = self.report(&summary, &next, delta, None, &result, cutbacks);
                    log.info(
                        MODULE,
                        &format!(
                            "increment {} converged: load factor = {:.6e}, iterations = {}",
                            report.step, report.load_factor, report.iterations
                        ),
                    )?;
                    observer.on_increment(&next, &result.evaluation, &report)?;
                    *state = next;
                    cutbacks = 0;
                    if result.num_iterations <= self.steps.optimal_iterations {
                        step = (step * self.steps.growth_factor).min(self.steps.max);
                    }
                }
                Err(err) if err.is_recoverable() => {
                    step *= 0.5;
                    cutbacks += 1;
                    summary.cutbacks += 1;
                    if step < self.steps.min {
                        return Err(err);
                    }
                    log.warn(MODULE, &format!("{err}; retrying with load step {step:.6e}"))?;
                }
                Err(err) => return Err(err),
            }
        }
        if state.load_factor < target - end_tolerance {
            return Err(stopped_short(&summary, state.load_factor, target));
        }
        summary.load_factor = state.load_factor;
        Ok(summary)
    }

    /// Solves one load or displacement increment `delta_lambda` from the
    /// converged `state` and returns the committed new state.
    pub fn solve_increment(
        &self,
        state: &RodState,
        delta_lambda: f64,
        log: &mut RunLog,
    ) -> Result<(RodState, NonlinearResults)> {
        let mut trial = state.clone();
        trial.load_factor += delta_lambda;
        self.predict_prescribed(state, &mut trial)?;

        let mut problem = StaticProblem::new(self.model);
        let result = self.newton.solve(&mut problem, &mut trial, log)?;
        self.accept(state, &mut trial, &result)?;
        Ok((trial, result))
    }

    /// Moves the prescribed dofs to their values at the trial load factor
    /// and carries the motion into the free dofs with the tangent at the
    /// converged state.
    fn predict_prescribed(&self, state: &RodState, trial: &mut RodState) -> Result<()> {
        let bcs = &self.model.bcs;
        let mut prescribed_delta = DVector::zeros(self.model.num_dofs());
        let mut moved = false;
        for (k, p) in bcs.prescribed.iter().enumerate() {
            let target = trial.load_factor * p.value;
            let delta = target - trial.applied_constraints[k];
            trial.applied_constraints[k] = target;
            if delta != 0.0 {
                prescribed_delta[p.dof] = delta;
                moved = true;
            }
        }
        if !moved {
            return Ok(());
        }

        let mut evaluation = assembly::evaluate(self.model, state, true)?;
        let mut increment = prescribed_delta.clone();
        if let Some(tangent) = evaluation.tangent.as_mut()
            && bcs.num_free() > 0
        {
            assembly::push_load_stiffness(tangent, self.model, state, state.load_factor);
            let coupling = assembly::prescribed_coupling(tangent, bcs, &prescribed_delta);
            let reduced = assembly::reduce_to_free(tangent, bcs);
            let free = self.backend.factorize(&reduced)?.solve(&(-coupling))?;
            increment += bcs.expand(&free);
        }
        trial.apply_increment(&increment);
        Ok(())
    }

    fn accept(&self, previous: &RodState, trial: &mut RodState, result: &NonlinearResults) -> Result<()> {
        let evaluation = &result.evaluation;
        if let Some(settings) = &self.model.contact {
            settings.check_penetration(&evaluation.contact)?;
        }
        trial.commit(
            previous,
            evaluation.trial_plastic.clone(),
            evaluation.plastic_dissipation,
            evaluation.contact_active.clone(),
        );
        Ok(())
    }

    fn report(
        &self,
        summary: &PathSummary,
        state: &RodState,
        load_increment: f64,
        arc_length: Option<f64>,
        result: &NonlinearResults,
        cutbacks: usize,
    ) -> IncrementReport {
        IncrementReport {
            step: summary.increments,
            load_factor: state.load_factor,
            load_increment,
            arc_length,
            iterations: result.num_iterations,
            residual: result.residual,
            status: result.status,
            cutbacks,
            stored_energy: result.evaluation.stored_energy,
            plastic_dissipation: result.evaluation.plastic_dissipation,
            contact: result.evaluation.contact,
        }
    }

    fn run_arc_length(
        &self,
        state: &mut RodState,
        log: &mut RunLog,
        observer: &mut dyn IncrementObserver,
    ) -> Result<PathSummary> {
        // initial arc length from the first load increment
        let (load, reference) = self.tangent_load_direction(state)?;
        let psi2q2 = self.arc.load_scale.powi(2) * load.norm_squared();
        let initial = self.arc.initial_load_increment * (reference.norm_squared() + psi2q2).sqrt();
        let min_arc = self.arc.min_ratio * initial;
        let max_arc = self.arc.max_ratio * initial;

        let mut arc = initial;
        let mut previous: Option<(DVector<f64>, f64)> = None;
        let mut summary = PathSummary {
            increments: 0,
            load_factor: state.load_factor,
            total_iterations: 0,
            cutbacks: 0,
        };
        let mut cutbacks = 0;

        while state.load_factor.abs() < self.arc.max_load_factor
            && summary.increments < self.arc.max_steps
        {
            match self.solve_arc_increment(state, arc, previous.as_ref(), psi2q2, log) {
                Ok((next, result, increment, delta_lambda)) => {
                    summary.increments += 1;
                    summary.total_iterations += result.num_iterations;
                    let report =
                        self.report(&summary, &next, delta_lambda, Some(arc), &result, cutbacks);
                    log.info(
                        MODULE,
                        &format!(
                            "increment {} converged: load factor = {:.6e}, arc length = {:.6e}, iterations = {}",
                            report.step, report.load_factor, arc, report.iterations
                        ),
                    )?;
                    observer.on_increment(&next, &result.evaluation, &report)?;
                    *state = next;
                    previous = Some((increment, delta_lambda));
                    cutbacks = 0;

                    let iterations = result.num_iterations.max(1) as f64;
                    let ratio = (self.arc.optimal_iterations as f64 / iterations).sqrt();
                    arc = (arc * ratio.clamp(0.5, 2.0)).clamp(min_arc, max_arc);
                }
                Err(err) if err.is_recoverable() => {
                    arc *= 0.5;
                    cutbacks += 1;
                    summary.cutbacks += 1;
                    if arc < min_arc {
                        return Err(err);
                    }
                    log.warn(MODULE, &format!("{err}; retrying with arc length {arc:.6e}"))?;
                }
                Err(err) => return Err(err),
            }
        }
        if state.load_factor.abs() < self.arc.max_load_factor {
            return Err(stopped_short(&summary, state.load_factor, self.arc.max_load_factor));
        }
        summary.load_factor = state.load_factor;
        Ok(summary)
    }

    /// Free load pattern `q` at `state` and `K⁻¹ q`.
    fn tangent_load_direction(&self, state: &RodState) -> Result<(DVector<f64>, DVector<f64>)> {
        let mut problem = StaticProblem::new(self.model);
        let lin = problem.linearize(state, true)?;
        let tangent = lin
            .tangent
            .as_ref()
            .ok_or_else(|| SolverError::ConvergenceFailure("tangent not available".to_string()))?;
        let load = problem.free_load(state);
        let direction = self.backend.factorize(tangent)?.solve(&load)?;
        Ok((load, direction))
    }

    fn solve_arc_increment(
        &self,
        state: &RodState,
        arc: f64,
        previous: Option<&(DVector<f64>, f64)>,
        psi2q2: f64,
        log: &mut RunLog,
    ) -> Result<(RodState, NonlinearResults, DVector<f64>, f64)> {
        let (load, direction) = self.tangent_load_direction(state)?;
        let norm = (direction.norm_squared() + psi2q2).sqrt();
        if !(norm > 0.0) {
            return Err(SolverError::ConvergenceFailure(
                "arc-length predictor has zero length".to_string(),
            ));
        }
        let sign = match previous {
            Some((du, dl)) if direction.dot(du) + psi2q2 * dl < 0.0 => -1.0,
            _ => 1.0,
        };
        let delta_lambda = sign * arc / norm;
        let predictor = &direction * delta_lambda;

        let mut trial = state.clone();
        trial.load_factor += delta_lambda;
        trial.apply_increment(&self.model.bcs.expand(&predictor));

        let mut problem = ArcLengthProblem {
            inner: StaticProblem::new(self.model),
            load,
            psi2q2,
            arc,
            increment: predictor,
            delta_lambda,
            pending: 0.0,
        };
        let result = self.newton.solve(&mut problem, &mut trial, log)?;
        self.accept(state, &mut trial, &result)?;
        Ok((trial, result, problem.increment, problem.delta_lambda))
    }
}

/// The step budget ran out before the path reached its terminal load factor.
fn stopped_short(summary: &PathSummary, load_factor: f64, target: f64) -> SolverError {
    SolverError::ConvergenceFailure(format!(
        "path stopped after {} increments at load factor {load_factor:.6e}, short of {target:.6e}",
        summary.increments
    ))
}

/// Equilibrium augmented with the constraint
/// `‖Δu‖² + ψ² Δλ² ‖q‖² = Δl²` on the increment of the current step.
struct ArcLengthProblem<'a> {
    inner: StaticProblem<'a>,
    /// Free load pattern at the last linearized state
    load: DVector<f64>,
    /// `ψ² ‖q‖²`
    psi2q2: f64,
    arc: f64,
    /// Free-dof increment since the last converged state
    increment: DVector<f64>,
    delta_lambda: f64,
    /// Load factor correction of the last computed Newton step
    pending: f64,
}

impl EquilibriumProblem for ArcLengthProblem<'_> {
    fn linearize(&mut self, state: &RodState, want_tangent: bool) -> Result<Linearization> {
        if !self.inner.model().bcs.followers.is_empty() {
            self.load = self.inner.free_load(state);
        }
        self.inner.linearize(state, want_tangent)
    }

    fn correction(
        &mut self,
        _state: &RodState,
        lin: &Linearization,
        factor: &dyn Factorization,
    ) -> Result<DVector<f64>> {
        let du_r = factor.solve(&lin.residual)?;
        let du_q = factor.solve(&self.load)?;
        let base = &self.increment + &du_r;

        let a = du_q.norm_squared() + self.psi2q2;
        let b = 2.0 * (du_q.dot(&base) + self.psi2q2 * self.delta_lambda);
        let c = base.norm_squared() + self.psi2q2 * self.delta_lambda.powi(2) - self.arc.powi(2);
        let discriminant = b * b - 4.0 * a * c;
        if discriminant < 0.0 || !(a > 0.0) {
            return Err(SolverError::ConvergenceFailure(format!(
                "arc-length constraint has no real root (discriminant {discriminant:.3e})"
            )));
        }
        let root = discriminant.sqrt();
        let candidates = [(-b + root) / (2.0 * a), (-b - root) / (2.0 * a)];

        // the root whose increment stays closest to the current one
        let alignment = |dl: f64| {
            let next = &base + &du_q * dl;
            next.dot(&self.increment) + self.psi2q2 * (self.delta_lambda + dl) * self.delta_lambda
        };
        let chosen = if alignment(candidates[0]) >= alignment(candidates[1]) {
            candidates[0]
        } else {
            candidates[1]
        };
        self.pending = chosen;
        Ok(du_r + du_q * chosen)
    }

    fn apply(&mut self, state: &mut RodState, delta: &DVector<f64>) {
        self.inner.apply(state, delta);
        state.load_factor += self.pending;
        self.delta_lambda += self.pending;
        self.increment += delta;
        self.pending = 0.0;
    }

    fn supports_line_search(&self) -> bool {
        false
    }
}
