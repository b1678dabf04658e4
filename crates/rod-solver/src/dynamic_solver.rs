//! Transient analysis with a Newmark scheme on the rotation group.
//!
//! Translations follow the classical Newmark update. Rotations use body
//! angular velocity `Ω` and acceleration `A`, with the incremental rotation
//! `Θ = log(Rₙᵀ R₊)` in place of the displacement increment:
//!
//! ```text
//! Δu = h v + h²((½ − β) a + β a₊)        v₊ = v + h((1 − γ) a + γ a₊)
//! Θ  = h Ω + h²((½ − β) A + β A₊)        Ω₊ = Ω + h((1 − γ) A + γ A₊)
//! ```
//!
//! Equilibrium at `t₊` is `M a₊ + C v₊ + f_int = f_ext(t₊)` for translations
//! and `R(J A₊ + Ω₊ × J Ω₊) + C ω₊ + m_int = m_ext(t₊)` for rotations,
//! solved by the Newton iteration on the nodal increments.
//!
//! Standard parameter choices:
//! - **Dissipative** (default): γ = 0.6, β = (γ + ½)²/4
//! - **Average acceleration** (unconditionally stable): γ = 1/2, β = 1/4
//! - **Linear acceleration**: γ = 1/2, β = 1/6
//! - **Fox-Goodwin**: γ = 1/2, β = 1/12

use nalgebra::{DVector, Matrix3, Vector3};
use nalgebra_sparse::CooMatrix;
use rod_io::RunLog;

use crate::assembly::{self, Evaluation};
use crate::backend::{LinearSolver, SparseTripletsF64};
use crate::boundary_conditions::{DOFS_PER_NODE, LoadHistory};
use crate::config::{SolverConfig, TransientConfig};
use crate::contact::ContactSummary;
use crate::error::{Result, SolverError};
use crate::model::{RodModel, RodState};
use crate::nonlinear_solver::{
    ConvergenceStatus, EquilibriumProblem, Linearization, NewtonSolver, NonlinearConfig,
    NonlinearResults,
};
use crate::rotation::log_map;

const MODULE: &str = "transient";

/// Newmark time integration parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewmarkConfig {
    /// Newmark β parameter (controls acceleration)
    pub beta: f64,
    /// Newmark γ parameter (controls velocity)
    pub gamma: f64,
    /// Rayleigh damping α (mass-proportional)
    pub alpha_damping: f64,
    /// Rayleigh damping β (stiffness-proportional)
    pub beta_damping: f64,
}

impl NewmarkConfig {
    /// Numerically dissipative scheme damping the high-frequency content.
    ///
    /// γ = 0.6, β = (γ + ½)²/4
    pub fn dissipative() -> Self {
        Self::with_gamma(0.6)
    }

    /// γ > ½ with the matching β = (γ + ½)²/4.
    pub fn with_gamma(gamma: f64) -> Self {
        Self {
            beta: 0.25 * (gamma + 0.5).powi(2),
            gamma,
            alpha_damping: 0.0,
            beta_damping: 0.0,
        }
    }

    /// Average acceleration method (unconditionally stable, 2nd order accurate)
    ///
    /// γ = 1/2, β = 1/4
    pub fn average_acceleration() -> Self {
        Self {
            beta: 0.25,
            gamma: 0.5,
            alpha_damping: 0.0,
            beta_damping: 0.0,
        }
    }

    /// Linear acceleration method (conditionally stable)
    ///
    /// γ = 1/2, β = 1/6
    pub fn linear_acceleration() -> Self {
        Self {
            beta: 1.0 / 6.0,
            gamma: 0.5,
            alpha_damping: 0.0,
            beta_damping: 0.0,
        }
    }

    /// Fox-Goodwin method
    ///
    /// γ = 1/2, β = 1/12
    pub fn fox_goodwin() -> Self {
        Self {
            beta: 1.0 / 12.0,
            gamma: 0.5,
            alpha_damping: 0.0,
            beta_damping: 0.0,
        }
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "dissipative" => Some(Self::dissipative()),
            "average_acceleration" | "trapezoidal" => Some(Self::average_acceleration()),
            "linear_acceleration" => Some(Self::linear_acceleration()),
            "fox_goodwin" => Some(Self::fox_goodwin()),
            _ => None,
        }
    }

    /// Set Rayleigh damping parameters
    ///
    /// C = α*M + β*K
    pub fn with_rayleigh_damping(mut self, alpha: f64, beta: f64) -> Self {
        self.alpha_damping = alpha;
        self.beta_damping = beta;
        self
    }

    /// Rayleigh coefficients giving damping ratio `zeta1` at `freq1` and
    /// `zeta2` at `freq2` (Hz).
    pub fn from_modal_damping(mut self, freq1: f64, freq2: f64, zeta1: f64, zeta2: f64) -> Self {
        let omega1 = 2.0 * std::f64::consts::PI * freq1;
        let omega2 = 2.0 * std::f64::consts::PI * freq2;

        // ζi = α/(2ωi) + β ωi/2
        let det = omega2 / omega1 - omega1 / omega2;
        let alpha = 2.0 * (zeta1 * omega2 - zeta2 * omega1) / det;
        let beta = 2.0 * (zeta2 / omega1 - zeta1 / omega2) / det;

        self.alpha_damping = alpha;
        self.beta_damping = beta;
        self
    }

    /// Scheme, overrides and damping of a transient configuration.
    pub fn from_transient(config: &TransientConfig) -> Result<Self> {
        let mut scheme = Self::preset(&config.scheme).ok_or_else(|| {
            SolverError::config(format!(
                "solver.transient.scheme: unknown scheme '{}' (dissipative, average_acceleration, linear_acceleration, fox_goodwin)",
                config.scheme
            ))
        })?;
        if let Some(gamma) = config.gamma {
            scheme = Self {
                gamma,
                beta: config.beta.unwrap_or(0.25 * (gamma + 0.5).powi(2)),
                ..scheme
            };
        } else if let Some(beta) = config.beta {
            scheme.beta = beta;
        }
        if !(scheme.beta > 0.0) || scheme.gamma < 0.5 {
            return Err(SolverError::config(
                "solver.transient: need beta > 0 and gamma >= 1/2",
            ));
        }
        if config.rayleigh.is_some() && config.modal_damping.is_some() {
            return Err(SolverError::config(
                "solver.transient: give either rayleigh or modal_damping",
            ));
        }
        if let Some([alpha, beta]) = config.rayleigh {
            scheme = scheme.with_rayleigh_damping(alpha, beta);
        }
        if let Some(modal) = &config.modal_damping {
            let [f1, f2] = modal.frequencies;
            if !(f1 > 0.0) || !(f2 > 0.0) || f1 == f2 {
                return Err(SolverError::config(
                    "solver.transient.modal_damping: need two distinct positive frequencies",
                ));
            }
            scheme = scheme.from_modal_damping(f1, f2, modal.ratios[0], modal.ratios[1]);
        }
        if scheme.alpha_damping < 0.0 || scheme.beta_damping < 0.0 {
            return Err(SolverError::config(
                "solver.transient: damping coefficients must not be negative",
            ));
        }
        Ok(scheme)
    }

    fn is_damped(&self) -> bool {
        self.alpha_damping != 0.0 || self.beta_damping != 0.0
    }
}

impl Default for NewmarkConfig {
    fn default() -> Self {
        Self::dissipative()
    }
}

/// Energy balance of a converged time step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnergyReport {
    /// Stored elastic and contact penalty energy
    pub potential: f64,
    pub kinetic: f64,
    /// Plastic dissipation plus viscous damping work, both accumulated
    pub dissipated: f64,
    /// `potential + kinetic`
    pub total: f64,
}

/// Diagnostics of one converged time step
#[derive(Debug, Clone)]
pub struct TimeStepReport {
    pub step: usize,
    pub time: f64,
    pub time_step: f64,
    pub load_factor: f64,
    pub iterations: usize,
    pub residual: f64,
    pub status: ConvergenceStatus,
    pub cutbacks: usize,
    pub energy: EnergyReport,
    pub contact: ContactSummary,
}

/// Receives the initial state (step 0) and every converged time step.
pub trait TimeStepObserver {
    fn on_step(
        &mut self,
        state: &RodState,
        evaluation: &Evaluation,
        report: &TimeStepReport,
    ) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct StepCollector {
    pub reports: Vec<TimeStepReport>,
}

impl TimeStepObserver for StepCollector {
    fn on_step(&mut self, _: &RodState, _: &Evaluation, report: &TimeStepReport) -> Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DynamicSummary {
    pub steps: usize,
    pub time: f64,
    pub cutbacks: usize,
    pub total_iterations: usize,
}

/// Nodal rates at the end of a step
#[derive(Debug, Clone, Copy)]
struct NodeRates {
    velocity: Vector3<f64>,
    acceleration: Vector3<f64>,
    /// Body frame
    angular_velocity: Vector3<f64>,
    angular_acceleration: Vector3<f64>,
}

/// Dynamic analysis solver
pub struct DynamicSolver<'a> {
    model: &'a RodModel,
    config: NewmarkConfig,
    settings: TransientConfig,
    history: LoadHistory,
    newton: NewtonSolver<'a>,
}

impl<'a> DynamicSolver<'a> {
    pub fn new(
        model: &'a RodModel,
        solver: &SolverConfig,
        backend: &'a dyn LinearSolver,
    ) -> Result<Self> {
        let settings = solver.transient.clone();
        let config = NewmarkConfig::from_transient(&settings)?;
        let history = LoadHistory::from_config(&settings.load)?;
        if !(settings.min_time_step <= settings.time_step) {
            return Err(SolverError::config(
                "solver.transient.min_time_step exceeds time_step",
            ));
        }
        for node in 0..model.num_nodes() {
            let free_translation = (0..3).any(|k| model.bcs.is_free(DOFS_PER_NODE * node + k));
            let free_rotation = (3..6).any(|k| model.bcs.is_free(DOFS_PER_NODE * node + k));
            if (free_translation && !(model.nodal_mass[node] > 0.0))
                || (free_rotation && model.nodal_inertia[node].try_inverse().is_none())
            {
                return Err(SolverError::config(format!(
                    "transient analysis needs positive density: node {} has no mass",
                    model.mesh.nodes[node].id
                )));
            }
        }
        Ok(Self {
            model,
            config,
            settings,
            history,
            newton: NewtonSolver::new(
                NonlinearConfig {
                    module: "nonlin".to_string(),
                    ..NonlinearConfig::from_solver(solver)
                },
                backend,
            ),
        })
    }

    pub fn config(&self) -> &NewmarkConfig {
        &self.config
    }

    /// Consistent initial accelerations from `M a0 = f_ext(0) − f_int(0)`
    /// on the free dofs, keeping the initial velocities of `state`.
    pub fn initialize(&self, state: &mut RodState) -> Result<Evaluation> {
        let model = self.model;
        state.load_factor = self.history.factor(state.time);
        self.move_prescribed(state);
        let evaluation = assembly::evaluate(model, state, false)?;
        let external = assembly::external_force(model, state, state.load_factor);
        let mut net = external - &evaluation.internal_force;
        if self.config.is_damped() {
            let damping = self.damping_force(state, &self.spatial_velocities(state), None)?;
            net -= damping;
        }

        for node in 0..model.num_nodes() {
            let base = DOFS_PER_NODE * node;
            let mut force: Vector3<f64> = net.fixed_rows::<3>(base).into();
            let mut moment: Vector3<f64> = net.fixed_rows::<3>(base + 3).into();
            for k in 0..3 {
                if !model.bcs.is_free(base + k) {
                    force[k] = 0.0;
                }
                if !model.bcs.is_free(base + 3 + k) {
                    moment[k] = 0.0;
                }
            }
            state.acceleration[node] = if model.nodal_mass[node] > 0.0 {
                force / model.nodal_mass[node]
            } else {
                Vector3::zeros()
            };
            let j = model.nodal_inertia[node];
            let omega = state.angular_velocity[node];
            let body_moment = state.rotation[node].transpose() * moment - omega.cross(&(j * omega));
            state.angular_acceleration[node] = j
                .try_inverse()
                .map(|inv| inv * body_moment)
                .unwrap_or_else(Vector3::zeros);
        }
        Ok(evaluation)
    }

    /// Integrates from `state.time` to the configured duration.
    pub fn run(
        &self,
        state: &mut RodState,
        log: &mut RunLog,
        observer: &mut dyn TimeStepObserver,
    ) -> Result<DynamicSummary> {
        let evaluation = self.initialize(state)?;
        let mut energy = self.energy(state, &evaluation);
        let mut max_total = energy.total.abs();
        observer.on_step(
            state,
            &evaluation,
            &TimeStepReport {
                step: 0,
                time: state.time,
                time_step: 0.0,
                load_factor: state.load_factor,
                iterations: 0,
                residual: 0.0,
                status: ConvergenceStatus::Converged,
                cutbacks: 0,
                energy,
                contact: evaluation.contact,
            },
        )?;

        let end = self.settings.duration;
        let end_tolerance = 1e-12 * end.max(1.0);
        let mut h = self.settings.time_step;
        let mut summary = DynamicSummary {
            steps: 0,
            time: state.time,
            cutbacks: 0,
            total_iterations: 0,
        };
        let mut cutbacks = 0;

        while state.time < end - end_tolerance {
            let step = h.min(end - state.time);
            let attempt = self.step(state, step, log).and_then(|(next, result)| {
                let next_energy = self.energy(&next, &result.evaluation);
                self.check_energy(state, &next, &energy, &next_energy, max_total)?;
                Ok((next, result, next_energy))
            });
            match attempt {
                Ok((next, result, next_energy)) => {
                    summary.steps += 1;
                    summary.total_iterations += result.num_iterations;
                    energy = next_energy;
                    max_total = max_total.max(energy.total.abs());
                    let report = TimeStepReport {
                        step: summary.steps,
                        time: next.time,
                        time_step: step,
                        load_factor: next.load_factor,
                        iterations: result.num_iterations,
                        residual: result.residual,
                        status: result.status,
                        cutbacks,
                        energy,
                        contact: result.evaluation.contact,
                    };
                    log.info(
                        MODULE,
                        &format!(
                            "step {} converged: time = {:.6e}, dt = {:.3e}, iterations = {}, E_tot = {:.6e}",
                            report.step, report.time, step, report.iterations, energy.total
                        ),
                    )?;
                    observer.on_step(&next, &result.evaluation, &report)?;
                    *state = next;
                    cutbacks = 0;
                    h = (2.0 * h).min(self.settings.time_step);
                }
                Err(err) if err.is_recoverable() || matches!(err, SolverError::IntegrationDivergence(_)) => {
                    h = 0.5 * step;
                    cutbacks += 1;
                    summary.cutbacks += 1;
                    if h < self.settings.min_time_step {
                        return Err(match err {
                            SolverError::IntegrationDivergence(_) => err,
                            other => SolverError::IntegrationDivergence(format!(
                                "time step fell below {:.3e} at t = {:.6e}: {other}",
                                self.settings.min_time_step, state.time
                            )),
                        });
                    }
                    log.warn(MODULE, &format!("{err}; retrying with dt = {h:.3e}"))?;
                }
                Err(err) => return Err(err),
            }
        }
        summary.time = state.time;
        Ok(summary)
    }

    /// One Newmark step of size `h` from the converged `state`.
    pub fn step(&self, state: &RodState, h: f64, log: &mut RunLog) -> Result<(RodState, NonlinearResults)> {
        let mut trial = state.clone();
        trial.time = state.time + h;
        trial.load_factor = self.history.factor(trial.time);
        self.move_prescribed(&mut trial);

        let mut problem = TransientProblem {
            solver: self,
            previous: state,
            h,
        };
        let result = self.newton.solve(&mut problem, &mut trial, log)?;
        let evaluation = &result.evaluation;
        if let Some(settings) = &self.model.contact {
            settings.check_penetration(&evaluation.contact)?;
        }

        let rates = problem.rates(&trial);
        let velocities_before = self.spatial_velocities(state);
        trial.commit(
            state,
            evaluation.trial_plastic.clone(),
            evaluation.plastic_dissipation,
            evaluation.contact_active.clone(),
        );
        for (node, r) in rates.iter().enumerate() {
            trial.velocity[node] = r.velocity;
            trial.acceleration[node] = r.acceleration;
            trial.angular_velocity[node] = r.angular_velocity;
            trial.angular_acceleration[node] = r.angular_acceleration;
        }
        if self.config.is_damped() {
            // trapezoidal damping work over the step
            let after = self.spatial_velocities(&trial);
            let mid = (&velocities_before + &after) * 0.5;
            let force = self.damping_force(&trial, &mid, evaluation.tangent.as_ref())?;
            trial.viscous_dissipation = state.viscous_dissipation + h * mid.dot(&force).max(0.0);
        }
        Ok((trial, result))
    }

    fn move_prescribed(&self, state: &mut RodState) {
        let bcs = &self.model.bcs;
        let mut delta = DVector::zeros(self.model.num_dofs());
        let mut moved = false;
        for (k, p) in bcs.prescribed.iter().enumerate() {
            let target = state.load_factor * p.value;
            let d = target - state.applied_constraints[k];
            state.applied_constraints[k] = target;
            if d != 0.0 {
                delta[p.dof] = d;
                moved = true;
            }
        }
        if moved {
            state.apply_increment(&delta);
        }
    }

    /// Translational velocities and spatial angular velocities, full length.
    fn spatial_velocities(&self, state: &RodState) -> DVector<f64> {
        let mut v = DVector::zeros(self.model.num_dofs());
        for node in 0..self.model.num_nodes() {
            let base = DOFS_PER_NODE * node;
            v.fixed_rows_mut::<3>(base).copy_from(&state.velocity[node]);
            let omega = state.rotation[node] * state.angular_velocity[node];
            v.fixed_rows_mut::<3>(base + 3).copy_from(&omega);
        }
        v
    }

    /// Spatial rotary inertia `R J Rᵀ` of `node`.
    fn spatial_inertia(&self, state: &RodState, node: usize) -> Matrix3<f64> {
        let r = state.rotation[node];
        r * self.model.nodal_inertia[node] * r.transpose()
    }

    /// `C v` with `C = α M + β K`; `K` is assembled at `state` when not given.
    fn damping_force(
        &self,
        state: &RodState,
        velocity: &DVector<f64>,
        tangent: Option<&CooMatrix<f64>>,
    ) -> Result<DVector<f64>> {
        let model = self.model;
        let mut force = DVector::zeros(model.num_dofs());
        let alpha = self.config.alpha_damping;
        if alpha != 0.0 {
            for node in 0..model.num_nodes() {
                let base = DOFS_PER_NODE * node;
                let v: Vector3<f64> = velocity.fixed_rows::<3>(base).into();
                let w: Vector3<f64> = velocity.fixed_rows::<3>(base + 3).into();
                let mut seg = force.fixed_rows_mut::<3>(base);
                seg += v * (alpha * model.nodal_mass[node]);
                let mut seg = force.fixed_rows_mut::<3>(base + 3);
                seg += self.spatial_inertia(state, node) * w * alpha;
            }
        }
        let beta = self.config.beta_damping;
        if beta != 0.0 {
            let assembled;
            let k = match tangent {
                Some(k) => k,
                None => {
                    assembled = assembly::evaluate(model, state, true)?;
                    assembled.tangent.as_ref().ok_or_else(|| {
                        SolverError::ConvergenceFailure("tangent not available".to_string())
                    })?
                }
            };
            for (i, j, &value) in k.triplet_iter() {
                force[i] += beta * value * velocity[j];
            }
        }
        Ok(force)
    }

    fn energy(&self, state: &RodState, evaluation: &Evaluation) -> EnergyReport {
        let kinetic = kinetic_energy(self.model, state);
        let potential = evaluation.stored_energy;
        EnergyReport {
            potential,
            kinetic,
            dissipated: state.plastic_dissipation + state.viscous_dissipation,
            total: potential + kinetic,
        }
    }

    /// Rejects a step that gains mechanical energy without external work.
    fn check_energy(
        &self,
        before: &RodState,
        after: &RodState,
        energy_before: &EnergyReport,
        energy_after: &EnergyReport,
        max_total: f64,
    ) -> Result<()> {
        if !self.settings.energy_guard {
            return Ok(());
        }
        let unloaded = before.load_factor == 0.0 && after.load_factor == 0.0;
        if !unloaded {
            return Ok(());
        }
        let allowed = self.settings.energy_tolerance * max_total.max(energy_before.total.abs());
        let gain = energy_after.total - energy_before.total;
        if gain > allowed {
            return Err(SolverError::IntegrationDivergence(format!(
                "total energy grew by {gain:.3e} without external work at t = {:.6e}",
                after.time
            )));
        }
        Ok(())
    }
}

/// `½ m v·v + ½ Ω·J Ω` summed over the nodes.
pub fn kinetic_energy(model: &RodModel, state: &RodState) -> f64 {
    (0..model.num_nodes())
        .map(|node| {
            let v = state.velocity[node];
            let omega = state.angular_velocity[node];
            0.5 * model.nodal_mass[node] * v.norm_squared()
                + 0.5 * omega.dot(&(model.nodal_inertia[node] * omega))
        })
        .sum()
}

/// Time-discretized equilibrium of one step.
struct TransientProblem<'s, 'a> {
    solver: &'s DynamicSolver<'a>,
    previous: &'s RodState,
    h: f64,
}

impl TransientProblem<'_, '_> {
    fn rates(&self, state: &RodState) -> Vec<NodeRates> {
        let NewmarkConfig { beta, gamma, .. } = self.solver.config;
        let h = self.h;
        let prev = self.previous;
        (0..state.displacement.len())
            .map(|node| {
                let du = state.displacement[node] - prev.displacement[node];
                let a = prev.acceleration[node];
                let v = prev.velocity[node];
                let acceleration = (du - v * h - a * (h * h * (0.5 - beta))) / (beta * h * h);
                let velocity = v + (a * (1.0 - gamma) + acceleration * gamma) * h;

                let theta = log_map(&(prev.rotation[node].transpose() * state.rotation[node]));
                let big_a = prev.angular_acceleration[node];
                let omega = prev.angular_velocity[node];
                let angular_acceleration =
                    (theta - omega * h - big_a * (h * h * (0.5 - beta))) / (beta * h * h);
                let angular_velocity =
                    omega + (big_a * (1.0 - gamma) + angular_acceleration * gamma) * h;
                NodeRates {
                    velocity,
                    acceleration,
                    angular_velocity,
                    angular_acceleration,
                }
            })
            .collect()
    }
}

impl EquilibriumProblem for TransientProblem<'_, '_> {
    fn linearize(&mut self, state: &RodState, want_tangent: bool) -> Result<Linearization> {
        let solver = self.solver;
        let model = solver.model;
        let NewmarkConfig {
            beta,
            gamma,
            alpha_damping,
            beta_damping,
        } = solver.config;
        let h = self.h;
        let need_k = want_tangent || beta_damping != 0.0;
        let evaluation = assembly::evaluate(model, state, need_k)?;

        let rates = self.rates(state);
        let mut inertia = DVector::zeros(model.num_dofs());
        let mut velocity = DVector::zeros(model.num_dofs());
        for (node, r) in rates.iter().enumerate() {
            let base = DOFS_PER_NODE * node;
            let j = model.nodal_inertia[node];
            let rot = state.rotation[node];
            let moment = rot
                * (j * r.angular_acceleration + r.angular_velocity.cross(&(j * r.angular_velocity)));
            inertia
                .fixed_rows_mut::<3>(base)
                .copy_from(&(r.acceleration * model.nodal_mass[node]));
            inertia.fixed_rows_mut::<3>(base + 3).copy_from(&moment);
            velocity.fixed_rows_mut::<3>(base).copy_from(&r.velocity);
            velocity
                .fixed_rows_mut::<3>(base + 3)
                .copy_from(&(rot * r.angular_velocity));
        }
        let damping = if solver.config.is_damped() {
            solver.damping_force(state, &velocity, evaluation.tangent.as_ref())?
        } else {
            DVector::zeros(model.num_dofs())
        };

        let external = assembly::external_force(model, state, state.load_factor);
        let resisting = &evaluation.internal_force + &inertia + &damping;
        let bcs = &model.bcs;
        let residual = bcs.restrict(&(&external - &resisting));

        let tangent = match (&evaluation.tangent, want_tangent) {
            (Some(k), true) => {
                let mass_factor = 1.0 / (beta * h * h) + gamma * alpha_damping / (beta * h);
                let stiffness_factor = 1.0 + gamma * beta_damping / (beta * h);
                let mut coo = CooMatrix::new(model.num_dofs(), model.num_dofs());
                for (i, j, &value) in k.triplet_iter() {
                    coo.push(i, j, stiffness_factor * value);
                }
                assembly::push_load_stiffness(&mut coo, model, state, state.load_factor);
                for node in 0..model.num_nodes() {
                    let m = Matrix3::identity() * (model.nodal_mass[node] * mass_factor);
                    assembly::push_nodal_block(&mut coo, node, false, &m);
                    let j = solver.spatial_inertia(state, node) * mass_factor;
                    assembly::push_nodal_block(&mut coo, node, true, &j);
                }
                Some(assembly::reduce_to_free(&coo, bcs))
            }
            _ => None::<SparseTripletsF64>,
        };

        Ok(Linearization {
            residual,
            tangent,
            external_norm: external.norm(),
            internal_norm: resisting.norm(),
            evaluation,
        })
    }

    fn apply(&mut self, state: &mut RodState, delta: &DVector<f64>) {
        state.apply_increment(&self.solver.model.bcs.expand(delta));
    }
}
