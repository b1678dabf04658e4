//! Run driver: configuration to model, solver and result files.

use std::path::{Path, PathBuf};

use rod_io::RunLog;
use rod_model::ModelSummary;
use rod_props::Props;

use crate::backend::default_backend;
use crate::config::{RunConfig, SolverMode};
use crate::dynamic_solver::DynamicSolver;
use crate::error::Result;
use crate::model::{RodModel, RodState};
use crate::output::OutputWriter;
use crate::path_following::PathFollowing;

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResults {
    pub mode: SolverMode,
    pub num_dofs: usize,
    pub num_free: usize,
    /// Converged increments or time steps
    pub steps: usize,
    pub cutbacks: usize,
    pub load_factor: f64,
    pub time: f64,
    pub output_dir: PathBuf,
    pub message: String,
}

/// Main analysis pipeline orchestrator
pub struct AnalysisPipeline {
    config: RunConfig,
}

impl AnalysisPipeline {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    /// Reads `project` and applies `key=value` overrides in order.
    pub fn from_project(project: &Path, overrides: &[String]) -> Result<Self> {
        Ok(Self::new(RunConfig::load(project, overrides)?))
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Assembles the model and runs the configured analysis. Configuration
    /// problems are reported before any file is written; later failures are
    /// recorded as the last line of the run log after flushing all series.
    pub fn run(&self) -> Result<AnalysisResults> {
        let config = &self.config;
        let mode = config.mode()?;
        let model = RodModel::assemble(config)?;
        let backend = default_backend();

        // construct the solvers first so their configuration checks fail early
        let path = match mode {
            SolverMode::Transient => None,
            _ => Some(PathFollowing::new(&model, &config.solver, backend.as_ref())?),
        };
        let dynamic = match mode {
            SolverMode::Transient => Some(DynamicSolver::new(&model, &config.solver, backend.as_ref())?),
            _ => None,
        };

        let dir = config.output.dir();
        let log_config = &config.output.log;
        let mut log = RunLog::create(dir.join(&log_config.file), &config.title, log_config.echo)?;
        let stats = model.mesh.statistics();
        log.info(
            "model",
            &format!(
                "{} rods, {} elements, {} nodes, {} dofs ({} free), mode {mode:?}",
                stats.num_rods,
                stats.num_elements,
                stats.num_nodes,
                stats.num_dofs,
                model.bcs.num_free()
            ),
        )?;
        let mut writer = OutputWriter::create(config, &model, mode == SolverMode::Transient)?;

        let mut state = RodState::reference(&model);
        let outcome = match (&path, &dynamic) {
            (Some(path), _) => path
                .run(&mut state, &mut log, &mut writer)
                .map(|s| (s.increments, s.cutbacks)),
            (_, Some(dynamic)) => dynamic
                .run(&mut state, &mut log, &mut writer)
                .map(|s| (s.steps, s.cutbacks)),
            (None, None) => Ok((0, 0)),
        };
        // a failed run must not append its partial result
        let flushed = match &outcome {
            Ok(_) => writer.finish(),
            Err(_) => writer.discard(),
        };

        match outcome.and_then(|steps| flushed.map(|()| steps)) {
            Ok((steps, cutbacks)) => {
                let message = format!(
                    "finished after {steps} steps ({cutbacks} cutbacks): load factor {:.6e}, time {:.6e}",
                    state.load_factor, state.time
                );
                log.info("run", &message)?;
                Ok(AnalysisResults {
                    mode,
                    num_dofs: model.num_dofs(),
                    num_free: model.bcs.num_free(),
                    steps,
                    cutbacks,
                    load_factor: state.load_factor,
                    time: state.time,
                    output_dir: dir,
                    message,
                })
            }
            Err(err) => {
                // report the solver error even if the log cannot be written
                let _ = log.error(&err.to_string());
                Err(err)
            }
        }
    }
}

/// Model overview printed by `rod-solver inspect`.
pub fn inspect(project: &Path, overrides: &[String]) -> Result<String> {
    let props = Props::layered(Props::new(), Some(project), overrides)?;
    let summary = ModelSummary::from_props(&props);
    let config = RunConfig::from_props(&props)?;
    let model = RodModel::assemble(&config)?;

    let mut lines = vec![
        format!("title: {}", config.title),
        format!("mode: {}", summary.solver_mode),
        format!("rods: {}", summary.rod_names.join(", ")),
        model.mesh.statistics().format(),
        format!("free dofs: {}", model.bcs.num_free()),
        format!("materials: {}", summary.material_defs),
        format!("loads: {}", summary.load_defs),
        format!("constraints: {}", summary.constraint_defs),
        format!("total mass: {:.6e}", model.total_mass()),
        format!("contact: {}", summary.has_contact),
        format!("plasticity: {}", summary.has_plasticity),
    ];
    if let Some(contact) = &model.contact {
        lines.push(format!(
            "contact rods: {} (radius {}, penalty {})",
            contact.rods.len(),
            contact.radius,
            contact.penalty
        ));
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SolverError;
    use std::fs;

    fn write_project(dir: &Path, solver: &str) -> PathBuf {
        let path = dir.join("bar.props");
        let src = format!(
            "title = \"bar\";\n\
             model = {{\n\
               rods.bar = {{ start = [0,0,0]; end = [1,0,0]; elements = 2; material = \"m\"; }};\n\
               materials.m = {{ young = 1000; shear_modulus = 400; density = 1; area = 0.1; area_moment = [0.01, 0.01]; }};\n\
               constraints.clamp = {{ group = \"bar.start\"; dofs = [\"dx\",\"dy\",\"dz\",\"rx\",\"ry\",\"rz\"]; }};\n\
               loads.pull = {{ group = \"bar.end\"; dof = \"dx\"; value = 1; }};\n\
             }};\n\
             solver = {{ {solver} }};\n\
             output = {{ disp.group = \"bar.end\"; resp.group = \"bar.start\"; }};\n"
        );
        fs::write(&path, src).expect("write project");
        path
    }

    #[test]
    fn static_run_writes_outputs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let project = write_project(dir.path(), "mode = \"force\"; steps.initial = 0.25;");
        let out = dir.path().join("out");
        let pipeline = AnalysisPipeline::from_project(
            &project,
            &[format!("output.dir={}", out.display())],
        )
        .expect("config");
        let results = pipeline.run().expect("run");
        assert_eq!(results.steps, 4);
        assert_eq!(results.mode, SolverMode::ForceControl);

        let disp = fs::read_to_string(out.join("disp.csv")).expect("disp");
        assert_eq!(disp.lines().count(), 4);
        let log = fs::read_to_string(out.join("run.log")).expect("log");
        assert!(log.contains("module 'nonlin' : residual scale factor = "));
        assert!(log.contains("module 'nonlin' : iter = 1, scaled residual = "));
        assert!(out.join("config.json").exists());
        assert!(!out.join("energy.csv").exists());
    }

    #[test]
    fn failing_run_ends_log_with_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let project = write_project(
            dir.path(),
            "mode = \"force\"; max_iterations = 1; steps = { initial = 1.0; min = 0.5; };",
        );
        let out = dir.path().join("out");
        let pipeline = AnalysisPipeline::from_project(
            &project,
            &[
                format!("output.dir={}", out.display()),
                "model.loads.pull.dof=dz".to_string(),
                "model.loads.pull.value=50".to_string(),
            ],
        )
        .expect("config");
        let err = pipeline.run().expect_err("must fail");
        assert!(!err.is_configuration());
        let log = fs::read_to_string(out.join("run.log")).expect("log");
        let last = log.lines().last().expect("line");
        assert!(last.starts_with("error:"), "{last}");
    }

    #[test]
    fn failed_run_does_not_append_partial_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let project = write_project(dir.path(), "mode = \"force\"; steps.initial = 0.25;");
        let out = dir.path().join("out");
        let run = |extra: &[&str]| {
            let mut overrides = vec![
                format!("output.dir={}", out.display()),
                "output.disp.append=true".to_string(),
            ];
            overrides.extend(extra.iter().map(|s| s.to_string()));
            AnalysisPipeline::from_project(&project, &overrides)
                .expect("config")
                .run()
        };

        run(&[]).expect("run");
        let before = fs::read_to_string(out.join("disp.csv")).expect("disp");
        assert_eq!(before.lines().count(), 1);

        // two increments converge, then the step budget runs out
        let err = run(&["solver.steps.max_steps=2"]).expect_err("must stop short");
        assert!(matches!(err, SolverError::ConvergenceFailure(_)));
        let after = fs::read_to_string(out.join("disp.csv")).expect("disp");
        assert_eq!(after, before);
    }

    #[test]
    fn configuration_errors_write_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let project = write_project(dir.path(), "mode = \"displacement\";");
        let out = dir.path().join("out");
        let pipeline = AnalysisPipeline::from_project(
            &project,
            &[format!("output.dir={}", out.display())],
        )
        .expect("config");
        let err = pipeline.run().expect_err("no prescribed motion");
        assert!(err.is_configuration());
        assert!(!out.exists());
    }

    #[test]
    fn inspect_reports_model() {
        let dir = tempfile::tempdir().expect("tempdir");
        let project = write_project(dir.path(), "mode = \"transient\";");
        let text = inspect(&project, &[]).expect("inspect");
        assert!(text.contains("mode: transient"));
        assert!(text.contains("rods: bar"));
        assert!(text.contains("Elements: 2"));
    }
}
