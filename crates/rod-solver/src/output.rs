//! Result files of a run.
//!
//! One row per converged increment (or time step) goes to each enabled
//! series; all paths are relative to `output.dir`. Series opened with
//! `append = true` keep earlier content and receive only the final row.

use std::path::{Path, PathBuf};

use rod_io::{CsvSeries, RodSnapshot, SeriesMode, VtkSeries, write_json};

use crate::assembly::Evaluation;
use crate::config::{MonitorConfig, RunConfig, SeriesConfig};
use crate::contact::ContactSummary;
use crate::dynamic_solver::{TimeStepObserver, TimeStepReport};
use crate::error::{Result, SolverError};
use crate::model::{RodModel, RodState};
use crate::path_following::{IncrementObserver, IncrementReport};

pub const ENERGY_HEADER: [&str; 6] = ["time", "load", "E_pot", "E_kin", "E_diss", "E_tot"];
pub const CONTACT_HEADER: [&str; 5] = ["step", "load", "pairs", "min_gap", "force"];

/// CSV series over a set of monitored nodes.
struct NodeMonitor {
    series: CsvSeries,
    nodes: Vec<usize>,
}

pub struct OutputWriter<'a> {
    model: &'a RodModel,
    dir: PathBuf,
    disp: Option<NodeMonitor>,
    resp: Option<NodeMonitor>,
    energy: Option<CsvSeries>,
    contact: Option<CsvSeries>,
    visual: Option<VtkSeries>,
}

impl<'a> OutputWriter<'a> {
    /// Opens the enabled series. `transient` selects the energy series.
    pub fn create(config: &RunConfig, model: &'a RodModel, transient: bool) -> Result<Self> {
        let output = &config.output;
        let dir = output.dir();
        let disp = open_monitor(&dir, &output.disp, "disp.csv", model)?;
        let resp = open_monitor(&dir, &output.resp, "resp.csv", model)?;
        let energy = if transient {
            open_series(&dir, &output.energy, "energy.csv", Some(&ENERGY_HEADER[..]))?
        } else {
            None
        };
        let contact = if model.contact.is_some() {
            open_series(&dir, &output.contact, "contact.csv", Some(&CONTACT_HEADER[..]))?
        } else {
            None
        };
        let visual = output
            .visual
            .enabled
            .then(|| VtkSeries::new(dir.join(&output.visual.dir), output.visual.every));

        if output.config_dump.unwrap_or(true) {
            write_json(dir.join("config.json"), config)?;
        }

        Ok(Self {
            model,
            dir,
            disp,
            resp,
            energy,
            contact,
            visual,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rows common to static and transient runs.
    fn record(
        &mut self,
        step: usize,
        load: f64,
        state: &RodState,
        evaluation: &Evaluation,
        contact: &ContactSummary,
    ) -> Result<()> {
        if let Some(disp) = &mut self.disp {
            let row: Vec<f64> = disp
                .nodes
                .iter()
                .flat_map(|&n| state.dof_values(n))
                .collect();
            disp.series.push_row(&row)?;
        }
        if let Some(resp) = &mut self.resp {
            resp.series.push_row(&evaluation.resultant(&resp.nodes))?;
        }
        if let Some(series) = &mut self.contact {
            series.push_row(&[
                step as f64,
                load,
                contact.active_pairs as f64,
                contact.min_gap,
                contact.total_force,
            ])?;
        }
        if let Some(visual) = &mut self.visual {
            let snapshot = snapshot(self.model, state, evaluation, step);
            visual.write_step(step, &snapshot)?;
        }
        Ok(())
    }

    /// Flushes the held-back rows of appending series.
    pub fn finish(&mut self) -> Result<()> {
        for monitor in [&mut self.disp, &mut self.resp].into_iter().flatten() {
            monitor.series.finish()?;
        }
        for series in [&mut self.energy, &mut self.contact].into_iter().flatten() {
            series.finish()?;
        }
        Ok(())
    }

    /// Closes the series of a failed run without the held-back final rows.
    pub fn discard(&mut self) -> Result<()> {
        for monitor in [&mut self.disp, &mut self.resp].into_iter().flatten() {
            monitor.series.discard()?;
        }
        for series in [&mut self.energy, &mut self.contact].into_iter().flatten() {
            series.discard()?;
        }
        Ok(())
    }
}

impl IncrementObserver for OutputWriter<'_> {
    fn on_increment(
        &mut self,
        state: &RodState,
        evaluation: &Evaluation,
        report: &IncrementReport,
    ) -> Result<()> {
        self.record(report.step, report.load_factor, state, evaluation, &report.contact)
    }
}

impl TimeStepObserver for OutputWriter<'_> {
    fn on_step(
        &mut self,
        state: &RodState,
        evaluation: &Evaluation,
        report: &TimeStepReport,
    ) -> Result<()> {
        if let Some(series) = &mut self.energy {
            let e = &report.energy;
            series.push_row(&[
                report.time,
                report.load_factor,
                e.potential,
                e.kinetic,
                e.dissipated,
                e.total,
            ])?;
        }
        // the initial state only feeds the energy balance
        if report.step == 0 {
            return Ok(());
        }
        self.record(report.step, report.load_factor, state, evaluation, &report.contact)
    }
}

fn series_mode(append: bool) -> SeriesMode {
    if append {
        SeriesMode::AppendFinal
    } else {
        SeriesMode::PerIncrement
    }
}

fn open_series(
    dir: &Path,
    config: &SeriesConfig,
    default_name: &str,
    header: Option<&[&str]>,
) -> Result<Option<CsvSeries>> {
    if !config.enabled {
        return Ok(None);
    }
    let name = config.file.as_deref().unwrap_or(default_name);
    Ok(Some(CsvSeries::create(
        dir.join(name),
        header,
        series_mode(config.append),
    )?))
}

/// Resolves the monitored nodes; a monitor without nodes writes nothing.
fn open_monitor(
    dir: &Path,
    config: &MonitorConfig,
    default_name: &str,
    model: &RodModel,
) -> Result<Option<NodeMonitor>> {
    if !config.enabled {
        return Ok(None);
    }
    let mut nodes = Vec::new();
    if let Some(group) = &config.group {
        nodes.extend_from_slice(model.mesh.group(group)?);
    }
    for &id in &config.nodes {
        let index = model.mesh.node_index(id).ok_or_else(|| {
            SolverError::config(format!("output monitor '{default_name}': unknown node {id}"))
        })?;
        nodes.push(index);
    }
    if nodes.is_empty() {
        return Ok(None);
    }
    let name = config.file.as_deref().unwrap_or(default_name);
    let series = CsvSeries::create(dir.join(name), None, series_mode(config.append))?;
    Ok(Some(NodeMonitor { series, nodes }))
}

/// Deformed configuration with displacement and rotation vectors per node
/// and the axial force of the first integration point per element.
pub fn snapshot(model: &RodModel, state: &RodState, evaluation: &Evaluation, step: usize) -> RodSnapshot {
    let points = state
        .positions(model)
        .iter()
        .map(|p| [p.x, p.y, p.z])
        .collect();
    let displacement = state.displacement.iter().map(|u| [u.x, u.y, u.z]).collect();
    let rotation = state
        .rotation_vector
        .iter()
        .map(|r| [r.x, r.y, r.z])
        .collect();
    let axial = evaluation
        .stresses
        .iter()
        .map(|points| points.first().map_or(0.0, |s| s[2]))
        .collect();
    RodSnapshot {
        title: format!("{} step {step} load {}", model.title, state.load_factor),
        points,
        cells: model.elements.iter().map(|e| e.nodes.clone()).collect(),
        point_vectors: vec![
            ("displacement".to_string(), displacement),
            ("rotation".to_string(), rotation),
        ],
        cell_scalars: vec![("axial_force".to_string(), axial)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly;
    use rod_props::Props;
    use std::fs;

    fn make_config(dir: &Path, output: &str) -> RunConfig {
        let src = format!(
            "title = \"arm\"; model = {{ rods.arm = {{ start = [0,0,0]; end = [1,0,0]; elements = 2; material = \"m\"; }}; \
             materials.m = {{ young = 100; shear_modulus = 40; area = 0.5; area_moment = [0.1, 0.2]; }}; \
             constraints.clamp = {{ group = \"arm.start\"; dofs = [\"dx\",\"dy\",\"dz\",\"rx\",\"ry\",\"rz\"]; }}; \
             loads.tip = {{ group = \"arm.end\"; dof = \"dx\"; value = 1; }}; }}; \
             output = {{ dir = \"{}\"; {output} }};",
            dir.display()
        );
        RunConfig::from_props(&Props::parse_str(&src).expect("parse")).expect("config")
    }

    fn make_report(step: usize, load_factor: f64) -> IncrementReport {
        IncrementReport {
            step,
            load_factor,
            load_increment: 0.5,
            arc_length: None,
            iterations: 1,
            residual: 0.0,
            status: crate::nonlinear_solver::ConvergenceStatus::Converged,
            cutbacks: 0,
            stored_energy: 0.0,
            plastic_dissipation: 0.0,
            contact: ContactSummary::default(),
        }
    }

    #[test]
    fn writes_monitor_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = make_config(
            dir.path(),
            "disp.group = \"arm.end\"; resp.group = \"arm.start\"; visual.enabled = true;",
        );
        let model = RodModel::assemble(&config).expect("model");
        let mut state = RodState::reference(&model);
        let tip = model.mesh.group("arm.end").expect("tip")[0];
        let mut writer = OutputWriter::create(&config, &model, false).expect("writer");

        for step in 1..=2 {
            state.displacement[tip].x = 0.01 * step as f64;
            let evaluation = assembly::evaluate(&model, &state, false).expect("evaluate");
            writer
                .on_increment(&state, &evaluation, &make_report(step, 0.5 * step as f64))
                .expect("row");
        }
        writer.finish().expect("finish");

        let disp = fs::read_to_string(dir.path().join("disp.csv")).expect("disp");
        let rows: Vec<&str> = disp.lines().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].split(',').count(), 6);
        assert!(rows[1].starts_with("2.000000000000e-2,0,"));
        let resp = fs::read_to_string(dir.path().join("resp.csv")).expect("resp");
        assert_eq!(resp.lines().count(), 2);
        assert!(dir.path().join("visual/step_0002.vtk").exists());
        assert!(dir.path().join("config.json").exists());
        assert!(!dir.path().join("energy.csv").exists());
    }

    #[test]
    fn append_keeps_earlier_runs_and_writes_final_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = make_config(dir.path(), "disp = { group = \"arm.end\"; append = true; };");
        let model = RodModel::assemble(&config).expect("model");
        let state = RodState::reference(&model);
        let evaluation = assembly::evaluate(&model, &state, false).expect("evaluate");

        for _ in 0..2 {
            let mut writer = OutputWriter::create(&config, &model, false).expect("writer");
            for step in 1..=3 {
                writer
                    .on_increment(&state, &evaluation, &make_report(step, 1.0))
                    .expect("row");
            }
            writer.finish().expect("finish");
        }
        let disp = fs::read_to_string(dir.path().join("disp.csv")).expect("disp");
        assert_eq!(disp.lines().count(), 2);
    }

    #[test]
    fn discarded_append_run_leaves_file_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = make_config(dir.path(), "disp = { group = \"arm.end\"; append = true; };");
        let model = RodModel::assemble(&config).expect("model");
        let state = RodState::reference(&model);
        let evaluation = assembly::evaluate(&model, &state, false).expect("evaluate");

        let mut writer = OutputWriter::create(&config, &model, false).expect("writer");
        writer
            .on_increment(&state, &evaluation, &make_report(1, 1.0))
            .expect("row");
        writer.finish().expect("finish");
        let before = fs::read_to_string(dir.path().join("disp.csv")).expect("disp");

        let mut failed = OutputWriter::create(&config, &model, false).expect("writer");
        failed
            .on_increment(&state, &evaluation, &make_report(1, 0.5))
            .expect("row");
        failed.discard().expect("discard");
        let after = fs::read_to_string(dir.path().join("disp.csv")).expect("disp");
        assert_eq!(after, before);
    }

    #[test]
    fn unknown_monitor_node_is_a_configuration_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = make_config(dir.path(), "disp.nodes = [999];");
        let model = RodModel::assemble(&config).expect("model");
        let err = OutputWriter::create(&config, &model, false)
            .err()
            .expect("error");
        assert!(err.is_configuration());
    }
}
