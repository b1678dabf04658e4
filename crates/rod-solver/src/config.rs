//! Typed run configuration.
//!
//! The layered property tree (defaults, project file, `key=value`
//! overrides) is converted to JSON and deserialized into [`RunConfig`].
//! Unknown keys are rejected so that typos surface as configuration errors
//! instead of silently falling back to defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rod_props::Props;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SolverError};
use crate::materials::{HardeningKind, RodMaterial, SectionProperties};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default)]
    pub title: String,
    pub model: ModelConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl RunConfig {
    pub fn from_props(props: &Props) -> Result<Self> {
        let json = rod_props::to_json(props);
        let config: RunConfig =
            serde_json::from_value(json).map_err(|err| SolverError::config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the project file and applies the overrides in order.
    pub fn load(project: &Path, overrides: &[String]) -> Result<Self> {
        let props = Props::layered(Props::new(), Some(project), overrides)?;
        Self::from_props(&props)
    }

    pub fn mode(&self) -> Result<SolverMode> {
        SolverMode::parse(&self.solver.mode)
    }

    fn validate(&self) -> Result<()> {
        self.mode()?;
        let s = &self.solver;
        if !(s.tolerance > 0.0) {
            return Err(SolverError::config("solver.tolerance must be positive"));
        }
        if s.max_iterations == 0 {
            return Err(SolverError::config("solver.max_iterations must be at least 1"));
        }
        if !(s.steps.initial > 0.0) || !(s.steps.min > 0.0) || s.steps.min > s.steps.initial {
            return Err(SolverError::config(
                "solver.steps: need 0 < min <= initial step size",
            ));
        }
        if s.steps.growth_factor < 1.0 {
            return Err(SolverError::config("solver.steps.growth_factor must be >= 1"));
        }
        let t = &s.transient;
        if !(t.time_step > 0.0) || !(t.duration > 0.0) || !(t.min_time_step > 0.0) {
            return Err(SolverError::config(
                "solver.transient: time_step, min_time_step and duration must be positive",
            ));
        }
        if self.model.rods.is_empty() {
            return Err(SolverError::config("model.rods: at least one rod is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverMode {
    ForceControl,
    DisplacementControl,
    ArcLength,
    Transient,
}

impl SolverMode {
    pub fn parse(name: &str) -> Result<Self> {
        let key: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "force" | "forcecontrol" | "load" | "loadcontrol" => Ok(SolverMode::ForceControl),
            "displacement" | "displacementcontrol" | "disp" => Ok(SolverMode::DisplacementControl),
            "arclength" | "arclengthcontrol" | "riks" => Ok(SolverMode::ArcLength),
            "transient" | "dynamic" | "dynamics" => Ok(SolverMode::Transient),
            _ => Err(SolverError::config(format!(
                "unknown solver.mode '{name}' (force, displacement, arc_length, transient)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Explicit nodes as `[id, x, y, z]` rows.
    #[serde(default)]
    pub nodes: Vec<[f64; 4]>,
    pub rods: BTreeMap<String, RodConfig>,
    pub materials: BTreeMap<String, MaterialConfig>,
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<i32>>,
    #[serde(default)]
    pub constraints: BTreeMap<String, BoundaryConfig>,
    #[serde(default)]
    pub loads: BTreeMap<String, BoundaryConfig>,
    #[serde(default)]
    pub contact: Option<ContactConfig>,
    /// `reduced` (n-1 Gauss points) or `full` (n points).
    #[serde(default = "default_integration")]
    pub integration: String,
    /// Generated rod end points that coincide with existing nodes share them.
    #[serde(default = "default_true")]
    pub merge_endpoints: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RodConfig {
    pub material: String,
    #[serde(default)]
    pub start: Option<[f64; 3]>,
    #[serde(default)]
    pub end: Option<[f64; 3]>,
    #[serde(default = "default_one")]
    pub elements: usize,
    /// Polynomial order of the elements (1 to 3).
    #[serde(default = "default_one")]
    pub order: usize,
    #[serde(default)]
    pub start_node: Option<i32>,
    #[serde(default)]
    pub end_node: Option<i32>,
    /// Explicit element rows referencing `model.nodes`.
    #[serde(default)]
    pub connectivity: Option<Vec<Vec<i32>>>,
    /// Direction of the local `e_y` axis; defaults to the minimal rotation of
    /// the global `z` axis onto the rod tangent.
    #[serde(default)]
    pub material_ey: Option<[f64; 3]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalars {
    One(f64),
    Many(Vec<f64>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MaterialConfig {
    pub young: f64,
    #[serde(default)]
    pub shear_modulus: Option<f64>,
    #[serde(default, alias = "poisson")]
    pub poisson_ratio: Option<f64>,
    #[serde(default)]
    pub density: f64,
    /// `circle`, `rectangle` or `square`; explicit section values otherwise.
    #[serde(default)]
    pub cross_section: Option<String>,
    #[serde(default)]
    pub radius: Option<f64>,
    #[serde(default)]
    pub side_length: Option<Scalars>,
    #[serde(default)]
    pub area: Option<f64>,
    #[serde(default)]
    pub area_moment: Option<Scalars>,
    #[serde(default)]
    pub polar_moment: Option<f64>,
    #[serde(default, alias = "shear_factor")]
    pub shear_correction: Option<f64>,
    #[serde(default = "default_unit")]
    pub inertia_correct: f64,
    #[serde(default)]
    pub plasticity: Option<PlasticityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlasticityConfig {
    pub kind: String,
    /// Limits for `[n1, n2, n3, m1, m2, m3]`; zero means unlimited.
    #[serde(default, alias = "yield")]
    pub yield_limits: Vec<f64>,
    #[serde(default)]
    pub isotropic_modulus: f64,
    /// Kinematic hardening modulus as a fraction of the elastic stiffness.
    #[serde(default)]
    pub kinematic_modulus: f64,
}

impl MaterialConfig {
    pub fn build(&self, name: &str) -> Result<RodMaterial> {
        let shear_modulus = match (self.shear_modulus, self.poisson_ratio) {
            (Some(g), _) => g,
            (None, Some(nu)) => self.young / (2.0 * (1.0 + nu)),
            (None, None) => {
                return Err(SolverError::config(format!(
                    "material '{name}': shear_modulus or poisson_ratio is required"
                )));
            }
        };

        let mut section = match self.cross_section.as_deref() {
            None => {
                let area = self.area.ok_or_else(|| {
                    SolverError::config(format!(
                        "material '{name}': area or cross_section is required"
                    ))
                })?;
                let moments = match &self.area_moment {
                    Some(Scalars::One(i)) => [*i, *i],
                    Some(Scalars::Many(v)) if v.len() == 1 => [v[0], v[0]],
                    Some(Scalars::Many(v)) if v.len() == 2 => [v[0], v[1]],
                    _ => {
                        return Err(SolverError::config(format!(
                            "material '{name}': area_moment needs one or two values"
                        )));
                    }
                };
                SectionProperties {
                    area,
                    area_moment: moments,
                    polar_moment: moments[0] + moments[1],
                    shear_factor: 5.0 / 6.0,
                }
            }
            Some("circle") => SectionProperties::circle(self.radius.ok_or_else(|| {
                SolverError::config(format!("material '{name}': circle needs a radius"))
            })?),
            Some("square") => match &self.side_length {
                Some(Scalars::One(a)) => SectionProperties::square(*a),
                Some(Scalars::Many(v)) if v.len() == 1 => SectionProperties::square(v[0]),
                _ => {
                    return Err(SolverError::config(format!(
                        "material '{name}': a square has exactly one side_length"
                    )));
                }
            },
            Some("rectangle") => match &self.side_length {
                Some(Scalars::Many(v)) if v.len() == 2 => SectionProperties::rectangle(v[0], v[1]),
                _ => {
                    return Err(SolverError::config(format!(
                        "material '{name}': a rectangle has two side_length values"
                    )));
                }
            },
            Some(other) => {
                return Err(SolverError::config(format!(
                    "material '{name}': unknown cross_section '{other}' (circle, rectangle, square)"
                )));
            }
        };
        if let Some(j) = self.polar_moment {
            section.polar_moment = j;
        }
        if let Some(k) = self.shear_correction {
            section.shear_factor = k;
        }

        let mut material =
            RodMaterial::elastic(name, self.young, shear_modulus, self.density, section)?;
        material.inertia_correction = self.inertia_correct;

        if let Some(plasticity) = &self.plasticity {
            let kind = HardeningKind::parse(&plasticity.kind).ok_or_else(|| {
                SolverError::config(format!(
                    "material '{name}': unknown plasticity kind '{}'",
                    plasticity.kind
                ))
            })?;
            let mut limits = [0.0; 6];
            if plasticity.yield_limits.len() > 6 {
                return Err(SolverError::config(format!(
                    "material '{name}': at most six yield limits"
                )));
            }
            limits[..plasticity.yield_limits.len()].copy_from_slice(&plasticity.yield_limits);
            material = material.with_plasticity(
                kind,
                &limits,
                plasticity.isotropic_modulus,
                plasticity.kinematic_modulus,
            )?;
        }
        Ok(material)
    }
}

/// A set of prescribed degrees of freedom on a node group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoundaryConfig {
    pub group: String,
    #[serde(default)]
    pub dof: Option<String>,
    #[serde(default)]
    pub dofs: Vec<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub values: Vec<f64>,
    /// `force` or `displacement`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Load turns with the node rotation instead of keeping its direction.
    #[serde(default)]
    pub follower: bool,
}

impl BoundaryConfig {
    /// `(dof name, value)` pairs of this entry.
    pub fn entries(&self, name: &str) -> Result<Vec<(String, f64)>> {
        let dofs: Vec<String> = self.dof.iter().chain(self.dofs.iter()).cloned().collect();
        if dofs.is_empty() {
            return Err(SolverError::config(format!("'{name}': no dofs given")));
        }
        if self.values.is_empty() {
            let value = self.value.unwrap_or(0.0);
            return Ok(dofs.into_iter().map(|d| (d, value)).collect());
        }
        if self.values.len() != dofs.len() {
            return Err(SolverError::config(format!(
                "'{name}': {} dofs but {} values",
                dofs.len(),
                self.values.len()
            )));
        }
        Ok(dofs.into_iter().zip(self.values.iter().copied()).collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContactConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Rods taking part; all rods when empty.
    #[serde(default)]
    pub rods: Vec<String>,
    pub radius: f64,
    pub penalty: f64,
    /// Band, as a fraction of the contact diameter, within which a pair that
    /// was active in the last converged state is kept over a new candidate.
    #[serde(default = "default_hysteresis")]
    pub hysteresis: f64,
    #[serde(default = "default_max_pairs")]
    pub max_pairs: usize,
    /// Largest admissible penetration of a converged state; defaults to the
    /// rod radius.
    #[serde(default)]
    pub max_penetration: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolverConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_divergence_factor")]
    pub divergence_factor: f64,
    #[serde(default)]
    pub line_search: bool,
    /// Accept the last iterate after `max_iterations` if its scaled residual
    /// is below `lenient_tolerance`.
    #[serde(default)]
    pub lenient: bool,
    #[serde(default = "default_lenient_tolerance")]
    pub lenient_tolerance: f64,
    #[serde(default)]
    pub steps: StepConfig,
    #[serde(default)]
    pub arc_length: ArcLengthConfig,
    #[serde(default)]
    pub transient: TransientConfig,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            tolerance: default_tolerance(),
            max_iterations: default_max_iterations(),
            divergence_factor: default_divergence_factor(),
            line_search: false,
            lenient: false,
            lenient_tolerance: default_lenient_tolerance(),
            steps: StepConfig::default(),
            arc_length: ArcLengthConfig::default(),
            transient: TransientConfig::default(),
        }
    }
}

/// Load-factor stepping for force and displacement control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    #[serde(default = "default_step", alias = "size")]
    pub initial: f64,
    #[serde(default = "default_min_step")]
    pub min: f64,
    #[serde(default = "default_unit")]
    pub max: f64,
    #[serde(default = "default_unit")]
    pub max_load_factor: f64,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_optimal_iterations")]
    pub optimal_iterations: usize,
    /// Step growth after an easy increment; `1` keeps the step fixed.
    #[serde(default = "default_unit")]
    pub growth_factor: f64,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            initial: default_step(),
            min: default_min_step(),
            max: 1.0,
            max_load_factor: 1.0,
            max_steps: default_max_steps(),
            optimal_iterations: default_optimal_iterations(),
            growth_factor: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArcLengthConfig {
    /// Load-factor increment of the first predictor; fixes the initial arc
    /// length.
    #[serde(default = "default_step")]
    pub initial_load_increment: f64,
    /// Weight of the load term in the arc-length constraint (0 gives the
    /// cylindrical variant).
    #[serde(default)]
    pub load_scale: f64,
    /// Arc length bounds relative to the initial arc length.
    #[serde(default = "default_min_arc_ratio")]
    pub min_ratio: f64,
    #[serde(default = "default_max_arc_ratio")]
    pub max_ratio: f64,
    #[serde(default = "default_optimal_iterations")]
    pub optimal_iterations: usize,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// The path stops once `|lambda|` exceeds this value.
    #[serde(default = "default_unit")]
    pub max_load_factor: f64,
}

impl Default for ArcLengthConfig {
    fn default() -> Self {
        Self {
            initial_load_increment: default_step(),
            load_scale: 0.0,
            min_ratio: default_min_arc_ratio(),
            max_ratio: default_max_arc_ratio(),
            optimal_iterations: default_optimal_iterations(),
            max_steps: default_max_steps(),
            max_load_factor: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransientConfig {
    #[serde(default = "default_unit")]
    pub duration: f64,
    #[serde(default = "default_time_step")]
    pub time_step: f64,
    #[serde(default = "default_min_time_step")]
    pub min_time_step: f64,
    /// `dissipative`, `average_acceleration`, `linear_acceleration` or
    /// `fox_goodwin`.
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub beta: Option<f64>,
    #[serde(default)]
    pub gamma: Option<f64>,
    /// Rayleigh coefficients `[alpha, beta]` for `C = alpha M + beta K`.
    #[serde(default)]
    pub rayleigh: Option<[f64; 2]>,
    #[serde(default)]
    pub modal_damping: Option<ModalDampingConfig>,
    #[serde(default = "default_true")]
    pub energy_guard: bool,
    #[serde(default = "default_energy_tolerance")]
    pub energy_tolerance: f64,
    #[serde(default)]
    pub load: LoadHistoryConfig,
}

impl Default for TransientConfig {
    fn default() -> Self {
        Self {
            duration: 1.0,
            time_step: default_time_step(),
            min_time_step: default_min_time_step(),
            scheme: default_scheme(),
            beta: None,
            gamma: None,
            rayleigh: None,
            modal_damping: None,
            energy_guard: true,
            energy_tolerance: default_energy_tolerance(),
            load: LoadHistoryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModalDampingConfig {
    /// Two frequencies in Hz.
    pub frequencies: [f64; 2],
    pub ratios: [f64; 2],
}

/// Time history multiplying all loads and prescribed values of a transient
/// run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum LoadHistoryConfig {
    Constant {
        #[serde(default = "default_unit")]
        value: f64,
    },
    Ramp {
        duration: f64,
    },
    /// Full load on `[0, duration]`, none afterwards.
    Pulse {
        duration: f64,
    },
    /// Linear rise to full load at `duration / 2` and back to zero.
    Hat {
        duration: f64,
    },
    Table {
        times: Vec<f64>,
        values: Vec<f64>,
    },
}

impl Default for LoadHistoryConfig {
    fn default() -> Self {
        LoadHistoryConfig::Constant { value: 1.0 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Output directory; relative paths resolve against the working
    /// directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub disp: MonitorConfig,
    #[serde(default)]
    pub resp: MonitorConfig,
    #[serde(default)]
    pub energy: SeriesConfig,
    #[serde(default)]
    pub contact: SeriesConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub visual: VisualConfig,
    /// Write the resolved configuration as `config.json`.
    #[serde(default)]
    pub config_dump: Option<bool>,
}

impl OutputConfig {
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Nodes whose displacements (or summed internal forces) form one CSV row
/// per converged increment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub nodes: Vec<i32>,
    #[serde(default)]
    pub group: Option<String>,
    /// Append only the final row to an existing file.
    #[serde(default)]
    pub append: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: None,
            nodes: Vec::new(),
            group: None,
            append: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeriesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub append: bool,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: None,
            append: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(default = "default_log_file")]
    pub file: String,
    /// Also print log lines on stdout.
    #[serde(default)]
    pub echo: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            echo: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VisualConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_visual_dir")]
    pub dir: String,
    #[serde(default = "default_one")]
    pub every: usize,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_visual_dir(),
            every: 1,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_one() -> usize {
    1
}

fn default_unit() -> f64 {
    1.0
}

fn default_integration() -> String {
    "reduced".to_string()
}

fn default_hysteresis() -> f64 {
    0.1
}

fn default_max_pairs() -> usize {
    10_000
}

fn default_mode() -> String {
    "force".to_string()
}

fn default_tolerance() -> f64 {
    1e-8
}

fn default_max_iterations() -> usize {
    20
}

fn default_divergence_factor() -> f64 {
    1e6
}

fn default_lenient_tolerance() -> f64 {
    1e-4
}

fn default_step() -> f64 {
    0.1
}

fn default_min_step() -> f64 {
    1e-6
}

fn default_max_steps() -> usize {
    1000
}

fn default_optimal_iterations() -> usize {
    4
}

fn default_min_arc_ratio() -> f64 {
    1e-4
}

fn default_max_arc_ratio() -> f64 {
    10.0
}

fn default_time_step() -> f64 {
    0.01
}

fn default_min_time_step() -> f64 {
    1e-8
}

fn default_scheme() -> String {
    "dissipative".to_string()
}

fn default_energy_tolerance() -> f64 {
    1e-5
}

fn default_log_file() -> String {
    "run.log".to_string()
}

fn default_visual_dir() -> String {
    "visual".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = r#"
title = "cantilever";
model = {
  rods.arm = { start = [0, 0, 0]; end = [1, 0, 0]; elements = 4; order = 2; material = "steel"; };
  materials.steel = { young = 210e3; poisson_ratio = 0.3; area = 1e-2; area_moment = [2e-5, 3e-5]; };
  constraints.clamp = { group = "arm.start"; dofs = ["dx", "dy", "dz", "rx", "ry", "rz"]; };
  loads.tip = { group = "arm.end"; dof = "dz"; value = -10; };
};
solver = { mode = "force"; steps.initial = 0.25; };
output.disp = { group = "arm.end"; };
"#;

    #[test]
    fn parses_project_with_defaults() {
        let props = Props::parse_str(PROJECT).expect("parse");
        let config = RunConfig::from_props(&props).expect("valid config");
        assert_eq!(config.title, "cantilever");
        assert_eq!(config.mode().expect("mode"), SolverMode::ForceControl);
        assert_eq!(config.solver.steps.initial, 0.25);
        assert_eq!(config.solver.max_iterations, 20);
        assert_eq!(config.model.rods["arm"].order, 2);
        assert_eq!(config.output.log.file, "run.log");
        assert_eq!(config.output.disp.group.as_deref(), Some("arm.end"));

        let steel = config.model.materials["steel"].build("steel").expect("material");
        assert!((steel.shear_modulus - 210e3 / 2.6).abs() < 1e-9);
        assert_eq!(steel.section.area_moment, [2e-5, 3e-5]);
        assert!((steel.section.polar_moment - 5e-5).abs() < 1e-18);

        let entries = config.model.loads["tip"].entries("tip").expect("entries");
        assert_eq!(entries, vec![("dz".to_string(), -10.0)]);
    }

    #[test]
    fn overrides_take_precedence() {
        let mut props = Props::parse_str(PROJECT).expect("parse");
        props.apply_override("solver.mode=arc_length").expect("override");
        props.apply_override("solver.tolerance=1e-10").expect("override");
        let config = RunConfig::from_props(&props).expect("valid config");
        assert_eq!(config.mode().expect("mode"), SolverMode::ArcLength);
        assert_eq!(config.solver.tolerance, 1e-10);
    }

    #[test]
    fn unknown_keys_and_modes_are_configuration_errors() {
        let mut props = Props::parse_str(PROJECT).expect("parse");
        props.apply_override("solver.tolerence=1e-3").expect("override");
        let err = RunConfig::from_props(&props).expect_err("typo must fail");
        assert!(err.is_configuration());

        let mut props = Props::parse_str(PROJECT).expect("parse");
        props.apply_override("solver.mode=quasi").expect("override");
        let err = RunConfig::from_props(&props).expect_err("bad mode");
        assert!(err.is_configuration());
    }

    #[test]
    fn builds_named_cross_sections() {
        let props = Props::parse_str(
            r#"young = 100; shear_modulus = 40; cross_section = "rectangle"; side_length = [0.2, 0.1];"#,
        )
        .expect("parse");
        let material: MaterialConfig =
            serde_json::from_value(rod_props::to_json(&props)).expect("material config");
        let built = material.build("plate").expect("material");
        assert!((built.section.area - 0.02).abs() < 1e-15);
        assert!((built.section.shear_factor - 5.0 / 6.0).abs() < 1e-15);

        let props = Props::parse_str(r#"young = 100; cross_section = "hexagon"; poisson = 0.25;"#)
            .expect("parse");
        let material: MaterialConfig =
            serde_json::from_value(rod_props::to_json(&props)).expect("material config");
        assert!(material.build("odd").is_err());
    }

    #[test]
    fn load_history_is_tagged_by_kind() {
        let props = Props::parse_str(r#"kind = "hat"; duration = 0.2;"#).expect("parse");
        let history: LoadHistoryConfig =
            serde_json::from_value(rod_props::to_json(&props)).expect("history");
        assert_eq!(history, LoadHistoryConfig::Hat { duration: 0.2 });

        let mismatched = BoundaryConfig {
            group: "g".into(),
            dof: None,
            dofs: vec!["dx".into(), "dy".into()],
            value: None,
            values: vec![1.0],
            kind: None,
            follower: false,
        };
        assert!(mismatched.entries("m").is_err());
    }
}
