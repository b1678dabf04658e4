//! Boundary conditions and loading for rod analyses.
//!
//! Every node carries six degrees of freedom: three translations
//! (`dx`, `dy`, `dz`) and three infinitesimal spatial rotations
//! (`rx`, `ry`, `rz`). Nodal loads are dead spatial forces and moments
//! unless marked as followers, which turn with the rotation of their node.
//! Prescribed values and loads are given per unit load factor; the path
//! following and time integration modules scale them.

use std::collections::BTreeMap;

use nalgebra::{DVector, Matrix3, Vector3};

use crate::config::{LoadHistoryConfig, ModelConfig};
use crate::error::{Result, SolverError};
use crate::mesh::Mesh;

pub const DOFS_PER_NODE: usize = 6;

/// Degree of freedom of a rod node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DofId {
    Dx,
    Dy,
    Dz,
    Rx,
    Ry,
    Rz,
}

impl DofId {
    pub const ALL: [DofId; 6] = [
        DofId::Dx,
        DofId::Dy,
        DofId::Dz,
        DofId::Rx,
        DofId::Ry,
        DofId::Rz,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "dx" | "ux" => Some(DofId::Dx),
            "dy" | "uy" => Some(DofId::Dy),
            "dz" | "uz" => Some(DofId::Dz),
            "rx" => Some(DofId::Rx),
            "ry" => Some(DofId::Ry),
            "rz" => Some(DofId::Rz),
            _ => None,
        }
    }

    /// Position within the node's block of six.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_rotation(self) -> bool {
        self.index() >= 3
    }

    pub fn global(self, node: usize) -> usize {
        node * DOFS_PER_NODE + self.index()
    }
}

/// A degree of freedom with a prescribed value per unit load factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrescribedDof {
    pub dof: usize,
    pub value: f64,
}

impl PrescribedDof {
    pub fn is_rotation(&self) -> bool {
        self.dof % DOFS_PER_NODE >= 3
    }
}

/// A nodal force or moment per unit load factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodalLoad {
    pub dof: usize,
    pub value: f64,
}

/// A nodal force or moment that rotates with its node: `R d` per unit load
/// factor, `R` the total nodal rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FollowerLoad {
    pub node: usize,
    /// Acts on the rotational dofs
    pub moment: bool,
    /// Load in the reference configuration
    pub direction: Vector3<f64>,
}

impl FollowerLoad {
    /// First of the three global dofs the load acts on.
    pub fn first_dof(&self) -> usize {
        DOFS_PER_NODE * self.node + if self.moment { 3 } else { 0 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BoundaryConditions {
    pub prescribed: Vec<PrescribedDof>,
    pub loads: Vec<NodalLoad>,
    pub followers: Vec<FollowerLoad>,
    num_dofs: usize,
    free_index: Vec<Option<usize>>,
    free_dofs: Vec<usize>,
}

impl BoundaryConditions {
    pub fn new(num_dofs: usize, prescribed: Vec<PrescribedDof>, loads: Vec<NodalLoad>) -> Self {
        let mut is_prescribed = vec![false; num_dofs];
        for p in &prescribed {
            is_prescribed[p.dof] = true;
        }
        let mut free_index = vec![None; num_dofs];
        let mut free_dofs = Vec::new();
        for dof in 0..num_dofs {
            if !is_prescribed[dof] {
                free_index[dof] = Some(free_dofs.len());
                free_dofs.push(dof);
            }
        }
        Self {
            prescribed,
            loads,
            followers: Vec::new(),
            num_dofs,
            free_index,
            free_dofs,
        }
    }

    pub fn with_followers(mut self, followers: Vec<FollowerLoad>) -> Self {
        self.followers = followers;
        self
    }

    /// Resolves `model.constraints` and `model.loads` against the mesh groups.
    /// A dof listed more than once keeps its last value.
    pub fn from_config(model: &ModelConfig, mesh: &Mesh) -> Result<Self> {
        let mut prescribed = BTreeMap::<usize, f64>::new();
        let mut loads = BTreeMap::<usize, f64>::new();
        let mut followers = BTreeMap::<(usize, bool), Vector3<f64>>::new();

        let sections = [
            ("constraints", &model.constraints, "displacement"),
            ("loads", &model.loads, "force"),
        ];
        for (section, entries, default_kind) in sections {
            for (name, entry) in entries {
                let label = format!("model.{section}.{name}");
                let kind = entry.kind.as_deref().unwrap_or(default_kind);
                let is_load = match kind {
                    "displacement" | "prescribed" => false,
                    "force" | "load" => true,
                    other => {
                        return Err(SolverError::config(format!(
                            "{label}: unknown type '{other}' (force, displacement)"
                        )));
                    }
                };
                if entry.follower && !is_load {
                    return Err(SolverError::config(format!(
                        "{label}: only loads can be followers"
                    )));
                }
                let nodes = mesh.group(&entry.group)?;
                for (dof_name, value) in entry.entries(&label)? {
                    let dof = DofId::parse(&dof_name).ok_or_else(|| {
                        SolverError::config(format!("{label}: unknown dof '{dof_name}'"))
                    })?;
                    for &node in nodes {
                        if entry.follower {
                            let direction = followers
                                .entry((node, dof.is_rotation()))
                                .or_insert_with(Vector3::zeros);
                            direction[dof.index() % 3] += value;
                        } else if is_load {
                            *loads.entry(dof.global(node)).or_insert(0.0) += value;
                        } else {
                            prescribed.insert(dof.global(node), value);
                        }
                    }
                }
            }
        }

        Ok(Self::new(
            mesh.num_dofs(),
            prescribed
                .into_iter()
                .map(|(dof, value)| PrescribedDof { dof, value })
                .collect(),
            loads
                .into_iter()
                .map(|(dof, value)| NodalLoad { dof, value })
                .collect(),
        )
        .with_followers(
            followers
                .into_iter()
                .map(|((node, moment), direction)| FollowerLoad {
                    node,
                    moment,
                    direction,
                })
                .collect(),
        ))
    }

    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn num_free(&self) -> usize {
        self.free_dofs.len()
    }

    pub fn free_dofs(&self) -> &[usize] {
        &self.free_dofs
    }

    pub fn free_index(&self, dof: usize) -> Option<usize> {
        self.free_index[dof]
    }

    pub fn is_free(&self, dof: usize) -> bool {
        self.free_index[dof].is_some()
    }

    /// Dead load vector per unit load factor.
    pub fn reference_load(&self) -> DVector<f64> {
        let mut f = DVector::zeros(self.num_dofs);
        for load in &self.loads {
            f[load.dof] += load.value;
        }
        f
    }

    /// Load vector per unit load factor with the follower loads turned by
    /// the nodal rotations `rotation`.
    pub fn load_pattern(&self, rotation: &[Matrix3<f64>]) -> DVector<f64> {
        let mut f = self.reference_load();
        for follower in &self.followers {
            let mut part = f.fixed_rows_mut::<3>(follower.first_dof());
            part += rotation[follower.node] * follower.direction;
        }
        f
    }

    /// True when a nonzero force acts on a free dof.
    pub fn has_active_loads(&self) -> bool {
        let dead = self
            .loads
            .iter()
            .any(|l| l.value != 0.0 && self.is_free(l.dof));
        let follower = self.followers.iter().any(|f| {
            f.direction != Vector3::zeros() && (0..3).any(|k| self.is_free(f.first_dof() + k))
        });
        dead || follower
    }

    pub fn has_prescribed_motion(&self) -> bool {
        self.prescribed.iter().any(|p| p.value != 0.0)
    }

    /// Free components of a full-length vector.
    pub fn restrict(&self, full: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(self.free_dofs.len(), self.free_dofs.iter().map(|&d| full[d]))
    }

    /// Full-length vector with zeros on the prescribed dofs.
    pub fn expand(&self, reduced: &DVector<f64>) -> DVector<f64> {
        let mut full = DVector::zeros(self.num_dofs);
        for (i, &d) in self.free_dofs.iter().enumerate() {
            full[d] = reduced[i];
        }
        full
    }
}

/// Time function scaling loads and prescribed values in transient runs.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadHistory {
    Constant(f64),
    Ramp { duration: f64 },
    Pulse { duration: f64 },
    Hat { duration: f64 },
    Table { times: Vec<f64>, values: Vec<f64> },
}

impl LoadHistory {
    pub fn from_config(config: &LoadHistoryConfig) -> Result<Self> {
        let positive = |d: f64, kind: &str| {
            if d > 0.0 {
                Ok(d)
            } else {
                Err(SolverError::config(format!(
                    "{kind} load history needs a positive duration"
                )))
            }
        };
        Ok(match config {
            LoadHistoryConfig::Constant { value } => LoadHistory::Constant(*value),
            LoadHistoryConfig::Ramp { duration } => LoadHistory::Ramp {
                duration: positive(*duration, "ramp")?,
            },
            LoadHistoryConfig::Pulse { duration } => LoadHistory::Pulse {
                duration: positive(*duration, "pulse")?,
            },
            LoadHistoryConfig::Hat { duration } => LoadHistory::Hat {
                duration: positive(*duration, "hat")?,
            },
            LoadHistoryConfig::Table { times, values } => {
                if times.is_empty() || times.len() != values.len() {
                    return Err(SolverError::config(
                        "table load history needs equally long, nonempty times and values",
                    ));
                }
                if times.windows(2).any(|w| w[1] <= w[0]) {
                    return Err(SolverError::config(
                        "table load history times must increase",
                    ));
                }
                LoadHistory::Table {
                    times: times.clone(),
                    values: values.clone(),
                }
            }
        })
    }

    pub fn factor(&self, t: f64) -> f64 {
        match self {
            LoadHistory::Constant(value) => *value,
            LoadHistory::Ramp { duration } => (t / duration).clamp(0.0, 1.0),
            LoadHistory::Pulse { duration } => {
                if t <= *duration + 1e-12 * duration {
                    1.0
                } else {
                    0.0
                }
            }
            LoadHistory::Hat { duration } => {
                let half = 0.5 * duration;
                if t <= 0.0 || t >= *duration {
                    0.0
                } else if t <= half {
                    t / half
                } else {
                    (duration - t) / half
                }
            }
            LoadHistory::Table { times, values } => {
                let last = times.len() - 1;
                if t <= times[0] {
                    return values[0];
                }
                if t >= times[last] {
                    return values[last];
                }
                let k = times.partition_point(|&x| x <= t);
                let (t0, t1) = (times[k - 1], times[k]);
                let w = (t - t0) / (t1 - t0);
                values[k - 1] * (1.0 - w) + values[k] * w
            }
        }
    }
}
