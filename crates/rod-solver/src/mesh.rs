//! Rod meshes: nodes, line elements and node groups.
//!
//! Rods are either generated from end points (`start`, `end`, `elements`,
//! `order`) or listed explicitly through connectivity rows over
//! `model.nodes`. Every rod gets the node groups `<rod>.start`, `<rod>.end`
//! and `<rod>.all`; the group `all` holds every node of the mesh.

use std::collections::{BTreeMap, HashMap};

use nalgebra::Vector3;

use crate::config::ModelConfig;
use crate::error::{Result, SolverError};

pub type NodeId = i32;

/// A node in the rod mesh
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Node ID from input or generated
    pub id: NodeId,
    /// Reference position
    pub position: Vector3<f64>,
}

impl Node {
    pub fn new(id: NodeId, x: f64, y: f64, z: f64) -> Self {
        Self {
            id,
            position: Vector3::new(x, y, z),
        }
    }
}

/// A line element with 2 to 4 nodes, numbered along the rod.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshElement {
    /// Sequential element ID (1-based)
    pub id: usize,
    /// Index of the owning rod
    pub rod: usize,
    /// Node indices into [`Mesh::nodes`]
    pub nodes: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rod {
    pub name: String,
    pub material: String,
    /// Element indices in order along the rod
    pub elements: Vec<usize>,
    /// Node indices in order along the rod
    pub nodes: Vec<usize>,
    pub material_ey: Option<Vector3<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub nodes: Vec<Node>,
    pub elements: Vec<MeshElement>,
    pub rods: Vec<Rod>,
    pub groups: BTreeMap<String, Vec<usize>>,
    index: HashMap<NodeId, usize>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node and returns its index.
    pub fn add_node(&mut self, node: Node) -> Result<usize> {
        if self.index.contains_key(&node.id) {
            return Err(SolverError::config(format!("duplicate node id {}", node.id)));
        }
        let index = self.nodes.len();
        self.index.insert(node.id, index);
        self.nodes.push(node);
        Ok(index)
    }

    pub fn node_index(&self, id: NodeId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_dofs(&self) -> usize {
        self.nodes.len() * 6
    }

    pub fn group(&self, name: &str) -> Result<&[usize]> {
        self.groups
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| SolverError::config(format!("unknown node group '{name}'")))
    }

    pub fn rod_index(&self, name: &str) -> Option<usize> {
        self.rods.iter().position(|r| r.name == name)
    }

    pub fn from_config(model: &ModelConfig) -> Result<Self> {
        let mut mesh = Mesh::new();

        for row in &model.nodes {
            let id = integral_id(row[0])?;
            mesh.add_node(Node::new(id, row[1], row[2], row[3]))?;
        }

        for (name, rod) in &model.rods {
            if !model.materials.contains_key(&rod.material) {
                return Err(SolverError::config(format!(
                    "rod '{name}' uses unknown material '{}'",
                    rod.material
                )));
            }
            if !(1..=3).contains(&rod.order) {
                return Err(SolverError::config(format!(
                    "rod '{name}': order must be 1, 2 or 3"
                )));
            }
            let rod_index = mesh.rods.len();
            let element_rows = match &rod.connectivity {
                Some(rows) => mesh.explicit_rows(name, rows, rod.order)?,
                None => mesh.generate_rows(name, rod, model.merge_endpoints)?,
            };

            let mut rod_nodes: Vec<usize> = Vec::new();
            let mut rod_elements = Vec::with_capacity(element_rows.len());
            for nodes in element_rows {
                for &n in &nodes {
                    if !rod_nodes.contains(&n) {
                        rod_nodes.push(n);
                    }
                }
                rod_elements.push(mesh.elements.len());
                mesh.elements.push(MeshElement {
                    id: mesh.elements.len() + 1,
                    rod: rod_index,
                    nodes,
                });
            }

            let (Some(&first), Some(&last)) = (rod_nodes.first(), rod_nodes.last()) else {
                return Err(SolverError::config(format!("rod '{name}' has no elements")));
            };
            mesh.groups.insert(format!("{name}.start"), vec![first]);
            mesh.groups.insert(format!("{name}.end"), vec![last]);
            mesh.groups.insert(format!("{name}.all"), rod_nodes.clone());

            mesh.rods.push(Rod {
                name: name.clone(),
                material: rod.material.clone(),
                elements: rod_elements,
                nodes: rod_nodes,
                material_ey: rod.material_ey.map(|v| Vector3::new(v[0], v[1], v[2])),
            });
        }

        for (name, ids) in &model.groups {
            let nodes = ids
                .iter()
                .map(|&id| {
                    mesh.node_index(id).ok_or_else(|| {
                        SolverError::config(format!("group '{name}' references unknown node {id}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            mesh.groups.insert(name.clone(), nodes);
        }
        mesh.groups
            .insert("all".to_string(), (0..mesh.nodes.len()).collect());

        mesh.validate()?;
        Ok(mesh)
    }

    fn explicit_rows(
        &self,
        name: &str,
        rows: &[Vec<NodeId>],
        order: usize,
    ) -> Result<Vec<Vec<usize>>> {
        rows.iter()
            .map(|row| {
                if row.len() != order + 1 {
                    return Err(SolverError::config(format!(
                        "rod '{name}': element {row:?} needs {} nodes",
                        order + 1
                    )));
                }
                row.iter()
                    .map(|&id| {
                        self.node_index(id).ok_or_else(|| {
                            SolverError::config(format!(
                                "rod '{name}' references unknown node {id}"
                            ))
                        })
                    })
                    .collect::<Result<Vec<usize>>>()
            })
            .collect()
    }

    fn generate_rows(
        &mut self,
        name: &str,
        rod: &crate::config::RodConfig,
        merge_endpoints: bool,
    ) -> Result<Vec<Vec<usize>>> {
        let (Some(start), Some(end)) = (rod.start, rod.end) else {
            return Err(SolverError::config(format!(
                "rod '{name}' needs start and end points or connectivity"
            )));
        };
        if rod.elements == 0 {
            return Err(SolverError::config(format!(
                "rod '{name}' needs at least one element"
            )));
        }
        let start = Vector3::from(start);
        let end = Vector3::from(end);
        let length = (end - start).norm();
        if length <= 0.0 {
            return Err(SolverError::config(format!("rod '{name}' has zero length")));
        }

        let points = rod.elements * rod.order + 1;
        let tolerance = 1e-9 * length;
        let mut indices = Vec::with_capacity(points);
        for p in 0..points {
            let position = start + (end - start) * (p as f64 / (points - 1) as f64);
            let pinned = if p == 0 {
                rod.start_node
            } else if p + 1 == points {
                rod.end_node
            } else {
                None
            };
            let index = match pinned {
                Some(id) => self.node_index(id).ok_or_else(|| {
                    SolverError::config(format!("rod '{name}' attaches to unknown node {id}"))
                })?,
                None => {
                    let is_end = p == 0 || p + 1 == points;
                    let existing = if is_end && merge_endpoints {
                        self.nodes
                            .iter()
                            .position(|n| (n.position - position).norm() <= tolerance)
                    } else {
                        None
                    };
                    match existing {
                        Some(index) => index,
                        None => {
                            let id = self.next_id();
                            self.add_node(Node::new(id, position.x, position.y, position.z))?
                        }
                    }
                }
            };
            indices.push(index);
        }

        Ok((0..rod.elements)
            .map(|e| indices[e * rod.order..=(e + 1) * rod.order].to_vec())
            .collect())
    }

    fn next_id(&self) -> NodeId {
        self.nodes.iter().map(|n| n.id).max().map_or(1, |m| m + 1)
    }

    /// Checks that elements have distinct nodes and positive length.
    pub fn validate(&self) -> Result<()> {
        for element in &self.elements {
            for (i, a) in element.nodes.iter().enumerate() {
                if element.nodes[i + 1..].contains(a) {
                    return Err(SolverError::config(format!(
                        "element {} repeats node {}",
                        element.id, self.nodes[*a].id
                    )));
                }
            }
            let (Some(&first), Some(&last)) = (element.nodes.first(), element.nodes.last()) else {
                continue;
            };
            if (self.nodes[first].position - self.nodes[last].position).norm() <= 0.0 {
                return Err(SolverError::config(format!(
                    "element {} has zero length",
                    element.id
                )));
            }
        }
        Ok(())
    }

    pub fn statistics(&self) -> MeshStatistics {
        let mut elements_by_order = BTreeMap::new();
        for element in &self.elements {
            *elements_by_order
                .entry(element.nodes.len() - 1)
                .or_insert(0) += 1;
        }
        MeshStatistics {
            num_nodes: self.nodes.len(),
            num_elements: self.elements.len(),
            num_rods: self.rods.len(),
            num_dofs: self.num_dofs(),
            elements_by_order,
        }
    }
}

fn integral_id(value: f64) -> Result<NodeId> {
    if value.fract() != 0.0 || value < i32::MIN as f64 || value > i32::MAX as f64 {
        return Err(SolverError::config(format!("invalid node id {value}")));
    }
    Ok(value as NodeId)
}

/// Mesh statistics for reporting
#[derive(Debug, Clone)]
pub struct MeshStatistics {
    pub num_nodes: usize,
    pub num_elements: usize,
    pub num_rods: usize,
    pub num_dofs: usize,
    /// Element count per polynomial order
    pub elements_by_order: BTreeMap<usize, usize>,
}

impl MeshStatistics {
    /// Format as a human-readable string
    pub fn format(&self) -> String {
        let mut lines = vec![
            format!("Rods: {}", self.num_rods),
            format!("Nodes: {}", self.num_nodes),
            format!("Elements: {}", self.num_elements),
            format!("DOFs: {}", self.num_dofs),
        ];
        for (order, count) in &self.elements_by_order {
            lines.push(format!("  order {order}: {count}"));
        }
        lines.join("\n")
    }
}
