//! Assembled rod model and the solution state that evolves on it.

use std::collections::BTreeSet;

use nalgebra::{DVector, Matrix3, Vector3};

use crate::boundary_conditions::{BoundaryConditions, DOFS_PER_NODE};
use crate::config::{RunConfig, SolverMode};
use crate::contact::{ContactSettings, PairKey};
use crate::elements::{IntegrationRule, RodElement};
use crate::error::{Result, SolverError};
use crate::materials::{PlasticState, RodMaterial};
use crate::mesh::Mesh;
use crate::rotation::{align_z, exp_map, orthonormalize, unwrap_rotation_vector};
use crate::shape::LagrangeLine;

/// Immutable model: mesh, elements, materials, supports and loads.
#[derive(Debug, Clone)]
pub struct RodModel {
    pub title: String,
    pub mesh: Mesh,
    pub elements: Vec<RodElement>,
    pub materials: Vec<RodMaterial>,
    pub bcs: BoundaryConditions,
    pub contact: Option<ContactSettings>,
    /// Reference triad `Λ0` per node
    pub reference_triads: Vec<Matrix3<f64>>,
    pub nodal_mass: Vec<f64>,
    /// Rotational inertia per node in the frame rotated by the nodal `R`
    pub nodal_inertia: Vec<Matrix3<f64>>,
}

impl RodModel {
    pub fn assemble(config: &RunConfig) -> Result<Self> {
        let mode = config.mode()?;
        let model_config = &config.model;
        let mesh = Mesh::from_config(model_config)?;
        let rule = IntegrationRule::parse(&model_config.integration).ok_or_else(|| {
            SolverError::config(format!(
                "model.integration: unknown rule '{}' (reduced, full)",
                model_config.integration
            ))
        })?;

        let mut materials = Vec::with_capacity(model_config.materials.len());
        let mut material_names = Vec::with_capacity(model_config.materials.len());
        for (name, material) in &model_config.materials {
            materials.push(material.build(name)?);
            material_names.push(name.as_str());
        }

        let reference_triads = initial_triads(&mesh)?;
        let mut elements = Vec::with_capacity(mesh.elements.len());
        for element in &mesh.elements {
            let rod = &mesh.rods[element.rod];
            let material = material_names
                .iter()
                .position(|n| *n == rod.material)
                .ok_or_else(|| {
                    SolverError::config(format!(
                        "rod '{}' uses unknown material '{}'",
                        rod.name, rod.material
                    ))
                })?;
            let positions: Vec<Vector3<f64>> = element
                .nodes
                .iter()
                .map(|&n| mesh.nodes[n].position)
                .collect();
            let triads: Vec<Matrix3<f64>> =
                element.nodes.iter().map(|&n| reference_triads[n]).collect();
            elements.push(RodElement::new(
                element.id,
                element.rod,
                material,
                element.nodes.clone(),
                &positions,
                &triads,
                rule,
            )?);
        }

        let num_nodes = mesh.num_nodes();
        let mut nodal_mass = vec![0.0; num_nodes];
        let mut nodal_inertia = vec![Matrix3::zeros(); num_nodes];
        for element in &elements {
            let lumped = element.lumped_mass(&materials[element.material]);
            for (&node, (mass, inertia)) in element.nodes.iter().zip(lumped) {
                let triad = reference_triads[node];
                nodal_mass[node] += mass;
                nodal_inertia[node] +=
                    triad * Matrix3::from_diagonal(&inertia) * triad.transpose();
            }
        }

        let bcs = BoundaryConditions::from_config(model_config, &mesh)?;
        let contact = match &model_config.contact {
            Some(c) => ContactSettings::from_config(c, &mesh)?,
            None => None,
        };

        let model = Self {
            title: config.title.clone(),
            mesh,
            elements,
            materials,
            bcs,
            contact,
            reference_triads,
            nodal_mass,
            nodal_inertia,
        };
        model.check_control(mode)?;
        if mode != SolverMode::Transient {
            model.check_supports()?;
        }
        Ok(model)
    }

    pub fn num_nodes(&self) -> usize {
        self.mesh.num_nodes()
    }

    pub fn num_dofs(&self) -> usize {
        self.mesh.num_dofs()
    }

    pub fn reference_position(&self, node: usize) -> Vector3<f64> {
        self.mesh.nodes[node].position
    }

    pub fn total_mass(&self) -> f64 {
        self.nodal_mass.iter().sum()
    }

    /// Number of integration points per element.
    pub fn point_counts(&self) -> Vec<usize> {
        self.elements.iter().map(|e| e.num_points()).collect()
    }

    fn check_control(&self, mode: SolverMode) -> Result<()> {
        match mode {
            SolverMode::ForceControl if !self.bcs.has_active_loads() => Err(SolverError::config(
                "force control needs a nonzero load on a free dof",
            )),
            SolverMode::DisplacementControl if !self.bcs.has_prescribed_motion() => {
                Err(SolverError::config(
                    "displacement control needs a nonzero prescribed displacement",
                ))
            }
            SolverMode::ArcLength if !self.bcs.has_active_loads() => Err(SolverError::config(
                "arc-length control needs a nonzero load on a free dof",
            )),
            SolverMode::ArcLength if self.bcs.has_prescribed_motion() => Err(SolverError::config(
                "arc-length control does not combine with prescribed displacements",
            )),
            _ => Ok(()),
        }
    }

    /// Every connected set of elements must touch a prescribed dof.
    fn check_supports(&self) -> Result<()> {
        let num_nodes = self.num_nodes();
        let mut parent: Vec<usize> = (0..num_nodes).collect();
        fn root(parent: &mut [usize], mut n: usize) -> usize {
            while parent[n] != n {
                parent[n] = parent[parent[n]];
                n = parent[n];
            }
            n
        }
        for element in &self.elements {
            let first = root(&mut parent, element.nodes[0]);
            for &n in &element.nodes[1..] {
                let r = root(&mut parent, n);
                parent[r] = first;
            }
        }

        let mut supported = vec![false; num_nodes];
        for p in &self.bcs.prescribed {
            let r = root(&mut parent, p.dof / DOFS_PER_NODE);
            supported[r] = true;
        }
        for rod in &self.mesh.rods {
            let Some(&node) = rod.nodes.first() else {
                continue;
            };
            let r = root(&mut parent, node);
            if !supported[r] {
                return Err(SolverError::config(format!(
                    "rod '{}' is not connected to any support",
                    rod.name
                )));
            }
        }
        Ok(())
    }
}

/// Reference triads: `e3` along the averaged nodal tangent, `e1` from the
/// rod's `material_ey` when given, else the shortest rotation of `e3`.
fn initial_triads(mesh: &Mesh) -> Result<Vec<Matrix3<f64>>> {
    let num_nodes = mesh.num_nodes();
    let mut tangent_sum = vec![Vector3::zeros(); num_nodes];
    let mut first_tangent: Vec<Option<Vector3<f64>>> = vec![None; num_nodes];
    let mut material_ey: Vec<Option<Vector3<f64>>> = vec![None; num_nodes];

    for element in &mesh.elements {
        let shape = LagrangeLine::new(element.nodes.len()).ok_or_else(|| {
            SolverError::config(format!(
                "element {} has {} nodes (2 to 4 supported)",
                element.id,
                element.nodes.len()
            ))
        })?;
        for (local, &node) in element.nodes.iter().enumerate() {
            let values = shape.eval(shape.node_coordinate(local));
            let tangent: Vector3<f64> = element
                .nodes
                .iter()
                .zip(&values.dn)
                .map(|(&n, d)| mesh.nodes[n].position * *d)
                .sum();
            let norm = tangent.norm();
            if norm <= f64::EPSILON {
                return Err(SolverError::config(format!(
                    "element {} is degenerate at node {}",
                    element.id, mesh.nodes[node].id
                )));
            }
            let unit = tangent / norm;
            tangent_sum[node] += unit;
            if first_tangent[node].is_none() {
                first_tangent[node] = Some(unit);
            }
            if material_ey[node].is_none() {
                material_ey[node] = mesh.rods[element.rod].material_ey;
            }
        }
    }

    Ok((0..num_nodes)
        .map(|node| {
            let averaged = tangent_sum[node];
            let tangent = if averaged.norm() > 1e-8 {
                averaged.normalize()
            } else {
                first_tangent[node].unwrap_or_else(Vector3::z)
            };
            match material_ey[node] {
                Some(ey) => triad_from_ey(&tangent, &ey).unwrap_or_else(|| align_z(&tangent)),
                None => align_z(&tangent),
            }
        })
        .collect())
}

fn triad_from_ey(e3: &Vector3<f64>, ey: &Vector3<f64>) -> Option<Matrix3<f64>> {
    let e1 = ey.cross(e3);
    let norm = e1.norm();
    if norm <= 1e-10 * ey.norm() {
        return None;
    }
    let e1 = e1 / norm;
    let e2 = e3.cross(&e1);
    Some(Matrix3::from_columns(&[e1, e2, *e3]))
}

/// Solution state: nodal kinematics, material history and bookkeeping.
#[derive(Debug, Clone)]
pub struct RodState {
    pub displacement: Vec<Vector3<f64>>,
    /// Total rotation `R`; the current triad is `R Λ0`
    pub rotation: Vec<Matrix3<f64>>,
    /// Continuous rotation vector of `R`
    pub rotation_vector: Vec<Vector3<f64>>,
    pub velocity: Vec<Vector3<f64>>,
    pub acceleration: Vec<Vector3<f64>>,
    /// Angular velocity in the frame rotated by `R`
    pub angular_velocity: Vec<Vector3<f64>>,
    pub angular_acceleration: Vec<Vector3<f64>>,
    /// History per element and integration point
    pub plastic: Vec<Vec<PlasticState>>,
    /// Prescribed values imposed so far, parallel to `bcs.prescribed`
    pub applied_constraints: Vec<f64>,
    pub contact_active: BTreeSet<PairKey>,
    pub load_factor: f64,
    pub time: f64,
    pub plastic_dissipation: f64,
    pub viscous_dissipation: f64,
}

impl RodState {
    /// Undeformed state at rest.
    pub fn reference(model: &RodModel) -> Self {
        let n = model.num_nodes();
        Self {
            displacement: vec![Vector3::zeros(); n],
            rotation: vec![Matrix3::identity(); n],
            rotation_vector: vec![Vector3::zeros(); n],
            velocity: vec![Vector3::zeros(); n],
            acceleration: vec![Vector3::zeros(); n],
            angular_velocity: vec![Vector3::zeros(); n],
            angular_acceleration: vec![Vector3::zeros(); n],
            plastic: model
                .point_counts()
                .into_iter()
                .map(|count| vec![PlasticState::default(); count])
                .collect(),
            applied_constraints: vec![0.0; model.bcs.prescribed.len()],
            contact_active: BTreeSet::new(),
            load_factor: 0.0,
            time: 0.0,
            plastic_dissipation: 0.0,
            viscous_dissipation: 0.0,
        }
    }

    pub fn positions(&self, model: &RodModel) -> Vec<Vector3<f64>> {
        self.displacement
            .iter()
            .enumerate()
            .map(|(i, u)| model.reference_position(i) + u)
            .collect()
    }

    pub fn triads(&self, model: &RodModel) -> Vec<Matrix3<f64>> {
        self.rotation
            .iter()
            .zip(&model.reference_triads)
            .map(|(r, t)| r * t)
            .collect()
    }

    /// Applies a full-length increment: translations add, rotations compose
    /// as spatial spins `R <- exp(δθ) R`.
    pub fn apply_increment(&mut self, delta: &DVector<f64>) {
        for node in 0..self.displacement.len() {
            let base = DOFS_PER_NODE * node;
            self.displacement[node] += delta.fixed_rows::<3>(base);
            let spin: Vector3<f64> = delta.fixed_rows::<3>(base + 3).into();
            if spin.norm_squared() > 0.0 {
                self.rotation[node] = exp_map(&spin) * self.rotation[node];
            }
        }
    }

    /// Nodal dof values for output: translations and the continuous
    /// rotation vector, 6 per node.
    pub fn dof_values(&self, node: usize) -> [f64; 6] {
        let u = self.displacement[node];
        let r = self.rotation_vector[node];
        [u.x, u.y, u.z, r.x, r.y, r.z]
    }

    /// Accepts this trial state as converged: takes over the material
    /// history and contact set and continues the rotation vectors from
    /// `previous`.
    pub fn commit(
        &mut self,
        previous: &RodState,
        plastic: Vec<Vec<PlasticState>>,
        plastic_dissipation: f64,
        contact_active: BTreeSet<PairKey>,
    ) {
        for node in 0..self.rotation.len() {
            self.rotation[node] = orthonormalize(&self.rotation[node]);
            self.rotation_vector[node] =
                unwrap_rotation_vector(&previous.rotation_vector[node], &self.rotation[node]);
        }
        self.plastic = plastic;
        self.plastic_dissipation = plastic_dissipation;
        self.contact_active = contact_active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rod_props::Props;
    use std::f64::consts::PI;

    const MATERIAL: &str = "materials.m = { young = 100; shear_modulus = 40; density = 2; area = 0.5; area_moment = [0.1, 0.2]; };";

    fn make_model(model: &str, solver: &str) -> Result<RodModel> {
        let src = format!("model = {{ {model} {MATERIAL} }}; solver = {{ {solver} }};");
        let props = Props::parse_str(&src).expect("parse");
        let config = RunConfig::from_props(&props)?;
        RodModel::assemble(&config)
    }

    const CANTILEVER: &str = "rods.arm = { start = [0,0,0]; end = [0,0,2]; elements = 4; material = \"m\"; }; \
        constraints.clamp = { group = \"arm.start\"; dofs = [\"dx\",\"dy\",\"dz\",\"rx\",\"ry\",\"rz\"]; }; \
        loads.tip = { group = \"arm.end\"; dof = \"dx\"; value = 1; };";

    #[test]
    fn assembles_cantilever() {
        let model = make_model(CANTILEVER, "mode = \"force\";").expect("model");
        assert_eq!(model.num_nodes(), 5);
        assert_eq!(model.num_dofs(), 30);
        assert_eq!(model.elements.len(), 4);
        assert_eq!(model.bcs.num_free(), 24);
        assert_relative_eq!(model.total_mass(), 2.0 * 0.5 * 2.0, epsilon = 1e-12);
        // rod along global z keeps the identity triad
        assert_relative_eq!(model.reference_triads[2], Matrix3::identity(), epsilon = 1e-14);
    }

    #[test]
    fn material_ey_orients_cross_section() {
        let model = make_model(
            "rods.arm = { start = [0,0,0]; end = [1,0,0]; elements = 2; material = \"m\"; material_ey = [0,0,1]; }; \
             constraints.clamp = { group = \"arm.start\"; dofs = [\"dx\",\"dy\",\"dz\",\"rx\",\"ry\",\"rz\"]; }; \
             loads.tip = { group = \"arm.end\"; dof = \"dz\"; value = 1; };",
            "",
        )
        .expect("model");
        let triad = model.reference_triads[1];
        assert_relative_eq!(triad.column(2).into_owned(), Vector3::x(), epsilon = 1e-14);
        assert_relative_eq!(triad.column(1).into_owned(), Vector3::z(), epsilon = 1e-14);
        assert_relative_eq!(triad.determinant(), 1.0, epsilon = 1e-14);
    }

    #[test]
    fn unsupported_rod_is_rejected() {
        let err = make_model(
            "rods.arm = { start = [0,0,0]; end = [1,0,0]; elements = 2; material = \"m\"; }; \
             loads.tip = { group = \"arm.end\"; dof = \"dz\"; value = 1; };",
            "",
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn control_mode_must_match_loading() {
        let err = make_model(CANTILEVER, "mode = \"displacement\";").unwrap_err();
        assert!(err.to_string().contains("prescribed"));
        let model = make_model(CANTILEVER, "mode = \"transient\";");
        assert!(model.is_ok());
    }

    #[test]
    fn increments_compose_rotations() {
        let model = make_model(CANTILEVER, "").expect("model");
        let mut state = RodState::reference(&model);
        let mut delta = DVector::zeros(model.num_dofs());
        delta[6 * 4] = 0.5;
        delta[6 * 4 + 5] = 0.75 * PI;
        for _ in 0..2 {
            let previous = state.clone();
            state.apply_increment(&delta);
            state.commit(&previous, previous.plastic.clone(), 0.0, BTreeSet::new());
        }
        assert_relative_eq!(state.displacement[4].x, 1.0, epsilon = 1e-14);
        // 1.5 pi about z continues past the principal branch
        assert_relative_eq!(state.rotation_vector[4].z, 1.5 * PI, epsilon = 1e-10);
        assert_eq!(state.dof_values(4)[0], 1.0);
    }
}
