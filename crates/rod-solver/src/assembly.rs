//! Global internal force and tangent assembly.
//!
//! Elements are evaluated in parallel; their contributions are merged in
//! element order into a COO matrix, so the assembled system does not depend
//! on the thread schedule. Contact contributions are merged after the
//! elements. The solver works on the free-DOF block, extracted through a
//! CSR conversion that sums duplicate entries.

use std::collections::BTreeSet;

use nalgebra::{DVector, Matrix3, Vector3, Vector6};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;

use crate::backend::SparseTripletsF64;
use crate::boundary_conditions::{BoundaryConditions, DOFS_PER_NODE};
use crate::contact::{ContactArena, ContactSummary, PairKey};
use crate::elements::{Element, ElementResponse};
use crate::error::Result;
use crate::materials::PlasticState;
use crate::model::{RodModel, RodState};
use crate::rotation::skew;

/// Result of one residual evaluation at a trial state.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Internal forces including contact, full length
    pub internal_force: DVector<f64>,
    pub tangent: Option<CooMatrix<f64>>,
    /// Trial material history; becomes the state history on commit
    pub trial_plastic: Vec<Vec<PlasticState>>,
    /// Stress resultants per element and integration point
    pub stresses: Vec<Vec<Vector6<f64>>>,
    pub stored_energy: f64,
    /// Accumulated plastic dissipation of the trial history
    pub plastic_dissipation: f64,
    pub contact: ContactSummary,
    pub contact_active: BTreeSet<PairKey>,
}

impl Evaluation {
    /// Internal force summed over the translational and rotational dofs of
    /// `nodes`.
    pub fn resultant(&self, nodes: &[usize]) -> [f64; 6] {
        let mut total = [0.0; 6];
        for &node in nodes {
            for (k, value) in total.iter_mut().enumerate() {
                *value += self.internal_force[DOFS_PER_NODE * node + k];
            }
        }
        total
    }
}

/// Evaluates internal forces (and the tangent when `want_tangent`) at
/// `state`, including contact when the model has it enabled.
pub fn evaluate(model: &RodModel, state: &RodState, want_tangent: bool) -> Result<Evaluation> {
    let positions = state.positions(model);
    let triads = state.triads(model);
    let num_dofs = model.num_dofs();

    let responses: Vec<ElementResponse> = model
        .elements
        .par_iter()
        .zip(state.plastic.par_iter())
        .map(|(element, committed)| {
            let x: Vec<Vector3<f64>> = element.nodes.iter().map(|&n| positions[n]).collect();
            let r: Vec<Matrix3<f64>> = element.nodes.iter().map(|&n| triads[n]).collect();
            element.evaluate(
                &x,
                &r,
                &model.materials[element.material],
                committed,
                want_tangent,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let mut internal_force = DVector::zeros(num_dofs);
    let mut tangent = want_tangent.then(|| CooMatrix::new(num_dofs, num_dofs));
    let mut trial_plastic = Vec::with_capacity(responses.len());
    let mut stresses = Vec::with_capacity(responses.len());
    let mut stored_energy = 0.0;
    let mut plastic_dissipation = 0.0;

    for (element, response) in model.elements.iter().zip(responses) {
        let dofs = element.global_dof_indices();
        for (local, &global) in dofs.iter().enumerate() {
            internal_force[global] += response.force[local];
        }
        if let (Some(coo), Some(k)) = (tangent.as_mut(), response.stiffness.as_ref()) {
            push_block(coo, &dofs, k);
        }
        stored_energy += response.stored_energy;
        plastic_dissipation += response.dissipation;
        trial_plastic.push(response.states);
        stresses.push(response.stresses);
    }

    let mut contact = ContactSummary::default();
    let mut contact_active = BTreeSet::new();
    if let Some(settings) = &model.contact {
        let arena = ContactArena::search(
            settings,
            &model.mesh,
            &model.elements,
            &positions,
            &state.contact_active,
        )?;
        for c in arena.contributions(settings, &model.elements, want_tangent)? {
            for (local, &global) in c.dofs.iter().enumerate() {
                internal_force[global] += c.force[local];
            }
            if let (Some(coo), Some(k)) = (tangent.as_mut(), c.stiffness.as_ref()) {
                push_block(coo, &c.dofs, k);
            }
        }
        // penalty energy of the active pairs
        stored_energy += arena
            .pairs()
            .map(|p| 0.5 * settings.penalty * p.gap * p.gap)
            .sum::<f64>();
        contact = arena.summary();
        contact_active = arena.active_keys();
    }

    Ok(Evaluation {
        internal_force,
        tangent,
        trial_plastic,
        stresses,
        stored_energy,
        plastic_dissipation,
        contact,
        contact_active,
    })
}

fn push_block(coo: &mut CooMatrix<f64>, dofs: &[usize], block: &nalgebra::DMatrix<f64>) {
    for (i, &gi) in dofs.iter().enumerate() {
        for (j, &gj) in dofs.iter().enumerate() {
            let value = block[(i, j)];
            if value != 0.0 {
                coo.push(gi, gj, value);
            }
        }
    }
}

/// Adds a 3x3 block at the translational (`rotational = false`) or
/// rotational dofs of `node`.
pub fn push_nodal_block(coo: &mut CooMatrix<f64>, node: usize, rotational: bool, block: &Matrix3<f64>) {
    let base = DOFS_PER_NODE * node + if rotational { 3 } else { 0 };
    for i in 0..3 {
        for j in 0..3 {
            if block[(i, j)] != 0.0 {
                coo.push(base + i, base + j, block[(i, j)]);
            }
        }
    }
}

/// External loads at `state` scaled by `factor`; follower loads point along
/// their rotated reference direction.
pub fn external_force(model: &RodModel, state: &RodState, factor: f64) -> DVector<f64> {
    model.bcs.load_pattern(&state.rotation) * factor
}

/// Adds the load stiffness `-∂F_ext/∂θ = factor [R d]x` of the follower
/// loads to a full tangent.
pub fn push_load_stiffness(coo: &mut CooMatrix<f64>, model: &RodModel, state: &RodState, factor: f64) {
    if factor == 0.0 {
        return;
    }
    for follower in &model.bcs.followers {
        let block = skew(&(state.rotation[follower.node] * follower.direction)) * factor;
        let row = follower.first_dof();
        let col = DOFS_PER_NODE * follower.node + 3;
        for i in 0..3 {
            for j in 0..3 {
                if block[(i, j)] != 0.0 {
                    coo.push(row + i, col + j, block[(i, j)]);
                }
            }
        }
    }
}

/// Free-DOF block of the assembled tangent as triplets.
pub fn reduce_to_free(tangent: &CooMatrix<f64>, bcs: &BoundaryConditions) -> SparseTripletsF64 {
    let csr = CsrMatrix::from(tangent);
    let n = bcs.num_free();
    let mut reduced = SparseTripletsF64 {
        nrows: n,
        ncols: n,
        ..Default::default()
    };
    for (row, col, &value) in csr.triplet_iter() {
        if let (Some(i), Some(j)) = (bcs.free_index(row), bcs.free_index(col)) {
            reduced.row_indices.push(i);
            reduced.col_indices.push(j);
            reduced.values.push(value);
        }
    }
    reduced
}

/// Coupling of the free rows with the prescribed columns, used to carry
/// prescribed motion into the free-DOF predictor.
pub fn prescribed_coupling(
    tangent: &CooMatrix<f64>,
    bcs: &BoundaryConditions,
    prescribed_delta: &DVector<f64>,
) -> DVector<f64> {
    let csr = CsrMatrix::from(tangent);
    let mut coupling = DVector::zeros(bcs.num_free());
    for (row, col, &value) in csr.triplet_iter() {
        if let Some(i) = bcs.free_index(row)
            && !bcs.is_free(col)
        {
            coupling[i] += value * prescribed_delta[col];
        }
    }
    coupling
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::rotation::exp_map;
    use approx::assert_relative_eq;
    use rod_props::Props;

    fn make_model(extra: &str) -> RodModel {
        let src = format!(
            "model = {{ rods.arm = {{ start = [0,0,0]; end = [2,0,0]; elements = 4; order = 2; material = \"m\"; }}; \
             materials.m = {{ young = 100; shear_modulus = 40; area = 0.5; area_moment = [0.1, 0.2]; }}; \
             constraints.clamp = {{ group = \"arm.start\"; dofs = [\"dx\",\"dy\",\"dz\",\"rx\",\"ry\",\"rz\"]; }}; \
             loads.tip = {{ group = \"arm.end\"; dof = \"dz\"; value = 1; }}; {extra} }};"
        );
        let props = Props::parse_str(&src).expect("parse");
        RodModel::assemble(&RunConfig::from_props(&props).expect("config")).expect("model")
    }

    #[test]
    fn reference_state_has_no_internal_force() {
        let model = make_model("");
        let state = RodState::reference(&model);
        let eval = evaluate(&model, &state, true).expect("evaluate");
        assert!(eval.internal_force.norm() < 1e-12);
        assert_eq!(eval.trial_plastic.len(), 4);
        assert_eq!(eval.contact.active_pairs, 0);

        let reduced = reduce_to_free(eval.tangent.as_ref().expect("tangent"), &model.bcs);
        assert_eq!(reduced.nrows, model.bcs.num_free());
        assert!(reduced.row_indices.iter().all(|&r| r < reduced.nrows));
    }

    #[test]
    fn assembly_is_deterministic() {
        let model = make_model("");
        let mut state = RodState::reference(&model);
        let mut delta = DVector::zeros(model.num_dofs());
        for (i, v) in delta.iter_mut().enumerate().skip(6) {
            *v = 1e-3 * ((i * 7919) % 13) as f64;
        }
        state.apply_increment(&delta);
        let a = evaluate(&model, &state, false).expect("evaluate");
        let b = evaluate(&model, &state, false).expect("evaluate");
        assert_eq!(a.internal_force, b.internal_force);
        assert_eq!(a.stored_energy, b.stored_energy);
    }

    #[test]
    fn axial_stretch_is_balanced_by_reaction() {
        let model = make_model("");
        let mut state = RodState::reference(&model);
        for (node, u) in state.displacement.iter_mut().enumerate() {
            u.x = 0.01 * model.reference_position(node).x;
        }
        let eval = evaluate(&model, &state, false).expect("evaluate");
        let clamp = model.mesh.group("arm.start").expect("group");
        let tip = model.mesh.group("arm.end").expect("group");
        // E A * strain
        assert_relative_eq!(eval.resultant(clamp)[0], -0.5, epsilon = 1e-10);
        assert_relative_eq!(eval.resultant(tip)[0], 0.5, epsilon = 1e-10);
        assert_relative_eq!(eval.stored_energy, 0.5 * 50.0 * 1e-4 * 2.0, epsilon = 1e-12);
    }

    #[test]
    fn follower_load_stiffness_matches_finite_differences() {
        let model = make_model(
            "loads.turn = { group = \"arm.end\"; dofs = [\"dy\", \"rz\"]; values = [2, 0.5]; follower = true; };",
        );
        let tip = model.mesh.group("arm.end").expect("tip")[0];
        let mut state = RodState::reference(&model);
        state.rotation[tip] = exp_map(&Vector3::new(0.3, -0.2, 0.5));
        let factor = 1.5;

        let mut coo = CooMatrix::new(model.num_dofs(), model.num_dofs());
        push_load_stiffness(&mut coo, &model, &state, factor);
        let k = nalgebra::DMatrix::from(&coo);

        let h = 1e-6;
        for axis in 0..3 {
            let turned = |sign: f64| {
                let mut moved = state.clone();
                let mut spin = Vector3::zeros();
                spin[axis] = sign * h;
                moved.rotation[tip] = exp_map(&spin) * state.rotation[tip];
                external_force(&model, &moved, factor)
            };
            // the tangent carries -∂F_ext/∂θ
            let column = (turned(-1.0) - turned(1.0)) / (2.0 * h);
            let col = DOFS_PER_NODE * tip + 3 + axis;
            for row in 0..model.num_dofs() {
                assert_relative_eq!(k[(row, col)], column[row], epsilon = 1e-8);
            }
        }
        // the dead tip load keeps pointing along z
        let turned_force = state.rotation[tip] * Vector3::new(0.0, 2.0, 0.0);
        let f = external_force(&model, &state, 1.0);
        assert_relative_eq!(f[DOFS_PER_NODE * tip + 2], 1.0 + turned_force.z, epsilon = 1e-14);
    }
}
