//! Finite elements for rod structures.

pub mod rod;

pub use rod::{ElementResponse, IntegrationRule, PointKinematics, RodElement};

use crate::boundary_conditions::DOFS_PER_NODE;

/// Element interface used by the assembler
pub trait Element {
    /// Indices of the element nodes in the mesh
    fn nodes(&self) -> &[usize];

    /// Get the number of nodes for this element type
    fn num_nodes(&self) -> usize {
        self.nodes().len()
    }

    /// Get the number of degrees of freedom per node
    fn dofs_per_node(&self) -> usize {
        DOFS_PER_NODE
    }

    /// Global DOF indices in element order
    fn global_dof_indices(&self) -> Vec<usize> {
        let dofs_per_node = self.dofs_per_node();
        let mut indices = Vec::with_capacity(self.num_nodes() * dofs_per_node);
        for &node in self.nodes() {
            let base_dof = node * dofs_per_node;
            for local_dof in 0..dofs_per_node {
                indices.push(base_dof + local_dof);
            }
        }
        indices
    }
}
