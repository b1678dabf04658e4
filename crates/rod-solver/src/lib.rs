//! Nonlinear finite element solver for Cosserat rods.
//!
//! Geometrically exact rods with Lagrange interpolation of the centre line
//! and rotation-vector interpolation of the triads, elastoplastic stress
//! resultants and beam-to-beam penalty contact. Equilibrium paths are traced
//! by load, displacement or arc-length control; transient runs use a
//! Newmark scheme on the rotation group.

pub mod analysis;
pub mod assembly;
pub mod backend;
pub mod boundary_conditions;
pub mod config;
pub mod contact;
pub mod dynamic_solver;
pub mod elements;
pub mod error;
pub mod materials;
pub mod mesh;
pub mod model;
pub mod nonlinear_solver;
pub mod output;
pub mod path_following;
pub mod rotation;
pub mod shape;

pub use analysis::{AnalysisPipeline, AnalysisResults, inspect};
pub use assembly::Evaluation;
pub use backend::{LinearSolver, NativeBackend, SparseTripletsF64, default_backend};
pub use boundary_conditions::{BoundaryConditions, DOFS_PER_NODE, DofId, LoadHistory};
pub use config::{RunConfig, SolverMode};
pub use contact::{ContactSettings, ContactSummary};
pub use dynamic_solver::{DynamicSolver, EnergyReport, NewmarkConfig, TimeStepReport};
pub use elements::{IntegrationRule, RodElement};
pub use error::{Result, SolverError};
pub use materials::{HardeningKind, PlasticState, RodMaterial, SectionProperties};
pub use mesh::{Mesh, MeshStatistics, Node};
pub use model::{RodModel, RodState};
pub use nonlinear_solver::{ConvergenceStatus, NewtonSolver, NonlinearConfig, NonlinearResults};
pub use output::OutputWriter;
pub use path_following::{ControlMode, IncrementReport, PathFollowing};
