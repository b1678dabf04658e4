//! Output support for rod simulations.
//!
//! This crate provides:
//! - **CSV series** (`disp.csv`, `resp.csv`, `energy.csv`, ...) flushed per
//!   converged increment, with an append mode that keeps earlier runs
//! - **Run log** with the fixed-prefix convergence lines read by test scripts
//! - **VTK export** of deformed rod meshes for ParaView
//! - **JSON dump** of the resolved run configuration

pub mod error;
mod output;
mod run_log;
pub mod vtk_writer;

pub use error::{IoError, Result};
pub use output::{CsvSeries, SeriesMode, format_value, write_json};
pub use run_log::RunLog;
pub use vtk_writer::{RodSnapshot, VtkSeries, write_vtk};
