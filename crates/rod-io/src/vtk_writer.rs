//! VTK writer for deformed rod configurations.
//!
//! Every converged load step can be written as a legacy ASCII `.vtk`
//! unstructured grid: nodal positions, one line cell per rod element and
//! nodal vector fields (displacement, rotation vector, ...) for ParaView.
//!
//! ## Cell types
//!
//! - 2-node elements: `VTK_LINE`
//! - 3-node elements: `VTK_QUADRATIC_EDGE` (end, end, middle ordering)
//! - 4-node elements: `VTK_POLY_LINE`

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{IoError, Result};
use crate::output::ensure_parent_dir;

#[derive(Debug, Clone, Copy)]
enum VtkCellType {
    Line = 3,
    PolyLine = 4,
    QuadraticEdge = 21,
}

impl VtkCellType {
    fn for_node_count(n: usize) -> Self {
        match n {
            2 => VtkCellType::Line,
            3 => VtkCellType::QuadraticEdge,
            _ => VtkCellType::PolyLine,
        }
    }
}

/// One snapshot of the rod mesh. `cells` hold point indices in element
/// (along-the-rod) order.
#[derive(Debug, Clone, Default)]
pub struct RodSnapshot {
    pub title: String,
    pub points: Vec<[f64; 3]>,
    pub cells: Vec<Vec<usize>>,
    pub point_vectors: Vec<(String, Vec<[f64; 3]>)>,
    pub cell_scalars: Vec<(String, Vec<f64>)>,
}

impl RodSnapshot {
    fn validate(&self) -> Result<()> {
        let n = self.points.len();
        if let Some(cell) = self.cells.iter().find(|c| c.len() < 2 || c.iter().any(|&p| p >= n)) {
            return Err(IoError::InvalidData(format!(
                "cell {cell:?} does not reference {n} points correctly"
            )));
        }
        for (name, values) in &self.point_vectors {
            if values.len() != n {
                return Err(IoError::InvalidData(format!(
                    "point field '{name}' has {} values for {n} points",
                    values.len()
                )));
            }
        }
        for (name, values) in &self.cell_scalars {
            if values.len() != self.cells.len() {
                return Err(IoError::InvalidData(format!(
                    "cell field '{name}' has {} values for {} cells",
                    values.len(),
                    self.cells.len()
                )));
            }
        }
        Ok(())
    }
}

/// Writes legacy VTK file
pub fn write_vtk(path: impl AsRef<Path>, snapshot: &RodSnapshot) -> Result<()> {
    snapshot.validate()?;
    let path = path.as_ref();
    ensure_parent_dir(path)?;
    let file = File::create(path).map_err(|source| IoError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut out = BufWriter::new(file);

    writeln!(out, "# vtk DataFile Version 3.0")?;
    writeln!(out, "{}", snapshot.title.replace('\n', " "))?;
    writeln!(out, "ASCII")?;
    writeln!(out, "DATASET UNSTRUCTURED_GRID")?;

    writeln!(out, "POINTS {} double", snapshot.points.len())?;
    for p in &snapshot.points {
        writeln!(out, "{} {} {}", p[0], p[1], p[2])?;
    }

    let total_size: usize = snapshot.cells.iter().map(|c| 1 + c.len()).sum();
    writeln!(out, "CELLS {} {}", snapshot.cells.len(), total_size)?;
    for cell in &snapshot.cells {
        let ordered = vtk_order(cell);
        let ids: Vec<String> = ordered.iter().map(|i| i.to_string()).collect();
        writeln!(out, "{} {}", ordered.len(), ids.join(" "))?;
    }

    writeln!(out, "CELL_TYPES {}", snapshot.cells.len())?;
    for cell in &snapshot.cells {
        writeln!(out, "{}", VtkCellType::for_node_count(cell.len()) as i32)?;
    }

    if !snapshot.point_vectors.is_empty() {
        writeln!(out, "POINT_DATA {}", snapshot.points.len())?;
        for (name, values) in &snapshot.point_vectors {
            writeln!(out, "VECTORS {} double", sanitize(name))?;
            for v in values {
                writeln!(out, "{} {} {}", v[0], v[1], v[2])?;
            }
        }
    }

    if !snapshot.cell_scalars.is_empty() {
        writeln!(out, "CELL_DATA {}", snapshot.cells.len())?;
        for (name, values) in &snapshot.cell_scalars {
            writeln!(out, "SCALARS {} double 1", sanitize(name))?;
            writeln!(out, "LOOKUP_TABLE default")?;
            for v in values {
                writeln!(out, "{v}")?;
            }
        }
    }

    out.flush()?;
    Ok(())
}

/// Quadratic edges list both end points before the middle node.
fn vtk_order(cell: &[usize]) -> Vec<usize> {
    if cell.len() == 3 {
        vec![cell[0], cell[2], cell[1]]
    } else {
        cell.to_vec()
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Numbered snapshots `<dir>/step_NNNN.vtk`.
#[derive(Debug, Clone)]
pub struct VtkSeries {
    dir: PathBuf,
    every: usize,
    written: Vec<PathBuf>,
}

impl VtkSeries {
    pub fn new(dir: impl Into<PathBuf>, every: usize) -> Self {
        Self {
            dir: dir.into(),
            every: every.max(1),
            written: Vec::new(),
        }
    }

    pub fn step_path(&self, step: usize) -> PathBuf {
        self.dir.join(format!("step_{step:04}.vtk"))
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Writes `snapshot` if `step` falls on the sampling interval.
    pub fn write_step(&mut self, step: usize, snapshot: &RodSnapshot) -> Result<bool> {
        if step % self.every != 0 {
            return Ok(false);
        }
        let path = self.step_path(step);
        write_vtk(&path, snapshot)?;
        self.written.push(path);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_snapshot() -> RodSnapshot {
        RodSnapshot {
            title: "rod step 1".to_string(),
            points: vec![[0.0, 0.0, 0.0], [0.5, 0.0, 0.0], [1.0, 0.0, 0.0], [1.5, 0.0, 0.0]],
            cells: vec![vec![0, 1], vec![1, 2, 3]],
            point_vectors: vec![(
                "displacement".to_string(),
                vec![[0.0; 3], [0.0, 0.1, 0.0], [0.0, 0.2, 0.0], [0.0, 0.3, 0.0]],
            )],
            cell_scalars: vec![("axial force".to_string(), vec![1.0, 2.0])],
        }
    }

    #[test]
    fn writes_points_cells_and_fields() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("rod.vtk");
        write_vtk(&path, &make_snapshot()).expect("vtk should write");
        let content = std::fs::read_to_string(&path).expect("readable");
        assert!(content.contains("POINTS 4 double"));
        assert!(content.contains("CELLS 2 7"));
        // quadratic edge reordered to end, end, middle
        assert!(content.contains("\n3 1 3 2\n"));
        assert!(content.contains("CELL_TYPES 2\n3\n21\n"));
        assert!(content.contains("VECTORS displacement double"));
        assert!(content.contains("SCALARS axial_force double 1"));
    }

    #[test]
    fn rejects_mismatched_fields() {
        let mut snapshot = make_snapshot();
        snapshot.point_vectors[0].1.pop();
        let dir = tempfile::tempdir().expect("temp dir");
        let err = write_vtk(dir.path().join("bad.vtk"), &snapshot).expect_err("should fail");
        assert!(matches!(err, IoError::InvalidData(_)));
    }

    #[test]
    fn series_samples_every_nth_step() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut series = VtkSeries::new(dir.path().join("visual"), 2);
        let snapshot = make_snapshot();
        let written: Vec<bool> = (0..5)
            .map(|step| series.write_step(step, &snapshot).expect("write"))
            .collect();
        assert_eq!(written, vec![true, false, true, false, true]);
        assert_eq!(series.written().len(), 3);
        assert!(series.step_path(4).ends_with("step_0004.vtk"));
        assert!(series.written()[2].exists());
    }
}
