/// Energy balance of a cantilever set into free vibration by a short tip
/// pulse, read back from `energy.csv`.
///
/// Mass per unit length 1, EI = 10, first period about 0.56. The pulse acts
/// on [0, 0.05]; afterwards no external work is done, so the mechanical
/// energy `E_pot + E_kin` may only decay (numerical or viscous dissipation).

use std::fs;
use std::path::Path;

use rod_solver::{AnalysisPipeline, SolverMode};

const COLUMNS: [&str; 6] = ["time", "load", "E_pot", "E_kin", "E_diss", "E_tot"];

struct EnergyRow {
    time: f64,
    load: f64,
    kinetic: f64,
    dissipated: f64,
    total: f64,
}

fn run_transient(dir: &Path, transient: &str) -> Vec<EnergyRow> {
    let project = dir.join("cantilever.props");
    let src = format!(
        "title = \"plucked cantilever\";\n\
         model = {{\n\
           rods.arm = {{ start = [0,0,0]; end = [1,0,0]; elements = 4; order = 2; material = \"m\"; }};\n\
           materials.m = {{ young = 1000; shear_modulus = 400; density = 10; area = 0.1; area_moment = [0.01, 0.01]; }};\n\
           constraints.clamp = {{ group = \"arm.start\"; dofs = [\"dx\",\"dy\",\"dz\",\"rx\",\"ry\",\"rz\"]; }};\n\
           loads.tip = {{ group = \"arm.end\"; dof = \"dz\"; value = -0.5; }};\n\
         }};\n\
         solver = {{ mode = \"transient\"; transient = {{ duration = 1; time_step = 0.01; \
           load = {{ kind = \"pulse\"; duration = 0.05; }}; {transient} }}; }};\n\
         output = {{ disp.group = \"arm.end\"; }};\n"
    );
    fs::write(&project, src).expect("write project");

    let out = dir.join("out");
    let pipeline =
        AnalysisPipeline::from_project(&project, &[format!("output.dir={}", out.display())])
            .expect("config");
    let results = pipeline.run().expect("transient run");
    assert_eq!(results.mode, SolverMode::Transient);
    assert!((results.time - 1.0).abs() < 1e-9, "end time {}", results.time);

    let text = fs::read_to_string(out.join("energy.csv")).expect("energy.csv");
    let mut lines = text.lines();
    let header: Vec<&str> = lines.next().expect("header").split(',').collect();
    assert_eq!(header, COLUMNS);

    let rows: Vec<EnergyRow> = lines
        .map(|line| {
            let v: Vec<f64> = line
                .split(',')
                .map(|x| x.parse().expect("number"))
                .collect();
            assert_eq!(v.len(), COLUMNS.len());
            EnergyRow {
                time: v[0],
                load: v[1],
                kinetic: v[3],
                dissipated: v[4],
                total: v[5],
            }
        })
        .collect();

    // one disp row per time step, the initial state only in energy.csv
    let disp = fs::read_to_string(out.join("disp.csv")).expect("disp.csv");
    assert_eq!(disp.lines().count() + 1, rows.len());
    rows
}

/// Rows recorded after the pulse, starting from the first unloaded state.
fn free_vibration(rows: &[EnergyRow]) -> &[EnergyRow] {
    let first = rows
        .iter()
        .position(|r| r.time > 0.0 && r.load == 0.0)
        .expect("pulse ends");
    &rows[first..]
}

/// No step after the pulse may gain more mechanical energy than the
/// integrator's energy tolerance (1e-5 of the largest total so far).
fn assert_no_step_gains_energy(rows: &[EnergyRow]) {
    let peak = rows.iter().map(|r| r.total.abs()).fold(0.0, f64::max);
    let eps = 1e-5 * peak;
    for w in free_vibration(rows).windows(2) {
        assert!(
            w[1].total - w[0].total <= eps,
            "energy grew by {:e} between t = {} and t = {}",
            w[1].total - w[0].total,
            w[0].time,
            w[1].time
        );
    }
}

#[test]
fn test_dissipative_scheme_energy_decays() {
    let dir = tempfile::tempdir().expect("tempdir");
    let rows = run_transient(dir.path(), "");
    assert_eq!(rows[0].time, 0.0);
    assert_eq!(rows[0].kinetic, 0.0);
    for w in rows.windows(2) {
        assert!(w[1].time > w[0].time);
        assert!(w[1].dissipated >= w[0].dissipated);
    }

    let free = free_vibration(&rows);
    let start = free[0].total;
    println!("energy after the pulse {start:.6e}, at the end {:.6e}", free.last().expect("rows").total);
    assert!(start > 0.0);
    for row in free {
        assert!(row.total <= start * 1.02, "energy grew to {} at t = {}", row.total, row.time);
    }
    assert!(free.last().expect("rows").total < start);
    assert_no_step_gains_energy(&rows);
}

#[test]
fn test_average_acceleration_conserves_energy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let rows = run_transient(dir.path(), "scheme = \"average_acceleration\";");
    let free = free_vibration(&rows);
    let start = free[0].total;
    for row in free {
        assert!(
            (row.total - start).abs() < 0.05 * start,
            "energy {} at t = {}, after the pulse {start}",
            row.total,
            row.time
        );
        assert_eq!(row.dissipated, 0.0);
    }
    assert_no_step_gains_energy(&rows);
}

#[test]
fn test_rayleigh_damping_dissipates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let rows = run_transient(
        dir.path(),
        "scheme = \"average_acceleration\"; rayleigh = [0.5, 0];",
    );
    for w in rows.windows(2) {
        assert!(w[1].dissipated >= w[0].dissipated);
    }
    let free = free_vibration(&rows);
    let start = free[0].total;
    let last = free.last().expect("rows");
    assert!(last.dissipated > free[0].dissipated);
    assert!(last.total < 0.9 * start, "damped energy {} vs {start}", last.total);
    // what leaves the mechanical energy shows up as dissipation
    let balance = (start + free[0].dissipated) - (last.total + last.dissipated);
    assert!(balance.abs() < 0.05 * start, "energy balance off by {balance}");
    assert_no_step_gains_energy(&rows);
}
