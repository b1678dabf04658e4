/// Cantilever under a tip force that stays normal to the rotated tip.
///
/// For an inextensible, shear-rigid rod the angle `φ = θ − θ_L` measured
/// from the tip satisfies `EI φ'' = −P cos φ` with `φ = φ' = 0` at the tip,
/// so the reference solution is a plain initial value problem integrated
/// from the tip back to the clamp. The section is made axially and in shear
/// so stiff that the rod model matches it to well below a percent.

use nalgebra::Vector3;
use rod_io::RunLog;
use rod_props::Props;
use rod_solver::path_following::ReportCollector;
use rod_solver::{NativeBackend, PathFollowing, RodModel, RodState, RunConfig};

const BENDING: f64 = 10.0;
const LENGTH: f64 = 1.0;

/// Tip rotation and tip position of the elastica under follower load `p`.
fn elastica(p: f64) -> (f64, Vector3<f64>) {
    let k = p / BENDING;
    let steps = 4000;
    let h = LENGTH / steps as f64;
    // (φ, dφ/dσ, ∫cos φ, ∫sin φ) with σ = L − s
    let rate = |y: [f64; 4]| [y[1], -k * y[0].cos(), y[0].cos(), y[0].sin()];
    let mut y = [0.0; 4];
    for _ in 0..steps {
        let add = |a: [f64; 4], b: [f64; 4], f: f64| {
            [a[0] + b[0] * f, a[1] + b[1] * f, a[2] + b[2] * f, a[3] + b[3] * f]
        };
        let k1 = rate(y);
        let k2 = rate(add(y, k1, 0.5 * h));
        let k3 = rate(add(y, k2, 0.5 * h));
        let k4 = rate(add(y, k3, h));
        for i in 0..4 {
            y[i] += h / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
        }
    }
    let theta = -y[0];
    let (sin, cos) = theta.sin_cos();
    let tip = Vector3::new(cos * y[2] - sin * y[3], sin * y[2] + cos * y[3], 0.0);
    (theta, tip)
}

fn make_config(load: f64, follower: bool, solver: &str) -> RunConfig {
    let src = format!(
        "model = {{ \
           rods.arm = {{ start = [0,0,0]; end = [{LENGTH},0,0]; elements = 10; order = 2; material = \"m\"; }}; \
           materials.m = {{ young = 1e4; shear_modulus = 4e3; area = 10; area_moment = 1e-3; }}; \
           constraints.clamp = {{ group = \"arm.start\"; dofs = [\"dx\",\"dy\",\"dz\",\"rx\",\"ry\",\"rz\"]; }}; \
           constraints.plane = {{ group = \"all\"; dofs = [\"dz\",\"rx\",\"ry\"]; }}; \
           loads.tip = {{ group = \"arm.end\"; dof = \"dy\"; value = {load}; follower = {follower}; }}; }}; \
         solver = {{ {solver} }};"
    );
    RunConfig::from_props(&Props::parse_str(&src).expect("parse")).expect("config")
}

fn solve(config: &RunConfig) -> (RodModel, RodState) {
    let model = RodModel::assemble(config).expect("model");
    let path = PathFollowing::new(&model, &config.solver, &NativeBackend).expect("path");
    let mut state = RodState::reference(&model);
    path.run(&mut state, &mut RunLog::disabled(), &mut ReportCollector::default())
        .expect("follower load run");
    (model, state)
}

const FORCE_CONTROL: &str = "mode = \"force\"; max_iterations = 30; steps = { initial = 0.1; max = 0.1; };";

fn tip(model: &RodModel, state: &RodState) -> (usize, Vector3<f64>) {
    let node = model.mesh.group("arm.end").expect("tip")[0];
    (node, state.positions(model)[node])
}

#[test]
fn test_tip_follower_force_matches_elastica() {
    let load = 30.0;
    let (model, state) = solve(&make_config(load, true, FORCE_CONTROL));
    let (node, position) = tip(&model, &state);
    let rotation = state.dof_values(node)[5];

    let (theta, expected) = elastica(load);
    println!("tip rotation {rotation:.5} (elastica {theta:.5}), tip {position:?} (elastica {expected:?})");
    assert!(theta > 1.0, "load too small to be nonlinear");
    assert!((rotation - theta).abs() < 1e-2 * theta, "tip rotation {rotation}, expected {theta}");
    assert!(
        (position - expected).norm() < 1e-2 * LENGTH,
        "tip {position:?}, expected {expected:?}"
    );

    // the clamp carries the rotated tip force and its moment
    let force = state.rotation[node] * Vector3::new(0.0, load, 0.0);
    let evaluation = rod_solver::assembly::evaluate(&model, &state, false).expect("evaluate");
    let clamp = model.mesh.group("arm.start").expect("clamp");
    let reaction = evaluation.resultant(clamp);
    let reaction_force = Vector3::new(reaction[0], reaction[1], reaction[2]);
    assert!((reaction_force + force).norm() < 1e-6 * load, "{reaction:?} vs {force:?}");
    let moment = position.cross(&force);
    assert!((reaction[5] + moment.z).abs() < 1e-6 * load, "{reaction:?} vs {moment:?}");
}

#[test]
fn test_small_follower_force_matches_linear_theory() {
    let load = 0.3;
    let (model, state) = solve(&make_config(load, true, FORCE_CONTROL));
    let (_, position) = tip(&model, &state);
    // P L³ / (3 EI)
    let linear = load * LENGTH.powi(3) / (3.0 * BENDING);
    assert!((position.y - linear).abs() < 1e-2 * linear, "tip deflection {}", position.y);
}

#[test]
fn test_follower_differs_from_dead_load() {
    let load = 30.0;
    let (model, follower_state) = solve(&make_config(load, true, FORCE_CONTROL));
    let (_, follower_tip) = tip(&model, &follower_state);
    let (model, dead_state) = solve(&make_config(load, false, FORCE_CONTROL));
    let (_, dead_tip) = tip(&model, &dead_state);
    // the follower force keeps bending the rod back towards the clamp
    assert!(follower_tip.x < dead_tip.x - 0.1, "follower {follower_tip:?}, dead {dead_tip:?}");
}

#[test]
fn test_arc_length_tracks_follower_path() {
    let load = 20.0;
    let (model, state) = solve(&make_config(
        load,
        true,
        "mode = \"arc_length\"; max_iterations = 30; \
         arc_length = { initial_load_increment = 0.1; max_ratio = 2; max_load_factor = 1; };",
    ));
    assert!(state.load_factor >= 1.0);
    let (_, position) = tip(&model, &state);
    let (_, expected) = elastica(load * state.load_factor);
    assert!(
        (position - expected).norm() < 1e-2 * LENGTH,
        "tip {position:?} at load factor {}, expected {expected:?}",
        state.load_factor
    );
}
