/// Cantilever rods under an end moment bend into circular arcs.
///
/// With `M = k 2π EI / L` the centre line has constant curvature `κ = M/EI`
/// and the tip rotates by `κ L` about the moment axis; `k = 1` closes the rod
/// into a full circle, `k = 1/2` into a half circle of radius `L/π`.

use std::f64::consts::PI;

use nalgebra::Vector3;
use rod_io::RunLog;
use rod_props::Props;
use rod_solver::path_following::ReportCollector;
use rod_solver::{NativeBackend, PathFollowing, RodModel, RodState, RunConfig};

const YOUNG: f64 = 1000.0;
const AREA_MOMENT: f64 = 0.01;
const LENGTH: f64 = 1.0;

const DOF_NAMES: [&str; 3] = ["rx", "ry", "rz"];

fn vec_text(v: &Vector3<f64>) -> String {
    format!("[{}, {}, {}]", v.x, v.y, v.z)
}

/// Clamped rod from the origin along `direction`, loaded by a moment about
/// coordinate axis `axis`.
fn solve_end_moment(direction: Vector3<f64>, axis: usize, multiple: f64) -> (RodModel, RodState) {
    let moment = multiple * 2.0 * PI * YOUNG * AREA_MOMENT / LENGTH;
    solve_with_tip_load(
        direction,
        &format!("dof = \"{}\"; value = {moment};", DOF_NAMES[axis]),
    )
}

/// Same as [`solve_end_moment`] with the moment about the unit `axis`,
/// split over its rotational components.
fn solve_end_moment_about(
    direction: Vector3<f64>,
    axis: Vector3<f64>,
    multiple: f64,
) -> (RodModel, RodState) {
    let moment = axis * (multiple * 2.0 * PI * YOUNG * AREA_MOMENT / LENGTH);
    solve_with_tip_load(
        direction,
        &format!("dofs = [\"rx\", \"ry\", \"rz\"]; values = {};", vec_text(&moment)),
    )
}

fn solve_with_tip_load(direction: Vector3<f64>, load: &str) -> (RodModel, RodState) {
    let end = direction * LENGTH;
    let src = format!(
        "model = {{ \
           rods.arm = {{ start = [0,0,0]; end = {}; elements = 16; order = 2; material = \"m\"; }}; \
           materials.m = {{ young = {YOUNG}; shear_modulus = 400; area = 0.1; area_moment = {AREA_MOMENT}; }}; \
           constraints.clamp = {{ group = \"arm.start\"; dofs = [\"dx\",\"dy\",\"dz\",\"rx\",\"ry\",\"rz\"]; }}; \
           loads.moment = {{ group = \"arm.end\"; {load} }}; }}; \
         solver = {{ mode = \"force\"; max_iterations = 30; steps = {{ initial = 0.05; max = 0.05; }}; }};",
        vec_text(&end)
    );
    let config = RunConfig::from_props(&Props::parse_str(&src).expect("parse")).expect("config");
    let model = RodModel::assemble(&config).expect("model");
    let path = PathFollowing::new(&model, &config.solver, &NativeBackend).expect("path");
    let mut state = RodState::reference(&model);
    path.run(&mut state, &mut RunLog::disabled(), &mut ReportCollector::default())
        .expect("end moment run");
    assert!((state.load_factor - 1.0).abs() < 1e-12);
    (model, state)
}

fn tip_position(model: &RodModel, state: &RodState) -> Vector3<f64> {
    let tip = model.mesh.group("arm.end").expect("tip")[0];
    state.positions(model)[tip]
}

#[test]
fn test_full_circle_in_several_directions() {
    let cases = [
        (Vector3::x(), 2),
        (Vector3::x(), 1),
        (Vector3::z(), 0),
        (Vector3::new(1.0, 1.0, 0.0).normalize(), 2),
    ];
    for (direction, axis) in cases {
        let (model, state) = solve_end_moment(direction, axis, 1.0);
        let tip = tip_position(&model, &state);
        println!("direction {direction:?}, axis {axis}: tip at {tip:?}");
        assert!(
            tip.norm() < 2e-3 * LENGTH,
            "tip should return to the clamp, got {tip:?}"
        );

        let tip_node = model.mesh.group("arm.end").expect("tip")[0];
        let rotation = state.dof_values(tip_node);
        assert!(
            (rotation[3 + axis] - 2.0 * PI).abs() < 1e-3 * 2.0 * PI,
            "total tip rotation {:?}",
            rotation
        );
    }
}

#[test]
fn test_half_circle_diameter() {
    let direction = Vector3::x();
    let (model, state) = solve_end_moment(direction, 2, 0.5);
    // bends towards axis × direction
    let expected = Vector3::z().cross(&direction) * (2.0 * LENGTH / PI);
    let tip = tip_position(&model, &state);
    assert!(
        (tip - expected).norm() < 2e-3 * LENGTH,
        "tip {tip:?}, expected {expected:?}"
    );
}

#[test]
fn test_reaction_equals_applied_moment() {
    let (model, state) = solve_end_moment(Vector3::x(), 1, 1.0);
    let evaluation = rod_solver::assembly::evaluate(&model, &state, false).expect("evaluate");
    let moment = 2.0 * PI * YOUNG * AREA_MOMENT / LENGTH;

    let clamp = model.mesh.group("arm.start").expect("clamp");
    let reaction = evaluation.resultant(clamp);
    assert!((reaction[4] + moment).abs() < 1e-6 * moment, "{reaction:?}");
    for k in [0, 1, 2, 3, 5] {
        assert!(reaction[k].abs() < 1e-6 * moment, "component {k}: {reaction:?}");
    }

    let tip = model.mesh.group("arm.end").expect("tip");
    let applied = evaluation.resultant(tip);
    assert!((applied[4] - moment).abs() < 1e-6 * moment);
}

#[test]
fn test_moment_split_over_two_components() {
    let alpha: f64 = 0.4;
    let axis = Vector3::new(alpha.sin(), alpha.cos(), 0.0);
    let direction = Vector3::z();

    let (model, state) = solve_end_moment_about(direction, axis, 1.0);
    let tip = tip_position(&model, &state);
    assert!(tip.norm() < 2e-3 * LENGTH, "tip should return to the clamp, got {tip:?}");
    let tip_node = model.mesh.group("arm.end").expect("tip")[0];
    let rotation = state.dof_values(tip_node);
    let rotation = Vector3::new(rotation[3], rotation[4], rotation[5]);
    assert!(
        (rotation - axis * (2.0 * PI)).norm() < 1e-3 * 2.0 * PI,
        "total tip rotation {rotation:?}"
    );

    let (model, state) = solve_end_moment_about(direction, axis, 0.5);
    let expected = axis.cross(&direction) * (2.0 * LENGTH / PI);
    let tip = tip_position(&model, &state);
    assert!(
        (tip - expected).norm() < 2e-3 * LENGTH,
        "tip {tip:?}, expected {expected:?}"
    );
}
