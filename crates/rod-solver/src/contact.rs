//! Penalty contact between rod centre lines.
//!
//! The arena is rebuilt on every residual evaluation from the current
//! nodal positions:
//! 1. broad phase over rod and element bounding boxes inflated by the
//!    contact radius
//! 2. closest points between element centre lines
//! 3. penalty force `p = eps * (-g)` on pairs with gap `g <= 0`
//! 4. deduplication of pairs that describe the same physical contact

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::config::ContactConfig;
use crate::elements::RodElement;
use crate::error::{Result, SolverError};
use crate::mesh::Mesh;
use crate::shape::LagrangeLine;

const PROJECTION_TOLERANCE: f64 = 1e-12;
const MAX_PROJECTION_ITERATIONS: usize = 50;

/// Pair key: element indices, smaller first.
pub type PairKey = (usize, usize);

#[derive(Debug, Clone, PartialEq)]
pub struct ContactSettings {
    /// Rod indices taking part
    pub rods: Vec<usize>,
    pub radius: f64,
    pub penalty: f64,
    pub hysteresis: f64,
    pub max_pairs: usize,
    pub max_penetration: f64,
}

impl ContactSettings {
    /// `None` when contact is disabled.
    pub fn from_config(config: &ContactConfig, mesh: &Mesh) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        if !(config.radius > 0.0) || !(config.penalty > 0.0) {
            return Err(SolverError::config(
                "contact radius and penalty must be positive",
            ));
        }
        if config.hysteresis < 0.0 {
            return Err(SolverError::config("contact hysteresis must not be negative"));
        }
        let rods = if config.rods.is_empty() {
            (0..mesh.rods.len()).collect()
        } else {
            config
                .rods
                .iter()
                .map(|name| {
                    mesh.rod_index(name).ok_or_else(|| {
                        SolverError::config(format!("contact references unknown rod '{name}'"))
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };
        let max_penetration = config.max_penetration.unwrap_or(config.radius);
        if !(max_penetration > 0.0) {
            return Err(SolverError::config("contact max_penetration must be positive"));
        }
        Ok(Some(Self {
            rods,
            radius: config.radius,
            penalty: config.penalty,
            hysteresis: config.hysteresis,
            max_pairs: config.max_pairs,
            max_penetration,
        }))
    }

    /// Fails when a converged state penetrates deeper than allowed.
    pub fn check_penetration(&self, summary: &ContactSummary) -> Result<()> {
        if -summary.min_gap > self.max_penetration {
            return Err(SolverError::ContactSearchFailure(format!(
                "penetration {:.6e} exceeds the admissible {:.6e}",
                -summary.min_gap, self.max_penetration
            )));
        }
        Ok(())
    }

    /// Distance between centre lines at which contact starts.
    pub fn contact_distance(&self) -> f64 {
        2.0 * self.radius
    }
}

/// Closest-point data of one active pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactPair {
    pub elements: PairKey,
    pub rods: (usize, usize),
    /// Natural coordinates of the closest points on both elements
    pub xi: (f64, f64),
    /// Unit vector from the point on the first element to the second
    pub normal: Vector3<f64>,
    pub distance: f64,
    pub gap: f64,
    /// Penalty force magnitude
    pub force: f64,
    point: Vector3<f64>,
    /// `∂(xa - xb)/∂ξ` per closest-point coordinate and its second derivative
    sliding: [Vector3<f64>; 2],
    sliding_rate: [Vector3<f64>; 2],
}

impl ContactPair {
    /// Inverse Hessian of the squared distance over the closest-point
    /// coordinates still inside their elements.
    fn sliding_compliance(&self) -> Option<[[f64; 2]; 2]> {
        let offset = -self.normal * self.distance;
        let [t0, t1] = &self.sliding;
        let h = [
            [t0.dot(t0) + offset.dot(&self.sliding_rate[0]), t0.dot(t1)],
            [t0.dot(t1), t1.dot(t1) + offset.dot(&self.sliding_rate[1])],
        ];
        let free = [self.xi.0.abs() < 1.0, self.xi.1.abs() < 1.0];
        let only_b = |h11: f64| positive(h11).map(|h11| [[0.0, 0.0], [0.0, 1.0 / h11]]);
        match free {
            [true, true] => {
                let det = h[0][0] * h[1][1] - h[0][1] * h[1][0];
                if h[0][0] <= 0.0 || det <= 1e-12 * (h[0][0] * h[1][1]).abs() {
                    // parallel centre lines slide along b only
                    return only_b(h[1][1]);
                }
                Some([
                    [h[1][1] / det, -h[0][1] / det],
                    [-h[1][0] / det, h[0][0] / det],
                ])
            }
            [true, false] => positive(h[0][0]).map(|h00| [[1.0 / h00, 0.0], [0.0, 0.0]]),
            [false, true] => only_b(h[1][1]),
            [false, false] => None,
        }
    }
}

/// Per evaluation contact report.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ContactSummary {
    pub active_pairs: usize,
    /// Smallest gap over active pairs, zero when nothing is in contact
    pub min_gap: f64,
    pub total_force: f64,
}

/// Force and stiffness contribution on translational DOFs.
#[derive(Debug, Clone)]
pub struct ContactContribution {
    pub dofs: Vec<usize>,
    pub force: DVector<f64>,
    pub stiffness: Option<DMatrix<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct ContactArena {
    pairs: BTreeMap<PairKey, ContactPair>,
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    min: Vector3<f64>,
    max: Vector3<f64>,
}

impl Bounds {
    fn around<'a>(points: impl IntoIterator<Item = &'a Vector3<f64>>, pad: f64) -> Self {
        let mut min = Vector3::repeat(f64::INFINITY);
        let mut max = Vector3::repeat(f64::NEG_INFINITY);
        for p in points {
            min = min.inf(p);
            max = max.sup(p);
        }
        let pad = Vector3::repeat(pad);
        Self {
            min: min - pad,
            max: max + pad,
        }
    }

    fn merge(&self, other: &Bounds) -> Self {
        Self {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    fn overlaps(&self, other: &Bounds) -> bool {
        (0..3).all(|k| self.min[k] <= other.max[k] && other.min[k] <= self.max[k])
    }
}

/// Centre line of one element in the current configuration.
struct Centreline {
    shape: LagrangeLine,
    points: Vec<Vector3<f64>>,
}

impl Centreline {
    fn new(element: &RodElement, positions: &[Vector3<f64>]) -> Result<Self> {
        let shape = LagrangeLine::new(element.nodes.len()).ok_or_else(|| {
            SolverError::config(format!("element {} has an unsupported order", element.id))
        })?;
        Ok(Self {
            shape,
            points: element.nodes.iter().map(|&n| positions[n]).collect(),
        })
    }

    fn is_linear(&self) -> bool {
        self.points.len() == 2
    }

    /// Position, tangent and curvature vector at `xi`.
    fn eval(&self, xi: f64) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>) {
        let values = self.shape.eval(xi);
        let mut x = Vector3::zeros();
        let mut t = Vector3::zeros();
        let mut c = Vector3::zeros();
        for (i, p) in self.points.iter().enumerate() {
            x += p * values.n[i];
            t += p * values.dn[i];
            c += p * values.d2n[i];
        }
        (x, t, c)
    }
}

impl ContactArena {
    /// Builds the active pair set for the current nodal `positions`.
    /// `previous` holds the pairs active in the last converged state.
    pub fn search(
        settings: &ContactSettings,
        mesh: &Mesh,
        elements: &[RodElement],
        positions: &[Vector3<f64>],
        previous: &BTreeSet<PairKey>,
    ) -> Result<Self> {
        let pad = settings.radius;
        let element_bounds: Vec<Bounds> = elements
            .iter()
            .map(|e| {
                let points: Vec<Vector3<f64>> = e.nodes.iter().map(|&n| positions[n]).collect();
                let mut bounds = Bounds::around(&points, pad);
                if e.nodes.len() > 2 {
                    // curved Lagrange centre lines may leave the nodal hull
                    let bulge = 0.25 * (bounds.max - bounds.min).amax();
                    bounds = Bounds::around(&points, pad + bulge);
                }
                bounds
            })
            .collect();

        let rod_bounds: Vec<Option<Bounds>> = mesh
            .rods
            .iter()
            .map(|rod| {
                rod.elements
                    .iter()
                    .map(|&e| element_bounds[e])
                    .reduce(|a, b| a.merge(&b))
            })
            .collect();

        let mut candidates: Vec<PairKey> = Vec::new();
        for (i, &rod_a) in settings.rods.iter().enumerate() {
            for &rod_b in &settings.rods[i + 1..] {
                if rod_a == rod_b {
                    continue;
                }
                let (Some(box_a), Some(box_b)) = (&rod_bounds[rod_a], &rod_bounds[rod_b]) else {
                    continue;
                };
                if !box_a.overlaps(box_b) {
                    continue;
                }
                for &ea in &mesh.rods[rod_a].elements {
                    for &eb in &mesh.rods[rod_b].elements {
                        if !element_bounds[ea].overlaps(&element_bounds[eb]) {
                            continue;
                        }
                        if elements[ea].nodes.iter().any(|n| elements[eb].nodes.contains(n)) {
                            continue;
                        }
                        candidates.push((ea.min(eb), ea.max(eb)));
                        if candidates.len() > settings.max_pairs {
                            return Err(SolverError::ContactSearchFailure(format!(
                                "more than {} contact candidate pairs",
                                settings.max_pairs
                            )));
                        }
                    }
                }
            }
        }

        let contact_distance = settings.contact_distance();
        let mut active = Vec::new();
        for (ea, eb) in candidates {
            let line_a = Centreline::new(&elements[ea], positions)?;
            let line_b = Centreline::new(&elements[eb], positions)?;
            let (xi_a, xi_b) = if line_a.is_linear() && line_b.is_linear() {
                segment_closest_points(
                    &line_a.points[0],
                    &line_a.points[1],
                    &line_b.points[0],
                    &line_b.points[1],
                )
            } else {
                project_centrelines(&line_a, &line_b).ok_or_else(|| {
                    SolverError::ContactSearchFailure(format!(
                        "closest point projection between elements {} and {} did not converge",
                        elements[ea].id, elements[eb].id
                    ))
                })?
            };
            let (xa, ta, ca) = line_a.eval(xi_a);
            let (xb, tb, cb) = line_b.eval(xi_b);
            let offset = xb - xa;
            let distance = offset.norm();
            let gap = distance - contact_distance;
            if gap > 0.0 {
                continue;
            }
            if distance <= f64::EPSILON * contact_distance {
                return Err(SolverError::ContactSearchFailure(format!(
                    "centre lines of elements {} and {} intersect",
                    elements[ea].id, elements[eb].id
                )));
            }
            active.push(ContactPair {
                elements: (ea, eb),
                rods: (elements[ea].rod, elements[eb].rod),
                xi: (xi_a, xi_b),
                normal: offset / distance,
                distance,
                gap,
                force: settings.penalty * (-gap),
                point: (xa + xb) * 0.5,
                sliding: [ta, -tb],
                sliding_rate: [ca, -cb],
            });
        }

        Ok(Self {
            pairs: deduplicate(active, settings, previous),
        })
    }

    pub fn pairs(&self) -> impl Iterator<Item = &ContactPair> {
        self.pairs.values()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn active_keys(&self) -> BTreeSet<PairKey> {
        self.pairs.keys().copied().collect()
    }

    pub fn summary(&self) -> ContactSummary {
        ContactSummary {
            active_pairs: self.pairs.len(),
            min_gap: self.pairs.values().map(|p| p.gap).fold(0.0, f64::min),
            total_force: self.pairs.values().map(|p| p.force).sum(),
        }
    }

    /// Penalty forces (as internal forces) and their tangent.
    ///
    /// The tangent includes the motion of the closest points along both
    /// centre lines, obtained by linearizing their orthogonality conditions.
    pub fn contributions(
        &self,
        settings: &ContactSettings,
        elements: &[RodElement],
        want_tangent: bool,
    ) -> Result<Vec<ContactContribution>> {
        self.pairs
            .values()
            .map(|pair| {
                let (ea, eb) = pair.elements;
                let shape_a = LagrangeLine::new(elements[ea].nodes.len());
                let shape_b = LagrangeLine::new(elements[eb].nodes.len());
                let (Some(shape_a), Some(shape_b)) = (shape_a, shape_b) else {
                    return Err(SolverError::config("contact element with unsupported order"));
                };
                let values_a = shape_a.eval(pair.xi.0);
                let values_b = shape_b.eval(pair.xi.1);
                let (count_a, count_b) = (values_a.n.len(), values_b.n.len());
                let mut weights = values_a.n.clone();
                weights.extend(values_b.n.iter().map(|n| -n));
                let nodes: Vec<usize> = elements[ea]
                    .nodes
                    .iter()
                    .chain(&elements[eb].nodes)
                    .copied()
                    .collect();

                let size = 3 * nodes.len();
                let mut dofs = Vec::with_capacity(size);
                let mut force = DVector::zeros(size);
                for (k, (&node, &s)) in nodes.iter().zip(&weights).enumerate() {
                    dofs.extend((0..3).map(|c| 6 * node + c));
                    let mut part = force.fixed_rows_mut::<3>(3 * k);
                    part += pair.normal * (pair.force * s);
                }

                let stiffness = want_tangent.then(|| {
                    let nn = pair.normal * pair.normal.transpose();
                    let kernel = nn * settings.penalty
                        + (Matrix3::identity() - nn) * (settings.penalty * pair.gap / pair.distance);
                    let mut k = DMatrix::zeros(size, size);
                    for (i, si) in weights.iter().enumerate() {
                        for (j, sj) in weights.iter().enumerate() {
                            k.fixed_view_mut::<3, 3>(3 * i, 3 * j)
                                .copy_from(&(kernel * (si * sj)));
                        }
                    }

                    if let Some(compliance) = pair.sliding_compliance() {
                        // ∂weights/∂ξ per coordinate
                        let slopes: [Vec<f64>; 2] = [
                            values_a
                                .dn
                                .iter()
                                .copied()
                                .chain(std::iter::repeat_n(0.0, count_b))
                                .collect(),
                            std::iter::repeat_n(0.0, count_a)
                                .chain(values_b.dn.iter().map(|d| -d))
                                .collect(),
                        ];
                        let offset = -pair.normal * pair.distance;
                        let coupling: Vec<DVector<f64>> = (0..2)
                            .map(|alpha| {
                                let mut w = DVector::zeros(size);
                                for (m, (s, c)) in weights.iter().zip(&slopes[alpha]).enumerate() {
                                    w.fixed_rows_mut::<3>(3 * m)
                                        .copy_from(&(pair.sliding[alpha] * *s + offset * *c));
                                }
                                w
                            })
                            .collect();
                        let scale = settings.penalty * pair.gap / pair.distance;
                        for alpha in 0..2 {
                            for beta in 0..2 {
                                let factor = compliance[alpha][beta];
                                if factor != 0.0 {
                                    k.ger(-scale * factor, &coupling[alpha], &coupling[beta], 1.0);
                                }
                            }
                        }
                    }
                    k
                });

                Ok(ContactContribution {
                    dofs,
                    force,
                    stiffness,
                })
            })
            .collect()
    }

}

/// Keeps one pair per physical contact of each rod pair.
fn deduplicate(
    mut active: Vec<ContactPair>,
    settings: &ContactSettings,
    previous: &BTreeSet<PairKey>,
) -> BTreeMap<PairKey, ContactPair> {
    active.sort_by(|a, b| {
        a.gap
            .total_cmp(&b.gap)
            .then_with(|| a.elements.cmp(&b.elements))
    });

    let diameter = settings.contact_distance();
    let band = settings.hysteresis * diameter;
    let mut clusters: Vec<Vec<ContactPair>> = Vec::new();
    for pair in active {
        let home = clusters.iter_mut().find(|c| {
            c[0].rods == pair.rods && (c[0].point - pair.point).norm() <= diameter
        });
        match home {
            Some(cluster) => cluster.push(pair),
            None => clusters.push(vec![pair]),
        }
    }

    clusters
        .into_iter()
        .filter_map(|cluster| {
            let best_gap = cluster[0].gap;
            let kept = cluster
                .iter()
                .position(|p| previous.contains(&p.elements) && p.gap <= best_gap + band)
                .unwrap_or(0);
            cluster.into_iter().nth(kept)
        })
        .map(|p| (p.elements, p))
        .collect()
}

/// Closest points of segments `[p0, p1]` and `[q0, q1]` as natural
/// coordinates on `[-1, 1]`.
pub fn segment_closest_points(
    p0: &Vector3<f64>,
    p1: &Vector3<f64>,
    q0: &Vector3<f64>,
    q1: &Vector3<f64>,
) -> (f64, f64) {
    let d1 = p1 - p0;
    let d2 = q1 - q0;
    let r = p0 - q0;
    let a = d1.dot(&d1);
    let e = d2.dot(&d2);
    let f = d2.dot(&r);
    let c = d1.dot(&r);
    let b = d1.dot(&d2);
    let denom = a * e - b * b;

    let mut s = if denom > 1e-14 * a * e {
        ((b * f - c * e) / denom).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let mut t = (b * s + f) / e;
    if t < 0.0 {
        t = 0.0;
        s = (-c / a).clamp(0.0, 1.0);
    } else if t > 1.0 {
        t = 1.0;
        s = ((b - c) / a).clamp(0.0, 1.0);
    }
    (2.0 * s - 1.0, 2.0 * t - 1.0)
}

/// Clamped Newton iteration for the closest points of two curved centre
/// lines, started from the chords through the end nodes.
fn project_centrelines(a: &Centreline, b: &Centreline) -> Option<(f64, f64)> {
    let (Some(a0), Some(a1), Some(b0), Some(b1)) =
        (a.points.first(), a.points.last(), b.points.first(), b.points.last())
    else {
        return None;
    };
    let (mut xi_a, mut xi_b) = segment_closest_points(a0, a1, b0, b1);

    for _ in 0..MAX_PROJECTION_ITERATIONS {
        let (xa, ta, ca) = a.eval(xi_a);
        let (xb, tb, cb) = b.eval(xi_b);
        let d = xa - xb;
        let grad = [d.dot(&ta), -d.dot(&tb)];
        let h = [
            [ta.dot(&ta) + d.dot(&ca), -ta.dot(&tb)],
            [-ta.dot(&tb), tb.dot(&tb) - d.dot(&cb)],
        ];

        // a coordinate stays on its bound while descent pushes outward
        let at_bound = |xi: f64, g: f64| (xi <= -1.0 && g > 0.0) || (xi >= 1.0 && g < 0.0);
        let fixed = [at_bound(xi_a, grad[0]), at_bound(xi_b, grad[1])];

        let step = match fixed {
            [true, true] => return Some((xi_a, xi_b)),
            [true, false] => [0.0, -grad[1] / positive(h[1][1])?],
            [false, true] => [-grad[0] / positive(h[0][0])?, 0.0],
            [false, false] => {
                let det = h[0][0] * h[1][1] - h[0][1] * h[1][0];
                if det.abs() <= 1e-14 * (h[0][0] * h[1][1]).abs().max(f64::MIN_POSITIVE) {
                    // parallel centre lines: keep xi_a, project onto b
                    [0.0, -grad[1] / positive(h[1][1])?]
                } else {
                    [
                        -(h[1][1] * grad[0] - h[0][1] * grad[1]) / det,
                        -(h[0][0] * grad[1] - h[1][0] * grad[0]) / det,
                    ]
                }
            }
        };

        let next_a = (xi_a + step[0]).clamp(-1.0, 1.0);
        let next_b = (xi_b + step[1]).clamp(-1.0, 1.0);
        let moved = (next_a - xi_a).abs().max((next_b - xi_b).abs());
        xi_a = next_a;
        xi_b = next_b;
        if moved < PROJECTION_TOLERANCE {
            return Some((xi_a, xi_b));
        }
    }
    None
}

fn positive(value: f64) -> Option<f64> {
    (value > 0.0).then_some(value)
}
