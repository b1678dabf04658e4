/// Geometrically exact Cosserat rod element (Simo-Reissner kinematics)
///
/// Each node has 6 degrees of freedom:
/// - 3 translations (ux, uy, uz)
/// - 3 infinitesimal spatial rotations (θx, θy, θz), applied as
///   `R <- exp(θ) R`
///
/// Rotations along the element follow the objective interpolation of
/// Crisfield and Jelenić: a reference triad `Λr` halfway between the two
/// central nodes, nodal local rotations `ψ_i = log(Λrᵀ Λ_i)` interpolated
/// with the Lagrange shapes and `Λ(s) = Λr exp(ψ(s))`.
///
/// Material strains:
/// - `Γ = Λᵀ φ' - Γ0` (shear and extension)
/// - `K = T(ψ) ψ' - K0` (bending and torsion)
///
/// with `Γ0`, `K0` taken from the reference configuration so that a rod
/// with arbitrary initial curvature starts stress free.
///
/// References:
/// - J.C. Simo, L. Vu-Quoc, "A three-dimensional finite-strain rod model.
///   Part II", CMAME 58 (1986)
/// - M.A. Crisfield, G. Jelenić, "Objectivity of strain measures in the
///   geometrically exact three-dimensional beam theory", Proc. R. Soc. A
///   455 (1999)
use nalgebra::{DMatrix, DVector, Matrix3, Matrix3xX, Vector3, Vector6};

use crate::elements::Element;
use crate::error::{Result, SolverError};
use crate::materials::{PlasticState, RodMaterial};
use crate::rotation::{
    exp_map, inverse_right_jacobian, log_map, right_jacobian, right_jacobian_derivative, skew,
};
use crate::shape::{LagrangeLine, gauss_rule};

/// Gauss rule used for the internal forces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationRule {
    /// `n - 1` points for `n` nodes; avoids shear locking
    Reduced,
    /// `n` points
    Full,
}

impl IntegrationRule {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "reduced" => Some(IntegrationRule::Reduced),
            "full" => Some(IntegrationRule::Full),
            _ => None,
        }
    }

    fn points(self, node_count: usize) -> usize {
        match self {
            IntegrationRule::Reduced => node_count - 1,
            IntegrationRule::Full => node_count,
        }
    }
}

#[derive(Debug, Clone)]
struct IntegrationPoint {
    n: Vec<f64>,
    /// Derivatives with respect to arc length
    dn: Vec<f64>,
    /// Gauss weight times Jacobian
    weight: f64,
}

/// Kinematic quantities at one integration point.
#[derive(Debug, Clone)]
pub struct PointKinematics {
    pub tangent: Vector3<f64>,
    pub triad: Matrix3<f64>,
    /// Interpolated local rotation and its arc-length derivative
    pub psi: Vector3<f64>,
    pub psi_prime: Vector3<f64>,
    /// Total (not yet reference-corrected) material strains
    pub strain: Vector6<f64>,
}

#[derive(Debug, Clone)]
pub struct ElementResponse {
    /// Internal force vector (6 per node)
    pub force: DVector<f64>,
    pub stiffness: Option<DMatrix<f64>>,
    /// Trial history per integration point
    pub states: Vec<PlasticState>,
    /// Material stress resultants per integration point
    pub stresses: Vec<Vector6<f64>>,
    pub stored_energy: f64,
    pub dissipation: f64,
}

#[derive(Debug, Clone)]
pub struct RodElement {
    pub id: usize,
    pub rod: usize,
    pub material: usize,
    /// Node indices in order along the element
    pub nodes: Vec<usize>,
    points: Vec<IntegrationPoint>,
    reference_strain: Vec<Vector6<f64>>,
    node_shares: Vec<f64>,
    length: f64,
}

impl RodElement {
    /// Builds the element on its reference configuration.
    pub fn new(
        id: usize,
        rod: usize,
        material: usize,
        nodes: Vec<usize>,
        positions: &[Vector3<f64>],
        triads: &[Matrix3<f64>],
        rule: IntegrationRule,
    ) -> Result<Self> {
        let count = nodes.len();
        let shape = LagrangeLine::new(count).ok_or_else(|| {
            SolverError::config(format!("element {id}: {count} nodes are not supported"))
        })?;
        if positions.len() != count || triads.len() != count {
            return Err(SolverError::config(format!(
                "element {id}: reference data does not match its {count} nodes"
            )));
        }

        let integrate = |points: usize| -> Result<Vec<IntegrationPoint>> {
            let gauss = gauss_rule(points).ok_or_else(|| {
                SolverError::config(format!("element {id}: no {points}-point Gauss rule"))
            })?;
            gauss
                .into_iter()
                .map(|(xi, w)| {
                    let values = shape.eval(xi);
                    let dx: Vector3<f64> = values
                        .dn
                        .iter()
                        .zip(positions)
                        .map(|(d, x)| x * *d)
                        .sum();
                    let jacobian = dx.norm();
                    if jacobian <= f64::EPSILON {
                        return Err(SolverError::config(format!(
                            "element {id} is degenerate"
                        )));
                    }
                    Ok(IntegrationPoint {
                        n: values.n,
                        dn: values.dn.iter().map(|d| d / jacobian).collect(),
                        weight: w * jacobian,
                    })
                })
                .collect()
        };

        let points = integrate(rule.points(count))?;
        let full = integrate(count)?;
        let length: f64 = full.iter().map(|p| p.weight).sum();
        let node_shares: Vec<f64> = (0..count)
            .map(|a| full.iter().map(|p| p.weight * p.n[a]).sum())
            .collect();

        let mut element = Self {
            id,
            rod,
            material,
            nodes,
            points,
            reference_strain: Vec::new(),
            node_shares,
            length,
        };
        element.reference_strain = element
            .kinematics(positions, triads)
            .into_iter()
            .map(|k| k.strain)
            .collect();
        Ok(element)
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    /// Reference arc length
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Positions and triads of the element nodes, sampled at the
    /// integration points.
    pub fn kinematics(&self, x: &[Vector3<f64>], triads: &[Matrix3<f64>]) -> Vec<PointKinematics> {
        self.sample(x, &TriadField::new(triads))
    }

    fn sample(&self, x: &[Vector3<f64>], field: &TriadField) -> Vec<PointKinematics> {
        self.points
            .iter()
            .map(|p| {
                let mut tangent = Vector3::zeros();
                let mut psi = Vector3::zeros();
                let mut psi_prime = Vector3::zeros();
                for (a, psi_a) in field.psi.iter().enumerate() {
                    tangent += x[a] * p.dn[a];
                    psi += psi_a * p.n[a];
                    psi_prime += psi_a * p.dn[a];
                }
                let triad = field.reference * exp_map(&psi);
                let gamma = triad.transpose() * tangent;
                let kappa = right_jacobian(&psi) * psi_prime;
                PointKinematics {
                    tangent,
                    triad,
                    psi,
                    psi_prime,
                    strain: Vector6::new(gamma.x, gamma.y, gamma.z, kappa.x, kappa.y, kappa.z),
                }
            })
            .collect()
    }

    /// Internal forces, tangent stiffness and trial history at the current
    /// nodal positions `x` and triads.
    ///
    /// The tangent is the exact derivative of the internal forces with
    /// respect to nodal translations and spatial spins `R <- exp(θ) R`,
    /// including the variation of the interpolated local rotations.
    pub fn evaluate(
        &self,
        x: &[Vector3<f64>],
        triads: &[Matrix3<f64>],
        material: &RodMaterial,
        committed: &[PlasticState],
        with_tangent: bool,
    ) -> Result<ElementResponse> {
        let count = self.nodes.len();
        let ndof = 6 * count;
        let mut force = DVector::zeros(ndof);
        let mut stiffness = with_tangent.then(|| DMatrix::zeros(ndof, ndof));
        let mut states = Vec::with_capacity(self.points.len());
        let mut stresses = Vec::with_capacity(self.points.len());
        let mut stored_energy = 0.0;
        let mut dissipation = 0.0;

        let field = TriadField::new(triads);
        let variations = with_tangent.then(|| field.variations(triads));
        let kinematics = self.sample(x, &field);
        for (g, (p, kin)) in self.points.iter().zip(&kinematics).enumerate() {
            let strain = kin.strain - self.reference_strain[g];
            let history = committed.get(g).copied().unwrap_or_default();
            let response = material.update(&strain, &history)?;

            let n_spatial: Vector3<f64> = kin.triad * response.stress.fixed_rows::<3>(0);
            let m_spatial: Vector3<f64> = kin.triad * response.stress.fixed_rows::<3>(3);
            let w = p.weight;

            for a in 0..count {
                let f_n = n_spatial * (w * p.dn[a]);
                let f_m = (m_spatial * p.dn[a] + n_spatial.cross(&kin.tangent) * p.n[a]) * w;
                let mut translation = force.fixed_rows_mut::<3>(6 * a);
                translation += f_n;
                let mut rotation = force.fixed_rows_mut::<3>(6 * a + 3);
                rotation += f_m;
            }

            if let (Some(k), Some((reference_spin, psi_variations))) =
                (stiffness.as_mut(), variations.as_ref())
            {
                // first variations at the point as maps on the element dofs
                let mut d_psi = Matrix3xX::zeros(ndof);
                let mut d_psi_prime = Matrix3xX::zeros(ndof);
                let mut d_tangent = Matrix3xX::zeros(ndof);
                for a in 0..count {
                    d_psi += &psi_variations[a] * p.n[a];
                    d_psi_prime += &psi_variations[a] * p.dn[a];
                    d_tangent
                        .fixed_view_mut::<3, 3>(0, 6 * a)
                        .copy_from(&(Matrix3::identity() * p.dn[a]));
                }
                let t_psi = right_jacobian(&kin.psi);
                let spin = reference_spin + (kin.triad * t_psi) * &d_psi;
                let d_gamma = kin.triad.transpose() * (&d_tangent + skew(&kin.tangent) * &spin);
                let d_kappa = t_psi * &d_psi_prime
                    + right_jacobian_derivative(&kin.psi, &kin.psi_prime) * &d_psi;

                let c = &response.tangent;
                let c_nn = c.fixed_view::<3, 3>(0, 0).into_owned();
                let c_nm = c.fixed_view::<3, 3>(0, 3).into_owned();
                let c_mn = c.fixed_view::<3, 3>(3, 0).into_owned();
                let c_mm = c.fixed_view::<3, 3>(3, 3).into_owned();
                let d_n = -skew(&n_spatial) * &spin + kin.triad * (c_nn * &d_gamma + c_nm * &d_kappa);
                let d_m = -skew(&m_spatial) * &spin + kin.triad * (c_mn * &d_gamma + c_mm * &d_kappa);

                let tangent_skew = skew(&kin.tangent);
                let n_skew = skew(&n_spatial);
                for a in 0..count {
                    let mut rows = k.fixed_rows_mut::<3>(6 * a);
                    rows += &d_n * (w * p.dn[a]);
                    let moment = (&d_m * p.dn[a]
                        + (-tangent_skew * &d_n + n_skew * &d_tangent) * p.n[a])
                        * w;
                    let mut rows = k.fixed_rows_mut::<3>(6 * a + 3);
                    rows += moment;
                }
            }

            stored_energy += w * response.stored_energy;
            dissipation += w * response.dissipation;
            stresses.push(response.stress);
            states.push(response.state);
        }

        Ok(ElementResponse {
            force,
            stiffness,
            states,
            stresses,
            stored_energy,
            dissipation,
        })
    }

    /// Lumped translational masses and material-frame rotational inertias
    /// per node.
    pub fn lumped_mass(&self, material: &RodMaterial) -> Vec<(f64, Vector3<f64>)> {
        let segment = self.length / (self.nodes.len() - 1) as f64;
        self.node_shares
            .iter()
            .map(|&share| material.lumped_inertia(share, segment))
            .collect()
    }
}

impl Element for RodElement {
    fn nodes(&self) -> &[usize] {
        &self.nodes
    }
}

/// Interpolated rotation field of one element configuration.
struct TriadField {
    /// Central nodes; `Λr` lies halfway between their triads
    central: (usize, usize),
    /// Half the relative rotation from the first central triad to the second
    half: Vector3<f64>,
    reference: Matrix3<f64>,
    /// Nodal local rotations `ψ_a = log(Λrᵀ Λ_a)`
    psi: Vec<Vector3<f64>>,
}

impl TriadField {
    fn new(triads: &[Matrix3<f64>]) -> Self {
        let count = triads.len();
        let (i, j) = ((count - 1) / 2, count / 2);
        let half = log_map(&(triads[i].transpose() * triads[j])) * 0.5;
        let reference = triads[i] * exp_map(&half);
        let psi = triads
            .iter()
            .map(|t| log_map(&(reference.transpose() * t)))
            .collect();
        Self {
            central: (i, j),
            half,
            reference,
            psi,
        }
    }

    /// Spatial spin of `Λr` and the variations `δψ_a`, each as a `3 x 6n`
    /// map on the element dofs.
    fn variations(&self, triads: &[Matrix3<f64>]) -> (Matrix3xX<f64>, Vec<Matrix3xX<f64>>) {
        let ndof = 6 * triads.len();
        let (i, j) = self.central;
        let mut reference_spin = Matrix3xX::zeros(ndof);
        if i == j {
            reference_spin
                .fixed_view_mut::<3, 3>(0, 6 * i + 3)
                .copy_from(&Matrix3::identity());
        } else {
            // δθr = δθi + Λr T(h) δh with T(2h) 2δh = Λjᵀ (δθj - δθi)
            let share = self.reference
                * right_jacobian(&self.half)
                * inverse_right_jacobian(&(self.half * 2.0))
                * triads[j].transpose()
                * 0.5;
            reference_spin
                .fixed_view_mut::<3, 3>(0, 6 * i + 3)
                .copy_from(&(Matrix3::identity() - share));
            reference_spin
                .fixed_view_mut::<3, 3>(0, 6 * j + 3)
                .copy_from(&share);
        }

        let psi = self
            .psi
            .iter()
            .zip(triads)
            .enumerate()
            .map(|(a, (psi, triad))| {
                // T(ψa) δψa = Λaᵀ (δθa - δθr)
                let map = inverse_right_jacobian(psi) * triad.transpose();
                let mut variation = -(map * &reference_spin);
                {
                    let mut own = variation.fixed_view_mut::<3, 3>(0, 6 * a + 3);
                    own += map;
                }
                variation
            })
            .collect();
        (reference_spin, psi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materials::{HardeningKind, SectionProperties};
    use crate::rotation::align_z;
    use approx::assert_relative_eq;

    fn make_material() -> RodMaterial {
        RodMaterial::elastic(
            "unit",
            1000.0,
            400.0,
            1.0,
            SectionProperties {
                area: 1.0,
                area_moment: [0.5, 0.7],
                polar_moment: 1.2,
                shear_factor: 1.0,
            },
        )
        .expect("valid material")
    }

    /// Straight element along `x` with `count` nodes on `[0, length]`.
    fn make_straight(count: usize, length: f64) -> (RodElement, Vec<Vector3<f64>>, Vec<Matrix3<f64>>) {
        let positions: Vec<Vector3<f64>> = (0..count)
            .map(|i| Vector3::new(length * i as f64 / (count - 1) as f64, 0.0, 0.0))
            .collect();
        let triads = vec![align_z(&Vector3::x()); count];
        let element = RodElement::new(
            1,
            0,
            0,
            (0..count).collect(),
            &positions,
            &triads,
            IntegrationRule::Reduced,
        )
        .expect("valid element");
        (element, positions, triads)
    }

    /// A perturbed configuration away from the reference state.
    fn perturb(
        positions: &[Vector3<f64>],
        triads: &[Matrix3<f64>],
    ) -> (Vec<Vector3<f64>>, Vec<Matrix3<f64>>) {
        let x = positions
            .iter()
            .enumerate()
            .map(|(i, p)| p + Vector3::new(0.02 * i as f64, 0.1 * (i as f64).powi(2), -0.05 * i as f64))
            .collect();
        let r = triads
            .iter()
            .enumerate()
            .map(|(i, t)| exp_map(&Vector3::new(0.3 * i as f64, -0.2 * i as f64, 0.15)) * t)
            .collect();
        (x, r)
    }

    #[test]
    fn reference_configuration_is_stress_free() {
        for count in 2..=4 {
            let (element, x, r) = make_straight(count, 2.0);
            assert_relative_eq!(element.length(), 2.0, epsilon = 1e-14);
            let response = element
                .evaluate(&x, &r, &make_material(), &[], true)
                .expect("evaluate");
            assert!(response.force.norm() < 1e-12);
            assert!(response.stored_energy.abs() < 1e-20);
        }
    }

    #[test]
    fn rigid_body_motion_is_stress_free() {
        let (element, x, r) = make_straight(3, 1.5);
        let rotation = exp_map(&Vector3::new(0.7, -1.9, 0.4));
        let shift = Vector3::new(1.0, -2.0, 0.5);
        let moved_x: Vec<_> = x.iter().map(|p| rotation * p + shift).collect();
        let moved_r: Vec<_> = r.iter().map(|t| rotation * t).collect();
        let response = element
            .evaluate(&moved_x, &moved_r, &make_material(), &[], false)
            .expect("evaluate");
        assert!(response.force.norm() < 1e-10);
    }

    #[test]
    fn axial_stretch_gives_axial_force() {
        let (element, x, r) = make_straight(2, 1.0);
        let stretched = vec![x[0], x[1] * 1.01];
        let response = element
            .evaluate(&stretched, &r, &make_material(), &[], false)
            .expect("evaluate");
        assert_relative_eq!(response.stresses[0][2], 10.0, epsilon = 1e-10);
        assert_relative_eq!(response.force[6], 10.0, epsilon = 1e-10);
        assert_relative_eq!(response.force[0], -10.0, epsilon = 1e-10);
    }

    #[test]
    fn internal_forces_are_self_equilibrated() {
        let (element, x0, r0) = make_straight(3, 1.0);
        let (x, r) = perturb(&x0, &r0);
        let response = element
            .evaluate(&x, &r, &make_material(), &[], false)
            .expect("evaluate");
        let mut total_force = Vector3::zeros();
        let mut total_moment = Vector3::zeros();
        for a in 0..3 {
            let f: Vector3<f64> = response.force.fixed_rows::<3>(6 * a).into();
            let m: Vector3<f64> = response.force.fixed_rows::<3>(6 * a + 3).into();
            total_force += f;
            total_moment += m + x[a].cross(&f);
        }
        assert!(total_force.norm() < 1e-10 * response.force.norm());
        assert!(total_moment.norm() < 1e-8 * response.force.norm());
    }

    /// Central-difference derivative of the internal forces with respect
    /// to nodal translations and spatial spins.
    fn numeric_tangent(
        element: &RodElement,
        material: &RodMaterial,
        x: &[Vector3<f64>],
        r: &[Matrix3<f64>],
    ) -> DMatrix<f64> {
        let ndof = 6 * x.len();
        let h = 1e-6;
        let mut numeric = DMatrix::zeros(ndof, ndof);
        for j in 0..ndof {
            let apply = |sign: f64| {
                let mut xp = x.to_vec();
                let mut rp = r.to_vec();
                let node = j / 6;
                let comp = j % 6;
                if comp < 3 {
                    xp[node][comp] += sign * h;
                } else {
                    let mut spin = Vector3::zeros();
                    spin[comp - 3] = sign * h;
                    rp[node] = exp_map(&spin) * rp[node];
                }
                element
                    .evaluate(&xp, &rp, material, &[], false)
                    .expect("evaluate")
                    .force
            };
            let column = (apply(1.0) - apply(-1.0)) / (2.0 * h);
            numeric.set_column(j, &column);
        }
        numeric
    }

    #[test]
    fn tangent_matches_finite_differences() {
        let material = make_material();
        for count in 2..=4 {
            let (element, x0, r0) = make_straight(count, 1.0);
            // distinct nodal triads and a curved centreline
            let (x, r) = perturb(&x0, &r0);
            let response = element.evaluate(&x, &r, &material, &[], true).expect("evaluate");
            let k = response.stiffness.expect("tangent");
            let numeric = numeric_tangent(&element, &material, &x, &r);
            let scale = k.amax();
            assert!(
                (&k - &numeric).amax() < 1e-6 * scale,
                "{count} nodes: error {:e} of {scale:e}",
                (&k - &numeric).amax()
            );
        }
    }

    #[test]
    fn tangent_is_consistent_for_large_relative_rotations() {
        let material = make_material();
        let (element, x0, r0) = make_straight(3, 1.0);
        let x: Vec<_> = x0
            .iter()
            .map(|p| p + Vector3::new(0.0, 0.3 * p.x * p.x, 0.1 * p.x))
            .collect();
        let r: Vec<_> = r0
            .iter()
            .enumerate()
            .map(|(i, t)| exp_map(&Vector3::new(0.9 * i as f64, 0.4, -0.6 * i as f64)) * t)
            .collect();
        let k = element
            .evaluate(&x, &r, &material, &[], true)
            .expect("evaluate")
            .stiffness
            .expect("tangent");
        let numeric = numeric_tangent(&element, &material, &x, &r);
        assert!((&k - &numeric).amax() < 1e-6 * k.amax());
    }

    #[test]
    fn plastic_history_is_returned_per_point() {
        let material = make_material()
            .with_plasticity(HardeningKind::IdealPlastic, &[0.0, 0.0, 5.0, 0.0, 0.0, 0.0], 0.0, 0.0)
            .expect("plastic material");
        let (element, x, r) = make_straight(3, 1.0);
        let stretched: Vec<_> = x.iter().map(|p| p * 1.05).collect();
        let response = element
            .evaluate(&stretched, &r, &material, &[], true)
            .expect("evaluate");
        assert_eq!(response.states.len(), element.num_points());
        for (state, stress) in response.states.iter().zip(&response.stresses) {
            assert!(state.multiplier > 0.0);
            assert_relative_eq!(stress[2], 5.0, epsilon = 1e-9);
        }
        assert!(response.dissipation > 0.0);
    }

    #[test]
    fn lumped_mass_sums_to_element_mass() {
        let material = make_material();
        for count in 2..=4 {
            let (element, _, _) = make_straight(count, 3.0);
            let masses = element.lumped_mass(&material);
            let total: f64 = masses.iter().map(|(m, _)| m).sum();
            assert_relative_eq!(total, 3.0, epsilon = 1e-12);
            assert!(masses.iter().all(|(m, j)| *m > 0.0 && j.iter().all(|v| *v > 0.0)));
        }
    }
}
