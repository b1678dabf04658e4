//! Cross-section constitutive models for Cosserat rods.
//!
//! Generalized strains and stresses are ordered
//! `[Gamma_1, Gamma_2, Gamma_3, K_1, K_2, K_3]`: two shears, axial
//! extension, two bending curvatures and twist, all in the material frame.
//!
//! The elastic response is `S = C E` with
//! `C = diag(G k A, G k A, E A, E I1, E I2, G J)`.
//!
//! The elastoplastic model bounds the generalized stresses by the scaled
//! yield surface
//!
//! ```text
//! f(S, alpha, xi) = | D (S - alpha) | - (1 + H_iso xi) <= 0,   D = diag(1 / Y_k)
//! ```
//!
//! with associative flow `Ep' = xi' n`, `n = df/dS`, linear kinematic
//! hardening `alpha = H_kin Ep` and linear isotropic hardening. Components
//! without a yield limit never flow.

use nalgebra::{Matrix6, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SolverError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectionProperties {
    pub area: f64,
    /// Second moments about the local `e1` and `e2` axes.
    pub area_moment: [f64; 2],
    pub polar_moment: f64,
    pub shear_factor: f64,
}

impl SectionProperties {
    pub fn circle(radius: f64) -> Self {
        let i = std::f64::consts::PI * radius.powi(4) / 4.0;
        Self {
            area: std::f64::consts::PI * radius * radius,
            area_moment: [i, i],
            polar_moment: 2.0 * i,
            shear_factor: 0.9,
        }
    }

    /// `width` along `e1`, `height` along `e2`.
    pub fn rectangle(width: f64, height: f64) -> Self {
        let i1 = width * height.powi(3) / 12.0;
        let i2 = height * width.powi(3) / 12.0;
        Self {
            area: width * height,
            area_moment: [i1, i2],
            polar_moment: i1 + i2,
            shear_factor: 5.0 / 6.0,
        }
    }

    pub fn square(side: f64) -> Self {
        Self::rectangle(side, side)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardeningKind {
    Elastic,
    IdealPlastic,
    IsotropicHardening,
    KinematicHardening,
}

impl HardeningKind {
    pub fn parse(name: &str) -> Option<Self> {
        let key: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "elastic" | "none" => Some(HardeningKind::Elastic),
            "idealplastic" | "ideal" | "perfect" | "perfectlyplastic" => {
                Some(HardeningKind::IdealPlastic)
            }
            "isotropic" | "isotropichardening" => Some(HardeningKind::IsotropicHardening),
            "kinematic" | "kinematichardening" => Some(HardeningKind::KinematicHardening),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Plasticity {
    kind: HardeningKind,
    /// `1 / Y_k`, zero for unlimited components.
    yield_scale: Vector6<f64>,
    isotropic_modulus: f64,
    kinematic_modulus: Vector6<f64>,
}

/// History variables of one integration point.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlasticState {
    pub plastic_strain: Vector6<f64>,
    pub back_stress: Vector6<f64>,
    /// Accumulated plastic multiplier; equals the dissipated energy density.
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterialResponse {
    pub stress: Vector6<f64>,
    pub tangent: Matrix6<f64>,
    pub state: PlasticState,
    pub stored_energy: f64,
    pub dissipation: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RodMaterial {
    pub name: String,
    pub young: f64,
    pub shear_modulus: f64,
    pub density: f64,
    pub section: SectionProperties,
    /// Scales the rotational inertia.
    pub inertia_correction: f64,
    stiffness: Vector6<f64>,
    plasticity: Option<Plasticity>,
}

impl RodMaterial {
    pub fn elastic(
        name: impl Into<String>,
        young: f64,
        shear_modulus: f64,
        density: f64,
        section: SectionProperties,
    ) -> Result<Self> {
        let name = name.into();
        if !(young > 0.0) || !(shear_modulus > 0.0) {
            return Err(SolverError::config(format!(
                "material '{name}': young and shear_modulus must be positive"
            )));
        }
        if !(section.area > 0.0)
            || !(section.area_moment[0] > 0.0)
            || !(section.area_moment[1] > 0.0)
            || !(section.polar_moment > 0.0)
            || !(section.shear_factor > 0.0)
        {
            return Err(SolverError::config(format!(
                "material '{name}': section properties must be positive"
            )));
        }
        if density < 0.0 {
            return Err(SolverError::config(format!(
                "material '{name}': density must not be negative"
            )));
        }
        let ga = shear_modulus * section.shear_factor * section.area;
        let stiffness = Vector6::new(
            ga,
            ga,
            young * section.area,
            young * section.area_moment[0],
            young * section.area_moment[1],
            shear_modulus * section.polar_moment,
        );
        Ok(Self {
            name,
            young,
            shear_modulus,
            density,
            section,
            inertia_correction: 1.0,
            stiffness,
            plasticity: None,
        })
    }

    /// Adds a yield surface. `yield_limits` entries that are zero, negative
    /// or infinite leave the component unbounded.
    pub fn with_plasticity(
        mut self,
        kind: HardeningKind,
        yield_limits: &[f64; 6],
        isotropic_modulus: f64,
        kinematic_modulus: f64,
    ) -> Result<Self> {
        if kind == HardeningKind::Elastic {
            self.plasticity = None;
            return Ok(self);
        }
        let yield_scale = Vector6::from_fn(|k, _| {
            let y = yield_limits[k];
            if y > 0.0 && y.is_finite() { 1.0 / y } else { 0.0 }
        });
        if yield_scale.iter().all(|d| *d == 0.0) {
            return Err(SolverError::config(format!(
                "material '{}': plasticity needs at least one positive yield limit",
                self.name
            )));
        }
        let (iso, kin) = match kind {
            HardeningKind::IsotropicHardening => (isotropic_modulus, 0.0),
            HardeningKind::KinematicHardening => (0.0, kinematic_modulus),
            _ => (0.0, 0.0),
        };
        if iso < 0.0 || kin < 0.0 {
            return Err(SolverError::config(format!(
                "material '{}': hardening moduli must not be negative",
                self.name
            )));
        }
        self.plasticity = Some(Plasticity {
            kind,
            yield_scale,
            isotropic_modulus: iso,
            kinematic_modulus: self.stiffness * kin,
        });
        Ok(self)
    }

    pub fn stiffness(&self) -> &Vector6<f64> {
        &self.stiffness
    }

    pub fn hardening(&self) -> HardeningKind {
        self.plasticity
            .as_ref()
            .map_or(HardeningKind::Elastic, |p| p.kind)
    }

    pub fn is_plastic(&self) -> bool {
        self.plasticity.is_some()
    }

    /// Lumped mass for a node that carries `share` of the rod length, with
    /// `segment` the spacing of nodes along the element. Returns the
    /// translational mass and the principal rotational inertias in the
    /// material frame.
    pub fn lumped_inertia(&self, share: f64, segment: f64) -> (f64, Vector3<f64>) {
        let rho_a = self.density * self.section.area;
        let rotary = rho_a * share * segment * segment / 12.0;
        let j = Vector3::new(
            self.density * self.section.area_moment[0] * share + rotary,
            self.density * self.section.area_moment[1] * share + rotary,
            self.density * self.section.polar_moment * share,
        );
        (rho_a * share, j * self.inertia_correction)
    }

    /// Stress update for the total strain `strain` starting from the last
    /// converged history `committed`. Never modifies `committed`.
    pub fn update(&self, strain: &Vector6<f64>, committed: &PlasticState) -> Result<MaterialResponse> {
        match &self.plasticity {
            None => Ok(self.elastic_response(strain, committed)),
            Some(plasticity) => self.return_map(plasticity, strain, committed),
        }
    }

    fn elastic_response(&self, strain: &Vector6<f64>, committed: &PlasticState) -> MaterialResponse {
        let elastic_strain = strain - committed.plastic_strain;
        let stress = self.stiffness.component_mul(&elastic_strain);
        let stored = 0.5 * elastic_strain.dot(&stress) + self.hardening_energy(committed);
        MaterialResponse {
            stress,
            tangent: Matrix6::from_diagonal(&self.stiffness),
            state: *committed,
            stored_energy: stored,
            dissipation: committed.multiplier,
        }
    }

    fn hardening_energy(&self, state: &PlasticState) -> f64 {
        match &self.plasticity {
            None => 0.0,
            Some(p) => {
                0.5 * p.isotropic_modulus * state.multiplier * state.multiplier
                    + 0.5 * state
                        .plastic_strain
                        .dot(&p.kinematic_modulus.component_mul(&state.plastic_strain))
            }
        }
    }

    fn return_map(
        &self,
        p: &Plasticity,
        strain: &Vector6<f64>,
        committed: &PlasticState,
    ) -> Result<MaterialResponse> {
        let c = &self.stiffness;
        let d2 = p.yield_scale.component_mul(&p.yield_scale);
        let a = c + p.kinematic_modulus;

        let trial_stress = c.component_mul(&(strain - committed.plastic_strain));
        let eta_trial = trial_stress - committed.back_stress;
        let radius_n = 1.0 + p.isotropic_modulus * committed.multiplier;
        let rho_trial = p.yield_scale.component_mul(&eta_trial).norm();

        if rho_trial - radius_n <= 1e-12 * radius_n {
            return Ok(self.elastic_response(strain, committed));
        }

        let eta_at = |dxi: f64| -> (Vector6<f64>, f64) {
            let r = radius_n + p.isotropic_modulus * dxi;
            let eta = Vector6::from_fn(|k, _| eta_trial[k] / (1.0 + dxi * a[k] * d2[k] / r));
            (eta, r)
        };
        let residual = |dxi: f64| -> f64 {
            let (eta, r) = eta_at(dxi);
            p.yield_scale.component_mul(&eta).norm() - r
        };

        let dxi = solve_consistency(residual, rho_trial - radius_n, &a.component_mul(&d2))
            .ok_or_else(|| {
                SolverError::ConvergenceFailure(format!(
                    "plastic return mapping of material '{}' failed",
                    self.name
                ))
            })?;

        let (eta, r) = eta_at(dxi);
        let normal = d2.component_mul(&eta) / r;
        let state = PlasticState {
            plastic_strain: committed.plastic_strain + normal * dxi,
            back_stress: committed.back_stress + p.kinematic_modulus.component_mul(&normal) * dxi,
            multiplier: committed.multiplier + dxi,
        };
        let elastic_strain = strain - state.plastic_strain;
        let stress = c.component_mul(&elastic_strain);

        let c_mat = Matrix6::from_diagonal(c);
        let a_mat = Matrix6::from_diagonal(&a);
        let n_mat = (Matrix6::from_diagonal(&d2) - normal * normal.transpose()) / r;
        let tangent = match (Matrix6::identity() + a_mat * n_mat * dxi).try_inverse() {
            Some(p_mat) => {
                let pc = p_mat * c_mat;
                let pan = p_mat * a_mat * normal;
                let denom = normal.dot(&pan) + p.isotropic_modulus;
                if denom.abs() > f64::EPSILON {
                    let g = pc.transpose() * normal / denom;
                    let deta = pc - pan * g.transpose();
                    c_mat - c_mat * (normal * g.transpose() + n_mat * deta * dxi)
                } else {
                    c_mat
                }
            }
            None => c_mat,
        };

        Ok(MaterialResponse {
            stress,
            tangent,
            state,
            stored_energy: 0.5 * elastic_strain.dot(&stress) + self.hardening_energy(&state),
            dissipation: state.multiplier,
        })
    }
}

/// Solves the scalar consistency condition `g(dxi) = 0` for the plastic
/// multiplier increment, `g(0) = excess > 0`, by bracketing and the
/// Illinois variant of regula falsi.
fn solve_consistency(
    g: impl Fn(f64) -> f64,
    excess: f64,
    rates: &Vector6<f64>,
) -> Option<f64> {
    let max_rate = rates.iter().copied().fold(0.0, f64::max);
    if max_rate <= 0.0 {
        return None;
    }

    let (mut lo, mut g_lo) = (0.0, excess);
    let mut hi = excess / max_rate;
    let mut g_hi = g(hi);
    let mut doublings = 0;
    while g_hi > 0.0 {
        lo = hi;
        g_lo = g_hi;
        hi *= 2.0;
        g_hi = g(hi);
        doublings += 1;
        if doublings > 200 || !g_hi.is_finite() {
            return None;
        }
    }
    if g_hi == 0.0 {
        return Some(hi);
    }

    let mut side = 0i8;
    for _ in 0..300 {
        let mut mid = (lo * g_hi - hi * g_lo) / (g_hi - g_lo);
        if !(mid > lo && mid < hi) {
            mid = 0.5 * (lo + hi);
        }
        let g_mid = g(mid);
        if g_mid.abs() <= 1e-15 || hi - lo <= 1e-15 * hi {
            return Some(mid);
        }
        if g_mid > 0.0 {
            lo = mid;
            g_lo = g_mid;
            if side == 1 {
                g_hi *= 0.5;
            }
            side = 1;
        } else {
            hi = mid;
            g_hi = g_mid;
            if side == -1 {
                g_lo *= 0.5;
            }
            side = -1;
        }
    }
    Some(0.5 * (lo + hi))
}
