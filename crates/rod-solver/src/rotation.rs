//! Finite rotation utilities on SO(3).
//!
//! Rotations are stored as orthonormal 3x3 matrices. Increments are applied
//! multiplicatively through the exponential map; the logarithm returns the
//! principal rotation vector (angle in `[0, pi]`).

use std::f64::consts::PI;

use nalgebra::{Matrix3, Vector3};

/// Skew-symmetric matrix with `skew(a) * b == a x b`.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Axial vector of the skew part of `m`.
pub fn unskew(m: &Matrix3<f64>) -> Vector3<f64> {
    Vector3::new(
        0.5 * (m[(2, 1)] - m[(1, 2)]),
        0.5 * (m[(0, 2)] - m[(2, 0)]),
        0.5 * (m[(1, 0)] - m[(0, 1)]),
    )
}

/// Rodrigues formula `exp([psi]x)`.
pub fn exp_map(psi: &Vector3<f64>) -> Matrix3<f64> {
    let theta2 = psi.norm_squared();
    let (a, b) = if theta2 < 1e-8 {
        (
            1.0 - theta2 / 6.0 + theta2 * theta2 / 120.0,
            0.5 - theta2 / 24.0 + theta2 * theta2 / 720.0,
        )
    } else {
        let theta = theta2.sqrt();
        (theta.sin() / theta, (1.0 - theta.cos()) / theta2)
    };
    let k = skew(psi);
    Matrix3::identity() + k * a + k * k * b
}

/// Principal logarithm of a rotation matrix.
pub fn log_map(r: &Matrix3<f64>) -> Vector3<f64> {
    let cos = ((r.trace() - 1.0) * 0.5).clamp(-1.0, 1.0);
    let w = unskew(r);
    let sin = w.norm();
    let theta = sin.atan2(cos);

    if theta < 1e-6 {
        return w * (1.0 + theta * theta / 6.0);
    }
    if cos > -0.9 {
        return w * (theta / sin);
    }

    // Near pi the skew part vanishes; take the axis from the symmetric part.
    let sym = (r + r.transpose()) * 0.5 - Matrix3::identity() * cos;
    let k = (0..3)
        .max_by(|&i, &j| sym[(i, i)].total_cmp(&sym[(j, j)]))
        .unwrap_or(0);
    let scale = (sym[(k, k)] * (1.0 - cos)).max(f64::MIN_POSITIVE).sqrt();
    let mut axis: Vector3<f64> = sym.column(k) / scale;
    axis.normalize_mut();
    if axis.dot(&w) < 0.0 {
        axis = -axis;
    }
    axis * theta
}

/// Right Jacobian of the exponential map:
/// `d/ds exp(psi(s)) = exp(psi) [T(psi) psi']x`.
pub fn right_jacobian(psi: &Vector3<f64>) -> Matrix3<f64> {
    let theta2 = psi.norm_squared();
    let (b, c) = jacobian_coefficients(theta2);
    let k = skew(psi);
    Matrix3::identity() - k * b + k * k * c
}

/// `(1 - cos θ) / θ²` and `(θ - sin θ) / θ³`
fn jacobian_coefficients(theta2: f64) -> (f64, f64) {
    if theta2 < 1e-8 {
        (
            0.5 - theta2 / 24.0 + theta2 * theta2 / 720.0,
            1.0 / 6.0 - theta2 / 120.0 + theta2 * theta2 / 5040.0,
        )
    } else {
        let theta = theta2.sqrt();
        (
            (1.0 - theta.cos()) / theta2,
            (theta - theta.sin()) / (theta2 * theta),
        )
    }
}

/// Inverse of [`right_jacobian`], regular for angles below `2 pi`.
pub fn inverse_right_jacobian(psi: &Vector3<f64>) -> Matrix3<f64> {
    let theta2 = psi.norm_squared();
    let d = if theta2 < 1e-3 {
        1.0 / 12.0 + theta2 / 720.0 + theta2 * theta2 / 30240.0
    } else {
        let half = 0.5 * theta2.sqrt();
        (1.0 - half / half.tan()) / theta2
    };
    let k = skew(psi);
    Matrix3::identity() + k * 0.5 + k * k * d
}

/// Derivative of `T(psi) v` with respect to `psi`, `T` the right Jacobian.
pub fn right_jacobian_derivative(psi: &Vector3<f64>, v: &Vector3<f64>) -> Matrix3<f64> {
    let theta2 = psi.norm_squared();
    let (b, c) = jacobian_coefficients(theta2);
    // (db/dθ)/θ and (dc/dθ)/θ
    let (db, dc) = if theta2 < 1e-3 {
        (
            -1.0 / 12.0 + theta2 / 180.0 - theta2 * theta2 / 6720.0,
            -1.0 / 60.0 + theta2 / 1260.0 - theta2 * theta2 / 60480.0,
        )
    } else {
        let theta = theta2.sqrt();
        let (sin, cos) = theta.sin_cos();
        (
            (theta * sin - 2.0 * (1.0 - cos)) / (theta2 * theta2),
            (theta * (1.0 - cos) - 3.0 * (theta - sin)) / (theta2 * theta2 * theta),
        )
    };
    let pv = psi.cross(v);
    let ppv = psi.cross(&pv);
    let double = Matrix3::identity() * psi.dot(v) + psi * v.transpose() - v * psi.transpose() * 2.0;
    -(pv * psi.transpose()) * db + skew(v) * b + ppv * psi.transpose() * dc + double * c
}

/// Rotation taking the local `e3` axis onto the unit vector `t` along the
/// shortest arc.
pub fn align_z(t: &Vector3<f64>) -> Matrix3<f64> {
    let e3 = Vector3::z();
    let c = e3.dot(t);
    if c < -1.0 + 1e-12 {
        return Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, -1.0));
    }
    let v = e3.cross(t);
    let k = skew(&v);
    Matrix3::identity() + k + k * k / (1.0 + c)
}

/// Projects a nearly orthogonal matrix back onto SO(3).
pub fn orthonormalize(r: &Matrix3<f64>) -> Matrix3<f64> {
    exp_map(&log_map(r))
}

/// Rotation vector of `r` on the branch closest to `previous`.
///
/// The principal logarithm jumps when the angle passes `pi`; output series
/// instead follow the rotation continuously through multiple turns.
pub fn unwrap_rotation_vector(previous: &Vector3<f64>, r: &Matrix3<f64>) -> Vector3<f64> {
    let principal = log_map(r);
    let theta = principal.norm();

    let axis = if theta > 1e-12 {
        principal / theta
    } else {
        let prev_norm = previous.norm();
        if prev_norm < 1e-12 {
            return principal;
        }
        let axis = previous / prev_norm;
        let turns = (prev_norm / (2.0 * PI)).round();
        return axis * (2.0 * PI * turns) + principal;
    };

    let mut best = principal;
    let mut best_dist = (principal - previous).norm();
    for sign in [1.0, -1.0] {
        let dir = axis * sign;
        let angle = theta * sign;
        let along = previous.dot(&dir);
        let k0 = ((along - angle) / (2.0 * PI)).round();
        for k in [k0 - 1.0, k0, k0 + 1.0] {
            let candidate = dir * (angle + 2.0 * PI * k);
            let dist = (candidate - previous).norm();
            if dist < best_dist {
                best = candidate;
                best_dist = dist;
            }
        }
    }
    best
}
