//! Vector and quaternion operations the filter needs on top of `lin_alg`. These are pure
//! functions; anything that normalizes returns a designated fallback (zero vector, or
//! identity quaternion) instead of dividing by a near-zero magnitude.
//!
//! Quaternions are (w, x, y, z), Hamilton convention, right-handed. An orientation quaternion
//! describes the sensor frame relative to the earth frame: `to_earth` rotates a sensor-frame
//! vector into earth coordinates.

use core::f32::consts::TAU;

use num_traits::float::Float; // sqrt, sin etc

use lin_alg::f32::{Quaternion, Vec3};

/// Magnitudes below this are treated as zero.
pub const EPSILON: f32 = 0.00001;

pub fn all_finite(v: Vec3) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}

pub fn quat_all_finite(q: Quaternion) -> bool {
    q.w.is_finite() && q.x.is_finite() && q.y.is_finite() && q.z.is_finite()
}

pub fn is_zero(v: Vec3) -> bool {
    v.x.abs() < EPSILON && v.y.abs() < EPSILON && v.z.abs() < EPSILON
}

/// Normalize a vector, or return the zero vector if its magnitude is too small to divide by.
pub fn normalize_or_zero(v: Vec3) -> Vec3 {
    let mag_sq = v.x * v.x + v.y * v.y + v.z * v.z;

    // Written this way so NaN also takes the fallback.
    if !(mag_sq > EPSILON * EPSILON) {
        return Vec3::new_zero();
    }

    v * (1. / mag_sq.sqrt())
}

pub fn quat_norm(q: Quaternion) -> f32 {
    (q.w * q.w + q.x * q.x + q.y * q.y + q.z * q.z).sqrt()
}

/// Normalize a quaternion, falling back to identity if it's degenerate.
pub fn normalize_quat(q: Quaternion) -> Quaternion {
    let norm = quat_norm(q);

    if !(norm > EPSILON) {
        return Quaternion::new_identity();
    }

    let inv = 1. / norm;
    Quaternion {
        w: q.w * inv,
        x: q.x * inv,
        y: q.y * inv,
        z: q.z * inv,
    }
}

/// A quaternion with zero scalar part; used to multiply vectors by quaternions.
pub fn pure(v: Vec3) -> Quaternion {
    Quaternion {
        w: 0.,
        x: v.x,
        y: v.y,
        z: v.z,
    }
}

/// Exponential map: convert a rotation vector (axis scaled by angle, in radians) to a unit
/// quaternion.
pub fn from_rotation_vec(rot: Vec3) -> Quaternion {
    let angle = (rot.x * rot.x + rot.y * rot.y + rot.z * rot.z).sqrt();

    if angle < EPSILON {
        // sin(a/2)/a -> 1/2 as a -> 0.
        return normalize_quat(Quaternion {
            w: 1.,
            x: rot.x * 0.5,
            y: rot.y * 0.5,
            z: rot.z * 0.5,
        });
    }

    let half = angle * 0.5;
    let s = half.sin() / angle;

    Quaternion {
        w: half.cos(),
        x: rot.x * s,
        y: rot.y * s,
        z: rot.z * s,
    }
}

/// Rotate a sensor-frame vector into the earth frame. Assumes `q` is unit-norm.
pub fn to_earth(q: Quaternion, v: Vec3) -> Vec3 {
    let qwqw = q.w * q.w; // calculate common terms to avoid repeated operations
    let qwqx = q.w * q.x;
    let qwqy = q.w * q.y;
    let qwqz = q.w * q.z;
    let qxqy = q.x * q.y;
    let qxqz = q.x * q.z;
    let qyqz = q.y * q.z;

    Vec3 {
        x: 2.0 * ((qwqw - 0.5 + q.x * q.x) * v.x + (qxqy - qwqz) * v.y + (qxqz + qwqy) * v.z),
        y: 2.0 * ((qxqy + qwqz) * v.x + (qwqw - 0.5 + q.y * q.y) * v.y + (qyqz - qwqx) * v.z),
        z: 2.0 * ((qxqz - qwqy) * v.x + (qyqz + qwqx) * v.y + (qwqw - 0.5 + q.z * q.z) * v.z),
    }
}

/// Rotate an earth-frame vector into the sensor frame; the transpose of `to_earth`.
pub fn to_sensor(q: Quaternion, v: Vec3) -> Vec3 {
    let qwqw = q.w * q.w;
    let qwqx = q.w * q.x;
    let qwqy = q.w * q.y;
    let qwqz = q.w * q.z;
    let qxqy = q.x * q.y;
    let qxqz = q.x * q.z;
    let qyqz = q.y * q.z;

    Vec3 {
        x: 2.0 * ((qwqw - 0.5 + q.x * q.x) * v.x + (qxqy + qwqz) * v.y + (qxqz - qwqy) * v.z),
        y: 2.0 * ((qxqy - qwqz) * v.x + (qwqw - 0.5 + q.y * q.y) * v.y + (qyqz + qwqx) * v.z),
        z: 2.0 * ((qxqz + qwqy) * v.x + (qyqz - qwqx) * v.y + (qwqw - 0.5 + q.z * q.z) * v.z),
    }
}

/// `asin` that saturates instead of returning NaN for inputs slightly outside [-1, 1].
pub fn asin_clamped(value: f32) -> f32 {
    if value <= -1.0 {
        return TAU / -4.0;
    }
    if value >= 1.0 {
        return TAU / 4.0;
    }
    value.asin()
}

/// Angle between two vectors, in radians. Zero if either is degenerate.
pub fn angle_between(a: Vec3, b: Vec3) -> f32 {
    if is_zero(a) || is_zero(b) {
        return 0.;
    }
    a.cross(b).magnitude().atan2(a.dot(b))
}
