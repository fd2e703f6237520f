//! This module contains code related to isolating linear acceleration
//! from gravitational acceleration.
//!
//! An accelerometer at rest reads 1G pointing up, as the reaction to gravity. Given an
//! orientation, we know which way up is in the sensor frame; the difference between the
//! reading and 1G along that direction is linear acceleration.

use lin_alg::f32::{Quaternion, Vec3};

use crate::{acc, config::AxisConvention, math};

/// The accelerometer reading expected at rest, for orientation `q`, as a unit vector in the
/// sensor frame.
pub fn expected_accel(q: Quaternion, convention: AxisConvention) -> Vec3 {
    acc::half_gravity(q, convention) * 2.
}

/// Linear acceleration in the sensor frame: the accelerometer reading with gravity removed.
/// `gravity` is the reading of 1G, in the accelerometer's units.
pub fn from_orientation(
    q: Quaternion,
    accel: Vec3,
    convention: AxisConvention,
    gravity: f32,
) -> Vec3 {
    accel - expected_accel(q, convention) * gravity
}

/// Linear acceleration in the earth frame: the accelerometer reading rotated into earth
/// coordinates, with gravity removed from the vertical axis.
pub fn earth_accel(q: Quaternion, accel: Vec3, convention: AxisConvention, gravity: f32) -> Vec3 {
    let mut result = math::to_earth(q, accel);

    match convention {
        AxisConvention::Nwu | AxisConvention::Enu => result.z -= gravity,
        AxisConvention::Ned => result.z += gravity,
    }

    result
}
