//! This module contains accelerometer-specific code: the expected direction of gravity,
//! tilt feedback, and weighting of the accelerometer by how close its magnitude is to 1G.

use lin_alg::f32::{Quaternion, Vec3};

use crate::{
    ahrs_fusion::{Ahrs, AhrsState},
    config::AxisConvention,
    math,
};

/// Returns the direction the accelerometer reads at rest (the reaction to gravity, ie "up"),
/// in the sensor frame, scaled by 0.5.
pub fn half_gravity(q: Quaternion, convention: AxisConvention) -> Vec3 {
    match convention {
        AxisConvention::Nwu | AxisConvention::Enu => {
            Vec3 {
                x: q.x * q.z - q.w * q.y,
                y: q.y * q.z + q.w * q.x,
                z: q.w * q.w - 0.5 + q.z * q.z,
            } // third column of transposed rotation matrix scaled by 0.5
        }
        AxisConvention::Ned => {
            Vec3 {
                x: q.w * q.y - q.x * q.z,
                y: -1.0 * (q.y * q.z + q.w * q.x),
                z: 0.5 - q.w * q.w - q.z * q.z,
            } // third column of transposed rotation matrix scaled by -0.5
        }
    }
}

/// Rotation error between a normalized sensor direction and a half-scale reference direction,
/// as a half-scale rotation vector. If the error is more than 90 degrees, the cross product
/// shrinks as the error grows, so we normalize it instead.
pub fn feedback(sensor: Vec3, reference: Vec3) -> Vec3 {
    if sensor.dot(reference) < 0. {
        return math::normalize_or_zero(sensor.cross(reference));
    }
    sensor.cross(reference)
}

/// Weight in [0, 1] to apply to accelerometer feedback, based on how far the accelerometer's
/// magnitude is from 1G. Full weight while the fractional deviation is within half of `tolerance`,
/// then falls linearly to zero at `tolerance`. A tolerance of 0 disables this.
pub fn magnitude_weight(accel: Vec3, gravity: f32, tolerance: f32) -> f32 {
    if tolerance <= 0. {
        return 1.;
    }

    let deviation = (accel.magnitude() / gravity - 1.).abs();
    let full_weight_below = 0.5 * tolerance;

    if deviation <= full_weight_below {
        1.
    } else if deviation >= tolerance {
        0.
    } else {
        (tolerance - deviation) / (tolerance - full_weight_below)
    }
}

impl Ahrs {
    /// Compute the accelerometer's contribution to the half-scale correction, updating
    /// rejection state. Returns zero if the accelerometer is ignored this update.
    pub(crate) fn acc_feedback(&mut self, accel: Vec3, half_gravity: Vec3, dt: f32) -> Vec3 {
        self.accel_rejection.ignored = true;
        self.accel_weight = 0.;

        if math::is_zero(accel) {
            self.half_accel_feedback = Vec3::new_zero();
            return Vec3::new_zero();
        }

        let half_feedback = feedback(math::normalize_or_zero(accel), half_gravity);
        self.half_accel_feedback = half_feedback;

        // Don't ignore accelerometer if acceleration error below threshold
        let within_threshold = self.state == AhrsState::Initializing
            || half_feedback.magnitude_squared() <= self.accel_threshold();

        let accepted = self.accel_rejection.track(
            within_threshold,
            self.config.recovery_trigger_period,
            dt,
        );

        let weight = magnitude_weight(
            accel,
            self.config.gravity,
            self.config.acc_magnitude_tolerance,
        );

        if !accepted || weight == 0. {
            #[cfg(feature = "defmt")]
            defmt::trace!("Accelerometer ignored. Weight: {}", weight);
            return Vec3::new_zero();
        }

        self.accel_rejection.ignored = false;
        self.accel_weight = weight;
        half_feedback * weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn half_gravity_at_identity() {
        let q = Quaternion::new_identity();

        let up = half_gravity(q, AxisConvention::Nwu);
        assert_abs_diff_eq!(up.z, 0.5);

        let up = half_gravity(q, AxisConvention::Enu);
        assert_abs_diff_eq!(up.z, 0.5);

        // Z points down; the accelerometer reads -1G on it at rest.
        let up = half_gravity(q, AxisConvention::Ned);
        assert_abs_diff_eq!(up.z, -0.5);
        assert_abs_diff_eq!(up.x, 0.);
    }

    #[test]
    fn half_gravity_matches_rotated_up() {
        let q = math::from_rotation_vec(Vec3::new(0.4, -0.2, 1.3));
        let expected = math::to_sensor(q, Vec3::new(0., 0., 1.));
        let hg = half_gravity(q, AxisConvention::Nwu);

        assert_abs_diff_eq!(hg.x * 2., expected.x, epsilon = 1e-6);
        assert_abs_diff_eq!(hg.y * 2., expected.y, epsilon = 1e-6);
        assert_abs_diff_eq!(hg.z * 2., expected.z, epsilon = 1e-6);
    }

    #[test]
    fn feedback_zero_when_aligned() {
        let fb = feedback(Vec3::new(0., 0., 1.), Vec3::new(0., 0., 0.5));
        assert!(math::is_zero(fb));
    }

    #[test]
    fn feedback_normalized_past_90_degrees() {
        // 90° error: half-scale cross product has magnitude 0.5.
        let fb = feedback(Vec3::new(1., 0., 0.), Vec3::new(0., 0., 0.5));
        assert_abs_diff_eq!(fb.magnitude(), 0.5, epsilon = 1e-6);

        // 135° error: unit magnitude, pointing the same way as for small errors.
        let sensor = Vec3::new(1., 0., -1.).to_normalized();
        let fb = feedback(sensor, Vec3::new(0., 0., 0.5));
        assert_abs_diff_eq!(fb.magnitude(), 1., epsilon = 1e-6);
        assert!(fb.y < 0.);
    }

    #[test]
    fn magnitude_weight_trapezoid() {
        let tol = 0.2;
        assert_eq!(magnitude_weight(Vec3::new(0., 0., 1.), 1., tol), 1.);
        assert_eq!(magnitude_weight(Vec3::new(0., 0., 1.09), 1., tol), 1.);
        assert_abs_diff_eq!(
            magnitude_weight(Vec3::new(0., 0., 1.15), 1., tol),
            0.5,
            epsilon = 1e-5
        );
        assert_eq!(magnitude_weight(Vec3::new(0., 0., 0.7), 1., tol), 0.);
        assert_eq!(magnitude_weight(Vec3::new(0., 0., 3.), 1., tol), 0.);

        // In m/s^2
        assert_eq!(magnitude_weight(Vec3::new(0., 0., 9.8), 9.80665, tol), 1.);

        // Disabled
        assert_eq!(magnitude_weight(Vec3::new(0., 0., 3.), 1., 0.), 1.);
    }
}
