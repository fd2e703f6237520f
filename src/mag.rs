//! Code releated to magnetometer readings: heading feedback, and tilt-compensated compass
//! heading. The magnetometer only corrects heading. Its feedback is built from vectors that
//! are both perpendicular to the estimated vertical, so their cross product (the correction)
//! is parallel to it, and it can't fight the accelerometer's tilt correction.

use num_traits::float::Float; // atan2 etc

use lin_alg::f32::{Quaternion, Vec3};

use crate::{
    acc,
    ahrs_fusion::{Ahrs, AhrsState},
    config::AxisConvention,
    math,
};

/// Returns the direction of magnetic west in the sensor frame, scaled by 0.5. This is the
/// direction of the horizontal part of the magnetic field, rotated a quarter turn about vertical.
pub fn half_magnetic(q: Quaternion, convention: AxisConvention) -> Vec3 {
    match convention {
        AxisConvention::Nwu => {
            Vec3 {
                x: q.x * q.y + q.w * q.z,
                y: q.w * q.w - 0.5 + q.y * q.y,
                z: q.y * q.z - q.w * q.x,
            } // second column of transposed rotation matrix scaled by 0.5
        }
        AxisConvention::Enu => {
            Vec3 {
                x: 0.5 - q.w * q.w - q.x * q.x,
                y: q.w * q.z - q.x * q.y,
                z: -1.0 * (q.x * q.z + q.w * q.y),
            } // first column of transposed rotation matrix scaled by -0.5
        }
        AxisConvention::Ned => {
            Vec3 {
                x: -1.0 * (q.x * q.y + q.w * q.z),
                y: 0.5 - q.w * q.w - q.y * q.y,
                z: q.w * q.x - q.y * q.z,
            } // second column of transposed rotation matrix scaled by -0.5
        }
    }
}

/// Earth-frame direction of (horizontal) magnetic north.
fn north(convention: AxisConvention) -> Vec3 {
    match convention {
        AxisConvention::Nwu | AxisConvention::Ned => Vec3::new(1., 0., 0.),
        AxisConvention::Enu => Vec3::new(0., 1., 0.),
    }
}

/// Calculates the heading relative to magnetic north, in radians, from an accelerometer and
/// magnetometer reading. Tilt-compensated. Units of both are arbitrary, as long as they're
/// calibrated. Uses the same sense as the yaw of the orientation quaternion for each convention.
pub fn compass_heading(convention: AxisConvention, accel: Vec3, mag: Vec3) -> f32 {
    // The accelerometer reads "up" at rest, regardless of convention.
    let west = math::normalize_or_zero(accel.cross(mag));
    let north = math::normalize_or_zero(west.cross(accel));

    match convention {
        AxisConvention::Nwu => west.x.atan2(north.x),
        AxisConvention::Enu => north.x.atan2(-west.x),
        AxisConvention::Ned => (-west.x).atan2(north.x),
    }
}

/// Yaw (heading) angle of an orientation, in radians, about the earth frame's Z axis.
pub fn heading(q: Quaternion) -> f32 {
    (q.w * q.z + q.x * q.y).atan2(0.5 - q.y * q.y - q.z * q.z)
}

/// Rotate an orientation about the earth frame's Z axis so its heading is `target`, in radians.
/// Tilt is unchanged.
pub fn with_heading(q: Quaternion, target: f32) -> Quaternion {
    let half_yaw_minus_heading = 0.5 * (heading(q) - target);
    let rotation = Quaternion {
        w: half_yaw_minus_heading.cos(),
        x: 0.0,
        y: 0.0,
        z: -1.0 * half_yaw_minus_heading.sin(),
    };
    math::normalize_quat(rotation * q)
}

/// A magnetometer reading consistent with the orientation `q` having heading `target`. Used
/// to feed a heading from another source (eg GNSS course, or a camera) through the magnetometer
/// path of the filter.
pub fn synthetic_mag(q: Quaternion, target: f32, convention: AxisConvention) -> Vec3 {
    math::to_sensor(with_heading(q, target), north(convention))
}

impl Ahrs {
    /// Compute the magnetometer's contribution to the half-scale correction, updating rejection
    /// state. Returns zero if the magnetometer is ignored this update.
    pub(crate) fn mag_feedback(
        &mut self,
        mag: Vec3,
        half_gravity: Vec3,
        q: Quaternion,
        dt: f32,
    ) -> Vec3 {
        self.mag_rejection.ignored = true;

        if math::is_zero(mag) {
            self.half_mag_feedback = Vec3::new_zero();
            return Vec3::new_zero();
        }

        // Measured west; perpendicular to estimated vertical.
        let west = math::normalize_or_zero(half_gravity.cross(mag));
        let half_feedback = acc::feedback(west, half_magnetic(q, self.config.convention));
        self.half_mag_feedback = half_feedback;

        // Don't ignore magnetometer if magnetic error below threshold
        let within_threshold = self.state == AhrsState::Initializing
            || half_feedback.magnitude_squared() <= self.mag_threshold();

        if !self.mag_rejection.track(
            within_threshold,
            self.config.recovery_trigger_period,
            dt,
        ) {
            #[cfg(feature = "defmt")]
            defmt::trace!("Magnetometer ignored");
            return Vec3::new_zero();
        }

        self.mag_rejection.ignored = false;
        half_feedback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    use core::f32::consts::FRAC_PI_2;

    const CONVENTIONS: [AxisConvention; 3] =
        [AxisConvention::Nwu, AxisConvention::Enu, AxisConvention::Ned];

    #[test]
    fn half_magnetic_is_west() {
        let q = math::from_rotation_vec(Vec3::new(0.3, 0.5, -1.));

        let west_nwu = math::to_sensor(q, Vec3::new(0., 1., 0.));
        let hm = half_magnetic(q, AxisConvention::Nwu);
        assert_abs_diff_eq!(hm.x * 2., west_nwu.x, epsilon = 1e-6);
        assert_abs_diff_eq!(hm.y * 2., west_nwu.y, epsilon = 1e-6);
        assert_abs_diff_eq!(hm.z * 2., west_nwu.z, epsilon = 1e-6);

        let west_enu = math::to_sensor(q, Vec3::new(-1., 0., 0.));
        let hm = half_magnetic(q, AxisConvention::Enu);
        assert_abs_diff_eq!(hm.x * 2., west_enu.x, epsilon = 1e-6);
        assert_abs_diff_eq!(hm.z * 2., west_enu.z, epsilon = 1e-6);

        let west_ned = math::to_sensor(q, Vec3::new(0., -1., 0.));
        let hm = half_magnetic(q, AxisConvention::Ned);
        assert_abs_diff_eq!(hm.y * 2., west_ned.y, epsilon = 1e-6);
        assert_abs_diff_eq!(hm.z * 2., west_ned.z, epsilon = 1e-6);
    }

    #[test]
    fn compass_level_nwu() {
        // Level, facing north, field dipping down.
        let heading = compass_heading(
            AxisConvention::Nwu,
            Vec3::new(0., 0., 1.),
            Vec3::new(0.4, 0., -0.9),
        );
        assert_abs_diff_eq!(heading, 0., epsilon = 1e-6);

        // Yawed 90° left (CCW from above): north now lies along -Y in the sensor frame.
        let heading = compass_heading(
            AxisConvention::Nwu,
            Vec3::new(0., 0., 1.),
            Vec3::new(0., -0.4, -0.9),
        );
        assert_abs_diff_eq!(heading, FRAC_PI_2, epsilon = 1e-6);
    }

    #[test]
    fn compass_matches_synthetic_mag_when_tilted() {
        let q = math::from_rotation_vec(Vec3::new(0.3, -0.4, 0.2));

        for convention in CONVENTIONS {
            for target in [-2.5, -0.7, 0., 1.1, 3.] {
                let mag = synthetic_mag(q, target, convention);
                let up = acc::half_gravity(with_heading(q, target), convention) * 2.;

                let heading = compass_heading(convention, up, mag);
                assert_abs_diff_eq!(heading, target, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn with_heading_keeps_tilt() {
        let q = math::from_rotation_vec(Vec3::new(0.5, 0.2, 0.9));
        let rotated = with_heading(q, -1.2);

        assert_abs_diff_eq!(heading(rotated), -1.2, epsilon = 1e-5);

        let up_before = acc::half_gravity(q, AxisConvention::Nwu);
        let up_after = acc::half_gravity(rotated, AxisConvention::Nwu);
        assert_abs_diff_eq!(up_before.x, up_after.x, epsilon = 1e-6);
        assert_abs_diff_eq!(up_before.y, up_after.y, epsilon = 1e-6);
        assert_abs_diff_eq!(up_before.z, up_after.z, epsilon = 1e-6);
    }
}
