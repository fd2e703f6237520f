//! Gyroscope integration, and gyroscope bias (offset) tracking.

use core::f32::consts::TAU;

use lin_alg::f32::{Quaternion, Vec3};

use crate::{
    error::{AhrsError, Result},
    math,
};

// Cutoff frequency in Hz, of the lowpass filter that tracks the offset.
const CUTOFF_FREQUENCY: f32 = 0.02;

// Time, in seconds, the gyro must read stationary before we start updating the offset.
const TIMEOUT: f32 = 5.;

// Threshold in radians per second; 3 degrees/s.
const THRESHOLD: f32 = 0.05236;

/// How to turn an angular velocity held over a timestep into a rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IntegrationMethod {
    /// `q + ½·q⊗ω·dt`, renormalized. Error grows with the cube of the per-step angle.
    #[default]
    FirstOrder,
    /// Closed-form exponential map. Exact for a constant angular velocity over the step.
    Exact,
}

pub fn validate_timestep(dt: f32) -> Result<()> {
    if !dt.is_finite() || dt <= 0. {
        return Err(AhrsError::InvalidTimestep);
    }
    Ok(())
}

/// Integrate angular velocity (rad/s, sensor frame) over `dt` seconds into a unit
/// delta-rotation quaternion. Apply it as `q * delta`.
pub fn delta_rotation(gyro: Vec3, dt: f32, method: IntegrationMethod) -> Result<Quaternion> {
    validate_timestep(dt)?;

    if !math::all_finite(gyro) {
        return Err(AhrsError::InvalidSample);
    }

    Ok(delta_rotation_unchecked(gyro, dt, method))
}

/// `delta_rotation`, for callers that have already validated their inputs.
pub(crate) fn delta_rotation_unchecked(gyro: Vec3, dt: f32, method: IntegrationMethod) -> Quaternion {
    match method {
        IntegrationMethod::FirstOrder => {
            let half = gyro * (0.5 * dt);
            math::normalize_quat(Quaternion {
                w: 1.,
                x: half.x,
                y: half.y,
                z: half.z,
            })
        }
        IntegrationMethod::Exact => math::from_rotation_vec(gyro * dt),
    }
}

/// Gyroscope offset estimator. While the gyro reads close to stationary for long enough,
/// lowpass-filter its reading into an offset that's subtracted from subsequent readings.
/// This tracks slowly-varying bias, eg from temperature.
#[derive(Clone, Copy)]
pub struct GyroOffset {
    timer: f32,
    offset: Vec3,
}

impl Default for GyroOffset {
    fn default() -> Self {
        Self {
            timer: 0.,
            offset: Vec3::new_zero(),
        }
    }
}

impl GyroOffset {
    /// Current bias estimate, in rad/s.
    pub fn offset(&self) -> Vec3 {
        self.offset
    }

    /// Updates the offset estimate and returns the corrected gyroscope measurement, in rad/s.
    pub fn update(&mut self, gyro: Vec3, dt: f32) -> Vec3 {
        let gyro = gyro - self.offset;

        // Reset timer if gyroscope not stationary
        if gyro.x.abs() > THRESHOLD || gyro.y.abs() > THRESHOLD || gyro.z.abs() > THRESHOLD {
            self.timer = 0.;
            return gyro;
        }

        // Increment timer while gyroscope stationary
        if self.timer < TIMEOUT {
            self.timer += dt;
            return gyro;
        }

        // Adjust offset if timer has elapsed. Clamp so a long gap can't overshoot.
        let coefficient = (TAU * CUTOFF_FREQUENCY * dt).min(1.);
        self.offset = self.offset + gyro * coefficient;
        gyro
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn rejects_bad_timestep() {
        let gyro = Vec3::new(0.1, 0., 0.);
        for dt in [0., -0.01, f32::NAN, f32::INFINITY] {
            assert_eq!(
                delta_rotation(gyro, dt, IntegrationMethod::FirstOrder).err(),
                Some(AhrsError::InvalidTimestep)
            );
        }
    }

    #[test]
    fn rejects_nan_rate() {
        let gyro = Vec3::new(0.1, f32::NAN, 0.);
        assert_eq!(
            delta_rotation(gyro, 0.01, IntegrationMethod::Exact).err(),
            Some(AhrsError::InvalidSample)
        );
    }

    #[test]
    fn methods_agree_for_small_steps() {
        let gyro = Vec3::new(0.4, -1.2, 2.);
        let a = delta_rotation(gyro, 0.002, IntegrationMethod::FirstOrder).unwrap();
        let b = delta_rotation(gyro, 0.002, IntegrationMethod::Exact).unwrap();

        assert_abs_diff_eq!(a.w, b.w, epsilon = 1e-6);
        assert_abs_diff_eq!(a.x, b.x, epsilon = 1e-6);
        assert_abs_diff_eq!(a.y, b.y, epsilon = 1e-6);
        assert_abs_diff_eq!(a.z, b.z, epsilon = 1e-6);
        assert_abs_diff_eq!(math::quat_norm(a), 1., epsilon = 1e-6);
    }

    #[test]
    fn exact_half_turn() {
        let q = delta_rotation(Vec3::new(0., 0., TAU / 2.), 1., IntegrationMethod::Exact).unwrap();
        assert_abs_diff_eq!(q.w, 0., epsilon = 1e-6);
        assert_abs_diff_eq!(q.z, 1., epsilon = 1e-6);
    }

    #[test]
    fn offset_converges_to_stationary_bias() {
        let bias = Vec3::new(0.01, -0.02, 0.005);
        let mut offset = GyroOffset::default();

        // 5s settle, then enough time for the 0.02Hz filter to mostly converge.
        let dt = 0.01;
        for _ in 0..(60. / dt) as usize {
            offset.update(bias, dt);
        }

        let est = offset.offset();
        assert_abs_diff_eq!(est.x, bias.x, epsilon = 2e-3);
        assert_abs_diff_eq!(est.y, bias.y, epsilon = 4e-3);
        assert_abs_diff_eq!(est.z, bias.z, epsilon = 1e-3);
    }

    #[test]
    fn offset_ignores_motion() {
        let mut offset = GyroOffset::default();
        for _ in 0..2_000 {
            offset.update(Vec3::new(1., 0., 0.), 0.01);
        }
        assert!(math::is_zero(offset.offset()));
    }
}
