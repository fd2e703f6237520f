//! AHRS fusion filter, for attaining an attitude platform from a 3-axis acceleratometer, gyro, and optionally
//! magnetometer.
//!
//! This is based on the revised AHRS algorithm presented in chapter 7 of Madgwick's PhD thesis, as
//! implemented by [Fusion](https://github.com/xioTechnologies/Fusion). This is a different algorithm
//! to the better-known initial AHRS algorithm presented in chapter 3, commonly referred to as the
//! Madgwick algorithm.
//!
//! The algorithm calculates the orientation as the integration of the gyroscope summed with a
//! feedback term. The feedback term is equal to the error in the current measurement of orientation
//! as determined by the other sensors, multiplied by a gain. The algorithm therefore functions as a
//! complementary filter that combines high-pass filtered gyroscope measurements with low-pass
//! filtered measurements from other sensors, with a corner frequency determined by the gain.
//!
//! https://courses.cs.washington.edu/courses/cse466/14au/labs/l4/madgwick_internal_report.pdf

use num_traits::float::Float; // abs etc

use num_enum::{IntoPrimitive, TryFromPrimitive};

use lin_alg::f32::{Quaternion, Vec3};

use crate::{
    Sample, acc,
    config::{self, AhrsConfig},
    error::{AhrsError, Result},
    gyro::{self, GyroOffset},
    linear_acc, mag, math,
};

/// Initializing uses a high, decaying gain so the orientation converges quickly from whatever
/// it started at. The transition to Steady happens once per reset, with one exception: if
/// `AhrsConfig::gyro_range` is set and exceeded, a Steady instance returns to Initializing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AhrsState {
    Initializing = 0,
    Steady = 1,
}

/// Acceleration or magnetic rejection state. The trigger rises (in seconds) while the sensor is
/// rejected, and drains 9x as fast while it's accepted. If it passes the timeout, the sensor is
/// accepted regardless until the trigger drains to zero.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct RecoveryTrigger {
    pub trigger: f32,
    pub timeout: f32,
    pub ignored: bool,
}

impl RecoveryTrigger {
    fn new(period: f32) -> Self {
        Self {
            trigger: 0.,
            timeout: period,
            ignored: false,
        }
    }

    /// Advance the trigger, and return whether the sensor's feedback is to be used this update.
    pub fn track(&mut self, within_threshold: bool, period: f32, dt: f32) -> bool {
        let mut accepted = within_threshold;

        if within_threshold {
            self.trigger -= 9. * dt;
        } else {
            self.trigger += dt;
        }

        // Don't ignore the sensor during recovery
        if self.trigger > self.timeout {
            self.timeout = 0.;
            accepted = true;
        } else {
            self.timeout = period;
        }
        self.trigger = self.trigger.clamp(0., period);

        accepted
    }

    fn recovering(&self) -> bool {
        self.trigger > self.timeout
    }

    /// Trigger normalised to between 0 and 1. Recovery starts when this reaches 1.
    fn normalized(&self, period: f32) -> f32 {
        if period == 0. {
            return 0.;
        }
        self.trigger / period
    }
}

/// AHRS algorithm internal states.
/// Doc comments are from the Fusion readme.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InternalStates {
    /// Angular error (in radians) of the instantaneous measurement of inclination provided by the
    /// accelerometer. The acceleration rejection feature will ignore the accelerometer if this
    /// value exceeds the `accel_rejection` threshold set in the algorithm settings.
    pub accel_error: f32,
    /// true if the accelerometer was ignored by the previous algorithm update.
    pub accelerometer_ignored: bool,
    /// Acceleration recovery trigger value normalised to between 0.0 and 1.0. An acceleration
    /// recovery will occur when this value reaches 1.0.
    pub accel_recovery_trigger: f32,
    /// Weight, from 0 to 1, applied to the accelerometer feedback due to its magnitude.
    pub accel_weight: f32,
    /// Angular error (in radians) of the instantaneous measurement of heading provided by the
    /// magnetometer. The magnetic rejection feature will ignore the magnetometer if this value
    /// exceeds the `mag_rejection` threshold set in the algorithm settings.
    pub mag_error: f32,
    /// true if the magnetometer was ignored by the previous algorithm update.
    pub magnetometer_ignored: bool,
    /// Magnetic recovery trigger value normalised to between 0.0 and 1.0. A magnetic recovery
    /// will occur when this value reaches 1.0.
    pub mag_recovery_trigger: f32,
}

/// AHRS algorithm flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Flags {
    /// true if the algorithm is initialising.
    pub initialising: bool,
    /// true if the gyroscope range was exceeded, and the algorithm is re-initialising because of it.
    pub angular_rate_recovery: bool,
    /// true if the accelerometer is being used despite exceeding its rejection threshold, because
    /// it's been rejected for too long.
    pub accel_recovery: bool,
    /// Same as `accel_recovery`, for the magnetometer.
    pub mag_recovery: bool,
}

/// AHRS algorithm structure. One per body being tracked. It's plain data: cheap to clone, and
/// safe to move between threads. Updates take `&mut self`; there's no internal locking.
#[derive(Clone)]
pub struct Ahrs {
    pub(crate) config: AhrsConfig,
    /// Steady-state feedback gain.
    gain: f32,
    /// The quaternion describing the sensor relative to the Earth.
    quaternion: Quaternion,
    /// Last accelerometer reading; used for linear and earth acceleration.
    accelerometer: Vec3,
    pub(crate) state: AhrsState,
    ramped_gain: f32,
    angular_rate_recovery: bool,
    pub(crate) half_accel_feedback: Vec3,
    pub(crate) half_mag_feedback: Vec3,
    pub(crate) accel_rejection: RecoveryTrigger,
    pub(crate) mag_rejection: RecoveryTrigger,
    pub(crate) accel_weight: f32,
    offset: GyroOffset,
}

impl Ahrs {
    /// Create an AHRS in the `Initializing` state, with identity orientation. `gain` is the
    /// steady-state feedback gain; 0.5 is appropriate for most applications. A gain of zero
    /// ignores the accelerometer and magnetometer, integrating the gyroscope only.
    pub fn new(gain: f32, config: AhrsConfig) -> Result<Self> {
        config::validate_gain(gain)?;
        config.validate()?;

        let mut result = Self {
            config,
            gain,
            quaternion: Quaternion::new_identity(),
            accelerometer: Vec3::new_zero(),
            state: AhrsState::Initializing,
            ramped_gain: 0.,
            angular_rate_recovery: false,
            half_accel_feedback: Vec3::new_zero(),
            half_mag_feedback: Vec3::new_zero(),
            accel_rejection: Default::default(),
            mag_rejection: Default::default(),
            accel_weight: 0.,
            offset: Default::default(),
        };

        result.reset();
        Ok(result)
    }

    /// Resets the AHRS algorithm. This is equivalent to reinitialising the algorithm while
    /// maintaining the current settings: identity orientation, `Initializing` state, and the
    /// gyroscope offset estimate cleared. Use this after a gap in sensor data.
    pub fn reset(&mut self) {
        self.reinitialise();
        self.quaternion = Quaternion::new_identity();
        self.offset = Default::default();

        #[cfg(feature = "defmt")]
        defmt::debug!("AHRS reset");
    }

    /// Return to `Initializing`, keeping orientation and gyro offset.
    fn reinitialise(&mut self) {
        self.accelerometer = Vec3::new_zero();
        self.state = AhrsState::Initializing;
        self.ramped_gain = self.config.initial_gain.max(self.gain);
        self.angular_rate_recovery = false;
        self.half_accel_feedback = Vec3::new_zero();
        self.half_mag_feedback = Vec3::new_zero();
        self.accel_rejection = RecoveryTrigger::new(self.config.recovery_trigger_period);
        self.mag_rejection = RecoveryTrigger::new(self.config.recovery_trigger_period);
        self.accel_weight = 0.;
    }

    /// Sets the steady-state gain. Takes effect immediately if in `Steady`; otherwise, the ramp
    /// down continues towards the new value.
    pub fn set_gain(&mut self, gain: f32) -> Result<()> {
        config::validate_gain(gain)?;
        self.gain = gain;

        if self.state == AhrsState::Steady {
            self.ramped_gain = gain;
        }
        Ok(())
    }

    /// Sets the AHRS algorithm settings. Orientation and state are kept.
    pub fn set_config(&mut self, config: AhrsConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &AhrsConfig {
        &self.config
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn state(&self) -> AhrsState {
        self.state
    }

    /// Gain decrease per second during initialisation.
    fn ramped_gain_step(&self) -> f32 {
        if self.config.initialization_period <= 0. {
            return f32::INFINITY;
        }
        (self.config.initial_gain - self.gain).max(0.) / self.config.initialization_period
    }

    /// Threshold for the squared magnitude of the half-scale accelerometer feedback.
    pub(crate) fn accel_threshold(&self) -> f32 {
        rejection_threshold(
            self.config.accel_rejection,
            self.config.recovery_trigger_period,
            self.gain,
        )
    }

    pub(crate) fn mag_threshold(&self) -> f32 {
        rejection_threshold(
            self.config.mag_rejection,
            self.config.recovery_trigger_period,
            self.gain,
        )
    }

    fn gyro_range_threshold(&self) -> f32 {
        if self.config.gyro_range == 0. {
            return f32::MAX;
        }
        0.98 * self.config.gyro_range
    }

    /// Updates the AHRS algorithm using the gyroscope, accelerometer, and optionally
    /// magnetometer measurements.
    /// Gyroscope measurement is in radians per second.
    /// Accelerometer measurement is in units of `config.gravity`. Magnetometer measurement is in
    /// arbitrary units. dt is in seconds.
    ///
    /// On error, state is unchanged.
    pub fn update(&mut self, gyro: Vec3, accel: Vec3, mag: Option<Vec3>, dt: f32) -> Result<()> {
        gyro::validate_timestep(dt)?;

        if !math::all_finite(gyro) || !math::all_finite(accel) {
            return Err(AhrsError::InvalidSample);
        }

        if let Some(m) = mag {
            if !math::all_finite(m) {
                return Err(AhrsError::InvalidSample);
            }
            if math::is_zero(accel) && math::is_zero(m) {
                return Err(AhrsError::DegenerateVector);
            }
        }

        // Run the update on a copy; commit it only if it produced a usable orientation.
        let mut next = self.clone();
        next.step(gyro, accel, mag, dt)?;

        if !math::quat_all_finite(next.quaternion) {
            return Err(AhrsError::InvalidSample);
        }

        *self = next;
        Ok(())
    }

    /// Updates the AHRS algorithm using the gyroscope and accelerometer measurements only.
    /// Heading drifts freely, except during initialisation, where it's held at zero.
    pub fn update_no_magnetometer(&mut self, gyro: Vec3, accel: Vec3, dt: f32) -> Result<()> {
        self.update(gyro, accel, None, dt)
    }

    pub fn update_sample(&mut self, sample: &Sample) -> Result<()> {
        self.update(sample.gyro, sample.accel, sample.mag, sample.dt)
    }

    /// Updates the AHRS algorithm using the gyroscope, accelerometer, and a heading measurement
    /// from another source, in radians, in place of a magnetometer.
    pub fn update_external_heading(
        &mut self,
        gyro: Vec3,
        accel: Vec3,
        heading: f32,
        dt: f32,
    ) -> Result<()> {
        if !heading.is_finite() {
            return Err(AhrsError::InvalidSample);
        }

        let mag = mag::synthetic_mag(self.quaternion, heading, self.config.convention);
        self.update(gyro, accel, Some(mag), dt)
    }

    /// One filter tick. Inputs have been validated. Errors if the rotation over this step
    /// overflows, instead of falling back to an unrelated orientation.
    fn step(&mut self, gyro: Vec3, accel: Vec3, mag: Option<Vec3>, dt: f32) -> Result<()> {
        let gyro = if self.config.gyro_offset_correction {
            self.offset.update(gyro, dt)
        } else {
            gyro
        };

        // Store accelerometer
        self.accelerometer = accel;

        // Reinitialise if gyroscope range exceeded
        let range = self.gyro_range_threshold();
        if gyro.x.abs() > range || gyro.y.abs() > range || gyro.z.abs() > range {
            self.reinitialise();
            self.accelerometer = accel;
            self.angular_rate_recovery = true;

            #[cfg(feature = "defmt")]
            defmt::warn!("Gyro range exceeded; reinitialising");
        }

        // Ramp down gain during initialisation
        if self.state == AhrsState::Initializing {
            self.ramped_gain -= self.ramped_gain_step() * dt;
            if self.ramped_gain <= self.gain || self.gain == 0. {
                self.ramped_gain = self.gain;
                self.state = AhrsState::Steady;
                self.angular_rate_recovery = false;

                #[cfg(feature = "defmt")]
                defmt::info!("AHRS initialised");
            }
        }

        // Predict from the gyroscope
        let delta = gyro::delta_rotation_unchecked(gyro, dt, self.config.integration);
        let predicted = renormalize(self.quaternion * delta)?;

        // Calculate direction of gravity indicated by the prediction
        let half_gravity = acc::half_gravity(predicted, self.config.convention);

        let half_accel_feedback = self.acc_feedback(accel, half_gravity, dt);

        let half_mag_feedback = match mag {
            Some(m) => self.mag_feedback(m, half_gravity, predicted, dt),
            None => {
                self.mag_rejection.ignored = true;
                self.half_mag_feedback = Vec3::new_zero();
                Vec3::new_zero()
            }
        };

        // Rate, in rad/s, that the feedback rotates the prediction at.
        let correction = (half_accel_feedback + half_mag_feedback) * (2. * self.ramped_gain);

        let correction_rot = gyro::delta_rotation_unchecked(correction, dt, self.config.integration);
        self.quaternion = renormalize(predicted * correction_rot)?;

        // Zero heading during initialisation
        if mag.is_none() && self.state == AhrsState::Initializing {
            self.set_heading(0.);
        }
        Ok(())
    }

    /// Sets the heading of the orientation measurement provided by the AHRS algorithm, in
    /// radians. This function can be used to reset drift in heading when the AHRS algorithm is
    /// being used without a magnetometer.
    pub fn set_heading(&mut self, heading: f32) {
        if !heading.is_finite() {
            return;
        }
        self.quaternion = mag::with_heading(self.quaternion, heading);
    }

    /// The quaternion describing the sensor relative to the Earth. Unit norm.
    pub fn get_orientation(&self) -> Quaternion {
        self.quaternion
    }

    /// Heading, in radians.
    pub fn get_heading(&self) -> f32 {
        mag::heading(self.quaternion)
    }

    /// Returns the direction of the earth frame's Z axis in the sensor frame: up for NWU and
    /// ENU, and down for NED. Unit length.
    pub fn get_gravity(&self) -> Vec3 {
        let q = self.quaternion;

        Vec3 {
            x: 2.0 * (q.x * q.z - q.w * q.y),
            y: 2.0 * (q.y * q.z + q.w * q.x),
            z: 2.0 * (q.w * q.w - 0.5 + q.z * q.z),
        } // third column of transposed rotation matrix
    }

    /// Returns the linear acceleration measurement, equal to the accelerometer measurement
    /// with gravity removed. In the sensor frame, and the accelerometer's units.
    pub fn get_linear_accel(&self) -> Vec3 {
        linear_acc::from_orientation(
            self.quaternion,
            self.accelerometer,
            self.config.convention,
            self.config.gravity,
        )
    }

    /// Returns the Earth acceleration measurement, equal to the accelerometer measurement in
    /// the Earth coordinate frame with gravity removed.
    pub fn get_earth_accel(&self) -> Vec3 {
        linear_acc::earth_accel(
            self.quaternion,
            self.accelerometer,
            self.config.convention,
            self.config.gravity,
        )
    }

    /// Returns the AHRS algorithm internal states.
    pub fn get_internal_states(&self) -> InternalStates {
        let period = self.config.recovery_trigger_period;

        InternalStates {
            accel_error: math::asin_clamped(2.0 * self.half_accel_feedback.magnitude()),
            accelerometer_ignored: self.accel_rejection.ignored,
            accel_recovery_trigger: self.accel_rejection.normalized(period),
            accel_weight: self.accel_weight,
            mag_error: math::asin_clamped(2.0 * self.half_mag_feedback.magnitude()),
            magnetometer_ignored: self.mag_rejection.ignored,
            mag_recovery_trigger: self.mag_rejection.normalized(period),
        }
    }

    /// Returns the AHRS algorithm flags.
    pub fn get_flags(&self) -> Flags {
        Flags {
            initialising: self.state == AhrsState::Initializing,
            angular_rate_recovery: self.angular_rate_recovery,
            accel_recovery: self.accel_rejection.recovering(),
            mag_recovery: self.mag_rejection.recovering(),
        }
    }

    /// Current gyroscope bias estimate, in rad/s. Zero unless `gyro_offset_correction` is set.
    pub fn get_gyro_offset(&self) -> Vec3 {
        self.offset.offset()
    }
}

/// Squared half-scale feedback magnitude above which a sensor is rejected. Disabled if the
/// threshold angle, the recovery period, or the gain is zero.
fn rejection_threshold(angle: f32, period: f32, gain: f32) -> f32 {
    if angle < 0.0001 || period == 0. || gain == 0. {
        return f32::MAX;
    }
    (0.5 * angle.sin()).powi(2)
}

/// A product of unit quaternions has unit norm. If it doesn't, the rotation overflowed.
fn renormalize(q: Quaternion) -> Result<Quaternion> {
    let norm = math::quat_norm(q);

    if !norm.is_finite() || !(norm > math::EPSILON) {
        return Err(AhrsError::InvalidSample);
    }
    Ok(math::normalize_quat(q))
}
