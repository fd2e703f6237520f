//! AHRS algorithm settings. Field doc comments here are adapted from
//! [the Fusion readme](https://github.com/xioTechnologies/Fusion).

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    G,
    error::{AhrsError, Result},
    gyro::IntegrationMethod,
};

// Initial gain used during the initialisation.
pub const INITIAL_GAIN: f32 = 10.0;

// Initialisation period in seconds.
pub const INITIALISATION_PERIOD: f32 = 3.0;

/// Earth axes convention. Determines which earth axis is "up" (or down), and which one the
/// magnetic field's horizontal component points along.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AxisConvention {
    /// North, West, Up.
    #[default]
    Nwu = 0,
    /// East, North, Up.
    Enu = 1,
    /// North, East, Down.
    Ned = 2,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AhrsConfig {
    pub convention: AxisConvention,
    /// Accelerometer reading, in the caller's units, of 1G at rest. Use 1.0 if the accelerometer
    /// reports in g, or 9.80665 if in m/s². Used to gate the accelerometer by magnitude, and to
    /// scale linear and earth acceleration outputs.
    pub gravity: f32,
    /// Feedback gain the algorithm starts with, ramping down to the steady-state gain over
    /// `initialization_period`. A high value lets the accelerometer (and magnetometer) quickly pull
    /// the orientation into place after startup.
    pub initial_gain: f32,
    /// In seconds.
    pub initialization_period: f32,
    /// Gyroscope range, in radians per second. If any axis reads above 98% of this, the
    /// gyroscope is assumed saturated, and the algorithm re-enters initialisation to re-acquire
    /// orientation from the other sensors. This can move a Steady instance back to Initializing
    /// without a reset. A value of zero disables this.
    pub gyro_range: f32,
    /// The acceleration rejection feature reduces the errors that result from the accelerations
    /// of linear and rotational motion. Acceleration rejection works by comparing the
    /// instantaneous measurement of inclination provided by the accelerometer with the
    /// current measurement of inclination of the algorithm output. If the angular difference
    /// between these two inclinations is greater than a threshold then the accelerometer will
    /// be ignored for this algorithm update. This is equivalent to a dynamic gain that
    /// deceases as accelerations increase.
    ///
    /// In radians. A value of zero will disable this feature. 10 degrees is appropriate for most
    /// applications.
    pub accel_rejection: f32,
    /// The magnetic rejection feature reduces the errors that result from temporary magnetic
    /// distortions. Magnetic rejection works using the same principle as acceleration
    /// rejection operating on the magnetometer instead of the accelerometer and by comparing
    /// the measurements of heading instead of inclination.
    ///
    /// In radians. A value of zero will disable the feature. 20 degrees is appropriate for most
    /// applications.
    pub mag_rejection: f32,
    /// Acceleration and magnetic rejection recovery trigger period, in seconds. If a sensor has
    /// been rejected for longer than this, it's accepted again until the trigger drains. A value
    /// of zero will disable the acceleration and magnetic rejection features. 5 seconds is
    /// appropriate for most applications.
    pub recovery_trigger_period: f32,
    /// Fractional deviation of accelerometer magnitude from `gravity` at which the accelerometer
    /// correction is fully faded out. Weight is full up to half of this. Zero disables the
    /// magnitude weighting.
    pub acc_magnitude_tolerance: f32,
    pub integration: IntegrationMethod,
    /// Track and remove gyroscope bias while stationary.
    pub gyro_offset_correction: bool,
}

impl Default for AhrsConfig {
    fn default() -> Self {
        Self {
            convention: AxisConvention::Nwu,
            gravity: 1.,
            initial_gain: INITIAL_GAIN,
            initialization_period: INITIALISATION_PERIOD,
            gyro_range: 0.,
            accel_rejection: 0.1745,
            mag_rejection: 0.349,
            recovery_trigger_period: 5.,
            acc_magnitude_tolerance: 0.2,
            integration: IntegrationMethod::FirstOrder,
            gyro_offset_correction: false,
        }
    }
}

impl AhrsConfig {
    /// Defaults, with the accelerometer reporting in m/s².
    pub fn si() -> Self {
        Self {
            gravity: G,
            ..Default::default()
        }
    }

    /// Check that all values are finite and in range.
    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            self.initial_gain,
            self.initialization_period,
            self.gyro_range,
            self.accel_rejection,
            self.mag_rejection,
            self.recovery_trigger_period,
            self.acc_magnitude_tolerance,
        ];

        for v in non_negative {
            if !v.is_finite() || v < 0. {
                return Err(AhrsError::InvalidConfig);
            }
        }

        if !self.gravity.is_finite() || self.gravity <= 0. {
            return Err(AhrsError::InvalidConfig);
        }

        Ok(())
    }
}

/// Steady-state gain must be finite and non-negative.
pub(crate) fn validate_gain(gain: f32) -> Result<()> {
    if !gain.is_finite() || gain < 0. {
        return Err(AhrsError::InvalidConfig);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(AhrsConfig::default().validate().is_ok());
        assert!(AhrsConfig::si().validate().is_ok());
        assert_eq!(AhrsConfig::si().gravity, G);
    }

    #[test]
    fn rejects_bad_values() {
        let cfg = AhrsConfig {
            gravity: 0.,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(AhrsError::InvalidConfig));

        let cfg = AhrsConfig {
            accel_rejection: f32::NAN,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(AhrsError::InvalidConfig));

        let cfg = AhrsConfig {
            initialization_period: -1.,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(AhrsError::InvalidConfig));

        assert_eq!(validate_gain(-0.5), Err(AhrsError::InvalidConfig));
        assert!(validate_gain(0.).is_ok());
    }

    #[test]
    fn convention_from_repr() {
        assert_eq!(AxisConvention::try_from(2u8).ok(), Some(AxisConvention::Ned));
        assert!(AxisConvention::try_from(3u8).is_err());
        assert_eq!(u8::from(AxisConvention::Enu), 1);
    }
}
