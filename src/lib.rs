#![no_std]

//! Attitude and heading reference system (AHRS). Fuses gyroscope and accelerometer readings,
//! and optionally magnetometer readings, into an orientation quaternion. Also provides linear
//! acceleration (gravity removed), sensor calibration models, and magnetometer hard and soft iron
//! calibration.
//!
//! The fusion algorithm is from [Fusion](https://github.com/xioTechnologies/Fusion): a complementary
//! filter with a gain that ramps down after startup, and rejection of accelerometer and
//! magnetometer readings that disagree with the estimate.
//!
//! Code here is device-agnostic, and `no_std`. Units: gyroscope in rad/s; accelerometer in any
//! units, as long as `AhrsConfig::gravity` is 1G in them; magnetometer in any units; timesteps
//! in seconds.
//!
//! Example:
//! ```
//! use attitude_fusion::{Ahrs, AhrsConfig};
//! use lin_alg::f32::Vec3;
//!
//! let mut ahrs = Ahrs::new(0.5, AhrsConfig::default()).unwrap();
//! ahrs.update(Vec3::new_zero(), Vec3::new(0., 0., 1.), None, 0.01).unwrap();
//!
//! let orientation = ahrs.get_orientation();
//! let linear_acc = ahrs.get_linear_accel();
//! ```
//!
//! An `Ahrs` holds no resources; dropping it is all the cleanup there is. It's `Send` and `Sync`;
//! use one per body being tracked.

pub mod acc;
pub mod ahrs_fusion;
pub mod cal;
pub mod config;
pub mod error;
pub mod gyro;
pub mod linear_acc;
pub mod mag;
pub mod mag_ellipsoid_fitting;
pub mod math;

pub use ahrs_fusion::{Ahrs, AhrsState, Flags, InternalStates};
pub use cal::ImuCalibration;
pub use config::{AhrsConfig, AxisConvention};
pub use error::{AhrsError, Result};
pub use gyro::{GyroOffset, IntegrationMethod};
pub use mag_ellipsoid_fitting::{MagCalibrator, MagFit};

use lin_alg::f32::Vec3;

pub const G: f32 = 9.80665; // Gravity, in m/s^2

/// One set of sensor readings. Gyroscope readings are in radians/s. Accelerometer readings
/// are in units of `AhrsConfig::gravity`. The magnetometer is optional; `None` runs the filter
/// on the gyroscope and accelerometer only.
#[derive(Clone, Copy)]
pub struct Sample {
    pub gyro: Vec3,
    pub accel: Vec3,
    pub mag: Option<Vec3>,
    /// Time since the previous sample, in seconds.
    pub dt: f32,
}

impl Sample {
    pub fn new(gyro: Vec3, accel: Vec3, dt: f32) -> Self {
        Self {
            gyro,
            accel,
            mag: None,
            dt,
        }
    }

    pub fn with_mag(gyro: Vec3, accel: Vec3, mag: Vec3, dt: f32) -> Self {
        Self {
            gyro,
            accel,
            mag: Some(mag),
            dt,
        }
    }
}
