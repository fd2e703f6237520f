//! Sensor calibration models. This calibration functionality is from
//! [Fusion](https://github.com/xioTechnologies/Fusion). Apply these to raw readings before passing
//! them to the AHRS.

use lin_alg::f32::{Mat3, Vec3};

use crate::{Sample, mag_ellipsoid_fitting::MagFit};

#[rustfmt::skip]
fn identity() -> Mat3 {
    Mat3 {
        data: [
            1.0, 0.0, 0.0,
            0.0, 1.0, 0.0,
            0.0, 0.0, 1.0
        ],
    }
}

pub struct ImuCalibration {
    pub gyro_misalignment: Mat3,
    pub gyro_sensitivity: Vec3,
    /// In rad/s, after sensitivity scaling is removed.
    pub gyro_offset: Vec3,
    pub accel_misalignment: Mat3,
    pub accel_sensitivity: Vec3,
    pub accel_offset: Vec3,
    pub soft_iron_matrix: Mat3,
    pub hard_iron_offset: Vec3,
}

impl Default for ImuCalibration {
    fn default() -> Self {
        Self {
            gyro_misalignment: identity(),
            gyro_sensitivity: Vec3::new(1.0, 1.0, 1.0),
            gyro_offset: Vec3::new_zero(),
            accel_misalignment: identity(),
            accel_sensitivity: Vec3::new(1.0, 1.0, 1.0),
            accel_offset: Vec3::new_zero(),
            soft_iron_matrix: identity(),
            hard_iron_offset: Vec3::new_zero(),
        }
    }
}

impl ImuCalibration {
    pub fn apply_gyro(&self, raw: Vec3) -> Vec3 {
        apply_cal_inertial(
            raw,
            &self.gyro_misalignment,
            self.gyro_sensitivity,
            self.gyro_offset,
        )
    }

    pub fn apply_accel(&self, raw: Vec3) -> Vec3 {
        apply_cal_inertial(
            raw,
            &self.accel_misalignment,
            self.accel_sensitivity,
            self.accel_offset,
        )
    }

    pub fn apply_mag(&self, raw: Vec3) -> Vec3 {
        apply_cal_magnetic(raw, &self.soft_iron_matrix, self.hard_iron_offset)
    }

    /// Calibrate all readings of a sample.
    pub fn apply(&self, sample: &Sample) -> Sample {
        Sample {
            gyro: self.apply_gyro(sample.gyro),
            accel: self.apply_accel(sample.accel),
            mag: sample.mag.map(|m| self.apply_mag(m)),
            dt: sample.dt,
        }
    }

    /// Use the result of a magnetometer ellipsoid fit.
    pub fn set_mag_fit(&mut self, fit: &MagFit) {
        self.hard_iron_offset = fit.hard_iron;
        self.soft_iron_matrix = fit.soft_iron.clone();
    }
}

/// Gyroscope and accelerometer calibration model. Returns calibrated measurement.
pub fn apply_cal_inertial(
    uncalibrated: Vec3,
    misalignment: &Mat3,
    sensitivity: Vec3,
    offset: Vec3,
) -> Vec3 {
    misalignment.clone() * (uncalibrated - offset).hadamard_product(sensitivity)
}

/// Magnetometer calibration model. Returns calibrated measurement.
pub fn apply_cal_magnetic(uncalibrated: Vec3, soft_iron_matrix: &Mat3, hard_iron_offset: Vec3) -> Vec3 {
    soft_iron_matrix.clone() * (uncalibrated - hard_iron_offset)
}
