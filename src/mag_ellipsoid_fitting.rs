#![allow(non_snake_case)]

//! Magnetometer hard and soft iron calibration, by fitting an ellipsoid to raw readings taken
//! over a range of orientations.
//!
//! http://www.juddzone.com/ALGORITHMS/least_squares_3D_ellipsoid.html
//!
//! See also: https://github.com/PaulStoffregen/MotionCal/blob/master/magcal.c
//!
//! We don't keep a buffer of samples. Each sample updates the least-squares normal equations
//! directly (JᵀJ and Jᵀ1, 9x9 and 9x1), so memory use is constant. Accumulation is in f64; the
//! x⁴ terms lose too much precision in f32.

use num_traits::float::Float; // sqrt, powf etc

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

use lin_alg::f32::{Mat3, Vec3};

use crate::error::{AhrsError, Result};

/// Coverage categories: which sensor axis (+X, -X, +Y, -Y, +Z, -Z) is closest to up.
pub const NUM_CATEGORIES: usize = 6;

/// Least-squares needs at least as many samples as unknowns.
const MIN_SAMPLES: u32 = 9;

/// Result of a magnetometer ellipsoid fit. Calibrated readings are
/// `soft_iron * (raw - hard_iron)`, and have magnitude `field_strength`.
#[derive(Clone)]
pub struct MagFit {
    pub hard_iron: Vec3,
    pub soft_iron: Mat3,
    /// Estimated field strength, in the magnetometer's units.
    pub field_strength: f32,
}

/// Accumulates magnetometer readings for an ellipsoid fit.
#[derive(Clone)]
pub struct MagCalibrator {
    JTJ: SMatrix<f64, 9, 9>,
    JT1: SVector<f64, 9>,
    num_samples: u32,
    coverage: [u32; NUM_CATEGORIES],
}

impl Default for MagCalibrator {
    fn default() -> Self {
        Self {
            JTJ: SMatrix::zeros(),
            JT1: SVector::zeros(),
            num_samples: 0,
            coverage: [0; NUM_CATEGORIES],
        }
    }
}

impl MagCalibrator {
    /// Log a raw magnetometer reading. `up` is the direction of up in the sensor frame, eg the
    /// accelerometer reading at rest, or `Ahrs::get_gravity()` for NWU and ENU. It's used only to
    /// track how evenly the samples cover different orientations. Zero or non-finite readings are
    /// skipped.
    pub fn add_sample(&mut self, mag_raw: Vec3, up: Vec3) {
        let finite = mag_raw.x.is_finite() && mag_raw.y.is_finite() && mag_raw.z.is_finite();
        if !finite || (mag_raw.x == 0. && mag_raw.y == 0. && mag_raw.z == 0.) {
            return;
        }

        let (x, y, z) = (mag_raw.x as f64, mag_raw.y as f64, mag_raw.z as f64);

        // One row of J: Ax^2 + By^2 + Cz^2 + Dxy + Exz + Fyz + Gx + Hy + Iz = 1
        let row = SVector::<f64, 9>::from_column_slice(&[
            x * x,
            y * y,
            z * z,
            x * y,
            x * z,
            y * z,
            x,
            y,
            z,
        ]);

        self.JTJ += row * row.transpose();
        self.JT1 += row;
        self.num_samples += 1;

        if let Some(cat) = category(up) {
            self.coverage[cat] += 1;
        }
    }

    pub fn num_samples(&self) -> u32 {
        self.num_samples
    }

    /// Sample count in each orientation category: +X, -X, +Y, -Y, +Z, -Z up.
    pub fn coverage(&self) -> [u32; NUM_CATEGORIES] {
        self.coverage
    }

    /// True if every orientation category has at least `min_per_category` samples.
    pub fn is_well_covered(&self, min_per_category: u32) -> bool {
        self.coverage.iter().all(|c| *c >= min_per_category)
    }

    /// Discard all samples.
    pub fn clear(&mut self) {
        *self = Default::default();
    }

    /// Fit an ellipsoid to the samples so far.
    pub fn fit(&self) -> Result<MagFit> {
        if self.num_samples < MIN_SAMPLES {
            return Err(AhrsError::DegenerateFit);
        }

        let poly = ls_ellipsoid(self.JTJ, &self.JT1)?;
        let (hard_iron, soft_iron, field_strength) = poly_to_params_3d(&poly)?;

        #[cfg(feature = "defmt")]
        defmt::info!(
            "Mag fit. Hard iron: x{} y{} z{} Field: {}",
            hard_iron.x,
            hard_iron.y,
            hard_iron.z,
            field_strength
        );

        Ok(MagFit {
            hard_iron,
            soft_iron,
            field_strength,
        })
    }
}

/// Which of the six sensor half-axes is closest to `up`.
fn category(up: Vec3) -> Option<usize> {
    let (ax, ay, az) = (up.x.abs(), up.y.abs(), up.z.abs());

    if !(ax + ay + az > 0.) {
        return None;
    }

    let cat = if ax >= ay && ax >= az {
        if up.x >= 0. { 0 } else { 1 }
    } else if ay >= az {
        if up.y >= 0. { 2 } else { 3 }
    } else if up.z >= 0. {
        4
    } else {
        5
    };
    Some(cat)
}

/// Least squares fit to a 3D-ellipsoid, from its normal equations.
/// Ax^2 + By^2 + Cz^2 +  Dxy +  Exz +  Fyz +  Gx +  Hy +  Iz  = 1
///
/// Returns the coefficients A through I.
fn ls_ellipsoid(JTJ: SMatrix<f64, 9, 9>, JT1: &SVector<f64, 9>) -> Result<SVector<f64, 9>> {
    let ABC = JTJ.lu().solve(JT1).ok_or(AhrsError::DegenerateFit)?;

    if ABC.iter().any(|v| !v.is_finite()) {
        return Err(AhrsError::DegenerateFit);
    }
    Ok(ABC)
}

/// Convert the polynomial form of the 3D-ellipsoid to (center, soft iron matrix, field strength).
///
/// Algebraic form: X.T * Amat * X + b.T * X = 1
fn poly_to_params_3d(v: &SVector<f64, 9>) -> Result<(Vec3, Mat3, f32)> {
    // Terms with a factor of 2 when multiplied out (the off-diagonals) are halved.
    #[rustfmt::skip]
    let A3 = Matrix3::new(
        v[0], v[3] / 2., v[4] / 2.,
        v[3] / 2., v[1], v[5] / 2.,
        v[4] / 2., v[5] / 2., v[2],
    );
    let b = Vector3::new(v[6], v[7], v[8]);

    // See B.Bartoni, Preprint SMU-HEP-10-14 Multi-dimensional Ellipsoidal Fitting
    // equation 20 for the following method for finding the center
    let A3_inv = A3.try_inverse().ok_or(AhrsError::DegenerateFit)?;
    let center = -(A3_inv * b) / 2.;

    // Translated to the center: (X - c).T * A3 * (X - c) = 1 + c.T * A3 * c
    let r = 1. + center.dot(&(A3 * center));
    if !(r > 0.) {
        return Err(AhrsError::DegenerateFit);
    }
    let M = A3 / r;

    let eigen = M.symmetric_eigen();
    let el = eigen.eigenvalues;
    if el.iter().any(|l| !(*l > 0.)) {
        // Not an ellipsoid.
        return Err(AhrsError::DegenerateFit);
    }

    // Axes lengths are 1/sqrt(eigenvalue); use their geometric mean as the field strength.
    let field = (el[0] * el[1] * el[2]).powf(-1. / 6.);

    let sqrt_l = Matrix3::from_diagonal(&Vector3::new(el[0].sqrt(), el[1].sqrt(), el[2].sqrt()));
    let ec = eigen.eigenvectors;
    let soft_iron = ec * sqrt_l * ec.transpose() * field;

    // Symmetric, so the storage order of `Mat3` doesn't matter.
    let mut data = [0.; 9];
    for i in 0..3 {
        for j in 0..3 {
            data[i * 3 + j] = soft_iron[(i, j)] as f32;
        }
    }

    Ok((
        Vec3::new(center.x as f32, center.y as f32, center.z as f32),
        Mat3 { data },
        field as f32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    use core::f64::consts::TAU;

    /// Points on an ellipsoid: center + A * u, for unit vectors u. A is symmetric positive-definite.
    #[rustfmt::skip]
    fn sample_ellipsoid(cal: &mut MagCalibrator, center: Vector3<f64>) {
        let A = Matrix3::new(
            40., 5., 0.,
            5., 35., 3.,
            0., 3., 45.,
        );

        for i in 1..12 {
            let lat = TAU / 2. * (i as f64 / 12.) - TAU / 4.;
            for j in 0..24 {
                let lon = TAU * j as f64 / 24.;
                let u = Vector3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin());
                let p = center + A * u;

                cal.add_sample(
                    Vec3::new(p.x as f32, p.y as f32, p.z as f32),
                    Vec3::new(u.x as f32, u.y as f32, u.z as f32),
                );
            }
        }
        // Poles
        for u in [Vector3::new(0., 0., 1.), Vector3::new(0., 0., -1.)] {
            let p = center + A * u;
            cal.add_sample(
                Vec3::new(p.x as f32, p.y as f32, p.z as f32),
                Vec3::new(u.x as f32, u.y as f32, u.z as f32),
            );
        }
    }

    #[test]
    fn recovers_hard_and_soft_iron() {
        let mut cal = MagCalibrator::default();
        let center = Vector3::new(12., -7., 20.);
        sample_ellipsoid(&mut cal, center);

        assert!(cal.is_well_covered(5));

        let fit = cal.fit().unwrap();
        assert_abs_diff_eq!(fit.hard_iron.x, 12., epsilon = 1e-2);
        assert_abs_diff_eq!(fit.hard_iron.y, -7., epsilon = 1e-2);
        assert_abs_diff_eq!(fit.hard_iron.z, 20., epsilon = 1e-2);

        // Field strength is the cube root of det(A).
        let det: f64 = 40. * (35. * 45. - 9.) - 5. * (5. * 45.);
        assert_abs_diff_eq!(fit.field_strength, det.powf(1. / 3.) as f32, epsilon = 1e-2);

        // Calibrated readings lie on a sphere.
        let raw = Vec3::new(12. + 40., -7. + 5., 20.);
        let cal_v = crate::cal::apply_cal_magnetic(raw, &fit.soft_iron, fit.hard_iron);
        assert_abs_diff_eq!(cal_v.magnitude(), fit.field_strength, epsilon = 1e-2);
    }

    #[test]
    fn too_few_samples() {
        let mut cal = MagCalibrator::default();
        for _ in 0..5 {
            cal.add_sample(Vec3::new(1., 2., 3.), Vec3::new(0., 0., 1.));
        }
        assert_eq!(cal.fit().err(), Some(AhrsError::DegenerateFit));
    }

    #[test]
    fn planar_samples_are_degenerate() {
        let mut cal = MagCalibrator::default();
        for j in 0..36 {
            let a = TAU * j as f64 / 36.;
            let p = Vec3::new(a.cos() as f32 * 40., a.sin() as f32 * 40., 0.);
            cal.add_sample(p, Vec3::new(0., 0., 1.));
        }
        assert_eq!(cal.fit().err(), Some(AhrsError::DegenerateFit));
    }

    #[test]
    fn zero_readings_skipped() {
        let mut cal = MagCalibrator::default();
        cal.add_sample(Vec3::new_zero(), Vec3::new(0., 0., 1.));
        cal.add_sample(Vec3::new(f32::NAN, 0., 1.), Vec3::new(0., 0., 1.));
        assert_eq!(cal.num_samples(), 0);

        cal.add_sample(Vec3::new(1., 0., 0.), Vec3::new(0., -2., 0.5));
        assert_eq!(cal.coverage(), [0, 0, 0, 1, 0, 0]);

        cal.clear();
        assert_eq!(cal.num_samples(), 0);
    }
}
