//! Error types for the AHRS. All of these are caller-input errors: they're detected
//! synchronously, before any filter state is modified.

use core::fmt;

/// Result type for AHRS operations.
pub type Result<T> = core::result::Result<T, AhrsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AhrsError {
    /// The timestep was zero, negative, NaN or infinite.
    InvalidTimestep,
    /// A sensor vector contained a NaN or infinite component.
    InvalidSample,
    /// A vector that must be normalized had near-zero magnitude; eg the accelerometer and
    /// magnetometer were both zero on the same update.
    DegenerateVector,
    /// A gain or configuration value was out of range.
    InvalidConfig,
    /// Magnetometer calibration samples didn't describe an ellipsoid.
    DegenerateFit,
}

impl AhrsError {
    /// Variant name as a static string. Usable with `defmt` without the `Display` machinery.
    pub fn as_str(&self) -> &'static str {
        match self {
            AhrsError::InvalidTimestep => "InvalidTimestep",
            AhrsError::InvalidSample => "InvalidSample",
            AhrsError::DegenerateVector => "DegenerateVector",
            AhrsError::InvalidConfig => "InvalidConfig",
            AhrsError::DegenerateFit => "DegenerateFit",
        }
    }
}

impl fmt::Display for AhrsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AhrsError::InvalidTimestep => write!(f, "timestep must be finite and greater than 0"),
            AhrsError::InvalidSample => write!(f, "sensor sample contains a NaN or infinite value"),
            AhrsError::DegenerateVector => write!(f, "vector magnitude too small to normalize"),
            AhrsError::InvalidConfig => write!(f, "invalid AHRS configuration"),
            AhrsError::DegenerateFit => write!(f, "magnetometer samples don't fit an ellipsoid"),
        }
    }
}

impl core::error::Error for AhrsError {}
