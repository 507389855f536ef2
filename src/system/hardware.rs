//! Hardware boundary
//!
//! The control code never touches peripherals directly. The board layer
//! implements these traits for the RP2350 peripherals, and the tests
//! implement them with fakes.
//!
//! Motor outputs use the `embedded-hal` pin and PWM traits instead.

use crate::system::error::Error;

/// Free-running quadrature tick counter
pub trait QuadratureCounter {
    /// Current raw count in `0..modulus()`
    fn count(&mut self) -> u32;

    /// Number of distinct counter values before it wraps
    fn modulus(&self) -> u32;
}

/// Single analog channel, e.g. the battery divider or one reflectance sensor
pub trait AnalogInput {
    /// Raw 12-bit conversion result
    fn read_raw(&mut self) -> Result<u16, Error>;
}

/// Number of calibration coefficients the IMU exposes
pub const IMU_COEFFICIENTS: usize = 11;

/// Absolute orientation IMU
pub trait HeadingImu {
    /// Heading register in radians. The register wraps every full turn and
    /// increases counter-clockwise.
    fn heading(&mut self) -> Result<f32, Error>;

    /// Yaw rate in rad/s
    fn yaw_rate(&mut self) -> Result<f32, Error>;

    /// Raw calibration status byte (system, gyro, accel, mag: two bits each)
    fn calibration_status(&mut self) -> Result<u8, Error>;

    /// Offsets and radii found by the IMU's own calibration
    fn read_coefficients(&mut self) -> Result<[i16; IMU_COEFFICIENTS], Error>;

    /// Restore previously saved offsets and radii
    fn write_coefficients(&mut self, coefficients: &[i16; IMU_COEFFICIENTS]) -> Result<(), Error>;
}

/// Byte stream from the operator link
pub trait ByteSource {
    /// Next received byte, if any, without waiting
    fn read_byte(&mut self) -> Option<u8>;
}
