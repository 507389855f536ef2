//! BNO055 absolute orientation sensor over I2C
//!
//! Driven through the `bno055` crate in NDOF fusion mode. The crate reports
//! Euler angles and angular rate in degrees; the heading is turned into
//! radians increasing counter-clockwise.

use bno055::{BNO055Calibration, BNO055OperationMode, Bno055};
use embassy_time::Delay;
use embedded_hal::i2c::I2c;
use romi_firmware::system::error::Error;
use romi_firmware::system::hardware::{HeadingImu, IMU_COEFFICIENTS};

/// Offset and radius registers, little-endian
const OFFSET_BYTES: usize = 2 * IMU_COEFFICIENTS;

pub struct Imu<B> {
    sensor: Bno055<B>,
    delay: Delay,
}

impl<B: I2c> Imu<B> {
    /// Check the chip and start fusion
    pub fn new(bus: B) -> Result<Self, Error> {
        // COM3 is low on the Romi board
        let mut sensor = Bno055::new(bus).with_alternative_address();
        let mut delay = Delay;
        sensor.init(&mut delay).map_err(|e| {
            defmt::error!("IMU init failed: {}", defmt::Debug2Format(&e));
            Error::Sensor
        })?;
        sensor
            .set_mode(BNO055OperationMode::NDOF, &mut delay)
            .map_err(|_| Error::Sensor)?;
        Ok(Self { sensor, delay })
    }
}

impl<B: I2c> HeadingImu for Imu<B> {
    fn heading(&mut self) -> Result<f32, Error> {
        let angles = self.sensor.euler_angles().map_err(|_| Error::Sensor)?;
        // The Euler heading increases clockwise
        Ok(-angles.c.to_radians())
    }

    fn yaw_rate(&mut self) -> Result<f32, Error> {
        let rate = self.sensor.gyro_data().map_err(|_| Error::Sensor)?;
        Ok(rate.z.to_radians())
    }

    fn calibration_status(&mut self) -> Result<u8, Error> {
        let status = self.sensor.get_calibration_status().map_err(|_| Error::Sensor)?;
        Ok((status.sys << 6) | (status.gyr << 4) | (status.acc << 2) | status.mag)
    }

    fn read_coefficients(&mut self) -> Result<[i16; IMU_COEFFICIENTS], Error> {
        let profile = self
            .sensor
            .calibration_profile(&mut self.delay)
            .map_err(|_| Error::Sensor)?;
        let bytes = profile.as_bytes();
        if bytes.len() != OFFSET_BYTES {
            return Err(Error::CalibrationLength {
                expected: OFFSET_BYTES,
                found: bytes.len(),
            });
        }
        let mut coefficients = [0; IMU_COEFFICIENTS];
        for (value, pair) in coefficients.iter_mut().zip(bytes.chunks_exact(2)) {
            *value = i16::from_le_bytes([pair[0], pair[1]]);
        }
        Ok(coefficients)
    }

    fn write_coefficients(&mut self, coefficients: &[i16; IMU_COEFFICIENTS]) -> Result<(), Error> {
        let mut bytes = [0; OFFSET_BYTES];
        for (pair, value) in bytes.chunks_exact_mut(2).zip(coefficients) {
            pair.copy_from_slice(&value.to_le_bytes());
        }
        self.sensor
            .set_calibration_profile(BNO055Calibration::from_buf(&bytes), &mut self.delay)
            .map_err(|_| Error::Sensor)
    }
}
