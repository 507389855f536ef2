//! IMU heading
//!
//! The IMU heading register wraps once per turn. This sensor unwraps it into
//! a continuous heading so that a controller can ask for, say, three half
//! turns without the reference ever jumping. The unwrapping uses the same
//! fold as the wheel encoders, with a full turn as the modulus.
//!
//! The heading is shared between the observer (input), the path director
//! (heading controller feedback, heading overrides) and calibration, so it is
//! wrapped in [`SharedHeading`].

use core::cell::RefCell;
use core::f32::consts::TAU;

use embassy_sync::blocking_mutex::{raw::NoopRawMutex, Mutex};
use embassy_time::{Duration, Instant};

use crate::sensor::{wrap_angle, SampleTimer, Sensor};
use crate::system::calibration::{parse_row, write_row, CalibrationStore, Record, IMU_RECORD};
use crate::system::error::Error;
use crate::system::hardware::{HeadingImu, IMU_COEFFICIENTS};

/// Calibration status bits that must be set: gyro (bits 4-5) and
/// magnetometer (bits 0-1)
pub const CALIBRATED_MASK: u8 = 0b0011_0011;

/// Continuous heading from a wrapping IMU heading register
pub struct HeadingSensor<I> {
    imu: I,
    prev_register: f32,
    heading: f32,
    calibrated: bool,
    last_status: u8,
    timer: SampleTimer,
}

impl<I: HeadingImu> HeadingSensor<I> {
    pub fn new(imu: I) -> Self {
        Self {
            imu,
            prev_register: 0.0,
            heading: 0.0,
            calibrated: false,
            last_status: 0,
            timer: SampleTimer::new(),
        }
    }

    /// Read the register and fold its change into the heading
    pub fn sample(&mut self, now: Instant) -> Result<f32, Error> {
        let register = self.imu.heading()?;
        let delta = register - self.prev_register;
        self.prev_register = register;
        self.heading += wrap_angle(delta);
        self.timer.tick(now);
        Ok(self.heading)
    }

    /// Last unwrapped heading without touching the bus
    pub fn heading(&self) -> f32 {
        self.heading
    }

    /// Declare the current orientation to be `heading`
    pub fn set_heading(&mut self, heading: f32) -> Result<(), Error> {
        self.prev_register = self.imu.heading()?;
        self.heading = heading;
        Ok(())
    }

    /// Yaw rate in rad/s
    pub fn yaw_rate(&mut self) -> Result<f32, Error> {
        self.imu.yaw_rate()
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Advance IMU calibration by one step. Returns `true` once calibrated.
    ///
    /// Stored coefficients are written straight to the IMU. Without them the
    /// status register is polled, one read per call, until the gyro and
    /// magnetometer report calibrated, and the coefficients are saved.
    pub fn calibrate(&mut self, store: &mut impl CalibrationStore) -> Result<bool, Error> {
        if self.calibrated {
            return Ok(true);
        }

        if let Some(record) = store.load(IMU_RECORD)? {
            let coefficients: [i16; IMU_COEFFICIENTS] = parse_row(&record)?;
            self.imu.write_coefficients(&coefficients)?;
            info!("found IMU calibration, skipping calibration");
            self.calibrated = true;
            return Ok(true);
        }

        let status = self.imu.calibration_status()?;
        if status != self.last_status {
            debug!("IMU calibration status {=u8:b}", status);
            self.last_status = status;
        }
        if status & CALIBRATED_MASK != CALIBRATED_MASK {
            return Ok(false);
        }

        let coefficients = self.imu.read_coefficients()?;
        let mut record = Record::new();
        write_row(&mut record, &coefficients)?;
        store.save(IMU_RECORD, &record)?;
        info!("IMU calibration coefficients saved");
        self.calibrated = true;
        Ok(true)
    }
}

impl<I: HeadingImu> Sensor for HeadingSensor<I> {
    fn get_data(&mut self) -> Result<f32, Error> {
        self.sample(Instant::now())
    }

    fn dt(&self) -> Duration {
        self.timer.dt()
    }
}

/// Heading sensor shared between routines
pub struct SharedHeading<I> {
    inner: Mutex<NoopRawMutex, RefCell<HeadingSensor<I>>>,
}

impl<I: HeadingImu> SharedHeading<I> {
    pub fn new(sensor: HeadingSensor<I>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(sensor)),
        }
    }

    /// Run `f` with exclusive access to the sensor
    pub fn with<R>(&self, f: impl FnOnce(&mut HeadingSensor<I>) -> R) -> R {
        self.inner.lock(|sensor| f(&mut sensor.borrow_mut()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::system::calibration::MemoryStore;
    use core::cell::Cell;
    use core::f32::consts::PI;

    /// IMU fake driven by cells the test controls
    pub struct FakeImu<'c> {
        pub register: &'c Cell<f32>,
        pub yaw_rate: f32,
        pub status: u8,
        pub written: Option<[i16; IMU_COEFFICIENTS]>,
    }

    impl<'c> FakeImu<'c> {
        pub fn new(register: &'c Cell<f32>) -> Self {
            Self {
                register,
                yaw_rate: 0.0,
                status: 0,
                written: None,
            }
        }
    }

    impl HeadingImu for FakeImu<'_> {
        fn heading(&mut self) -> Result<f32, Error> {
            Ok(self.register.get())
        }

        fn yaw_rate(&mut self) -> Result<f32, Error> {
            Ok(self.yaw_rate)
        }

        fn calibration_status(&mut self) -> Result<u8, Error> {
            Ok(self.status)
        }

        fn read_coefficients(&mut self) -> Result<[i16; IMU_COEFFICIENTS], Error> {
            Ok([1, 2, 3, 4, 5, 6, 7, 8, 9, 1000, 640])
        }

        fn write_coefficients(&mut self, coefficients: &[i16; IMU_COEFFICIENTS]) -> Result<(), Error> {
            self.written = Some(*coefficients);
            Ok(())
        }
    }

    #[test]
    fn heading_unwraps_across_register_wrap() {
        let register = Cell::new(0.0);
        let mut sensor = HeadingSensor::new(FakeImu::new(&register));
        sensor.set_heading(0.0).unwrap();

        // Six counter-clockwise quarter turns, the register wrapping at 2π
        for step in 1..=6u64 {
            register.set((step as f32 * PI / 2.0).rem_euclid(TAU));
            sensor.sample(Instant::from_millis(20 * step)).unwrap();
        }
        assert!((sensor.heading() - 3.0 * PI).abs() < 1e-4);
        assert_eq!(sensor.dt(), Duration::from_millis(20));
    }

    #[test]
    fn clockwise_turn_goes_negative() {
        let register = Cell::new(0.1);
        let mut sensor = HeadingSensor::new(FakeImu::new(&register));
        sensor.set_heading(0.0).unwrap();

        let mut angle: f32 = 0.1;
        for step in 1..=8u64 {
            angle -= 0.5;
            register.set(angle.rem_euclid(TAU));
            sensor.sample(Instant::from_millis(20 * step)).unwrap();
        }
        assert!((sensor.heading() + 4.0).abs() < 1e-4);
    }

    #[test]
    fn set_heading_rebases_without_jump() {
        let register = Cell::new(2.0);
        let mut sensor = HeadingSensor::new(FakeImu::new(&register));
        sensor.set_heading(-PI / 2.0).unwrap();
        assert_eq!(sensor.heading(), -PI / 2.0);

        register.set(2.1);
        let heading = sensor.sample(Instant::from_millis(20)).unwrap();
        assert!((heading - (-PI / 2.0 + 0.1)).abs() < 1e-5);
    }

    #[test]
    fn calibration_polls_status_then_saves() {
        let register = Cell::new(0.0);
        let mut sensor = HeadingSensor::new(FakeImu::new(&register));
        let mut store: MemoryStore<2> = MemoryStore::new();

        sensor.imu.status = 0b0011_0000;
        assert!(!sensor.calibrate(&mut store).unwrap());
        sensor.imu.status = 0b1111_0011;
        assert!(sensor.calibrate(&mut store).unwrap());
        assert_eq!(
            store.load(IMU_RECORD).unwrap().unwrap().as_str(),
            "1,2,3,4,5,6,7,8,9,1000,640\n"
        );

        let mut restored = HeadingSensor::new(FakeImu::new(&register));
        assert!(restored.calibrate(&mut store).unwrap());
        assert_eq!(restored.imu.written, Some([1, 2, 3, 4, 5, 6, 7, 8, 9, 1000, 640]));
    }

    #[test]
    fn short_coefficient_record_is_fatal() {
        let register = Cell::new(0.0);
        let mut sensor = HeadingSensor::new(FakeImu::new(&register));
        let mut store: MemoryStore<2> = MemoryStore::new();
        store.save(IMU_RECORD, "1,2,3\n").unwrap();
        assert_eq!(
            sensor.calibrate(&mut store),
            Err(Error::CalibrationLength { expected: IMU_COEFFICIENTS, found: 3 })
        );
    }
}
