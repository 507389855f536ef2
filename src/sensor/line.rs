//! Reflectance line sensor array
//!
//! An odd number of reflectance channels sits across the front of the robot
//! at an 8 mm pitch. Each channel reading is normalised between its white
//! and black calibration values, and the array reports the reflectance
//! weighted centroid of the channel positions: 0 when the line is centred,
//! positive when it lies toward the higher numbered (right hand) channels.
//!
//! # Calibration
//! White and black are captured on request, one surface at a time, while the
//! robot sits still. Once both are captured they are saved to the
//! calibration store; a stored table is loaded instead on the next start.

use embassy_time::{Duration, Instant};

use crate::sensor::{SampleTimer, Sensor};
use crate::system::calibration::{parse_row, write_row, CalibrationStore, Record, LINE_RECORD};
use crate::system::error::Error;
use crate::system::hardware::AnalogInput;
use crate::system::romi::IR_PITCH;

/// One reflectance channel
pub struct Reflectance<A> {
    adc: A,
    white: u16,
    black: u16,
    /// Offset from the array centre in mm
    location: f32,
}

impl<A: AnalogInput> Reflectance<A> {
    fn normalised(&mut self) -> Result<f32, Error> {
        let raw = f32::from(self.adc.read_raw()?);
        let white = f32::from(self.white);
        let span = f32::from(self.black) - white;
        let span = if span == 0.0 { 1.0 } else { span };
        Ok((raw - white) / span)
    }
}

/// Array of `N` reflectance channels
pub struct LineSensor<A, const N: usize> {
    channels: [Reflectance<A>; N],
    capture_white: bool,
    capture_black: bool,
    white_done: bool,
    black_done: bool,
    use_stored: bool,
    calibrated: bool,
    timer: SampleTimer,
}

impl<A: AnalogInput, const N: usize> LineSensor<A, N> {
    /// Array of adjacent channels at the sensor pitch
    pub fn new(adcs: [A; N]) -> Self {
        Self::with_pitch(adcs, IR_PITCH)
    }

    /// Array of channels `pitch` mm apart, e.g. every other channel of a
    /// wider board
    pub fn with_pitch(adcs: [A; N], pitch: f32) -> Self {
        let centre = (N as f32 - 1.0) / 2.0;
        let mut index = 0.0;
        let channels = adcs.map(|adc| {
            let location = (index - centre) * pitch;
            index += 1.0;
            Reflectance {
                adc,
                white: 0,
                black: 1,
                location,
            }
        });

        Self {
            channels,
            capture_white: false,
            capture_black: false,
            white_done: false,
            black_done: false,
            use_stored: true,
            calibrated: false,
            timer: SampleTimer::new(),
        }
    }

    /// Capture the white surface on the next calibration step
    pub fn request_white(&mut self) {
        self.capture_white = true;
    }

    /// Capture the black surface on the next calibration step
    pub fn request_black(&mut self) {
        self.capture_black = true;
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Channel offsets from the array centre in mm
    pub fn locations(&self) -> [f32; N] {
        core::array::from_fn(|i| self.channels[i].location)
    }

    /// Drop the current and stored calibration so white and black are
    /// captured again
    pub fn forget(&mut self, store: &mut impl CalibrationStore) -> Result<(), Error> {
        store.remove(LINE_RECORD)?;
        self.use_stored = false;
        self.calibrated = false;
        self.white_done = false;
        self.black_done = false;
        info!("line calibration cleared");
        Ok(())
    }

    /// Advance calibration by one step. Returns `true` once the array is
    /// calibrated.
    pub fn calibrate(&mut self, store: &mut impl CalibrationStore) -> Result<bool, Error> {
        if self.use_stored {
            if let Some(record) = store.load(LINE_RECORD)? {
                let mut lines = record.lines();
                let white: [u16; N] = parse_row(lines.next().unwrap_or(""))?;
                let black: [u16; N] = parse_row(lines.next().unwrap_or(""))?;
                for (channel, (w, b)) in self.channels.iter_mut().zip(white.into_iter().zip(black)) {
                    channel.white = w;
                    channel.black = b;
                }
                info!("found line sensor calibration, skipping calibration");
                self.calibrated = true;
                return Ok(true);
            }
        }

        if self.capture_white && !self.white_done {
            for channel in self.channels.iter_mut() {
                channel.white = channel.adc.read_raw()?;
            }
            self.capture_white = false;
            self.white_done = true;
            info!("white calibration complete");
        }

        if self.capture_black && !self.black_done {
            for channel in self.channels.iter_mut() {
                channel.black = channel.adc.read_raw()?;
            }
            self.capture_black = false;
            self.black_done = true;
            info!("black calibration complete");
        }

        if self.white_done && self.black_done {
            let mut record = Record::new();
            let whites: [u16; N] = core::array::from_fn(|i| self.channels[i].white);
            let blacks: [u16; N] = core::array::from_fn(|i| self.channels[i].black);
            write_row(&mut record, &whites)?;
            write_row(&mut record, &blacks)?;
            store.save(LINE_RECORD, &record)?;

            self.white_done = false;
            self.black_done = false;
            self.use_stored = true;
            self.calibrated = true;
            return Ok(true);
        }

        self.calibrated = false;
        Ok(false)
    }

    /// Reflectance weighted centroid in mm, sampled at `now`
    pub fn centroid(&mut self, now: Instant) -> Result<f32, Error> {
        self.timer.tick(now);

        let mut sum = 0.0;
        let mut weighted = 0.0;
        for channel in self.channels.iter_mut() {
            let value = channel.normalised()?;
            sum += value;
            weighted += channel.location * value;
        }

        if libm::fabsf(sum) < f32::EPSILON {
            // Nothing but white under the array
            return Ok(0.0);
        }
        Ok(weighted / sum)
    }
}

impl<A: AnalogInput, const N: usize> Sensor for LineSensor<A, N> {
    fn get_data(&mut self) -> Result<f32, Error> {
        self.centroid(Instant::now())
    }

    fn dt(&self) -> Duration {
        self.timer.dt()
    }
}
