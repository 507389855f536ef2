//! Wheel encoder
//!
//! Turns a free-running quadrature counter into wheel angle and wheel surface
//! speed. The counter is sampled once per motor control step.
//!
//! # Conventions
//! - The counters on the Romi count down when the wheel drives the robot
//!   forward, so angle and speed are reported with the sign flipped.
//! - Angle is in rad at the wheel, speed in mm/s at the tyre.
//! - A counter wrap between two samples is folded back into the short step.

use embassy_time::{Duration, Instant};

use crate::sensor::{unwrap_ticks, SampleTimer, Sensor};
use crate::system::error::Error;
use crate::system::hardware::QuadratureCounter;
use crate::system::romi::{RADIANS_PER_TICK, WHEEL_RADIUS};

pub struct Encoder<Q> {
    counter: Q,
    prev_count: u32,
    /// Wheel rotation during the last sample interval, counter direction (rad)
    delta: f32,
    /// Accumulated rotation, counter direction (rad)
    angle: f32,
    timer: SampleTimer,
}

impl<Q: QuadratureCounter> Encoder<Q> {
    pub fn new(mut counter: Q) -> Self {
        let prev_count = counter.count();
        Self {
            counter,
            prev_count,
            delta: 0.0,
            angle: 0.0,
            timer: SampleTimer::new(),
        }
    }

    /// Sample the counter
    pub fn update(&mut self, now: Instant) {
        let count = self.counter.count();
        let raw = i64::from(count) - i64::from(self.prev_count);
        self.prev_count = count;

        let ticks = unwrap_ticks(raw, self.counter.modulus());
        self.delta = ticks as f32 * RADIANS_PER_TICK;
        self.angle += self.delta;
        self.timer.tick(now);
    }

    /// Wheel angle in rad, positive forward
    pub fn position(&self) -> f32 {
        -self.angle
    }

    pub fn set_position(&mut self, position: f32) {
        self.angle = -position;
    }

    /// Tyre surface speed in mm/s over the last sample interval, positive
    /// forward
    pub fn velocity(&self) -> f32 {
        let dt_us = self.timer.dt().as_micros();
        if self.delta == 0.0 || dt_us == 0 {
            return 0.0;
        }
        -(self.delta * WHEEL_RADIUS * 1e6) / dt_us as f32
    }

    /// Restart from zero angle at the current count
    pub fn zero(&mut self, now: Instant) {
        self.angle = 0.0;
        self.delta = 0.0;
        self.prev_count = self.counter.count();
        self.timer.restart(now);
    }
}

impl<Q: QuadratureCounter> Sensor for Encoder<Q> {
    fn get_data(&mut self) -> Result<f32, Error> {
        Ok(self.velocity())
    }

    fn dt(&self) -> Duration {
        self.timer.dt()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use core::cell::Cell;

    /// Counter fake whose count the test moves by hand
    pub struct FakeCounter<'c> {
        pub count: &'c Cell<u32>,
        pub modulus: u32,
    }

    impl QuadratureCounter for FakeCounter<'_> {
        fn count(&mut self) -> u32 {
            self.count.get()
        }

        fn modulus(&self) -> u32 {
            self.modulus
        }
    }

    #[test]
    fn reverse_counting_reads_as_forward_motion() {
        let count = Cell::new(0);
        let mut encoder = Encoder::new(FakeCounter { count: &count, modulus: 65_536 });
        encoder.zero(Instant::from_millis(0));

        // 100 ticks down across the wrap
        count.set(65_436);
        encoder.update(Instant::from_millis(20));

        let expected_angle = 100.0 * RADIANS_PER_TICK;
        assert!((encoder.position() - expected_angle).abs() < 1e-6);

        let expected_speed = expected_angle * WHEEL_RADIUS / 0.020;
        assert!((encoder.velocity() - expected_speed).abs() < 1e-2);
        assert_eq!(encoder.dt(), Duration::from_millis(20));
        assert!((encoder.get_data().unwrap() - expected_speed).abs() < 1e-2);
    }

    #[test]
    fn standing_still_has_zero_speed() {
        let count = Cell::new(1234);
        let mut encoder = Encoder::new(FakeCounter { count: &count, modulus: 65_536 });
        encoder.update(Instant::from_millis(0));
        encoder.update(Instant::from_millis(20));
        assert_eq!(encoder.velocity(), 0.0);
        assert_eq!(encoder.position(), 0.0);
    }

    #[test]
    fn set_position_round_trips_through_sign_flip() {
        let count = Cell::new(0);
        let mut encoder = Encoder::new(FakeCounter { count: &count, modulus: 1437 });
        encoder.set_position(2.5);
        assert_eq!(encoder.position(), 2.5);

        count.set(10);
        encoder.update(Instant::from_millis(20));
        assert!((encoder.position() - (2.5 - 10.0 * RADIANS_PER_TICK)).abs() < 1e-6);
    }
}
