//! Closed-loop controller
//!
//! One controller type drives every loop on the robot: wheel speed, line
//! centroid and heading. Each invocation of [`ClosedLoop::run`] reads the
//! sensor once and produces one saturated actuation value.
//!
//! # Control law
//! ```text
//! r_eff = r · min(i, N) / N           soft-start ramp, i counts runs since reset
//! e     = r_eff - x_h
//! I    += e · dt                      only when Ki != 0
//! D     = (e - e_prev) / dt           only when Kd != 0
//! a     = Kdroop · (Kp·e + Ki·I + Kd·D + Kff·r_eff + sign(r)·PWM_start)
//! a*    = clamp(a, -max, max)
//! I    -= (a - a*) · Kw               only when Kw != 0
//! ```
//!
//! The start offset takes its sign from the raw reference, so a reference
//! that reverses in the middle of a ramp gets a feed-forward push in the new
//! direction straight away while the proportional and integral terms still
//! see the ramped value.
//!
//! `dt` is the sensor's own sample interval. On the first run after
//! construction or [`ClosedLoop::reset`], and whenever the sensor has not yet
//! timed two samples, the nominal task period is used instead.

use embassy_time::Duration;

use crate::sensor::Sensor;
use crate::system::error::Error;
use crate::system::tuning::Gains;

/// PID controller with feed-forward, anti-windup, battery droop compensation
/// and a soft-start reference ramp
#[derive(Debug, Clone)]
pub struct ClosedLoop {
    limit: f32,
    gains: Gains,
    nominal_dt: f32,
    ramp_steps: u16,
    ramp_count: u16,

    reference: f32,
    effective_ref: f32,
    measured: f32,
    error: f32,
    prev_error: f32,
    integral: f32,
    derivative: f32,
    raw: f32,
    saturated: f32,

    enabled: bool,
    first_run: bool,
}

impl ClosedLoop {
    /// Controller saturating at `±limit`, assuming `period` between runs
    /// until the sensor can time its samples. Starts enabled, without a
    /// reference ramp.
    pub fn new(limit: f32, gains: Gains, period: Duration) -> Self {
        Self {
            limit,
            gains,
            nominal_dt: period.as_micros() as f32 / 1e6,
            ramp_steps: 0,
            ramp_count: 0,
            reference: 0.0,
            effective_ref: 0.0,
            measured: 0.0,
            error: 0.0,
            prev_error: 0.0,
            integral: 0.0,
            derivative: 0.0,
            raw: 0.0,
            saturated: 0.0,
            enabled: true,
            first_run: true,
        }
    }

    /// Ramp the reference in over `steps` runs after every reset
    pub fn with_ramp(mut self, steps: u16) -> Self {
        self.ramp_steps = steps;
        self
    }

    /// Set the target reference. Integral and derivative state are kept.
    pub fn set_ref(&mut self, reference: f32) {
        self.reference = reference;
    }

    /// Zero the reference and the error history, and restart the ramp
    pub fn reset(&mut self) {
        self.reference = 0.0;
        self.effective_ref = 0.0;
        self.error = 0.0;
        self.prev_error = 0.0;
        self.integral = 0.0;
        self.derivative = 0.0;
        self.ramp_count = 0;
        self.first_run = true;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Stop producing output. State is frozen until re-enabled.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Swap in new gains for the next run
    pub fn gain_update(&mut self, gains: Gains) {
        self.gains = gains;
    }

    pub fn gains(&self) -> Gains {
        self.gains
    }

    pub fn reference(&self) -> f32 {
        self.reference
    }

    /// Reference used by the last run, after ramping
    pub fn effective_reference(&self) -> f32 {
        self.effective_ref
    }

    /// Last measurement
    pub fn measured(&self) -> f32 {
        self.measured
    }

    pub fn error(&self) -> f32 {
        self.error
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    pub fn derivative(&self) -> f32 {
        self.derivative
    }

    /// Actuation before saturation on the last run
    pub fn raw_actuation(&self) -> f32 {
        self.raw
    }

    /// Run the control law once.
    ///
    /// `charge` is the battery charge as a fraction of nominal; the output is
    /// scaled by its inverse. Pass `None` where the actuator does not sag
    /// with the battery.
    pub fn run(&mut self, sensor: &mut impl Sensor, charge: Option<f32>) -> Result<f32, Error> {
        if !self.enabled {
            return Ok(0.0);
        }

        self.effective_ref = if self.ramp_count < self.ramp_steps {
            self.ramp_count += 1;
            self.reference * f32::from(self.ramp_count) / f32::from(self.ramp_steps)
        } else {
            self.reference
        };

        self.measured = sensor.get_data()?;
        self.prev_error = self.error;
        self.error = self.effective_ref - self.measured;

        let sensor_dt = sensor.dt();
        let dt = if self.first_run || sensor_dt.as_ticks() == 0 {
            self.nominal_dt
        } else {
            sensor_dt.as_micros() as f32 / 1e6
        };
        self.first_run = false;

        let Gains {
            kp,
            ki,
            kd,
            kw,
            kff,
            pwm_start,
        } = self.gains;

        if ki != 0.0 {
            self.integral += self.error * dt;
        }
        if kd != 0.0 {
            self.derivative = (self.error - self.prev_error) / dt;
        }

        let droop = match charge {
            Some(charge) if charge > 0.0 => 1.0 / charge,
            _ => 1.0,
        };

        self.raw = droop
            * (kp * self.error
                + ki * self.integral
                + kd * self.derivative
                + kff * self.effective_ref
                + libm::copysignf(1.0, self.reference) * pwm_start);
        self.saturated = self.raw.clamp(-self.limit, self.limit);

        if kw != 0.0 {
            self.integral -= (self.raw - self.saturated) * kw;
        }

        trace!(
            "r {} x {} e {} I {} a {}",
            self.effective_ref,
            self.measured,
            self.error,
            self.integral,
            self.saturated
        );
        Ok(self.saturated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_millis(20);

    /// Sensor returning whatever the test puts in it
    struct FixedSensor {
        value: f32,
        dt: Duration,
    }

    impl FixedSensor {
        fn new(value: f32) -> Self {
            Self { value, dt: PERIOD }
        }
    }

    impl Sensor for FixedSensor {
        fn get_data(&mut self) -> Result<f32, Error> {
            Ok(self.value)
        }

        fn dt(&self) -> Duration {
            self.dt
        }
    }

    #[test]
    fn single_step_matches_hand_computed_output() {
        let gains = Gains {
            kp: 0.1,
            ki: 1.0,
            kff: 0.1,
            pwm_start: 2.0,
            ..Gains::default()
        };
        let mut controller = ClosedLoop::new(1000.0, gains, PERIOD);
        let mut sensor = FixedSensor::new(0.0);
        controller.set_ref(500.0);

        let a = controller.run(&mut sensor, None).unwrap();

        let e: f32 = 500.0;
        let integral: f32 = e * 0.020;
        let expected = 1.0 * (0.1 * e + 1.0 * integral + 0.0 * 0.0 + 0.1 * 500.0 + 1.0 * 2.0);
        assert_eq!(a, expected);
        assert!((a - 112.0).abs() < 1e-3);
        assert_eq!(controller.integral(), integral);
    }

    #[test]
    fn ramp_scales_reference_linearly_then_holds() {
        let mut controller = ClosedLoop::new(100.0, Gains::pid(0.01, 0.0, 0.0), PERIOD).with_ramp(4);
        let mut sensor = FixedSensor::new(0.0);
        controller.set_ref(100.0);

        for i in 1..=4 {
            controller.run(&mut sensor, None).unwrap();
            assert_eq!(controller.effective_reference(), 100.0 * i as f32 / 4.0);
        }
        for _ in 0..3 {
            controller.run(&mut sensor, None).unwrap();
            assert_eq!(controller.effective_reference(), 100.0);
        }

        // Reset restarts the ramp
        controller.reset();
        controller.set_ref(100.0);
        controller.run(&mut sensor, None).unwrap();
        assert_eq!(controller.effective_reference(), 25.0);
    }

    #[test]
    fn start_offset_follows_raw_reference_when_it_reverses_mid_ramp() {
        let gains = Gains {
            kff: 0.1,
            pwm_start: 5.0,
            ..Gains::default()
        };
        let mut controller = ClosedLoop::new(100.0, gains, PERIOD).with_ramp(10);
        let mut sensor = FixedSensor::new(0.0);

        controller.set_ref(200.0);
        for _ in 0..4 {
            controller.run(&mut sensor, None).unwrap();
        }
        assert_eq!(controller.effective_reference(), 80.0);

        // The ramp keeps counting; only the target flips
        controller.set_ref(-200.0);
        let a = controller.run(&mut sensor, None).unwrap();
        assert_eq!(controller.effective_reference(), -100.0);
        assert!((a - (0.1 * -100.0 - 5.0)).abs() < 1e-5);

        // The first ramp step is tiny but the offset is applied in full
        controller.reset();
        controller.set_ref(-1.0);
        let a = controller.run(&mut sensor, None).unwrap();
        assert!(a < -4.9);
    }

    #[test]
    fn anti_windup_bounds_integral_under_saturation() {
        let gains = Gains {
            kp: 0.05,
            ki: 0.05,
            kw: 0.10,
            kff: 0.075,
            pwm_start: 5.5,
            ..Gains::default()
        };
        let mut controller = ClosedLoop::new(100.0, gains, PERIOD);
        let mut sensor = FixedSensor::new(0.0);
        controller.set_ref(10_000.0);

        let mut history = [0.0f32; 1000];
        for slot in history.iter_mut() {
            assert_eq!(controller.run(&mut sensor, None).unwrap(), 100.0);
            *slot = controller.integral();
        }

        // Without back-off the integral would reach 200 000
        assert!(history[999].abs() < 20_000.0);
        assert!(history[999] >= history[499]);
        assert!((history[999] - history[998]).abs() < 1.0);
    }

    #[test]
    fn disabled_controller_outputs_zero_and_keeps_state() {
        let mut controller = ClosedLoop::new(100.0, Gains::pid(0.1, 0.5, 0.01), PERIOD);
        let mut sensor = FixedSensor::new(10.0);
        controller.set_ref(50.0);
        for _ in 0..5 {
            controller.run(&mut sensor, None).unwrap();
        }
        let integral = controller.integral();
        let derivative = controller.derivative();

        controller.disable();
        sensor.value = -300.0;
        for _ in 0..3 {
            assert_eq!(controller.run(&mut sensor, None).unwrap(), 0.0);
        }
        assert_eq!(controller.integral(), integral);
        assert_eq!(controller.derivative(), derivative);
        assert!(!controller.is_enabled());
    }

    #[test]
    fn battery_droop_scales_output() {
        let mut controller = ClosedLoop::new(100.0, Gains::pid(0.1, 0.0, 0.0), PERIOD);
        let mut sensor = FixedSensor::new(0.0);
        controller.set_ref(100.0);
        let full = controller.run(&mut sensor, Some(1.0)).unwrap();
        let sagging = controller.run(&mut sensor, Some(0.8)).unwrap();
        assert!((full - 10.0).abs() < 1e-5);
        assert!((sagging - 12.5).abs() < 1e-5);
    }

    #[test]
    fn first_run_uses_nominal_period_instead_of_untimed_sensor() {
        let mut controller = ClosedLoop::new(1000.0, Gains::pid(0.0, 1.0, 1.0), PERIOD);
        let mut sensor = FixedSensor::new(0.0);
        sensor.dt = Duration::from_ticks(0);
        controller.set_ref(1.0);

        let a = controller.run(&mut sensor, None).unwrap();
        assert!(a.is_finite());
        assert!((controller.derivative() - 1.0 / 0.020).abs() < 1e-2);
        assert!((controller.integral() - 0.020).abs() < 1e-6);
    }

    #[test]
    fn zero_gains_leave_their_terms_untouched() {
        let mut controller = ClosedLoop::new(100.0, Gains::pid(1.0, 0.0, 0.0), PERIOD);
        let mut sensor = FixedSensor::new(0.0);
        controller.set_ref(5.0);
        controller.run(&mut sensor, None).unwrap();
        controller.run(&mut sensor, None).unwrap();
        assert_eq!(controller.integral(), 0.0);
        assert_eq!(controller.derivative(), 0.0);
    }
}
