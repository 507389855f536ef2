//! Motor Control Task
//!
//! One instance per wheel. Each step it:
//! 1. acknowledges a new path segment, restarting its test clock
//! 2. picks up a new speed setpoint (zero disables the speed loop)
//! 3. samples the encoder and publishes wheel angle and speed
//! 4. runs the speed loop and drives the motor, unless the current test has
//!    completed
//! 5. logs time, angle and speed samples while a data transfer is running
//!
//! A logged test ends when its duration runs out or when a sample queue
//! fills; either way the motor stops, the test is marked complete and the
//! data transfer task takes over the queues. The first wheel to end a test
//! stops on the spot and the other stops on its next step, so neither wheel
//! keeps the last test effort.
//!
//! # Segment acknowledgement
//! The path director sets the acknowledgement count to the number of motor
//! routines when it enters a segment. Each motor routine that sees a nonzero
//! count takes one off. The two routines share a priority and a period, so
//! the scheduler runs them back to back and each takes exactly one.

use embassy_time::{Duration, Instant};
use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::SetDutyCycle;

use crate::control::closed_loop::ClosedLoop;
use crate::sensor::battery::Battery;
use crate::sensor::encoder::Encoder;
use crate::system::error::Error;
use crate::system::hardware::{AnalogInput, QuadratureCounter};
use crate::system::scheduler::Routine;
use crate::system::shares::{Shares, Side};
use crate::system::tuning::Tuning;
use crate::task::motor_driver::{Motor, MAX_EFFORT};

/// Motor control period; the speed loop assumes it before the encoder has
/// timed two samples
pub const MOTOR_PERIOD: Duration = Duration::from_millis(20);

/// Runs over which a new wheel speed is ramped in
pub const WHEEL_RAMP_STEPS: u16 = 75;

pub struct MotorControl<'a, P, D, S, Q, A> {
    side: Side,
    motor: Motor<P, D, S>,
    encoder: Encoder<Q>,
    speed_loop: ClosedLoop,
    battery: &'a Battery<A>,
    shares: &'a Shares,
    tuning: &'a Tuning,
    /// Longest a logged test may run; `None` runs until the queues fill
    test_duration: Option<Duration>,
    test_start: Instant,
    /// This wheel has logged samples for the running test
    logging: bool,
    queues_were_full: bool,
    done: bool,
}

impl<'a, P, D, S, Q, A> MotorControl<'a, P, D, S, Q, A>
where
    P: SetDutyCycle,
    D: OutputPin,
    S: OutputPin,
    Q: QuadratureCounter,
    A: AnalogInput,
{
    /// Wake the motor and zero the encoder
    pub fn new(
        side: Side,
        mut motor: Motor<P, D, S>,
        mut encoder: Encoder<Q>,
        battery: &'a Battery<A>,
        shares: &'a Shares,
        tuning: &'a Tuning,
        now: Instant,
    ) -> Result<Self, Error> {
        motor.enable()?;
        encoder.zero(now);
        // Off until the first nonzero setpoint, or the start offset alone
        // would creep the wheel
        let mut speed_loop =
            ClosedLoop::new(MAX_EFFORT, tuning.wheel_gains(side), MOTOR_PERIOD).with_ramp(WHEEL_RAMP_STEPS);
        speed_loop.disable();

        Ok(Self {
            side,
            motor,
            encoder,
            speed_loop,
            battery,
            shares,
            tuning,
            test_duration: None,
            test_start: now,
            logging: false,
            queues_were_full: false,
            done: false,
        })
    }

    /// Cap every logged test at `duration`
    pub fn with_test_duration(mut self, duration: Duration) -> Self {
        self.test_duration = Some(duration);
        self
    }

    pub fn speed_loop(&self) -> &ClosedLoop {
        &self.speed_loop
    }

    pub fn encoder(&self) -> &Encoder<Q> {
        &self.encoder
    }

    fn stop(&mut self) -> Result<(), Error> {
        self.speed_loop.reset();
        self.speed_loop.disable();
        self.motor.set_effort(0.0)
    }

    /// End the current test and hand the queues to the data transfer task
    fn complete_test(&mut self, stop_motor: bool) -> Result<(), Error> {
        self.done = true;
        self.logging = false;
        self.shares.test_complete.put(true);
        self.shares.data_transfer.put(false);
        if stop_motor {
            debug!("{} wheel test complete, stopping", self.side);
            self.stop()?;
        }
        Ok(())
    }

    fn charge(&self) -> Result<Option<f32>, Error> {
        match self.battery.percentage() {
            Ok(charge) => Ok(Some(charge)),
            Err(Error::NoBattery) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn log_sample(&mut self, now: Instant) {
        let samples = &self.shares.wheel(self.side).samples;
        let elapsed = now.saturating_duration_since(self.test_start).as_micros();
        samples.time.push(elapsed.min(u64::from(u32::MAX)) as u32);
        samples.position.push(self.encoder.position());
        samples.velocity.push(self.encoder.velocity());
    }
}

impl<P, D, S, Q, A> Routine for MotorControl<'_, P, D, S, Q, A>
where
    P: SetDutyCycle,
    D: OutputPin,
    S: OutputPin,
    Q: QuadratureCounter,
    A: AnalogInput,
{
    fn step(&mut self, now: Instant) -> Result<(), Error> {
        let shares = self.shares;
        let wheel = shares.wheel(self.side);

        if shares.segment_ack.get() > 0 {
            shares.segment_ack.update(|n| n.saturating_sub(1));
            self.test_start = now;
            shares.test_complete.put(false);
            self.queues_were_full = false;
            self.logging = false;
            self.done = false;
        }

        if let Some(speed) = wheel.setpoint.take() {
            if speed == 0.0 {
                self.stop()?;
            } else {
                self.speed_loop.enable();
            }
            self.speed_loop.set_ref(speed);
        }

        self.encoder.update(now);
        wheel.position.put(self.encoder.position());
        wheel.velocity.put(self.encoder.velocity());

        if !shares.test_complete.get() {
            if self.speed_loop.is_enabled() {
                self.speed_loop.gain_update(self.tuning.wheel_gains(self.side));
                let charge = self.charge()?;
                let effort = self.speed_loop.run(&mut self.encoder, charge)?;
                self.motor.set_effort(effort)?;
            }

            if shares.data_transfer.get() {
                self.logging = true;
                let elapsed = now.saturating_duration_since(self.test_start);
                let in_time = self.test_duration.map_or(true, |limit| elapsed <= limit);
                if in_time {
                    if wheel.samples.any_full() {
                        self.queues_were_full = true;
                        self.complete_test(true)?;
                    }
                    if !self.queues_were_full {
                        self.log_sample(now);
                    }
                } else {
                    self.complete_test(true)?;
                }
            }
        } else if !self.done {
            // The other wheel ended a test this one was logging too
            let logged = self.logging;
            self.complete_test(logged)?;
        }

        wheel.effort.put(self.motor.effort());
        Ok(())
    }

    fn halt(&mut self) {
        if self.motor.set_effort(0.0).and_then(|_| self.motor.disable()).is_err() {
            error!("{} motor did not stop", self.side);
        }
        self.shares.wheel(self.side).effort.put(0.0);
    }
}
