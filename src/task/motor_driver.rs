//! Motor Driver
//!
//! DRV8838-style H-bridge: one PWM input for speed, one DIR input and an
//! active-low sleep input. The Romi carries one per wheel.
//!
//! # Conventions
//! - effort is a signed percentage of full duty in `[-100, 100]`
//! - DIR low drives forward (effort >= 0), DIR high drives backward
//! - an effort outside the range is a control-law bug and is rejected with
//!   [`Error::EffortOutOfRange`] rather than clamped
//!
//! The driver starts asleep. [`Motor::enable`] wakes it with zero duty.

use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::SetDutyCycle;

use crate::system::error::Error;

/// Largest effort magnitude in %
pub const MAX_EFFORT: f32 = 100.0;

/// One H-bridge channel
pub struct Motor<P, D, S> {
    pwm: P,
    dir: D,
    sleep: S,
    effort: f32,
    enabled: bool,
}

impl<P: SetDutyCycle, D: OutputPin, S: OutputPin> Motor<P, D, S> {
    /// Take the pins and put the driver to sleep
    pub fn new(pwm: P, dir: D, sleep: S) -> Result<Self, Error> {
        let mut motor = Self {
            pwm,
            dir,
            sleep,
            effort: 0.0,
            enabled: false,
        };
        motor.disable()?;
        Ok(motor)
    }

    /// Command a signed effort in %
    pub fn set_effort(&mut self, effort: f32) -> Result<(), Error> {
        // NaN fails the range check too
        if !(-MAX_EFFORT..=MAX_EFFORT).contains(&effort) {
            warn!("rejected motor effort {}", effort);
            return Err(Error::EffortOutOfRange);
        }

        if effort >= 0.0 {
            self.dir.set_low().map_err(|_| Error::Pin)?;
        } else {
            self.dir.set_high().map_err(|_| Error::Pin)?;
        }

        let max = f32::from(self.pwm.max_duty_cycle());
        let duty = (libm::fabsf(effort) / MAX_EFFORT * max) as u16;
        self.pwm.set_duty_cycle(duty).map_err(|_| Error::Pwm)?;
        self.effort = effort;
        Ok(())
    }

    /// Wake the driver with zero duty
    pub fn enable(&mut self) -> Result<(), Error> {
        self.pwm.set_duty_cycle_fully_off().map_err(|_| Error::Pwm)?;
        self.sleep.set_high().map_err(|_| Error::Pin)?;
        self.effort = 0.0;
        self.enabled = true;
        Ok(())
    }

    /// Put the driver to sleep
    pub fn disable(&mut self) -> Result<(), Error> {
        self.sleep.set_low().map_err(|_| Error::Pin)?;
        self.pwm.set_duty_cycle_fully_off().map_err(|_| Error::Pwm)?;
        self.effort = 0.0;
        self.enabled = false;
        Ok(())
    }

    /// Last commanded effort in %
    pub fn effort(&self) -> f32 {
        self.effort
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
