//! Live-tunable controller gains
//!
//! Gains are process-wide: both wheel controllers read the same wheel gain
//! set, each adding its own side's start offset, and the path director reads
//! the line and heading sets. The command task is the only writer. Consumers
//! pick up a change on their next cycle, so a retune lands on the two wheels
//! one task step apart.

use crate::system::share::LocalShare;
use crate::system::shares::Side;

/// One gain set for a closed-loop controller
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Gains {
    /// Proportional gain
    pub kp: f32,
    /// Integral gain
    pub ki: f32,
    /// Derivative gain
    pub kd: f32,
    /// Anti-windup gain
    pub kw: f32,
    /// Feed-forward slope (actuation per unit reference)
    pub kff: f32,
    /// Feed-forward intercept applied in the direction of the reference
    pub pwm_start: f32,
}

impl Gains {
    /// Plain PID gains without anti-windup or feed-forward
    pub const fn pid(kp: f32, ki: f32, kd: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            kw: 0.0,
            kff: 0.0,
            pwm_start: 0.0,
        }
    }

    /// Same gains with a different start offset
    pub const fn with_pwm_start(self, pwm_start: f32) -> Self {
        Self { pwm_start, ..self }
    }
}

/// Wheel speed loop: effort % per mm/s of error
pub const WHEEL_GAINS: Gains = Gains {
    kp: 0.05,
    ki: 0.05,
    kd: 0.0,
    kw: 0.10,
    kff: 0.075,
    pwm_start: 0.0,
};

/// Start offset in % effort that breaks static friction on each wheel
pub const PWM_START: f32 = 5.5;

/// Line centroid loop
pub const LINE_GAINS: Gains = Gains::pid(0.05, 0.05, 0.0);

/// Heading loop
pub const HEADING_GAINS: Gains = Gains::pid(0.15, 0.20, 0.0);

/// Which controller a tuning command addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Loop {
    Wheel,
    Line,
    Heading,
}

/// Which term of a gain set a tuning command addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Term {
    Kp,
    Ki,
    Kd,
    Kff,
}

/// Shared gain table
pub struct Tuning {
    pub wheel: LocalShare<Gains>,
    pub pwm_start_left: LocalShare<f32>,
    pub pwm_start_right: LocalShare<f32>,
    pub line: LocalShare<Gains>,
    pub heading: LocalShare<Gains>,
}

impl Tuning {
    pub const fn new() -> Self {
        Self {
            wheel: LocalShare::new("wheel gains", WHEEL_GAINS),
            pwm_start_left: LocalShare::new("left pwm start", PWM_START),
            pwm_start_right: LocalShare::new("right pwm start", PWM_START),
            line: LocalShare::new("line gains", LINE_GAINS),
            heading: LocalShare::new("heading gains", HEADING_GAINS),
        }
    }

    /// Wheel gains with the start offset of the given side
    pub fn wheel_gains(&self, side: Side) -> Gains {
        let pwm_start = match side {
            Side::Left => self.pwm_start_left.get(),
            Side::Right => self.pwm_start_right.get(),
        };
        self.wheel.get().with_pwm_start(pwm_start)
    }

    fn cell(&self, target: Loop) -> &LocalShare<Gains> {
        match target {
            Loop::Wheel => &self.wheel,
            Loop::Line => &self.line,
            Loop::Heading => &self.heading,
        }
    }

    /// Change one term of one gain set, returning the stored value
    pub fn set(&self, target: Loop, term: Term, value: f32) -> f32 {
        self.cell(target).update(|mut gains| {
            match term {
                Term::Kp => gains.kp = value,
                Term::Ki => gains.ki = value,
                Term::Kd => gains.kd = value,
                Term::Kff => gains.kff = value,
            }
            gains
        });
        debug!("tuning {} {} = {}", target, term, value);
        value
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wheel_gains_carry_side_offset() {
        let tuning = Tuning::new();
        tuning.pwm_start_right.put(4.0);
        assert_eq!(tuning.wheel_gains(Side::Left).pwm_start, PWM_START);
        assert_eq!(tuning.wheel_gains(Side::Right).pwm_start, 4.0);
        assert_eq!(tuning.wheel_gains(Side::Right).kp, WHEEL_GAINS.kp);
    }

    #[test]
    fn set_changes_only_addressed_term() {
        let tuning = Tuning::new();
        tuning.set(Loop::Line, Term::Kd, 0.01);
        let line = tuning.line.get();
        assert_eq!(line.kd, 0.01);
        assert_eq!(line.kp, LINE_GAINS.kp);
        assert_eq!(tuning.heading.get(), HEADING_GAINS);
    }
}
