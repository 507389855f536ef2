//! Sensors that close a control loop
//!
//! A [`Sensor`] is anything that yields one controlled quantity and knows how
//! long ago it was sampled before. The closed-loop controller only sees
//! this trait, so the same controller drives wheel speed, line position and
//! heading.

pub mod battery;
pub mod encoder;
pub mod heading;
pub mod line;

use core::f32::consts::{PI, TAU};

use embassy_time::{Duration, Instant};

use crate::system::error::Error;

/// Feedback source for a closed-loop controller
pub trait Sensor {
    /// Current value of the controlled quantity
    fn get_data(&mut self) -> Result<f32, Error>;

    /// Time between the two most recent samples. Zero until two samples
    /// have been taken.
    fn dt(&self) -> Duration;
}

/// Tracks the time between consecutive samples
#[derive(Debug, Clone, Copy)]
pub struct SampleTimer {
    last: Option<Instant>,
    dt: Duration,
}

impl SampleTimer {
    pub const fn new() -> Self {
        Self {
            last: None,
            dt: Duration::from_ticks(0),
        }
    }

    /// Record a sample taken at `now`
    pub fn tick(&mut self, now: Instant) -> Duration {
        self.dt = match self.last {
            Some(last) => now.saturating_duration_since(last),
            None => Duration::from_ticks(0),
        };
        self.last = Some(now);
        self.dt
    }

    /// Restart timing from `now`
    pub fn restart(&mut self, now: Instant) {
        self.last = Some(now);
        self.dt = Duration::from_ticks(0);
    }

    pub fn dt(&self) -> Duration {
        self.dt
    }
}

impl Default for SampleTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Fold a raw counter difference into the shortest equivalent step.
///
/// The result is congruent to `delta` modulo `modulus` and no larger than
/// half the modulus in magnitude, so a counter that wrapped between two
/// reads still yields the true (small) motion.
pub fn unwrap_ticks(delta: i64, modulus: u32) -> i64 {
    let modulus = i64::from(modulus.max(1));
    let folded = delta.rem_euclid(modulus);
    if folded > modulus / 2 {
        folded - modulus
    } else {
        folded
    }
}

/// Fold an angle into [-π, π)
pub fn wrap_angle(angle: f32) -> f32 {
    angle - TAU * libm::floorf((angle + PI) / TAU)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_keeps_congruence_and_bound() {
        for modulus in [2u32, 3, 7, 100, 1437, 65_536] {
            let m = i64::from(modulus);
            for delta in [-3 * m - 1, -m, -m / 2 - 1, -1, 0, 1, m / 2, m / 2 + 1, m - 1, m, 5 * m + 3] {
                let corrected = unwrap_ticks(delta, modulus);
                assert_eq!((corrected - delta).rem_euclid(m), 0, "delta {} mod {}", delta, modulus);
                assert!(2 * corrected.abs() <= m, "delta {} mod {} -> {}", delta, modulus, corrected);
            }
        }
    }

    #[test]
    fn counter_wrap_reads_as_small_step() {
        // Counter went 65_530 -> 4 forward, and 4 -> 65_530 backward
        assert_eq!(unwrap_ticks(4 - 65_530, 65_536), 10);
        assert_eq!(unwrap_ticks(65_530 - 4, 65_536), -10);
    }

    #[test]
    fn wrap_angle_folds_into_half_open_range() {
        assert!((wrap_angle(1.5 * PI) + 0.5 * PI).abs() < 1e-5);
        assert!((wrap_angle(-1.5 * PI) - 0.5 * PI).abs() < 1e-5);
        assert!((wrap_angle(0.25) - 0.25).abs() < 1e-6);
        assert!((wrap_angle(PI) + PI).abs() < 1e-5);
    }

    #[test]
    fn timer_reports_gap_between_samples() {
        let mut timer = SampleTimer::new();
        assert_eq!(timer.tick(Instant::from_millis(5)), Duration::from_ticks(0));
        assert_eq!(timer.tick(Instant::from_millis(25)), Duration::from_millis(20));
        timer.restart(Instant::from_millis(30));
        assert_eq!(timer.dt(), Duration::from_ticks(0));
        assert_eq!(timer.tick(Instant::from_millis(50)), Duration::from_millis(20));
    }
}
