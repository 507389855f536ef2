//! Inter-task shared state
//!
//! All cells and sample queues the routines talk through. The table is built
//! once in `main` and handed to every routine by reference.
//!
//! # Writers
//! - command task: setpoints (manual driving), test flags, calibration
//!   requests, segment jumps
//! - path director: setpoints, segment and segment acknowledgement count,
//!   pose overrides at course checkpoints
//! - motor control: applied effort, wheel position and velocity, sample
//!   queues, test completion
//! - observer: estimated positions, heading, yaw rate and pose
//!
//! Cells the command task writes are protected so the operator link could
//! move to an interrupt handler; the rest are only touched between
//! scheduler steps. The bump flag lives outside this table because the bump
//! interrupt needs a `'static` reference to it.

use core::fmt::Write;

use crate::system::error::Error;
use crate::system::queue::LocalQueue;
use crate::system::share::{LocalShare, ProtectedShare};

/// Samples each wheel can buffer during a logged test
pub const SAMPLE_CAPACITY: usize = 500;

/// Number of routines that acknowledge a new path segment
pub const SEGMENT_LISTENERS: u8 = 2;

/// Initial pose estimate in course coordinates (mm)
pub const START_X: f32 = 100.0;
pub const START_Y: f32 = 800.0;

/// Wheel side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Side {
    Left,
    Right,
}

/// Logged samples for one wheel
pub struct WheelSamples {
    /// Microseconds since the test started
    pub time: LocalQueue<u32, SAMPLE_CAPACITY>,
    /// Wheel angle in rad
    pub position: LocalQueue<f32, SAMPLE_CAPACITY>,
    /// Wheel surface speed in mm/s
    pub velocity: LocalQueue<f32, SAMPLE_CAPACITY>,
}

impl WheelSamples {
    pub const fn new() -> Self {
        Self {
            time: LocalQueue::new("time queue"),
            position: LocalQueue::new("position queue"),
            velocity: LocalQueue::new("velocity queue"),
        }
    }

    pub fn any_full(&self) -> bool {
        self.time.is_full() || self.position.is_full() || self.velocity.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty() && self.position.is_empty() && self.velocity.is_empty()
    }

    pub fn clear(&self) {
        self.time.clear();
        self.position.clear();
        self.velocity.clear();
    }
}

/// Per-wheel cells
pub struct WheelShares {
    /// New speed reference in mm/s, taken by the wheel's motor routine
    pub setpoint: LocalShare<Option<f32>>,
    /// Effort last applied to the motor in %
    pub effort: LocalShare<f32>,
    /// Encoder wheel angle in rad
    pub position: LocalShare<f32>,
    /// Encoder wheel surface speed in mm/s
    pub velocity: LocalShare<f32>,
    pub samples: WheelSamples,
}

impl WheelShares {
    pub const fn new() -> Self {
        Self {
            setpoint: LocalShare::new("setpoint", None),
            effort: LocalShare::new("effort", 0.0),
            position: LocalShare::new("wheel position", 0.0),
            velocity: LocalShare::new("wheel velocity", 0.0),
            samples: WheelSamples::new(),
        }
    }
}

/// Outputs of the state observer
pub struct Estimate {
    /// Left wheel travel in mm
    pub left_position: LocalShare<f32>,
    /// Right wheel travel in mm
    pub right_position: LocalShare<f32>,
    /// Centre travel in mm
    pub center_position: LocalShare<f32>,
    /// Heading in rad
    pub yaw: LocalShare<f32>,
    /// Yaw rate in rad/s
    pub yaw_rate: LocalShare<f32>,
    /// Course X in mm
    pub x: LocalShare<f32>,
    /// Course Y in mm
    pub y: LocalShare<f32>,
    /// Heading from the wheel position difference alone, in rad
    pub dist_yaw: LocalShare<f32>,
}

impl Estimate {
    pub const fn new() -> Self {
        Self {
            left_position: LocalShare::new("observed left position", 0.0),
            right_position: LocalShare::new("observed right position", 0.0),
            center_position: LocalShare::new("observed center position", 0.0),
            yaw: LocalShare::new("observed yaw", 0.0),
            yaw_rate: LocalShare::new("observed yaw rate", 0.0),
            x: LocalShare::new("observed X position", START_X),
            y: LocalShare::new("observed Y position", START_Y),
            dist_yaw: LocalShare::new("distance derived yaw", 0.0),
        }
    }

    /// Override the pose estimate at a known course checkpoint
    pub fn place(&self, x: f32, y: f32) {
        self.x.put(x);
        self.y.put(y);
    }
}

/// Every shared cell in the firmware
pub struct Shares {
    pub left: WheelShares,
    pub right: WheelShares,
    /// Log samples while a test runs
    pub data_transfer: ProtectedShare<bool>,
    /// The current test or segment has ended
    pub test_complete: ProtectedShare<bool>,
    /// Capture white reflectance on the next calibration cycle
    pub cal_white: ProtectedShare<bool>,
    /// Capture black reflectance on the next calibration cycle
    pub cal_black: ProtectedShare<bool>,
    /// Discard the stored line calibration
    pub recalibrate: ProtectedShare<bool>,
    /// Requested path segment; the path director follows any change
    pub segment: ProtectedShare<u16>,
    /// Listeners that have yet to acknowledge the current segment
    pub segment_ack: ProtectedShare<u8>,
    pub estimate: Estimate,
}

impl Shares {
    pub const fn new() -> Self {
        Self {
            left: WheelShares::new(),
            right: WheelShares::new(),
            data_transfer: ProtectedShare::new("data transfer", false),
            test_complete: ProtectedShare::new("test complete", false),
            cal_white: ProtectedShare::new("white calibration", false),
            cal_black: ProtectedShare::new("black calibration", false),
            recalibrate: ProtectedShare::new("recalibrate", false),
            segment: ProtectedShare::new("new segment", 0),
            segment_ack: ProtectedShare::new("segment start", 0),
            estimate: Estimate::new(),
        }
    }

    pub fn wheel(&self, side: Side) -> &WheelShares {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// Every listener has acknowledged the current segment
    pub fn segment_started(&self) -> bool {
        self.segment_ack.get() == 0
    }

    /// Post new speed references to both wheels
    pub fn drive(&self, left: f32, right: f32) {
        self.left.setpoint.put(Some(left));
        self.right.setpoint.put(Some(right));
    }

    /// Write a table of every cell to the diagnostics sink
    pub fn dump(&self, out: &mut impl Write) -> Result<(), Error> {
        for (side, wheel) in [("L", &self.left), ("R", &self.right)] {
            match wheel.setpoint.get() {
                Some(v) => write!(out, "{} {:<24}{}\r\n", side, wheel.setpoint.name(), v)?,
                None => write!(out, "{} {:<24}-\r\n", side, wheel.setpoint.name())?,
            }
            for cell in [&wheel.effort, &wheel.position, &wheel.velocity] {
                write!(out, "{} {:<24}{}\r\n", side, cell.name(), cell.get())?;
            }
            write!(out, "{} {:<24}{}\r\n", side, wheel.samples.time.name(), wheel.samples.time.len())?;
        }
        for flag in [
            &self.data_transfer,
            &self.test_complete,
            &self.cal_white,
            &self.cal_black,
            &self.recalibrate,
        ] {
            write!(out, "  {:<24}{}\r\n", flag.name(), flag.get())?;
        }
        write!(out, "  {:<24}{}\r\n", self.segment.name(), self.segment.get())?;
        write!(out, "  {:<24}{}\r\n", self.segment_ack.name(), self.segment_ack.get())?;
        let e = &self.estimate;
        for cell in [
            &e.left_position,
            &e.right_position,
            &e.center_position,
            &e.yaw,
            &e.yaw_rate,
            &e.x,
            &e.y,
            &e.dist_yaw,
        ] {
            write!(out, "  {:<24}{}\r\n", cell.name(), cell.get())?;
        }
        Ok(())
    }
}

impl Default for Shares {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_posts_both_setpoints() {
        let shares = Shares::new();
        shares.drive(-100.0, 150.0);
        assert_eq!(shares.wheel(Side::Left).setpoint.take(), Some(-100.0));
        assert_eq!(shares.wheel(Side::Right).setpoint.take(), Some(150.0));
    }

    #[test]
    fn estimate_starts_at_course_origin() {
        let shares = Shares::new();
        assert_eq!(shares.estimate.x.get(), START_X);
        assert_eq!(shares.estimate.y.get(), START_Y);
        shares.estimate.place(950.0, 425.0);
        assert_eq!(shares.estimate.x.get(), 950.0);
    }

    #[test]
    fn dump_lists_every_cell() {
        let shares = Shares::new();
        shares.segment.put(7);
        let mut out: heapless::String<2048> = heapless::String::new();
        shares.dump(&mut out).unwrap();
        assert!(out.contains("new segment"));
        assert!(out.contains("observed Y position"));
        assert!(out.lines().count() >= 20);
    }
}
