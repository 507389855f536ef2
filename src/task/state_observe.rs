//! State Observer Task
//!
//! Feeds the discrete observer once per [`OBSERVER_PERIOD`] and publishes its
//! estimate for the path director.
//!
//! # Inputs
//! - applied motor voltages: last commanded effort times the pack voltage
//! - wheel travel: encoder angles published by the motor routines, in mm
//! - heading and yaw rate from the IMU
//!
//! # Pose
//! The course position is dead-reckoned from the average wheel speed, median
//! filtered over five steps and projected on the IMU heading. While both
//! motors are unpowered the speed is taken as zero and the filter is
//! emptied, so a robot being carried or coasting does not drift.
//!
//! The first step declares the current orientation to be heading zero.

use embassy_time::Instant;
use moving_median::MovingMedian;

use crate::control::observer::{Observer, ObserverInput, OBSERVER_PERIOD};
use crate::sensor::battery::Battery;
use crate::sensor::heading::SharedHeading;
use crate::system::error::Error;
use crate::system::hardware::{AnalogInput, HeadingImu};
use crate::system::romi::{NOMINAL_VOLTAGE, TRACK_WIDTH, WHEEL_RADIUS};
use crate::system::scheduler::Routine;
use crate::system::shares::Shares;

/// Number of speed samples in the median window
const SPEED_WINDOW: usize = 5;

pub struct StateObserve<'a, I, A> {
    observer: Observer,
    heading: &'a SharedHeading<I>,
    battery: &'a Battery<A>,
    shares: &'a Shares,
    speed: MovingMedian<f32, SPEED_WINDOW>,
    started: bool,
}

impl<'a, I: HeadingImu, A: AnalogInput> StateObserve<'a, I, A> {
    pub fn new(heading: &'a SharedHeading<I>, battery: &'a Battery<A>, shares: &'a Shares) -> Self {
        Self {
            observer: Observer::new(),
            heading,
            battery,
            shares,
            speed: MovingMedian::new(),
            started: false,
        }
    }

    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    fn pack_voltage(&self) -> Result<f32, Error> {
        match self.battery.voltage() {
            Err(Error::NoBattery) => Ok(NOMINAL_VOLTAGE),
            other => other,
        }
    }

    /// Forward speed in mm/s for dead reckoning
    fn pose_speed(&mut self, powered: bool) -> f32 {
        if !powered {
            self.speed = MovingMedian::new();
            return 0.0;
        }
        let average = (self.shares.left.velocity.get() + self.shares.right.velocity.get()) / 2.0;
        self.speed.add_value(average);
        self.speed.median()
    }
}

impl<I: HeadingImu, A: AnalogInput> Routine for StateObserve<'_, I, A> {
    fn step(&mut self, now: Instant) -> Result<(), Error> {
        if !self.started {
            self.started = true;
            self.heading.with(|h| h.set_heading(0.0))?;
            info!("observer started, heading zeroed");
        }

        let (heading, yaw_rate) = self.heading.with(|h| Ok::<_, Error>((h.sample(now)?, h.yaw_rate()?)))?;
        let volts = self.pack_voltage()?;
        let shares = self.shares;
        let left_effort = shares.left.effort.get();
        let right_effort = shares.right.effort.get();
        let left_angle = shares.left.position.get();
        let right_angle = shares.right.position.get();

        let input = ObserverInput {
            left_voltage: left_effort / 100.0 * volts,
            right_voltage: right_effort / 100.0 * volts,
            left_travel: left_angle * WHEEL_RADIUS,
            right_travel: right_angle * WHEEL_RADIUS,
            heading,
            yaw_rate,
        };

        let center = self.observer.center_position();
        let output = self.observer.step(&input);

        let estimate = &shares.estimate;
        estimate.left_position.put(output.left_position);
        estimate.right_position.put(output.right_position);
        estimate.center_position.put(center);
        estimate.yaw.put(output.heading);
        estimate.yaw_rate.put(output.yaw_rate);
        estimate
            .dist_yaw
            .put((right_angle - left_angle) * WHEEL_RADIUS / TRACK_WIDTH);

        let powered = left_effort != 0.0 || right_effort != 0.0;
        let speed = self.pose_speed(powered);
        let dt = OBSERVER_PERIOD.as_micros() as f32 / 1e6;
        estimate.x.update(|x| x + speed * libm::cosf(heading) * dt);
        estimate.y.update(|y| y + speed * libm::sinf(heading) * dt);

        trace!("observer s {} psi {} X {} Y {}", center, output.heading, estimate.x.get(), estimate.y.get());
        Ok(())
    }
}
