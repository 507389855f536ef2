//! Romi robot control firmware
//!
//! Wheel speed, line following and heading control for a two-wheeled Romi
//! chassis, a discrete state observer for its pose, and a path director that
//! sequences the course. Everything runs as cooperative routines under a
//! fixed-period priority scheduler.
//!
//! The library is `no_std` and hardware independent: the board talks to it
//! through the traits in [`system::hardware`] and `embedded-hal`. Host tests
//! run against small fakes of those traits.

#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible to every module
#[macro_use]
mod fmt;

/// Shared state, configuration and the scheduler
pub mod system;

/// Feedback sources for the control loops
pub mod sensor;

/// Control laws and state estimation
pub mod control;

/// Scheduler routines
pub mod task;
