//! Core system components for robot operation
pub mod calibration;
pub mod console;
pub mod error;
pub mod flash_store;
pub mod hardware;
pub mod queue;
pub mod romi;
pub mod scheduler;
pub mod share;
pub mod shares;
pub mod tuning;
