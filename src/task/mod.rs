//! Scheduler routines and the drivers only they use
pub mod data_transfer;
pub mod motor_control;
pub mod motor_driver;
pub mod path_direct;
pub mod path_params;
pub mod state_observe;
pub mod user_input;
