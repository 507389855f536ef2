//! Control laws and state estimation
pub mod closed_loop;
pub mod observer;
