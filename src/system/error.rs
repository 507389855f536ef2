//! Firmware error type
//!
//! Every fallible operation in the firmware reports one of these. Routines
//! propagate them with `?` up to the scheduler, which treats any error as
//! fatal and stops the robot.

use core::fmt;

/// Errors raised by drivers, sensors, routines and the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Motor effort outside of [-100, 100] percent
    EffortOutOfRange,
    /// The scheduler's task table has no free slot
    TaskListFull,
    /// Stored calibration record has the wrong number of entries
    CalibrationLength { expected: usize, found: usize },
    /// Stored calibration record contains a non-numeric entry
    CalibrationParse,
    /// No calibration record under the requested name
    CalibrationMissing,
    /// Calibration store refused a write
    CalibrationStore,
    /// A sensor bus transaction failed
    Sensor,
    /// A digital output could not be driven
    Pin,
    /// The PWM channel rejected a duty cycle
    Pwm,
    /// Writing to the telemetry sink failed
    Telemetry,
    /// Battery compensation requested without a battery ADC
    NoBattery,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EffortOutOfRange => f.write_str("effort must be between -100 and 100"),
            Error::TaskListFull => f.write_str("task list is full"),
            Error::CalibrationLength { expected, found } => {
                write!(f, "calibration data length {} != expected length {}", found, expected)
            }
            Error::CalibrationParse => f.write_str("calibration data is not numeric"),
            Error::CalibrationMissing => f.write_str("no calibration data found"),
            Error::CalibrationStore => f.write_str("calibration data could not be stored"),
            Error::Sensor => f.write_str("sensor read failed"),
            Error::Pin => f.write_str("output pin could not be set"),
            Error::Pwm => f.write_str("pwm duty cycle rejected"),
            Error::Telemetry => f.write_str("telemetry write failed"),
            Error::NoBattery => f.write_str("battery ADC is not set"),
        }
    }
}

impl From<fmt::Error> for Error {
    fn from(_: fmt::Error) -> Self {
        Error::Telemetry
    }
}
