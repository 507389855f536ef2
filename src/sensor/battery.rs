//! Battery charge monitoring
//!
//! The battery voltage is read through a resistor divider on one ADC channel.
//! Controllers use the charge fraction to scale their output up as the pack
//! sags, and the observer uses the voltage to turn duty cycles into applied
//! motor voltages.
//!
//! The ADC sits behind a mutex so both motor routines, the observer and the
//! command routine can read it through a shared reference.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::NoopRawMutex, Mutex};

use crate::system::error::Error;
use crate::system::hardware::AnalogInput;
use crate::system::romi::{NOMINAL_BATTERY_RAW, NOMINAL_VOLTAGE};

/// Battery monitor over an optional ADC channel
pub struct Battery<A> {
    adc: Mutex<NoopRawMutex, RefCell<Option<A>>>,
}

impl<A: AnalogInput> Battery<A> {
    pub fn new(adc: A) -> Self {
        Self {
            adc: Mutex::new(RefCell::new(Some(adc))),
        }
    }

    /// A monitor with no ADC attached. Every reading fails with
    /// [`Error::NoBattery`].
    pub fn absent() -> Self {
        Self {
            adc: Mutex::new(RefCell::new(None)),
        }
    }

    fn raw(&self) -> Result<u16, Error> {
        self.adc.lock(|adc| match adc.borrow_mut().as_mut() {
            Some(adc) => adc.read_raw(),
            None => Err(Error::NoBattery),
        })
    }

    /// Present charge as a fraction of nominal (1.0 = 8.5 V)
    pub fn percentage(&self) -> Result<f32, Error> {
        Ok(f32::from(self.raw()?) / NOMINAL_BATTERY_RAW)
    }

    /// Present pack voltage in V
    pub fn voltage(&self) -> Result<f32, Error> {
        Ok(self.percentage()? * NOMINAL_VOLTAGE)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// ADC fake returning a fixed reading
    pub struct FixedAdc(pub u16);

    impl AnalogInput for FixedAdc {
        fn read_raw(&mut self) -> Result<u16, Error> {
            Ok(self.0)
        }
    }

    #[test]
    fn nominal_reading_is_full_charge() {
        let battery = Battery::new(FixedAdc(3210));
        assert!((battery.percentage().unwrap() - 1.0).abs() < 1e-6);
        assert!((battery.voltage().unwrap() - 8.5).abs() < 1e-5);
    }

    #[test]
    fn sagging_pack_reads_below_one() {
        let battery = Battery::new(FixedAdc(2889));
        assert!((battery.percentage().unwrap() - 0.9).abs() < 1e-3);
    }

    #[test]
    fn missing_adc_is_an_error() {
        let battery: Battery<FixedAdc> = Battery::absent();
        assert_eq!(battery.percentage(), Err(Error::NoBattery));
    }
}
