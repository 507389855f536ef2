//! Shared ADC
//!
//! One ADC serves the battery divider and, through a CD4051 multiplexer, the
//! seven line sensor channels. Readings are blocking and short, so the bus is
//! shared through a plain mutex on `main`'s stack.

use core::cell::RefCell;

use embassy_rp::adc::{self, Adc, Channel};
use embassy_rp::gpio::{Level, Output, Pull};
use embassy_sync::blocking_mutex::{raw::NoopRawMutex, Mutex};
use embassy_time::{block_for, Duration};
use romi_firmware::system::error::Error;
use romi_firmware::system::hardware::AnalogInput;

use super::AnalogResources;

/// Multiplexer inputs wired to line sensor channels
pub const LINE_CHANNELS: usize = 7;

/// Time for the multiplexer output to settle after a select change
const MUX_SETTLE: Duration = Duration::from_micros(10);

struct AdcState {
    adc: Adc<'static, adc::Blocking>,
    line: Channel<'static>,
    battery: Channel<'static>,
    select: [Output<'static>; 3],
}

/// ADC with its inputs
pub struct AdcBus {
    state: Mutex<NoopRawMutex, RefCell<AdcState>>,
}

impl AdcBus {
    pub fn new(r: AnalogResources) -> Self {
        let state = AdcState {
            adc: Adc::new_blocking(r.adc, adc::Config::default()),
            line: Channel::new_pin(r.line_pin, Pull::None),
            battery: Channel::new_pin(r.battery_pin, Pull::None),
            select: [
                Output::new(r.select_0, Level::Low),
                Output::new(r.select_1, Level::Low),
                Output::new(r.select_2, Level::Low),
            ],
        };
        Self {
            state: Mutex::new(RefCell::new(state)),
        }
    }

    fn read_line(&self, index: u8) -> Result<u16, Error> {
        self.state.lock(|state| {
            let state = &mut *state.borrow_mut();
            for (bit, pin) in state.select.iter_mut().enumerate() {
                pin.set_level(Level::from((index >> bit) & 1 == 1));
            }
            block_for(MUX_SETTLE);
            state.adc.blocking_read(&mut state.line).map_err(|_| Error::Sensor)
        })
    }

    fn read_battery(&self) -> Result<u16, Error> {
        self.state.lock(|state| {
            let state = &mut *state.borrow_mut();
            state.adc.blocking_read(&mut state.battery).map_err(|_| Error::Sensor)
        })
    }

    /// Handles for every line channel, left to right
    pub fn line_channels(&self) -> [LineChannel<'_>; LINE_CHANNELS] {
        core::array::from_fn(|index| LineChannel {
            bus: self,
            index: index as u8,
        })
    }

    pub fn battery(&self) -> BatteryChannel<'_> {
        BatteryChannel(self)
    }
}

/// One multiplexed reflectance channel
pub struct LineChannel<'b> {
    bus: &'b AdcBus,
    index: u8,
}

impl AnalogInput for LineChannel<'_> {
    fn read_raw(&mut self) -> Result<u16, Error> {
        self.bus.read_line(self.index)
    }
}

/// Battery divider input
pub struct BatteryChannel<'b>(&'b AdcBus);

impl AnalogInput for BatteryChannel<'_> {
    fn read_raw(&mut self) -> Result<u16, Error> {
        self.0.read_battery()
    }
}
