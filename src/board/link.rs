//! Operator serial link
//!
//! UART0 talks to an HC-05 Bluetooth bridge at 115200 baud. Received bytes
//! are moved into a channel by [`receive_bytes`] so the command routine can
//! poll them without waiting; output is written blocking.

use core::fmt;

use embassy_rp::uart::{self, Async, UartRx, UartTx};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use romi_firmware::system::hardware::ByteSource;

pub const BAUD_RATE: u32 = 115_200;

const RX_QUEUE: usize = 64;

static RECEIVED: Channel<CriticalSectionRawMutex, u8, RX_QUEUE> = Channel::new();

pub fn config() -> uart::Config {
    let mut config = uart::Config::default();
    config.baudrate = BAUD_RATE;
    config
}

/// Forward every received byte to the command routine
#[embassy_executor::task]
pub async fn receive_bytes(mut rx: UartRx<'static, Async>) {
    let mut byte = [0u8; 1];
    loop {
        match rx.read(&mut byte).await {
            Ok(()) => {
                if RECEIVED.try_send(byte[0]).is_err() {
                    defmt::warn!("operator input overrun, byte dropped");
                }
            }
            Err(e) => defmt::warn!("uart receive error: {}", e),
        }
    }
}

/// Bytes received on the link
pub struct LinkInput;

impl ByteSource for LinkInput {
    fn read_byte(&mut self) -> Option<u8> {
        RECEIVED.try_receive().ok()
    }
}

/// Text sink on the link
pub struct LinkOutput(pub UartTx<'static, Async>);

impl fmt::Write for LinkOutput {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.blocking_write(s.as_bytes()).map_err(|_| fmt::Error)
    }
}
