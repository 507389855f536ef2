//! Romi board support on the RP2350
//!
//! Pin ownership and the drivers that tie the firmware's hardware traits to
//! embassy-rp peripherals. Everything here is built once in `main` before the
//! scheduler starts; the only embassy tasks are the edge and byte listeners
//! that feed the scheduler through statics.
//!
//! # Resource Groups
//! - Motors: DRV8838 PWM, direction and sleep pins
//! - Encoders: quadrature A/B inputs per wheel
//! - Analog: ADC, the line array multiplexer and the battery divider
//! - IMU: BNO055 on I2C0 and its reset line
//! - Link: UART0 to the Bluetooth bridge
//! - Bumpers: six front switches
//! - Storage: on-board flash for calibration records

use assign_resources::assign_resources;
use embassy_rp::bind_interrupts;
use embassy_rp::peripherals::{self, UART0};
use embassy_rp::uart::InterruptHandler as UartInterruptHandler;

pub mod analog;
pub mod flash_store;
pub mod imu;
pub mod link;
pub mod wheels;

assign_resources! {
    /// DRV8838 motor drivers
    motors: MotorResources {
        left_slice: PWM_SLICE5,
        left_pwm_pin: PIN_10,
        left_dir_pin: PIN_11,
        left_sleep_pin: PIN_12,
        right_slice: PWM_SLICE7,
        right_pwm_pin: PIN_14,
        right_dir_pin: PIN_13,
        right_sleep_pin: PIN_15,
    },
    /// Wheel encoder channels
    encoders: EncoderResources {
        left_a: PIN_2,
        left_b: PIN_3,
        right_a: PIN_7,
        right_b: PIN_8,
    },
    /// ADC with the line array behind an 8:1 multiplexer
    analog: AnalogResources {
        adc: ADC,
        line_pin: PIN_26,
        battery_pin: PIN_28,
        select_0: PIN_9,
        select_1: PIN_22,
        select_2: PIN_27,
    },
    /// BNO055 absolute orientation sensor
    imu: ImuResources {
        i2c: I2C0,
        sda: PIN_4,
        scl: PIN_5,
        reset: PIN_6,
    },
    /// Bluetooth serial bridge
    link: LinkResources {
        uart: UART0,
        tx: PIN_0,
        rx: PIN_1,
        tx_dma: DMA_CH0,
        rx_dma: DMA_CH1,
    },
    /// Front bump switches, left to right
    bumpers: BumperResources {
        bump_0: PIN_16,
        bump_1: PIN_17,
        bump_2: PIN_18,
        bump_3: PIN_19,
        bump_4: PIN_20,
        bump_5: PIN_21,
    },
    /// Calibration storage
    storage: StorageResources {
        flash: FLASH,
        dma: DMA_CH2,
    },
}

bind_interrupts!(pub struct Irqs {
    UART0_IRQ => UartInterruptHandler<UART0>;
});
