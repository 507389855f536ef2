//! Romi firmware entry point
//!
//! Builds the drivers, the shared tables and every routine, spawns the edge
//! and byte listeners, then runs the cooperative scheduler until a routine
//! fails.

#![no_std]
#![no_main]

use core::fmt::Write;

use defmt::{error, info, unwrap};
use embassy_executor::Spawner;
use embassy_futures::yield_now;
use embassy_rp::block::ImageDef;
use embassy_rp::config::Config;
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::i2c::{self, I2c};
use embassy_rp::uart::Uart;
use embassy_time::{Duration, Instant, Timer};
use romi_firmware::control::observer::OBSERVER_PERIOD;
use romi_firmware::sensor::battery::Battery;
use romi_firmware::sensor::encoder::Encoder;
use romi_firmware::sensor::heading::{HeadingSensor, SharedHeading};
use romi_firmware::sensor::line::LineSensor;
use romi_firmware::system::console::Console;
use romi_firmware::system::romi::IR_PITCH;
use romi_firmware::system::scheduler::{Scheduler, Task};
use romi_firmware::system::shares::{Shares, Side};
use romi_firmware::system::tuning::Tuning;
use romi_firmware::task::data_transfer::{DataTransfer, TRANSFER_PERIOD};
use romi_firmware::task::motor_control::{MotorControl, MOTOR_PERIOD};
use romi_firmware::task::path_direct::{PathDirector, DIRECTOR_PERIOD};
use romi_firmware::task::path_params::PathParams;
use romi_firmware::task::state_observe::StateObserve;
use romi_firmware::task::user_input::{UserInput, COMMAND_PERIOD};
use {defmt_rtt as _, panic_probe as _};

use board::analog::AdcBus;
use board::flash_store;
use board::imu::Imu;
use board::link::{self, LinkInput, LinkOutput};
use board::wheels::{self, TickCounter, BUMPED, LEFT_TICKS, RIGHT_TICKS};
use board::{
    AnalogResources, AssignedResources, BumperResources, EncoderResources, ImuResources, Irqs, LinkResources,
    MotorResources, StorageResources,
};

/// Firmware image type for bootloader
#[link_section = ".start_block"]
#[used]
pub static IMAGE_DEF: ImageDef = ImageDef::secure_exe();

/// Pin ownership and peripheral drivers
mod board;

const COMMAND_PRIORITY: u8 = 10;
const OBSERVER_PRIORITY: u8 = 4;
const DIRECTOR_PRIORITY: u8 = 3;
const MOTOR_PRIORITY: u8 = 2;
const TRANSFER_PRIORITY: u8 = 1;

const TASKS: usize = 6;

/// The BNO055 ignores the bus for this long after reset
const IMU_BOOT: Duration = Duration::from_millis(650);

const I2C_FREQUENCY_HZ: u32 = 400_000;

/// Firmware entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Config::default());
    let r = split_resources!(p);

    // Edge listeners first so no encoder transition is missed
    let encoders = r.encoders;
    spawner
        .spawn(wheels::count_ticks(
            Input::new(encoders.left_a, Pull::None),
            Input::new(encoders.left_b, Pull::None),
            &LEFT_TICKS,
        ))
        .unwrap();
    spawner
        .spawn(wheels::count_ticks(
            Input::new(encoders.right_a, Pull::None),
            Input::new(encoders.right_b, Pull::None),
            &RIGHT_TICKS,
        ))
        .unwrap();
    let bumpers = r.bumpers;
    spawner
        .spawn(wheels::watch_bumpers([
            Input::new(bumpers.bump_0, Pull::Up),
            Input::new(bumpers.bump_1, Pull::Up),
            Input::new(bumpers.bump_2, Pull::Up),
            Input::new(bumpers.bump_3, Pull::Up),
            Input::new(bumpers.bump_4, Pull::Up),
            Input::new(bumpers.bump_5, Pull::Up),
        ]))
        .unwrap();

    let uart = Uart::new(
        r.link.uart,
        r.link.tx,
        r.link.rx,
        Irqs,
        r.link.tx_dma,
        r.link.rx_dma,
        link::config(),
    );
    let (tx, rx) = uart.split();
    spawner.spawn(link::receive_bytes(rx)).unwrap();
    let console = Console::new(LinkOutput(tx));

    // Shared tables
    let shares = Shares::new();
    let tuning = Tuning::new();
    let params = PathParams::new();

    let adc = AdcBus::new(r.analog);
    let battery = Battery::new(adc.battery());
    let line = LineSensor::with_pitch(adc.line_channels(), 2.0 * IR_PITCH);

    let _imu_reset = Output::new(r.imu.reset, Level::High);
    Timer::after(IMU_BOOT).await;
    let mut i2c_config = i2c::Config::default();
    i2c_config.frequency = I2C_FREQUENCY_HZ;
    let i2c = I2c::new_blocking(r.imu.i2c, r.imu.scl, r.imu.sda, i2c_config);
    let heading = SharedHeading::new(HeadingSensor::new(unwrap!(Imu::new(i2c))));

    let store = flash_store::calibration_store(r.storage);

    let (left_motor, right_motor) = unwrap!(wheels::motors(r.motors));
    let now = Instant::now();

    // Routines
    let mut command = UserInput::new(LinkInput, &console, &shares, &tuning, &params, &battery);
    let mut observer = StateObserve::new(&heading, &battery, &shares);
    let mut director = PathDirector::new(line, &heading, store, &shares, &tuning, &params, &BUMPED, &console);
    let mut left = unwrap!(MotorControl::new(
        Side::Left,
        left_motor,
        Encoder::new(TickCounter(&LEFT_TICKS)),
        &battery,
        &shares,
        &tuning,
        now,
    ));
    let mut right = unwrap!(MotorControl::new(
        Side::Right,
        right_motor,
        Encoder::new(TickCounter(&RIGHT_TICKS)),
        &battery,
        &shares,
        &tuning,
        now,
    ));
    let mut transfer = DataTransfer::new(&console, &shares);

    let mut scheduler: Scheduler<'_, TASKS> = Scheduler::new();
    unwrap!(scheduler.add(Task::new("command", COMMAND_PRIORITY, COMMAND_PERIOD, &mut command)));
    unwrap!(scheduler.add(Task::new("observer", OBSERVER_PRIORITY, OBSERVER_PERIOD, &mut observer)));
    unwrap!(scheduler.add(Task::new("path director", DIRECTOR_PRIORITY, DIRECTOR_PERIOD, &mut director)));
    unwrap!(scheduler.add(Task::new("left motor control", MOTOR_PRIORITY, MOTOR_PERIOD, &mut left)));
    unwrap!(scheduler.add(Task::new("right motor control", MOTOR_PRIORITY, MOTOR_PERIOD, &mut right)));
    unwrap!(scheduler.add(Task::new("data transfer", TRANSFER_PRIORITY, TRANSFER_PERIOD, &mut transfer)));
    info!("scheduler started with {} tasks", scheduler.tasks().len());

    let fault = loop {
        match scheduler.run_pass(Instant::now()) {
            Ok(_) => yield_now().await,
            Err(fault) => break fault,
        }
    };

    scheduler.fail_stop();
    error!("fail-stop: {}", fault);

    let mut out = &console;
    let _ = write!(out, "\r\n{}\r\n", fault);
    let _ = scheduler.dump(&mut out);
    let _ = shares.dump(&mut out);
    shares.left.samples.clear();
    shares.right.samples.clear();
    let _ = match (battery.percentage(), battery.voltage()) {
        (Ok(percentage), Ok(voltage)) => write!(out, "Battery - %:{}, V:{}\r\n", percentage * 100.0, voltage),
        _ => out.write_str("Battery not connected\r\n"),
    };

    defmt::panic!("routine {} failed", fault.task);
}
