//! Wheel hardware: PWM, quadrature counting and bump switches
//!
//! Encoder edges and bump switches are handled by embassy tasks that only
//! update statics. The scheduler's routines read those statics through the
//! firmware's hardware traits on their own schedule.

use embassy_futures::select::{select, select_array};
use embassy_rp::gpio::{Input, Level, Output};
use embassy_rp::pwm::{self, Pwm, PwmOutput};
use embassy_time::{Duration, Timer};
use romi_firmware::system::error::Error;
use romi_firmware::system::hardware::QuadratureCounter;
use romi_firmware::system::share::{ProtectedShare, Share};
use romi_firmware::task::motor_driver::Motor;

use super::MotorResources;

/// Motor PWM frequency, above hearing
const PWM_FREQUENCY_HZ: u32 = 20_000;

/// Counts wrap at 16 bits like a hardware timer
pub const TICK_MODULUS: u32 = 1 << 16;

pub const BUMPERS: usize = 6;

/// Ignore switch bounce for this long after a press
const BUMP_DEBOUNCE: Duration = Duration::from_millis(50);

pub static LEFT_TICKS: ProtectedShare<u32> = Share::new("left ticks", 0);
pub static RIGHT_TICKS: ProtectedShare<u32> = Share::new("right ticks", 0);

/// Set by any bump switch, cleared by the path director
pub static BUMPED: ProtectedShare<bool> = Share::new("bumped", false);

/// Count change indexed by `previous AB << 2 | current AB`
const QUADRATURE: [i32; 16] = [0, -1, 1, 0, 1, 0, 0, -1, -1, 0, 0, 1, 0, 1, -1, 0];

pub type DriveMotor = Motor<PwmOutput<'static>, Output<'static>, Output<'static>>;

/// PWM settings for the motor frequency at the current system clock
fn motor_pwm_config() -> pwm::Config {
    let clock_freq_hz = embassy_rp::clocks::clk_sys_freq();

    // Smallest divider that keeps the period under the 16-bit limit
    let divider = ((clock_freq_hz / PWM_FREQUENCY_HZ) / 65535 + 1) as u8;
    let period = (clock_freq_hz / (PWM_FREQUENCY_HZ * divider as u32)) as u16 - 1;

    let mut config = pwm::Config::default();
    config.divider = divider.into();
    config.top = period;
    config
}

/// Both drivers, asleep with zero duty
pub fn motors(r: MotorResources) -> Result<(DriveMotor, DriveMotor), Error> {
    let (left_pwm, _) = Pwm::new_output_a(r.left_slice, r.left_pwm_pin, motor_pwm_config()).split();
    let left = Motor::new(
        left_pwm.ok_or(Error::Pwm)?,
        Output::new(r.left_dir_pin, Level::Low),
        Output::new(r.left_sleep_pin, Level::Low),
    )?;

    let (right_pwm, _) = Pwm::new_output_a(r.right_slice, r.right_pwm_pin, motor_pwm_config()).split();
    let right = Motor::new(
        right_pwm.ok_or(Error::Pwm)?,
        Output::new(r.right_dir_pin, Level::Low),
        Output::new(r.right_sleep_pin, Level::Low),
    )?;
    Ok((left, right))
}

fn phase(a: &Input<'_>, b: &Input<'_>) -> u8 {
    (u8::from(a.is_high()) << 1) | u8::from(b.is_high())
}

/// Decode quadrature edges into `ticks`
#[embassy_executor::task(pool_size = 2)]
pub async fn count_ticks(mut a: Input<'static>, mut b: Input<'static>, ticks: &'static ProtectedShare<u32>) {
    let mut previous = phase(&a, &b);
    loop {
        select(a.wait_for_any_edge(), b.wait_for_any_edge()).await;
        let current = phase(&a, &b);
        let step = QUADRATURE[usize::from((previous << 2) | current)];
        previous = current;
        if step != 0 {
            ticks.update(|count| (count as i32 + step).rem_euclid(TICK_MODULUS as i32) as u32);
        }
    }
}

/// Wheel counter fed by [`count_ticks`]
pub struct TickCounter(pub &'static ProtectedShare<u32>);

impl QuadratureCounter for TickCounter {
    fn count(&mut self) -> u32 {
        self.0.get()
    }

    fn modulus(&self) -> u32 {
        TICK_MODULUS
    }
}

/// Latch [`BUMPED`] on any switch closing
#[embassy_executor::task]
pub async fn watch_bumpers(mut switches: [Input<'static>; BUMPERS]) {
    loop {
        let (_, index) = select_array(switches.each_mut().map(|s| s.wait_for_falling_edge())).await;
        defmt::info!("bump switch {} pressed", index);
        BUMPED.put(true);
        Timer::after(BUMP_DEBOUNCE).await;
    }
}
