//! Command Task
//!
//! Reads single-character operator commands from the serial link and turns
//! them into share writes for the other routines.
//!
//! The task never waits for input. Each step drains whatever bytes have
//! arrived into a bounded buffer and handles at most one command or one
//! payload field. A command that needs a numeric payload parks itself as
//! [`Pending`] until enough bytes are buffered.
//!
//! # Commands
//! | key           | payload                 | effect                                  |
//! |---------------|-------------------------|-----------------------------------------|
//! | `v` / `b`     |                         | capture white / black, jump to CALIBRATE|
//! | `x`           |                         | discard line calibration, recalibrate   |
//! | `c`           |                         | cancel: stop, end test, WAIT            |
//! | `w a s d r`   |                         | manual drive at 50 mm/s                 |
//! | `1`..`9`, `0` |                         | logged step test at 85..850 mm/s        |
//! | `.`           | 3 digits, then 5 per var| jump to a segment with parameters       |
//! | `p` `i` `o`   | selector, 5 chars       | Kp / Ki / Kd (`1` wheel, `2` line, else heading) |
//! | `k`           | 5 chars                 | wheel Kff                               |
//! | `h` / `j`     | 5 chars                 | left / right start offset               |
//! | `u` `y` `t`   | 5 chars                 | line Kp / Ki / Kd                       |
//! | `z`           | 5 chars                 | cruise speed                            |
//! | `q`           |                         | battery status                          |
//!
//! Commands are case-insensitive and echoed. Carriage returns and line
//! feeds are ignored.

use core::fmt::Write;

use embassy_time::{Duration, Instant};
use heapless::{Deque, Vec};

use crate::sensor::battery::Battery;
use crate::system::error::Error;
use crate::system::hardware::{AnalogInput, ByteSource};
use crate::system::scheduler::Routine;
use crate::system::shares::{Shares, Side, SEGMENT_LISTENERS};
use crate::system::tuning::{Loop, Term, Tuning};
use crate::task::path_direct::Segment;
use crate::task::path_params::PathParams;

/// Command task period
pub const COMMAND_PERIOD: Duration = Duration::from_millis(100);

/// Bytes buffered between steps
const INPUT_CAPACITY: usize = 64;

/// Width of a numeric payload field
const VALUE_WIDTH: usize = 5;

/// Width of the segment code after `.`
const STATE_WIDTH: usize = 3;

/// Manual drive speed in mm/s
const MANUAL_SPEED: f32 = 50.0;

/// Step-test speed per digit in mm/s
const STEP_SPEED: f32 = 85.0;

/// Parameter slots a segment jump can fill
const MAX_PARAMETERS: u16 = 4;

/// A command waiting for its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Pending {
    /// One-character loop selector before a gain value
    Selector(Term),
    Gain(Loop, Term),
    PwmStart(Side),
    VRef,
    State,
    /// Parameter `index` of a segment jump to `state`
    Var { state: u16, index: u8 },
}

impl Pending {
    fn width(self) -> usize {
        match self {
            Pending::Selector(_) => 1,
            Pending::State => STATE_WIDTH,
            _ => VALUE_WIDTH,
        }
    }
}

/// Parse a payload field, rejecting anything that is not a finite number
fn parse_value(field: &[u8]) -> Option<f32> {
    let text = core::str::from_utf8(field).ok()?;
    let value: f32 = text.trim().parse().ok()?;
    value.is_finite().then_some(value)
}

pub struct UserInput<'a, B, W, A> {
    source: B,
    out: W,
    buffer: Deque<u8, INPUT_CAPACITY>,
    pending: Option<Pending>,
    started: bool,
    shares: &'a Shares,
    tuning: &'a Tuning,
    params: &'a PathParams,
    battery: &'a Battery<A>,
}

impl<'a, B, W, A> UserInput<'a, B, W, A>
where
    B: ByteSource,
    W: Write,
    A: AnalogInput,
{
    pub fn new(
        source: B,
        out: W,
        shares: &'a Shares,
        tuning: &'a Tuning,
        params: &'a PathParams,
        battery: &'a Battery<A>,
    ) -> Self {
        Self {
            source,
            out,
            buffer: Deque::new(),
            pending: None,
            started: false,
            shares,
            tuning,
            params,
            battery,
        }
    }

    /// Move every received byte into the buffer
    fn poll(&mut self) {
        while let Some(byte) = self.source.read_byte() {
            if byte == b'\r' || byte == b'\n' {
                continue;
            }
            if self.buffer.push_back(byte).is_err() {
                warn!("command buffer full, dropped {=u8}", byte);
            }
        }
    }

    /// Take exactly `width` buffered bytes, or nothing if fewer are there
    fn take_field(&mut self, width: usize) -> Option<Vec<u8, VALUE_WIDTH>> {
        if self.buffer.len() < width {
            return None;
        }
        let mut field = Vec::new();
        for _ in 0..width {
            if let Some(byte) = self.buffer.pop_front() {
                // width never exceeds the field capacity
                let _ = field.push(byte);
            }
        }
        Some(field)
    }

    fn command(&mut self, byte: u8) -> Result<(), Error> {
        let cmd = byte.to_ascii_lowercase();
        write!(self.out, "{}\r\n", cmd as char)?;
        debug!("command {=u8}", cmd);

        let shares = self.shares;
        match cmd {
            b'v' => {
                shares.segment.put(Segment::Calibrate.code());
                shares.cal_white.put(true);
                shares.test_complete.put(true);
            }
            b'b' => {
                shares.segment.put(Segment::Calibrate.code());
                shares.cal_black.put(true);
                shares.test_complete.put(true);
            }
            b'x' => {
                shares.recalibrate.put(true);
                shares.segment.put(Segment::Calibrate.code());
                shares.test_complete.put(true);
            }
            b'c' => {
                shares.drive(0.0, 0.0);
                shares.test_complete.put(true);
                shares.segment.put(Segment::Wait.code());
            }

            b'w' => shares.drive(MANUAL_SPEED, MANUAL_SPEED),
            b'a' => shares.drive(0.0, MANUAL_SPEED),
            b's' => shares.drive(-MANUAL_SPEED, -MANUAL_SPEED),
            b'd' => shares.drive(MANUAL_SPEED, 0.0),
            b'r' => shares.drive(MANUAL_SPEED, -MANUAL_SPEED),

            b'0'..=b'9' => {
                let digit = match cmd - b'0' {
                    0 => 10,
                    n => n,
                };
                let speed = STEP_SPEED * f32::from(digit);
                shares.left.samples.clear();
                shares.right.samples.clear();
                shares.drive(speed, speed);
                shares.data_transfer.put(true);
                shares.test_complete.put(false);
                shares.segment_ack.put(SEGMENT_LISTENERS);
                info!("step test at {} mm/s", speed);
            }

            b'.' => {
                write!(self.out, "Set State (3 chr):")?;
                self.pending = Some(Pending::State);
            }
            b'p' => self.pending = Some(Pending::Selector(Term::Kp)),
            b'i' => self.pending = Some(Pending::Selector(Term::Ki)),
            b'o' => self.pending = Some(Pending::Selector(Term::Kd)),
            b'k' => self.pending = Some(Pending::Gain(Loop::Wheel, Term::Kff)),
            b'h' => self.pending = Some(Pending::PwmStart(Side::Left)),
            b'j' => self.pending = Some(Pending::PwmStart(Side::Right)),
            b'u' => self.pending = Some(Pending::Gain(Loop::Line, Term::Kp)),
            b'y' => self.pending = Some(Pending::Gain(Loop::Line, Term::Ki)),
            b't' => self.pending = Some(Pending::Gain(Loop::Line, Term::Kd)),
            b'z' => self.pending = Some(Pending::VRef),

            b'q' => self.battery_status()?,

            _ => debug!("unknown command {=u8}", cmd),
        }
        Ok(())
    }

    fn battery_status(&mut self) -> Result<(), Error> {
        match self.battery.percentage() {
            Ok(charge) => {
                let volts = self.battery.voltage()?;
                write!(self.out, "Battery - %:{}, V:{}\r\n", charge * 100.0, volts)?;
            }
            Err(Error::NoBattery) => write!(self.out, "Battery not connected\r\n")?,
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Feed the pending command its payload once enough bytes are buffered
    fn resume(&mut self, pending: Pending) -> Result<(), Error> {
        let Some(field) = self.take_field(pending.width()) else {
            self.pending = Some(pending);
            return Ok(());
        };

        if let Pending::Selector(term) = pending {
            let target = match field.as_slice() {
                b"1" => Loop::Wheel,
                b"2" => Loop::Line,
                _ => Loop::Heading,
            };
            for &byte in field.iter() {
                self.out.write_char(byte as char)?;
            }
            write!(self.out, "\r\n")?;
            self.pending = Some(Pending::Gain(target, term));
            return Ok(());
        }

        let Some(value) = parse_value(&field) else {
            write!(self.out, "Invalid value try again\r\n")?;
            self.pending = Some(pending);
            return Ok(());
        };

        match pending {
            Pending::Selector(_) => {}
            Pending::Gain(target, term) => {
                self.tuning.set(target, term, value);
                write!(self.out, "{}\r\n", value)?;
            }
            Pending::PwmStart(side) => {
                match side {
                    Side::Left => self.tuning.pwm_start_left.put(value),
                    Side::Right => self.tuning.pwm_start_right.put(value),
                }
                write!(self.out, "{}\r\n", value)?;
            }
            Pending::VRef => {
                self.params.v_ref.put(value);
                write!(self.out, "v_ref:{}\r\n", value)?;
            }
            Pending::State => {
                if value < 0.0 || value > f32::from(u16::MAX) {
                    write!(self.out, "Invalid value try again\r\n")?;
                    self.pending = Some(pending);
                    return Ok(());
                }
                let state = value as u16;
                write!(self.out, "{}\r\n", state)?;
                if Segment::parameter_count(state) >= 1 {
                    self.params.next_state.put(Segment::Wait.code());
                    write!(self.out, "Var1 (5 chr):")?;
                    self.pending = Some(Pending::Var { state, index: 1 });
                } else {
                    self.shares.segment.put(state);
                }
            }
            Pending::Var { state, index } => {
                if let Some(slot) = self.params.var(index) {
                    slot.put(value);
                }
                write!(self.out, "{}\r\n", value)?;
                let count = Segment::parameter_count(state).min(MAX_PARAMETERS);
                if u16::from(index) < count {
                    let next = index + 1;
                    write!(self.out, "Var{} (5 chr):", next)?;
                    self.pending = Some(Pending::Var { state, index: next });
                } else {
                    self.shares.segment.put(state);
                }
            }
        }
        Ok(())
    }
}

impl<B, W, A> Routine for UserInput<'_, B, W, A>
where
    B: ByteSource,
    W: Write,
    A: AnalogInput,
{
    fn step(&mut self, _now: Instant) -> Result<(), Error> {
        if !self.started {
            self.started = true;
            self.shares.data_transfer.put(false);
            write!(self.out, "Bluetooth Connection Established\r\n")?;
        }

        self.poll();

        match self.pending.take() {
            Some(pending) => self.resume(pending),
            None => match self.buffer.pop_front() {
                Some(byte) => self.command(byte),
                None => Ok(()),
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sensor::battery::tests::FixedAdc;
    use crate::system::console::Console;
    use crate::system::tuning::{LINE_GAINS, WHEEL_GAINS};
    use crate::task::path_params::DEFAULT_V_REF;
    use core::cell::RefCell;
    use heapless::String;

    /// Operator link fake the test types into
    pub struct FakeLink<'c>(pub &'c RefCell<Deque<u8, 256>>);

    impl ByteSource for FakeLink<'_> {
        fn read_byte(&mut self) -> Option<u8> {
            self.0.borrow_mut().pop_front()
        }
    }

    fn send(link: &RefCell<Deque<u8, 256>>, text: &str) {
        let mut link = link.borrow_mut();
        for byte in text.bytes() {
            link.push_back(byte).unwrap();
        }
    }

    type TestInput<'c> = UserInput<'c, FakeLink<'c>, &'c Console<String<2048>>, FixedAdc>;

    struct Rig {
        link: RefCell<Deque<u8, 256>>,
        console: Console<String<2048>>,
        shares: Shares,
        tuning: Tuning,
        params: PathParams,
        battery: Battery<FixedAdc>,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                link: RefCell::new(Deque::new()),
                console: Console::new(String::new()),
                shares: Shares::new(),
                tuning: Tuning::new(),
                params: PathParams::new(),
                battery: Battery::new(FixedAdc(3210)),
            }
        }

        fn task(&self) -> TestInput<'_> {
            UserInput::new(
                FakeLink(&self.link),
                &self.console,
                &self.shares,
                &self.tuning,
                &self.params,
                &self.battery,
            )
        }

        fn text(&self) -> String<2048> {
            self.console.with(|s| s.clone())
        }
    }

    fn run(task: &mut TestInput<'_>, steps: usize) {
        for k in 0..steps {
            task.step(Instant::from_millis(100 * k as u64)).unwrap();
        }
    }

    #[test]
    fn first_step_greets_and_stops_logging() {
        let rig = Rig::new();
        rig.shares.data_transfer.put(true);
        let mut task = rig.task();
        run(&mut task, 1);
        assert!(rig.text().starts_with("Bluetooth Connection Established\r\n"));
        assert!(!rig.shares.data_transfer.get());
    }

    #[test]
    fn calibration_commands_jump_to_calibrate() {
        let rig = Rig::new();
        let mut task = rig.task();
        send(&rig.link, "\r\nV");
        run(&mut task, 1);
        assert_eq!(rig.shares.segment.get(), Segment::Calibrate.code());
        assert!(rig.shares.cal_white.get());
        assert!(rig.shares.test_complete.get());
        assert!(rig.text().ends_with("v\r\n"));

        send(&rig.link, "x");
        run(&mut task, 1);
        assert!(rig.shares.recalibrate.get());
    }

    #[test]
    fn one_command_per_step() {
        let rig = Rig::new();
        let mut task = rig.task();
        send(&rig.link, "wc");
        run(&mut task, 1);
        assert_eq!(rig.shares.left.setpoint.take(), Some(MANUAL_SPEED));
        assert_eq!(rig.shares.right.setpoint.take(), Some(MANUAL_SPEED));

        rig.shares.segment.put(Segment::FollowLine.code());
        run(&mut task, 1);
        assert_eq!(rig.shares.left.setpoint.take(), Some(0.0));
        assert_eq!(rig.shares.segment.get(), Segment::Wait.code());
        assert!(rig.shares.test_complete.get());
    }

    #[test]
    fn digit_starts_logged_step_test() {
        let rig = Rig::new();
        rig.shares.left.samples.time.push(7);
        rig.shares.test_complete.put(true);
        let mut task = rig.task();

        send(&rig.link, "3");
        run(&mut task, 1);
        assert_eq!(rig.shares.left.setpoint.take(), Some(255.0));
        assert_eq!(rig.shares.right.setpoint.take(), Some(255.0));
        assert!(rig.shares.data_transfer.get());
        assert!(!rig.shares.test_complete.get());
        assert_eq!(rig.shares.segment_ack.get(), SEGMENT_LISTENERS);
        assert!(rig.shares.left.samples.is_empty());

        send(&rig.link, "0");
        run(&mut task, 1);
        assert_eq!(rig.shares.left.setpoint.take(), Some(850.0));
    }

    #[test]
    fn segment_jump_collects_one_value_per_parameter() {
        let rig = Rig::new();
        rig.params.next_state.put(9);
        let mut task = rig.task();

        send(&rig.link, ".4011300.650.00000000001");
        run(&mut task, 5);
        assert_eq!(rig.shares.segment.get(), 0);
        run(&mut task, 1);

        assert_eq!(rig.shares.segment.get(), Segment::GoToPoint.code());
        assert_eq!(rig.params.next_state.get(), 0);
        assert_eq!(rig.params.var_1.get(), 1300.0);
        assert_eq!(rig.params.var_2.get(), 650.0);
        assert!(!rig.params.skip_x());
        assert!(rig.params.skip_y());
        let text = rig.text();
        assert!(text.contains("Set State (3 chr):401\r\n"));
        assert!(text.contains("Var4 (5 chr):1\r\n"));
    }

    #[test]
    fn parameterless_segment_jumps_straight_away() {
        let rig = Rig::new();
        let mut task = rig.task();
        send(&rig.link, ".002");
        run(&mut task, 2);
        assert_eq!(rig.shares.segment.get(), Segment::FollowLine.code());
    }

    #[test]
    fn gain_waits_for_full_payload() {
        let rig = Rig::new();
        let mut task = rig.task();

        send(&rig.link, "p1");
        run(&mut task, 2);
        send(&rig.link, "0.1");
        run(&mut task, 3);
        assert_eq!(rig.tuning.wheel.get().kp, WHEEL_GAINS.kp);

        send(&rig.link, "25");
        run(&mut task, 1);
        assert_eq!(rig.tuning.wheel.get().kp, 0.125);
        assert!(rig.text().ends_with("0.125\r\n"));
    }

    #[test]
    fn selector_picks_the_loop() {
        let rig = Rig::new();
        let mut task = rig.task();

        send(&rig.link, "i20.300o90.010");
        run(&mut task, 6);
        assert_eq!(rig.tuning.line.get().ki, 0.3);
        assert_eq!(rig.tuning.heading.get().kd, 0.01);

        send(&rig.link, "u0.200h04.00");
        run(&mut task, 4);
        assert_eq!(rig.tuning.line.get().kp, 0.2);
        assert_eq!(rig.tuning.line.get().kd, LINE_GAINS.kd);
        assert_eq!(rig.tuning.pwm_start_left.get(), 4.0);
    }

    #[test]
    fn invalid_value_is_reported_and_retried() {
        let rig = Rig::new();
        let mut task = rig.task();

        send(&rig.link, "zabcde00150");
        run(&mut task, 2);
        assert!(rig.text().contains("Invalid value try again\r\n"));
        assert_eq!(rig.params.v_ref.get(), DEFAULT_V_REF);

        run(&mut task, 1);
        assert_eq!(rig.params.v_ref.get(), 150.0);
        assert!(rig.text().ends_with("v_ref:150\r\n"));
    }

    #[test]
    fn battery_query_reports_charge() {
        let rig = Rig::new();
        let mut task = rig.task();
        send(&rig.link, "q");
        run(&mut task, 1);
        assert!(rig.text().ends_with("Battery - %:100, V:8.5\r\n"));

        let absent: Battery<FixedAdc> = Battery::absent();
        let mut task = UserInput::new(
            FakeLink(&rig.link),
            &rig.console,
            &rig.shares,
            &rig.tuning,
            &rig.params,
            &absent,
        );
        send(&rig.link, "Q");
        run(&mut task, 1);
        assert!(rig.text().ends_with("Battery not connected\r\n"));
    }
}
