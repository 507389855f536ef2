//! Path Director Task
//!
//! Sequences the robot through the course as a state machine of segments.
//!
//! # Segments
//! - control segments ([`Segment::Wait`], [`Segment::Calibrate`],
//!   [`Segment::FollowLine`]) run until something else changes the segment
//! - function segments (codes 101 and up) are generic moves parameterised
//!   through [`PathParams`]; the hundreds digit of the code is the number of
//!   parameters. Each finishes by switching to `next_state`.
//! - course segments fill the parameters, name the segment to continue with
//!   and hand over to a function segment in the same step
//!
//! Every segment has a one-time entry, guarded by the segment-set latch,
//! followed by its per-step update.
//!
//! # Handshake
//! [`PathDirector::set_state`] publishes the new segment, clears the latch,
//! marks the running test complete and sets the acknowledgement count to
//! [`SEGMENT_LISTENERS`]. Each motor routine takes one off the count when it
//! sees it; the segment has started once the count is back to zero.
//!
//! # Bumpers
//! The bump flag is checked before anything else each step. Depending on
//! the course position a bump stops the robot, starts the wall recovery, or
//! backs the robot off for a second and carries on. Stopping and the wall
//! recovery only change the segment, which then runs in the same step. The
//! back-off is the only policy that takes over the step: no segment runs
//! until it has finished.
//!
//! # Steering
//! Line and heading segments drive both wheels at the cruise speed and steer
//! by adding the controller output, scaled by the half track width, to the
//! right wheel and taking it off the left one.

use core::f32::consts::PI;
use core::fmt::Write;

use embassy_time::{Duration, Instant};

use crate::control::closed_loop::ClosedLoop;
use crate::sensor::heading::SharedHeading;
use crate::sensor::line::LineSensor;
use crate::sensor::{wrap_angle, Sensor};
use crate::system::calibration::CalibrationStore;
use crate::system::error::Error;
use crate::system::hardware::{AnalogInput, HeadingImu};
use crate::system::romi::HALF_TRACK;
use crate::system::scheduler::Routine;
use crate::system::share::ProtectedShare;
use crate::system::shares::{Shares, SEGMENT_LISTENERS};
use crate::system::tuning::Tuning;
use crate::task::path_params::PathParams;

/// Path director period
pub const DIRECTOR_PERIOD: Duration = Duration::from_millis(30);

/// Saturation of the line and heading controllers
pub const STEER_LIMIT: f32 = 12.0;

/// Heading error accepted as on target (3°)
pub const HEADING_TOLERANCE: f32 = 3.0 * PI / 180.0;

/// Position error accepted as on target in mm
pub const POINT_TOLERANCE: f32 = 25.0;

/// Speed and duration of the back-off after a bump in mm/s
const BUMP_REVERSE_SPEED: f32 = -100.0;
const BUMP_REVERSE_TIME: Duration = Duration::from_secs(1);

/// Path segments, by the code the operator and the shares use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum Segment {
    Wait = 0,
    Calibrate = 1,
    FollowLine = 2,

    StraightBeforeLine = 4,
    FollowLineBeforeFork = 5,
    ForceRightFork = 6,
    LineToDiamond = 7,
    DiamondToCp1 = 8,
    TurnToCp2 = 9,
    GoToLineBeforeCp2 = 10,
    LineToCp2 = 11,
    LineBeforeCp3 = 12,
    TurnToLineBeforeCp3 = 13,
    GoToLineBeforeCp3 = 14,
    TurnToCp3 = 15,
    GoToLineBeforeCp4 = 18,
    FollowLineToCp4 = 19,
    TurnForGarage = 20,
    MoveInGarage = 21,
    TurnToGarageExit = 22,
    GoToGarageExit = 23,
    FollowLineToWall = 24,
    ReverseFromWall = 25,
    TurnToCup2 = 26,
    GoToCup2 = 27,
    TurnToCp6 = 28,
    GoToCp6 = 29,
    FollowLineToCp6 = 30,

    /// var_1 distance (mm)
    FixedForward = 101,
    /// var_1 angle (deg)
    TurnAngle = 102,
    /// var_1 duration (ms)
    FollowLineForTime = 103,
    /// var_1 X, var_2 Y, var_3 skip X, var_4 skip Y
    GoToPoint = 401,
    /// var_1 X, var_2 Y, var_3 skip X, var_4 skip Y
    FollowLineToPoint = 402,
}

impl Segment {
    pub fn from_code(code: u16) -> Option<Self> {
        use Segment::*;
        let segment = match code {
            0 => Wait,
            1 => Calibrate,
            2 => FollowLine,
            4 => StraightBeforeLine,
            5 => FollowLineBeforeFork,
            6 => ForceRightFork,
            7 => LineToDiamond,
            8 => DiamondToCp1,
            9 => TurnToCp2,
            10 => GoToLineBeforeCp2,
            11 => LineToCp2,
            12 => LineBeforeCp3,
            13 => TurnToLineBeforeCp3,
            14 => GoToLineBeforeCp3,
            15 => TurnToCp3,
            18 => GoToLineBeforeCp4,
            19 => FollowLineToCp4,
            20 => TurnForGarage,
            21 => MoveInGarage,
            22 => TurnToGarageExit,
            23 => GoToGarageExit,
            24 => FollowLineToWall,
            25 => ReverseFromWall,
            26 => TurnToCup2,
            27 => GoToCup2,
            28 => TurnToCp6,
            29 => GoToCp6,
            30 => FollowLineToCp6,
            101 => FixedForward,
            102 => TurnAngle,
            103 => FollowLineForTime,
            401 => GoToPoint,
            402 => FollowLineToPoint,
            _ => return None,
        };
        Some(segment)
    }

    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Number of parameters a segment code takes
    pub const fn parameter_count(code: u16) -> u16 {
        code / 100
    }
}

/// Which controller steers
#[derive(Clone, Copy)]
enum Steering {
    Line,
    Heading,
}

/// Line centroid sampled at the director's step time
struct LineFeedback<'s, A, const N: usize> {
    sensor: &'s mut LineSensor<A, N>,
    now: Instant,
}

impl<A: AnalogInput, const N: usize> Sensor for LineFeedback<'_, A, N> {
    fn get_data(&mut self) -> Result<f32, Error> {
        self.sensor.centroid(self.now)
    }

    fn dt(&self) -> Duration {
        self.sensor.dt()
    }
}

/// Heading as last sampled
struct HeadingFeedback<'h, I>(&'h SharedHeading<I>);

impl<I: HeadingImu> Sensor for HeadingFeedback<'_, I> {
    fn get_data(&mut self) -> Result<f32, Error> {
        Ok(self.0.with(|h| h.heading()))
    }

    fn dt(&self) -> Duration {
        self.0.with(|h| h.dt())
    }
}

pub struct PathDirector<'a, A, const N: usize, I, S, W> {
    segment: Segment,
    segment_set: bool,
    segment_start: Instant,
    end_point: f32,

    line: LineSensor<A, N>,
    heading: &'a SharedHeading<I>,
    store: S,
    line_loop: ClosedLoop,
    heading_loop: ClosedLoop,

    shares: &'a Shares,
    tuning: &'a Tuning,
    params: &'a PathParams,
    bumped: &'a ProtectedShare<bool>,
    bump_stop: bool,
    bump_wall: bool,
    bump_started: Option<Instant>,

    out: W,
}

impl<'a, A, const N: usize, I, S, W> PathDirector<'a, A, N, I, S, W>
where
    A: AnalogInput,
    I: HeadingImu,
    S: CalibrationStore,
    W: Write,
{
    /// Director starting in [`Segment::Calibrate`]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        line: LineSensor<A, N>,
        heading: &'a SharedHeading<I>,
        store: S,
        shares: &'a Shares,
        tuning: &'a Tuning,
        params: &'a PathParams,
        bumped: &'a ProtectedShare<bool>,
        out: W,
    ) -> Self {
        let mut director = Self {
            segment: Segment::Calibrate,
            segment_set: false,
            segment_start: Instant::from_ticks(0),
            end_point: 0.0,
            line,
            heading,
            store,
            line_loop: ClosedLoop::new(STEER_LIMIT, tuning.line.get(), DIRECTOR_PERIOD),
            heading_loop: ClosedLoop::new(STEER_LIMIT, tuning.heading.get(), DIRECTOR_PERIOD),
            shares,
            tuning,
            params,
            bumped,
            bump_stop: true,
            bump_wall: false,
            bump_started: None,
            out,
        };
        director.set_state(Segment::Calibrate);
        director
    }

    pub fn segment(&self) -> Segment {
        self.segment
    }

    /// Entry of the current segment has run
    pub fn segment_set(&self) -> bool {
        self.segment_set
    }

    /// Switch segment and ask the motor routines to acknowledge it
    pub fn set_state(&mut self, segment: Segment) {
        debug!("segment {} -> {}", self.segment, segment);
        self.segment = segment;
        self.segment_set = false;
        self.shares.segment.put(segment.code());
        self.shares.test_complete.put(true);
        self.shares.segment_ack.put(SEGMENT_LISTENERS);
    }

    /// Run the entry of the current segment once. Returns `true` on the step
    /// the entry should run.
    fn enter(&mut self) -> bool {
        if self.segment_set {
            return false;
        }
        self.segment_set = true;
        info!("starting segment {}", self.segment);
        true
    }

    /// Hand over to a function segment that continues with `next`
    fn chain(&mut self, function: Segment, next: Segment) {
        self.set_state(function);
        self.params.next_state.put(next.code());
    }

    fn next_state(&mut self) {
        let code = self.params.next_state.get();
        match Segment::from_code(code) {
            Some(next) => self.set_state(next),
            None => {
                warn!("unknown next segment {}", code);
                self.set_state(Segment::Wait);
            }
        }
    }

    fn heading(&self) -> f32 {
        self.heading.with(|h| h.heading())
    }

    fn set_heading(&self, heading: f32) -> Result<(), Error> {
        self.heading.with(|h| h.set_heading(heading))
    }

    fn center(&self) -> f32 {
        self.shares.estimate.center_position.get()
    }

    fn position(&self) -> (f32, f32) {
        (self.shares.estimate.x.get(), self.shares.estimate.y.get())
    }

    fn forward(&self, speed: f32) {
        self.shares.drive(speed, speed);
    }

    fn cruise(&self) {
        self.forward(self.params.v_ref.get());
    }

    /// Drive at the cruise speed, turning by the chosen controller's output
    fn steer(&mut self, steering: Steering, now: Instant) -> Result<(), Error> {
        let turn = match steering {
            Steering::Line => self.line_loop.run(
                &mut LineFeedback {
                    sensor: &mut self.line,
                    now,
                },
                None,
            )?,
            Steering::Heading => self.heading_loop.run(&mut HeadingFeedback(self.heading), None)?,
        };
        let adjust = turn * HALF_TRACK;
        let v_ref = self.params.v_ref.get();
        self.shares.drive(v_ref - adjust, v_ref + adjust);
        Ok(())
    }

    /// Point the heading loop at `target` by the short way round and return
    /// the remaining error
    fn aim(&mut self, target: f32) -> f32 {
        let heading = self.heading();
        let error = wrap_angle(target - heading);
        self.heading_loop.set_ref(heading + error);
        error
    }

    /// Target point reached, honouring the skip flags
    fn at_point(&self) -> bool {
        let (x, y) = self.position();
        let dx = self.params.var_1.get() - x;
        let dy = self.params.var_2.get() - y;
        (self.params.skip_x() || libm::fabsf(dx) <= POINT_TOLERANCE)
            && (self.params.skip_y() || libm::fabsf(dy) <= POINT_TOLERANCE)
    }

    fn report_pose(&mut self) -> Result<(), Error> {
        let shares = self.shares;
        let estimate = &shares.estimate;
        write!(self.out, "L: {}\r\n", estimate.left_position.get())?;
        write!(self.out, "R: {}\r\n", estimate.right_position.get())?;
        write!(self.out, "C: {}\r\n", estimate.center_position.get())?;
        write!(self.out, "H: {}\r\n", estimate.yaw.get())?;
        write!(self.out, "X: {}\r\n", estimate.x.get())?;
        write!(self.out, "Y: {}\r\n", estimate.y.get())?;
        Ok(())
    }

    fn check_bump(&mut self, now: Instant) -> Result<bool, Error> {
        if !self.bumped.get() {
            return Ok(false);
        }

        if self.bump_stop {
            write!(self.out, "bumped\r\n")?;
            self.bumped.put(false);
            self.set_state(Segment::Wait);
            return Ok(false);
        }

        if self.bump_wall {
            write!(self.out, "wall\r\n")?;
            self.set_state(Segment::ReverseFromWall);
            return Ok(false);
        }

        let started = match self.bump_started {
            Some(started) => started,
            None => {
                write!(self.out, "bumped\r\n")?;
                self.bump_started = Some(now);
                now
            }
        };
        if now.saturating_duration_since(started) >= BUMP_REVERSE_TIME {
            write!(self.out, "unbumped\r\n")?;
            self.forward(0.0);
            self.bump_started = None;
            self.bumped.put(false);
        } else {
            self.forward(BUMP_REVERSE_SPEED);
        }
        // The back-off owns the wheels until it ends
        Ok(true)
    }

    fn calibrate(&mut self) -> Result<(), Error> {
        self.enter();

        let shares = self.shares;
        if shares.recalibrate.replace(false) {
            self.line.forget(&mut self.store)?;
        }
        if shares.cal_white.replace(false) {
            self.line.request_white();
        }
        if shares.cal_black.replace(false) {
            self.line.request_black();
        }

        if !self.line.is_calibrated() && self.line.calibrate(&mut self.store)? {
            info!("line sensor calibration complete");
            self.line_loop.reset();
            self.line_loop.set_ref(0.0);
        }

        let store = &mut self.store;
        let imu_done = self.heading.with(|h| h.calibrate(store))?;

        if self.line.is_calibrated() && imu_done {
            self.set_state(Segment::Wait);
        }
        Ok(())
    }

    fn dispatch(&mut self, now: Instant) -> Result<(), Error> {
        use Segment::*;
        let params = self.params;
        let shares = self.shares;
        let estimate = &shares.estimate;

        match self.segment {
            Wait => {
                if self.enter() {
                    self.forward(0.0);
                    self.report_pose()?;
                }
            }

            Calibrate => self.calibrate()?,

            FollowLine => {
                if self.enter() {
                    self.line_loop.set_ref(0.0);
                    self.cruise();
                }
                self.steer(Steering::Line, now)?;
            }

            FixedForward => {
                if self.enter() {
                    self.end_point = self.center() + params.var_1.get();
                    self.cruise();
                }
                if self.center() >= self.end_point {
                    self.report_pose()?;
                    self.next_state();
                }
            }

            TurnAngle => {
                if self.enter() {
                    params.v_ref.put(0.0);
                    let target = self.heading() + params.var_1.get() * PI / 180.0;
                    params.var_2.put(target);
                    self.heading_loop.reset();
                    self.heading_loop.set_ref(target);
                }
                let error = self.aim(params.var_2.get());
                if libm::fabsf(error) <= HEADING_TOLERANCE {
                    self.next_state();
                    params.restore_v_ref();
                } else {
                    self.steer(Steering::Heading, now)?;
                }
            }

            GoToPoint => {
                if self.enter() {
                    self.cruise();
                    self.heading_loop.reset();
                }
                let (x, y) = self.position();
                let target = libm::atan2f(params.var_2.get() - y, params.var_1.get() - x);
                let error = self.aim(target);
                let facing = params.v_ref.get() == 0.0 && libm::fabsf(error) <= HEADING_TOLERANCE;
                if facing || self.at_point() {
                    write!(self.out, "{},{}\r\n", x, y)?;
                    write!(self.out, "Next State: {}\r\n", params.next_state.get())?;
                    self.next_state();
                    params.restore_v_ref();
                } else {
                    self.steer(Steering::Heading, now)?;
                }
            }

            FollowLineForTime => {
                if self.enter() {
                    self.segment_start = now;
                    self.cruise();
                    self.line_loop.reset();
                    self.line_loop.set_ref(0.0);
                }
                let limit = Duration::from_millis(libm::fabsf(params.var_1.get()) as u64);
                if now.saturating_duration_since(self.segment_start) >= limit {
                    self.next_state();
                } else {
                    self.steer(Steering::Line, now)?;
                }
            }

            FollowLineToPoint => {
                if self.enter() {
                    self.cruise();
                    self.line_loop.reset();
                }
                if self.at_point() {
                    self.next_state();
                } else {
                    self.steer(Steering::Line, now)?;
                }
            }

            StraightBeforeLine => {
                if self.enter() {
                    self.cruise();
                    self.end_point = self.center() + 50.0;
                }
                if self.center() >= self.end_point {
                    self.set_state(FollowLineBeforeFork);
                }
            }

            FollowLineBeforeFork => {
                if self.enter() {
                    self.line_loop.reset();
                    self.line_loop.set_ref(0.0);
                    self.cruise();
                }
                if estimate.x.get() >= 725.0 {
                    self.set_state(ForceRightFork);
                } else {
                    self.steer(Steering::Line, now)?;
                }
            }

            ForceRightFork => {
                if self.enter() {
                    self.segment_start = now;
                    let v_ref = params.v_ref.get();
                    self.shares.drive(v_ref * 1.75, v_ref);
                }
                if now.saturating_duration_since(self.segment_start) >= Duration::from_millis(500) {
                    self.set_state(LineToDiamond);
                }
            }

            LineToDiamond => {
                if self.enter() {
                    self.line_loop.reset();
                    self.line_loop.set_ref(0.0);
                    self.cruise();
                }
                let (x, y) = self.position();
                if (x >= 900.0 && y <= 600.0) || self.heading() <= -PI / 2.0 + 0.1 {
                    write!(self.out, "X_LF2D: {}\r\n", x)?;
                    write!(self.out, "Y_LF2D: {}\r\n", y)?;
                    write!(self.out, "H_LF2D: {}\r\n", estimate.yaw.get())?;
                    self.set_state(DiamondToCp1);
                } else {
                    self.steer(Steering::Line, now)?;
                }
            }

            DiamondToCp1 => {
                params.point(950.0, 450.0, true, false);
                self.chain(GoToPoint, TurnToCp2);
            }

            TurnToCp2 => {
                params.point(1300.0, 650.0, false, false);
                params.v_ref.put(0.0);
                self.chain(GoToPoint, GoToLineBeforeCp2);
            }

            GoToLineBeforeCp2 => {
                estimate.place(950.0, 425.0);
                params.point(1300.0, 650.0, false, true);
                self.chain(GoToPoint, LineToCp2);
            }

            LineToCp2 => {
                params.var_1.put(800.0);
                self.chain(FollowLineForTime, LineBeforeCp3);
            }

            LineBeforeCp3 => {
                estimate.place(1400.0, 800.0);
                params.var_1.put(400.0);
                self.chain(FollowLineForTime, TurnToLineBeforeCp3);
            }

            TurnToLineBeforeCp3 => {
                params.point(1600.0, 100.0, false, false);
                params.v_ref.put(0.0);
                self.chain(GoToPoint, GoToLineBeforeCp3);
            }

            GoToLineBeforeCp3 => {
                params.point(1600.0, 100.0, true, false);
                self.chain(GoToPoint, TurnToCp3);
            }

            TurnToCp3 => {
                let (x, y) = self.position();
                write!(self.out, "T2C3 X, Y: {}, {}\r\n", x, y)?;
                self.set_heading(-PI / 2.0)?;
                params.var_1.put(-180.0);
                self.chain(TurnAngle, GoToLineBeforeCp4);
            }

            GoToLineBeforeCp4 => {
                let (x, y) = self.position();
                let dist_yaw = estimate.dist_yaw.get();
                write!(self.out, "X, Y: {}, {}\r\n", x, y)?;
                write!(self.out, "dist yaw: {}\r\n", dist_yaw)?;
                estimate.place(1600.0, 100.0);
                self.set_heading(dist_yaw)?;
                params.point(1100.0, 100.0, false, true);
                self.chain(GoToPoint, FollowLineToCp4);
            }

            FollowLineToCp4 => {
                self.bump_stop = false;
                params.point(900.0, 100.0, false, true);
                self.chain(FollowLineToPoint, TurnForGarage);
            }

            TurnForGarage => {
                estimate.place(800.0, 150.0);
                params.var_1.put(-180.0);
                self.chain(TurnAngle, MoveInGarage);
            }

            MoveInGarage => {
                write!(self.out, "dist, head: {}, {}\r\n", estimate.dist_yaw.get(), self.heading())?;
                self.set_heading(-PI)?;
                params.point(160.0, 150.0, false, true);
                self.chain(GoToPoint, TurnToGarageExit);
            }

            TurnToGarageExit => {
                write!(self.out, "dist, head: {}, {}\r\n", estimate.dist_yaw.get(), self.heading())?;
                params.var_1.put(-260.0);
                self.chain(TurnAngle, GoToGarageExit);
            }

            GoToGarageExit => {
                self.bump_wall = true;
                write!(self.out, "dist, head: {}, {}\r\n", estimate.dist_yaw.get(), self.heading())?;
                estimate.place(175.0, 175.0);
                self.set_heading(-3.0 * PI / 2.0)?;
                params.point(100.0, 400.0, true, false);
                self.chain(GoToPoint, FollowLineToWall);
            }

            FollowLineToWall => {
                params.v_ref.put(100.0);
                self.bump_wall = true;
                params.var_1.put(2000.0);
                // The wall bump normally ends this segment first
                self.chain(FollowLineForTime, ReverseFromWall);
            }

            ReverseFromWall => {
                if self.enter() {
                    self.bump_wall = false;
                    self.bumped.put(false);
                    self.set_heading(-3.0 * PI / 2.0)?;
                    estimate.place(100.0, 675.0);
                    self.end_point = self.center() - 100.0;
                    self.forward(-200.0);
                }
                if self.center() <= self.end_point {
                    write!(self.out, "reversed\r\n")?;
                    self.set_state(TurnToCup2);
                }
            }

            TurnToCup2 => {
                params.point(500.0, 500.0, false, false);
                params.v_ref.put(0.0);
                self.chain(GoToPoint, GoToCup2);
            }

            GoToCup2 => {
                self.set_heading(PI)?;
                params.point(500.0, 500.0, false, true);
                self.chain(GoToPoint, TurnToCp6);
            }

            TurnToCp6 => {
                params.point(100.0, 300.0, false, false);
                params.v_ref.put(0.0);
                self.chain(GoToPoint, GoToCp6);
            }

            GoToCp6 => {
                params.point(100.0, 300.0, false, true);
                self.chain(GoToPoint, FollowLineToCp6);
            }

            FollowLineToCp6 => {
                params.var_1.put(400.0);
                self.chain(FollowLineForTime, Wait);
            }
        }
        Ok(())
    }
}

impl<A, const N: usize, I, S, W> Routine for PathDirector<'_, A, N, I, S, W>
where
    A: AnalogInput,
    I: HeadingImu,
    S: CalibrationStore,
    W: Write,
{
    fn step(&mut self, now: Instant) -> Result<(), Error> {
        self.heading.with(|h| h.sample(now))?;

        if self.check_bump(now)? {
            return Ok(());
        }

        self.line_loop.gain_update(self.tuning.line.get());
        self.heading_loop.gain_update(self.tuning.heading.get());

        let requested = self.shares.segment.get();
        if requested != self.segment.code() {
            match Segment::from_code(requested) {
                Some(segment) => self.set_state(segment),
                None => {
                    warn!("unknown segment {}", requested);
                    self.set_state(Segment::Wait);
                }
            }
        }

        self.dispatch(now)
    }

    fn halt(&mut self) {
        self.forward(0.0);
    }
}
