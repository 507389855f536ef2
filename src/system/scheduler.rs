//! Cooperative priority scheduler
//!
//! Every routine is an object that advances by exactly one step per call and
//! keeps whatever it needs to resume in its own fields. The scheduler owns an
//! ordered task table and, on each pass, runs the single highest-priority
//! task whose period has elapsed.
//!
//! # Rules
//! - a period of zero means the task is ready on every pass
//! - among ready tasks the highest priority wins; equal priorities go to the
//!   task added first
//! - at most one task runs per pass
//! - a task's next deadline advances by whole periods from the previous one;
//!   a task that has fallen more than a period behind is re-anchored to the
//!   current time and counted as late
//! - a routine error ends scheduling: the caller gets the fault, runs
//!   [`Scheduler::fail_stop`] and reports the tables
//!
//! There is no preemption, so routines never observe a half-finished step of
//! another routine.

use core::fmt::{self, Write};

use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::system::error::Error;

/// A cooperative routine
pub trait Routine {
    /// Advance by one step
    fn step(&mut self, now: Instant) -> Result<(), Error>;

    /// Put any outputs this routine drives into a safe state. Called once,
    /// for every routine, after any routine has failed.
    fn halt(&mut self) {}
}

/// Bookkeeping for one routine
pub struct Task<'a> {
    name: &'static str,
    priority: u8,
    period: Duration,
    next_run: Option<Instant>,
    runs: u32,
    late: u32,
    routine: &'a mut dyn Routine,
}

impl<'a> Task<'a> {
    /// A task that first becomes ready on the first pass
    pub fn new(name: &'static str, priority: u8, period: Duration, routine: &'a mut dyn Routine) -> Self {
        Self {
            name,
            priority,
            period,
            next_run: None,
            runs: 0,
            late: 0,
            routine,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Number of completed steps
    pub fn runs(&self) -> u32 {
        self.runs
    }

    /// Number of times the task fell more than a period behind
    pub fn late(&self) -> u32 {
        self.late
    }

    fn is_ready(&self, now: Instant) -> bool {
        if self.period.as_ticks() == 0 {
            return true;
        }
        self.next_run.map_or(true, |deadline| now >= deadline)
    }

    fn reschedule(&mut self, now: Instant) {
        self.runs = self.runs.wrapping_add(1);
        if self.period.as_ticks() == 0 {
            self.next_run = Some(now);
            return;
        }

        let next = self.next_run.unwrap_or(now) + self.period;
        if next <= now {
            self.late = self.late.wrapping_add(1);
            self.next_run = Some(now + self.period);
        } else {
            self.next_run = Some(next);
        }
    }
}

/// A routine returned an error
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Fault {
    pub task: &'static str,
    pub error: Error,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.task, self.error)
    }
}

/// Fixed-capacity task table
pub struct Scheduler<'a, const N: usize> {
    tasks: Vec<Task<'a>, N>,
}

impl<'a, const N: usize> Scheduler<'a, N> {
    pub const fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Append a task. Tasks are only added at startup.
    pub fn add(&mut self, task: Task<'a>) -> Result<(), Error> {
        info!("adding task {} (priority {})", task.name, task.priority);
        self.tasks.push(task).map_err(|_| Error::TaskListFull)
    }

    pub fn tasks(&self) -> &[Task<'a>] {
        &self.tasks
    }

    /// Run the highest-priority ready task for one step.
    ///
    /// Returns the name of the task that ran, or `None` if nothing was due.
    pub fn run_pass(&mut self, now: Instant) -> Result<Option<&'static str>, Fault> {
        let mut chosen: Option<usize> = None;
        for (i, task) in self.tasks.iter().enumerate() {
            if !task.is_ready(now) {
                continue;
            }
            match chosen {
                Some(best) if self.tasks[best].priority >= task.priority => {}
                _ => chosen = Some(i),
            }
        }

        let Some(index) = chosen else {
            return Ok(None);
        };

        let task = &mut self.tasks[index];
        trace!("running {}", task.name);
        task.routine.step(now).map_err(|error| Fault { task: task.name, error })?;
        task.reschedule(now);
        Ok(Some(task.name))
    }

    /// Halt every routine after a fault
    pub fn fail_stop(&mut self) {
        for task in self.tasks.iter_mut() {
            warn!("halting {}", task.name);
            task.routine.halt();
        }
    }

    /// Write the task table to the diagnostics sink
    pub fn dump(&self, out: &mut impl Write) -> Result<(), Error> {
        write!(out, "{:<24}{:>5}{:>8}{:>10}{:>6}\r\n", "TASK", "PRI", "PERIOD", "RUNS", "LATE")?;
        for task in self.tasks.iter() {
            write!(
                out,
                "{:<24}{:>5}{:>8}{:>10}{:>6}\r\n",
                task.name,
                task.priority,
                task.period.as_millis(),
                task.runs,
                task.late
            )?;
        }
        Ok(())
    }
}

impl<const N: usize> Default for Scheduler<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::vec::Vec as StdVec;

    struct Recorder<'l> {
        name: &'static str,
        log: &'l RefCell<StdVec<&'static str>>,
        fail_at: Option<u32>,
        steps: u32,
        halted: bool,
    }

    impl<'l> Recorder<'l> {
        fn new(name: &'static str, log: &'l RefCell<StdVec<&'static str>>) -> Self {
            Self {
                name,
                log,
                fail_at: None,
                steps: 0,
                halted: false,
            }
        }
    }

    impl Routine for Recorder<'_> {
        fn step(&mut self, _now: Instant) -> Result<(), Error> {
            self.steps += 1;
            if self.fail_at == Some(self.steps) {
                return Err(Error::Sensor);
            }
            self.log.borrow_mut().push(self.name);
            Ok(())
        }

        fn halt(&mut self) {
            self.halted = true;
        }
    }

    fn ms(value: u64) -> Instant {
        Instant::from_millis(value)
    }

    #[test]
    fn higher_priority_runs_first_one_task_per_pass() {
        let log = RefCell::new(StdVec::new());
        let mut low = Recorder::new("low", &log);
        let mut high = Recorder::new("high", &log);

        let mut scheduler: Scheduler<'_, 4> = Scheduler::new();
        scheduler.add(Task::new("low", 1, Duration::from_millis(20), &mut low)).unwrap();
        scheduler.add(Task::new("high", 2, Duration::from_millis(20), &mut high)).unwrap();

        assert_eq!(scheduler.run_pass(ms(0)), Ok(Some("high")));
        assert_eq!(scheduler.run_pass(ms(0)), Ok(Some("low")));
        assert_eq!(scheduler.run_pass(ms(0)), Ok(None));
        assert_eq!(*log.borrow(), ["high", "low"]);
    }

    #[test]
    fn equal_priority_goes_to_first_added() {
        let log = RefCell::new(StdVec::new());
        let mut left = Recorder::new("left", &log);
        let mut right = Recorder::new("right", &log);

        let mut scheduler: Scheduler<'_, 4> = Scheduler::new();
        scheduler.add(Task::new("left", 2, Duration::from_millis(20), &mut left)).unwrap();
        scheduler.add(Task::new("right", 2, Duration::from_millis(20), &mut right)).unwrap();

        assert_eq!(scheduler.run_pass(ms(0)), Ok(Some("left")));
        assert_eq!(scheduler.run_pass(ms(0)), Ok(Some("right")));
    }

    #[test]
    fn period_is_enforced() {
        let log = RefCell::new(StdVec::new());
        let mut observer = Recorder::new("observer", &log);

        let mut scheduler: Scheduler<'_, 2> = Scheduler::new();
        scheduler.add(Task::new("observer", 4, Duration::from_millis(20), &mut observer)).unwrap();

        assert_eq!(scheduler.run_pass(ms(0)), Ok(Some("observer")));
        assert_eq!(scheduler.run_pass(ms(10)), Ok(None));
        assert_eq!(scheduler.run_pass(ms(19)), Ok(None));
        assert_eq!(scheduler.run_pass(ms(20)), Ok(Some("observer")));
        // Deadlines advance from the previous deadline, not from when it ran
        assert_eq!(scheduler.run_pass(ms(41)), Ok(Some("observer")));
        assert_eq!(scheduler.run_pass(ms(59)), Ok(None));
        assert_eq!(scheduler.run_pass(ms(60)), Ok(Some("observer")));
        assert_eq!(scheduler.tasks()[0].late(), 0);
    }

    #[test]
    fn falling_behind_reanchors_and_counts_late() {
        let log = RefCell::new(StdVec::new());
        let mut slow = Recorder::new("slow", &log);

        let mut scheduler: Scheduler<'_, 2> = Scheduler::new();
        scheduler.add(Task::new("slow", 1, Duration::from_millis(20), &mut slow)).unwrap();

        scheduler.run_pass(ms(0)).unwrap();
        assert_eq!(scheduler.run_pass(ms(75)), Ok(Some("slow")));
        assert_eq!(scheduler.tasks()[0].late(), 1);
        assert_eq!(scheduler.run_pass(ms(94)), Ok(None));
        assert_eq!(scheduler.run_pass(ms(95)), Ok(Some("slow")));
    }

    #[test]
    fn zero_period_is_always_ready_but_yields_to_priority() {
        let log = RefCell::new(StdVec::new());
        let mut idle = Recorder::new("idle", &log);
        let mut motor = Recorder::new("motor", &log);

        let mut scheduler: Scheduler<'_, 2> = Scheduler::new();
        scheduler.add(Task::new("idle", 0, Duration::from_ticks(0), &mut idle)).unwrap();
        scheduler.add(Task::new("motor", 2, Duration::from_millis(20), &mut motor)).unwrap();

        assert_eq!(scheduler.run_pass(ms(0)), Ok(Some("motor")));
        assert_eq!(scheduler.run_pass(ms(0)), Ok(Some("idle")));
        assert_eq!(scheduler.run_pass(ms(1)), Ok(Some("idle")));
        assert_eq!(scheduler.run_pass(ms(20)), Ok(Some("motor")));
    }

    #[test]
    fn routine_error_is_fatal_and_fail_stop_halts_all() {
        let log = RefCell::new(StdVec::new());
        let mut good = Recorder::new("good", &log);
        let mut bad = Recorder::new("bad", &log);
        bad.fail_at = Some(1);

        {
            let mut scheduler: Scheduler<'_, 2> = Scheduler::new();
            scheduler.add(Task::new("good", 1, Duration::from_millis(20), &mut good)).unwrap();
            scheduler.add(Task::new("bad", 5, Duration::from_millis(20), &mut bad)).unwrap();

            let fault = scheduler.run_pass(ms(0)).unwrap_err();
            assert_eq!(fault, Fault { task: "bad", error: Error::Sensor });
            scheduler.fail_stop();

            let mut table = std::string::String::new();
            scheduler.dump(&mut table).unwrap();
            assert!(table.contains("bad"));
        }
        assert!(good.halted);
        assert!(bad.halted);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn full_table_is_rejected() {
        let log = RefCell::new(StdVec::new());
        let mut a = Recorder::new("a", &log);
        let mut b = Recorder::new("b", &log);

        let mut scheduler: Scheduler<'_, 1> = Scheduler::new();
        scheduler.add(Task::new("a", 1, Duration::from_millis(20), &mut a)).unwrap();
        assert_eq!(
            scheduler.add(Task::new("b", 1, Duration::from_millis(20), &mut b)).err(),
            Some(Error::TaskListFull)
        );
    }
}
