//! Data Transfer Task
//!
//! Streams the samples logged during a step test back to the operator as
//! CSV, one row per step so the link is never flooded:
//!
//! ```text
//! lt,rt,lp,rp,lv,rv
//! 20000,20000,0.0123,0.0119,61.2,59.8
//! ...
//! Test Data Transfer Complete
//! ```
//!
//! Columns are left/right sample time (µs since the test started), wheel
//! angle (rad) and wheel speed (mm/s). Streaming starts once the test has
//! completed and logging has stopped.

use core::fmt::Write;

use embassy_time::{Duration, Instant};

use crate::system::error::Error;
use crate::system::scheduler::Routine;
use crate::system::shares::{Shares, WheelSamples};

/// Data transfer task period
pub const TRANSFER_PERIOD: Duration = Duration::from_millis(20);

/// First line of every transfer
pub const HEADER: &str = "lt,rt,lp,rp,lv,rv\r\n";

/// Last line of every transfer
pub const COMPLETE: &str = "Test Data Transfer Complete\r\n";

fn has_sample(samples: &WheelSamples) -> bool {
    !samples.time.is_empty() && !samples.position.is_empty() && !samples.velocity.is_empty()
}

pub struct DataTransfer<'a, W> {
    out: W,
    shares: &'a Shares,
    sent_header: bool,
}

impl<'a, W: Write> DataTransfer<'a, W> {
    pub fn new(out: W, shares: &'a Shares) -> Self {
        Self {
            out,
            shares,
            sent_header: false,
        }
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.out.write_str(COMPLETE)?;
        self.sent_header = false;
        info!("test data transfer complete");
        Ok(())
    }
}

impl<W: Write> Routine for DataTransfer<'_, W> {
    fn step(&mut self, _now: Instant) -> Result<(), Error> {
        let shares = self.shares;
        if shares.data_transfer.get() {
            // A new test took over the queues
            self.sent_header = false;
            return Ok(());
        }
        if !shares.test_complete.get() {
            return Ok(());
        }

        let (left, right) = (&shares.left.samples, &shares.right.samples);
        if !has_sample(left) || !has_sample(right) {
            if self.sent_header {
                if !left.is_empty() || !right.is_empty() {
                    warn!("dropping unmatched samples");
                    left.clear();
                    right.clear();
                }
                self.finish()?;
            }
            return Ok(());
        }

        if !self.sent_header {
            self.out.write_str(HEADER)?;
            self.sent_header = true;
        }

        if let (Some(lt), Some(rt), Some(lp), Some(rp), Some(lv), Some(rv)) = (
            left.time.pop(),
            right.time.pop(),
            left.position.pop(),
            right.position.pop(),
            left.velocity.pop(),
            right.velocity.pop(),
        ) {
            write!(self.out, "{},{},{},{},{},{}\r\n", lt, rt, lp, rp, lv, rv)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::console::Console;
    use heapless::String;

    fn ms(value: u64) -> Instant {
        Instant::from_millis(value)
    }

    fn log(samples: &WheelSamples, time: u32, position: f32, velocity: f32) {
        samples.time.push(time);
        samples.position.push(position);
        samples.velocity.push(velocity);
    }

    #[test]
    fn waits_while_logging() {
        let console: Console<String<512>> = Console::new(String::new());
        let shares = Shares::new();
        let mut task = DataTransfer::new(&console, &shares);
        log(&shares.left.samples, 20_000, 0.5, 10.0);
        log(&shares.right.samples, 20_000, 0.25, 5.0);

        shares.data_transfer.put(true);
        shares.test_complete.put(false);
        task.step(ms(0)).unwrap();
        shares.data_transfer.put(false);
        task.step(ms(20)).unwrap();
        assert!(console.with(|s| s.is_empty()));
    }

    #[test]
    fn streams_header_rows_and_sentinel() {
        let console: Console<String<512>> = Console::new(String::new());
        let shares = Shares::new();
        let mut task = DataTransfer::new(&console, &shares);
        log(&shares.left.samples, 20_000, 0.5, 10.0);
        log(&shares.right.samples, 20_000, 0.25, 5.0);
        log(&shares.left.samples, 40_000, 1.0, 20.0);
        log(&shares.right.samples, 40_000, 0.5, 10.5);
        shares.test_complete.put(true);

        task.step(ms(0)).unwrap();
        task.step(ms(20)).unwrap();
        task.step(ms(40)).unwrap();
        task.step(ms(60)).unwrap();

        let expected = "lt,rt,lp,rp,lv,rv\r\n\
                        20000,20000,0.5,0.25,10,5\r\n\
                        40000,40000,1,0.5,20,10.5\r\n\
                        Test Data Transfer Complete\r\n";
        assert_eq!(console.with(|s| s.clone()).as_str(), expected);
    }

    #[test]
    fn unmatched_samples_are_dropped_at_the_end() {
        let console: Console<String<512>> = Console::new(String::new());
        let shares = Shares::new();
        let mut task = DataTransfer::new(&console, &shares);
        log(&shares.left.samples, 20_000, 0.5, 10.0);
        log(&shares.left.samples, 40_000, 1.0, 20.0);
        log(&shares.right.samples, 20_000, 0.25, 5.0);
        shares.test_complete.put(true);

        task.step(ms(0)).unwrap();
        task.step(ms(20)).unwrap();
        assert!(shares.left.samples.is_empty());
        let text = console.with(|s| s.clone());
        assert!(text.ends_with(COMPLETE));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn each_test_gets_its_own_header() {
        let console: Console<String<512>> = Console::new(String::new());
        let shares = Shares::new();
        let mut task = DataTransfer::new(&console, &shares);
        shares.test_complete.put(true);

        for round in 0..2u64 {
            log(&shares.left.samples, 20_000, 0.5, 10.0);
            log(&shares.right.samples, 20_000, 0.25, 5.0);
            task.step(ms(100 * round)).unwrap();
            task.step(ms(100 * round + 20)).unwrap();
            // Nothing more to send
            task.step(ms(100 * round + 40)).unwrap();
        }
        let text = console.with(|s| s.clone());
        assert_eq!(text.matches(HEADER).count(), 2);
        assert_eq!(text.matches(COMPLETE).count(), 2);
    }
}
