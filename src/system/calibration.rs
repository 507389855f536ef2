//! Calibration persistence
//!
//! Calibration results are kept as short comma-separated text records so they
//! can be inspected and edited by hand:
//!
//! - line sensor: two lines, the white readings then the black readings, one
//!   raw ADC value per channel
//! - IMU: one line with the eleven offset/radius coefficients
//!
//! When a record exists at startup the matching calibration step is skipped.
//! A record with the wrong number of entries is a hard error rather than a
//! silent fallback to recalibration.

use core::fmt::Write;
use core::str::FromStr;

use heapless::{String, Vec};

use crate::system::error::Error;

/// Longest record the store holds, in bytes
pub const RECORD_LEN: usize = 256;

/// One text record
pub type Record = String<RECORD_LEN>;

/// Record name of the line sensor white/black table
pub const LINE_RECORD: &str = "line";

/// Record name of the IMU coefficient table
pub const IMU_RECORD: &str = "imu";

/// Named text records that survive a reset
pub trait CalibrationStore {
    /// Fetch a record, `None` if it was never saved
    fn load(&mut self, name: &str) -> Result<Option<Record>, Error>;

    /// Create or replace a record
    fn save(&mut self, name: &str, record: &str) -> Result<(), Error>;

    /// Forget a record so the next start recalibrates
    fn remove(&mut self, name: &str) -> Result<(), Error>;
}

/// Parse one comma-separated line into exactly `N` values
pub fn parse_row<T: FromStr + Copy + Default, const N: usize>(line: &str) -> Result<[T; N], Error> {
    let line = line.trim();
    let found = if line.is_empty() { 0 } else { line.split(',').count() };
    if found != N {
        return Err(Error::CalibrationLength { expected: N, found });
    }

    let mut values = [T::default(); N];
    for (slot, entry) in values.iter_mut().zip(line.split(',')) {
        *slot = entry.trim().parse().map_err(|_| Error::CalibrationParse)?;
    }
    Ok(values)
}

/// Append `values` as one comma-separated line
pub fn write_row<T: core::fmt::Display>(record: &mut Record, values: &[T]) -> Result<(), Error> {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            record.push(',').map_err(|_| Error::CalibrationStore)?;
        }
        write!(record, "{}", value).map_err(|_| Error::CalibrationStore)?;
    }
    record.push('\n').map_err(|_| Error::CalibrationStore)
}

/// Store of records held in RAM. Lost on reset; used when no flash
/// region is reserved and in tests.
pub struct MemoryStore<const N: usize> {
    records: Vec<(&'static str, Record), N>,
}

impl<const N: usize> MemoryStore<N> {
    pub const fn new() -> Self {
        Self { records: Vec::new() }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.records.iter().position(|(n, _)| *n == name)
    }
}

impl<const N: usize> Default for MemoryStore<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> CalibrationStore for MemoryStore<N> {
    fn load(&mut self, name: &str) -> Result<Option<Record>, Error> {
        Ok(self.position(name).map(|i| self.records[i].1.clone()))
    }

    fn save(&mut self, name: &str, record: &str) -> Result<(), Error> {
        let mut text = Record::new();
        text.push_str(record).map_err(|_| Error::CalibrationStore)?;

        let key = match name {
            LINE_RECORD => LINE_RECORD,
            IMU_RECORD => IMU_RECORD,
            _ => return Err(Error::CalibrationStore),
        };

        match self.position(name) {
            Some(i) => self.records[i].1 = text,
            None => self.records.push((key, text)).map_err(|_| Error::CalibrationStore)?,
        }
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), Error> {
        if let Some(i) = self.position(name) {
            self.records.swap_remove(i);
        }
        Ok(())
    }
}
