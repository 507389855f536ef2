//! Calibration records in NOR flash
//!
//! Records are kept as keyed items through `sequential-storage`, which
//! spreads writes over the storage range and survives a reset mid-write.
//! Routines are synchronous, so each flash operation is driven to completion
//! with `block_on`.
//!
//! Removing a record stores an empty item in its place; an empty item reads
//! back as no record.

use core::ops::Range;

use embassy_futures::block_on;
use embedded_storage_async::nor_flash::NorFlash;
use sequential_storage::cache::NoCache;
use sequential_storage::map::{fetch_item, store_item, Key, SerializationError, Value};

use crate::system::calibration::{CalibrationStore, Record, IMU_RECORD, LINE_RECORD, RECORD_LEN};
use crate::system::error::Error;

/// Scratch space for one item: key, record text and item header
const BUFFER_LEN: usize = 2 * RECORD_LEN;

/// Storage keys, one per record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordKey {
    Line = 0,
    Imu = 1,
}

impl RecordKey {
    fn of(name: &str) -> Result<Self, Error> {
        match name {
            LINE_RECORD => Ok(RecordKey::Line),
            IMU_RECORD => Ok(RecordKey::Imu),
            _ => Err(Error::CalibrationMissing),
        }
    }
}

impl Key for RecordKey {
    fn serialize_into(&self, buffer: &mut [u8]) -> Result<usize, SerializationError> {
        if buffer.is_empty() {
            return Err(SerializationError::BufferTooSmall);
        }
        buffer[0] = *self as u8;
        Ok(1)
    }

    fn deserialize_from(buffer: &[u8]) -> Result<(Self, usize), SerializationError> {
        match buffer.first() {
            Some(0) => Ok((RecordKey::Line, 1)),
            Some(1) => Ok((RecordKey::Imu, 1)),
            Some(_) => Err(SerializationError::InvalidFormat),
            None => Err(SerializationError::BufferTooSmall),
        }
    }
}

/// Record text as stored, borrowed from the scratch buffer on the way out
struct Text<'a>(&'a str);

impl<'a> Value<'a> for Text<'a> {
    fn serialize_into(&self, buffer: &mut [u8]) -> Result<usize, SerializationError> {
        let bytes = self.0.as_bytes();
        let target = buffer
            .get_mut(..bytes.len())
            .ok_or(SerializationError::BufferTooSmall)?;
        target.copy_from_slice(bytes);
        Ok(bytes.len())
    }

    fn deserialize_from(buffer: &'a [u8]) -> Result<Self, SerializationError> {
        core::str::from_utf8(buffer)
            .map(Text)
            .map_err(|_| SerializationError::InvalidFormat)
    }
}

/// [`CalibrationStore`] over a range of NOR flash
pub struct FlashStore<F> {
    flash: F,
    range: Range<u32>,
    cache: NoCache,
    buffer: [u8; BUFFER_LEN],
}

impl<F: NorFlash> FlashStore<F> {
    /// `range` must span at least two erase sectors
    pub fn new(flash: F, range: Range<u32>) -> Self {
        Self {
            flash,
            range,
            cache: NoCache::new(),
            buffer: [0; BUFFER_LEN],
        }
    }

    /// Hand the flash back
    pub fn release(self) -> F {
        self.flash
    }

    fn store(&mut self, key: RecordKey, text: &str) -> Result<(), Error> {
        block_on(store_item(
            &mut self.flash,
            self.range.clone(),
            &mut self.cache,
            &mut self.buffer,
            &key,
            &Text(text),
        ))
        .map_err(|_| {
            error!("calibration flash write failed");
            Error::CalibrationStore
        })
    }

    /// Start over on an unreadable range, e.g. one left by older firmware
    fn wipe(&mut self) -> Result<(), Error> {
        warn!("calibration flash unreadable, erasing");
        block_on(self.flash.erase(self.range.start, self.range.end)).map_err(|_| Error::CalibrationStore)
    }
}

impl<F: NorFlash> CalibrationStore for FlashStore<F> {
    fn load(&mut self, name: &str) -> Result<Option<Record>, Error> {
        let key = RecordKey::of(name)?;
        let fetched = block_on(fetch_item::<RecordKey, Text, _>(
            &mut self.flash,
            self.range.clone(),
            &mut self.cache,
            &mut self.buffer,
            &key,
        ));

        let text = match fetched {
            Ok(Some(Text(text))) if !text.is_empty() => text,
            Ok(_) => return Ok(None),
            Err(sequential_storage::Error::Corrupted { .. }) => {
                self.wipe()?;
                return Ok(None);
            }
            Err(_) => return Err(Error::CalibrationStore),
        };
        let mut record = Record::new();
        record.push_str(text).map_err(|_| Error::CalibrationParse)?;
        Ok(Some(record))
    }

    fn save(&mut self, name: &str, record: &str) -> Result<(), Error> {
        let key = RecordKey::of(name)?;
        if record.len() > RECORD_LEN {
            return Err(Error::CalibrationStore);
        }
        self.store(key, record)?;
        info!("saved {} calibration to flash", name);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), Error> {
        let key = RecordKey::of(name)?;
        self.store(key, "")
    }
}
