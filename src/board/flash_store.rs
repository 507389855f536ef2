//! Calibration storage in on-board flash
//!
//! The last two erase sectors of the 2 MB flash, past the end of the image in
//! `memory.x`, hold the calibration records.

use embassy_rp::flash::{Async, Flash, ERASE_SIZE};
use embassy_rp::peripherals::FLASH;
use romi_firmware::system::flash_store::FlashStore;

use super::StorageResources;

pub const FLASH_SIZE: usize = 2048 * 1024;

const STORAGE_SIZE: u32 = 2 * ERASE_SIZE as u32;

const STORAGE_OFFSET: u32 = FLASH_SIZE as u32 - STORAGE_SIZE;

pub type BoardStore = FlashStore<Flash<'static, FLASH, Async, FLASH_SIZE>>;

pub fn calibration_store(r: StorageResources) -> BoardStore {
    let flash = Flash::new(r.flash, r.dma);
    FlashStore::new(flash, STORAGE_OFFSET..STORAGE_OFFSET + STORAGE_SIZE)
}
