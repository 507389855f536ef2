//! Operator console
//!
//! The serial link back to the operator is one peripheral, but the command
//! task, the path director, the data-transfer task and the fail-stop dump all
//! write to it. [`Console`] owns the writer behind a mutex and hands out
//! `&Console` as a [`core::fmt::Write`] sink, the same way the ADC is shared
//! between sensors.

use core::cell::RefCell;
use core::fmt::{self, Write};

use embassy_sync::blocking_mutex::{raw::NoopRawMutex, Mutex};

/// Writer shared between routines
pub struct Console<W> {
    inner: Mutex<NoopRawMutex, RefCell<W>>,
}

impl<W: Write> Console<W> {
    pub const fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(writer)),
        }
    }

    /// Run `f` with exclusive access to the underlying writer
    pub fn with<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        self.inner.lock(|writer| f(&mut writer.borrow_mut()))
    }
}

impl<W: Write> Write for &Console<W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.with(|writer| writer.write_str(s))
    }
}
