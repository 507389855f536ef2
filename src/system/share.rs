//! Shared values between cooperative tasks
//!
//! A [`Share`] is a named single-value cell. Tasks run one step at a time, so
//! plain cells are enough for values only touched from the scheduler loop
//! ([`LocalShare`]). Values that may also be written from interrupt context,
//! like the bump flag, use [`ProtectedShare`], which wraps every access in a
//! critical section.
//!
//! By convention each share has a single writer. Nothing enforces this.

use core::cell::Cell;

use embassy_sync::blocking_mutex::{
    raw::{CriticalSectionRawMutex, NoopRawMutex, RawMutex},
    Mutex,
};

/// Share touched only from the scheduler loop
pub type LocalShare<T> = Share<NoopRawMutex, T>;

/// Share that may be written from interrupt context
pub type ProtectedShare<T> = Share<CriticalSectionRawMutex, T>;

/// Named cell holding one `Copy` value
pub struct Share<M: RawMutex, T: Copy> {
    name: &'static str,
    value: Mutex<M, Cell<T>>,
}

impl<M: RawMutex, T: Copy> Share<M, T> {
    /// Create a share holding `initial`
    pub const fn new(name: &'static str, initial: T) -> Self {
        Self {
            name,
            value: Mutex::new(Cell::new(initial)),
        }
    }

    /// Current value
    pub fn get(&self) -> T {
        self.value.lock(|cell| cell.get())
    }

    /// Overwrite the value
    pub fn put(&self, value: T) {
        self.value.lock(|cell| cell.set(value));
    }

    /// Store `value` and return what was there before, in one access
    pub fn replace(&self, value: T) -> T {
        self.value.lock(|cell| cell.replace(value))
    }

    /// Read-modify-write in one access
    pub fn update(&self, f: impl FnOnce(T) -> T) -> T {
        self.value.lock(|cell| {
            let next = f(cell.get());
            cell.set(next);
            next
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<M: RawMutex, T: Copy> Share<M, Option<T>> {
    /// Take the pending value, leaving `None`
    pub fn take(&self) -> Option<T> {
        self.replace(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_returns_latest_value() {
        let speed: LocalShare<f32> = Share::new("speed", 0.0);
        speed.put(120.0);
        speed.put(-40.0);
        assert_eq!(speed.get(), -40.0);
        assert_eq!(speed.name(), "speed");
    }

    #[test]
    fn protected_share_updates_in_place() {
        let ack: ProtectedShare<u8> = Share::new("segment ack", 2);
        assert_eq!(ack.update(|n| n.saturating_sub(1)), 1);
        assert_eq!(ack.update(|n| n.saturating_sub(1)), 0);
        assert_eq!(ack.update(|n| n.saturating_sub(1)), 0);
    }

    #[test]
    fn take_consumes_pending_setpoint() {
        let setpoint: LocalShare<Option<f32>> = Share::new("setpoint", None);
        setpoint.put(Some(200.0));
        assert_eq!(setpoint.take(), Some(200.0));
        assert_eq!(setpoint.take(), None);
    }
}
