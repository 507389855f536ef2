//! Bounded sample queues
//!
//! Fixed-capacity FIFOs used to buffer time/position/velocity samples until
//! the data transfer task drains them. In overwrite mode a push into a full
//! queue evicts the oldest sample; otherwise the push is rejected. Either way
//! producers poll [`Queue::is_full`] to learn that a test has filled its
//! buffers and should stop.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::{
    raw::{NoopRawMutex, RawMutex},
    Mutex,
};
use heapless::Deque;

/// Queue touched only from the scheduler loop
pub type LocalQueue<T, const N: usize> = Queue<NoopRawMutex, T, N>;

/// Named bounded FIFO of `N` values
pub struct Queue<M: RawMutex, T, const N: usize> {
    name: &'static str,
    overwrite: bool,
    items: Mutex<M, RefCell<Deque<T, N>>>,
}

impl<M: RawMutex, T, const N: usize> Queue<M, T, N> {
    /// Queue that rejects pushes when full
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            overwrite: false,
            items: Mutex::new(RefCell::new(Deque::new())),
        }
    }

    /// Queue that evicts its oldest value when full
    pub const fn with_overwrite(name: &'static str) -> Self {
        Self {
            name,
            overwrite: true,
            items: Mutex::new(RefCell::new(Deque::new())),
        }
    }

    /// Append a value. Returns `false` if the queue was full and the value
    /// was dropped. In overwrite mode the oldest value makes room and the
    /// push always succeeds.
    pub fn push(&self, value: T) -> bool {
        self.items.lock(|items| {
            let mut items = items.borrow_mut();
            if items.is_full() {
                if !self.overwrite {
                    return false;
                }
                items.pop_front();
            }
            items.push_back(value).is_ok()
        })
    }

    /// Remove the oldest value
    pub fn pop(&self) -> Option<T> {
        self.items.lock(|items| items.borrow_mut().pop_front())
    }

    pub fn is_full(&self) -> bool {
        self.items.lock(|items| items.borrow().is_full())
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock(|items| items.borrow().is_empty())
    }

    pub fn len(&self) -> usize {
        self.items.lock(|items| items.borrow().len())
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn clear(&self) {
        self.items.lock(|items| items.borrow_mut().clear());
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_push_when_full() {
        let q: LocalQueue<u32, 2> = Queue::new("time");
        assert!(q.push(1));
        assert!(q.push(2));
        assert!(q.is_full());
        assert!(!q.push(3));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn overwrite_evicts_oldest() {
        let q: LocalQueue<f32, 3> = Queue::with_overwrite("velocity");
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            assert!(q.push(v));
        }
        assert!(q.is_full());
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), Some(3.0));
        assert_eq!(q.pop(), Some(4.0));
        assert_eq!(q.pop(), Some(5.0));
    }

    #[test]
    fn clear_empties_queue() {
        let q: LocalQueue<f32, 4> = Queue::new("position");
        q.push(0.5);
        q.push(0.7);
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.capacity(), 4);
    }
}
