//! Single-assignment value cell shared between pipeline stages.
//!
//! An [`Eventual`] holds zero or one value. A producer publishes with
//! [`Eventual::set`]; any number of consumers wait with
//! [`Eventual::peek_blocking`], which leaves the value in place so later readers
//! observe the same value. The cell never empties itself: the component owning
//! it resets it between blocks with [`Eventual::take`] or
//! [`Eventual::take_blocking`].
//!
//! Waiting uses the same latch as the snapshot generation signal: a rendezvous
//! channel that never carries a message. `set` drops its only sender, which
//! wakes every reader at once; emptying the cell arms a fresh latch.

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    /// Dropped by `set`.
    release: Option<Sender<()>>,
    latch: Receiver<()>,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        let (release, latch) = bounded(0);
        Self {
            value: None,
            release: Some(release),
            latch,
        }
    }

    /// Remove the value, arming a fresh latch if there was one.
    fn take(&mut self) -> Option<T> {
        let value = self.value.take()?;
        *self = Self::empty();
        Some(value)
    }
}

#[derive(Debug)]
pub struct Eventual<T> {
    slot: Mutex<Slot<T>>,
}

impl<T> Default for Eventual<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Eventual<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::empty()),
        }
    }

    /// Publish the value and wake every waiting reader.
    ///
    /// # Panics
    ///
    /// Panics if the cell already holds a value: each cell is written at most once
    /// between resets.
    pub fn set(&self, value: T) {
        let mut slot = self.slot.lock();
        assert!(slot.value.is_none(), "Eventual::set on a cell that is already set");
        slot.value = Some(value);
        slot.release = None;
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().value.is_some()
    }

    /// Empty the cell without waiting, returning the value if there was one.
    pub fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    /// Wait for a value and remove it from the cell.
    pub fn take_blocking(&self) -> T {
        self.wait_for(Slot::take)
    }

    /// Apply `read` to the slot until it yields, parking on the latch seen under
    /// the same lock in between.
    fn wait_for<R>(&self, mut read: impl FnMut(&mut Slot<T>) -> Option<R>) -> R {
        loop {
            let latch = {
                let mut slot = self.slot.lock();
                if let Some(out) = read(&mut *slot) {
                    return out;
                }
                slot.latch.clone()
            };
            // Nothing is ever sent; `recv` returns once `set` drops the sender.
            let _ = latch.recv();
        }
    }
}

impl<T: Clone> Eventual<T> {
    /// Block until the value has been set, then return a copy of it.
    pub fn peek_blocking(&self) -> T {
        self.wait_for(|slot| slot.value.clone())
    }

    /// Non-blocking read.
    pub fn peek(&self) -> Option<T> {
        self.slot.lock().value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{Arc, Barrier},
        thread,
        time::Duration,
    };

    #[test]
    fn test_peek_after_set() {
        let cell = Eventual::new();
        cell.set(7u64);
        assert_eq!(cell.peek_blocking(), 7);
        // Reading does not consume
        assert_eq!(cell.peek_blocking(), 7);
        assert!(cell.is_set());
    }

    #[test]
    fn test_empty_cell() {
        let cell: Eventual<u64> = Eventual::new();
        assert!(!cell.is_set());
        assert_eq!(cell.peek(), None);
        assert_eq!(cell.take(), None);
    }

    #[test]
    fn test_peek_blocks_until_set() {
        let cell = Arc::new(Eventual::new());
        let reader = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || cell.peek_blocking())
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!reader.is_finished());

        cell.set(String::from("ready"));
        assert_eq!(reader.join().unwrap(), "ready");
    }

    #[test]
    fn test_many_readers_observe_same_value() {
        let cell = Arc::new(Eventual::new());
        let start = Arc::new(Barrier::new(9));

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let cell = Arc::clone(&cell);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    cell.peek_blocking()
                })
            })
            .collect();

        start.wait();
        cell.set(42u32);

        for reader in readers {
            assert_eq!(reader.join().unwrap(), 42);
        }
        assert_eq!(cell.peek(), Some(42));
    }

    #[test]
    fn test_reset_allows_reuse() {
        let cell = Eventual::new();
        cell.set(1u8);
        assert_eq!(cell.take(), Some(1));
        assert!(!cell.is_set());

        cell.set(2u8);
        assert_eq!(cell.peek_blocking(), 2);
        assert_eq!(cell.take_blocking(), 2);
        assert!(!cell.is_set());
    }

    #[test]
    fn test_reset_rearms_latch() {
        let cell = Arc::new(Eventual::new());
        cell.set(1u32);
        assert_eq!(cell.take(), Some(1));

        let reader = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || cell.peek_blocking())
        };
        thread::sleep(Duration::from_millis(20));
        // The released latch of the previous value must not wake the reader
        assert!(!reader.is_finished());

        cell.set(2);
        assert_eq!(reader.join().unwrap(), 2);
    }

    #[test]
    fn test_take_blocking_waits_for_value() {
        let cell = Arc::new(Eventual::new());
        let taker = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || cell.take_blocking())
        };

        thread::sleep(Duration::from_millis(10));
        cell.set(vec![1, 2, 3]);
        assert_eq!(taker.join().unwrap(), vec![1, 2, 3]);
        assert!(!cell.is_set());
    }

    #[test]
    #[should_panic(expected = "already set")]
    fn test_double_set_panics() {
        let cell = Eventual::new();
        cell.set(1u8);
        cell.set(2u8);
    }
}
