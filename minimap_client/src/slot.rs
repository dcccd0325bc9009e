//! Single-slot handoff from the network worker to the tick loop.
//!
//! Holds at most one value. A newer value replaces an unconsumed older one
//! (last write wins); the tick loop takes it at most once per tick.

use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
pub struct PendingSlot<T> {
    inner: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for PendingSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for PendingSlot<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T> PendingSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        // The critical sections cannot panic halfway, so a poisoned guard
        // still holds a consistent value.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores a value. Returns the value it replaced, if any.
    pub fn put(&self, value: T) -> Option<T> {
        self.lock().replace(value)
    }

    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins() {
        let slot = PendingSlot::new();
        assert!(slot.put("first").is_none());
        assert_eq!(slot.put("second"), Some("first"));
        assert_eq!(slot.take(), Some("second"));
        assert!(slot.take().is_none());
    }

    #[test]
    fn clones_share_the_slot() {
        let slot = PendingSlot::new();
        let worker = slot.clone();
        std::thread::spawn(move || {
            worker.put(7u32);
        })
        .join()
        .unwrap();
        assert!(!slot.is_empty());
        assert_eq!(slot.take(), Some(7));
    }
}
