use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::ImuSample;

/// Holds the latest unsent sample of one sensor category.
///
/// A new sample replaces an unsent one; nothing is queued.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotSlot<T> {
    latest: Option<T>,
    updated: bool,
}

impl<T: Copy> SnapshotSlot<T> {
    pub const fn new() -> Self {
        Self {
            latest: None,
            updated: false,
        }
    }

    pub fn store(&mut self, sample: T) {
        self.latest = Some(sample);
        self.updated = true;
    }

    /// Whether a sample is waiting to be sent.
    pub fn is_updated(&self) -> bool {
        self.updated
    }

    /// Take the pending sample and clear the updated flag.
    pub fn take(&mut self) -> Option<T> {
        if !self.updated {
            return None;
        }
        self.updated = false;
        self.latest
    }

    /// Most recent sample, sent or not.
    pub fn peek(&self) -> Option<T> {
        self.latest
    }
}

impl<T: Copy> Default for SnapshotSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// IMU sample stamped with its wrapping arrival counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StampedImu {
    pub sample: ImuSample,
    pub seq: u8,
}

#[derive(Debug, Default)]
struct ImuState {
    slot: SnapshotSlot<StampedImu>,
    next_seq: u8,
}

/// Shared IMU snapshot, written by the sensor callback thread and read by
/// the tick thread. The lock is only held to copy a sample in or out.
#[derive(Debug, Clone, Default)]
pub struct ImuHandle {
    inner: Arc<Mutex<ImuState>>,
}

impl ImuHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ImuState> {
        // A panicking writer cannot leave a half-copied sample behind.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store a new sample, returning the sequence number it was given.
    pub fn store(&self, sample: ImuSample) -> u8 {
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq = seq.wrapping_add(1);
        state.slot.store(StampedImu { sample, seq });
        seq
    }

    pub fn take(&self) -> Option<StampedImu> {
        self.lock().slot.take()
    }

    pub fn peek(&self) -> Option<StampedImu> {
        self.lock().slot.peek()
    }

    pub fn is_updated(&self) -> bool {
        self.lock().slot.is_updated()
    }
}
