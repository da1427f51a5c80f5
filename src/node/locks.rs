//! Volume Lock Table
//!
//! Per-volume mutual exclusion for lifecycle-mutating calls. Acquisition is
//! non-blocking: a second caller for the same volume ID fails immediately and
//! is expected to retry with its own backoff. The returned guard releases the
//! lock when dropped, on every exit path.

use crate::error::{Error, Result};
use dashmap::DashSet;
use tracing::trace;

/// Set of volume IDs with an operation in flight
#[derive(Debug, Default)]
pub struct VolumeLocks {
    inflight: DashSet<String>,
}

impl VolumeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock for `volume_id` without waiting
    pub fn try_acquire(&self, volume_id: &str) -> Option<VolumeLockGuard<'_>> {
        if self.inflight.insert(volume_id.to_string()) {
            trace!(volume_id, "volume lock acquired");
            Some(VolumeLockGuard {
                locks: self,
                volume_id: volume_id.to_string(),
            })
        } else {
            None
        }
    }

    /// Like [`try_acquire`](Self::try_acquire) but maps contention to
    /// [`Error::OperationInProgress`]
    pub fn acquire(&self, volume_id: &str) -> Result<VolumeLockGuard<'_>> {
        self.try_acquire(volume_id)
            .ok_or_else(|| Error::OperationInProgress {
                volume_id: volume_id.to_string(),
            })
    }

    pub fn is_locked(&self, volume_id: &str) -> bool {
        self.inflight.contains(volume_id)
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}

/// Held lock for one volume ID
#[derive(Debug)]
pub struct VolumeLockGuard<'a> {
    locks: &'a VolumeLocks,
    volume_id: String,
}

impl VolumeLockGuard<'_> {
    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }
}

impl Drop for VolumeLockGuard<'_> {
    fn drop(&mut self) {
        self.locks.inflight.remove(&self.volume_id);
        trace!(volume_id = %self.volume_id, "volume lock released");
    }
}
