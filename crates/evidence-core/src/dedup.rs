//! In-flight guard keyed by `(device_id, window)`
//!
//! The task-creation call is only known to be idempotent through the server's
//! "already completed" answer, so two concurrent runs for the same device and
//! window are refused on the caller side.
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::data_model::VideoWindow;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub device_id: String,
    pub window_start: i64,
    pub window_end: i64,
}

impl DedupKey {
    pub fn new(device_id: &str, window: &VideoWindow) -> Self {
        Self {
            device_id: device_id.to_string(),
            window_start: window.start.timestamp(),
            window_end: window.end.timestamp(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DedupGuard {
    in_flight: Arc<Mutex<HashSet<DedupKey>>>,
}

impl DedupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the key is already being processed.
    pub fn try_acquire(&self, key: DedupKey) -> Option<InFlight> {
        let mut set = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !set.insert(key.clone()) {
            return None;
        }
        Some(InFlight {
            key,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn len(&self) -> usize {
        self.in_flight.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases its key on drop.
#[derive(Debug)]
pub struct InFlight {
    key: DedupKey,
    in_flight: Arc<Mutex<HashSet<DedupKey>>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        set.remove(&self.key);
    }
}
