//! Bounded buffer of server stderr lines
//!
//! Written only by the transport's drain task, read by whoever needs failure
//! context. The lock is held for a single push or clone and never across an
//! await point, so neither side can stall the other.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared FIFO of diagnostic lines; oldest lines are evicted first
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl DiagnosticLog {
    /// Create a buffer holding at most `capacity` lines (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        // A panicking writer cannot leave a VecDeque half-updated
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a line, evicting the oldest when full
    pub fn push(&self, line: String) {
        let mut lines = self.lock();
        while lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Copy of the current contents, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    /// Current contents joined with newlines
    pub fn tail_text(&self) -> String {
        self.snapshot().join("\n")
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
