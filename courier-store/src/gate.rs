//! Write backpressure gate.

use std::sync::{Condvar, Mutex};

/// The store's sole backpressure mechanism.
///
/// An external capacity monitor blocks writers while it evicts old
/// messages to create headroom. Writers call
/// [`wait_for_permission_to_write`](WriteGate::wait_for_permission_to_write)
/// *before* acquiring the write locks for a large write, so eviction can
/// take those locks itself.
#[derive(Default)]
pub struct WriteGate {
    blocked: Mutex<bool>,
    unblocked: Condvar,
}

impl WriteGate {
    /// Create an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until writing is permitted.
    pub fn wait_for_permission_to_write(&self) {
        let mut blocked = self.blocked.lock().unwrap_or_else(|e| e.into_inner());
        while *blocked {
            blocked = self
                .unblocked
                .wait(blocked)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Stall or release writers.
    pub fn set_blocked(&self, blocked: bool) {
        *self.blocked.lock().unwrap_or_else(|e| e.into_inner()) = blocked;
        if !blocked {
            self.unblocked.notify_all();
        }
    }

    /// Whether writers are currently stalled.
    pub fn is_blocked(&self) -> bool {
        *self.blocked.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn open_gate_does_not_block() {
        let gate = WriteGate::new();
        gate.wait_for_permission_to_write();
    }

    #[test]
    fn blocked_writer_is_released() {
        let gate = Arc::new(WriteGate::new());
        gate.set_blocked(true);
        let (tx, rx) = mpsc::channel();
        let gate2 = Arc::clone(&gate);
        thread::spawn(move || {
            gate2.wait_for_permission_to_write();
            tx.send(()).unwrap();
        });
        // The writer must still be waiting
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        gate.set_blocked(false);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
}
