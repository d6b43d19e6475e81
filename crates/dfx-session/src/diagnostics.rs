//! Diagnostic log buffer.
//!
//! Best-effort lines for observability. The producer never blocks: when the
//! buffer is full the newest line is dropped and counted. A consumer drains
//! whatever is buffered on its own poll interval.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Bounded, lossy line buffer
#[derive(Clone)]
pub struct DiagnosticLog {
    tx: Sender<String>,
    rx: Receiver<String>,
    dropped: Arc<AtomicU64>,
}

impl DiagnosticLog {
    /// Create a buffer holding at most `capacity` lines
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append a line, dropping it if the buffer is full
    pub fn push(&self, line: impl Into<String>) {
        match self.tx.try_send(line.into()) {
            Ok(()) => {}
            Err(TrySendError::Full(line)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Diagnostic buffer full, dropped: {}", line);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Take every buffered line (non-blocking)
    pub fn drain(&self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    /// Number of lines currently buffered
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Lines lost to backpressure since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_in_order() {
        let log = DiagnosticLog::new(8);
        log.push("one");
        log.push("two".to_string());

        assert_eq!(log.len(), 2);
        assert_eq!(log.drain(), vec!["one", "two"]);
        assert!(log.is_empty());
    }

    #[test]
    fn test_lossy_when_full() {
        let log = DiagnosticLog::new(2);
        log.push("a");
        log.push("b");
        log.push("c");

        assert_eq!(log.dropped(), 1);
        assert_eq!(log.drain(), vec!["a", "b"]);

        // Space again after draining
        log.push("d");
        assert_eq!(log.drain(), vec!["d"]);
    }
}
