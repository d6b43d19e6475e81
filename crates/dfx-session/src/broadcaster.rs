//! Status Broadcaster
//!
//! Holds at most one observer per event kind:
//!
//! | Kind     | Payload                                   |
//! |----------|-------------------------------------------|
//! | status   | connecting / connected / disconnecting / disconnected |
//! | progress | free-form diagnostic lines                |
//!
//! Registering an observer replaces the previous one. This mirrors a UI
//! that re-attaches after a screen rotation or reconnect: the newest
//! listener is the only one that matters. Events produced while no
//! observer is registered are not replayed later; the persisted session
//! flag covers reconciliation across such gaps.

use crate::diagnostics::DiagnosticLog;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// Status event payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl SessionStatus {
    /// Wire form of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Disconnecting => "disconnecting",
            SessionStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives status transitions
pub trait StatusObserver: Send + Sync {
    fn on_status(&self, status: SessionStatus);
}

impl<F> StatusObserver for F
where
    F: Fn(SessionStatus) + Send + Sync,
{
    fn on_status(&self, status: SessionStatus) {
        self(status)
    }
}

/// Receives progress lines
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, line: &str);
}

impl<F> ProgressObserver for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_progress(&self, line: &str) {
        self(line)
    }
}

/// Observer forwarding into a channel; a closed receiver is ignored
struct ChannelObserver<T>(mpsc::UnboundedSender<T>);

impl StatusObserver for ChannelObserver<SessionStatus> {
    fn on_status(&self, status: SessionStatus) {
        let _ = self.0.send(status);
    }
}

impl ProgressObserver for ChannelObserver<String> {
    fn on_progress(&self, line: &str) {
        let _ = self.0.send(line.to_string());
    }
}

type Slot<T> = Mutex<Option<Arc<T>>>;

fn lock<T: ?Sized>(slot: &Slot<T>) -> MutexGuard<'_, Option<Arc<T>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single-slot fan-out for status and progress events
pub struct StatusBroadcaster {
    status: Slot<dyn StatusObserver>,
    progress: Slot<dyn ProgressObserver>,
    diagnostics: DiagnosticLog,
}

impl StatusBroadcaster {
    /// Create a broadcaster that also records progress into `diagnostics`
    pub fn new(diagnostics: DiagnosticLog) -> Self {
        Self {
            status: Mutex::new(None),
            progress: Mutex::new(None),
            diagnostics,
        }
    }

    /// Register the status observer, replacing any previous one.
    /// Returns `true` if an observer was replaced.
    pub fn set_status_observer(&self, observer: impl StatusObserver + 'static) -> bool {
        let replaced = lock(&self.status).replace(Arc::new(observer)).is_some();
        if replaced {
            debug!("Status observer replaced");
        }
        replaced
    }

    /// Register the progress observer, replacing any previous one.
    pub fn set_progress_observer(&self, observer: impl ProgressObserver + 'static) -> bool {
        let replaced = lock(&self.progress).replace(Arc::new(observer)).is_some();
        if replaced {
            debug!("Progress observer replaced");
        }
        replaced
    }

    /// Register a channel as the status observer and return its receiver
    pub fn subscribe_status(&self) -> mpsc::UnboundedReceiver<SessionStatus> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.set_status_observer(ChannelObserver(tx));
        rx
    }

    /// Register a channel as the progress observer and return its receiver
    pub fn subscribe_progress(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.set_progress_observer(ChannelObserver(tx));
        rx
    }

    pub fn clear_status_observer(&self) {
        lock(&self.status).take();
    }

    pub fn clear_progress_observer(&self) {
        lock(&self.progress).take();
    }

    /// Deliver a status transition
    pub fn emit(&self, status: SessionStatus) {
        debug!("Session status: {}", status);
        // Call outside the lock so an observer may re-register itself
        let observer = lock(&self.status).clone();
        if let Some(observer) = observer {
            observer.on_status(status);
        }
    }

    /// Deliver a progress line and record it in the diagnostic buffer
    pub fn progress(&self, line: &str) {
        self.diagnostics.push(line);
        let observer = lock(&self.progress).clone();
        if let Some(observer) = observer {
            observer.on_progress(line);
        }
    }

    /// The diagnostic buffer fed by [`Self::progress`]
    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }
}
