//! Defyx Session - VPN session lifecycle controller
//!
//! Takes a device from "no tunnel" to "packets flowing through the
//! forwarding engine" and back, with at most one session at a time, a
//! safe descriptor handoff, and one ordered stream of status events.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     SessionController                        │
//! │   start / stop / lifecycle ──mpsc──▶ ┌──────────────────┐    │
//! │   status() / is_tunnel_active() ◀─── │  Session worker  │    │
//! │              (snapshot)              └────────┬─────────┘    │
//! └───────────────────────────────────────────────│──────────────┘
//!            ┌──────────────────┬─────────────────┼──────────────────┐
//!            ▼                  ▼                 ▼                  ▼
//!   ┌────────────────┐ ┌────────────────┐ ┌──────────────┐ ┌──────────────────┐
//!   │  Interface     │ │   Forwarding   │ │ Persistence  │ │ StatusBroadcaster│
//!   │  Provisioner   │ │    Engine      │ │    Store     │ │  + DiagnosticLog │
//!   │  (OS VPN API)  │ │ (fd handoff)   │ │ (flag file)  │ │                  │
//!   └────────────────┘ └────────────────┘ └──────────────┘ └──────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - **Single session**: the session is one owned value inside one worker
//! - **No leaked handles**: every path back to idle runs the same cleanup
//! - **Bounded calls**: provisioner, engine and store calls all time out
//! - **Ordered events**: transitions are emitted by the worker only
//!
//! Failures never escape as panics or hangs; they end in a clean idle
//! session plus a "disconnected" event and a diagnostic line.

mod bounded;
mod broadcaster;
mod config;
mod controller;
mod diagnostics;
mod engine;
mod error;
mod persistence;
mod presentation;
mod provisioner;
mod session;
mod worker;

pub use broadcaster::{ProgressObserver, SessionStatus, StatusBroadcaster, StatusObserver};
pub use config::{
    ConfigFormat, ControllerConfig, InterfaceConfig, RoutingProfile, StartRequest, Timeouts,
};
pub use controller::SessionController;
pub use diagnostics::DiagnosticLog;
pub use engine::{
    clamp_latency, sanitize_flag, EngineSignal, TunnelEngine, TunnelRef, MAX_LATENCY_MS,
    UNKNOWN_FLAG,
};
pub use error::{
    ConfigError, ControlError, EngineError, HandoffError, PersistenceError, ProvisionError,
    SessionError,
};
pub use persistence::{FileStore, MemoryStore, PersistenceStore, STATE_FILE_NAME};
pub use presentation::{ForegroundServiceKind, Presentation, TrayAction, APP_TITLE};
pub use provisioner::{InterfaceProvisioner, VirtualInterface};
pub use session::{LifecycleEvent, SessionSnapshot, SessionState};
