//! Session Controller
//!
//! The only component callers talk to. Start and stop are fire-and-forget:
//! they enqueue a command for the session worker and return immediately,
//! and the outcome arrives as status events.
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = ControllerConfig::default();
//! let controller = SessionController::new(provisioner, engine, store, config)?;
//! let mut status = controller.subscribe_status();
//!
//! controller.start(StartRequest::tunnel_only())?;
//! while let Some(event) = status.recv().await {
//!     if event == SessionStatus::Connected {
//!         break;
//!     }
//! }
//!
//! let latency = controller.measure_latency().await;
//! controller.stop()?;
//! ```

use crate::broadcaster::{ProgressObserver, SessionStatus, StatusBroadcaster, StatusObserver};
use crate::config::{ControllerConfig, RoutingProfile, StartRequest};
use crate::diagnostics::DiagnosticLog;
use crate::engine::{call_engine, clamp_latency, sanitize_flag, TunnelEngine, UNKNOWN_FLAG};
use crate::error::ControlError;
use crate::persistence::{FileStore, PersistenceStore};
use crate::presentation::Presentation;
use crate::provisioner::InterfaceProvisioner;
use crate::session::{LifecycleEvent, SessionSnapshot, SessionState};
use crate::worker::{Command, SessionWorker, WorkerParts};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to one VPN session
///
/// Owns the worker task that owns the session. At most one session exists
/// per controller; the host creates one controller per process.
pub struct SessionController {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: Arc<RwLock<SessionSnapshot>>,
    start_in_flight: Arc<AtomicBool>,
    broadcaster: Arc<StatusBroadcaster>,
    engine: Arc<dyn TunnelEngine>,
    config: Arc<ControllerConfig>,
    label: Mutex<Option<String>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    /// Create a controller and spawn its worker on the current runtime
    ///
    /// The worker reconciles the persisted flag before it processes the
    /// first command.
    pub fn new(
        provisioner: Arc<dyn InterfaceProvisioner>,
        engine: Arc<dyn TunnelEngine>,
        store: Arc<dyn PersistenceStore>,
        config: ControllerConfig,
    ) -> Result<Self, ControlError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ControlError::NoRuntime)?;

        let config = Arc::new(config);
        let broadcaster = Arc::new(StatusBroadcaster::new(DiagnosticLog::new(
            config.diagnostics_capacity,
        )));
        let snapshot = Arc::new(RwLock::new(SessionSnapshot::default()));
        let start_in_flight = Arc::new(AtomicBool::new(false));
        let (commands, rx) = mpsc::unbounded_channel();

        let worker = SessionWorker::new(
            WorkerParts {
                provisioner,
                engine: Arc::clone(&engine),
                store,
                config: Arc::clone(&config),
                broadcaster: Arc::clone(&broadcaster),
                snapshot: Arc::clone(&snapshot),
                start_in_flight: Arc::clone(&start_in_flight),
            },
            rx,
        );
        let handle = runtime.spawn(worker.run());

        info!(
            "Session controller created (proxy {})",
            config.proxy_endpoint_string()
        );

        Ok(Self {
            commands,
            snapshot,
            start_in_flight,
            broadcaster,
            engine,
            config,
            label: Mutex::new(None),
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Create a controller persisting its flag under `config.state_dir`
    pub fn with_file_store(
        provisioner: Arc<dyn InterfaceProvisioner>,
        engine: Arc<dyn TunnelEngine>,
        config: ControllerConfig,
    ) -> Result<Self, ControlError> {
        let store = Arc::new(FileStore::new(&config.state_dir));
        Self::new(provisioner, engine, store, config)
    }

    fn send(&self, command: Command) -> Result<(), ControlError> {
        self.commands
            .send(command)
            .map_err(|_| ControlError::WorkerGone)
    }

    /// Request a session
    ///
    /// Coalesced with any start that has not settled yet. Outcome is
    /// reported through status events.
    pub fn start(&self, request: StartRequest) -> Result<(), ControlError> {
        if self
            .start_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Start coalesced with the attempt in flight");
            return Ok(());
        }

        if let Err(e) = self.send(Command::Start(request)) {
            self.start_in_flight.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// Tear the session down. A no-op without a session.
    pub fn stop(&self) -> Result<(), ControlError> {
        self.send(Command::Stop)
    }

    /// Start (or restart) the engine's routing phase on the live tunnel
    pub async fn configure_routing(&self, profile: RoutingProfile) -> Result<(), ControlError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ConfigureRouting { profile, reply })?;
        rx.await.map_err(|_| ControlError::WorkerGone)?
    }

    /// Feed an OS or engine event into the session
    pub fn handle_lifecycle(&self, event: LifecycleEvent) -> Result<(), ControlError> {
        if let LifecycleEvent::EngineProgress(line) = &event {
            // Progress is delivered right away, only the reaction is serialized
            self.broadcaster.progress(line);
        }
        self.send(Command::Lifecycle(event))
    }

    /// Shorthand for an engine progress line
    pub fn engine_progress(&self, line: impl Into<String>) -> Result<(), ControlError> {
        self.handle_lifecycle(LifecycleEvent::EngineProgress(line.into()))
    }

    /// Last snapshot published by the worker
    pub fn snapshot(&self) -> SessionSnapshot {
        *self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.snapshot().state
    }

    /// Connected or disconnected
    pub fn status(&self) -> SessionStatus {
        self.state().status()
    }

    /// Is a positive tunnel reference held?
    pub fn is_tunnel_active(&self) -> bool {
        self.snapshot().is_tunnel_active()
    }

    /// Set the advisory connection label
    pub fn set_connection_label(&self, label: impl Into<String>) -> Result<(), ControlError> {
        let label = label.into();
        if label.trim().is_empty() {
            return Err(ControlError::InvalidArgument("connection label must not be empty"));
        }
        debug!("Connection label set to {:?}", label);
        *self.label.lock().unwrap_or_else(PoisonError::into_inner) = Some(label);
        Ok(())
    }

    pub fn connection_label(&self) -> Option<String> {
        self.label
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Notification and tray wording for the current state
    pub fn presentation(&self) -> Presentation {
        let label = self.connection_label();
        Presentation::for_state(self.state(), label.as_deref())
    }

    /// Register the status observer, replacing the previous one
    pub fn set_status_observer(&self, observer: impl StatusObserver + 'static) {
        self.broadcaster.set_status_observer(observer);
    }

    /// Register the progress observer, replacing the previous one
    pub fn set_progress_observer(&self, observer: impl ProgressObserver + 'static) {
        self.broadcaster.set_progress_observer(observer);
    }

    /// Detach both observers; transitions are still logged and buffered
    pub fn clear_observers(&self) {
        self.broadcaster.clear_status_observer();
        self.broadcaster.clear_progress_observer();
    }

    /// Replace the status observer with a channel
    pub fn subscribe_status(&self) -> mpsc::UnboundedReceiver<SessionStatus> {
        self.broadcaster.subscribe_status()
    }

    /// Replace the progress observer with a channel
    pub fn subscribe_progress(&self) -> mpsc::UnboundedReceiver<String> {
        self.broadcaster.subscribe_progress()
    }

    /// Diagnostic buffer, for a consumer polling on its own interval
    pub fn diagnostics(&self) -> &DiagnosticLog {
        self.broadcaster.diagnostics()
    }

    /// Take every buffered diagnostic line
    pub fn drain_diagnostics(&self) -> Vec<String> {
        self.broadcaster.diagnostics().drain()
    }

    /// Round-trip latency in ms, clamped; 0 when it cannot be measured
    pub async fn measure_latency(&self) -> u32 {
        match call_engine(
            &self.engine,
            "measure latency",
            self.config.timeouts.latency(),
            |engine| engine.measure_latency(),
        )
        .await
        {
            Ok(raw) => clamp_latency(raw),
            Err(e) => {
                warn!("Latency measurement failed: {}", e);
                0
            }
        }
    }

    /// Exit country flag, `"xx"` when unknown
    pub async fn exit_country(&self) -> String {
        match call_engine(
            &self.engine,
            "exit country",
            self.config.timeouts.flag(),
            |engine| engine.exit_country(),
        )
        .await
        {
            Ok(raw) => sanitize_flag(&raw),
            Err(e) => {
                warn!("Exit country lookup failed: {}", e);
                UNKNOWN_FLAG.to_string()
            }
        }
    }

    /// Routing rule string suggested by the engine, empty on failure
    pub async fn flow_line(&self, is_test: bool) -> String {
        match call_engine(
            &self.engine,
            "flow line",
            self.config.timeouts.engine(),
            move |engine| engine.flow_line(is_test),
        )
        .await
        {
            Ok(line) => line,
            Err(e) => {
                warn!("Flow line query failed: {}", e);
                String::new()
            }
        }
    }

    pub async fn set_timezone(&self, offset_hours: f32) -> Result<(), ControlError> {
        if !offset_hours.is_finite() || offset_hours.abs() > 14.0 {
            return Err(ControlError::InvalidArgument("timezone offset out of range"));
        }
        call_engine(
            &self.engine,
            "set timezone",
            self.config.timeouts.engine(),
            move |engine| engine.set_timezone(offset_hours),
        )
        .await
        .map_err(|e| {
            warn!("Setting timezone failed: {}", e);
            ControlError::from(e)
        })
    }

    pub async fn set_asn_name(&self) -> Result<(), ControlError> {
        call_engine(
            &self.engine,
            "set ASN name",
            self.config.timeouts.engine(),
            |engine| engine.set_asn_name(),
        )
        .await
        .map_err(|e| {
            warn!("Setting ASN name failed: {}", e);
            ControlError::from(e)
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Tear down any session and stop the worker
    pub async fn shutdown(&self) -> Result<(), ControlError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply })?;
        rx.await.map_err(|_| ControlError::WorkerGone)?;

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }
}
