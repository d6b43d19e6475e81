//! Session worker
//!
//! One task per controller owns the [`Session`] and processes commands in
//! arrival order. Nothing outside the worker touches the session; callers
//! read the snapshot it publishes after every change.
//!
//! ```text
//!  handle ──mpsc──▶ worker ──spawn_blocking + timeout──▶ provisioner / engine / store
//!                     │
//!                     ├──▶ snapshot (RwLock)
//!                     └──▶ StatusBroadcaster
//! ```
//!
//! Because commands are strictly serialized, a `Stop` sent while a start
//! is still provisioning waits behind it and is applied to whatever the
//! start settled into.

use crate::bounded::{run_bounded, run_bounded_or_reap, CallFailure};
use crate::broadcaster::{SessionStatus, StatusBroadcaster};
use crate::config::{ControllerConfig, RoutingProfile, StartRequest};
use crate::engine::{call_engine, call_engine_or_reap, EngineSignal, TunnelEngine, TunnelRef};
use crate::error::{ControlError, EngineError, HandoffError, PersistenceError, SessionError};
use crate::persistence::PersistenceStore;
use crate::provisioner::{InterfaceProvisioner, VirtualInterface};
use crate::session::{LifecycleEvent, Session, SessionSnapshot, SessionState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Worker commands
#[derive(Debug)]
pub(crate) enum Command {
    Start(StartRequest),
    Stop,
    ConfigureRouting {
        profile: RoutingProfile,
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
    Lifecycle(LifecycleEvent),
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Collaborators and shared cells handed to the worker
pub(crate) struct WorkerParts {
    pub provisioner: Arc<dyn InterfaceProvisioner>,
    pub engine: Arc<dyn TunnelEngine>,
    pub store: Arc<dyn PersistenceStore>,
    pub config: Arc<ControllerConfig>,
    pub broadcaster: Arc<StatusBroadcaster>,
    pub snapshot: Arc<RwLock<SessionSnapshot>>,
    pub start_in_flight: Arc<AtomicBool>,
}

// Helpers live on the parts so no borrow of the session spans an await
impl WorkerParts {
    async fn provision(&self) -> Result<Box<dyn VirtualInterface>, SessionError> {
        let provisioner = Arc::clone(&self.provisioner);
        let config = self.config.interface.clone();
        run_bounded_or_reap(
            self.config.timeouts.provision(),
            move || provisioner.provision(&config),
            close_orphan,
        )
        .await
        .map_err(|failure| failure.into_provision_error().into())
    }

    async fn engine_call<T, F>(&self, op: &'static str, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&dyn TunnelEngine) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        call_engine(&self.engine, op, self.config.timeouts.engine(), f).await
    }

    /// Engine call whose late success is undone by `reap`
    async fn engine_call_or_reap<T, F, R>(
        &self,
        op: &'static str,
        f: F,
        reap: R,
    ) -> Result<T, EngineError>
    where
        F: FnOnce(&dyn TunnelEngine) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
        R: FnOnce(&dyn TunnelEngine, T) + Send + 'static,
    {
        call_engine_or_reap(&self.engine, op, self.config.timeouts.engine(), f, reap).await
    }
}

pub(crate) struct SessionWorker {
    session: Session,
    parts: WorkerParts,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl SessionWorker {
    pub(crate) fn new(parts: WorkerParts, commands: mpsc::UnboundedReceiver<Command>) -> Self {
        Self {
            session: Session::default(),
            parts,
            commands,
        }
    }

    /// Reconcile persisted state, then process commands until shutdown or
    /// until every handle is dropped.
    pub(crate) async fn run(mut self) {
        self.reconcile().await;

        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Start(request) => {
                    self.start(request).await;
                    self.parts.start_in_flight.store(false, Ordering::SeqCst);
                }
                Command::Stop => self.stop("stop requested").await,
                Command::ConfigureRouting { profile, reply } => {
                    let result = self.configure_routing(profile).await;
                    let _ = reply.send(result);
                }
                Command::Lifecycle(event) => self.lifecycle(event).await,
                Command::Shutdown { reply } => {
                    self.stop("shutdown").await;
                    let _ = reply.send(());
                    info!("Session worker shut down");
                    return;
                }
            }
        }

        self.stop("controller dropped").await;
        debug!("Session worker exiting, all handles dropped");
    }

    fn set_state(&mut self, state: SessionState) {
        debug!("Session {} -> {}", self.session.state, state);
        self.session.state = state;
        self.publish();
    }

    fn publish(&self) {
        let snapshot = self.session.snapshot();
        *self
            .parts
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    fn emit(&self, status: SessionStatus) {
        self.parts.broadcaster.emit(status);
    }

    /// A stored `true` at startup means the last run never settled back to
    /// Idle. No engine session can have survived, so clean up and clear it.
    /// An unreadable flag is treated the same way and rewritten.
    async fn reconcile(&mut self) {
        let store = Arc::clone(&self.parts.store);
        let stored = match run_bounded(self.parts.config.timeouts.persistence(), move || {
            store.load().map_err(anyhow::Error::from)
        })
        .await
        {
            Ok(stored) => Some(stored),
            Err(failure) => {
                warn!(
                    "Failed to read persisted session flag: {}",
                    persistence_error(failure)
                );
                None
            }
        };

        self.session.persisted = stored.unwrap_or(false);
        if stored != Some(false) {
            info!("Persisted session flag was not clear at startup, reconciling to idle");
            self.parts
                .broadcaster
                .progress("Reconciling stale session state");
            self.cleanup().await;
            self.persist(false).await;
        }
        self.publish();
    }

    async fn start(&mut self, request: StartRequest) {
        match self.session.state {
            SessionState::Idle | SessionState::Failed => {}
            state => {
                debug!("Start ignored, session is {}", state);
                return;
            }
        }

        info!("Starting session");
        self.set_state(SessionState::Connecting);
        self.emit(SessionStatus::Connecting);

        match self.establish(request).await {
            Ok(()) => {
                self.set_state(SessionState::Connected);
                self.persist(true).await;
                self.emit(SessionStatus::Connected);
                info!("Session connected ({})", self.session.tunnel);
            }
            Err(e) => {
                error!("Session start failed: {}", e);
                self.parts
                    .broadcaster
                    .progress(&format!("Session failed ({}): {}", e.kind(), e));
                self.set_state(SessionState::Failed);
                self.cleanup().await;
                self.set_state(SessionState::Idle);
                self.persist(false).await;
                self.emit(SessionStatus::Disconnected);
            }
        }
        debug_assert!(self.session.is_consistent(), "{:?}", self.session);
    }

    /// Provision, detach, hand off, then optionally start routing.
    async fn establish(&mut self, request: StartRequest) -> Result<(), SessionError> {
        let interface = self.parts.provision().await?;
        if !interface.host_excluded() {
            warn!("Host application could not be excluded from the tunnel");
        }
        self.session.interface = Some(interface);
        self.publish();

        let raw = match self.session.interface.take() {
            Some(interface) => interface.detach().map_err(HandoffError::DetachFailed)?,
            None => return Err(HandoffError::InvalidDescriptor(TunnelRef::NONE.raw()).into()),
        };
        self.publish();
        let tunnel = TunnelRef::from_detached(raw).ok_or(HandoffError::InvalidDescriptor(raw))?;
        debug!("Detached interface as {}", tunnel);

        let proxy = self.parts.config.proxy_endpoint_string();
        self.parts
            .engine_call_or_reap(
                "start tunnel",
                move |engine| engine.start_tunnel(tunnel.raw(), &proxy),
                move |engine, ()| stop_late_tunnel(engine, tunnel),
            )
            .await?;
        self.session.tunnel = tunnel;
        self.publish();

        if let Some(profile) = request.routing {
            self.start_routing(profile).await?;
        }
        Ok(())
    }

    async fn start_routing(&mut self, profile: RoutingProfile) -> Result<(), EngineError> {
        // Marked first so cleanup stops a half-started routing phase
        self.session.routing_active = true;
        self.publish();
        info!("Starting routing with pattern {:?}", profile.pattern);
        self.parts
            .engine_call_or_reap(
                "start routing",
                move |engine| engine.start_routing(&profile),
                |engine, ()| stop_late_routing(engine),
            )
            .await
    }

    async fn configure_routing(&mut self, profile: RoutingProfile) -> Result<(), ControlError> {
        if self.session.state != SessionState::Connected {
            return Err(ControlError::NotConnected);
        }
        self.start_routing(profile).await.map_err(|e| {
            warn!("Routing configuration failed: {}", e);
            ControlError::from(e)
        })
    }

    async fn stop(&mut self, reason: &str) {
        if self.session.state != SessionState::Connected {
            debug!("Stop ({}) ignored, session is {}", reason, self.session.state);
            return;
        }

        info!("Stopping session: {}", reason);
        self.set_state(SessionState::Disconnecting);
        self.emit(SessionStatus::Disconnecting);
        self.cleanup().await;
        self.set_state(SessionState::Idle);
        self.persist(false).await;
        self.emit(SessionStatus::Disconnected);
        debug_assert!(self.session.is_consistent(), "{:?}", self.session);
    }

    async fn lifecycle(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::TaskRemoved => {
                info!("Host task removed, session stays {}", self.session.state);
            }
            LifecycleEvent::PermissionRevoked => {
                warn!("VPN permission revoked");
                self.stop("permission revoked").await;
            }
            LifecycleEvent::EngineProgress(line) => {
                let signal = EngineSignal::classify(&line);
                if signal.is_terminal() {
                    warn!("Engine reported {:?}", signal);
                    self.stop("engine terminated").await;
                }
            }
        }
    }

    /// Release everything the session may hold. Safe to run repeatedly.
    async fn cleanup(&mut self) {
        if let Err(e) = self
            .parts
            .engine_call("stop tunnel", |engine| engine.stop_tunnel())
            .await
        {
            warn!("Ignoring failed tunnel stop: {}", e);
        }

        if self.session.routing_active {
            if let Err(e) = self
                .parts
                .engine_call("stop routing", |engine| engine.stop_routing())
                .await
            {
                warn!("Ignoring failed routing stop: {}", e);
            }
            self.session.routing_active = false;
        }

        if let Some(interface) = self.session.interface.take() {
            if let Err(e) = interface.close() {
                warn!("Ignoring failed interface close: {}", e);
            }
        }

        self.session.tunnel = TunnelRef::NONE;
        self.publish();
    }

    async fn persist(&mut self, connected: bool) {
        let store = Arc::clone(&self.parts.store);
        match run_bounded(self.parts.config.timeouts.persistence(), move || {
            store.store(connected).map_err(anyhow::Error::from)
        })
        .await
        {
            Ok(()) => {
                self.session.persisted = connected;
                self.publish();
            }
            Err(failure) => {
                warn!(
                    "Failed to persist session flag {}: {}",
                    connected,
                    persistence_error(failure)
                );
            }
        }
    }
}

/// Close an interface whose provisioning finished after its timeout
fn close_orphan(interface: Box<dyn VirtualInterface>) {
    warn!("Closing interface provisioned after timeout");
    if let Err(e) = interface.close() {
        warn!("Failed to close orphaned interface: {}", e);
    }
}

/// Stop a tunnel the engine started after its start call timed out
fn stop_late_tunnel(engine: &dyn TunnelEngine, tunnel: TunnelRef) {
    warn!("Engine started {} after timeout, stopping it", tunnel);
    if let Err(e) = engine.stop_tunnel() {
        warn!("Failed to stop late tunnel: {}", e);
    }
}

fn stop_late_routing(engine: &dyn TunnelEngine) {
    warn!("Engine started routing after timeout, stopping it");
    if let Err(e) = engine.stop_routing() {
        warn!("Failed to stop late routing: {}", e);
    }
}

fn persistence_error(failure: CallFailure) -> PersistenceError {
    match failure {
        CallFailure::Failed(e) => e
            .downcast::<PersistenceError>()
            .unwrap_or_else(|e| PersistenceError::Io(std::io::Error::other(e))),
        CallFailure::TimedOut(after) => PersistenceError::Timeout(after),
        CallFailure::Aborted => PersistenceError::Aborted,
    }
}
