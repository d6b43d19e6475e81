//! Scripted collaborators shared by the integration tests

#![allow(dead_code)]

use dfx_session::{
    ControllerConfig, InterfaceConfig, InterfaceProvisioner, PersistenceError, PersistenceStore,
    RoutingProfile, SessionStatus, TunnelEngine, VirtualInterface,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the provisioner does on each call
#[derive(Debug, Clone, Copy)]
pub enum Provision {
    Refuse,
    /// Hand out an interface that detaches to this value
    Detach(i64),
    /// Block for the duration, then hand out an interface
    Slow(Duration, i64),
}

#[derive(Default)]
pub struct InterfaceLog {
    pub provisioned: AtomicUsize,
    pub detached: AtomicUsize,
    pub closed: AtomicUsize,
}

struct MockInterface {
    fd: i64,
    log: Arc<InterfaceLog>,
}

impl VirtualInterface for MockInterface {
    fn detach(self: Box<Self>) -> anyhow::Result<i64> {
        self.log.detached.fetch_add(1, Ordering::SeqCst);
        Ok(self.fd)
    }

    fn close(self: Box<Self>) -> anyhow::Result<()> {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct ScriptedProvisioner {
    script: Provision,
    pub log: Arc<InterfaceLog>,
}

impl ScriptedProvisioner {
    pub fn new(script: Provision) -> Arc<Self> {
        Arc::new(Self {
            script,
            log: Arc::new(InterfaceLog::default()),
        })
    }
}

impl InterfaceProvisioner for ScriptedProvisioner {
    fn provision(&self, config: &InterfaceConfig) -> anyhow::Result<Box<dyn VirtualInterface>> {
        assert_eq!(config.mtu, 1500);
        self.log.provisioned.fetch_add(1, Ordering::SeqCst);
        let fd = match self.script {
            Provision::Refuse => anyhow::bail!("VPN consent not granted"),
            Provision::Detach(fd) => fd,
            Provision::Slow(delay, fd) => {
                std::thread::sleep(delay);
                fd
            }
        };
        Ok(Box::new(MockInterface {
            fd,
            log: self.log.clone(),
        }))
    }
}

/// Engine that records every call
#[derive(Default)]
pub struct ScriptedEngine {
    pub start_delay: Option<Duration>,
    pub fail_start: bool,
    pub latency: i64,
    pub starts: Mutex<Vec<(i64, String)>>,
    pub stops: AtomicUsize,
    /// Descriptors released by `stop_tunnel`
    pub released: Mutex<Vec<i64>>,
    pub routing: Mutex<Vec<RoutingProfile>>,
    pub routing_stops: AtomicUsize,
    pub current: Mutex<Option<i64>>,
}

impl ScriptedEngine {
    pub fn start_count(&self) -> usize {
        self.starts.lock().unwrap().len()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl TunnelEngine for ScriptedEngine {
    fn start_tunnel(&self, descriptor: i64, proxy_endpoint: &str) -> anyhow::Result<()> {
        if let Some(delay) = self.start_delay {
            std::thread::sleep(delay);
        }
        self.starts
            .lock()
            .unwrap()
            .push((descriptor, proxy_endpoint.to_string()));
        if self.fail_start {
            anyhow::bail!("tun2socks refused descriptor");
        }
        *self.current.lock().unwrap() = Some(descriptor);
        Ok(())
    }

    fn stop_tunnel(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(fd) = self.current.lock().unwrap().take() {
            self.released.lock().unwrap().push(fd);
        }
        Ok(())
    }

    fn start_routing(&self, profile: &RoutingProfile) -> anyhow::Result<()> {
        self.routing.lock().unwrap().push(profile.clone());
        Ok(())
    }

    fn stop_routing(&self) -> anyhow::Result<()> {
        self.routing_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn measure_latency(&self) -> anyhow::Result<i64> {
        Ok(self.latency)
    }

    fn exit_country(&self) -> anyhow::Result<String> {
        Ok("DE".to_string())
    }
}

/// Store whose writes always fail
pub struct BrokenStore;

impl PersistenceStore for BrokenStore {
    fn load(&self) -> Result<bool, PersistenceError> {
        Ok(false)
    }

    fn store(&self, _connected: bool) -> Result<(), PersistenceError> {
        Err(PersistenceError::Io(std::io::Error::other("disk full")))
    }
}

/// Short timeouts so failure paths finish quickly
pub fn fast_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.timeouts.provision_ms = 500;
    config.timeouts.engine_ms = 500;
    config.timeouts.persistence_ms = 500;
    config
}

/// Receive exactly `n` status events, failing the test if they do not arrive
pub async fn next_events(
    rx: &mut mpsc::UnboundedReceiver<SessionStatus>,
    n: usize,
) -> Vec<SessionStatus> {
    let mut events = Vec::with_capacity(n);
    for _ in 0..n {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for status event")
            .expect("status channel closed");
        events.push(event);
    }
    events
}

/// Assert no further status event arrives within a short grace period
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<SessionStatus>) {
    let extra = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
    assert!(extra.is_err(), "unexpected status event: {:?}", extra);
}

/// Poll `cond` until it holds or five seconds pass
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
