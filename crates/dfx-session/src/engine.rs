//! Forwarding Engine Bridge
//!
//! The packet-forwarding engine is an external component. It reads and
//! writes the virtual interface through a descriptor it receives from the
//! controller and relays traffic through a local proxy endpoint.
//!
//! # Entry points
//!
//! ```text
//! start_tunnel(fd, "127.0.0.1:5000")   descriptor handoff
//! start_routing(cache, flow, pattern)   routing/pattern phase
//! stop_tunnel() / stop_routing()        no-ops when nothing is running
//! measure_latency(), exit_country(), flow_line()   diagnostics
//! ```
//!
//! Every call may block; the controller always wraps them in a timeout.

use crate::bounded::run_bounded_or_reap;
use crate::config::RoutingProfile;
use crate::error::EngineError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound reported for latency measurements (ms)
pub const MAX_LATENCY_MS: u32 = 9999;

/// Flag reported when the exit country cannot be determined
pub const UNKNOWN_FLAG: &str = "xx";

/// Longest flag value accepted from the engine
const MAX_FLAG_LEN: usize = 10;

/// Contract of the forwarding engine
///
/// `start_tunnel` is not idempotent: it is called at most once per
/// descriptor. The stop operations must tolerate being called when nothing
/// is running.
pub trait TunnelEngine: Send + Sync + 'static {
    /// Take ownership of `descriptor` and start relaying through `proxy_endpoint`
    fn start_tunnel(&self, descriptor: i64, proxy_endpoint: &str) -> anyhow::Result<()>;

    /// Stop relaying and release the descriptor
    fn stop_tunnel(&self) -> anyhow::Result<()>;

    /// Start the routing/pattern phase
    fn start_routing(&self, profile: &RoutingProfile) -> anyhow::Result<()>;

    /// Stop the routing/pattern phase
    fn stop_routing(&self) -> anyhow::Result<()>;

    /// Round-trip latency through the tunnel, in milliseconds
    fn measure_latency(&self) -> anyhow::Result<i64>;

    /// Country code of the current exit
    fn exit_country(&self) -> anyhow::Result<String> {
        anyhow::bail!("exit country not supported by this engine")
    }

    /// Routing rule string suggested by the engine
    fn flow_line(&self, _is_test: bool) -> anyhow::Result<String> {
        anyhow::bail!("flow line not supported by this engine")
    }

    /// Local timezone offset, in hours
    fn set_timezone(&self, _offset_hours: f32) -> anyhow::Result<()> {
        anyhow::bail!("timezone not supported by this engine")
    }

    /// Ask the engine to resolve and record the network operator name
    fn set_asn_name(&self) -> anyhow::Result<()> {
        anyhow::bail!("ASN lookup not supported by this engine")
    }
}

/// Run one engine operation on the blocking pool, bounded by `limit`
pub(crate) async fn call_engine<T, F>(
    engine: &Arc<dyn TunnelEngine>,
    op: &'static str,
    limit: Duration,
    f: F,
) -> Result<T, EngineError>
where
    F: FnOnce(&dyn TunnelEngine) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    call_engine_or_reap(engine, op, limit, f, |_, _| {}).await
}

/// Like [`call_engine`], but an operation that succeeds after its timeout
/// is handed back to `reap` so whatever it started can be undone.
pub(crate) async fn call_engine_or_reap<T, F, R>(
    engine: &Arc<dyn TunnelEngine>,
    op: &'static str,
    limit: Duration,
    f: F,
    reap: R,
) -> Result<T, EngineError>
where
    F: FnOnce(&dyn TunnelEngine) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
    R: FnOnce(&dyn TunnelEngine, T) + Send + 'static,
{
    let engine = Arc::clone(engine);
    let late = Arc::clone(&engine);
    run_bounded_or_reap(
        limit,
        move || f(engine.as_ref()),
        move |value| reap(late.as_ref(), value),
    )
    .await
    .map_err(|failure| failure.into_engine_error(op))
}

/// Reference to a descriptor owned by the engine
///
/// `-1` means no tunnel. Only positive values are ever handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelRef(i64);

impl TunnelRef {
    /// No active tunnel
    pub const NONE: TunnelRef = TunnelRef(-1);

    /// Accept a detached descriptor; non-positive values are unusable
    pub fn from_detached(raw: i64) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    /// Raw descriptor value
    pub fn raw(&self) -> i64 {
        self.0
    }

    /// Is a tunnel held?
    pub fn is_active(&self) -> bool {
        self.0 > 0
    }
}

impl Default for TunnelRef {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for TunnelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd:{}", self.0)
    }
}

/// Normalize a raw latency measurement
///
/// Non-positive values mean the measurement failed and are reported as 0.
pub fn clamp_latency(raw: i64) -> u32 {
    if raw <= 0 {
        0
    } else {
        raw.min(MAX_LATENCY_MS as i64) as u32
    }
}

/// Normalize a raw exit-country value
pub fn sanitize_flag(raw: &str) -> String {
    let flag = raw.trim();
    if flag.is_empty() || flag.len() > MAX_FLAG_LEN {
        UNKNOWN_FLAG.to_string()
    } else {
        flag.to_lowercase()
    }
}

/// Meaning of a progress line emitted by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSignal {
    /// The engine reports the VPN is up
    Connected,
    /// The engine gave up
    Failed,
    /// The engine stopped on its own
    Stopped,
    /// The engine run was cancelled
    Cancelled,
    /// Informational only
    Progress,
}

impl EngineSignal {
    /// Classify a progress line
    pub fn classify(line: &str) -> Self {
        if line.contains("Data: VPN connected") {
            EngineSignal::Connected
        } else if line.contains("Data: VPN failed") {
            EngineSignal::Failed
        } else if line.contains("Data: VPN stopped") {
            EngineSignal::Stopped
        } else if line.contains("Data: VPN cancelled") {
            EngineSignal::Cancelled
        } else {
            EngineSignal::Progress
        }
    }

    /// Does this signal mean the engine is no longer carrying traffic?
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineSignal::Failed | EngineSignal::Stopped | EngineSignal::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct SlowStartEngine {
        running: AtomicBool,
        stops: AtomicUsize,
    }

    impl TunnelEngine for SlowStartEngine {
        fn start_tunnel(&self, _descriptor: i64, _proxy: &str) -> anyhow::Result<()> {
            std::thread::sleep(Duration::from_millis(150));
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop_tunnel(&self) -> anyhow::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn start_routing(&self, _profile: &RoutingProfile) -> anyhow::Result<()> {
            Ok(())
        }

        fn stop_routing(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn measure_latency(&self) -> anyhow::Result<i64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_late_start_is_stopped() {
        let slow = Arc::new(SlowStartEngine::default());
        let engine: Arc<dyn TunnelEngine> = slow.clone();

        let result = call_engine_or_reap(
            &engine,
            "start tunnel",
            Duration::from_millis(20),
            |engine| engine.start_tunnel(5, "127.0.0.1:5000"),
            |engine, ()| {
                let _ = engine.stop_tunnel();
            },
        )
        .await;
        assert!(matches!(result, Err(EngineError::Timeout { .. })));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(slow.stops.load(Ordering::SeqCst), 1);
        assert!(!slow.running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_timely_start_is_kept() {
        let fast = Arc::new(SlowStartEngine::default());
        let engine: Arc<dyn TunnelEngine> = fast.clone();

        let result = call_engine_or_reap(
            &engine,
            "start tunnel",
            Duration::from_secs(2),
            |engine| engine.start_tunnel(5, "127.0.0.1:5000"),
            |engine, ()| {
                let _ = engine.stop_tunnel();
            },
        )
        .await;
        assert!(result.is_ok());
        assert!(fast.running.load(Ordering::SeqCst));
        assert_eq!(fast.stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tunnel_ref() {
        assert!(!TunnelRef::NONE.is_active());
        assert_eq!(TunnelRef::default(), TunnelRef::NONE);
        assert_eq!(TunnelRef::NONE.raw(), -1);

        assert!(TunnelRef::from_detached(0).is_none());
        assert!(TunnelRef::from_detached(-5).is_none());

        let fd = TunnelRef::from_detached(17).unwrap();
        assert!(fd.is_active());
        assert_eq!(fd.to_string(), "fd:17");
    }

    #[test]
    fn test_clamp_latency() {
        assert_eq!(clamp_latency(-1), 0);
        assert_eq!(clamp_latency(0), 0);
        assert_eq!(clamp_latency(84), 84);
        assert_eq!(clamp_latency(25_000), MAX_LATENCY_MS);
    }

    #[test]
    fn test_sanitize_flag() {
        assert_eq!(sanitize_flag("DE"), "de");
        assert_eq!(sanitize_flag("  nl "), "nl");
        assert_eq!(sanitize_flag(""), UNKNOWN_FLAG);
        assert_eq!(sanitize_flag("not-a-country-code"), UNKNOWN_FLAG);
    }

    #[test]
    fn test_classify_progress() {
        assert_eq!(
            EngineSignal::classify("12:00:01 Data: VPN connected"),
            EngineSignal::Connected
        );
        assert_eq!(EngineSignal::classify("Data: VPN failed"), EngineSignal::Failed);
        assert_eq!(EngineSignal::classify("Data: VPN stopped"), EngineSignal::Stopped);
        assert_eq!(
            EngineSignal::classify("Data: VPN cancelled"),
            EngineSignal::Cancelled
        );
        assert_eq!(
            EngineSignal::classify("Trying pattern warp-1"),
            EngineSignal::Progress
        );

        assert!(EngineSignal::Failed.is_terminal());
        assert!(!EngineSignal::Connected.is_terminal());
        assert!(!EngineSignal::Progress.is_terminal());
    }
}
