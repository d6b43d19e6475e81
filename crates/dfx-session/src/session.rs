//! Session model
//!
//! The one mutable entity of the controller. It lives inside the worker
//! task and is reset in place, never recreated.

use crate::broadcaster::SessionStatus;
use crate::engine::TunnelRef;
use crate::provisioner::VirtualInterface;
use std::fmt;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No tunnel
    #[default]
    Idle,
    /// A start attempt is in flight
    Connecting,
    /// Packets flow through the engine
    Connected,
    /// Cleanup in progress
    Disconnecting,
    /// An attempt failed; cleanup runs before returning to Idle
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Failed => "failed",
        }
    }

    /// Coarse connected/disconnected view reported to callers
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Connected => SessionStatus::Connected,
            _ => SessionStatus::Disconnected,
        }
    }

    /// Between a start and its outcome, or a stop and its cleanup
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Disconnecting | SessionState::Failed
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OS or engine events that re-enter the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The host task was swiped away; the session keeps running
    TaskRemoved,
    /// The OS revoked the VPN permission
    PermissionRevoked,
    /// A progress line from the forwarding engine
    EngineProgress(String),
}

/// Read-only copy of the session published by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub tunnel: TunnelRef,
    pub routing_active: bool,
    pub interface_held: bool,
    pub persisted: bool,
}

impl SessionSnapshot {
    pub fn is_tunnel_active(&self) -> bool {
        self.tunnel.is_active()
    }
}

/// The session owned by the worker
#[derive(Default)]
pub(crate) struct Session {
    pub(crate) state: SessionState,
    /// Held only between provisioning and detach
    pub(crate) interface: Option<Box<dyn VirtualInterface>>,
    pub(crate) tunnel: TunnelRef,
    pub(crate) routing_active: bool,
    pub(crate) persisted: bool,
}

impl Session {
    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            tunnel: self.tunnel,
            routing_active: self.routing_active,
            interface_held: self.interface.is_some(),
            persisted: self.persisted,
        }
    }

    /// Holds outside of transitions; checked after every settle
    pub(crate) fn is_consistent(&self) -> bool {
        match self.state {
            SessionState::Connected => self.tunnel.is_active() && self.interface.is_none(),
            SessionState::Idle | SessionState::Failed => {
                !self.tunnel.is_active() && self.interface.is_none() && !self.routing_active
            }
            SessionState::Connecting | SessionState::Disconnecting => true,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("interface", &self.interface.is_some())
            .field("tunnel", &self.tunnel)
            .field("routing_active", &self.routing_active)
            .field("persisted", &self.persisted)
            .finish()
    }
}
