//! Virtual Interface Provisioning
//!
//! The platform layer implements [`InterfaceProvisioner`] on top of the
//! OS VPN API. The controller only ever sees the resulting
//! [`VirtualInterface`], which it either closes or detaches.
//!
//! # Ownership
//!
//! ```text
//! provision() ──▶ Box<dyn VirtualInterface>   (owned by the controller)
//!                        │
//!            ┌───────────┴────────────┐
//!            ▼                        ▼
//!       detach() -> i64          close()
//!   (ownership moves to      (resource released)
//!    the forwarding engine)
//! ```
//!
//! Both operations consume the box, so a detached interface can never be
//! closed or detached a second time.

use crate::config::InterfaceConfig;

/// An interface handle owned by the controller
///
/// Implementations must release the OS resource when dropped without
/// having been detached.
pub trait VirtualInterface: Send {
    /// Detach the underlying descriptor into a raw engine-transferable
    /// reference. Destructive: the handle is gone afterwards, whatever the
    /// returned value.
    fn detach(self: Box<Self>) -> anyhow::Result<i64>;

    /// Close the interface
    fn close(self: Box<Self>) -> anyhow::Result<()>;

    /// Whether the host application was excluded from the tunnel
    fn host_excluded(&self) -> bool {
        true
    }
}

/// Requests virtual interfaces from the OS
///
/// One call allocates at most one interface. Implementations must not
/// retry; the controller makes exactly one attempt per `start()`. The call
/// may block, it always runs on the blocking pool under a timeout.
pub trait InterfaceProvisioner: Send + Sync + 'static {
    fn provision(&self, config: &InterfaceConfig) -> anyhow::Result<Box<dyn VirtualInterface>>;
}

impl<F> InterfaceProvisioner for F
where
    F: Fn(&InterfaceConfig) -> anyhow::Result<Box<dyn VirtualInterface>> + Send + Sync + 'static,
{
    fn provision(&self, config: &InterfaceConfig) -> anyhow::Result<Box<dyn VirtualInterface>> {
        self(config)
    }
}
