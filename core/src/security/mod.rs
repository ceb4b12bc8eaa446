//! Security-manager collaborator boundary.
//!
//! The pairing/security subsystem is opaque to the lifecycle core: it is
//! started when a controller reaches readiness and stopped when the
//! controller powers down or is forced back down.

#[cfg_attr(test, mockall::automock)]
pub trait SecurityManager: Send + Sync {
    fn start(&self, dev_id: u16);
    fn stop(&self, dev_id: u16);
}

/// Stand-in for deployments without a security manager.
pub struct NoopSecurity;

impl SecurityManager for NoopSecurity {
    fn start(&self, dev_id: u16) {
        tracing::debug!(dev_id, "security manager start (noop)");
    }

    fn stop(&self, dev_id: u16) {
        tracing::debug!(dev_id, "security manager stop (noop)");
    }
}
