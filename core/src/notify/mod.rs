//! Notification collaborator boundary.
//!
//! The IPC surface that exposes adapters to clients plugs in here. The
//! registry announces every add/remove/default change through a
//! [`ManagerNotifier`], and the query side resolves client-supplied
//! adapter patterns with [`AdapterPattern`].

use crate::hci::BdAddr;
use thiserror::Error;

/// Callback interface for registry announcements.
#[cfg_attr(test, mockall::automock)]
pub trait ManagerNotifier: Send + Sync {
    /// An adapter object appeared at `path`.
    fn adapter_added(&self, path: &str);
    /// The adapter at `path` is about to be destroyed.
    fn adapter_removed(&self, path: &str);
    /// The default adapter moved to `path`.
    fn default_adapter_changed(&self, path: &str);
    /// The set of ready adapters changed.
    fn adapters_changed(&self, paths: &[String]);
}

/// Notifier that just logs, for deployments without an IPC surface.
pub struct LogNotifier;

impl ManagerNotifier for LogNotifier {
    fn adapter_added(&self, path: &str) {
        tracing::info!(path, "adapter added");
    }

    fn adapter_removed(&self, path: &str) {
        tracing::info!(path, "adapter removed");
    }

    fn default_adapter_changed(&self, path: &str) {
        tracing::info!(path, "default adapter changed");
    }

    fn adapters_changed(&self, paths: &[String]) {
        tracing::debug!(?paths, "adapter list changed");
    }
}

/// A client-supplied adapter reference, per the FindAdapter resolution
/// rule: the literal `any` token or the all-zero address selects the
/// wildcard adapter, `hci<N>` selects a device id, anything else is
/// treated as a hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterPattern {
    Any,
    Id(u16),
    Address(BdAddr),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unrecognized adapter pattern: {0}")]
pub struct InvalidPattern(pub String);

impl std::str::FromStr for AdapterPattern {
    type Err = InvalidPattern;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "any" {
            return Ok(AdapterPattern::Any);
        }
        if let Some(digits) = s.strip_prefix("hci") {
            if !digits.is_empty() {
                return digits
                    .parse::<u16>()
                    .map(AdapterPattern::Id)
                    .map_err(|_| InvalidPattern(s.to_string()));
            }
        }
        let addr: BdAddr = s.parse().map_err(|_| InvalidPattern(s.to_string()))?;
        if addr.is_any() {
            Ok(AdapterPattern::Any)
        } else {
            Ok(AdapterPattern::Address(addr))
        }
    }
}
