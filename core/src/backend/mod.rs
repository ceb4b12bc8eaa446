//! Pluggable host backends.
//!
//! Exactly one backend may drive the stack at a time. The slot accepts
//! a single registration, brings the backend up on activation, and
//! tears it down once on cleanup.

pub mod hci;

use crate::lifecycle::HostHandle;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("a backend is already registered")]
    AlreadyRegistered,

    #[error("backend did not identify itself")]
    InvalidOps,
}

/// A driver for the whole host stack.
#[async_trait]
pub trait HostBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Bring the stack up, returning the handle to its event loop.
    async fn setup(&self) -> Result<HostHandle>;

    /// Tear the stack down. Called at most once, after `setup`.
    async fn cleanup(&self);
}

/// Holds the single registered backend.
#[derive(Default)]
pub struct BackendSlot {
    active: Option<Arc<dyn HostBackend>>,
}

impl BackendSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn HostBackend>) -> Result<(), BackendError> {
        if backend.name().is_empty() {
            return Err(BackendError::InvalidOps);
        }
        if self.active.is_some() {
            return Err(BackendError::AlreadyRegistered);
        }
        info!(backend = backend.name(), "host backend registered");
        self.active = Some(backend);
        Ok(())
    }

    /// Set up the registered backend. An empty slot is not an error;
    /// the daemon can run without a controller driver.
    pub async fn activate(&self) -> Result<Option<HostHandle>> {
        match &self.active {
            Some(backend) => {
                info!(backend = backend.name(), "activating host backend");
                Ok(Some(backend.setup().await?))
            }
            None => {
                info!("no host backend registered");
                Ok(None)
            }
        }
    }

    pub async fn cleanup(&mut self) {
        if let Some(backend) = self.active.take() {
            info!(backend = backend.name(), "cleaning up host backend");
            backend.cleanup().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubBackend {
        name: &'static str,
        cleanups: AtomicUsize,
    }

    impl StubBackend {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                cleanups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl HostBackend for StubBackend {
        fn name(&self) -> &str {
            self.name
        }

        async fn setup(&self) -> Result<HostHandle> {
            anyhow::bail!("stub backend cannot start")
        }

        async fn cleanup(&self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_second_registration_rejected() {
        let mut slot = BackendSlot::new();
        slot.register(Arc::new(StubBackend::new("a"))).unwrap();
        let err = slot.register(Arc::new(StubBackend::new("b"))).unwrap_err();
        assert_eq!(err, BackendError::AlreadyRegistered);
    }

    #[test]
    fn test_unnamed_backend_rejected() {
        let mut slot = BackendSlot::new();
        let err = slot.register(Arc::new(StubBackend::new(""))).unwrap_err();
        assert_eq!(err, BackendError::InvalidOps);
    }

    #[tokio::test]
    async fn test_empty_slot_activates_to_none() {
        let slot = BackendSlot::new();
        assert!(slot.activate().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_runs_once() {
        let backend = Arc::new(StubBackend::new("stub"));
        let mut slot = BackendSlot::new();
        slot.register(backend.clone()).unwrap();

        slot.cleanup().await;
        slot.cleanup().await;
        assert_eq!(backend.cleanups.load(Ordering::SeqCst), 1);
    }
}
