//! The raw-socket HCI backend.

use crate::backend::HostBackend;
use crate::lifecycle::{start_host, HostContext, HostHandle};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

struct Inner {
    ctx: Option<HostContext>,
    handle: Option<HostHandle>,
}

/// Drives the stack through kernel HCI sockets.
pub struct HciBackend {
    inner: Mutex<Inner>,
}

impl HciBackend {
    pub fn new(ctx: HostContext) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ctx: Some(ctx),
                handle: None,
            }),
        }
    }
}

#[async_trait]
impl HostBackend for HciBackend {
    fn name(&self) -> &str {
        "hci"
    }

    async fn setup(&self) -> Result<HostHandle> {
        let ctx = {
            let mut inner = self.inner.lock();
            inner
                .ctx
                .take()
                .ok_or_else(|| anyhow!("HCI backend already set up"))?
        };

        let handle = start_host(ctx).await?;
        self.inner.lock().handle = Some(handle.clone());
        Ok(handle)
    }

    async fn cleanup(&self) {
        let handle = self.inner.lock().handle.take();
        if let Some(handle) = handle {
            let _ = handle.shutdown().await;
        }
    }
}
