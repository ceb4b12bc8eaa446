//! Tracking for isolated device-initialization tasks.
//!
//! Each power-on spawns a blocking task that talks raw ioctls to one
//! controller. The supervisor hands out task ids, remembers which device
//! each task belongs to, and reconciles completions as they arrive on
//! the shared channel.

use crate::hci::control::{ControlError, DeviceInfo};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Terminal report from one initialization task.
#[derive(Debug)]
pub struct InitCompletion {
    pub task_id: u64,
    pub dev_id: u16,
    pub outcome: Result<DeviceInfo, ControlError>,
}

struct PendingInit {
    dev_id: u16,
    handle: JoinHandle<()>,
}

pub struct ChildSupervisor {
    next_id: u64,
    pending: HashMap<u64, PendingInit>,
    completion_tx: mpsc::Sender<InitCompletion>,
}

impl ChildSupervisor {
    /// Returns the supervisor and the receiver the host loop selects on.
    pub fn new() -> (Self, mpsc::Receiver<InitCompletion>) {
        let (completion_tx, completion_rx) = mpsc::channel(32);
        (
            Self {
                next_id: 1,
                pending: HashMap::new(),
                completion_tx,
            },
            completion_rx,
        )
    }

    /// Spawn and track one initialization task. `spawn` receives the
    /// assigned task id and the sender it must report its completion on.
    pub fn track<F>(&mut self, dev_id: u16, spawn: F) -> u64
    where
        F: FnOnce(u64, mpsc::Sender<InitCompletion>) -> JoinHandle<()>,
    {
        let task_id = self.next_id;
        self.next_id += 1;

        let handle = spawn(task_id, self.completion_tx.clone());
        debug!(task_id, dev_id, "initialization task started");
        self.pending.insert(task_id, PendingInit { dev_id, handle });
        task_id
    }

    /// Retire a completed task. A completion for an id the supervisor
    /// never issued (or already reaped) is logged and otherwise ignored.
    pub async fn reap(&mut self, task_id: u64) -> Option<u16> {
        match self.pending.remove(&task_id) {
            Some(pending) => {
                if let Err(err) = pending.handle.await {
                    warn!(task_id, dev_id = pending.dev_id, %err, "initialization task panicked");
                }
                Some(pending.dev_id)
            }
            None => {
                warn!(task_id, "completion for unknown initialization task");
                None
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
