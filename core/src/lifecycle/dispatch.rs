//! The host event loop.
//!
//! A single task owns all adapter state and serializes three input
//! streams: kernel stack events from the monitor socket, completions
//! from initialization tasks, and commands from [`HostHandle`] clones.

use crate::config::HostConfig;
use crate::hci::control::{ControlError, DeviceInfo, HciDriver};
use crate::hci::event::{self, StackEvent};
use crate::lifecycle::configure::{DeviceConfigurator, ServiceClassSource, StartOutcome};
use crate::lifecycle::init::start_initialization;
use crate::lifecycle::supervisor::{ChildSupervisor, InitCompletion};
use crate::notify::{AdapterPattern, ManagerNotifier};
use crate::registry::AdapterRegistry;
use crate::security::SecurityManager;
use crate::storage::AdapterStore;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared collaborators handed to the host loop at startup.
#[derive(Clone)]
pub struct HostContext {
    pub driver: Arc<dyn HciDriver>,
    pub store: Arc<dyn AdapterStore>,
    pub notifier: Arc<dyn ManagerNotifier>,
    pub security: Arc<dyn SecurityManager>,
    pub services: Arc<dyn ServiceClassSource>,
    pub config: HostConfig,
}

/// Commands accepted by the running host loop.
pub enum HostCommand {
    DefaultAdapter {
        reply: mpsc::Sender<Option<String>>,
    },
    FindAdapter {
        pattern: String,
        reply: mpsc::Sender<Result<String, String>>,
    },
    ListAdapters {
        reply: mpsc::Sender<Vec<String>>,
    },
    Shutdown,
}

/// Cloneable handle for talking to the host loop from other tasks.
#[derive(Clone)]
pub struct HostHandle {
    command_tx: mpsc::Sender<HostCommand>,
}

impl HostHandle {
    /// Path of the current default adapter, if one is elected.
    pub async fn default_adapter(&self) -> Result<Option<String>> {
        let (tx, mut rx) = mpsc::channel(1);
        self.command_tx
            .send(HostCommand::DefaultAdapter { reply: tx })
            .await
            .map_err(|_| anyhow!("host loop not running"))?;
        rx.recv().await.ok_or_else(|| anyhow!("host loop dropped reply"))
    }

    /// Resolve an adapter pattern ("any", "hciN", or an address) to a
    /// path. Errors carry a client-facing message.
    pub async fn find_adapter(&self, pattern: &str) -> Result<Result<String, String>> {
        let (tx, mut rx) = mpsc::channel(1);
        self.command_tx
            .send(HostCommand::FindAdapter {
                pattern: pattern.to_string(),
                reply: tx,
            })
            .await
            .map_err(|_| anyhow!("host loop not running"))?;
        rx.recv().await.ok_or_else(|| anyhow!("host loop dropped reply"))
    }

    /// Paths of all registered adapters.
    pub async fn list_adapters(&self) -> Result<Vec<String>> {
        let (tx, mut rx) = mpsc::channel(1);
        self.command_tx
            .send(HostCommand::ListAdapters { reply: tx })
            .await
            .map_err(|_| anyhow!("host loop not running"))?;
        rx.recv().await.ok_or_else(|| anyhow!("host loop dropped reply"))
    }

    /// Ask the host loop to tear down all adapters and exit.
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(HostCommand::Shutdown)
            .await
            .map_err(|_| anyhow!("host loop not running"))
    }
}

/// Routes stack events and task completions to adapter state changes.
pub struct LifecycleDispatcher {
    registry: AdapterRegistry,
    supervisor: ChildSupervisor,
    ctx: HostContext,
}

impl LifecycleDispatcher {
    pub fn new(ctx: HostContext) -> (Self, mpsc::Receiver<InitCompletion>) {
        let (supervisor, completion_rx) = ChildSupervisor::new();
        let registry = AdapterRegistry::new(ctx.config.base_path(), ctx.notifier.clone());
        (
            Self {
                registry,
                supervisor,
                ctx,
            },
            completion_rx,
        )
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Decode and dispatch one frame from the monitor socket.
    pub fn handle_frame(&mut self, frame: &[u8]) {
        match event::decode(frame) {
            Ok(Some(event)) => self.handle_event(event),
            Ok(None) => {}
            Err(err) => warn!(%err, "discarding malformed stack event"),
        }
    }

    pub fn handle_event(&mut self, event: StackEvent) {
        match event {
            StackEvent::Registered(dev_id) => {
                info!(dev_id, "HCI device registered");
                self.device_registered(dev_id);
            }
            StackEvent::Unregistered(dev_id) => {
                info!(dev_id, "HCI device unregistered");
                self.device_unregistered(dev_id);
            }
            StackEvent::PoweredOn(dev_id) => {
                info!(dev_id, "HCI device up");
                self.device_powered_on(dev_id);
            }
            StackEvent::PoweredOff(dev_id) => {
                info!(dev_id, "HCI device down");
                self.device_powered_off(dev_id);
            }
        }
    }

    fn device_registered(&mut self, dev_id: u16) {
        let info = match self.ctx.driver.device_info(dev_id) {
            Ok(info) => info,
            Err(err) => {
                warn!(dev_id, %err, "cannot query registered device");
                return;
            }
        };
        if info.raw {
            info!(dev_id, "device in raw mode, ignoring");
            return;
        }

        if let Err(err) = self.registry.register(dev_id, info.address, info.up) {
            warn!(dev_id, %err, "registration ignored");
            return;
        }

        if info.up {
            self.device_powered_on(dev_id);
        }
    }

    fn device_unregistered(&mut self, dev_id: u16) {
        if let Err(err) = self.registry.unregister(dev_id) {
            warn!(dev_id, %err, "unregistration for unknown adapter");
        }
    }

    fn device_powered_on(&mut self, dev_id: u16) {
        // The kernel reported the controller up; record that before the
        // (possibly failing) initialization settles.
        if self.registry.mark_powered(dev_id, true).is_err() {
            warn!(dev_id, "power-on for unknown adapter, ignoring");
            return;
        }
        start_initialization(
            &mut self.supervisor,
            self.ctx.driver.clone(),
            dev_id,
            self.ctx.config.link_mode,
            u32::from(self.ctx.config.link_policy),
        );
    }

    fn device_powered_off(&mut self, dev_id: u16) {
        if let Err(err) = self.registry.mark_powered(dev_id, false) {
            warn!(dev_id, %err, "power-off for unknown adapter, ignoring");
            return;
        }
        self.ctx.security.stop(dev_id);
    }

    /// Reconcile one initialization completion with current state. The
    /// adapter may have been unregistered while the task ran.
    pub async fn handle_completion(&mut self, completion: InitCompletion) {
        let InitCompletion {
            task_id,
            dev_id,
            outcome,
        } = completion;

        if self.supervisor.reap(task_id).await.is_none() {
            return;
        }

        if self.registry.find_by_id(dev_id).is_none() {
            debug!(dev_id, task_id, "device unregistered during initialization, discarding");
            return;
        }

        match outcome {
            Ok(info) => self.finish_bringup(info),
            Err(err) => {
                error!(dev_id, %err, "device initialization failed");
            }
        }
    }

    /// Configure the initialized device and settle its final power state.
    fn finish_bringup(&mut self, info: DeviceInfo) {
        let configurator = DeviceConfigurator::new(&self.ctx);
        configurator.apply(&info);

        self.ctx.security.start(info.dev_id);

        match configurator.start_adapter(&info) {
            StartOutcome::Started => {
                if let Err(err) = self.registry.mark_ready(info.dev_id) {
                    warn!(dev_id = info.dev_id, %err, "cannot mark adapter ready");
                }
            }
            StartOutcome::PoweredDown => {
                self.ctx.security.stop(info.dev_id);
                if let Err(err) = self.registry.mark_powered(info.dev_id, false) {
                    warn!(dev_id = info.dev_id, %err, "cannot mark adapter down");
                }
            }
        }
    }

    /// Discover controllers that existed before the monitor socket was
    /// open, synthesizing the events their registration would have sent.
    pub fn enumerate(&mut self) -> Result<(), ControlError> {
        let devices = self.ctx.driver.list_devices()?;
        info!(count = devices.len(), "enumerating existing HCI devices");
        for device in devices {
            // Registration queues initialization itself for devices
            // already reported up.
            self.handle_event(StackEvent::Registered(device.dev_id));
        }
        Ok(())
    }

    pub fn handle_command(&mut self, command: HostCommand) -> bool {
        match command {
            HostCommand::DefaultAdapter { reply } => {
                let _ = reply.try_send(self.registry.default_path());
            }
            HostCommand::FindAdapter { pattern, reply } => {
                let result = match pattern.parse::<AdapterPattern>() {
                    Ok(parsed) => self
                        .registry
                        .find_path(&parsed)
                        .ok_or_else(|| format!("no adapter matching '{pattern}'")),
                    Err(err) => Err(err.to_string()),
                };
                let _ = reply.try_send(result);
            }
            HostCommand::ListAdapters { reply } => {
                let _ = reply.try_send(self.registry.paths());
            }
            HostCommand::Shutdown => {
                return false;
            }
        }
        true
    }

    pub fn shutdown(&mut self) {
        info!("shutting down adapter registry");
        self.registry.shutdown();
    }
}


/// Start the monitor socket and spawn the host event loop.
pub async fn start_host(ctx: HostContext) -> Result<HostHandle> {
    let mut monitor_rx = ctx
        .driver
        .start_monitor()
        .context("cannot open HCI monitor socket")?;

    let (mut dispatcher, mut completion_rx) = LifecycleDispatcher::new(ctx);

    if let Err(err) = dispatcher.enumerate() {
        // The monitor still delivers future registrations; keep running.
        error!(%err, "initial device enumeration failed");
    }

    let (command_tx, mut command_rx) = mpsc::channel(16);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = monitor_rx.recv() => {
                    match frame {
                        Some(frame) => dispatcher.handle_frame(&frame),
                        None => {
                            error!("HCI monitor socket closed");
                            break;
                        }
                    }
                }
                Some(completion) = completion_rx.recv() => {
                    dispatcher.handle_completion(completion).await;
                }
                command = command_rx.recv() => {
                    match command {
                        Some(command) => {
                            if !dispatcher.handle_command(command) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        dispatcher.shutdown();
    });

    Ok(HostHandle { command_tx })
}
