//! End-to-end behaviour of the adapter lifecycle: registration through
//! initialization, configuration, readiness, and teardown.

use bluehost_core::config::HostConfig;
use bluehost_core::hci::event::{self, StackEvent};
use bluehost_core::hci::BdAddr;
use bluehost_core::lifecycle::configure::NoServiceClasses;
use bluehost_core::lifecycle::dispatch::{start_host, HostContext, LifecycleDispatcher};
use bluehost_core::lifecycle::InitCompletion;
use bluehost_core::storage::{AdapterStore, MemoryStore, PowerMode};
use bluehost_core::testing::{
    ControlCommand, FakeDriver, NotifierEvent, RecordingNotifier, RecordingSecurity, SecurityCall,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const ADDR0: [u8; 6] = [0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13];
const ADDR1: [u8; 6] = [0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x14];

struct Harness {
    driver: Arc<FakeDriver>,
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
    security: Arc<RecordingSecurity>,
    dispatcher: LifecycleDispatcher,
    completion_rx: mpsc::Receiver<InitCompletion>,
}

fn harness() -> Harness {
    let driver = Arc::new(FakeDriver::new());
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let security = Arc::new(RecordingSecurity::new());

    let config = HostConfig {
        base_path: Some("/org/bluez/test".to_string()),
        ..HostConfig::default()
    };

    let ctx = HostContext {
        driver: driver.clone(),
        store: store.clone(),
        notifier: notifier.clone(),
        security: security.clone(),
        services: Arc::new(NoServiceClasses),
        config,
    };
    let (dispatcher, completion_rx) = LifecycleDispatcher::new(ctx);

    Harness {
        driver,
        store,
        notifier,
        security,
        dispatcher,
        completion_rx,
    }
}

impl Harness {
    /// Drive one device from registration through a settled completion.
    async fn bring_up(&mut self, dev_id: u16) {
        self.dispatcher.handle_event(StackEvent::Registered(dev_id));
        self.dispatcher.handle_event(StackEvent::PoweredOn(dev_id));
        self.settle_one().await;
    }

    async fn settle_one(&mut self) {
        let completion = tokio::time::timeout(Duration::from_secs(5), self.completion_rx.recv())
            .await
            .expect("initialization timed out")
            .expect("completion channel closed");
        self.dispatcher.handle_completion(completion).await;
    }
}

#[tokio::test]
async fn test_power_on_makes_adapter_ready() {
    let mut h = harness();
    h.driver.add_device(0, ADDR0, false);

    h.bring_up(0).await;

    let adapter = h.dispatcher.registry().find_by_id(0).unwrap();
    assert!(adapter.is_ready());
    assert!(adapter.is_powered());
    assert_eq!(adapter.path(), "/org/bluez/test/hci0");
    assert_eq!(h.dispatcher.registry().default_adapter(), Some(0));

    assert_eq!(h.security.calls(), vec![SecurityCall::Start(0)]);

    let commands = h.driver.commands();
    assert!(commands.contains(&ControlCommand::BringUp { dev_id: 0 }));
    assert!(commands
        .iter()
        .any(|c| matches!(c, ControlCommand::WriteLocalName { dev_id: 0, .. })));
    assert!(commands
        .iter()
        .any(|c| matches!(c, ControlCommand::WriteClass { dev_id: 0, .. })));
    assert!(commands.contains(&ControlCommand::WritePageTimeout {
        dev_id: 0,
        timeout: 8192
    }));
    assert!(commands.contains(&ControlCommand::WriteDefaultLinkPolicy {
        dev_id: 0,
        policy: 0x000f
    }));
}

#[tokio::test]
async fn test_stored_power_off_forces_adapter_down() {
    let mut h = harness();
    h.driver.add_device(0, ADDR0, false);
    h.store
        .set_power_mode(&BdAddr::new(ADDR0), PowerMode::Off)
        .unwrap();

    h.bring_up(0).await;

    let adapter = h.dispatcher.registry().find_by_id(0).unwrap();
    assert!(!adapter.is_ready());
    assert!(!adapter.is_powered());
    assert_eq!(h.dispatcher.registry().default_adapter(), None);

    // Security came up with the device and went down with it.
    assert_eq!(
        h.security.calls(),
        vec![SecurityCall::Start(0), SecurityCall::Stop(0)]
    );
    assert!(h
        .driver
        .commands()
        .contains(&ControlCommand::BringDown { dev_id: 0 }));
}

#[tokio::test]
async fn test_completion_after_unregister_is_discarded() {
    let mut h = harness();
    h.driver.add_device(0, ADDR0, false);

    h.dispatcher.handle_event(StackEvent::Registered(0));
    h.dispatcher.handle_event(StackEvent::PoweredOn(0));
    h.dispatcher.handle_event(StackEvent::Unregistered(0));
    h.settle_one().await;

    assert!(h.dispatcher.registry().find_by_id(0).is_none());
    assert!(h.security.calls().is_empty());
}

#[tokio::test]
async fn test_power_on_is_recorded_before_initialization_settles() {
    let mut h = harness();
    h.driver.add_device(0, ADDR0, false);

    h.dispatcher.handle_event(StackEvent::Registered(0));
    h.dispatcher.handle_event(StackEvent::PoweredOn(0));

    // Initialization is still in flight; the observed power state is
    // already tracked.
    let adapter = h.dispatcher.registry().find_by_id(0).unwrap();
    assert!(adapter.is_powered());
    assert!(!adapter.is_ready());
    h.settle_one().await;
}

#[tokio::test]
async fn test_initialization_failure_leaves_adapter_not_ready() {
    let mut h = harness();
    h.driver.add_device(0, ADDR0, false);
    h.driver.set_fail_bring_up(0, true);

    h.bring_up(0).await;

    let adapter = h.dispatcher.registry().find_by_id(0).unwrap();
    assert!(!adapter.is_ready());
    // The kernel still reported the device up.
    assert!(adapter.is_powered());
    assert!(h.security.calls().is_empty());
}

#[tokio::test]
async fn test_two_controllers_come_up_independently() {
    let mut h = harness();
    h.driver.add_device(0, ADDR0, false);
    h.driver.add_device(1, ADDR1, false);

    h.dispatcher.handle_event(StackEvent::Registered(0));
    h.dispatcher.handle_event(StackEvent::Registered(1));
    h.dispatcher.handle_event(StackEvent::PoweredOn(0));
    h.dispatcher.handle_event(StackEvent::PoweredOn(1));
    h.settle_one().await;
    h.settle_one().await;

    assert!(h.dispatcher.registry().find_by_id(0).unwrap().is_ready());
    assert!(h.dispatcher.registry().find_by_id(1).unwrap().is_ready());
    assert!(h.dispatcher.registry().default_adapter().is_some());
}

#[tokio::test]
async fn test_duplicate_registration_keeps_existing_state() {
    let mut h = harness();
    h.driver.add_device(0, ADDR0, false);

    h.bring_up(0).await;
    h.dispatcher.handle_event(StackEvent::Registered(0));

    let adapter = h.dispatcher.registry().find_by_id(0).unwrap();
    assert!(adapter.is_ready());
    assert_eq!(h.dispatcher.registry().adapters().len(), 1);
}

#[tokio::test]
async fn test_events_for_unknown_devices_are_ignored() {
    let mut h = harness();

    h.dispatcher.handle_event(StackEvent::PoweredOn(5));
    h.dispatcher.handle_event(StackEvent::PoweredOff(5));
    h.dispatcher.handle_event(StackEvent::Unregistered(5));

    assert!(h.dispatcher.registry().adapters().is_empty());
    assert!(h.security.calls().is_empty());
    assert!(h.driver.commands().is_empty());
}

#[tokio::test]
async fn test_raw_device_is_never_registered() {
    let mut h = harness();
    h.driver.add_raw_device(0, ADDR0);

    h.dispatcher.handle_event(StackEvent::Registered(0));

    assert!(h.dispatcher.registry().adapters().is_empty());
}

#[tokio::test]
async fn test_power_off_stops_security_and_clears_power() {
    let mut h = harness();
    h.driver.add_device(0, ADDR0, false);

    h.bring_up(0).await;
    h.dispatcher.handle_event(StackEvent::PoweredOff(0));

    let adapter = h.dispatcher.registry().find_by_id(0).unwrap();
    assert!(!adapter.is_powered());
    assert_eq!(
        h.security.calls(),
        vec![SecurityCall::Start(0), SecurityCall::Stop(0)]
    );
}

#[tokio::test]
async fn test_device_up_at_registration_initializes() {
    let mut h = harness();
    h.driver.add_device(0, ADDR0, true);

    h.dispatcher.handle_event(StackEvent::Registered(0));
    h.settle_one().await;

    assert!(h.dispatcher.registry().find_by_id(0).unwrap().is_ready());
}

#[tokio::test]
async fn test_unregister_announces_removal() {
    let mut h = harness();
    h.driver.add_device(0, ADDR0, false);

    h.bring_up(0).await;
    h.dispatcher.handle_event(StackEvent::Unregistered(0));

    assert!(h
        .notifier
        .events()
        .contains(&NotifierEvent::Removed("/org/bluez/test/hci0".into())));
    assert_eq!(h.dispatcher.registry().default_adapter(), None);
}

async fn wait_for_default(handle: &bluehost_core::lifecycle::HostHandle) -> String {
    for _ in 0..100 {
        if let Some(path) = handle.default_adapter().await.unwrap() {
            return path;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no default adapter elected");
}

#[tokio::test]
async fn test_host_loop_answers_queries_over_handle() {
    let driver = Arc::new(FakeDriver::new());
    driver.add_device(0, ADDR0, false);

    let ctx = HostContext {
        driver: driver.clone(),
        store: Arc::new(MemoryStore::new()),
        notifier: Arc::new(RecordingNotifier::new()),
        security: Arc::new(RecordingSecurity::new()),
        services: Arc::new(NoServiceClasses),
        config: HostConfig {
            base_path: Some("/org/bluez/test".to_string()),
            ..HostConfig::default()
        },
    };

    let handle = start_host(ctx).await.unwrap();

    // Enumeration registered hci0; power it on through the monitor.
    let monitor = driver.monitor_sender();
    monitor
        .send(event::encode(StackEvent::PoweredOn(0)))
        .await
        .unwrap();

    let default = wait_for_default(&handle).await;
    assert_eq!(default, "/org/bluez/test/hci0");

    assert_eq!(
        handle.list_adapters().await.unwrap(),
        vec!["/org/bluez/test/hci0".to_string()]
    );
    assert_eq!(
        handle.find_adapter("hci0").await.unwrap().unwrap(),
        "/org/bluez/test/hci0"
    );
    assert_eq!(
        handle.find_adapter("00:1A:7D:DA:71:13").await.unwrap().unwrap(),
        "/org/bluez/test/hci0"
    );
    assert!(handle.find_adapter("hci7").await.unwrap().is_err());
    assert!(handle.find_adapter("not-a-pattern").await.unwrap().is_err());

    handle.shutdown().await.unwrap();
    // The loop drains and exits; subsequent commands fail cleanly.
    for _ in 0..100 {
        if handle.list_adapters().await.is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("host loop did not shut down");
}

#[tokio::test]
async fn test_host_loop_registers_devices_from_monitor() {
    let driver = Arc::new(FakeDriver::new());

    let ctx = HostContext {
        driver: driver.clone(),
        store: Arc::new(MemoryStore::new()),
        notifier: Arc::new(RecordingNotifier::new()),
        security: Arc::new(RecordingSecurity::new()),
        services: Arc::new(NoServiceClasses),
        config: HostConfig {
            base_path: Some("/org/bluez/test".to_string()),
            ..HostConfig::default()
        },
    };

    let handle = start_host(ctx).await.unwrap();
    assert!(handle.list_adapters().await.unwrap().is_empty());

    driver.add_device(1, ADDR1, true);
    let monitor = driver.monitor_sender();
    monitor
        .send(event::encode(StackEvent::Registered(1)))
        .await
        .unwrap();

    let default = wait_for_default(&handle).await;
    assert_eq!(default, "/org/bluez/test/hci1");
}
