//! Property tests for the registry's structural invariants: no two
//! adapters share a device id, and the default is always a member of
//! the registry or unset.

use bluehost_core::hci::BdAddr;
use bluehost_core::registry::AdapterRegistry;
use bluehost_core::testing::RecordingNotifier;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Register(u16),
    Unregister(u16),
    MarkReady(u16),
    MarkPowered(u16, bool),
    SetDefault(u16),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    // Small id space so operations collide often.
    let id = 0u16..8;
    prop_oneof![
        id.clone().prop_map(Op::Register),
        id.clone().prop_map(Op::Unregister),
        id.clone().prop_map(Op::MarkReady),
        (id.clone(), any::<bool>()).prop_map(|(i, p)| Op::MarkPowered(i, p)),
        id.prop_map(Op::SetDefault),
    ]
}

fn addr_for(dev_id: u16) -> BdAddr {
    BdAddr::new([0x00, 0x1A, 0x7D, 0x00, 0x00, dev_id as u8])
}

proptest! {
    #[test]
    fn registry_invariants_hold(ops in proptest::collection::vec(op_strategy(), 0..64)) {
        let notifier = Arc::new(RecordingNotifier::new());
        let mut registry = AdapterRegistry::new("/org/bluez/test", notifier);

        for op in ops {
            match op {
                Op::Register(id) => { let _ = registry.register(id, addr_for(id), false); }
                Op::Unregister(id) => { let _ = registry.unregister(id); }
                Op::MarkReady(id) => { let _ = registry.mark_ready(id); }
                Op::MarkPowered(id, powered) => { let _ = registry.mark_powered(id, powered); }
                Op::SetDefault(id) => registry.set_default(id),
            }

            let mut seen = HashSet::new();
            for adapter in registry.adapters() {
                prop_assert!(seen.insert(adapter.device_id()), "duplicate device id");
            }

            // A resolvable default always names a registered adapter.
            if let Some(path) = registry.default_path() {
                prop_assert!(registry.find_by_path(&path).is_some());
            }
        }
    }

    #[test]
    fn paths_are_stable_per_device(id in 0u16..1024) {
        let notifier = Arc::new(RecordingNotifier::new());
        let mut registry = AdapterRegistry::new("/org/bluez/test", notifier);

        registry.register(id, addr_for(id), false).unwrap();
        let path = registry.find_by_id(id).unwrap().path().to_string();
        prop_assert_eq!(path.clone(), format!("/org/bluez/test/hci{}", id));

        registry.unregister(id).unwrap();
        registry.register(id, addr_for(id), true).unwrap();
        prop_assert_eq!(registry.find_by_id(id).unwrap().path(), path.as_str());
    }
}
