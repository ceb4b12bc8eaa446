//! The authoritative adapter registry.
//!
//! Owns every adapter object, enforces the one-adapter-per-device-id
//! invariant, elects the default adapter, and announces every
//! add/remove/default change through the notification collaborator.
//! Mutated exclusively by the host event loop, so it carries no locks.

use crate::hci::BdAddr;
use crate::notify::{AdapterPattern, ManagerNotifier};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// One local controller as tracked by this process.
#[derive(Debug, Clone)]
pub struct Adapter {
    device_id: u16,
    address: BdAddr,
    path: String,
    ready: bool,
    powered: bool,
}

impl Adapter {
    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    pub fn address(&self) -> &BdAddr {
        &self.address
    }

    /// Handle external collaborators use to address this adapter.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// True once initialization and configuration have completed.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("adapter hci{0} already registered")]
    DuplicateDevice(u16),

    #[error("no adapter for hci{0}")]
    NotFound(u16),
}

pub struct AdapterRegistry {
    /// Insertion-ordered; adapter counts are bounded by physical radios,
    /// so linear scans are fine.
    adapters: Vec<Adapter>,
    default_id: Option<u16>,
    base_path: String,
    /// Path of the wildcard ("any") adapter, when one is designated.
    any_path: Option<String>,
    notifier: Arc<dyn ManagerNotifier>,
}

impl AdapterRegistry {
    pub fn new(base_path: impl Into<String>, notifier: Arc<dyn ManagerNotifier>) -> Self {
        Self {
            adapters: Vec::new(),
            default_id: None,
            base_path: base_path.into(),
            any_path: None,
            notifier,
        }
    }

    fn path_for(&self, dev_id: u16) -> String {
        format!("{}/hci{}", self.base_path, dev_id)
    }

    /// Paths of ready adapters, as announced to collaborators.
    fn ready_paths(&self) -> Vec<String> {
        self.adapters
            .iter()
            .filter(|a| a.ready)
            .map(|a| a.path.clone())
            .collect()
    }

    /// Create the adapter for a newly registered controller. A duplicate
    /// registration is rejected and leaves the existing entry untouched.
    pub fn register(
        &mut self,
        dev_id: u16,
        address: BdAddr,
        powered: bool,
    ) -> Result<(), RegistryError> {
        if self.find_by_id(dev_id).is_some() {
            return Err(RegistryError::DuplicateDevice(dev_id));
        }

        let adapter = Adapter {
            device_id: dev_id,
            address,
            path: self.path_for(dev_id),
            ready: false,
            powered,
        };
        info!(dev_id, address = %address, path = %adapter.path, "adapter registered");
        let path = adapter.path.clone();
        self.adapters.push(adapter);

        self.notifier.adapter_added(&path);
        self.notifier.adapters_changed(&self.ready_paths());
        Ok(())
    }

    /// Remove the adapter. Collaborators are notified before the entry is
    /// destroyed, and the default is re-elected when it pointed here.
    pub fn unregister(&mut self, dev_id: u16) -> Result<(), RegistryError> {
        let index = self
            .adapters
            .iter()
            .position(|a| a.device_id == dev_id)
            .ok_or(RegistryError::NotFound(dev_id))?;

        let adapter = self.adapters.remove(index);
        info!(dev_id, path = %adapter.path, "adapter unregistered");

        self.notifier.adapters_changed(&self.ready_paths());

        if self.default_id == Some(dev_id) || self.default_id.is_none() {
            self.elect_default();
        }

        self.notifier.adapter_removed(&adapter.path);
        Ok(())
    }

    pub fn find_by_id(&self, dev_id: u16) -> Option<&Adapter> {
        self.adapters.iter().find(|a| a.device_id == dev_id)
    }

    pub fn find_by_address(&self, address: &BdAddr) -> Option<&Adapter> {
        self.adapters.iter().find(|a| a.address == *address)
    }

    pub fn find_by_path(&self, path: &str) -> Option<&Adapter> {
        self.adapters.iter().find(|a| a.path == path)
    }

    /// Resolve a client pattern to an external path.
    pub fn find_path(&self, pattern: &AdapterPattern) -> Option<String> {
        match pattern {
            AdapterPattern::Any => self.any_path.clone(),
            AdapterPattern::Id(id) => self.find_by_id(*id).map(|a| a.path.clone()),
            AdapterPattern::Address(addr) => {
                self.find_by_address(addr).map(|a| a.path.clone())
            }
        }
    }

    pub fn adapters(&self) -> &[Adapter] {
        &self.adapters
    }

    pub fn paths(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.path.clone()).collect()
    }

    pub fn default_adapter(&self) -> Option<u16> {
        self.default_id
    }

    pub fn default_path(&self) -> Option<String> {
        self.default_id
            .and_then(|id| self.find_by_id(id))
            .map(|a| a.path.clone())
    }

    /// Make `dev_id` the default adapter and announce the change. The id
    /// is recorded even when no adapter currently matches it.
    pub fn set_default(&mut self, dev_id: u16) {
        self.default_id = Some(dev_id);
        if let Some(adapter) = self.find_by_id(dev_id) {
            let path = adapter.path.clone();
            debug!(dev_id, path = %path, "default adapter set");
            self.notifier.default_adapter_changed(&path);
        }
    }

    /// Re-derive the default the way the kernel route lookup would:
    /// first powered controller wins; none leaves the default unset.
    fn elect_default(&mut self) {
        match self.adapters.iter().find(|a| a.powered).map(|a| a.device_id) {
            Some(id) => self.set_default(id),
            None => self.default_id = None,
        }
    }

    pub fn mark_powered(&mut self, dev_id: u16, powered: bool) -> Result<(), RegistryError> {
        let adapter = self
            .adapters
            .iter_mut()
            .find(|a| a.device_id == dev_id)
            .ok_or(RegistryError::NotFound(dev_id))?;
        adapter.powered = powered;
        Ok(())
    }

    /// Mark initialization + configuration complete. The adapter becomes
    /// ready and powered, and claims the default slot when none is set.
    pub fn mark_ready(&mut self, dev_id: u16) -> Result<(), RegistryError> {
        let adapter = self
            .adapters
            .iter_mut()
            .find(|a| a.device_id == dev_id)
            .ok_or(RegistryError::NotFound(dev_id))?;
        adapter.ready = true;
        adapter.powered = true;
        info!(dev_id, path = %adapter.path, "adapter ready");

        self.notifier.adapters_changed(&self.ready_paths());
        if self.default_id.is_none() {
            self.set_default(dev_id);
        }
        Ok(())
    }

    /// Designate the wildcard adapter path.
    pub fn set_any_path(&mut self, path: impl Into<String>) {
        self.any_path = Some(path.into());
    }

    /// Tear down every adapter, emitting removal notifications in order.
    pub fn shutdown(&mut self) {
        while let Some(dev_id) = self.adapters.first().map(|a| a.device_id) {
            // Cannot fail: the id was just read from the list.
            let _ = self.unregister(dev_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NotifierEvent, RecordingNotifier};

    fn addr(last: u8) -> BdAddr {
        BdAddr::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, last])
    }

    fn registry() -> (AdapterRegistry, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let registry = AdapterRegistry::new("/org/bluez/test", notifier.clone());
        (registry, notifier)
    }

    #[test]
    fn test_register_and_lookup() {
        let (mut registry, _) = registry();
        registry.register(0, addr(0), false).unwrap();
        registry.register(1, addr(1), true).unwrap();

        assert_eq!(registry.adapters().len(), 2);
        assert_eq!(registry.find_by_id(1).unwrap().path(), "/org/bluez/test/hci1");
        assert_eq!(
            registry.find_by_address(&addr(0)).unwrap().device_id(),
            0
        );
        assert_eq!(
            registry
                .find_by_path("/org/bluez/test/hci0")
                .unwrap()
                .device_id(),
            0
        );
        assert!(registry.find_by_id(9).is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected_and_flags_kept() {
        let (mut registry, _) = registry();
        registry.register(0, addr(0), false).unwrap();
        registry.mark_ready(0).unwrap();

        let err = registry.register(0, addr(9), false).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateDevice(0));

        let adapter = registry.find_by_id(0).unwrap();
        assert!(adapter.is_ready());
        assert!(adapter.is_powered());
        assert_eq!(adapter.address(), &addr(0));
        assert_eq!(registry.adapters().len(), 1);
    }

    #[test]
    fn test_power_loss_preserves_ready() {
        // A configured adapter can be momentarily unpowered; readiness
        // survives the power transition.
        let (mut registry, _) = registry();
        registry.register(2, addr(2), true).unwrap();
        registry.mark_ready(2).unwrap();
        registry.mark_powered(2, false).unwrap();

        let adapter = registry.find_by_id(2).unwrap();
        assert!(adapter.is_ready());
        assert!(!adapter.is_powered());
    }

    #[test]
    fn test_unregister_missing_is_not_found() {
        let (mut registry, _) = registry();
        assert_eq!(registry.unregister(3), Err(RegistryError::NotFound(3)));
    }

    #[test]
    fn test_first_ready_adapter_becomes_default() {
        let (mut registry, notifier) = registry();
        registry.register(1, addr(1), true).unwrap();
        registry.register(0, addr(0), true).unwrap();
        assert_eq!(registry.default_adapter(), None);

        registry.mark_ready(1).unwrap();
        assert_eq!(registry.default_adapter(), Some(1));
        registry.mark_ready(0).unwrap();
        assert_eq!(registry.default_adapter(), Some(1));

        assert!(notifier
            .events()
            .contains(&NotifierEvent::DefaultChanged("/org/bluez/test/hci1".into())));
    }

    #[test]
    fn test_default_reelected_on_removal() {
        let (mut registry, _) = registry();
        registry.register(0, addr(0), true).unwrap();
        registry.register(1, addr(1), true).unwrap();
        registry.mark_ready(0).unwrap();
        registry.mark_ready(1).unwrap();
        assert_eq!(registry.default_adapter(), Some(0));

        registry.unregister(0).unwrap();
        assert_eq!(registry.default_adapter(), Some(1));

        registry.unregister(1).unwrap();
        assert_eq!(registry.default_adapter(), None);
    }

    #[test]
    fn test_removing_non_default_keeps_default() {
        let (mut registry, _) = registry();
        registry.register(0, addr(0), true).unwrap();
        registry.register(1, addr(1), true).unwrap();
        registry.mark_ready(0).unwrap();

        registry.unregister(1).unwrap();
        assert_eq!(registry.default_adapter(), Some(0));
    }

    #[test]
    fn test_removal_notifies_before_destruction() {
        let (mut registry, notifier) = registry();
        registry.register(0, addr(0), true).unwrap();
        registry.unregister(0).unwrap();

        let events = notifier.events();
        assert!(events.contains(&NotifierEvent::Removed("/org/bluez/test/hci0".into())));
        assert!(registry.adapters().is_empty());
    }

    #[test]
    fn test_adapters_changed_lists_ready_only() {
        let (mut registry, notifier) = registry();
        registry.register(0, addr(0), true).unwrap();
        registry.register(1, addr(1), true).unwrap();
        registry.mark_ready(1).unwrap();

        let changed = notifier
            .events()
            .iter()
            .filter_map(|e| match e {
                NotifierEvent::AdaptersChanged(paths) => Some(paths.clone()),
                _ => None,
            })
            .last()
            .unwrap();
        assert_eq!(changed, vec!["/org/bluez/test/hci1".to_string()]);
    }

    #[test]
    fn test_pattern_resolution() {
        let (mut registry, _) = registry();
        registry.register(0, addr(0), true).unwrap();

        assert_eq!(
            registry.find_path(&AdapterPattern::Id(0)).as_deref(),
            Some("/org/bluez/test/hci0")
        );
        assert_eq!(
            registry
                .find_path(&AdapterPattern::Address(addr(0)))
                .as_deref(),
            Some("/org/bluez/test/hci0")
        );
        assert_eq!(registry.find_path(&AdapterPattern::Id(1)), None);

        assert_eq!(registry.find_path(&AdapterPattern::Any), None);
        registry.set_any_path("/org/bluez/test/any");
        assert_eq!(
            registry.find_path(&AdapterPattern::Any).as_deref(),
            Some("/org/bluez/test/any")
        );
    }

    #[test]
    fn test_register_announcement_contract() {
        use crate::notify::MockManagerNotifier;

        let mut notifier = MockManagerNotifier::new();
        notifier
            .expect_adapter_added()
            .withf(|path| path == "/org/bluez/test/hci0")
            .times(1)
            .return_const(());
        // Nothing is ready yet, so the announced list is empty.
        notifier
            .expect_adapters_changed()
            .withf(|paths: &[String]| paths.is_empty())
            .times(1)
            .return_const(());

        let mut registry = AdapterRegistry::new("/org/bluez/test", Arc::new(notifier));
        registry.register(0, addr(0), false).unwrap();
    }

    #[test]
    fn test_shutdown_removes_all_in_order() {
        let (mut registry, notifier) = registry();
        registry.register(0, addr(0), true).unwrap();
        registry.register(1, addr(1), true).unwrap();
        registry.shutdown();

        assert!(registry.adapters().is_empty());
        let removed: Vec<_> = notifier
            .events()
            .iter()
            .filter_map(|e| match e {
                NotifierEvent::Removed(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            removed,
            vec![
                "/org/bluez/test/hci0".to_string(),
                "/org/bluez/test/hci1".to_string()
            ]
        );
    }
}
