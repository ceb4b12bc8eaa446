//! Process-wide controller defaults consumed by the initializer and
//! configurator. The daemon loads these from its configuration file;
//! stored per-address settings override them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Apply the local name on bring-up.
    pub set_name: bool,
    /// Name template; `%h` expands to the hostname, `%d` to the device id.
    pub name: String,

    /// Apply the class of device on bring-up.
    pub set_class: bool,
    /// Default class of device (lower 24 bits used).
    pub class: u32,

    /// Apply the page timeout on bring-up.
    pub set_page_timeout: bool,
    /// Page timeout in baseband slots.
    pub page_timeout: u16,

    /// Default link policy written to every controller.
    pub link_policy: u16,
    /// Link mode applied during initialization.
    pub link_mode: u32,

    /// Whether controllers may be discoverable. When false, the
    /// discoverable bit is cleared from stored device classes.
    pub inquiry_scan: bool,

    /// Base of the external adapter paths. Defaults to a process-scoped
    /// path when unset.
    pub base_path: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            set_name: true,
            name: "%h-%d".to_string(),
            set_class: true,
            class: 0x000100,
            set_page_timeout: true,
            page_timeout: 8192,
            link_policy: 0x000f,
            link_mode: 0,
            inquiry_scan: true,
            base_path: None,
        }
    }
}

impl HostConfig {
    /// Base of the external adapter paths for this process.
    pub fn base_path(&self) -> String {
        self.base_path
            .clone()
            .unwrap_or_else(|| format!("/org/bluez/{}", std::process::id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert!(config.set_name);
        assert_eq!(config.name, "%h-%d");
        assert_eq!(config.page_timeout, 8192);
        assert_eq!(config.link_policy, 0x000f);
        assert!(config.inquiry_scan);
    }

    #[test]
    fn test_base_path_defaults_to_process_scope() {
        let config = HostConfig::default();
        assert!(config.base_path().starts_with("/org/bluez/"));

        let config = HostConfig {
            base_path: Some("/test".to_string()),
            ..HostConfig::default()
        };
        assert_eq!(config.base_path(), "/test");
    }
}
