//! Fleet configuration: who the hosts are and how long to wait for them.

use std::time::Duration;

use bulwark_core::constants::{
    DEFAULT_CALL_TIMEOUT_MS, DEFAULT_FORWARD_TIMEOUT_MS, DEFAULT_TOP_OF_LADDER_CACHE_CAPACITY,
    DEFAULT_TOP_OF_LADDER_FRESHNESS_SECS,
};
use bulwark_core::error::ConfigError;
use bulwark_core::types::HostId;
use serde::{Deserialize, Serialize};

/// Configuration for this host's view of the fleet.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FleetConfig {
    /// Every host in the fleet, including this one.
    pub hosts: Vec<String>,
    /// This host's id. Must appear in `hosts`.
    pub local_host: String,
    /// Shared salt mixed into responsibility hashing.
    pub salt: String,
    /// Deadline for one cross-host call.
    pub call_timeout_ms: u64,
    /// Deadline for an attempt forwarded to the host owning its client IP.
    pub forward_timeout_ms: u64,
    /// How long a key seen at the top of the ladder is trusted to stay there.
    pub top_of_ladder_freshness_secs: u64,
    /// Entries in the client-side top-of-ladder cache.
    pub top_of_ladder_cache_capacity: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["local".to_string()],
            local_host: "local".to_string(),
            salt: String::new(),
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            forward_timeout_ms: DEFAULT_FORWARD_TIMEOUT_MS,
            top_of_ladder_freshness_secs: DEFAULT_TOP_OF_LADDER_FRESHNESS_SECS,
            top_of_ladder_cache_capacity: DEFAULT_TOP_OF_LADDER_CACHE_CAPACITY,
        }
    }
}

impl FleetConfig {
    /// A fleet of one, for tests and single-process deployments.
    pub fn single(host: &str) -> Self {
        Self {
            hosts: vec![host.to_string()],
            local_host: host.to_string(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hosts.is_empty() {
            return Err(ConfigError::EmptyHostSet);
        }
        if !self.hosts.contains(&self.local_host) {
            return Err(ConfigError::InvalidValue {
                name: "fleet.local_host".into(),
                reason: format!("{} is not in the host list", self.local_host),
            });
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "fleet.call_timeout_ms".into(),
                reason: "must be positive".into(),
            });
        }
        if self.forward_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "fleet.forward_timeout_ms".into(),
                reason: "must be positive".into(),
            });
        }
        if self.top_of_ladder_cache_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                name: "fleet.top_of_ladder_cache_capacity".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn host_ids(&self) -> Vec<HostId> {
        self.hosts.iter().map(HostId::new).collect()
    }

    pub fn local_id(&self) -> HostId {
        HostId::new(&self.local_host)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn top_of_ladder_freshness(&self) -> Duration {
        Duration::from_secs(self.top_of_ladder_freshness_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(FleetConfig::default().validate().is_ok());
        assert!(FleetConfig::single("a").validate().is_ok());
    }

    #[test]
    fn empty_hosts_rejected() {
        let cfg = FleetConfig {
            hosts: vec![],
            ..FleetConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyHostSet));
    }

    #[test]
    fn local_host_must_be_listed() {
        let cfg = FleetConfig {
            hosts: vec!["a".into(), "b".into()],
            local_host: "c".into(),
            ..FleetConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn zero_timeout_rejected() {
        let cfg = FleetConfig {
            call_timeout_ms: 0,
            ..FleetConfig::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = FleetConfig {
            forward_timeout_ms: 0,
            ..FleetConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn durations() {
        let cfg = FleetConfig::default();
        assert_eq!(cfg.call_timeout(), Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS));
        assert_eq!(cfg.forward_timeout(), Duration::from_millis(DEFAULT_FORWARD_TIMEOUT_MS));
        assert_eq!(
            cfg.top_of_ladder_freshness(),
            Duration::from_secs(DEFAULT_TOP_OF_LADDER_FRESHNESS_SECS)
        );
    }

    #[test]
    fn deserializes_partial() {
        let cfg: FleetConfig =
            serde_json::from_str(r#"{"hosts": ["a", "b"], "local_host": "b"}"#).unwrap();
        assert_eq!(cfg.host_ids().len(), 2);
        assert_eq!(cfg.local_id(), HostId::new("b"));
        assert_eq!(cfg.call_timeout_ms, DEFAULT_CALL_TIMEOUT_MS);
    }
}
