//! Deterministic key-to-host routing by highest random weight.
//!
//! Every host scores every key with a salted hash; the highest score owns the
//! key and the next `n - 1` are its replicas. Any node holding the same host
//! list and salt computes the same answer with no coordination. Adding a host
//! moves only the keys the new host now wins; removing one moves only the
//! keys it owned.
//!
//! A map is immutable. Host changes build a new map with a higher generation.

use bulwark_core::error::ConfigError;
use bulwark_core::types::HostId;

const SALT_KEY_CONTEXT: &str = "bulwark-responsibility-salt-v1";

#[derive(Debug, Clone)]
pub struct ResponsibilityMap {
    hosts: Vec<HostId>,
    salt_key: [u8; 32],
    generation: u64,
}

impl ResponsibilityMap {
    /// Build a map over `hosts`. Duplicates are ignored; order does not matter.
    pub fn new(
        hosts: impl IntoIterator<Item = HostId>,
        salt: &[u8],
        generation: u64,
    ) -> Result<Self, ConfigError> {
        let mut hosts: Vec<HostId> = hosts.into_iter().collect();
        hosts.sort();
        hosts.dedup();
        if hosts.is_empty() {
            return Err(ConfigError::EmptyHostSet);
        }
        Ok(Self {
            hosts,
            salt_key: blake3::derive_key(SALT_KEY_CONTEXT, salt),
            generation,
        })
    }

    pub fn hosts(&self) -> &[HostId] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn contains(&self, host: &HostId) -> bool {
        self.hosts.binary_search(host).is_ok()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn weight(&self, key: &[u8], host: &HostId) -> u64 {
        let mut hasher = blake3::Hasher::new_keyed(&self.salt_key);
        hasher.update(&(host.as_str().len() as u64).to_le_bytes());
        hasher.update(host.as_str().as_bytes());
        hasher.update(key);
        let digest = hasher.finalize();
        let mut low = [0u8; 8];
        low.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(low)
    }

    /// The host that owns `key`.
    pub fn find_member_responsible(&self, key: &[u8]) -> &HostId {
        let mut best = &self.hosts[0];
        let mut best_weight = self.weight(key, best);
        for host in &self.hosts[1..] {
            let w = self.weight(key, host);
            if w > best_weight {
                best = host;
                best_weight = w;
            }
        }
        best
    }

    /// Up to `n` distinct hosts for `key`, most preferred first.
    pub fn find_members_responsible(&self, key: &[u8], n: usize) -> Vec<&HostId> {
        let mut ranked: Vec<(u64, &HostId)> =
            self.hosts.iter().map(|h| (self.weight(key, h), h)).collect();
        // Ties are broken by host id so the order is total.
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        ranked.into_iter().take(n).map(|(_, h)| h).collect()
    }

    /// A new map with `host` added.
    pub fn with_host(&self, host: HostId) -> Self {
        let mut hosts = self.hosts.clone();
        if let Err(pos) = hosts.binary_search(&host) {
            hosts.insert(pos, host);
        }
        Self {
            hosts,
            salt_key: self.salt_key,
            generation: self.generation + 1,
        }
    }

    /// A new map without `host`. Fails if it was the last host.
    pub fn without_host(&self, host: &HostId) -> Result<Self, ConfigError> {
        let hosts: Vec<HostId> = self.hosts.iter().filter(|h| *h != host).cloned().collect();
        if hosts.is_empty() {
            return Err(ConfigError::EmptyHostSet);
        }
        Ok(Self {
            hosts,
            salt_key: self.salt_key,
            generation: self.generation + 1,
        })
    }
}
