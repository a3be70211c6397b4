//! Network configuration.
//!
//! All tunables of the channel/session/protocol runtime in one place.
//! Durations are stored as integer seconds (minutes for clock skew) so the
//! struct round-trips through an embedder's config file; accessor methods
//! return [`Duration`] values, with randomization applied where herd
//! wake-ups must be avoided.

use crate::config::{Authority, Endpoint};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default magic for the main network.
pub const DEFAULT_MAGIC: u32 = 0xd9b4_bef9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Network selector, first four bytes of every message.
    pub magic: u32,
    /// Identity for log tagging.
    pub identifier: u32,

    /// Peers below this protocol version are rejected during handshake.
    pub minimum_protocol: u32,
    /// Highest protocol version we negotiate down from.
    pub maximum_protocol: u32,

    /// Peers must advertise all of these service bits.
    pub services_minimum: u64,
    /// Service bits we advertise.
    pub services_maximum: u64,
    /// Addresses advertising any of these bits are not pooled.
    pub invalid_services: u64,

    /// Maximum concurrent inbound channels (0 disables the listener).
    pub inbound_connections: u16,
    /// Target concurrent outbound channels (0 disables the dialer pool).
    pub outbound_connections: u16,
    /// Manual reconnect attempts before giving up (0 retries forever).
    pub manual_attempt_limit: u32,
    /// Parallel connectors raced per outbound slot.
    pub connect_batch_size: u16,

    pub connect_timeout_seconds: u32,
    pub channel_handshake_seconds: u32,
    pub channel_heartbeat_seconds: u32,
    pub channel_inactivity_seconds: u32,
    pub channel_expiration_seconds: u32,
    pub host_pool_flush_seconds: u32,
    /// Maximum allowed |peer.timestamp - now| during handshake.
    pub maximum_skew_minutes: u32,

    /// Address pool capacity (0 disables the pool).
    pub host_pool_capacity: u32,
    /// Address pool disk mirror.
    pub host_pool_file: PathBuf,

    pub enable_ipv6: bool,
    /// Permit completing a handshake with ourselves (testing).
    pub enable_loopback: bool,
    pub enable_reject: bool,
    pub enable_alert: bool,
    /// Advertised relay flag in the version message.
    pub enable_relay: bool,
    /// Surface for transaction-relay protocols layered above the core.
    pub enable_transaction: bool,
    pub enable_address: bool,
    pub enable_address_v2: bool,
    pub enable_witness_tx: bool,

    /// Never connect to or accept these.
    pub blacklists: Vec<Authority>,
    /// If non-empty, only accept these.
    pub whitelists: Vec<Authority>,
    /// Bootstrap hosts, contacted once when the pool is low.
    pub seeds: Vec<Endpoint>,
    /// Our own addresses, announced to peers and excluded from the pool.
    pub selfs: Vec<Authority>,
    /// Persistent manual connections.
    pub peers: Vec<Endpoint>,
    /// Local listen authorities.
    pub binds: Vec<Authority>,
    /// Optional SOCKS5 proxy for an external transport layer.
    pub socks_proxy: Option<Endpoint>,

    /// Client identifier sent in the version message.
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            magic: DEFAULT_MAGIC,
            identifier: 0,
            minimum_protocol: 31402,
            maximum_protocol: 70016,
            services_minimum: 1,
            services_maximum: 9,
            invalid_services: 0,
            inbound_connections: 117,
            outbound_connections: 8,
            manual_attempt_limit: 0,
            connect_batch_size: 5,
            connect_timeout_seconds: 5,
            channel_handshake_seconds: 30,
            channel_heartbeat_seconds: 60,
            channel_inactivity_seconds: 600,
            channel_expiration_seconds: 3600,
            host_pool_flush_seconds: 900,
            maximum_skew_minutes: 120,
            host_pool_capacity: 10_000,
            host_pool_file: PathBuf::from("hosts.cache"),
            enable_ipv6: false,
            enable_loopback: false,
            enable_reject: false,
            enable_alert: true,
            enable_relay: true,
            enable_transaction: true,
            enable_address: true,
            enable_address_v2: true,
            enable_witness_tx: true,
            blacklists: Vec::new(),
            whitelists: Vec::new(),
            seeds: Vec::new(),
            selfs: Vec::new(),
            peers: Vec::new(),
            binds: vec![Authority::unspecified(8333)],
            socks_proxy: None,
            user_agent: format!("/sierra:{}/", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Settings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds.into())
    }

    pub fn channel_handshake(&self) -> Duration {
        Duration::from_secs(self.channel_handshake_seconds.into())
    }

    pub fn channel_heartbeat(&self) -> Duration {
        Duration::from_secs(self.channel_heartbeat_seconds.into())
    }

    pub fn channel_expiration(&self) -> Duration {
        Duration::from_secs(self.channel_expiration_seconds.into())
    }

    pub fn host_pool_flush(&self) -> Duration {
        Duration::from_secs(self.host_pool_flush_seconds.into())
    }

    pub fn maximum_skew(&self) -> Duration {
        Duration::from_secs(u64::from(self.maximum_skew_minutes) * 60)
    }

    /// Inactivity deadline, randomized in [base/2, 3*base/2] so idle
    /// channels do not wake in herds.
    pub fn channel_inactivity(&self) -> Duration {
        randomize(Duration::from_secs(self.channel_inactivity_seconds.into()))
    }

    /// Heartbeat period with the same jitter.
    pub fn channel_heartbeat_randomized(&self) -> Duration {
        randomize(self.channel_heartbeat())
    }

    /// Address count below which the seed session runs at startup.
    pub fn minimum_address_count(&self) -> usize {
        usize::from(self.connect_batch_size) * usize::from(self.outbound_connections)
    }

    /// The pool is configured (capacity non-zero).
    pub fn host_pool_enabled(&self) -> bool {
        self.host_pool_capacity != 0
    }

    /// The authority matches a configured blacklist entry.
    pub fn blacklisted(&self, authority: &Authority) -> bool {
        self.blacklists.iter().any(|entry| entry.matches(authority))
    }

    /// The authority fails a non-empty whitelist.
    pub fn not_whitelisted(&self, authority: &Authority) -> bool {
        !self.whitelists.is_empty()
            && !self.whitelists.iter().any(|entry| entry.matches(authority))
    }

    /// The authority is one of our own configured addresses.
    pub fn is_self(&self, authority: &Authority) -> bool {
        self.selfs.iter().any(|entry| entry.matches(authority))
    }

    /// First configured self with a non-zero port, if any.
    pub fn announced_self(&self) -> Option<&Authority> {
        self.selfs.iter().find(|own| own.port() != 0)
    }
}

/// Uniform over [base/2, 3*base/2].
fn randomize(base: Duration) -> Duration {
    let half = base / 2;
    half + rand::thread_rng().gen_range(Duration::ZERO..=base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimum_address_count() {
        let mut settings = Settings::default();
        settings.connect_batch_size = 5;
        settings.outbound_connections = 8;
        assert_eq!(settings.minimum_address_count(), 40);
    }

    #[test]
    fn test_inactivity_jitter_bounds() {
        let mut settings = Settings::default();
        settings.channel_inactivity_seconds = 600;
        for _ in 0..32 {
            let value = settings.channel_inactivity();
            assert!(value >= Duration::from_secs(300));
            assert!(value <= Duration::from_secs(900));
        }
    }

    #[test]
    fn test_blacklist_matching() {
        let mut settings = Settings::default();
        settings.blacklists = vec!["10.9.0.0:0/16".parse().unwrap()];
        assert!(settings.blacklisted(&"10.9.1.2:8333".parse().unwrap()));
        assert!(!settings.blacklisted(&"10.10.1.2:8333".parse().unwrap()));
    }

    #[test]
    fn test_whitelist_empty_accepts_all() {
        let settings = Settings::default();
        assert!(!settings.not_whitelisted(&"1.2.3.4:8333".parse().unwrap()));
    }
}
