//! The host cache: a bounded, deduplicated pool of peer addresses with a
//! line-oriented disk mirror.
//!
//! The pool is the one component reached from several strands, so it
//! serializes internally. Entries are FIFO-evicted at capacity; fetch is
//! uniform random; `take` removes an address for the duration of an
//! outbound attempt and `restore` returns it unless the channel stopped
//! for a terminal reason.

use crate::error::{Code, Error};
use crate::messages::AddressItem;
use crate::runtime::time::unix_seconds;
use crate::settings::Settings;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::{HashSet, VecDeque};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

struct State {
    stopped: bool,
    buffer: VecDeque<AddressItem>,
    index: HashSet<AddressItem>,
}

pub struct Hosts {
    settings: Arc<Settings>,
    state: Mutex<State>,
}

impl Hosts {
    pub fn new(settings: Arc<Settings>) -> Arc<Self> {
        Arc::new(Self {
            settings,
            state: Mutex::new(State {
                stopped: true,
                buffer: VecDeque::new(),
                index: HashSet::new(),
            }),
        })
    }

    /// Load the hosts file if present. Corrupt lines are skipped with a
    /// warning. A disabled pool (zero capacity) starts empty.
    pub fn start(&self) -> Code {
        let mut state = self.state.lock().unwrap();
        state.stopped = false;
        if !self.settings.host_pool_enabled() {
            return Ok(());
        }

        let path = &self.settings.host_pool_file;
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(error) => {
                warn!("hosts file {} unreadable: {}", path.display(), error);
                return Err(Error::OperationFailed);
            }
        };

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Some(address) if address.is_specified() => {
                    self.insert(&mut state, address);
                }
                _ => warn!("skipping corrupt hosts line: {}", line),
            }
        }
        debug!("loaded {} hosts from {}", state.buffer.len(), path.display());
        Ok(())
    }

    /// Flush to disk and refuse further mutation.
    pub fn stop(&self) -> Code {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return Ok(());
        }
        state.stopped = true;
        self.flush_locked(&state)
    }

    /// Periodic flush; the pool stays live.
    pub fn flush(&self) -> Code {
        let state = self.state.lock().unwrap();
        if state.stopped {
            return Err(Error::ServiceStopped);
        }
        self.flush_locked(&state)
    }

    pub fn count(&self) -> usize {
        self.state.lock().unwrap().buffer.len()
    }

    /// Uniform random selection of one pooled address.
    pub fn fetch(&self) -> Result<AddressItem, Error> {
        if !self.settings.host_pool_enabled() {
            return Err(Error::AddressDisabled);
        }
        let state = self.state.lock().unwrap();
        if state.stopped {
            return Err(Error::ServiceStopped);
        }
        if state.buffer.is_empty() {
            return Err(Error::AddressEmpty);
        }
        let mut rng = ChaCha20Rng::from_entropy();
        let pick = rng.gen_range(0..state.buffer.len());
        Ok(state.buffer[pick].clone())
    }

    /// A shuffled snapshot of up to `limit` addresses for an address
    /// response.
    pub fn snapshot(&self, limit: usize) -> Vec<AddressItem> {
        let state = self.state.lock().unwrap();
        let mut out: Vec<AddressItem> = state.buffer.iter().cloned().collect();
        drop(state);

        let mut rng = ChaCha20Rng::from_entropy();
        for index in (1..out.len()).rev() {
            let other = rng.gen_range(0..=index);
            out.swap(index, other);
        }
        out.truncate(limit);
        out
    }

    /// Insert new addresses, deduplicated; unspecified, self, blacklisted
    /// and invalid-service entries are rejected. Returns the accepted
    /// count.
    pub fn save(&self, addresses: &[AddressItem]) -> usize {
        if !self.settings.host_pool_enabled() {
            return 0;
        }
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return 0;
        }
        let mut accepted = 0;
        for address in addresses {
            if !self.storable(address) {
                continue;
            }
            if self.insert(&mut state, address.clone()) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Remove an address for the duration of an outbound attempt.
    pub fn take(&self, address: &AddressItem) {
        let mut state = self.state.lock().unwrap();
        if state.index.remove(address) {
            state.buffer.retain(|entry| entry != address);
        }
    }

    /// Return a taken address to the pool.
    pub fn restore(&self, address: AddressItem) {
        if !self.settings.host_pool_enabled() || !self.storable(&address) {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return;
        }
        self.insert(&mut state, address);
    }

    fn storable(&self, address: &AddressItem) -> bool {
        if !address.is_specified() {
            return false;
        }
        if address.services & self.settings.invalid_services != 0 {
            return false;
        }
        let authority = address.to_authority();
        !self.settings.is_self(&authority) && !self.settings.blacklisted(&authority)
    }

    /// True if newly inserted (duplicates are silently ignored); a full
    /// pool evicts its oldest entry first.
    fn insert(&self, state: &mut State, address: AddressItem) -> bool {
        if !state.index.insert(address.clone()) {
            return false;
        }
        if state.buffer.len() >= self.settings.host_pool_capacity as usize {
            if let Some(evicted) = state.buffer.pop_front() {
                state.index.remove(&evicted);
            }
        }
        state.buffer.push_back(address);
        true
    }

    /// Atomic replace: write a sibling temp file, then rename over.
    fn flush_locked(&self, state: &State) -> Code {
        if !self.settings.host_pool_enabled() {
            return Ok(());
        }
        let path = &self.settings.host_pool_file;
        let staged = path.with_extension("new");

        let result = (|| -> std::io::Result<()> {
            let mut file = std::fs::File::create(&staged)?;
            for address in &state.buffer {
                writeln!(file, "{}", format_line(address))?;
            }
            file.sync_all()?;
            std::fs::rename(&staged, path)
        })();

        result.map_err(|error| {
            warn!("hosts flush to {} failed: {}", path.display(), error);
            Error::OperationFailed
        })
    }
}

/// One line per entry: `ip:port/timestamp/services`.
fn format_line(address: &AddressItem) -> String {
    format!("{}/{}/{}", address.to_authority(), address.timestamp, address.services)
}

/// Accepts `ip:port`, optionally `/cidr`, optionally `/timestamp/services`.
fn parse_line(line: &str) -> Option<AddressItem> {
    let mut segments = line.split('/');
    let base = segments.next()?;
    let authority: crate::config::Authority = base.parse().ok()?;

    let extras: Vec<&str> = segments.collect();
    let (timestamp, services) = match extras.as_slice() {
        [] => (unix_seconds() as u32, 0),
        [cidr] => {
            cidr.parse::<u8>().ok()?;
            (unix_seconds() as u32, 0)
        }
        [timestamp, services] => (timestamp.parse().ok()?, services.parse().ok()?),
        [cidr, timestamp, services] => {
            cidr.parse::<u8>().ok()?;
            (timestamp.parse().ok()?, services.parse().ok()?)
        }
        _ => return None,
    };
    Some(AddressItem::new(&authority, timestamp, services))
}

/// Load-bearing for tests that need a throwaway file path.
#[cfg(test)]
pub(crate) fn scratch_file(tag: &str) -> std::path::PathBuf {
    let unique = format!(
        "sierra_hosts_{}_{}_{}.cache",
        tag,
        std::process::id(),
        unix_seconds()
    );
    std::env::temp_dir().join(unique)
}

#[cfg(test)]
pub(crate) fn remove_scratch(path: &std::path::Path) {
    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(path.with_extension("new"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::address::service;

    fn item(text: &str) -> AddressItem {
        AddressItem::new(&text.parse().unwrap(), 1_700_000_000, service::NETWORK)
    }

    fn pool(capacity: u32) -> Arc<Hosts> {
        let mut settings = Settings::default();
        settings.host_pool_capacity = capacity;
        settings.host_pool_file = scratch_file("mem");
        let hosts = Hosts::new(Arc::new(settings));
        hosts.start().unwrap();
        hosts
    }

    #[test]
    fn test_save_deduplicates() {
        let hosts = pool(10);
        let accepted = hosts.save(&[item("1.2.3.4:1"), item("1.2.3.4:1"), item("1.2.3.4:2")]);
        assert_eq!(accepted, 2);
        assert_eq!(hosts.count(), 2);
    }

    #[test]
    fn test_rejects_unspecified_self_and_blacklisted() {
        let mut settings = Settings::default();
        settings.host_pool_capacity = 10;
        settings.host_pool_file = scratch_file("filter");
        settings.selfs = vec!["9.9.9.9:1".parse().unwrap()];
        settings.blacklists = vec!["8.0.0.0:0/8".parse().unwrap()];
        let hosts = Hosts::new(Arc::new(settings));
        hosts.start().unwrap();

        let accepted = hosts.save(&[
            item("0.0.0.0:1"),
            item("1.2.3.4:0"),
            item("9.9.9.9:1"),
            item("8.1.2.3:1"),
            item("7.7.7.7:1"),
        ]);
        assert_eq!(accepted, 1);
        assert_eq!(hosts.fetch().unwrap(), item("7.7.7.7:1"));
    }

    #[test]
    fn test_fifo_eviction_at_capacity() {
        let hosts = pool(3);
        for port in 1..=4u16 {
            hosts.save(&[item(&format!("1.2.3.4:{port}"))]);
        }
        assert_eq!(hosts.count(), 3);
        // Oldest evicted; a duplicate of it is accepted again.
        assert_eq!(hosts.save(&[item("1.2.3.4:1")]), 1);
    }

    #[test]
    fn test_take_and_restore() {
        let hosts = pool(10);
        hosts.save(&[item("1.2.3.4:1")]);

        let fetched = hosts.fetch().unwrap();
        hosts.take(&fetched);
        assert_eq!(hosts.fetch(), Err(Error::AddressEmpty));

        hosts.restore(fetched);
        assert_eq!(hosts.count(), 1);
    }

    #[test]
    fn test_disabled_pool() {
        let hosts = pool(0);
        assert_eq!(hosts.save(&[item("1.2.3.4:1")]), 0);
        assert_eq!(hosts.fetch(), Err(Error::AddressDisabled));
    }

    #[test]
    fn test_file_round_trip_skips_corrupt_lines() {
        let path = scratch_file("roundtrip");
        std::fs::write(
            &path,
            "1.2.3.4:8333/1700000000/9\nnot a host line\n[2001:db8::1]:18333/1700000001/1\n5.6.7.8:0\n",
        )
        .unwrap();

        let mut settings = Settings::default();
        settings.host_pool_capacity = 100;
        settings.host_pool_file = path.clone();
        let hosts = Hosts::new(Arc::new(settings.clone()));
        hosts.start().unwrap();
        // Corrupt line and zero-port line dropped.
        assert_eq!(hosts.count(), 2);

        hosts.save(&[item("7.7.7.7:1")]);
        hosts.stop().unwrap();

        let reloaded = Hosts::new(Arc::new(settings));
        reloaded.start().unwrap();
        assert_eq!(reloaded.count(), 3);

        remove_scratch(&path);
    }

    #[test]
    fn test_every_save_is_fetchable_or_rejected() {
        let hosts = pool(1000);
        let mut entries = Vec::new();
        for index in 0..100u16 {
            entries.push(item(&format!("10.1.{}.{}:8333", index / 250, index % 250 + 1)));
        }
        let accepted = hosts.save(&entries);
        assert_eq!(accepted, hosts.count());

        let snapshot = hosts.snapshot(1000);
        for entry in &entries[..accepted] {
            assert!(snapshot.contains(entry));
        }
    }
}
