// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The relay registry.

use std::net::Ipv4Addr;

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use net::Transport;

use crate::endpoint::{RelayEndpoint, RelayKey};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("no relay registered under {0}")]
    NoSuchRelay(RelayKey),
    #[error("{0} does not describe a disabled relay")]
    NoSuchDisabledRelay(RelayKey),
    #[error("{0} does not describe an enabled relay")]
    NoSuchEnabledRelay(RelayKey),
    #[error("invalid relay spec {spec:?}: {reason}")]
    InvalidSpec { spec: String, reason: String },
}

#[derive(Debug, Default)]
struct Tables {
    enabled: AHashMap<RelayKey, RelayEndpoint>,
    disabled: AHashMap<RelayKey, RelayEndpoint>,
    /// Global kill switch for this transport.
    relaying: bool,
}

impl Tables {
    fn lookup(map: &AHashMap<RelayKey, RelayEndpoint>, ip: Ipv4Addr, port: u16) -> Option<RelayEndpoint> {
        RelayKey::candidates(ip, port)
            .iter()
            .find_map(|key| map.get(key).copied())
    }
}

/// Relay filters for both transports.
///
/// New entries start disabled; per-entry toggles move them between the
/// enabled and disabled tables, and traffic is only diverted while the
/// transport's global flag is set as well.
#[derive(Debug, Default)]
pub struct RelayRegistry {
    udp: Mutex<Tables>,
    tcp: Mutex<Tables>,
}

impl RelayRegistry {
    #[must_use]
    pub fn new() -> RelayRegistry {
        RelayRegistry::default()
    }

    fn tables(&self, transport: Transport) -> &Mutex<Tables> {
        match transport {
            Transport::Udp => &self.udp,
            Transport::Tcp => &self.tcp,
        }
    }

    /// Register a relay under a filter key, initially disabled.
    pub fn add(&self, transport: Transport, key: RelayKey, endpoint: RelayEndpoint) {
        info!("added {transport} relay {endpoint} for target {key}");
        self.tables(transport).lock().disabled.insert(key, endpoint);
    }

    /// Remove the relay matching (ip, port), trying the wildcard chain
    /// if the exact key is absent. Returns false if nothing matched.
    ///
    /// The global flag drops when the enabled table empties.
    pub fn remove(&self, transport: Transport, ip: Ipv4Addr, port: u16) -> bool {
        let mut tables = self.tables(transport).lock();
        let exact = RelayKey::new(ip, port);
        let from_enabled = if tables.enabled.contains_key(&exact) {
            true
        } else if tables.disabled.contains_key(&exact) {
            false
        } else {
            // unknown exact key: try the wildcard chain on both tables
            let in_enabled = RelayKey::candidates(ip, port)
                .iter()
                .any(|k| tables.enabled.contains_key(k));
            let in_disabled = RelayKey::candidates(ip, port)
                .iter()
                .any(|k| tables.disabled.contains_key(k));
            if !in_enabled && !in_disabled {
                return false;
            }
            in_enabled
        };
        let map = if from_enabled {
            &mut tables.enabled
        } else {
            &mut tables.disabled
        };
        let mut removed = map.remove(&exact).is_some();
        if !removed {
            for key in RelayKey::candidates(ip, port) {
                if map.remove(&key).is_some() {
                    removed = true;
                    break;
                }
            }
        }
        if tables.enabled.is_empty() {
            tables.relaying = false;
        }
        removed
    }

    /// Move an entry between the disabled and enabled tables.
    ///
    /// Enabling an entry also raises the transport's global flag.
    /// Returns whether the entry is now actively diverting traffic.
    pub fn set_filter_enabled(
        &self,
        transport: Transport,
        key: RelayKey,
        enabled: bool,
    ) -> Result<bool, RelayError> {
        let mut tables = self.tables(transport).lock();
        if enabled {
            let endpoint = tables
                .disabled
                .remove(&key)
                .ok_or(RelayError::NoSuchDisabledRelay(key))?;
            tables.enabled.insert(key, endpoint);
            tables.relaying = true;
        } else {
            let endpoint = tables
                .enabled
                .remove(&key)
                .ok_or(RelayError::NoSuchEnabledRelay(key))?;
            tables.disabled.insert(key, endpoint);
        }
        Ok(enabled && tables.relaying)
    }

    /// True iff the entry under `key` sits in the enabled table.
    pub fn filter_enabled(&self, transport: Transport, key: RelayKey) -> Result<bool, RelayError> {
        let tables = self.tables(transport).lock();
        if tables.enabled.contains_key(&key) {
            Ok(true)
        } else if tables.disabled.contains_key(&key) {
            Ok(false)
        } else {
            Err(RelayError::NoSuchRelay(key))
        }
    }

    #[must_use]
    pub fn exists(&self, transport: Transport, key: RelayKey) -> bool {
        let tables = self.tables(transport).lock();
        tables.enabled.contains_key(&key) || tables.disabled.contains_key(&key)
    }

    /// The enabled relay diverting traffic to (ip, port), if any.
    #[must_use]
    pub fn active_relay(
        &self,
        transport: Transport,
        ip: Ipv4Addr,
        port: u16,
    ) -> Option<RelayEndpoint> {
        Tables::lookup(&self.tables(transport).lock().enabled, ip, port)
    }

    /// Like [`RelayRegistry::active_relay`] but falling back to the
    /// disabled table. Used by the admin surface.
    #[must_use]
    pub fn any_relay(
        &self,
        transport: Transport,
        ip: Ipv4Addr,
        port: u16,
    ) -> Option<RelayEndpoint> {
        let tables = self.tables(transport).lock();
        Tables::lookup(&tables.enabled, ip, port).or_else(|| Tables::lookup(&tables.disabled, ip, port))
    }

    #[must_use]
    pub fn relaying_enabled(&self, transport: Transport) -> bool {
        self.tables(transport).lock().relaying
    }

    /// Set the global flag; returns the previous value.
    pub fn set_relaying_enabled(&self, transport: Transport, enabled: bool) -> bool {
        let mut tables = self.tables(transport).lock();
        std::mem::replace(&mut tables.relaying, enabled)
    }

    #[must_use]
    pub fn active_relays(&self, transport: Transport) -> Vec<(RelayKey, RelayEndpoint)> {
        let tables = self.tables(transport).lock();
        sorted(&tables.enabled)
    }

    #[must_use]
    pub fn inactive_relays(&self, transport: Transport) -> Vec<(RelayKey, RelayEndpoint)> {
        let tables = self.tables(transport).lock();
        sorted(&tables.disabled)
    }

    /// Every relay for a transport, enabled and disabled.
    #[must_use]
    pub fn all_relays(&self, transport: Transport) -> Vec<(RelayKey, RelayEndpoint)> {
        let tables = self.tables(transport).lock();
        let mut all: AHashMap<RelayKey, RelayEndpoint> = tables.disabled.clone();
        all.extend(tables.enabled.iter().map(|(k, v)| (*k, *v)));
        sorted(&all)
    }

    /// Load a comma-separated relay config string for one transport:
    /// `ip::port::mac::switch::switchport::filterIp::filterPort[,...]`
    /// where `filterIp`/`filterPort` may be `*`.
    ///
    /// Each loaded entry is enabled immediately. Malformed entries are
    /// logged and skipped; returns how many entries were loaded.
    pub fn load_config(&self, transport: Transport, config: &str) -> usize {
        let mut loaded = 0;
        for spec in config.split(',') {
            match parse_relay_spec(spec) {
                Ok((key, endpoint)) => {
                    self.add(transport, key, endpoint);
                    self.set_relaying_enabled(transport, true);
                    if let Err(err) = self.set_filter_enabled(transport, key, true) {
                        warn!("failed to enable configured relay {key}: {err}");
                        continue;
                    }
                    loaded += 1;
                }
                Err(err) => warn!("skipping relay config entry: {err}"),
            }
        }
        loaded
    }
}

fn sorted(map: &AHashMap<RelayKey, RelayEndpoint>) -> Vec<(RelayKey, RelayEndpoint)> {
    let mut entries: Vec<(RelayKey, RelayEndpoint)> =
        map.iter().map(|(k, v)| (*k, *v)).collect();
    entries.sort_by_key(|(k, _)| *k);
    entries
}

fn parse_relay_spec(spec: &str) -> Result<(RelayKey, RelayEndpoint), RelayError> {
    let invalid = |reason: &str| RelayError::InvalidSpec {
        spec: spec.to_string(),
        reason: reason.to_string(),
    };
    let parts: Vec<&str> = spec.trim().split("::").collect();
    let [ip, port, mac, switch, switch_port, filter_ip, filter_port] = parts.as_slice() else {
        return Err(invalid("expected 7 '::'-separated fields"));
    };
    let endpoint = RelayEndpoint {
        ip: ip.parse().map_err(|_| invalid("bad relay ip"))?,
        port: port.parse().map_err(|_| invalid("bad relay port"))?,
        mac: mac.parse().map_err(|_| invalid("bad relay mac"))?,
        switch: switch.parse().map_err(|_| invalid("bad switch id"))?,
        switch_port: net::PortNo(
            switch_port
                .parse()
                .map_err(|_| invalid("bad switch port"))?,
        ),
    };
    let key = RelayKey {
        ip: if *filter_ip == "*" {
            Ipv4Addr::UNSPECIFIED
        } else {
            filter_ip.parse().map_err(|_| invalid("bad filter ip"))?
        },
        port: if *filter_port == "*" {
            0
        } else {
            filter_port.parse().map_err(|_| invalid("bad filter port"))?
        },
    };
    Ok((key, endpoint))
}
