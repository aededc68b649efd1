// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Relay endpoints and filter keys.

use std::fmt::Display;
use std::net::Ipv4Addr;

use net::{Mac, PortNo, SwitchId, SwitchPort};

/// A filter selecting traffic to divert: destination ip and port.
///
/// `0.0.0.0` and port `0` are wildcards. Lookups fall back from the
/// exact key to the full wildcard, then the port-only key, then the
/// ip-only key, in that order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct RelayKey {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl RelayKey {
    pub const ANY: RelayKey = RelayKey {
        ip: Ipv4Addr::UNSPECIFIED,
        port: 0,
    };

    #[must_use]
    pub fn new(ip: Ipv4Addr, port: u16) -> RelayKey {
        RelayKey { ip, port }
    }

    /// The keys a destination (ip, port) is probed under, most specific
    /// first.
    #[must_use]
    pub fn candidates(ip: Ipv4Addr, port: u16) -> [RelayKey; 4] {
        [
            RelayKey { ip, port },
            RelayKey::ANY,
            RelayKey {
                ip: Ipv4Addr::UNSPECIFIED,
                port,
            },
            RelayKey { ip, port: 0 },
        ]
    }
}

impl Display for RelayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ip.is_unspecified() {
            write!(f, "*:")?;
        } else {
            write!(f, "{}:", self.ip)?;
        }
        if self.port == 0 {
            write!(f, "*")
        } else {
            write!(f, "{}", self.port)
        }
    }
}

/// Where a relay listens: its addresses and its attachment point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RelayEndpoint {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub mac: Mac,
    pub switch: SwitchId,
    pub switch_port: PortNo,
}

impl RelayEndpoint {
    #[must_use]
    pub fn attachment_point(&self) -> SwitchPort {
        SwitchPort::new(self.switch, self.switch_port)
    }
}

impl Display for RelayEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} ({}) at {}",
            self.ip,
            self.port,
            self.mac,
            self.attachment_point()
        )
    }
}
