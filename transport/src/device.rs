// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Learned end hosts.

use std::net::Ipv4Addr;

use net::{Mac, SwitchPort};

/// A host the controller has learned about, keyed by MAC.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Device {
    pub mac: Mac,
    /// IPv4 addresses observed for this MAC, most recent first.
    pub ips: Vec<Ipv4Addr>,
    /// Where the host attaches to the fabric, if currently known.
    pub location: Option<SwitchPort>,
}

impl Device {
    /// The host's current IPv4 address, if any is known.
    #[must_use]
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.ips.first().copied()
    }
}

/// Lookup over the learned-host table.
pub trait DeviceDirectory: Send + Sync {
    fn device_by_mac(&self, mac: Mac) -> Option<Device>;

    fn device_by_ip(&self, ip: Ipv4Addr) -> Option<Device>;
}
