// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Read access to the discovered link graph.

use std::fmt::Display;

use net::{Link, PortNo, SwitchId, SwitchPort};

/// The controller's current picture of the fabric.
///
/// Links are directed; a healthy physical cable shows up as two entries.
pub trait TopologyView: Send + Sync {
    /// Every known directed link.
    fn links(&self) -> Vec<Link>;

    /// Ports of a switch that are enabled, including fabric ports.
    fn ports(&self, switch: SwitchId) -> Vec<PortNo>;

    /// True iff the port faces another switch rather than end hosts.
    fn is_fabric_port(&self, port: SwitchPort) -> bool;
}

/// A change in the fabric the routing core must react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TopologyEvent {
    LinkUp(Link),
    LinkDown(Link),
    SwitchJoined(SwitchId),
    SwitchLeft(SwitchId),
    PortDown(SwitchPort),
}

impl Display for TopologyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyEvent::LinkUp(link) => write!(f, "link up {link}"),
            TopologyEvent::LinkDown(link) => write!(f, "link down {link}"),
            TopologyEvent::SwitchJoined(id) => write!(f, "switch joined {id}"),
            TopologyEvent::SwitchLeft(id) => write!(f, "switch left {id}"),
            TopologyEvent::PortDown(port) => write!(f, "port down {port}"),
        }
    }
}
