// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Messages exchanged with switches.

use std::fmt::Display;
use std::net::Ipv4Addr;

use net::{Cookie, EthFrame, Mac, PacketMatch, PortNo, SwitchId};

/// An action list entry of a forwarding rule or packet-out.
///
/// Rewrites apply to the packet before it is emitted; `Output` and
/// `Flood` terminate the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Action {
    Output(PortNo),
    /// Emit on every port except the ingress port and fabric ports.
    Flood,
    SetEthSrc(Mac),
    SetEthDst(Mac),
    SetIpv4Src(Ipv4Addr),
    SetIpv4Dst(Ipv4Addr),
    SetSrcPort(u16),
    SetDstPort(u16),
}

/// A forwarding rule to install on one switch.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RuleSpec {
    pub pattern: PacketMatch,
    pub actions: Vec<Action>,
    pub cookie: Cookie,
    /// Seconds of inactivity after which the switch evicts the rule.
    /// Zero disables the timeout.
    pub idle_timeout: u16,
    /// Seconds after installation at which the switch evicts the rule
    /// unconditionally. Zero disables the timeout.
    pub hard_timeout: u16,
    /// Ask the switch to report the rule's removal back to us.
    pub notify_removal: bool,
}

/// Deletes every rule matching `pattern`, optionally restricted to one
/// cookie.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeleteSpec {
    pub pattern: PacketMatch,
    pub cookie: Option<Cookie>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SwitchMessage {
    InstallRule(RuleSpec),
    DeleteRule(DeleteSpec),
    /// Emit one packet through the given action list.
    PacketOut {
        frame: EthFrame,
        actions: Vec<Action>,
    },
}

/// Why a switch removed a rule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum ExpiryReason {
    IdleTimeout,
    HardTimeout,
    /// Removed by an explicit delete from the controller.
    Delete,
    GroupDelete,
}

impl Display for ExpiryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpiryReason::IdleTimeout => write!(f, "idle timeout"),
            ExpiryReason::HardTimeout => write!(f, "hard timeout"),
            ExpiryReason::Delete => write!(f, "delete"),
            ExpiryReason::GroupDelete => write!(f, "group delete"),
        }
    }
}

/// A rule-removed notification from a switch.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RuleRemoved {
    pub switch: SwitchId,
    pub cookie: Cookie,
    pub pattern: PacketMatch,
    pub reason: ExpiryReason,
}
