// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Structured packet model.
//!
//! The controller never touches the wire encoding of packets; the switch
//! transport hands packets in (and accepts packets out) as structured
//! values. Only the protocols the routing core classifies on are modeled,
//! everything else collapses into `Other`.

use std::fmt::Display;
use std::net::Ipv4Addr;

use crate::mac::Mac;

/// Transport protocols the relay tables distinguish.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum Transport {
    Udp,
    Tcp,
}

impl Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Udp => write!(f, "udp"),
            Transport::Tcp => write!(f, "tcp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UdpSegment {
    pub src_port: u16,
    pub dst_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TcpSegment {
    pub src_port: u16,
    pub dst_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ArpOp {
    Request,
    Reply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ArpPacket {
    pub op: ArpOp,
    pub sender_mac: Mac,
    pub sender_ip: Ipv4Addr,
    pub target_mac: Mac,
    pub target_ip: Ipv4Addr,
}

/// The ICMP messages the core emits or describes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IcmpMessage {
    EchoRequest,
    EchoReply,
    /// Destination unreachable, code "host unreachable", carrying the
    /// frame that could not be delivered.
    HostUnreachable(Box<EthFrame>),
}

/// IGMPv3 group record types (RFC 3376 §4.2.12).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum GroupRecordType {
    ModeIsInclude,
    ModeIsExclude,
    ChangeToInclude,
    ChangeToExclude,
    AllowNewSources,
    BlockOldSources,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GroupRecord {
    pub group: Ipv4Addr,
    pub record_type: GroupRecordType,
    pub sources: Vec<Ipv4Addr>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IgmpMessage {
    MembershipReport(Vec<GroupRecord>),
    MembershipQuery { group: Ipv4Addr },
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IpPayload {
    Udp(UdpSegment),
    Tcp(TcpSegment),
    Icmp(IcmpMessage),
    Igmp(IgmpMessage),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Ipv4Packet {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    /// The type-of-service byte as carried in the header (DSCP + ECN).
    pub tos: u8,
    pub ttl: u8,
    pub payload: IpPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EthPayload {
    Arp(ArpPacket),
    Ipv4(Ipv4Packet),
    Other,
}

/// An Ethernet frame as seen by the packet-in pipeline.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EthFrame {
    pub src: Mac,
    pub dst: Mac,
    pub vlan: Option<u16>,
    pub payload: EthPayload,
}

impl EthFrame {
    /// The IPv4 payload, if this frame carries one.
    #[must_use]
    pub fn ipv4(&self) -> Option<&Ipv4Packet> {
        match &self.payload {
            EthPayload::Ipv4(ip) => Some(ip),
            _ => None,
        }
    }

    /// The ARP payload, if this frame carries one.
    #[must_use]
    pub fn arp(&self) -> Option<&ArpPacket> {
        match &self.payload {
            EthPayload::Arp(arp) => Some(arp),
            _ => None,
        }
    }

    /// Human-readable one-liner used as flow description.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.payload {
            EthPayload::Arp(arp) => match arp.op {
                ArpOp::Reply => format!(
                    "ARP reply: {} is at {} (requested by {})",
                    arp.sender_ip, arp.sender_mac, arp.target_ip
                ),
                ArpOp::Request => format!(
                    "ARP request: Who has {}? Tell {}",
                    arp.target_ip, arp.sender_ip
                ),
            },
            EthPayload::Ipv4(ip) => match &ip.payload {
                IpPayload::Icmp(IcmpMessage::EchoReply) => {
                    format!("ICMP ping reply from {} to {}", ip.src, ip.dst)
                }
                IpPayload::Icmp(IcmpMessage::EchoRequest) => {
                    format!("ICMP ping request from {} to {}", ip.src, ip.dst)
                }
                IpPayload::Icmp(IcmpMessage::HostUnreachable(_)) => {
                    "ICMP destination unreachable".to_string()
                }
                IpPayload::Udp(udp) => format!(
                    "UDP packets from {}:{} to {}:{}",
                    ip.src, udp.src_port, ip.dst, udp.dst_port
                ),
                IpPayload::Tcp(tcp) => format!(
                    "TCP packets from {}:{} to {}:{}",
                    ip.src, tcp.src_port, ip.dst, tcp.dst_port
                ),
                IpPayload::Igmp(_) => format!("IGMP from {} to {}", ip.src, ip.dst),
                IpPayload::Other => format!("IPv4 packets from {} to {}", ip.src, ip.dst),
            },
            EthPayload::Other => format!("ethernet frames from {} to {}", self.src, self.dst),
        }
    }
}
