// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Value types shared across the controller: switch and port identities,
//! links, MAC addresses, flow cookies, the structured packet model and
//! match criteria.

#![deny(unsafe_code, clippy::all, clippy::pedantic)]

pub mod cookie;
pub mod flowmatch;
pub mod link;
pub mod mac;
pub mod packet;
pub mod service;
pub mod switch;

pub use cookie::Cookie;
pub use flowmatch::PacketMatch;
pub use link::{Link, SwitchPair};
pub use mac::Mac;
pub use packet::{
    ArpOp, ArpPacket, EthFrame, EthPayload, GroupRecord, GroupRecordType, IcmpMessage,
    IgmpMessage, IpPayload, Ipv4Packet, TcpSegment, Transport, UdpSegment,
};
pub use service::ServiceClass;
pub use switch::{PortNo, SwitchId, SwitchPort};
