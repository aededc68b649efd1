// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Match patterns for forwarding rules.
//!
//! A [`PacketMatch`] is a set of optional header fields; an unset field
//! is a wildcard. Rules pushed to switches carry one of these.

use std::fmt::Display;
use std::net::Ipv4Addr;

use crate::mac::Mac;
use crate::packet::{EthFrame, EthPayload, IpPayload, Transport};
use crate::switch::PortNo;

/// A header match; `None` fields are wildcards.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct PacketMatch {
    pub in_port: Option<PortNo>,
    pub eth_src: Option<Mac>,
    pub eth_dst: Option<Mac>,
    pub ipv4_src: Option<Ipv4Addr>,
    pub ipv4_dst: Option<Ipv4Addr>,
    pub transport: Option<Transport>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

impl PacketMatch {
    /// The all-wildcard match.
    #[must_use]
    pub fn any() -> PacketMatch {
        PacketMatch::default()
    }

    /// Build a match selecting the flow a frame belongs to.
    ///
    /// Ethernet addresses always match; IPv4 addresses and transport
    /// ports are added when the frame carries them.
    #[must_use]
    pub fn from_frame(frame: &EthFrame) -> PacketMatch {
        let mut m = PacketMatch {
            eth_src: Some(frame.src),
            eth_dst: Some(frame.dst),
            ..PacketMatch::default()
        };
        if let EthPayload::Ipv4(ip) = &frame.payload {
            m.ipv4_src = Some(ip.src);
            m.ipv4_dst = Some(ip.dst);
            match &ip.payload {
                IpPayload::Udp(udp) => {
                    m.transport = Some(Transport::Udp);
                    m.src_port = Some(udp.src_port);
                    m.dst_port = Some(udp.dst_port);
                }
                IpPayload::Tcp(tcp) => {
                    m.transport = Some(Transport::Tcp);
                    m.src_port = Some(tcp.src_port);
                    m.dst_port = Some(tcp.dst_port);
                }
                IpPayload::Icmp(_) | IpPayload::Igmp(_) | IpPayload::Other => {}
            }
        }
        m
    }

    /// The same match with every src/dst field swapped. Used for the
    /// return direction of a bidirectional flow.
    #[must_use]
    pub fn reversed(&self) -> PacketMatch {
        PacketMatch {
            in_port: None,
            eth_src: self.eth_dst,
            eth_dst: self.eth_src,
            ipv4_src: self.ipv4_dst,
            ipv4_dst: self.ipv4_src,
            transport: self.transport,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }

    /// The same match, pinned to an ingress port.
    #[must_use]
    pub fn with_in_port(mut self, port: PortNo) -> PacketMatch {
        self.in_port = Some(port);
        self
    }
}

impl Display for PacketMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        let mut field = |f: &mut std::fmt::Formatter<'_>, s: String| -> std::fmt::Result {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            write!(f, "{s}")
        };
        if let Some(p) = self.in_port {
            field(f, format!("in_port={p}"))?;
        }
        if let Some(m) = self.eth_src {
            field(f, format!("eth_src={m}"))?;
        }
        if let Some(m) = self.eth_dst {
            field(f, format!("eth_dst={m}"))?;
        }
        if let Some(ip) = self.ipv4_src {
            field(f, format!("ipv4_src={ip}"))?;
        }
        if let Some(ip) = self.ipv4_dst {
            field(f, format!("ipv4_dst={ip}"))?;
        }
        if let Some(t) = self.transport {
            field(f, format!("proto={t}"))?;
        }
        if let Some(p) = self.src_port {
            field(f, format!("src_port={p}"))?;
        }
        if let Some(p) = self.dst_port {
            field(f, format!("dst_port={p}"))?;
        }
        if first {
            write!(f, "any")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Ipv4Packet, UdpSegment};

    fn udp_frame() -> EthFrame {
        EthFrame {
            src: Mac([2, 0, 0, 0, 0, 1]),
            dst: Mac([2, 0, 0, 0, 0, 2]),
            vlan: None,
            payload: EthPayload::Ipv4(Ipv4Packet {
                src: Ipv4Addr::new(10, 0, 0, 1),
                dst: Ipv4Addr::new(10, 0, 0, 2),
                tos: 0,
                ttl: 64,
                payload: IpPayload::Udp(UdpSegment {
                    src_port: 5000,
                    dst_port: 53,
                }),
            }),
        }
    }

    #[test]
    fn from_frame_fills_l3_and_l4() {
        let m = PacketMatch::from_frame(&udp_frame());
        assert_eq!(m.eth_src, Some(Mac([2, 0, 0, 0, 0, 1])));
        assert_eq!(m.ipv4_dst, Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(m.transport, Some(Transport::Udp));
        assert_eq!(m.src_port, Some(5000));
        assert_eq!(m.dst_port, Some(53));
        assert_eq!(m.in_port, None);
    }

    #[test]
    fn reversed_swaps_and_drops_in_port() {
        let m = PacketMatch::from_frame(&udp_frame()).with_in_port(PortNo(7));
        let r = m.reversed();
        assert_eq!(r.eth_src, m.eth_dst);
        assert_eq!(r.ipv4_src, m.ipv4_dst);
        assert_eq!(r.src_port, Some(53));
        assert_eq!(r.dst_port, Some(5000));
        assert_eq!(r.in_port, None);
        assert_eq!(r.reversed().with_in_port(PortNo(7)), m);
    }

    #[test]
    fn display_any() {
        assert_eq!(PacketMatch::any().to_string(), "any");
    }
}
