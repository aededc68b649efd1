// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! End-to-end routing scenarios over an in-memory fabric.

use ofctl_routing as routing;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tracing_test::traced_test;

use flow::FlowRegistry;
use multicast::MulticastGroupTracker;
use net::{
    ArpOp, ArpPacket, EthFrame, EthPayload, GroupRecord, GroupRecordType, IcmpMessage,
    IgmpMessage, IpPayload, Ipv4Packet, Link, Mac, PortNo, SwitchId, SwitchPort, TcpSegment,
    Transport, UdpSegment,
};
use relay::{RelayEndpoint, RelayKey, RelayRegistry};
use routing::{DEFAULT_PROBE_MAC, EngineParams, RoutingEngine};
use transport::testing::{MockDevices, TestNetwork};
use transport::{Action, ExpiryReason, RuleRemoved, RuleSpec, SwitchMessage, TopologyEvent};

const MAC_A: Mac = Mac([2, 0, 0, 0, 0, 0xa]);
const MAC_B: Mac = Mac([2, 0, 0, 0, 0, 0xb]);
const MAC_RELAY: Mac = Mac([2, 0, 0, 0, 0, 0xff]);
const IP_A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const IP_B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const IP_RELAY: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 100);

struct Fixture {
    net: Arc<TestNetwork>,
    devices: Arc<MockDevices>,
    flows: Arc<FlowRegistry>,
    relays: Arc<RelayRegistry>,
    engine: Arc<RoutingEngine>,
}

/// An engine over a linear fabric of `n` switches. Port 1 of each
/// switch faces hosts, ports 2 and 3 form the chain.
fn fixture(n: u64) -> Fixture {
    let net = Arc::new(TestNetwork::linear(n));
    let devices = Arc::new(MockDevices::new());
    let flows = Arc::new(FlowRegistry::new());
    let relays = Arc::new(RelayRegistry::new());
    let groups = Arc::new(MulticastGroupTracker::new());
    let engine = RoutingEngine::new(
        EngineParams::default(),
        net.clone(),
        net.clone(),
        devices.clone(),
        flows.clone(),
        relays.clone(),
        groups,
    );
    Fixture {
        net,
        devices,
        flows,
        relays,
        engine,
    }
}

fn at(switch: u64, port: u32) -> SwitchPort {
    SwitchPort::new(SwitchId(switch), PortNo(port))
}

fn tcp_frame(src_port: u16, dst_port: u16) -> EthFrame {
    EthFrame {
        src: MAC_A,
        dst: MAC_B,
        vlan: None,
        payload: EthPayload::Ipv4(Ipv4Packet {
            src: IP_A,
            dst: IP_B,
            tos: 0,
            ttl: 64,
            payload: IpPayload::Tcp(TcpSegment { src_port, dst_port }),
        }),
    }
}

fn udp_frame(dst_mac: Mac, dst_ip: Ipv4Addr, src_port: u16, dst_port: u16) -> EthFrame {
    EthFrame {
        src: MAC_A,
        dst: dst_mac,
        vlan: None,
        payload: EthPayload::Ipv4(Ipv4Packet {
            src: IP_A,
            dst: dst_ip,
            tos: 0,
            ttl: 64,
            payload: IpPayload::Udp(UdpSegment { src_port, dst_port }),
        }),
    }
}

fn installs(sent: &[SwitchMessage]) -> Vec<RuleSpec> {
    sent.iter()
        .filter_map(|msg| match msg {
            SwitchMessage::InstallRule(rule) => Some(rule.clone()),
            _ => None,
        })
        .collect()
}

fn packet_outs(sent: &[SwitchMessage]) -> Vec<(EthFrame, Vec<Action>)> {
    sent.iter()
        .filter_map(|msg| match msg {
            SwitchMessage::PacketOut { frame, actions } => Some((frame.clone(), actions.clone())),
            _ => None,
        })
        .collect()
}

fn delete_count(sent: &[SwitchMessage]) -> usize {
    sent.iter()
        .filter(|msg| matches!(msg, SwitchMessage::DeleteRule(_)))
        .count()
}

/// Let spawned routing tasks make progress.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[test]
fn same_switch_tcp_gets_forward_and_reverse_rules() {
    let fx = fixture(1);
    fx.devices.add(MAC_A, IP_A, at(1, 1));
    fx.devices.add(MAC_B, IP_B, at(1, 3));

    fx.engine.handle_packet_in(SwitchId(1), PortNo(1), tcp_frame(5000, 80));

    let sent = fx.net.sent(SwitchId(1));
    let rules = installs(&sent);
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].pattern.in_port, Some(PortNo(1)));
    assert_eq!(rules[0].actions, vec![Action::Output(PortNo(3))]);
    // reverse rule pinned to the forward output port, same cookie
    assert_eq!(rules[1].pattern.in_port, Some(PortNo(3)));
    assert_eq!(rules[1].pattern.ipv4_src, Some(IP_B));
    assert_eq!(rules[1].actions, vec![Action::Output(PortNo(1))]);
    assert_eq!(rules[0].cookie, rules[1].cookie);

    // the triggering packet is still delivered
    let outs = packet_outs(&sent);
    assert_eq!(outs.len(), 1);
    assert_eq!(outs[0].1, vec![Action::Output(PortNo(3))]);

    let flows = fx.flows.flows();
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].rules.len(), 2);
}

#[test]
fn multi_switch_route_installs_first_hop_last() {
    let fx = fixture(3);
    fx.devices.add(MAC_A, IP_A, at(1, 1));
    fx.devices.add(MAC_B, IP_B, at(3, 1));

    fx.engine.handle_packet_in(SwitchId(1), PortNo(1), tcp_frame(5000, 80));

    // forward and reverse rule on every hop
    for sw in [1, 2, 3] {
        assert_eq!(installs(&fx.net.sent(SwitchId(sw))).len(), 2, "switch {sw}");
    }
    let s2 = installs(&fx.net.sent(SwitchId(2)));
    assert_eq!(s2[0].pattern.in_port, Some(PortNo(3)));
    assert_eq!(s2[0].actions, vec![Action::Output(PortNo(2))]);
    assert_eq!(s2[1].pattern.in_port, Some(PortNo(2)));
    assert_eq!(s2[1].actions, vec![Action::Output(PortNo(3))]);

    // delivery happens at the last hop only
    assert_eq!(packet_outs(&fx.net.sent(SwitchId(1))).len(), 0);
    let outs = packet_outs(&fx.net.sent(SwitchId(3)));
    assert_eq!(outs.len(), 1);
    assert_eq!(outs[0].1, vec![Action::Output(PortNo(1))]);

    // registration order shows the ingress switch was programmed last
    let flows = fx.flows.flows();
    assert_eq!(flows.len(), 1);
    assert_eq!(
        flows[0].switches,
        [2, 2, 3, 3, 1, 1].map(SwitchId).to_vec()
    );
    assert_eq!(flows[0].links.len(), 2);
}

#[test]
fn udp_unicast_has_no_reverse_rule() {
    let fx = fixture(1);
    fx.devices.add(MAC_A, IP_A, at(1, 1));
    fx.devices.add(MAC_B, IP_B, at(1, 3));

    fx.engine
        .handle_packet_in(SwitchId(1), PortNo(1), udp_frame(MAC_B, IP_B, 5000, 53));

    let rules = installs(&fx.net.sent(SwitchId(1)));
    assert_eq!(rules.len(), 1);
    assert_eq!(fx.flows.flows()[0].rules.len(), 1);
}

#[test]
fn unicast_arp_is_delivered_without_a_flow() {
    let fx = fixture(2);
    fx.devices.add(MAC_B, IP_B, at(2, 1));

    let frame = EthFrame {
        src: MAC_A,
        dst: MAC_B,
        vlan: None,
        payload: EthPayload::Arp(ArpPacket {
            op: ArpOp::Reply,
            sender_mac: MAC_A,
            sender_ip: IP_A,
            target_mac: MAC_B,
            target_ip: IP_B,
        }),
    };
    fx.engine.handle_packet_in(SwitchId(1), PortNo(1), frame);

    assert!(installs(&fx.net.sent(SwitchId(1))).is_empty());
    assert!(installs(&fx.net.sent(SwitchId(2))).is_empty());
    let outs = packet_outs(&fx.net.sent(SwitchId(2)));
    assert_eq!(outs.len(), 1);
    assert_eq!(outs[0].1, vec![Action::Output(PortNo(1))]);
    assert!(fx.flows.flows().is_empty());
}

#[test]
fn broadcast_floods_every_edge_port_except_origin() {
    let fx = fixture(3);
    let frame = udp_frame(Mac::BROADCAST, Ipv4Addr::BROADCAST, 68, 67);
    fx.engine.handle_packet_in(SwitchId(1), PortNo(1), frame);

    // switch 1: port 1 is the origin, port 2 is fabric, port 3 is free
    let out1 = packet_outs(&fx.net.sent(SwitchId(1)));
    assert_eq!(out1.len(), 1);
    assert_eq!(out1[0].1, vec![Action::Output(PortNo(3))]);
    // switch 2: both chain ports are fabric
    assert_eq!(packet_outs(&fx.net.sent(SwitchId(2))).len(), 1);
    // switch 3: port 3 is fabric, ports 1 and 2 are free
    assert_eq!(packet_outs(&fx.net.sent(SwitchId(3))).len(), 2);
    assert!(fx.flows.flows().is_empty());
}

#[test]
#[traced_test]
fn packets_on_fabric_ports_are_dropped() {
    let fx = fixture(2);
    fx.devices.add(MAC_B, IP_B, at(2, 1));

    fx.engine.handle_packet_in(SwitchId(1), PortNo(2), tcp_frame(5000, 80));

    assert!(fx.net.sent(SwitchId(1)).is_empty());
    assert!(fx.net.sent(SwitchId(2)).is_empty());
    assert!(fx.flows.flows().is_empty());
    assert!(logs_contain("packet came in on a fabric port"));
}

#[test]
fn unreachable_destination_triggers_icmp_host_unreachable() {
    let fx = fixture(2);
    fx.devices.add(MAC_A, IP_A, at(1, 1));
    // switch 9 exists but has no links into the fabric
    fx.net.add_switch(SwitchId(9), &[PortNo(1)]);
    fx.devices.add(MAC_B, IP_B, at(9, 1));

    let original = tcp_frame(5000, 80);
    fx.engine
        .handle_packet_in(SwitchId(1), PortNo(1), original.clone());

    let outs = packet_outs(&fx.net.sent(SwitchId(1)));
    assert_eq!(outs.len(), 1);
    let (reply, actions) = &outs[0];
    assert_eq!(*actions, vec![Action::Output(PortNo(1))]);
    assert_eq!(reply.dst, MAC_A);
    assert_eq!(reply.src, Mac::ZERO);
    let ip = reply.ipv4().unwrap();
    assert_eq!(ip.dst, IP_A);
    assert_eq!(ip.src, Ipv4Addr::UNSPECIFIED);
    match &ip.payload {
        IpPayload::Icmp(IcmpMessage::HostUnreachable(carried)) => {
            assert_eq!(**carried, original);
        }
        other => panic!("expected ICMP host unreachable, got {other:?}"),
    }
    assert!(fx.flows.flows().is_empty());
}

#[test]
fn failed_install_rolls_back_and_floods() {
    let fx = fixture(3);
    fx.devices.add(MAC_A, IP_A, at(1, 1));
    fx.devices.add(MAC_B, IP_B, at(3, 1));
    fx.net.mock(SwitchId(3)).set_fail_writes(true);

    fx.engine.handle_packet_in(SwitchId(1), PortNo(1), tcp_frame(5000, 80));

    // switch 2 was programmed first, then cleaned up again
    let s2 = fx.net.sent(SwitchId(2));
    assert_eq!(installs(&s2).len(), 2);
    assert_eq!(delete_count(&s2), 2);
    // the ingress switch never got its rules, only the fallback flood
    let s1 = fx.net.sent(SwitchId(1));
    assert!(installs(&s1).is_empty());
    assert!(!packet_outs(&s1).is_empty());
    assert!(fx.flows.flows().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unknown_destination_probes_then_reports_unreachable() {
    let fx = fixture(2);
    fx.devices.add(MAC_A, IP_A, at(1, 1));
    // MAC_B / IP_B is nowhere to be found

    fx.engine.handle_packet_in(SwitchId(1), PortNo(1), tcp_frame(5000, 80));
    settle().await;

    // the probe is flooded from the dedicated probe MAC
    let probe = packet_outs(&fx.net.sent(SwitchId(2)))
        .into_iter()
        .find(|(frame, _)| frame.src == DEFAULT_PROBE_MAC)
        .map(|(frame, _)| frame)
        .expect("no ARP probe flooded");
    match &probe.payload {
        EthPayload::Arp(arp) => {
            assert_eq!(arp.op, ArpOp::Request);
            assert_eq!(arp.target_ip, IP_B);
            assert_eq!(arp.sender_ip, Ipv4Addr::new(10, 0, 0, 254));
        }
        other => panic!("expected ARP probe, got {other:?}"),
    }

    // nobody answers
    tokio::time::sleep(Duration::from_secs(6)).await;
    settle().await;

    let icmp = packet_outs(&fx.net.sent(SwitchId(1)))
        .into_iter()
        .find(|(frame, _)| {
            matches!(
                frame.ipv4().map(|ip| &ip.payload),
                Some(IpPayload::Icmp(IcmpMessage::HostUnreachable(_)))
            )
        });
    assert!(icmp.is_some(), "expected ICMP host unreachable");
    assert!(fx.flows.flows().is_empty());
}

#[tokio::test(start_paused = true)]
async fn arp_reply_wakes_delayed_routing() {
    let fx = fixture(2);
    fx.devices.add(MAC_A, IP_A, at(1, 1));

    fx.engine.handle_packet_in(SwitchId(1), PortNo(1), tcp_frame(5000, 80));
    settle().await;
    assert!(installs(&fx.net.sent(SwitchId(1))).is_empty());

    // the host shows up and answers the probe; drop the probe flood
    // from switch 2's log so only post-reply traffic is counted
    fx.net.mock(SwitchId(2)).clear_sent();
    fx.devices.add(MAC_B, IP_B, at(2, 1));
    let reply = EthFrame {
        src: MAC_B,
        dst: DEFAULT_PROBE_MAC,
        vlan: None,
        payload: EthPayload::Arp(ArpPacket {
            op: ArpOp::Reply,
            sender_mac: MAC_B,
            sender_ip: IP_B,
            target_mac: DEFAULT_PROBE_MAC,
            target_ip: Ipv4Addr::new(10, 0, 0, 254),
        }),
    };
    fx.engine.handle_packet_in(SwitchId(2), PortNo(1), reply);
    settle().await;

    // the parked packet was routed after all
    assert_eq!(installs(&fx.net.sent(SwitchId(1))).len(), 2);
    assert_eq!(installs(&fx.net.sent(SwitchId(2))).len(), 2);
    assert_eq!(packet_outs(&fx.net.sent(SwitchId(2))).len(), 1);
    assert_eq!(fx.flows.flows().len(), 1);
}

#[test]
fn multicast_tree_reaches_joined_member() {
    let fx = fixture(3);
    let group = Ipv4Addr::new(239, 1, 2, 3);
    let member_mac = MAC_B;
    let member_ip = Ipv4Addr::new(10, 0, 0, 3);
    fx.devices.add(MAC_A, IP_A, at(1, 1));
    fx.devices.add(member_mac, member_ip, at(3, 1));

    // the member joins via an IGMP report
    let report = EthFrame {
        src: member_mac,
        dst: Mac([0x01, 0x00, 0x5e, 0, 0, 0x16]),
        vlan: None,
        payload: EthPayload::Ipv4(Ipv4Packet {
            src: member_ip,
            dst: Ipv4Addr::new(224, 0, 0, 22),
            tos: 0,
            ttl: 1,
            payload: IpPayload::Igmp(IgmpMessage::MembershipReport(vec![GroupRecord {
                group,
                record_type: GroupRecordType::ModeIsExclude,
                sources: vec![],
            }])),
        }),
    };
    fx.engine.handle_packet_in(SwitchId(3), PortNo(1), report);
    assert!(fx.flows.flows().is_empty());

    // a source sends to the group
    let data = udp_frame(Mac([0x01, 0x00, 0x5e, 0x01, 0x02, 0x03]), group, 5000, 6000);
    fx.engine.handle_packet_in(SwitchId(1), PortNo(1), data);

    let s1 = installs(&fx.net.sent(SwitchId(1)));
    assert_eq!(s1.len(), 1);
    assert_eq!(s1[0].pattern.in_port, Some(PortNo(1)));
    assert_eq!(s1[0].actions, vec![Action::Output(PortNo(2))]);
    let s3 = installs(&fx.net.sent(SwitchId(3)));
    assert_eq!(s3.len(), 1);
    assert_eq!(s3[0].actions, vec![Action::Output(PortNo(1))]);
    // delivery at the member's port
    assert_eq!(packet_outs(&fx.net.sent(SwitchId(3))).len(), 1);

    let flows = fx.flows.flows();
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].rules.len(), 3);
    assert_eq!(flows[0].links.len(), 2);
}

#[test]
fn multicast_without_members_is_dropped() {
    let fx = fixture(2);
    let data = udp_frame(
        Mac([0x01, 0x00, 0x5e, 0x01, 0x02, 0x03]),
        Ipv4Addr::new(239, 1, 2, 3),
        5000,
        6000,
    );
    fx.engine.handle_packet_in(SwitchId(1), PortNo(1), data);
    assert!(fx.net.sent(SwitchId(1)).is_empty());
    assert!(fx.net.sent(SwitchId(2)).is_empty());
}

#[test]
fn relayed_session_rewrites_both_directions() {
    let fx = fixture(3);
    fx.devices.add(MAC_A, IP_A, at(1, 1));
    fx.devices.add(MAC_B, IP_B, at(3, 1));
    let endpoint = RelayEndpoint {
        ip: IP_RELAY,
        port: 7777,
        mac: MAC_RELAY,
        switch: SwitchId(2),
        switch_port: PortNo(1),
    };
    let key = RelayKey::new(IP_B, 80);
    fx.relays.add(Transport::Tcp, key, endpoint);
    assert!(fx.relays.set_filter_enabled(Transport::Tcp, key, true).unwrap());

    fx.engine.handle_packet_in(SwitchId(1), PortNo(1), tcp_frame(5000, 80));

    // the relay switch carries all four rewrite rules
    let s2 = installs(&fx.net.sent(SwitchId(2)));
    assert_eq!(s2.len(), 4);
    let divert = s2
        .iter()
        .find(|r| r.actions.contains(&Action::SetDstPort(7777)))
        .expect("no divert rule");
    assert_eq!(divert.pattern.in_port, Some(PortNo(3)));
    assert!(divert.actions.contains(&Action::SetEthDst(MAC_RELAY)));
    assert_eq!(divert.actions.last(), Some(&Action::Output(PortNo(1))));
    // the onward leg runs on shifted ports
    let restore = s2
        .iter()
        .find(|r| r.pattern.src_port == Some(5000 - 14))
        .expect("no restore rule");
    assert_eq!(restore.pattern.dst_port, Some(5000 - 13));
    assert!(restore.actions.contains(&Action::SetEthDst(MAC_B)));
    assert!(restore.actions.contains(&Action::SetSrcPort(5000)));

    // plain hops before and after the relay
    assert_eq!(installs(&fx.net.sent(SwitchId(1))).len(), 2);
    assert_eq!(installs(&fx.net.sent(SwitchId(3))).len(), 2);

    // the triggering packet goes to the relay, rewritten
    let outs = packet_outs(&fx.net.sent(SwitchId(2)));
    assert_eq!(outs.len(), 1);
    let (diverted, actions) = &outs[0];
    assert_eq!(*actions, vec![Action::Output(PortNo(1))]);
    assert_eq!(diverted.dst, MAC_RELAY);
    let ip = diverted.ipv4().unwrap();
    assert_eq!(ip.dst, IP_RELAY);
    assert!(matches!(
        &ip.payload,
        IpPayload::Tcp(TcpSegment { dst_port: 7777, .. })
    ));

    // forward and response directions are separate flows
    let flows = fx.flows.flows();
    assert_eq!(flows.len(), 2);
    assert_ne!(flows[0].cookie, flows[1].cookie);
    for flow in &flows {
        assert_eq!(flow.rules.len(), 4);
        assert!(flow.description.starts_with("Relayed"));
    }
}

#[test]
fn disabled_relay_is_ignored() {
    let fx = fixture(3);
    fx.devices.add(MAC_A, IP_A, at(1, 1));
    fx.devices.add(MAC_B, IP_B, at(3, 1));
    let endpoint = RelayEndpoint {
        ip: IP_RELAY,
        port: 7777,
        mac: MAC_RELAY,
        switch: SwitchId(2),
        switch_port: PortNo(1),
    };
    fx.relays.add(Transport::Tcp, RelayKey::new(IP_B, 80), endpoint);
    // never enabled: plain unicast routing applies

    fx.engine.handle_packet_in(SwitchId(1), PortNo(1), tcp_frame(5000, 80));

    let flows = fx.flows.flows();
    assert_eq!(flows.len(), 1);
    assert!(flows[0].description.starts_with("Unicast"));
}

#[test]
fn link_failure_tears_down_flows_crossing_it() {
    let fx = fixture(3);
    fx.devices.add(MAC_A, IP_A, at(1, 1));
    fx.devices.add(MAC_B, IP_B, at(3, 1));
    fx.engine.handle_packet_in(SwitchId(1), PortNo(1), tcp_frame(5000, 80));
    assert_eq!(fx.flows.flows().len(), 1);

    let link = Link::new(at(1, 2), at(2, 3));
    fx.engine.handle_topology_event(&TopologyEvent::LinkDown(link));

    assert!(fx.flows.flows().is_empty());
    assert!(delete_count(&fx.net.sent(SwitchId(2))) > 0);
}

#[test]
fn idle_expiry_of_one_rule_removes_the_whole_flow() {
    let fx = fixture(3);
    fx.devices.add(MAC_A, IP_A, at(1, 1));
    fx.devices.add(MAC_B, IP_B, at(3, 1));
    fx.engine.handle_packet_in(SwitchId(1), PortNo(1), tcp_frame(5000, 80));
    let flow = fx.flows.flows().remove(0);

    let removed = fx.engine.handle_rule_expired(&RuleRemoved {
        switch: SwitchId(2),
        cookie: flow.cookie,
        pattern: flow.rules[0].pattern,
        reason: ExpiryReason::IdleTimeout,
    });

    assert!(removed);
    assert!(fx.flows.flows().is_empty());
    // the other switches were told to drop their rules
    assert!(delete_count(&fx.net.sent(SwitchId(1))) > 0);
    assert!(delete_count(&fx.net.sent(SwitchId(3))) > 0);
    // the reporting switch already dropped its own rule
    assert_eq!(delete_count(&fx.net.sent(SwitchId(2))), 0);
}
