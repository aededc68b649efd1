// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Routing through transparent relays.
//!
//! Diverted sessions are rewritten in four places: toward the relay the
//! destination headers become the relay's, back out of the relay the
//! original headers are restored, and the response direction mirrors
//! both rewrites. The relay-to-destination leg runs on shifted
//! transport ports so the two legs of one session stay distinguishable
//! at the relay switch.

use std::sync::Arc;

use tracing::{debug, info, warn};

use flow::Flow;
use net::{
    Cookie, EthFrame, EthPayload, IpPayload, Link, PacketMatch, PortNo, ServiceClass, SwitchId,
    SwitchPort,
};
use relay::RelayEndpoint;
use transport::{Action, RuleSpec};

use crate::engine::{EngineError, InstallPlan, RoutingEngine};

impl RoutingEngine {
    /// Install both directions of a relayed session and divert the
    /// triggering packet to the relay.
    pub(crate) fn relayed_routing(
        self: &Arc<Self>,
        switch: SwitchId,
        in_port: PortNo,
        frame: &EthFrame,
        relay: &RelayEndpoint,
    ) {
        let Some(client) = self
            .devices
            .device_by_mac(frame.dst)
            .and_then(|device| device.location)
        else {
            info!("cannot relay yet, target client unknown, sending ARP probe");
            if let Some(ip) = frame.ipv4() {
                self.spawn_delayed_resolution(switch, in_port, ip.dst, frame.clone());
            }
            return;
        };
        // The relay pre-check guarantees an IPv4 UDP or TCP payload.
        let Some(ip) = frame.ipv4() else {
            return;
        };
        let (src_tp, dst_tp) = match &ip.payload {
            IpPayload::Udp(udp) => (udp.src_port, udp.dst_port),
            IpPayload::Tcp(tcp) => (tcp.src_port, tcp.dst_port),
            _ => return,
        };
        let class = ServiceClass::from_frame(frame);

        if self.switches.switch(relay.switch).is_none() {
            warn!("switch with relay not connected, falling back to plain routing");
            let description = format!("Unicast Route for {}", frame.describe());
            self.unicast_routing(
                switch,
                in_port,
                Some(client),
                class,
                false,
                &description,
                false,
                frame.clone(),
            );
            return;
        }

        let Some(to_relay_route) = self.cached_route(switch, relay.switch, class) else {
            warn!("no route from client to relay, falling back to flooding");
            self.controller_flood(Some((switch, in_port)), frame);
            return;
        };
        let Some(to_client_route) = self.cached_route(relay.switch, client.switch, class) else {
            warn!("no route from relay to target client, falling back to flooding");
            self.controller_flood(Some((switch, in_port)), frame);
            return;
        };

        let src_to_dst = PacketMatch::from_frame(frame);
        let dst_to_src = src_to_dst.reversed();
        // The relay's side of the session as seen on its switch.
        let rel_to_src = PacketMatch {
            eth_src: Some(relay.mac),
            ipv4_src: Some(relay.ip),
            src_port: Some(relay.port),
            eth_dst: Some(frame.src),
            ipv4_dst: Some(ip.src),
            dst_port: Some(src_tp),
            ..src_to_dst
        };
        let offsets = self.params().relay_port_offsets;
        let shifted_src = offsets.map_src(src_tp);
        let shifted_dst = offsets.map_dst(src_tp);
        let rel_to_dst = PacketMatch {
            src_port: Some(shifted_src),
            dst_port: Some(shifted_dst),
            ..rel_to_src
        };

        let mut path = RelayedPath {
            engine: self.as_ref(),
            src_to_dst,
            dst_to_src,
            rel_to_src,
            rel_to_dst,
            // entering the relay: disguise the destination as the relay
            actions_src_to_rel: vec![
                Action::SetEthDst(relay.mac),
                Action::SetIpv4Dst(relay.ip),
                Action::SetDstPort(relay.port),
            ],
            // relay answers the source: pretend to be the destination
            actions_rel_to_src: vec![
                Action::SetEthSrc(frame.dst),
                Action::SetIpv4Src(ip.dst),
                Action::SetSrcPort(dst_tp),
            ],
            // relay forwards onward: restore the original headers
            actions_rel_to_dst: vec![
                Action::SetEthSrc(frame.src),
                Action::SetIpv4Src(ip.src),
                Action::SetSrcPort(src_tp),
                Action::SetEthDst(frame.dst),
                Action::SetIpv4Dst(ip.dst),
                Action::SetDstPort(dst_tp),
            ],
            // destination answers: steer the reply back into the relay
            actions_dst_to_rel: vec![
                Action::SetEthSrc(frame.src),
                Action::SetIpv4Src(ip.src),
                Action::SetSrcPort(shifted_dst),
                Action::SetEthDst(relay.mac),
                Action::SetIpv4Dst(relay.ip),
                Action::SetDstPort(shifted_src),
            ],
            forward_cookie: self.flows.new_cookie(),
            response_cookie: self.flows.new_cookie(),
            plan: InstallPlan::new(),
            forward: (Vec::new(), Vec::new()),
            response: (Vec::new(), Vec::new()),
        };

        let ingress = SwitchPort::new(switch, in_port);
        if path
            .install(ingress, relay, client, &to_relay_route, &to_client_route)
            .is_err()
        {
            warn!("error while installing relayed route");
            path.plan.rollback(&self.switches);
            self.controller_flood(Some((switch, in_port)), frame);
            return;
        }

        // Deliver the triggering packet, already rewritten, straight to
        // the relay.
        let diverted = divert_to_relay(frame, relay);
        if let Err(err) = self.packet_out(relay.switch, relay.switch_port, &diverted) {
            warn!("failed to divert packet to relay: {err}");
        }

        let links: Vec<Link> = to_relay_route
            .iter()
            .chain(to_client_route.iter())
            .copied()
            .collect();
        let description = frame.describe();
        let forward_flow = Flow {
            cookie: path.forward_cookie,
            description: format!("Relayed route via {relay} for {description}"),
            switches: path.forward.0,
            rules: path.forward.1,
            links: links.clone(),
        };
        let response_flow = Flow {
            cookie: path.response_cookie,
            description: format!("Relayed response route via {relay} for {description}"),
            switches: path.response.0,
            rules: path.response.1,
            links,
        };
        for flow in [forward_flow, response_flow] {
            let cookie = flow.cookie;
            if let Err(err) = self.flows.add_flow(flow) {
                warn!("failed to register relayed flow {cookie}: {err}");
            }
        }
        debug!("successfully set relayed route");
    }
}

/// Rule bookkeeping for one relayed session, forward and response
/// directions kept apart.
struct RelayedPath<'a> {
    engine: &'a RoutingEngine,
    src_to_dst: PacketMatch,
    dst_to_src: PacketMatch,
    rel_to_src: PacketMatch,
    rel_to_dst: PacketMatch,
    actions_src_to_rel: Vec<Action>,
    actions_rel_to_src: Vec<Action>,
    actions_rel_to_dst: Vec<Action>,
    actions_dst_to_rel: Vec<Action>,
    forward_cookie: Cookie,
    response_cookie: Cookie,
    plan: InstallPlan,
    forward: (Vec<SwitchId>, Vec<RuleSpec>),
    response: (Vec<SwitchId>, Vec<RuleSpec>),
}

impl RelayedPath<'_> {
    fn install(
        &mut self,
        ingress: SwitchPort,
        relay: &RelayEndpoint,
        client: SwitchPort,
        to_relay_route: &[Link],
        to_client_route: &[Link],
    ) -> Result<(), EngineError> {
        // plain hops from the source toward the relay switch
        let mut hop = ingress;
        for link in to_relay_route {
            self.forward_rule(
                hop.switch,
                self.src_to_dst.with_in_port(hop.port),
                vec![Action::Output(link.src.port)],
            )?;
            self.response_rule(
                hop.switch,
                self.dst_to_src.with_in_port(link.src.port),
                vec![Action::Output(hop.port)],
            )?;
            hop = link.dst;
        }

        // the relay switch itself; `hop` now names the port the session
        // enters it on
        let mut divert = self.actions_src_to_rel.clone();
        divert.push(Action::Output(relay.switch_port));
        self.forward_rule(relay.switch, self.src_to_dst.with_in_port(hop.port), divert)?;
        let mut disguise = self.actions_rel_to_src.clone();
        disguise.push(Action::Output(hop.port));
        self.response_rule(
            relay.switch,
            self.rel_to_src.with_in_port(relay.switch_port),
            disguise,
        )?;

        // where relayed traffic leaves toward the destination
        let onward_port = to_client_route
            .first()
            .map_or(client.port, |link| link.src.port);
        let mut restore = self.actions_rel_to_dst.clone();
        restore.push(Action::Output(onward_port));
        self.forward_rule(
            relay.switch,
            self.rel_to_dst.with_in_port(relay.switch_port),
            restore,
        )?;
        let mut steer_back = self.actions_dst_to_rel.clone();
        steer_back.push(Action::Output(relay.switch_port));
        self.response_rule(
            relay.switch,
            self.dst_to_src.with_in_port(onward_port),
            steer_back,
        )?;

        // plain hops from the relay toward the destination
        let mut hop = to_client_route.first().map(|link| link.dst);
        for link in to_client_route.iter().skip(1) {
            if let Some(here) = hop {
                self.forward_rule(
                    here.switch,
                    self.src_to_dst.with_in_port(here.port),
                    vec![Action::Output(link.src.port)],
                )?;
                self.response_rule(
                    here.switch,
                    self.dst_to_src.with_in_port(link.src.port),
                    vec![Action::Output(here.port)],
                )?;
            }
            hop = Some(link.dst);
        }
        if let Some(here) = hop {
            if here.switch != relay.switch {
                self.forward_rule(
                    here.switch,
                    self.src_to_dst.with_in_port(here.port),
                    vec![Action::Output(client.port)],
                )?;
                self.response_rule(
                    here.switch,
                    self.dst_to_src.with_in_port(client.port),
                    vec![Action::Output(here.port)],
                )?;
            }
        }
        Ok(())
    }

    fn forward_rule(
        &mut self,
        switch: SwitchId,
        pattern: PacketMatch,
        actions: Vec<Action>,
    ) -> Result<(), EngineError> {
        let rule = self.engine.flows.rule(self.forward_cookie, pattern, actions);
        self.forward.0.push(switch);
        self.forward.1.push(rule.clone());
        self.plan.install(&self.engine.switches, switch, rule)
    }

    fn response_rule(
        &mut self,
        switch: SwitchId,
        pattern: PacketMatch,
        actions: Vec<Action>,
    ) -> Result<(), EngineError> {
        let rule = self.engine.flows.rule(self.response_cookie, pattern, actions);
        self.response.0.push(switch);
        self.response.1.push(rule.clone());
        self.plan.install(&self.engine.switches, switch, rule)
    }
}

/// The triggering packet with its destination rewritten to the relay.
fn divert_to_relay(frame: &EthFrame, relay: &RelayEndpoint) -> EthFrame {
    let mut out = frame.clone();
    out.dst = relay.mac;
    if let EthPayload::Ipv4(ip) = &mut out.payload {
        ip.dst = relay.ip;
        match &mut ip.payload {
            IpPayload::Udp(udp) => udp.dst_port = relay.port,
            IpPayload::Tcp(tcp) => tcp.dst_port = relay.port,
            IpPayload::Icmp(_) | IpPayload::Igmp(_) | IpPayload::Other => {}
        }
    }
    out
}
