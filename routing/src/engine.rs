// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The routing engine.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use derive_builder::Builder;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use flow::{Flow, FlowRegistry};
use multicast::MulticastGroupTracker;
use net::{
    ArpOp, ArpPacket, Cookie, EthFrame, EthPayload, IcmpMessage, IgmpMessage, IpPayload,
    Ipv4Packet, Link, Mac, PacketMatch, PortNo, ServiceClass, SwitchId, SwitchPair, SwitchPort,
    Transport,
};
use relay::{RelayEndpoint, RelayRegistry};
use transport::{
    Action, DeleteSpec, DeviceDirectory, RuleRemoved, RuleSpec, SwitchMessage, SwitchRegistry,
    TopologyEvent, TopologyView, TransportError,
};

use crate::cache::RouteCache;
use crate::cost::{CostFunction, CostFunctionMap};
use crate::sssp::shortest_path;
use crate::waiters::PendingResolutions;

/// Source MAC of the ARP probes sent to locate unknown hosts. Replies
/// addressed to it are consumed by the engine, never routed.
pub const DEFAULT_PROBE_MAC: Mac = Mac([0x02, 0x0f, 0x10, 0x0d, 0x11, 0x7e]);
/// How long to wait for a host to answer an ARP probe.
pub const DEFAULT_ARP_WAIT: Duration = Duration::from_secs(5);

/// Port arithmetic applied to the relay-to-destination leg so the two
/// relayed directions of one session stay distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortOffsets {
    pub src: i32,
    pub dst: i32,
}

impl Default for PortOffsets {
    fn default() -> Self {
        PortOffsets { src: -14, dst: -13 }
    }
}

impl PortOffsets {
    #[must_use]
    pub fn map_src(self, port: u16) -> u16 {
        offset_port(port, self.src)
    }

    #[must_use]
    pub fn map_dst(self, port: u16) -> u16 {
        offset_port(port, self.dst)
    }
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn offset_port(port: u16, offset: i32) -> u16 {
    (i32::from(port) + offset).rem_euclid(65536) as u16
}

/// Engine configuration. N.B. we derive a builder type
/// `EngineParamsBuilder` and provide defaults for each field.
#[derive(Builder, Debug)]
pub struct EngineParams {
    #[builder(setter(into), default = DEFAULT_PROBE_MAC)]
    pub probe_mac: Mac,

    #[builder(setter(into), default = DEFAULT_ARP_WAIT)]
    pub arp_wait: Duration,

    #[builder(setter(into), default)]
    pub relay_port_offsets: PortOffsets,
}

impl Default for EngineParams {
    fn default() -> Self {
        EngineParams {
            probe_mac: DEFAULT_PROBE_MAC,
            arp_wait: DEFAULT_ARP_WAIT,
            relay_port_offsets: PortOffsets::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("switch {0} is not connected")]
    UnknownSwitch(SwitchId),
}

/// Turns packet-in events into installed paths.
///
/// The engine owns no switch state of its own; it talks to the fabric
/// through the transport seams and records what it installed in the
/// flow registry.
pub struct RoutingEngine {
    params: EngineParams,
    pub(crate) switches: Arc<dyn SwitchRegistry>,
    pub(crate) topology: Arc<dyn TopologyView>,
    pub(crate) devices: Arc<dyn DeviceDirectory>,
    pub(crate) flows: Arc<FlowRegistry>,
    pub(crate) relays: Arc<RelayRegistry>,
    pub(crate) multicast: Arc<MulticastGroupTracker>,
    cost_functions: CostFunctionMap,
    default_metric: Mutex<ServiceClass>,
    pub(crate) cache: RouteCache,
    waiters: PendingResolutions,
}

/// One hop of a unicast path: where the traffic enters and leaves a
/// switch.
#[derive(Debug, Clone, Copy)]
struct Hop {
    switch: SwitchId,
    in_port: PortNo,
    out_port: PortNo,
}

impl RoutingEngine {
    #[must_use]
    pub fn new(
        params: EngineParams,
        switches: Arc<dyn SwitchRegistry>,
        topology: Arc<dyn TopologyView>,
        devices: Arc<dyn DeviceDirectory>,
        flows: Arc<FlowRegistry>,
        relays: Arc<RelayRegistry>,
        multicast: Arc<MulticastGroupTracker>,
    ) -> Arc<RoutingEngine> {
        Arc::new(RoutingEngine {
            params,
            switches,
            topology,
            devices,
            flows,
            relays,
            multicast,
            cost_functions: CostFunctionMap::new(),
            default_metric: Mutex::new(ServiceClass::Constant),
            cache: RouteCache::new(),
            waiters: PendingResolutions::default(),
        })
    }

    /// Process one packet-in event.
    pub fn handle_packet_in(self: &Arc<Self>, switch: SwitchId, in_port: PortNo, frame: EthFrame) {
        debug!("packet in at {switch} port {in_port}: {}", frame.describe());

        // Packets arriving on fabric ports are stray; routed traffic
        // never reaches the controller mid-path.
        if self.is_fabric_ingress(SwitchPort::new(switch, in_port)) {
            warn!("packet came in on a fabric port, dropping");
            return;
        }

        if let Some(relay) = self.relay_for(&frame) {
            debug!("routing via relay");
            self.relayed_routing(switch, in_port, &frame, &relay);
            return;
        }
        self.route(switch, in_port, frame);
    }

    fn relay_for(&self, frame: &EthFrame) -> Option<RelayEndpoint> {
        let ip = frame.ipv4()?;
        let (transport, dst_port) = match &ip.payload {
            IpPayload::Udp(udp) => (Transport::Udp, udp.dst_port),
            IpPayload::Tcp(tcp) => (Transport::Tcp, tcp.dst_port),
            _ => return None,
        };
        if !self.relays.relaying_enabled(transport) {
            return None;
        }
        self.relays.active_relay(transport, ip.dst, dst_port)
    }

    fn route(self: &Arc<Self>, switch: SwitchId, in_port: PortNo, frame: EthFrame) {
        if frame.dst.is_broadcast() {
            debug!("broadcast packet found");
            self.controller_flood(Some((switch, in_port)), &frame);
            return;
        }

        if frame.dst.is_multicast() {
            match frame.ipv4() {
                Some(ip) => match &ip.payload {
                    IpPayload::Igmp(IgmpMessage::MembershipReport(records)) => {
                        self.multicast.handle_membership_report(ip.src, records);
                    }
                    IpPayload::Igmp(IgmpMessage::MembershipQuery { .. }) => {
                        trace!("ignoring membership query");
                    }
                    _ => self.multicast_routing(switch, in_port, &frame),
                },
                None => debug!("throwing away non-IPv4 multicast packet"),
            }
            return;
        }

        // An ARP reply addressed to the probe MAC answers one of our
        // own searches.
        if let Some(arp) = frame.arp() {
            if frame.dst == self.params.probe_mac {
                debug!(
                    "found client for {} after ARP search, waking waiters",
                    arp.sender_ip
                );
                self.waiters.wake(arp.sender_ip);
                return;
            }
        }

        let attachment = self
            .devices
            .device_by_mac(frame.dst)
            .and_then(|device| device.location);
        let reverse = matches!(
            frame.ipv4().map(|ip| &ip.payload),
            Some(IpPayload::Tcp(_))
        );
        let description = format!("Unicast Route for {}", frame.describe());
        let class = ServiceClass::from_frame(&frame);
        self.unicast_routing(
            switch,
            in_port,
            attachment,
            class,
            false,
            &description,
            reverse,
            frame,
        );
    }

    /// Install a unicast path toward `attachment` and deliver the
    /// triggering packet.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn unicast_routing(
        self: &Arc<Self>,
        switch: SwitchId,
        in_port: PortNo,
        attachment: Option<SwitchPort>,
        class: ServiceClass,
        suppress_packet_out: bool,
        description: &str,
        reverse: bool,
        frame: EthFrame,
    ) {
        trace!("unicast target client attachment point: {attachment:?}");
        let Some(attachment) = attachment else {
            // Only worth probing if we actually want to deliver a packet.
            if suppress_packet_out {
                return;
            }
            let Some(target) = frame.ipv4().map(|ip| ip.dst) else {
                // The ARP method needs an IP to probe for.
                self.controller_flood(None, &frame);
                return;
            };
            debug!("unicast client unknown, sending ARP probe for delayed routing");
            self.spawn_delayed_resolution(switch, in_port, target, frame);
            return;
        };

        // ARP packets are rare enough to deliver without a flow.
        if frame.arp().is_some() {
            debug!("unicast ARP packet detected, delivering instantaneously");
            if let Err(err) = self.packet_out(attachment.switch, attachment.port, &frame) {
                warn!("failed to deliver ARP packet: {err}");
            }
            return;
        }

        let pattern = PacketMatch::from_frame(&frame);
        let reverse_pattern = reverse.then(|| pattern.reversed());
        let cookie = self.flows.new_cookie();
        trace!("cookie for this transaction is {cookie}");

        let (hops, route) = if attachment.switch == switch {
            trace!("clients on same switch");
            (
                vec![Hop {
                    switch,
                    in_port,
                    out_port: attachment.port,
                }],
                Vec::new(),
            )
        } else {
            trace!("clients on different switches");
            let Some(route) = self.cached_route(switch, attachment.switch, class) else {
                warn!("non-connected client in network");
                self.send_icmp_host_unreachable(switch, in_port, &frame);
                return;
            };
            (hops_along(&route, switch, in_port, attachment.port), route)
        };

        let mut plan = InstallPlan::new();
        let mut flow_switches = Vec::new();
        let mut flow_rules = Vec::new();
        // The first hop's rule goes in last so traffic only starts
        // flowing once the downstream rules exist.
        for hop in hops.iter().skip(1).chain(hops.first()) {
            let rule = self.flows.rule(
                cookie,
                pattern.with_in_port(hop.in_port),
                vec![Action::Output(hop.out_port)],
            );
            let mut batch = vec![rule.clone()];
            if let Some(reverse_pattern) = reverse_pattern {
                batch.push(self.flows.rule(
                    cookie,
                    reverse_pattern.with_in_port(hop.out_port),
                    vec![Action::Output(hop.in_port)],
                ));
            }
            for rule in batch {
                flow_switches.push(hop.switch);
                flow_rules.push(rule.clone());
                if plan.install(&self.switches, hop.switch, rule).is_err() {
                    warn!("error while installing unicast route");
                    plan.rollback(&self.switches);
                    self.controller_flood(Some((switch, in_port)), &frame);
                    return;
                }
            }
        }

        if !suppress_packet_out {
            // Deliver the triggering packet directly at the last hop.
            if let Err(err) = self.packet_out(attachment.switch, attachment.port, &frame) {
                warn!("failed to deliver packet at last hop: {err}");
            }
        }

        let flow = Flow {
            cookie,
            description: description.to_string(),
            switches: flow_switches,
            rules: flow_rules,
            links: route,
        };
        if let Err(err) = self.flows.add_flow(flow) {
            warn!("failed to register flow {cookie}: {err}");
        }
        debug!("successfully set unicast route");
    }

    /// Flood a packet out of every non-fabric port in the network.
    ///
    /// `origin` names the ingress (switch, port), excluded from the
    /// flood. One-shot; no flow is registered.
    pub(crate) fn controller_flood(&self, origin: Option<(SwitchId, PortNo)>, frame: &EthFrame) {
        debug!("falling back to broadcasting packet");
        for sw in self.switches.switches() {
            let Some(handle) = self.switches.switch(sw) else {
                continue;
            };
            for port in self.topology.ports(sw) {
                if port == PortNo::LOCAL
                    || origin == Some((sw, port))
                    || self.topology.is_fabric_port(SwitchPort::new(sw, port))
                {
                    continue;
                }
                let msg = SwitchMessage::PacketOut {
                    frame: frame.clone(),
                    actions: vec![Action::Output(port)],
                };
                if let Err(err) = handle.send(msg) {
                    warn!("flood out of {sw}/{port} failed: {err}");
                }
            }
        }
    }

    /// Tell the sender its destination cannot be reached.
    pub(crate) fn send_icmp_host_unreachable(
        &self,
        switch: SwitchId,
        in_port: PortNo,
        original: &EthFrame,
    ) {
        let Some(ip) = original.ipv4() else {
            return;
        };
        debug!("sending an ICMP host unreachable to {}", ip.src);
        let reply = EthFrame {
            src: Mac::ZERO,
            dst: original.src,
            vlan: original.vlan,
            payload: EthPayload::Ipv4(Ipv4Packet {
                src: Ipv4Addr::UNSPECIFIED,
                dst: ip.src,
                tos: 0,
                ttl: 64,
                payload: IpPayload::Icmp(IcmpMessage::HostUnreachable(Box::new(original.clone()))),
            }),
        };
        if let Err(err) = self.packet_out(switch, in_port, &reply) {
            warn!("failed to send ICMP host unreachable: {err}");
        }
    }

    /// Probe for an unknown host and finish routing once it answers.
    ///
    /// Floods an ARP request from the probe MAC, then waits (off the
    /// caller) for the reply to wake us; on timeout the sender gets an
    /// ICMP host unreachable instead.
    pub(crate) fn spawn_delayed_resolution(
        self: &Arc<Self>,
        switch: SwitchId,
        in_port: PortNo,
        target: Ipv4Addr,
        frame: EthFrame,
    ) {
        let Ok(handle) = Handle::try_current() else {
            warn!("no async runtime, cannot wait for ARP resolution of {target}");
            return;
        };
        let engine = Arc::clone(self);
        handle.spawn(async move {
            debug!("trying to find client for IP {target}");
            let notify = engine.waiters.register(target);
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            engine.controller_flood(None, &engine.arp_probe(target));

            match tokio::time::timeout(engine.params.arp_wait, notified).await {
                Err(_) => {
                    trace!("ARP discovery timed out, sending ICMP host unreachable");
                    engine.send_icmp_host_unreachable(switch, in_port, &frame);
                }
                Ok(()) => {
                    trace!("revived by incoming ARP packet, re-routing original payload");
                    if engine.devices.device_by_mac(frame.dst).is_some() {
                        engine.handle_packet_in(switch, in_port, frame);
                    } else {
                        warn!("target client allegedly there but actually isn't");
                    }
                }
            }
            engine.waiters.finish(target);
        });
    }

    /// The ARP request flooded to locate `target`. The sender IP is the
    /// .254 address of the target's /24 so the target answers a
    /// plausible neighbor.
    fn arp_probe(&self, target: Ipv4Addr) -> EthFrame {
        let sender_ip = Ipv4Addr::from((u32::from(target) & 0xffff_ff00) | 254);
        EthFrame {
            src: self.params.probe_mac,
            dst: Mac::BROADCAST,
            vlan: None,
            payload: EthPayload::Arp(ArpPacket {
                op: ArpOp::Request,
                sender_mac: self.params.probe_mac,
                sender_ip,
                target_mac: Mac::ZERO,
                target_ip: target,
            }),
        }
    }

    /// The route from `src` to `dst` under the packet's service class,
    /// from the cache or freshly computed.
    pub(crate) fn cached_route(
        &self,
        src: SwitchId,
        dst: SwitchId,
        class: ServiceClass,
    ) -> Option<Vec<Link>> {
        let class = self.resolve_metric(class);
        trace!("packet QoS property: {class}");
        let pair = SwitchPair::new(src, dst);
        if let Some(route) = self.cache.get(class, pair) {
            trace!("using cached route");
            return Some(route);
        }
        trace!("route not cached, computing new route");
        let cost_function = self.cost_functions.get(class)?;
        let route = shortest_path(
            &self.switches.switches(),
            &self.topology.links(),
            src,
            dst,
            cost_function.as_ref(),
        )?;
        self.cache.put(class, pair, route.clone());
        Some(route)
    }

    /// Pick the metric actually used for a packet's service class.
    ///
    /// `Constant` and unregistered classes defer to the admin default;
    /// an unregistered default falls back to `Constant`.
    fn resolve_metric(&self, requested: ServiceClass) -> ServiceClass {
        let mut class = requested;
        if class == ServiceClass::Constant || !self.cost_functions.contains(class) {
            class = *self.default_metric.lock();
        }
        if !self.cost_functions.contains(class) {
            warn!(
                "no cost function associated with default metric {class}, \
                 falling back to constant costs"
            );
            class = ServiceClass::Constant;
        }
        class
    }

    pub(crate) fn packet_out(
        &self,
        switch: SwitchId,
        port: PortNo,
        frame: &EthFrame,
    ) -> Result<(), EngineError> {
        trace!("outputting packet to switch {switch}, port {port}");
        let handle = self
            .switches
            .switch(switch)
            .ok_or(EngineError::UnknownSwitch(switch))?;
        handle.send(SwitchMessage::PacketOut {
            frame: frame.clone(),
            actions: vec![Action::Output(port)],
        })?;
        Ok(())
    }

    fn is_fabric_ingress(&self, port: SwitchPort) -> bool {
        self.topology.links().iter().any(|link| link.src == port)
    }

    /// Invalidate routes and tear down affected flows after a fabric
    /// change.
    pub fn handle_topology_event(&self, event: &TopologyEvent) {
        debug!("topology event: {event}");
        self.cache.invalidate_all();
        self.flows.handle_topology_event(event, &self.switches);
    }

    /// Forward a rule-removed notification to the flow registry;
    /// returns true iff a flow was torn down.
    #[must_use]
    pub fn handle_rule_expired(&self, event: &RuleRemoved) -> bool {
        self.flows.handle_rule_expired(event, &self.switches)
    }

    pub fn register_cost_function(&self, class: ServiceClass, function: Arc<dyn CostFunction>) {
        self.cost_functions.register(class, function);
    }

    #[must_use]
    pub fn available_metrics(&self) -> Vec<ServiceClass> {
        self.cost_functions.available()
    }

    #[must_use]
    pub fn default_metric(&self) -> ServiceClass {
        *self.default_metric.lock()
    }

    pub fn set_default_metric(&self, class: ServiceClass) {
        *self.default_metric.lock() = class;
    }

    pub fn invalidate_cache(&self, class: ServiceClass) {
        self.cache.invalidate(class);
    }

    pub fn invalidate_all_caches(&self) {
        self.cache.invalidate_all();
    }

    #[must_use]
    pub fn flows(&self) -> &Arc<FlowRegistry> {
        &self.flows
    }

    #[must_use]
    pub fn relays(&self) -> &Arc<RelayRegistry> {
        &self.relays
    }

    #[must_use]
    pub fn multicast_groups(&self) -> &Arc<MulticastGroupTracker> {
        &self.multicast
    }

    pub(crate) fn params(&self) -> &EngineParams {
        &self.params
    }
}

impl std::fmt::Debug for RoutingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingEngine")
            .field("params", &self.params)
            .field("default_metric", &*self.default_metric.lock())
            .finish_non_exhaustive()
    }
}

/// The per-switch hops of a route from `src` to an egress port.
fn hops_along(route: &[Link], src: SwitchId, in_port: PortNo, egress: PortNo) -> Vec<Hop> {
    let mut hops = Vec::with_capacity(route.len() + 1);
    let mut current = SwitchPort::new(src, in_port);
    for link in route {
        hops.push(Hop {
            switch: current.switch,
            in_port: current.port,
            out_port: link.src.port,
        });
        current = link.dst;
    }
    hops.push(Hop {
        switch: current.switch,
        in_port: current.port,
        out_port: egress,
    });
    hops
}

/// Rules installed so far in one routing transaction.
///
/// A failed install rolls the earlier ones back so no half-installed
/// path remains.
pub(crate) struct InstallPlan {
    installed: Vec<(SwitchId, PacketMatch, Cookie)>,
}

impl InstallPlan {
    pub(crate) fn new() -> InstallPlan {
        InstallPlan {
            installed: Vec::new(),
        }
    }

    pub(crate) fn install(
        &mut self,
        registry: &Arc<dyn SwitchRegistry>,
        switch: SwitchId,
        rule: RuleSpec,
    ) -> Result<(), EngineError> {
        let handle = registry
            .switch(switch)
            .ok_or(EngineError::UnknownSwitch(switch))?;
        let pattern = rule.pattern;
        let cookie = rule.cookie;
        trace!("adding flow on {switch} for {pattern}");
        handle.send(SwitchMessage::InstallRule(rule))?;
        self.installed.push((switch, pattern, cookie));
        Ok(())
    }

    pub(crate) fn rollback(&self, registry: &Arc<dyn SwitchRegistry>) {
        warn!("rolling back {} installed rules", self.installed.len());
        for (switch, pattern, cookie) in &self.installed {
            let Some(handle) = registry.switch(*switch) else {
                continue;
            };
            let msg = SwitchMessage::DeleteRule(DeleteSpec {
                pattern: *pattern,
                cookie: Some(*cookie),
            });
            if let Err(err) = handle.send(msg) {
                warn!("rollback delete on {switch} failed: {err}");
            }
        }
    }
}
