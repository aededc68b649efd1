// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Multicast tree routing.

use std::collections::VecDeque;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use tracing::{debug, trace, warn};

use flow::Flow;
use net::{EthFrame, Link, PacketMatch, PortNo, ServiceClass, SwitchId};
use transport::Action;

use crate::engine::{InstallPlan, RoutingEngine};

impl RoutingEngine {
    /// Install a distribution tree for one multicast packet.
    ///
    /// The tree is the union of the shortest paths from the ingress
    /// switch to every interested group member, deduplicated per switch
    /// pair. Each switch on the tree gets a single rule that fans the
    /// packet out to its tree children and locally attached members.
    pub(crate) fn multicast_routing(self: &Arc<Self>, switch: SwitchId, in_port: PortNo, frame: &EthFrame) {
        let Some(ip) = frame.ipv4() else {
            return;
        };
        let targets = self.multicast.interested_targets(ip.dst, ip.src);
        if targets.is_empty() {
            debug!("nobody is ready to receive this packet, ignoring it");
            return;
        }
        trace!("interested group members: {targets:?}");

        let class = ServiceClass::from_frame(frame);
        let pattern = PacketMatch::from_frame(frame);

        // Attachment points and routes of the reachable members.
        let mut paths: Vec<Vec<Link>> = Vec::new();
        let mut member_ports: AHashMap<SwitchId, Vec<PortNo>> = AHashMap::new();
        for target in targets {
            let Some(location) = self
                .devices
                .device_by_ip(target)
                .and_then(|device| device.location)
            else {
                debug!("group member {target} has no known attachment point");
                continue;
            };
            let Some(route) = self.cached_route(switch, location.switch, class) else {
                warn!("group member {target} is not reachable");
                continue;
            };
            paths.push(route);
            member_ports.entry(location.switch).or_default().push(location.port);
        }
        if member_ports.is_empty() {
            debug!("no reachable group members, ignoring packet");
            return;
        }

        // Merge the paths into a tree, keeping the first link seen for
        // each switch pair.
        let mut seen: AHashSet<(SwitchId, SwitchId)> = AHashSet::new();
        let mut children: AHashMap<SwitchId, Vec<Link>> = AHashMap::new();
        let mut tree_links: Vec<Link> = Vec::new();
        for link in paths.iter().flatten() {
            if seen.insert((link.src_switch(), link.dst_switch())) {
                children.entry(link.src_switch()).or_default().push(*link);
                tree_links.push(*link);
            }
        }

        let cookie = self.flows.new_cookie();
        let mut plan = InstallPlan::new();
        let mut flow_switches = Vec::new();
        let mut flow_rules = Vec::new();
        let mut deliveries: Vec<(SwitchId, PortNo)> = Vec::new();

        // Walk the tree from the ingress switch; each node knows the
        // port the packet arrives on.
        let mut queue: VecDeque<(SwitchId, PortNo)> = VecDeque::from([(switch, in_port)]);
        while let Some((current, current_in)) = queue.pop_front() {
            let mut actions = Vec::new();
            if let Some(links) = children.get(&current) {
                for link in links {
                    queue.push_back((link.dst_switch(), link.dst.port));
                    actions.push(Action::Output(link.src.port));
                }
            }
            if let Some(ports) = member_ports.get(&current) {
                for port in ports {
                    actions.push(Action::Output(*port));
                    deliveries.push((current, *port));
                }
            }
            let rule = self.flows.rule(cookie, pattern.with_in_port(current_in), actions);
            flow_switches.push(current);
            flow_rules.push(rule.clone());
            if plan.install(&self.switches, current, rule).is_err() {
                warn!("error while installing multicast tree");
                plan.rollback(&self.switches);
                self.controller_flood(Some((switch, in_port)), frame);
                return;
            }
        }

        // The triggering packet still has to reach the members.
        for (sw, port) in deliveries {
            if let Err(err) = self.packet_out(sw, port, frame) {
                warn!("failed to deliver multicast packet at {sw}/{port}: {err}");
            }
        }

        let flow = Flow {
            cookie,
            description: format!("Multicast Route for {}", frame.describe()),
            switches: flow_switches,
            rules: flow_rules,
            links: tree_links,
        };
        if let Err(err) = self.flows.add_flow(flow) {
            warn!("failed to register multicast flow {cookie}: {err}");
        }
        debug!("successfully set multicast route");
    }
}
