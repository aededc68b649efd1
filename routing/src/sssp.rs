// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Single-source shortest path over the fabric graph.

use ahash::{AHashMap, AHashSet};

use net::{Link, SwitchId};

use crate::cost::CostFunction;

/// Dijkstra over a snapshot of the fabric.
///
/// Returns the links of a cheapest path from `src` to `dst`, in order;
/// `Some(vec![])` when `src == dst`; `None` when `dst` is unreachable
/// or either endpoint is unknown. Ties break on whichever minimum the
/// scan finds first.
#[must_use]
pub fn shortest_path(
    switches: &[SwitchId],
    links: &[Link],
    src: SwitchId,
    dst: SwitchId,
    cost_function: &dyn CostFunction,
) -> Option<Vec<Link>> {
    if src == dst {
        return Some(Vec::new());
    }
    if !switches.contains(&src) || !switches.contains(&dst) {
        return None;
    }

    let mut outgoing: AHashMap<SwitchId, Vec<&Link>> = AHashMap::new();
    for link in links {
        outgoing.entry(link.src_switch()).or_default().push(link);
    }

    let mut distances: AHashMap<SwitchId, f64> = switches
        .iter()
        .map(|sw| (*sw, f64::INFINITY))
        .collect();
    let mut predecessor: AHashMap<SwitchId, Link> = AHashMap::new();
    let mut active: AHashSet<SwitchId> = switches.iter().copied().collect();
    distances.insert(src, 0.0);

    while !active.is_empty() {
        // linear-scan extraction of the cheapest active node
        let mut current = None;
        let mut min_cost = f64::INFINITY;
        for sw in &active {
            let cost = distances[sw];
            if cost < min_cost {
                min_cost = cost;
                current = Some(*sw);
            }
        }
        // only unreachable nodes left
        let Some(current) = current else {
            break;
        };
        active.remove(&current);

        let Some(neighbors) = outgoing.get(&current) else {
            continue;
        };
        for link in neighbors {
            let neighbor = link.dst_switch();
            if !active.contains(&neighbor) {
                continue;
            }
            let candidate = distances[&current] + cost_function.cost(link);
            if candidate < distances[&neighbor] {
                distances.insert(neighbor, candidate);
                predecessor.insert(neighbor, **link);
            }
        }
    }

    if distances[&dst].is_infinite() {
        return None;
    }

    let mut path = Vec::new();
    let mut current = dst;
    while current != src {
        let link = predecessor[&current];
        current = link.src_switch();
        path.push(link);
    }
    path.reverse();
    Some(path)
}
