// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The routing core.
//!
//! [`RoutingEngine`] turns packet-in events into installed forwarding
//! paths: shortest-path unicast (with optional reverse flows), relayed
//! unicast through transparent middleboxes, multicast trees, controller
//! floods for broadcast, and delayed ARP-probe resolution for hosts
//! nobody has seen yet.

#![deny(unsafe_code, clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

mod cache;
mod cost;
mod engine;
mod mcast;
mod relay_route;
mod sssp;
mod waiters;

pub use cache::RouteCache;
pub use cost::{ConstantCost, CostFunction, CostFunctionMap};
pub use engine::{
    DEFAULT_ARP_WAIT, DEFAULT_PROBE_MAC, EngineError, EngineParams, EngineParamsBuilder,
    PortOffsets, RoutingEngine,
};
pub use sssp::shortest_path;
