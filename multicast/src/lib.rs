// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Multicast group membership tracking.
//!
//! Keeps, per multicast group address, which clients want traffic and
//! from which sources (include/exclude filtering in the RFC 3376
//! style), fed by membership reports and pruned by a periodic timeout
//! sweep.

#![deny(unsafe_code, clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

mod group;
mod tracker;

pub use group::{GroupMember, MulticastError, MulticastGroup};
pub use tracker::{
    DEFAULT_CLIENT_TIMEOUT, DEFAULT_PING_INTERVAL, MulticastGroupTracker,
};
