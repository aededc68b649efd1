// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Transparent transport relays.
//!
//! A relay is a middlebox (a proxy, say) that selected UDP or TCP
//! traffic is diverted through. The [`RelayRegistry`] stores which
//! destination (ip, port) filters divert to which relay endpoint, with
//! per-entry enable toggles and a global kill switch per transport.

#![deny(unsafe_code, clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

mod endpoint;
mod registry;

pub use endpoint::{RelayEndpoint, RelayKey};
pub use registry::{RelayError, RelayRegistry};
