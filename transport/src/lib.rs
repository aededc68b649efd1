// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Controller-to-switch transport abstraction.
//!
//! The routing core talks to the fabric only through the traits in this
//! crate: [`SwitchRegistry`] to reach switches, [`TopologyView`] for the
//! link graph, and [`DeviceDirectory`] for learned end hosts. The
//! `testing` feature provides in-memory implementations of all three.

#![deny(unsafe_code, clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

pub mod device;
pub mod message;
pub mod switch;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod topology;

pub use device::{Device, DeviceDirectory};
pub use message::{Action, DeleteSpec, ExpiryReason, RuleRemoved, RuleSpec, SwitchMessage};
pub use switch::{SwitchHandle, SwitchRegistry, TransportError};
pub use topology::{TopologyEvent, TopologyView};
