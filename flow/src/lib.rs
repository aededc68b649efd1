// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Distributed flow bookkeeping.
//!
//! A flow is one logical traffic stream whose rules are spread over
//! several switches. The [`FlowRegistry`] remembers which rules belong
//! to which flow so that when any one rule dies, the rest can be torn
//! down with it.

#![deny(unsafe_code, clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

mod record;
mod registry;

pub use record::Flow;
pub use registry::{FlowError, FlowRegistry};
