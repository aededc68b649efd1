// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Handles to connected switches.

use std::sync::Arc;

use net::SwitchId;

use crate::message::SwitchMessage;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("switch {0} is not connected")]
    SwitchGone(SwitchId),
    #[error("write to switch {switch} failed: {reason}")]
    WriteFailed { switch: SwitchId, reason: String },
}

/// A connected switch's control channel.
pub trait SwitchHandle: Send + Sync {
    fn id(&self) -> SwitchId;

    /// Queue a message on the switch's control channel.
    fn send(&self, msg: SwitchMessage) -> Result<(), TransportError>;
}

/// The set of currently connected switches.
pub trait SwitchRegistry: Send + Sync {
    fn switch(&self, id: SwitchId) -> Option<Arc<dyn SwitchHandle>>;

    fn switches(&self) -> Vec<SwitchId>;
}
