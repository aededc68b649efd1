// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Directed inter-switch links and the route-cache key type.

use std::fmt::Display;

use crate::switch::{SwitchId, SwitchPort};

/// A directed edge of the fabric: traffic leaves `src.switch` on
/// `src.port` and arrives at `dst.switch` on `dst.port`.
///
/// A bidirectional physical link is represented as two `Link` values.
/// Equality considers all four fields.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Link {
    pub src: SwitchPort,
    pub dst: SwitchPort,
}

impl Link {
    #[must_use]
    pub fn new(src: SwitchPort, dst: SwitchPort) -> Self {
        Self { src, dst }
    }

    /// The same physical edge, traversed the other way.
    #[must_use]
    pub fn reverse(&self) -> Link {
        Link {
            src: self.dst,
            dst: self.src,
        }
    }

    #[must_use]
    pub fn src_switch(&self) -> SwitchId {
        self.src.switch
    }

    #[must_use]
    pub fn dst_switch(&self) -> SwitchId {
        self.dst.switch
    }
}

impl Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// Key for cached routes: an ordered (source, destination) switch pair.
///
/// Direction matters. Asymmetric cost functions produce different paths
/// for the two directions of the same pair, so the cache must not
/// conflate them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct SwitchPair {
    pub src: SwitchId,
    pub dst: SwitchId,
}

impl SwitchPair {
    #[must_use]
    pub fn new(src: SwitchId, dst: SwitchId) -> Self {
        Self { src, dst }
    }
}

impl Display for SwitchPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.src, self.dst)
    }
}
