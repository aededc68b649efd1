// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Type-of-service classification.
//!
//! The low three bits of the DSCP field select which link metric the
//! path computation optimizes for.

use std::fmt::Display;

use crate::packet::EthFrame;

/// The service class requested by a packet's ToS byte.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum ServiceClass {
    /// No preference: unit cost per hop.
    #[default]
    Constant,
    LowDelay,
    HighThroughput,
    LowLoss,
}

impl ServiceClass {
    /// Classify a ToS byte (DSCP + ECN as carried in the IPv4 header).
    ///
    /// Checked in priority order: delay beats throughput beats loss when
    /// several bits are set.
    #[must_use]
    pub fn from_tos(tos: u8) -> ServiceClass {
        let dscp = tos >> 2;
        if dscp & 0b100 != 0 {
            ServiceClass::LowDelay
        } else if dscp & 0b010 != 0 {
            ServiceClass::HighThroughput
        } else if dscp & 0b001 != 0 {
            ServiceClass::LowLoss
        } else {
            ServiceClass::Constant
        }
    }

    /// Classify a frame; non-IPv4 frames get [`ServiceClass::Constant`].
    #[must_use]
    pub fn from_frame(frame: &EthFrame) -> ServiceClass {
        frame
            .ipv4()
            .map_or(ServiceClass::Constant, |ip| ServiceClass::from_tos(ip.tos))
    }
}

impl Display for ServiceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceClass::Constant => write!(f, "constant"),
            ServiceClass::LowDelay => write!(f, "low-delay"),
            ServiceClass::HighThroughput => write!(f, "high-throughput"),
            ServiceClass::LowLoss => write!(f, "low-loss"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dscp_bits() {
        assert_eq!(ServiceClass::from_tos(0), ServiceClass::Constant);
        assert_eq!(ServiceClass::from_tos(0b100 << 2), ServiceClass::LowDelay);
        assert_eq!(
            ServiceClass::from_tos(0b010 << 2),
            ServiceClass::HighThroughput
        );
        assert_eq!(ServiceClass::from_tos(0b001 << 2), ServiceClass::LowLoss);
        // delay wins over the rest
        assert_eq!(ServiceClass::from_tos(0b111 << 2), ServiceClass::LowDelay);
        // ECN bits alone do not select a class
        assert_eq!(ServiceClass::from_tos(0b11), ServiceClass::Constant);
    }
}
