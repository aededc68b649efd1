// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Switch and port identity types.

use std::fmt::Display;
use std::str::FromStr;

/// A switch datapath id.
///
/// `SwitchId` is a transparent wrapper around `u64` which identifies a
/// forwarding device under the controller's control.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct SwitchId(pub u64);

impl SwitchId {
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for SwitchId {
    fn from(value: u64) -> Self {
        SwitchId(value)
    }
}

impl Display for SwitchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.0.to_be_bytes();
        let mut first = true;
        for byte in bytes {
            if !first {
                write!(f, ":")?;
            }
            write!(f, "{byte:02x}")?;
            first = false;
        }
        Ok(())
    }
}

/// Errors which can occur while converting a string to a [`SwitchId`]
#[derive(Debug, thiserror::Error)]
#[error("invalid string representation of switch id: {0}")]
pub struct SwitchIdFromStringError(String);

impl FromStr for SwitchId {
    type Err = SwitchIdFromStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.contains(':') {
            return s
                .parse::<u64>()
                .map(SwitchId)
                .map_err(|_| SwitchIdFromStringError(s.to_string()));
        }
        let mut value: u64 = 0;
        let mut count = 0;
        for part in s.split(':') {
            let byte = u8::from_str_radix(part, 16)
                .map_err(|_| SwitchIdFromStringError(s.to_string()))?;
            value = (value << 8) | u64::from(byte);
            count += 1;
        }
        if count != 8 {
            return Err(SwitchIdFromStringError(s.to_string()));
        }
        Ok(SwitchId(value))
    }
}

/// A switch port number.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct PortNo(pub u32);

impl PortNo {
    /// The switch-local management port. Excluded from floods.
    pub const LOCAL: PortNo = PortNo(0xffff_fffe);

    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for PortNo {
    fn from(value: u32) -> Self {
        PortNo(value)
    }
}

impl Display for PortNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            PortNo::LOCAL => write!(f, "local"),
            PortNo(n) => write!(f, "{n}"),
        }
    }
}

/// An attachment point: the (switch, port) pair where an end host or a
/// relay endpoint is connected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct SwitchPort {
    pub switch: SwitchId,
    pub port: PortNo,
}

impl SwitchPort {
    #[must_use]
    pub fn new(switch: SwitchId, port: PortNo) -> Self {
        Self { switch, port }
    }
}

impl Display for SwitchPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.switch, self.port)
    }
}
