// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow cookies: 64-bit flow identifiers whose high 32 bits tag the
//! owning application and whose low 32 bits distinguish instances.

use std::fmt::Display;

/// An opaque 64-bit flow identifier shared by every rule of one
/// distributed flow.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Cookie(u64);

impl Cookie {
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Cookie(raw)
    }

    /// Assemble a cookie from an owner tag and an instance id.
    #[must_use]
    pub const fn from_parts(owner_tag: u32, instance: u32) -> Self {
        Cookie(((owner_tag as u64) << 32) | instance as u64)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The owning application's tag (high 32 bits).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn owner_tag(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The per-flow instance id (low 32 bits).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn instance(self) -> u32 {
        self.0 as u32
    }
}

impl Display for Cookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}
