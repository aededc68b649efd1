// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The flow record.

use net::{Cookie, Link, SwitchId};
use transport::RuleSpec;

/// One distributed flow: the rules installed for it and where.
///
/// `switches` and `rules` are parallel lists; entry `i` of `rules` is
/// installed on entry `i` of `switches`. A switch may appear more than
/// once (a forward and a reverse rule, say). `links` holds the fabric
/// links the flow's path traverses, used to find flows affected by a
/// topology change.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Flow {
    pub cookie: Cookie,
    pub description: String,
    pub switches: Vec<SwitchId>,
    pub rules: Vec<RuleSpec>,
    pub links: Vec<Link>,
}
