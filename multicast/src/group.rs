// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! One multicast group and its members.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use ahash::AHashMap;

#[derive(Debug, thiserror::Error)]
pub enum MulticastError {
    #[error("client {client} is not a member of group {group}")]
    UnknownMember { client: Ipv4Addr, group: Ipv4Addr },
}

/// A group member's source filter.
///
/// `sources` is kept sorted and deduplicated. In exclude mode an empty
/// source list means "accept everything".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub ip: Ipv4Addr,
    pub include_mode: bool,
    pub sources: Vec<Ipv4Addr>,
    pub last_contact: Instant,
}

impl GroupMember {
    fn new(ip: Ipv4Addr, include_mode: bool, sources: Vec<Ipv4Addr>, now: Instant) -> GroupMember {
        let mut member = GroupMember {
            ip,
            include_mode,
            sources: Vec::new(),
            last_contact: now,
        };
        member.set_sources(sources);
        member
    }

    fn set_sources(&mut self, mut sources: Vec<Ipv4Addr>) {
        sources.sort_unstable();
        sources.dedup();
        self.sources = sources;
    }

    /// Whether this member's filter admits traffic from `source`.
    #[must_use]
    pub fn admits(&self, source: Ipv4Addr) -> bool {
        self.include_mode == self.sources.binary_search(&source).is_ok()
    }
}

/// A multicast group address and the clients subscribed to it.
#[derive(Debug)]
pub struct MulticastGroup {
    address: Ipv4Addr,
    members: AHashMap<Ipv4Addr, GroupMember>,
}

impl MulticastGroup {
    #[must_use]
    pub fn new(address: Ipv4Addr) -> MulticastGroup {
        MulticastGroup {
            address,
            members: AHashMap::new(),
        }
    }

    #[must_use]
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Apply a current-state or filter-mode-change report from a client.
    ///
    /// `changed` distinguishes change-to-X records from mode-is-X
    /// refreshes. A change to include mode with no sources is a leave.
    /// Returns true iff the group is now empty.
    pub fn signal_from_client(
        &mut self,
        client: Ipv4Addr,
        sources: Vec<Ipv4Addr>,
        include_mode: bool,
        changed: bool,
        now: Instant,
    ) -> bool {
        if let Some(member) = self.members.get_mut(&client) {
            member.last_contact = now;
            if changed {
                if include_mode && sources.is_empty() {
                    return self.remove_member(client);
                }
                member.include_mode = include_mode;
                member.set_sources(sources);
            }
            false
        } else {
            self.members
                .insert(client, GroupMember::new(client, include_mode, sources, now));
            false
        }
    }

    /// Apply an allow-new-sources or block-old-sources record.
    ///
    /// Sources are added when the record direction agrees with the
    /// member's mode (allow∧include, block∧exclude), removed otherwise.
    /// An include-mode member with no sources left leaves the group; an
    /// exclude-mode member with no sources left excludes nothing.
    /// Returns true iff the group is now empty.
    pub fn change_client_sources(
        &mut self,
        client: Ipv4Addr,
        sources: &[Ipv4Addr],
        allow_new: bool,
        now: Instant,
    ) -> Result<bool, MulticastError> {
        let Some(member) = self.members.get_mut(&client) else {
            return Err(MulticastError::UnknownMember {
                client,
                group: self.address,
            });
        };
        member.last_contact = now;
        let mut current = member.sources.clone();
        if allow_new == member.include_mode {
            current.extend_from_slice(sources);
        } else {
            current.retain(|s| !sources.contains(s));
        }
        if current.is_empty() && member.include_mode {
            return Ok(self.remove_member(client));
        }
        member.set_sources(current);
        Ok(false)
    }

    /// Drop one member; true iff the group is now empty.
    pub fn remove_member(&mut self, client: Ipv4Addr) -> bool {
        self.members.remove(&client);
        self.members.is_empty()
    }

    /// Drop members not heard from within `timeout`; true iff the group
    /// is now empty.
    pub fn remove_timed_out(&mut self, timeout: Duration, now: Instant) -> bool {
        self.members
            .retain(|_, m| now.duration_since(m.last_contact) < timeout);
        self.members.is_empty()
    }

    /// Members other than `source` whose filter admits `source`.
    #[must_use]
    pub fn interested_targets(&self, source: Ipv4Addr) -> Vec<Ipv4Addr> {
        let mut targets: Vec<Ipv4Addr> = self
            .members
            .values()
            .filter(|m| m.ip != source && m.admits(source))
            .map(|m| m.ip)
            .collect();
        targets.sort_unstable();
        targets
    }

    /// Every member, ordered by address.
    #[must_use]
    pub fn members(&self) -> Vec<GroupMember> {
        let mut members: Vec<GroupMember> = self.members.values().cloned().collect();
        members.sort_by_key(|m| m.ip);
        members
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GROUP: Ipv4Addr = Ipv4Addr::new(239, 1, 1, 1);

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn include_member_admits_only_listed_sources() {
        let mut group = MulticastGroup::new(GROUP);
        let now = Instant::now();
        group.signal_from_client(ip(1), vec![ip(5), ip(6)], true, true, now);
        assert_eq!(group.interested_targets(ip(5)), vec![ip(1)]);
        assert_eq!(group.interested_targets(ip(7)), Vec::<Ipv4Addr>::new());
    }

    #[test]
    fn exclude_member_with_no_sources_admits_everything() {
        let mut group = MulticastGroup::new(GROUP);
        let now = Instant::now();
        group.signal_from_client(ip(1), vec![], false, true, now);
        group.signal_from_client(ip(2), vec![ip(5)], false, true, now);
        assert_eq!(group.interested_targets(ip(5)), vec![ip(1)]);
        assert_eq!(group.interested_targets(ip(9)), vec![ip(1), ip(2)]);
        // the sender itself is never a target
        assert_eq!(group.interested_targets(ip(1)), vec![ip(2)]);
    }

    #[test]
    fn change_to_include_with_no_sources_is_a_leave() {
        let mut group = MulticastGroup::new(GROUP);
        let now = Instant::now();
        group.signal_from_client(ip(1), vec![], false, true, now);
        assert!(group.signal_from_client(ip(1), vec![], true, true, now));
        assert!(group.is_empty());
    }

    #[test]
    fn refresh_does_not_change_the_filter() {
        let mut group = MulticastGroup::new(GROUP);
        let now = Instant::now();
        group.signal_from_client(ip(1), vec![ip(5)], true, true, now);
        // mode-is report with different sources leaves the filter alone
        group.signal_from_client(ip(1), vec![], true, false, now);
        assert_eq!(group.members()[0].sources, vec![ip(5)]);
    }

    #[test]
    fn source_algebra() {
        let mut group = MulticastGroup::new(GROUP);
        let now = Instant::now();
        group.signal_from_client(ip(1), vec![ip(5)], true, true, now);

        // allow + include mode adds (and dedups)
        group
            .change_client_sources(ip(1), &[ip(6), ip(5)], true, now)
            .unwrap();
        assert_eq!(group.members()[0].sources, vec![ip(5), ip(6)]);

        // block + include mode removes
        group
            .change_client_sources(ip(1), &[ip(5)], false, now)
            .unwrap();
        assert_eq!(group.members()[0].sources, vec![ip(6)]);

        // emptied include-mode member leaves
        assert!(
            group
                .change_client_sources(ip(1), &[ip(6)], false, now)
                .unwrap()
        );
        assert!(group.is_empty());
    }

    #[test]
    fn emptied_exclude_member_stays_and_admits_everything() {
        let mut group = MulticastGroup::new(GROUP);
        let now = Instant::now();
        group.signal_from_client(ip(1), vec![ip(5)], false, true, now);
        // allow + exclude mode removes from the exclusion list
        assert!(
            !group
                .change_client_sources(ip(1), &[ip(5)], true, now)
                .unwrap()
        );
        assert_eq!(group.interested_targets(ip(5)), vec![ip(1)]);
    }

    #[test]
    fn unknown_member_is_an_error() {
        let mut group = MulticastGroup::new(GROUP);
        assert!(
            group
                .change_client_sources(ip(1), &[ip(5)], true, Instant::now())
                .is_err()
        );
    }

    #[test]
    fn timeout_sweep() {
        let mut group = MulticastGroup::new(GROUP);
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(50);
        group.signal_from_client(ip(1), vec![], false, true, t0);
        group.signal_from_client(ip(2), vec![], false, true, t1);
        assert!(!group.remove_timed_out(Duration::from_secs(60), t1));
        assert_eq!(group.interested_targets(ip(9)), vec![ip(1), ip(2)]);
        assert!(!group.remove_timed_out(
            Duration::from_secs(60),
            t0 + Duration::from_secs(61)
        ));
        assert_eq!(group.interested_targets(ip(9)), vec![ip(2)]);
        assert!(group.remove_timed_out(
            Duration::from_secs(60),
            t0 + Duration::from_secs(111)
        ));
    }
}
