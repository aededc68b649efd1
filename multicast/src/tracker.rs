// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The multicast group tracker.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use net::{GroupRecord, GroupRecordType};

use crate::group::{GroupMember, MulticastGroup};

/// Default seconds between timeout sweeps.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);
/// Default seconds after which a silent member is dropped.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// All multicast groups, keyed by group address.
#[derive(Debug)]
pub struct MulticastGroupTracker {
    groups: Mutex<AHashMap<Ipv4Addr, MulticastGroup>>,
    ping_interval_secs: AtomicU64,
    client_timeout_secs: AtomicU64,
}

impl Default for MulticastGroupTracker {
    fn default() -> Self {
        MulticastGroupTracker::new()
    }
}

impl MulticastGroupTracker {
    #[must_use]
    pub fn new() -> MulticastGroupTracker {
        MulticastGroupTracker {
            groups: Mutex::new(AHashMap::new()),
            ping_interval_secs: AtomicU64::new(DEFAULT_PING_INTERVAL.as_secs()),
            client_timeout_secs: AtomicU64::new(DEFAULT_CLIENT_TIMEOUT.as_secs()),
        }
    }

    /// Apply every group record of a membership report from `client`.
    pub fn handle_membership_report(&self, client: Ipv4Addr, records: &[GroupRecord]) {
        let now = Instant::now();
        let mut groups = self.groups.lock();
        for record in records {
            let group = groups
                .entry(record.group)
                .or_insert_with(|| MulticastGroup::new(record.group));
            let sources = record.sources.clone();
            let emptied = match record.record_type {
                GroupRecordType::ChangeToExclude => {
                    info!(
                        "client {client} in group {} changed to exclude mode for {sources:?}",
                        record.group
                    );
                    group.signal_from_client(client, sources, false, true, now)
                }
                GroupRecordType::ModeIsExclude => {
                    debug!("client {client} refreshed membership in {}", record.group);
                    group.signal_from_client(client, sources, false, false, now)
                }
                GroupRecordType::ChangeToInclude => {
                    info!(
                        "client {client} in group {} changed to include mode for {sources:?}",
                        record.group
                    );
                    group.signal_from_client(client, sources, true, true, now)
                }
                GroupRecordType::ModeIsInclude => {
                    debug!("client {client} refreshed membership in {}", record.group);
                    group.signal_from_client(client, sources, true, false, now)
                }
                GroupRecordType::AllowNewSources => {
                    info!(
                        "client {client} in group {} allows sources {sources:?}",
                        record.group
                    );
                    match group.change_client_sources(client, &sources, true, now) {
                        Ok(emptied) => emptied,
                        Err(err) => {
                            warn!("bad allow-new-sources record: {err}");
                            group.is_empty()
                        }
                    }
                }
                GroupRecordType::BlockOldSources => {
                    info!(
                        "client {client} in group {} blocks sources {sources:?}",
                        record.group
                    );
                    match group.change_client_sources(client, &sources, false, now) {
                        Ok(emptied) => emptied,
                        Err(err) => {
                            warn!("bad block-old-sources record: {err}");
                            group.is_empty()
                        }
                    }
                }
            };
            if emptied {
                groups.remove(&record.group);
            }
        }
    }

    /// Members of `group` other than `source` whose filter admits
    /// `source`. Empty for unknown groups.
    #[must_use]
    pub fn interested_targets(&self, group: Ipv4Addr, source: Ipv4Addr) -> Vec<Ipv4Addr> {
        self.groups
            .lock()
            .get(&group)
            .map(|g| g.interested_targets(source))
            .unwrap_or_default()
    }

    /// Drop timed-out members and emptied groups.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    fn sweep_at(&self, now: Instant) {
        debug!("checking for multicast group timeouts");
        let timeout = self.client_timeout();
        self.groups
            .lock()
            .retain(|_, group| !group.remove_timed_out(timeout, now));
    }

    /// Run [`MulticastGroupTracker::sweep`] every ping interval until
    /// the task is aborted.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tracker.ping_interval()).await;
                tracker.sweep();
            }
        })
    }

    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.load(Ordering::Relaxed))
    }

    pub fn set_ping_interval(&self, interval: Duration) {
        self.ping_interval_secs
            .store(interval.as_secs(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs.load(Ordering::Relaxed))
    }

    pub fn set_client_timeout(&self, timeout: Duration) {
        self.client_timeout_secs
            .store(timeout.as_secs(), Ordering::Relaxed);
    }

    /// The group addresses currently tracked, sorted.
    #[must_use]
    pub fn groups(&self) -> Vec<Ipv4Addr> {
        let mut addrs: Vec<Ipv4Addr> = self.groups.lock().keys().copied().collect();
        addrs.sort_unstable();
        addrs
    }

    /// A copy of one group's member list for the admin surface.
    #[must_use]
    pub fn group_snapshot(&self, group: Ipv4Addr) -> Option<Vec<GroupMember>> {
        self.groups.lock().get(&group).map(MulticastGroup::members)
    }
}
