// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Waiters for in-flight ARP resolutions.

use std::net::Ipv4Addr;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Tasks waiting for a host to answer an ARP probe, keyed by the IP
/// being resolved. All waiters for one IP share a `Notify` and wake
/// together.
#[derive(Debug, Default)]
pub(crate) struct PendingResolutions {
    inner: Mutex<AHashMap<Ipv4Addr, (Arc<Notify>, usize)>>,
}

impl PendingResolutions {
    /// Register one more waiter for `ip`.
    pub(crate) fn register(&self, ip: Ipv4Addr) -> Arc<Notify> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entry(ip)
            .or_insert_with(|| (Arc::new(Notify::new()), 0));
        entry.1 += 1;
        entry.0.clone()
    }

    /// Drop one waiter registration for `ip`.
    pub(crate) fn finish(&self, ip: Ipv4Addr) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.get_mut(&ip) {
            entry.1 = entry.1.saturating_sub(1);
            if entry.1 == 0 {
                inner.remove(&ip);
            }
        }
    }

    /// Wake every waiter for `ip`; true iff there were any.
    pub(crate) fn wake(&self, ip: Ipv4Addr) -> bool {
        if let Some((notify, _)) = self.inner.lock().get(&ip) {
            notify.notify_waiters();
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    pub(crate) fn waiting(&self, ip: Ipv4Addr) -> usize {
        self.inner.lock().get(&ip).map_or(0, |(_, count)| *count)
    }
}
