// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The route cache.

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::debug;

use net::{Link, ServiceClass, SwitchPair};

/// Computed routes, keyed by service class and ordered switch pair.
///
/// The key is direction-aware: with asymmetric cost functions the best
/// path from a to b need not be the reverse of the best path from b
/// to a.
#[derive(Debug, Default)]
pub struct RouteCache {
    inner: Mutex<AHashMap<(ServiceClass, SwitchPair), Vec<Link>>>,
}

impl RouteCache {
    #[must_use]
    pub fn new() -> RouteCache {
        RouteCache::default()
    }

    #[must_use]
    pub fn get(&self, class: ServiceClass, pair: SwitchPair) -> Option<Vec<Link>> {
        self.inner.lock().get(&(class, pair)).cloned()
    }

    pub fn put(&self, class: ServiceClass, pair: SwitchPair, route: Vec<Link>) {
        self.inner.lock().insert((class, pair), route);
    }

    /// Drop every cached route for one service class.
    pub fn invalidate(&self, class: ServiceClass) {
        debug!("flushing route cache for {class}");
        self.inner.lock().retain(|(c, _), _| *c != class);
    }

    /// Drop everything.
    pub fn invalidate_all(&self) {
        debug!("flushing all route caches");
        self.inner.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
