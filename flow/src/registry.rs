// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The flow registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use net::{Cookie, Link, PacketMatch, SwitchId};
use transport::{
    Action, DeleteSpec, ExpiryReason, RuleRemoved, RuleSpec, SwitchMessage, SwitchRegistry,
    TopologyEvent,
};

use crate::record::Flow;

/// Default seconds of inactivity before a rule is evicted.
pub const DEFAULT_IDLE_TIMEOUT: u16 = 10;
/// Default seconds after which a rule is evicted unconditionally.
pub const DEFAULT_HARD_TIMEOUT: u16 = 30;
/// Default owner tag stamped into the high bits of every cookie.
pub const DEFAULT_OWNER_TAG: u32 = 0xbadc_ab1e;

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("flow has {rules} rules but {switches} switches")]
    RuleCountMismatch { rules: usize, switches: usize },
}

#[derive(Debug, Default)]
struct Inner {
    by_cookie: AHashMap<Cookie, Flow>,
    by_switch: AHashMap<SwitchId, AHashSet<Cookie>>,
    by_link: AHashMap<Link, AHashSet<Cookie>>,
}

/// Tracks every flow this controller has installed.
///
/// Indexed three ways: by cookie for expiry notifications, by switch
/// and by link for topology changes.
#[derive(Debug)]
pub struct FlowRegistry {
    inner: Mutex<Inner>,
    idle_timeout: AtomicU16,
    hard_timeout: AtomicU16,
    owner_tag: AtomicU32,
}

impl Default for FlowRegistry {
    fn default() -> Self {
        FlowRegistry::new()
    }
}

impl FlowRegistry {
    #[must_use]
    pub fn new() -> FlowRegistry {
        FlowRegistry {
            inner: Mutex::new(Inner::default()),
            idle_timeout: AtomicU16::new(DEFAULT_IDLE_TIMEOUT),
            hard_timeout: AtomicU16::new(DEFAULT_HARD_TIMEOUT),
            owner_tag: AtomicU32::new(DEFAULT_OWNER_TAG),
        }
    }

    /// A fresh cookie carrying the current owner tag, distinct from
    /// every flow currently tracked.
    #[must_use]
    pub fn new_cookie(&self) -> Cookie {
        let tag = self.owner_tag.load(Ordering::Relaxed);
        let inner = self.inner.lock();
        loop {
            let cookie = Cookie::from_parts(tag, rand::random::<u32>());
            if !inner.by_cookie.contains_key(&cookie) {
                return cookie;
            }
        }
    }

    /// A rule carrying the current timeouts and removal notification.
    #[must_use]
    pub fn rule(&self, cookie: Cookie, pattern: PacketMatch, actions: Vec<Action>) -> RuleSpec {
        RuleSpec {
            pattern,
            actions,
            cookie,
            idle_timeout: self.idle_timeout.load(Ordering::Relaxed),
            hard_timeout: self.hard_timeout.load(Ordering::Relaxed),
            notify_removal: true,
        }
    }

    /// Start tracking an installed flow.
    pub fn add_flow(&self, flow: Flow) -> Result<(), FlowError> {
        if flow.rules.len() != flow.switches.len() {
            return Err(FlowError::RuleCountMismatch {
                rules: flow.rules.len(),
                switches: flow.switches.len(),
            });
        }
        debug!("tracking flow {}: {}", flow.cookie, flow.description);
        let mut inner = self.inner.lock();
        for sw in &flow.switches {
            inner.by_switch.entry(*sw).or_default().insert(flow.cookie);
        }
        for link in &flow.links {
            inner.by_link.entry(*link).or_default().insert(flow.cookie);
        }
        inner.by_cookie.insert(flow.cookie, flow);
        Ok(())
    }

    /// Forget a flow and delete its rules everywhere except `ignore`.
    ///
    /// Idempotent: unknown cookies are a no-op.
    pub fn remove_flow(
        &self,
        cookie: Cookie,
        ignore: Option<SwitchId>,
        switches: &Arc<dyn SwitchRegistry>,
    ) -> Option<Flow> {
        let flow = self.unindex(cookie)?;
        debug!("removing flow {cookie}: {}", flow.description);
        let targets: Vec<(SwitchId, PacketMatch)> = flow
            .switches
            .iter()
            .zip(&flow.rules)
            .filter(|(sw, _)| Some(**sw) != ignore)
            .map(|(sw, rule)| (*sw, rule.pattern))
            .collect();
        fan_out_deletes(cookie, targets, switches.clone());
        Some(flow)
    }

    /// React to a rule-removed notification from a switch.
    ///
    /// Returns true iff a flow was torn down as a result. Removals
    /// caused by our own deletes are ignored so that the delete fan-out
    /// does not feed back on itself, and cookies stamped with a foreign
    /// owner tag are not ours to act on.
    pub fn handle_rule_expired(
        &self,
        event: &RuleRemoved,
        switches: &Arc<dyn SwitchRegistry>,
    ) -> bool {
        if event.cookie.owner_tag() != self.owner_tag.load(Ordering::Relaxed) {
            trace!("ignoring removal of foreign rule {}", event.cookie);
            return false;
        }
        match event.reason {
            ExpiryReason::Delete | ExpiryReason::GroupDelete => {
                trace!("rule {} removed by delete, no action", event.cookie);
                false
            }
            ExpiryReason::IdleTimeout | ExpiryReason::HardTimeout => {
                debug!(
                    "rule {} on {} hit {}, tearing flow down",
                    event.cookie, event.switch, event.reason
                );
                self.remove_flow(event.cookie, Some(event.switch), switches)
                    .is_some()
            }
        }
    }

    /// Tear down every flow invalidated by a topology change.
    ///
    /// Returns true iff at least one flow was removed.
    pub fn handle_topology_event(
        &self,
        event: &TopologyEvent,
        switches: &Arc<dyn SwitchRegistry>,
    ) -> bool {
        let (affected, ignore) = {
            let inner = self.inner.lock();
            match event {
                TopologyEvent::LinkUp(_) | TopologyEvent::SwitchJoined(_) => (Vec::new(), None),
                TopologyEvent::LinkDown(link) => {
                    let mut cookies = AHashSet::new();
                    for l in [*link, link.reverse()] {
                        if let Some(set) = inner.by_link.get(&l) {
                            cookies.extend(set.iter().copied());
                        }
                    }
                    (cookies.into_iter().collect(), None)
                }
                TopologyEvent::SwitchLeft(id) => (
                    inner
                        .by_switch
                        .get(id)
                        .map(|set| set.iter().copied().collect())
                        .unwrap_or_default(),
                    Some(*id),
                ),
                TopologyEvent::PortDown(port) => {
                    let mut cookies = AHashSet::new();
                    for (link, set) in &inner.by_link {
                        if link.src == *port || link.dst == *port {
                            cookies.extend(set.iter().copied());
                        }
                    }
                    (cookies.into_iter().collect(), None)
                }
            }
        };
        let mut removed = false;
        for cookie in affected {
            removed |= self.remove_flow(cookie, ignore, switches).is_some();
        }
        if removed {
            debug!("topology change ({event}) tore down flows");
        }
        removed
    }

    /// Every tracked flow, ordered by cookie.
    #[must_use]
    pub fn flows(&self) -> Vec<Flow> {
        let inner = self.inner.lock();
        let mut flows: Vec<Flow> = inner.by_cookie.values().cloned().collect();
        flows.sort_by_key(|f| f.cookie);
        flows
    }

    #[must_use]
    pub fn flow(&self, cookie: Cookie) -> Option<Flow> {
        self.inner.lock().by_cookie.get(&cookie).cloned()
    }

    #[must_use]
    pub fn idle_timeout(&self) -> u16 {
        self.idle_timeout.load(Ordering::Relaxed)
    }

    pub fn set_idle_timeout(&self, seconds: u16) {
        self.idle_timeout.store(seconds, Ordering::Relaxed);
    }

    #[must_use]
    pub fn hard_timeout(&self) -> u16 {
        self.hard_timeout.load(Ordering::Relaxed)
    }

    pub fn set_hard_timeout(&self, seconds: u16) {
        self.hard_timeout.store(seconds, Ordering::Relaxed);
    }

    #[must_use]
    pub fn owner_tag(&self) -> u32 {
        self.owner_tag.load(Ordering::Relaxed)
    }

    pub fn set_owner_tag(&self, tag: u32) {
        self.owner_tag.store(tag, Ordering::Relaxed);
    }

    fn unindex(&self, cookie: Cookie) -> Option<Flow> {
        let mut inner = self.inner.lock();
        let flow = inner.by_cookie.remove(&cookie)?;
        for sw in &flow.switches {
            if let Some(set) = inner.by_switch.get_mut(sw) {
                set.remove(&cookie);
                if set.is_empty() {
                    inner.by_switch.remove(sw);
                }
            }
        }
        for link in &flow.links {
            if let Some(set) = inner.by_link.get_mut(link) {
                set.remove(&cookie);
                if set.is_empty() {
                    inner.by_link.remove(link);
                }
            }
        }
        Some(flow)
    }
}

/// Send the per-switch deletes for a removed flow.
///
/// Runs on the current tokio runtime when there is one, inline
/// otherwise.
fn fan_out_deletes(
    cookie: Cookie,
    targets: Vec<(SwitchId, PacketMatch)>,
    switches: Arc<dyn SwitchRegistry>,
) {
    let job = move || {
        for (sw, pattern) in targets {
            let Some(handle) = switches.switch(sw) else {
                trace!("skipping delete of {cookie} on {sw}: switch gone");
                continue;
            };
            let msg = SwitchMessage::DeleteRule(DeleteSpec {
                pattern,
                cookie: Some(cookie),
            });
            if let Err(err) = handle.send(msg) {
                warn!("failed to delete {cookie} on {sw}: {err}");
            }
        }
    };
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move { job() });
    } else {
        job();
    }
}
