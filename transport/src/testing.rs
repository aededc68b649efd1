// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! In-memory fabric for tests.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use net::{Link, Mac, PortNo, SwitchId, SwitchPort};

use crate::device::{Device, DeviceDirectory};
use crate::message::SwitchMessage;
use crate::switch::{SwitchHandle, SwitchRegistry, TransportError};
use crate::topology::TopologyView;

/// A switch that records every message sent to it.
#[derive(Debug)]
pub struct MockSwitch {
    id: SwitchId,
    sent: Mutex<Vec<SwitchMessage>>,
    fail_writes: AtomicBool,
}

impl MockSwitch {
    #[must_use]
    pub fn new(id: SwitchId) -> Arc<MockSwitch> {
        Arc::new(MockSwitch {
            id,
            sent: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        })
    }

    /// Everything sent so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<SwitchMessage> {
        self.sent.lock().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    /// Make subsequent `send` calls fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }
}

impl SwitchHandle for MockSwitch {
    fn id(&self) -> SwitchId {
        self.id
    }

    fn send(&self, msg: SwitchMessage) -> Result<(), TransportError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(TransportError::WriteFailed {
                switch: self.id,
                reason: "mock write failure".to_string(),
            });
        }
        self.sent.lock().push(msg);
        Ok(())
    }
}

/// An in-memory fabric: mock switches plus a mutable link graph.
#[derive(Debug, Default)]
pub struct TestNetwork {
    switches: Mutex<HashMap<SwitchId, Arc<MockSwitch>>>,
    links: Mutex<Vec<Link>>,
    ports: Mutex<HashMap<SwitchId, Vec<PortNo>>>,
}

impl TestNetwork {
    #[must_use]
    pub fn new() -> TestNetwork {
        TestNetwork::default()
    }

    /// A chain of `n` switches with ids 1..=n.
    ///
    /// Port 1 of each switch faces hosts; port 2 connects to the next
    /// switch's port 3. Both link directions are present.
    #[must_use]
    pub fn linear(n: u64) -> TestNetwork {
        let net = TestNetwork::new();
        for i in 1..=n {
            net.add_switch(SwitchId(i), &[PortNo(1), PortNo(2), PortNo(3)]);
        }
        for i in 1..n {
            net.add_link(Link::new(
                SwitchPort::new(SwitchId(i), PortNo(2)),
                SwitchPort::new(SwitchId(i + 1), PortNo(3)),
            ));
        }
        net
    }

    pub fn add_switch(&self, id: SwitchId, ports: &[PortNo]) {
        self.switches.lock().insert(id, MockSwitch::new(id));
        self.ports.lock().insert(id, ports.to_vec());
    }

    pub fn remove_switch(&self, id: SwitchId) {
        self.switches.lock().remove(&id);
        self.ports.lock().remove(&id);
        self.links
            .lock()
            .retain(|l| l.src_switch() != id && l.dst_switch() != id);
    }

    /// Adds the link and its reverse.
    pub fn add_link(&self, link: Link) {
        let mut links = self.links.lock();
        links.push(link);
        links.push(link.reverse());
    }

    /// Removes the link and its reverse.
    pub fn remove_link(&self, link: Link) {
        let rev = link.reverse();
        self.links.lock().retain(|l| *l != link && *l != rev);
    }

    /// Panics if the switch does not exist. Test-only accessor.
    #[must_use]
    pub fn mock(&self, id: SwitchId) -> Arc<MockSwitch> {
        self.switches.lock()[&id].clone()
    }

    /// Everything sent to one switch so far.
    #[must_use]
    pub fn sent(&self, id: SwitchId) -> Vec<SwitchMessage> {
        self.mock(id).sent()
    }
}

impl SwitchRegistry for TestNetwork {
    fn switch(&self, id: SwitchId) -> Option<Arc<dyn SwitchHandle>> {
        self.switches
            .lock()
            .get(&id)
            .map(|s| s.clone() as Arc<dyn SwitchHandle>)
    }

    fn switches(&self) -> Vec<SwitchId> {
        let mut ids: Vec<SwitchId> = self.switches.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl TopologyView for TestNetwork {
    fn links(&self) -> Vec<Link> {
        self.links.lock().clone()
    }

    fn ports(&self, switch: SwitchId) -> Vec<PortNo> {
        self.ports.lock().get(&switch).cloned().unwrap_or_default()
    }

    fn is_fabric_port(&self, port: SwitchPort) -> bool {
        self.links
            .lock()
            .iter()
            .any(|l| l.src == port || l.dst == port)
    }
}

/// A hand-populated device directory.
#[derive(Debug, Default)]
pub struct MockDevices {
    by_mac: Mutex<HashMap<Mac, Device>>,
}

impl MockDevices {
    #[must_use]
    pub fn new() -> MockDevices {
        MockDevices::default()
    }

    pub fn add(&self, mac: Mac, ip: Ipv4Addr, location: SwitchPort) {
        self.by_mac.lock().insert(
            mac,
            Device {
                mac,
                ips: vec![ip],
                location: Some(location),
            },
        );
    }

    /// A host whose attachment point is unknown.
    pub fn add_unlocated(&self, mac: Mac, ip: Ipv4Addr) {
        self.by_mac.lock().insert(
            mac,
            Device {
                mac,
                ips: vec![ip],
                location: None,
            },
        );
    }

    pub fn remove(&self, mac: Mac) {
        self.by_mac.lock().remove(&mac);
    }
}

impl DeviceDirectory for MockDevices {
    fn device_by_mac(&self, mac: Mac) -> Option<Device> {
        self.by_mac.lock().get(&mac).cloned()
    }

    fn device_by_ip(&self, ip: Ipv4Addr) -> Option<Device> {
        self.by_mac
            .lock()
            .values()
            .find(|d| d.ips.contains(&ip))
            .cloned()
    }
}
