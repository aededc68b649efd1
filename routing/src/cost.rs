// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Link cost functions, one per service class.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::info;

use net::{Link, ServiceClass};

/// A link metric for the path computation.
///
/// Costs must be positive and finite; implementations substitute a
/// large sentinel for links they have no data on.
pub trait CostFunction: Send + Sync {
    fn cost(&self, link: &Link) -> f64;
}

/// Unit cost per hop.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantCost;

impl CostFunction for ConstantCost {
    fn cost(&self, _link: &Link) -> f64 {
        1.0
    }
}

/// Cost functions registered per service class.
///
/// [`ServiceClass::Constant`] is pre-registered; measurement
/// collaborators plug the other classes in at runtime.
pub struct CostFunctionMap {
    inner: Mutex<AHashMap<ServiceClass, Arc<dyn CostFunction>>>,
}

impl Default for CostFunctionMap {
    fn default() -> Self {
        CostFunctionMap::new()
    }
}

impl CostFunctionMap {
    #[must_use]
    pub fn new() -> CostFunctionMap {
        let mut map: AHashMap<ServiceClass, Arc<dyn CostFunction>> = AHashMap::new();
        map.insert(ServiceClass::Constant, Arc::new(ConstantCost));
        CostFunctionMap {
            inner: Mutex::new(map),
        }
    }

    pub fn register(&self, class: ServiceClass, function: Arc<dyn CostFunction>) {
        info!("cost function for {class} was registered");
        self.inner.lock().insert(class, function);
    }

    #[must_use]
    pub fn contains(&self, class: ServiceClass) -> bool {
        self.inner.lock().contains_key(&class)
    }

    #[must_use]
    pub fn get(&self, class: ServiceClass) -> Option<Arc<dyn CostFunction>> {
        self.inner.lock().get(&class).cloned()
    }

    /// The registered classes, sorted.
    #[must_use]
    pub fn available(&self) -> Vec<ServiceClass> {
        let mut classes: Vec<ServiceClass> = self.inner.lock().keys().copied().collect();
        classes.sort_unstable();
        classes
    }
}

impl std::fmt::Debug for CostFunctionMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostFunctionMap")
            .field("registered", &self.available())
            .finish()
    }
}
