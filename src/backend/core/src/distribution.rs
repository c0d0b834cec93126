//! Which device hosts which component instance.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::container::InstanceId;

/// Identifier of a device (browser context) taking part in an application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Placement oracle consulted to classify peers as local or remote.
pub trait DistributionManager: Send + Sync {
    fn local_device(&self) -> &DeviceId;

    fn host_of(&self, instance: &InstanceId) -> Option<DeviceId>;

    /// Whether the instance is placed on this device.
    fn is_local(&self, instance: &InstanceId) -> bool {
        self.host_of(instance).as_ref() == Some(self.local_device())
    }

    fn is_known(&self, instance: &InstanceId) -> bool {
        self.host_of(instance).is_some()
    }
}

/// Placement table updated explicitly, e.g. from runtime requests.
#[derive(Debug)]
pub struct StaticDistribution {
    local: DeviceId,
    placement: RwLock<HashMap<InstanceId, DeviceId>>,
}

impl StaticDistribution {
    pub fn new(local: impl Into<String>) -> Self {
        Self {
            local: DeviceId::new(local),
            placement: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_placement(self, instance: impl Into<InstanceId>, device: impl Into<String>) -> Self {
        self.place(instance, device);
        self
    }

    /// Record (or move) an instance placement.
    pub fn place(&self, instance: impl Into<InstanceId>, device: impl Into<String>) {
        self.placement.write().insert(instance.into(), DeviceId::new(device));
    }

    pub fn forget(&self, instance: &InstanceId) -> Option<DeviceId> {
        self.placement.write().remove(instance)
    }

    /// Instances placed on `device`.
    pub fn instances_on(&self, device: &DeviceId) -> Vec<InstanceId> {
        let mut ids: Vec<InstanceId> = self
            .placement
            .read()
            .iter()
            .filter(|(_, d)| *d == device)
            .map(|(i, _)| i.clone())
            .collect();
        ids.sort();
        ids
    }
}

impl DistributionManager for StaticDistribution {
    fn local_device(&self) -> &DeviceId {
        &self.local
    }

    fn host_of(&self, instance: &InstanceId) -> Option<DeviceId> {
        self.placement.read().get(instance).cloned()
    }
}
