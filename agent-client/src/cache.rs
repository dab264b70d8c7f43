//! Thread-safe cache of the last probed device metadata

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::types::{ComponentDescriptor, DataItemDescriptor, DeviceDescriptor};

/// Index over one device's metadata.
#[derive(Debug)]
struct DeviceEntry {
    device: DeviceDescriptor,
    data_items: HashMap<String, DataItemDescriptor>,
    components: HashMap<String, ComponentDescriptor>,
}

impl DeviceEntry {
    fn new(device: DeviceDescriptor) -> Self {
        let data_items = device
            .data_items
            .iter()
            .map(|d| (d.id.clone(), d.clone()))
            .collect();
        let components = device
            .components
            .iter()
            .map(|c| (c.id.clone(), c.clone()))
            .collect();

        Self {
            device,
            data_items,
            components,
        }
    }
}

/// Holds the devices from the most recent probe.
///
/// `update` swaps the whole set under one write lock; lookups take a read lock
/// and return copies, so no caller ever holds the lock across an await point.
/// A miss is `None`, never an error.
#[derive(Debug, Default)]
pub struct MetadataCache {
    devices: RwLock<HashMap<String, DeviceEntry>>,
}

impl MetadataCache {
    /// Create a new empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the full device set with `devices`.
    pub fn update(&self, devices: &[DeviceDescriptor]) {
        let next: HashMap<String, DeviceEntry> = devices
            .iter()
            .map(|d| (d.uuid.clone(), DeviceEntry::new(d.clone())))
            .collect();

        let mut current = self.devices.write();
        *current = next;
        tracing::debug!("Metadata cache updated with {} devices", current.len());
    }

    pub fn resolve_data_item(&self, device_uuid: &str, data_item_id: &str) -> Option<DataItemDescriptor> {
        let devices = self.devices.read();
        devices.get(device_uuid)?.data_items.get(data_item_id).cloned()
    }

    pub fn resolve_component(&self, device_uuid: &str, component_id: &str) -> Option<ComponentDescriptor> {
        let devices = self.devices.read();
        devices.get(device_uuid)?.components.get(component_id).cloned()
    }

    pub fn device(&self, device_uuid: &str) -> Option<DeviceDescriptor> {
        self.devices
            .read()
            .get(device_uuid)
            .map(|entry| entry.device.clone())
    }

    /// All cached devices, ordered by uuid
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        let mut devices: Vec<DeviceDescriptor> = self
            .devices
            .read()
            .values()
            .map(|entry| entry.device.clone())
            .collect();
        devices.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        devices
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    pub fn clear(&self) {
        self.devices.write().clear();
    }
}
