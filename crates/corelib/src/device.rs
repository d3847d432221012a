//! Device handles and the registry that resolves them by id.

use crate::error::{Error, Result};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// A configured device. Channels may take devices as construction arguments.
pub trait Device: Send + Sync + 'static {
    /// Process-unique id, stable across tiers.
    fn unique_id(&self) -> &str;

    /// Device kind, e.g. `"thermostat"`.
    fn kind(&self) -> &str;
}

/// Shared handle to a device.
pub type DeviceHandle = Arc<dyn Device>;

impl fmt::Debug for dyn Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("unique_id", &self.unique_id())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Resolves device ids to handles.
pub trait DeviceRegistry: Send + Sync + 'static {
    /// Fails with [`Error::UnknownDevice`] if the id is not registered.
    fn get_device(&self, unique_id: &str) -> Result<DeviceHandle>;
}

/// In-memory device registry.
#[derive(Default)]
pub struct DeviceDatabase {
    devices: DashMap<String, DeviceHandle>,
}

impl DeviceDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device, replacing any previous one with the same id.
    pub fn add(&self, device: DeviceHandle) {
        self.devices.insert(device.unique_id().to_string(), device);
    }

    pub fn remove(&self, unique_id: &str) -> Option<DeviceHandle> {
        self.devices.remove(unique_id).map(|(_, device)| device)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl DeviceRegistry for DeviceDatabase {
    fn get_device(&self, unique_id: &str) -> Result<DeviceHandle> {
        self.devices
            .get(unique_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::UnknownDevice(unique_id.to_string()))
    }
}

/// Plain device record: an id and a kind, nothing else.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimpleDevice {
    unique_id: String,
    kind: String,
}

impl SimpleDevice {
    pub fn new(unique_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            kind: kind.into(),
        }
    }
}

impl Device for SimpleDevice {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn kind(&self) -> &str {
        &self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_device() {
        let db = DeviceDatabase::new();
        let device: DeviceHandle = Arc::new(SimpleDevice::new("thermostat-1", "thermostat"));
        db.add(Arc::clone(&device));

        let found = db.get_device("thermostat-1").unwrap();
        assert!(Arc::ptr_eq(&found, &device));
        assert_eq!(found.kind(), "thermostat");
    }

    #[test]
    fn test_unknown_device() {
        let db = DeviceDatabase::new();
        assert_eq!(
            db.get_device("nope").unwrap_err(),
            Error::UnknownDevice("nope".to_string())
        );
        assert!(db.is_empty());
    }
}
