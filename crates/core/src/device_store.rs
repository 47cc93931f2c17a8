//! Persistence boundary for `DeviceRecord`s (§3). The orchestrator and
//! registration flow only depend on this trait; callers plug in whatever
//! backing store they have (a file, a database, memory for tests/demos).

use remoteplay_protocol::{DeviceRecord, DeviceStatus};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceStoreError {
    #[error("no device record for id {0}")]
    NotFound(String),
}

pub trait DeviceStore: Send + Sync {
    fn get(&self, device_id: &str) -> Result<DeviceRecord, DeviceStoreError>;
    fn put(&self, record: DeviceRecord) -> Result<(), DeviceStoreError>;
    fn set_status(&self, device_id: &str, status: DeviceStatus) -> Result<(), DeviceStoreError>;
}

/// In-memory store. Used by the demo binary and by tests; a real deployment
/// would back this with a file or database but the trait above is all the
/// rest of the crate depends on.
#[derive(Default)]
pub struct InMemoryDeviceStore {
    records: RwLock<HashMap<String, DeviceRecord>>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceStore for InMemoryDeviceStore {
    fn get(&self, device_id: &str) -> Result<DeviceRecord, DeviceStoreError> {
        self.records
            .read()
            .unwrap()
            .get(device_id)
            .cloned()
            .ok_or_else(|| DeviceStoreError::NotFound(device_id.to_string()))
    }

    fn put(&self, record: DeviceRecord) -> Result<(), DeviceStoreError> {
        self.records
            .write()
            .unwrap()
            .insert(record.device_id.clone(), record);
        Ok(())
    }

    fn set_status(&self, device_id: &str, status: DeviceStatus) -> Result<(), DeviceStoreError> {
        let mut records = self.records.write().unwrap();
        let record = records
            .get_mut(device_id)
            .ok_or_else(|| DeviceStoreError::NotFound(device_id.to_string()))?;
        record.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remoteplay_protocol::HostType;

    #[test]
    fn put_then_get_roundtrips() {
        let store = InMemoryDeviceStore::new();
        let record = DeviceRecord::new("dev-1", "host-1", HostType::PS5);
        store.put(record.clone()).unwrap();
        assert_eq!(store.get("dev-1").unwrap(), record);
    }

    #[test]
    fn get_missing_device_errors() {
        let store = InMemoryDeviceStore::new();
        assert!(matches!(store.get("nope"), Err(DeviceStoreError::NotFound(_))));
    }

    #[test]
    fn set_status_updates_existing_record() {
        let store = InMemoryDeviceStore::new();
        store
            .put(DeviceRecord::new("dev-1", "host-1", HostType::PS4))
            .unwrap();
        store.set_status("dev-1", DeviceStatus::Online).unwrap();
        assert_eq!(store.get("dev-1").unwrap().status, DeviceStatus::Online);
    }

    #[test]
    fn set_status_on_missing_device_errors() {
        let store = InMemoryDeviceStore::new();
        assert!(matches!(
            store.set_status("nope", DeviceStatus::Online),
            Err(DeviceStoreError::NotFound(_))
        ));
    }
}
