//! Device registry
//!
//! The authoritative in-memory map of known devices and their
//! liveness. Map operations run under one coarse mutex and return
//! quickly; audit writes happen after the lock is released and never
//! roll back registry state on failure.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use robohub_core::{ConnectionEventKind, PayloadMap};
use robohub_persistence::AuditStore;

/// Why a device left the online set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineReason {
    /// The session channel closed.
    Disconnected,
    /// The reaper found the heartbeat stale.
    Timeout,
}

impl OfflineReason {
    fn event_kind(&self) -> ConnectionEventKind {
        match self {
            Self::Disconnected => ConnectionEventKind::Disconnected,
            Self::Timeout => ConnectionEventKind::Timeout,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Timeout => "timeout",
        }
    }
}

/// In-memory device entry.
#[derive(Debug, Clone)]
pub struct Device {
    pub device_id: String,
    pub device_type: String,
    pub is_online: bool,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub metadata: PayloadMap,
}

/// Authoritative device-liveness map.
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, Device>>,
    store: AuditStore,
}

impl DeviceRegistry {
    pub fn new(store: AuditStore) -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Create or reactivate a device entry.
    ///
    /// Emits `connected` for a new or previously-offline entry and
    /// `reregistered` when the device was already online.
    pub async fn register(
        &self,
        device_id: &str,
        device_type: &str,
        metadata: PayloadMap,
    ) -> Device {
        let now = Utc::now();
        let (device, kind) = {
            let mut devices = self.devices.lock();
            match devices.get_mut(device_id) {
                None => {
                    let device = Device {
                        device_id: device_id.to_string(),
                        device_type: device_type.to_string(),
                        is_online: true,
                        connected_at: now,
                        last_heartbeat: now,
                        disconnected_at: None,
                        metadata,
                    };
                    devices.insert(device_id.to_string(), device.clone());
                    (device, ConnectionEventKind::Connected)
                }
                Some(existing) => {
                    let kind = if existing.is_online {
                        ConnectionEventKind::Reregistered
                    } else {
                        ConnectionEventKind::Connected
                    };
                    existing.device_type = device_type.to_string();
                    existing.is_online = true;
                    existing.last_heartbeat = now;
                    existing.disconnected_at = None;
                    existing.metadata = metadata;
                    (existing.clone(), kind)
                }
            }
        };

        self.persist_device(&device).await;
        self.persist_event(&device, kind).await;

        tracing::info!(device_id, device_type, event = kind.as_str(), "device registered");
        device
    }

    /// Metadata refresh for a device that already registered on the
    /// current session. No connection event is emitted.
    pub async fn refresh_metadata(
        &self,
        device_id: &str,
        device_type: &str,
        metadata: PayloadMap,
    ) {
        let device = {
            let mut devices = self.devices.lock();
            match devices.get_mut(device_id) {
                None => return,
                Some(existing) => {
                    existing.device_type = device_type.to_string();
                    existing.metadata = metadata;
                    existing.last_heartbeat = Utc::now();
                    existing.clone()
                }
            }
        };
        self.persist_device(&device).await;
        tracing::debug!(device_id, "device metadata refreshed");
    }

    /// Update `last_heartbeat` to now. Called on every inbound frame.
    pub fn touch(&self, device_id: &str) {
        let mut devices = self.devices.lock();
        if let Some(device) = devices.get_mut(device_id) {
            device.last_heartbeat = Utc::now();
        }
    }

    /// Move a device to the offline set and record the event.
    ///
    /// Returns the updated entry, or `None` when the device was
    /// unknown or already offline (no duplicate events).
    pub async fn mark_offline(&self, device_id: &str, reason: OfflineReason) -> Option<Device> {
        let device = {
            let mut devices = self.devices.lock();
            let device = devices.get_mut(device_id)?;
            if !device.is_online {
                return None;
            }
            device.is_online = false;
            device.disconnected_at = Some(Utc::now());
            device.clone()
        };

        self.persist_device(&device).await;
        self.persist_event(&device, reason.event_kind()).await;

        tracing::info!(device_id, reason = reason.as_str(), "device offline");
        Some(device)
    }

    pub fn get(&self, device_id: &str) -> Option<Device> {
        self.devices.lock().get(device_id).cloned()
    }

    pub fn list(&self) -> Vec<Device> {
        self.devices.lock().values().cloned().collect()
    }

    pub fn list_by_type(&self, device_type: &str) -> Vec<Device> {
        self.devices
            .lock()
            .values()
            .filter(|d| d.device_type == device_type && d.is_online)
            .cloned()
            .collect()
    }

    /// Online devices whose last heartbeat is older than `timeout`.
    pub fn stale_devices(&self, timeout: Duration) -> Vec<String> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::seconds(90));
        self.devices
            .lock()
            .values()
            .filter(|d| d.is_online && d.last_heartbeat < cutoff)
            .map(|d| d.device_id.clone())
            .collect()
    }

    async fn persist_device(&self, device: &Device) {
        let result = self
            .store
            .upsert_device(
                device.device_id.clone(),
                device.device_type.clone(),
                device.is_online,
                device.last_heartbeat,
                Some(device.connected_at),
                device.disconnected_at,
                device.metadata.clone(),
            )
            .await;
        if let Err(e) = result {
            tracing::error!(device_id = %device.device_id, error = %e, "device upsert failed");
        }
    }

    async fn persist_event(&self, device: &Device, kind: ConnectionEventKind) {
        let result = self
            .store
            .insert_connection_event(
                device.device_id.clone(),
                device.device_type.clone(),
                kind,
                Utc::now(),
                None,
            )
            .await;
        if let Err(e) = result {
            tracing::error!(device_id = %device.device_id, error = %e, "connection event write failed");
        }
    }
}
