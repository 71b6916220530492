//! State snapshot ingestor
//!
//! Accepts telemetry frames delivered by the session layer and appends
//! them to the audit store. Failures are logged; frames are not
//! retried.

use chrono::Utc;

use robohub_core::PayloadMap;
use robohub_persistence::AuditStore;

pub struct SnapshotIngestor {
    store: AuditStore,
}

impl SnapshotIngestor {
    pub fn new(store: AuditStore) -> Self {
        Self { store }
    }

    /// Append one snapshot, stamped with the arrival time.
    pub async fn handle_status(&self, device_id: &str, device_type: &str, payload: PayloadMap) {
        let result = self
            .store
            .insert_state_snapshot(
                device_id.to_string(),
                device_type.to_string(),
                payload,
                Utc::now(),
            )
            .await;
        if let Err(e) = result {
            tracing::error!(device_id, error = %e, "state snapshot write failed");
        }
    }
}
