//! Command router
//!
//! Turns an operator or pipeline intent into per-device command
//! frames, correlates acknowledgements by command id, and keeps the
//! persisted lifecycle record moving forward. The pending-ack map is a
//! single mutex guarding bounded-time updates only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use robohub_core::{AckStatus, CommandRecord, CommandStatus, PayloadMap, ServerFrame};
use robohub_persistence::{AuditStore, CommandUpdate, PersistenceError};

use crate::sessions::{SendOutcome, SessionManager};

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("audit store error: {0}")]
    Store(#[from] PersistenceError),
}

struct PendingAck {
    expected: u32,
    received: u32,
    succeeded: u32,
    any_error: bool,
    deadline: Instant,
    last_response: Option<Value>,
}

/// Routes commands addressed by device type and correlates acks.
pub struct CommandRouter {
    sessions: Arc<SessionManager>,
    store: AuditStore,
    pending: Mutex<HashMap<String, PendingAck>>,
    ack_timeout: Duration,
}

impl CommandRouter {
    pub fn new(sessions: Arc<SessionManager>, store: AuditStore, ack_timeout: Duration) -> Self {
        Self {
            sessions,
            store,
            pending: Mutex::new(HashMap::new()),
            ack_timeout,
        }
    }

    /// Dispatch a command to every online session of `device_type`.
    ///
    /// Only successful enqueues count toward `target_device_count`, so
    /// the ack expectation matches the fan-out that actually happened.
    pub async fn dispatch(
        &self,
        device_type: &str,
        command_name: &str,
        payload: PayloadMap,
        ack_timeout: Option<Duration>,
    ) -> Result<CommandRecord, RouterError> {
        let command_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        self.store
            .create_command(
                command_id.clone(),
                device_type.to_string(),
                command_name.to_string(),
                payload.clone(),
                now,
            )
            .await?;

        let frame = ServerFrame::Command {
            command_id: command_id.clone(),
            command_name: command_name.to_string(),
            payload,
        };
        let outcomes = self.sessions.send_to_type(device_type, &frame);
        let sent_count = outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == SendOutcome::Sent)
            .count() as u32;

        for (device_id, outcome) in &outcomes {
            if *outcome != SendOutcome::Sent {
                tracing::warn!(
                    command_id = %command_id,
                    device_id = %device_id,
                    outcome = ?outcome,
                    "command frame not enqueued"
                );
            }
        }

        if sent_count == 0 {
            tracing::info!(command_id = %command_id, device_type, "no targets for command");
            let record = self
                .store
                .update_command_status(
                    command_id,
                    CommandStatus::NoTargets,
                    CommandUpdate {
                        completed_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await?;
            return Ok(record);
        }

        let record = self
            .store
            .update_command_status(
                command_id.clone(),
                CommandStatus::Sent,
                CommandUpdate {
                    executed_at: Some(Utc::now()),
                    target_device_count: Some(sent_count),
                    ..Default::default()
                },
            )
            .await?;

        let deadline = Instant::now() + ack_timeout.unwrap_or(self.ack_timeout);
        self.pending.lock().insert(
            command_id.clone(),
            PendingAck {
                expected: sent_count,
                received: 0,
                succeeded: 0,
                any_error: false,
                deadline,
                last_response: None,
            },
        );

        tracing::info!(
            command_id = %command_id,
            device_type,
            command_name,
            targets = sent_count,
            "command dispatched"
        );
        Ok(record)
    }

    /// Handle a `command_ack` frame delivered by a session.
    ///
    /// Acks for unknown or already-completed commands are logged and
    /// dropped.
    pub async fn handle_ack(
        &self,
        device_id: &str,
        command_id: &str,
        status: AckStatus,
        response: Option<Value>,
    ) {
        let completion = {
            let mut pending = self.pending.lock();
            let Some(entry) = pending.get_mut(command_id) else {
                tracing::warn!(device_id, command_id, "ack for unknown or completed command");
                return;
            };

            entry.received += 1;
            match status {
                AckStatus::Success => entry.succeeded += 1,
                AckStatus::Error => entry.any_error = true,
            }
            if response.is_some() {
                entry.last_response = response;
            }

            if entry.received >= entry.expected {
                pending.remove(command_id)
            } else {
                None
            }
        };

        tracing::debug!(device_id, command_id, status = status.as_str(), "command ack");

        if let Some(entry) = completion {
            let final_status = if entry.any_error {
                CommandStatus::AckError
            } else {
                CommandStatus::AckSuccess
            };
            let result = self
                .store
                .update_command_status(
                    command_id.to_string(),
                    final_status,
                    CommandUpdate {
                        completed_at: Some(Utc::now()),
                        success_count: Some(entry.succeeded),
                        response: entry.last_response,
                        ..Default::default()
                    },
                )
                .await;
            if let Err(e) = result {
                tracing::error!(command_id, error = %e, "command completion write failed");
            }
        }
    }

    /// Move pending entries past their deadline to the `timeout`
    /// terminal status. Invoked from the reaper tick.
    pub async fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<(String, PendingAck)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        for (command_id, entry) in expired {
            tracing::warn!(
                command_id = %command_id,
                received = entry.received,
                expected = entry.expected,
                "command ack deadline passed"
            );
            let result = self
                .store
                .update_command_status(
                    command_id.clone(),
                    CommandStatus::Timeout,
                    CommandUpdate {
                        completed_at: Some(Utc::now()),
                        success_count: Some(entry.succeeded),
                        ..Default::default()
                    },
                )
                .await;
            if let Err(e) = result {
                tracing::error!(command_id = %command_id, error = %e, "timeout write failed");
            }
        }
    }

    /// Number of commands still awaiting acknowledgements.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<SessionManager>, AuditStore, CommandRouter) {
        let sessions = Arc::new(SessionManager::new(4));
        let store = AuditStore::open_in_memory().unwrap();
        let router = CommandRouter::new(
            Arc::clone(&sessions),
            store.clone(),
            Duration::from_secs(30),
        );
        (sessions, store, router)
    }

    #[tokio::test]
    async fn test_dispatch_without_targets() {
        let (_sessions, _store, router) = setup();
        let record = router
            .dispatch("servo", "handsup", PayloadMap::new(), None)
            .await
            .unwrap();
        assert_eq!(record.status, CommandStatus::NoTargets);
        assert_eq!(record.target_device_count, 0);
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_and_ack_success() {
        let (sessions, store, router) = setup();
        let mut accepted = sessions.accept("wheelcontroller").unwrap();
        accepted.session.set_device_type("wheel");

        let record = router
            .dispatch("wheel", "forward", PayloadMap::new(), None)
            .await
            .unwrap();
        assert_eq!(record.status, CommandStatus::Sent);
        assert_eq!(record.target_device_count, 1);
        assert!(record.executed_at.is_some());

        let frame = accepted.outbound_rx.recv().await.unwrap();
        let command_id = match frame {
            ServerFrame::Command {
                command_id,
                command_name,
                ..
            } => {
                assert_eq!(command_name, "forward");
                command_id
            }
            other => panic!("unexpected frame: {other:?}"),
        };

        router
            .handle_ack("wheelcontroller", &command_id, AckStatus::Success, None)
            .await;

        let stored = store.get_command(command_id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommandStatus::AckSuccess);
        assert_eq!(stored.success_count, 1);
        assert!(stored.completed_at.is_some());
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_any_error_ack_completes_as_error() {
        let (sessions, store, router) = setup();
        let a = sessions.accept("w1").unwrap();
        let b = sessions.accept("w2").unwrap();
        a.session.set_device_type("wheel");
        b.session.set_device_type("wheel");

        let record = router
            .dispatch("wheel", "forward", PayloadMap::new(), None)
            .await
            .unwrap();
        assert_eq!(record.target_device_count, 2);

        router
            .handle_ack("w1", &record.command_id, AckStatus::Success, None)
            .await;
        assert_eq!(router.pending_count(), 1);
        router
            .handle_ack(
                "w2",
                &record.command_id,
                AckStatus::Error,
                Some(serde_json::json!({"code": "motor_stall"})),
            )
            .await;

        let stored = store.get_command(record.command_id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommandStatus::AckError);
        assert_eq!(stored.success_count, 1);
        assert_eq!(stored.target_device_count, 2);
        assert!(stored.response.is_some());
    }

    #[tokio::test]
    async fn test_unknown_ack_is_dropped() {
        let (_sessions, _store, router) = setup();
        router
            .handle_ack("wheelcontroller", "ghost", AckStatus::Success, None)
            .await;
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_sweep_and_late_ack() {
        let (sessions, store, router) = setup();
        let accepted = sessions.accept("wheelcontroller").unwrap();
        accepted.session.set_device_type("wheel");

        let record = router
            .dispatch(
                "wheel",
                "forward",
                PayloadMap::new(),
                Some(Duration::ZERO),
            )
            .await
            .unwrap();

        router.sweep_expired().await;
        let stored = store
            .get_command(record.command_id.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, CommandStatus::Timeout);
        assert_eq!(router.pending_count(), 0);

        // A late ack must not resurrect the record.
        router
            .handle_ack("wheelcontroller", &record.command_id, AckStatus::Success, None)
            .await;
        let stored = store.get_command(record.command_id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommandStatus::Timeout);
    }

    #[tokio::test]
    async fn test_fanout_counts_only_successful_enqueues() {
        let sessions = Arc::new(SessionManager::new(1));
        let store = AuditStore::open_in_memory().unwrap();
        let router = CommandRouter::new(
            Arc::clone(&sessions),
            store.clone(),
            Duration::from_secs(30),
        );

        let full = sessions.accept("w1").unwrap();
        let open = sessions.accept("w2").unwrap();
        full.session.set_device_type("wheel");
        open.session.set_device_type("wheel");

        // Saturate w1's queue so its enqueue fails during fan-out.
        assert_eq!(
            sessions.send(
                "w1",
                ServerFrame::Command {
                    command_id: "filler".into(),
                    command_name: "noop".into(),
                    payload: PayloadMap::new(),
                }
            ),
            SendOutcome::Sent
        );

        let record = router
            .dispatch("wheel", "forward", PayloadMap::new(), None)
            .await
            .unwrap();
        assert_eq!(record.status, CommandStatus::Sent);
        assert_eq!(record.target_device_count, 1);

        // One ack from the reachable device completes the command.
        router
            .handle_ack("w2", &record.command_id, AckStatus::Success, None)
            .await;
        let stored = store.get_command(record.command_id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommandStatus::AckSuccess);
    }
}
