//! Audit store operations
//!
//! A single `rusqlite::Connection` guarded by a mutex; every operation
//! runs on the blocking pool so async callers never stall the runtime.
//! Writers serialise at this boundary.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use robohub_core::{
    AudioTranscript, CommandRecord, CommandStatus, ConnectionEvent, ConnectionEventKind,
    DeviceRecord, PayloadMap, StateSnapshot,
};

use crate::error::PersistenceError;
use crate::schema;

/// Read queries never return more rows than this.
const MAX_QUERY_LIMIT: usize = 1000;

/// Fields optionally set alongside a command status transition.
#[derive(Debug, Default, Clone)]
pub struct CommandUpdate {
    pub executed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub response: Option<Value>,
    pub success_count: Option<u32>,
    pub target_device_count: Option<u32>,
}

/// Transcript row about to be appended.
#[derive(Debug, Clone)]
pub struct NewTranscript {
    pub device_id: String,
    pub raw_text: String,
    pub normalized_text: String,
    pub prefix_ok: bool,
    pub command_name: Option<String>,
    pub confidence: f32,
    pub manual: bool,
    pub level: Option<i64>,
    pub threshold: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

/// Durable audit store backed by one SQLite file per process.
#[derive(Clone)]
pub struct AuditStore {
    conn: Arc<Mutex<Connection>>,
}

impl AuditStore {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn open(path: &str) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path).map_err(|e| PersistenceError::Open(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| PersistenceError::Open(e.to_string()))?;
        schema::ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn =
            Connection::open_in_memory().map_err(|e| PersistenceError::Open(e.to_string()))?;
        schema::ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, PersistenceError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| PersistenceError::Task(e.to_string()))?
    }

    // ----- devices -------------------------------------------------------

    /// Idempotent insert-or-replace of a device row.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_device(
        &self,
        device_id: String,
        device_type: String,
        is_online: bool,
        last_heartbeat: DateTime<Utc>,
        connected_at: Option<DateTime<Utc>>,
        disconnected_at: Option<DateTime<Utc>>,
        metadata: PayloadMap,
    ) -> Result<(), PersistenceError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO devices
                    (device_id, device_type, is_online, last_heartbeat,
                     connected_at, disconnected_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(device_id) DO UPDATE SET
                    device_type = excluded.device_type,
                    is_online = excluded.is_online,
                    last_heartbeat = excluded.last_heartbeat,
                    connected_at = COALESCE(excluded.connected_at, devices.connected_at),
                    disconnected_at = excluded.disconnected_at,
                    metadata = excluded.metadata",
                params![
                    device_id,
                    device_type,
                    is_online as i64,
                    to_ts(&last_heartbeat),
                    connected_at.as_ref().map(to_ts),
                    disconnected_at.as_ref().map(to_ts),
                    map_to_json(&metadata),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Flip a device row offline and stamp the disconnect time.
    pub async fn mark_device_offline(
        &self,
        device_id: String,
        disconnected_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE devices SET is_online = 0, disconnected_at = ?2 WHERE device_id = ?1",
                params![device_id, to_ts(&disconnected_at)],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_device(
        &self,
        device_id: String,
    ) -> Result<Option<DeviceRecord>, PersistenceError> {
        self.call(move |conn| {
            let record = conn
                .query_row(
                    "SELECT device_id, device_type, is_online, last_heartbeat,
                            connected_at, disconnected_at, metadata
                     FROM devices WHERE device_id = ?1",
                    params![device_id],
                    row_to_device,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceRecord>, PersistenceError> {
        self.call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT device_id, device_type, is_online, last_heartbeat,
                        connected_at, disconnected_at, metadata
                 FROM devices ORDER BY device_id",
            )?;
            let rows = stmt
                .query_map([], row_to_device)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    // ----- state snapshots ----------------------------------------------

    pub async fn insert_state_snapshot(
        &self,
        device_id: String,
        device_type: String,
        payload: PayloadMap,
        timestamp: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO device_state_snapshots (device_id, device_type, payload, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![device_id, device_type, map_to_json(&payload), to_ts(&timestamp)],
            )?;
            Ok(())
        })
        .await
    }

    /// Latest-N snapshots for a device, newest first.
    pub async fn state_history(
        &self,
        device_id: String,
        limit: usize,
    ) -> Result<Vec<StateSnapshot>, PersistenceError> {
        let limit = clamp_limit(limit);
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, device_id, device_type, payload, timestamp
                 FROM device_state_snapshots
                 WHERE device_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![device_id, limit], row_to_snapshot)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    // ----- commands ------------------------------------------------------

    /// Persist a fresh command record in the `created` state.
    pub async fn create_command(
        &self,
        command_id: String,
        device_type: String,
        command_name: String,
        payload: PayloadMap,
        created_at: DateTime<Utc>,
    ) -> Result<CommandRecord, PersistenceError> {
        let record = CommandRecord {
            command_id: command_id.clone(),
            device_type: device_type.clone(),
            command_name: command_name.clone(),
            payload: payload.clone(),
            status: CommandStatus::Created,
            created_at,
            executed_at: None,
            completed_at: None,
            response: None,
            target_device_count: 0,
            success_count: 0,
        };
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO command_logs
                    (command_id, device_type, command_name, payload, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    command_id,
                    device_type,
                    command_name,
                    map_to_json(&payload),
                    CommandStatus::Created.as_str(),
                    to_ts(&created_at),
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(record)
    }

    /// Apply a forward status transition; a regressing transition is
    /// ignored with a warning and the stored record is returned as-is.
    pub async fn update_command_status(
        &self,
        command_id: String,
        new_status: CommandStatus,
        update: CommandUpdate,
    ) -> Result<CommandRecord, PersistenceError> {
        self.call(move |conn| {
            let current = conn
                .query_row(
                    "SELECT command_id, device_type, command_name, payload, status,
                            created_at, executed_at, completed_at, response,
                            target_device_count, success_count
                     FROM command_logs WHERE command_id = ?1",
                    params![command_id],
                    row_to_command,
                )
                .optional()?
                .ok_or_else(|| PersistenceError::CommandNotFound(command_id.clone()))?;

            if !current.status.can_transition_to(new_status) {
                tracing::warn!(
                    command_id = %command_id,
                    from = %current.status,
                    to = %new_status,
                    "ignoring non-forward command transition"
                );
                return Ok(current);
            }

            conn.execute(
                "UPDATE command_logs SET
                    status = ?2,
                    executed_at = COALESCE(?3, executed_at),
                    completed_at = COALESCE(?4, completed_at),
                    response = COALESCE(?5, response),
                    success_count = COALESCE(?6, success_count),
                    target_device_count = COALESCE(?7, target_device_count)
                 WHERE command_id = ?1",
                params![
                    command_id,
                    new_status.as_str(),
                    update.executed_at.as_ref().map(to_ts),
                    update.completed_at.as_ref().map(to_ts),
                    update.response.as_ref().map(|v| v.to_string()),
                    update.success_count.map(|c| c as i64),
                    update.target_device_count.map(|c| c as i64),
                ],
            )?;

            let updated = conn.query_row(
                "SELECT command_id, device_type, command_name, payload, status,
                        created_at, executed_at, completed_at, response,
                        target_device_count, success_count
                 FROM command_logs WHERE command_id = ?1",
                params![command_id],
                row_to_command,
            )?;
            Ok(updated)
        })
        .await
    }

    pub async fn get_command(
        &self,
        command_id: String,
    ) -> Result<Option<CommandRecord>, PersistenceError> {
        self.call(move |conn| {
            let record = conn
                .query_row(
                    "SELECT command_id, device_type, command_name, payload, status,
                            created_at, executed_at, completed_at, response,
                            target_device_count, success_count
                     FROM command_logs WHERE command_id = ?1",
                    params![command_id],
                    row_to_command,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    /// Latest-N command records, optionally filtered by status or type.
    pub async fn command_logs(
        &self,
        status: Option<CommandStatus>,
        device_type: Option<String>,
        limit: usize,
    ) -> Result<Vec<CommandRecord>, PersistenceError> {
        let limit = clamp_limit(limit);
        self.call(move |conn| {
            let base = "SELECT command_id, device_type, command_name, payload, status,
                               created_at, executed_at, completed_at, response,
                               target_device_count, success_count
                        FROM command_logs";
            let rows = if let Some(status) = status {
                let mut stmt = conn.prepare(&format!(
                    "{base} WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2"
                ))?;
                let result = stmt
                    .query_map(params![status.as_str(), limit], row_to_command)?
                    .collect::<Result<Vec<_>, _>>()?;
                result
            } else if let Some(device_type) = device_type {
                let mut stmt = conn.prepare(&format!(
                    "{base} WHERE device_type = ?1 ORDER BY created_at DESC LIMIT ?2"
                ))?;
                let result = stmt
                    .query_map(params![device_type, limit], row_to_command)?
                    .collect::<Result<Vec<_>, _>>()?;
                result
            } else {
                let mut stmt =
                    conn.prepare(&format!("{base} ORDER BY created_at DESC LIMIT ?1"))?;
                let result = stmt
                    .query_map(params![limit], row_to_command)?
                    .collect::<Result<Vec<_>, _>>()?;
                result
            };
            Ok(rows)
        })
        .await
    }

    // ----- connection events --------------------------------------------

    pub async fn insert_connection_event(
        &self,
        device_id: String,
        device_type: String,
        kind: ConnectionEventKind,
        timestamp: DateTime<Utc>,
        details: Option<Value>,
    ) -> Result<(), PersistenceError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO device_connection_logs (device_id, device_type, event, timestamp, details)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    device_id,
                    device_type,
                    kind.as_str(),
                    to_ts(&timestamp),
                    details.as_ref().map(|v| v.to_string()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn connection_history(
        &self,
        device_id: String,
        limit: usize,
    ) -> Result<Vec<ConnectionEvent>, PersistenceError> {
        let limit = clamp_limit(limit);
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, device_id, device_type, event, timestamp, details
                 FROM device_connection_logs
                 WHERE device_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![device_id, limit], row_to_event)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    // ----- transcripts ---------------------------------------------------

    pub async fn insert_transcript(
        &self,
        transcript: NewTranscript,
    ) -> Result<(), PersistenceError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO audio_transcripts
                    (device_id, raw_text, normalized_text, prefix_ok, command_name,
                     confidence, manual, level, threshold, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    transcript.device_id,
                    transcript.raw_text,
                    transcript.normalized_text,
                    transcript.prefix_ok as i64,
                    transcript.command_name,
                    transcript.confidence as f64,
                    transcript.manual as i64,
                    transcript.level,
                    transcript.threshold,
                    to_ts(&transcript.timestamp),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn transcripts(&self, limit: usize) -> Result<Vec<AudioTranscript>, PersistenceError> {
        let limit = clamp_limit(limit);
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, device_id, raw_text, normalized_text, prefix_ok, command_name,
                        confidence, manual, level, threshold, timestamp
                 FROM audio_transcripts
                 ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], row_to_transcript)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

// ----- row mapping -------------------------------------------------------

fn clamp_limit(limit: usize) -> i64 {
    limit.clamp(1, MAX_QUERY_LIMIT) as i64
}

fn to_ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn map_to_json(map: &PayloadMap) -> String {
    Value::Object(map.clone()).to_string()
}

fn json_to_map(s: String) -> PayloadMap {
    serde_json::from_str(&s).unwrap_or_default()
}

fn row_to_device(row: &Row<'_>) -> rusqlite::Result<DeviceRecord> {
    Ok(DeviceRecord {
        device_id: row.get(0)?,
        device_type: row.get(1)?,
        is_online: row.get::<_, i64>(2)? != 0,
        last_heartbeat: row.get::<_, Option<String>>(3)?.map(parse_ts),
        connected_at: row.get::<_, Option<String>>(4)?.map(parse_ts),
        disconnected_at: row.get::<_, Option<String>>(5)?.map(parse_ts),
        metadata: json_to_map(row.get(6)?),
    })
}

fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<StateSnapshot> {
    Ok(StateSnapshot {
        id: row.get(0)?,
        device_id: row.get(1)?,
        device_type: row.get(2)?,
        payload: json_to_map(row.get(3)?),
        timestamp: parse_ts(row.get(4)?),
    })
}

fn row_to_command(row: &Row<'_>) -> rusqlite::Result<CommandRecord> {
    let status: String = row.get(4)?;
    Ok(CommandRecord {
        command_id: row.get(0)?,
        device_type: row.get(1)?,
        command_name: row.get(2)?,
        payload: json_to_map(row.get(3)?),
        status: CommandStatus::parse(&status).unwrap_or(CommandStatus::Created),
        created_at: parse_ts(row.get(5)?),
        executed_at: row.get::<_, Option<String>>(6)?.map(parse_ts),
        completed_at: row.get::<_, Option<String>>(7)?.map(parse_ts),
        response: row
            .get::<_, Option<String>>(8)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        target_device_count: row.get::<_, i64>(9)? as u32,
        success_count: row.get::<_, i64>(10)? as u32,
    })
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<ConnectionEvent> {
    let kind: String = row.get(3)?;
    Ok(ConnectionEvent {
        id: row.get(0)?,
        device_id: row.get(1)?,
        device_type: row.get(2)?,
        kind: ConnectionEventKind::parse(&kind).unwrap_or(ConnectionEventKind::Disconnected),
        timestamp: parse_ts(row.get(4)?),
        details: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| serde_json::from_str(&s).ok()),
    })
}

fn row_to_transcript(row: &Row<'_>) -> rusqlite::Result<AudioTranscript> {
    Ok(AudioTranscript {
        id: row.get(0)?,
        device_id: row.get(1)?,
        raw_text: row.get(2)?,
        normalized_text: row.get(3)?,
        prefix_ok: row.get::<_, i64>(4)? != 0,
        command_name: row.get(5)?,
        confidence: row.get::<_, f64>(6)? as f32,
        manual: row.get::<_, i64>(7)? != 0,
        level: row.get(8)?,
        threshold: row.get(9)?,
        timestamp: parse_ts(row.get(10)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, Value)]) -> PayloadMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_upsert_device_is_idempotent() {
        let store = AuditStore::open_in_memory().unwrap();
        let now = Utc::now();
        let meta = map(&[("fw", Value::from("1.0"))]);

        for _ in 0..2 {
            store
                .upsert_device(
                    "servoscontroller".into(),
                    "servo".into(),
                    true,
                    now,
                    Some(now),
                    None,
                    meta.clone(),
                )
                .await
                .unwrap();
        }

        let devices = store.list_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_type, "servo");
        assert!(devices[0].is_online);
        assert_eq!(devices[0].metadata.get("fw").unwrap(), "1.0");
    }

    #[tokio::test]
    async fn test_command_lifecycle_forward_only() {
        let store = AuditStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .create_command("c1".into(), "wheel".into(), "forward".into(), PayloadMap::new(), now)
            .await
            .unwrap();

        let sent = store
            .update_command_status(
                "c1".into(),
                CommandStatus::Sent,
                CommandUpdate {
                    executed_at: Some(now),
                    target_device_count: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(sent.status, CommandStatus::Sent);
        assert_eq!(sent.target_device_count, 2);

        let done = store
            .update_command_status(
                "c1".into(),
                CommandStatus::AckSuccess,
                CommandUpdate {
                    completed_at: Some(now),
                    success_count: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(done.status, CommandStatus::AckSuccess);
        assert_eq!(done.success_count, 2);

        // A late timeout must not clobber the terminal ack.
        let unchanged = store
            .update_command_status("c1".into(), CommandStatus::Timeout, CommandUpdate::default())
            .await
            .unwrap();
        assert_eq!(unchanged.status, CommandStatus::AckSuccess);
    }

    #[tokio::test]
    async fn test_update_unknown_command_errors() {
        let store = AuditStore::open_in_memory().unwrap();
        let result = store
            .update_command_status("ghost".into(), CommandStatus::Sent, CommandUpdate::default())
            .await;
        assert!(matches!(result, Err(PersistenceError::CommandNotFound(_))));
    }

    #[tokio::test]
    async fn test_command_logs_filtering() {
        let store = AuditStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .create_command("c1".into(), "wheel".into(), "forward".into(), PayloadMap::new(), now)
            .await
            .unwrap();
        store
            .create_command("c2".into(), "servo".into(), "handsup".into(), PayloadMap::new(), now)
            .await
            .unwrap();
        store
            .update_command_status("c2".into(), CommandStatus::NoTargets, CommandUpdate::default())
            .await
            .unwrap();

        let by_status = store
            .command_logs(Some(CommandStatus::NoTargets), None, 10)
            .await
            .unwrap();
        assert_eq!(by_status.len(), 1);
        assert_eq!(by_status[0].command_id, "c2");

        let by_type = store
            .command_logs(None, Some("wheel".into()), 10)
            .await
            .unwrap();
        assert_eq!(by_type.len(), 1);
        assert_eq!(by_type[0].command_id, "c1");

        let all = store.command_logs(None, None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_state_history_newest_first() {
        let store = AuditStore::open_in_memory().unwrap();
        let now = Utc::now();
        for n in 0..3 {
            store
                .insert_state_snapshot(
                    "wheelcontroller".into(),
                    "wheel".into(),
                    map(&[("seq", Value::from(n))]),
                    now,
                )
                .await
                .unwrap();
        }

        let history = store.state_history("wheelcontroller".into(), 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].payload.get("seq").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_transcript_round_trip() {
        let store = AuditStore::open_in_memory().unwrap();
        store
            .insert_transcript(NewTranscript {
                device_id: "camcontroller".into(),
                raw_text: "ESP move forward".into(),
                normalized_text: "ESP MOVE FORWARD".into(),
                prefix_ok: true,
                command_name: Some("forward".into()),
                confidence: 0.92,
                manual: false,
                level: Some(140),
                threshold: Some(120),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        let rows = store.transcripts(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].prefix_ok);
        assert_eq!(rows[0].command_name.as_deref(), Some("forward"));
        assert!((rows[0].confidence - 0.92).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_connection_history() {
        let store = AuditStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .insert_connection_event(
                "d1".into(),
                "wheel".into(),
                ConnectionEventKind::Connected,
                now,
                None,
            )
            .await
            .unwrap();
        store
            .insert_connection_event(
                "d1".into(),
                "wheel".into(),
                ConnectionEventKind::Timeout,
                now,
                Some(serde_json::json!({"reason": "stale"})),
            )
            .await
            .unwrap();

        let events = store.connection_history("d1".into(), 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, ConnectionEventKind::Timeout);
        assert_eq!(events[1].kind, ConnectionEventKind::Connected);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let store = AuditStore::open(path.to_str().unwrap()).unwrap();
        drop(store);
        assert!(path.exists());
    }
}
