//! Audit store schema
//!
//! One SQLite database per process instance. Timestamps are stored as
//! RFC 3339 text; open-ended payloads as JSON text.

use rusqlite::Connection;

const CREATE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS devices (
        device_id       TEXT PRIMARY KEY,
        device_type     TEXT NOT NULL,
        is_online       INTEGER NOT NULL DEFAULT 0,
        last_heartbeat  TEXT,
        connected_at    TEXT,
        disconnected_at TEXT,
        metadata        TEXT NOT NULL DEFAULT '{}'
    )",
    "CREATE TABLE IF NOT EXISTS device_state_snapshots (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id   TEXT NOT NULL,
        device_type TEXT NOT NULL,
        payload     TEXT NOT NULL DEFAULT '{}',
        timestamp   TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS command_logs (
        command_id          TEXT PRIMARY KEY,
        device_type         TEXT NOT NULL,
        command_name        TEXT NOT NULL,
        payload             TEXT NOT NULL DEFAULT '{}',
        status              TEXT NOT NULL,
        created_at          TEXT NOT NULL,
        executed_at         TEXT,
        completed_at        TEXT,
        response            TEXT,
        target_device_count INTEGER NOT NULL DEFAULT 0,
        success_count       INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS device_connection_logs (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id   TEXT NOT NULL,
        device_type TEXT NOT NULL,
        event       TEXT NOT NULL,
        timestamp   TEXT NOT NULL,
        details     TEXT
    )",
    "CREATE TABLE IF NOT EXISTS audio_transcripts (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id       TEXT NOT NULL,
        raw_text        TEXT NOT NULL,
        normalized_text TEXT NOT NULL,
        prefix_ok       INTEGER NOT NULL,
        command_name    TEXT,
        confidence      REAL NOT NULL DEFAULT 0,
        manual          INTEGER NOT NULL DEFAULT 0,
        level           INTEGER,
        threshold       INTEGER,
        timestamp       TEXT NOT NULL
    )",
];

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_device_type_online
        ON devices (device_type, is_online)",
    "CREATE INDEX IF NOT EXISTS idx_snapshot_device_timestamp
        ON device_state_snapshots (device_id, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_command_status_created
        ON command_logs (status, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_command_type_created
        ON command_logs (device_type, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_connection_device_event_time
        ON device_connection_logs (device_id, event, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_transcript_timestamp
        ON audio_transcripts (timestamp)",
];

/// Create tables and indexes if missing.
pub fn ensure_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    for sql in CREATE_TABLES.iter().chain(CREATE_INDEXES) {
        conn.execute(sql, [])?;
    }
    Ok(())
}
