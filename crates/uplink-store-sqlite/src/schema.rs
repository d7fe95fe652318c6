//! SQL schema for the command store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- One row per request radiated by a session.
CREATE TABLE IF NOT EXISTS command_messages (
    host_id          INTEGER NOT NULL,
    session_id       INTEGER NOT NULL,
    session_fragment INTEGER NOT NULL,
    request_id       TEXT    NOT NULL,
    original_file    TEXT,
    finalized        INTEGER NOT NULL DEFAULT 0,
    recorded_at      TEXT    NOT NULL,
    PRIMARY KEY (host_id, session_id, session_fragment, request_id)
);

-- One row per distinct status observed for a request.
CREATE TABLE IF NOT EXISTS command_statuses (
    status_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    host_id          INTEGER NOT NULL,
    session_id       INTEGER NOT NULL,
    session_fragment INTEGER NOT NULL,
    request_id       TEXT    NOT NULL,
    status           TEXT    NOT NULL,   -- CommandStatus, snake_case
    event_time       TEXT    NOT NULL,   -- RFC 3339 UTC, fixed width
    FOREIGN KEY (host_id, session_id, session_fragment, request_id)
        REFERENCES command_messages (host_id, session_id, session_fragment, request_id),
    UNIQUE (host_id, session_id, session_fragment, request_id, status)
);

CREATE INDEX IF NOT EXISTS statuses_request_idx ON command_statuses(request_id);
CREATE INDEX IF NOT EXISTS statuses_time_idx    ON command_statuses(event_time);

PRAGMA user_version = 1;
";
