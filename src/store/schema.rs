//! SQLite schema: versioned, forward-only migrations embedded in the binary
//! and applied on open, tracked through `PRAGMA user_version`.

use rusqlite::Connection;
use tracing::debug;

use super::{Error, Result};

/// v1: the session/chunk ledger and one table per entity kind. Entity rows
/// are keyed by (chunk_id, identity key): the same logical entity may appear
/// once per chunk, which is how revision history is modeled.
const V1_TABLES: &str = r#"
CREATE TABLE session (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_id INTEGER REFERENCES session(id),
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT,
    from_ts TEXT,
    to_ts TEXT,
    files_enabled BOOLEAN NOT NULL DEFAULT 0,
    avatars_enabled BOOLEAN NOT NULL DEFAULT 0,
    mode TEXT NOT NULL DEFAULT '',
    args TEXT NOT NULL DEFAULT '',
    finished BOOLEAN NOT NULL DEFAULT 0
);

CREATE TABLE chunk (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES session(id),
    unix_ts INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    type_id INTEGER NOT NULL,
    num_rec INTEGER NOT NULL DEFAULT 0,
    channel_id TEXT,
    search_query TEXT,
    final BOOLEAN NOT NULL DEFAULT 0,
    thread_only BOOLEAN
);

CREATE TABLE message (
    id INTEGER NOT NULL,
    chunk_id INTEGER NOT NULL REFERENCES chunk(id),
    channel_id TEXT NOT NULL,
    ts TEXT NOT NULL,
    parent_id INTEGER,
    thread_ts TEXT,
    latest_reply TEXT,
    is_parent BOOLEAN NOT NULL DEFAULT 0,
    idx INTEGER NOT NULL DEFAULT 0,
    num_files INTEGER NOT NULL DEFAULT 0,
    txt TEXT,
    data TEXT NOT NULL,
    PRIMARY KEY (chunk_id, id)
);

CREATE TABLE file (
    id TEXT NOT NULL,
    chunk_id INTEGER NOT NULL REFERENCES chunk(id),
    channel_id TEXT NOT NULL,
    message_id INTEGER,
    thread_id INTEGER,
    idx INTEGER NOT NULL DEFAULT 0,
    mode TEXT,
    filename TEXT,
    url TEXT,
    data TEXT NOT NULL,
    PRIMARY KEY (chunk_id, id)
);

CREATE TABLE user (
    id TEXT NOT NULL,
    chunk_id INTEGER NOT NULL REFERENCES chunk(id),
    username TEXT,
    idx INTEGER NOT NULL DEFAULT 0,
    data TEXT NOT NULL,
    PRIMARY KEY (chunk_id, id)
);

CREATE TABLE channel (
    id TEXT NOT NULL,
    chunk_id INTEGER NOT NULL REFERENCES chunk(id),
    name TEXT,
    idx INTEGER NOT NULL DEFAULT 0,
    data TEXT NOT NULL,
    PRIMARY KEY (chunk_id, id)
);

CREATE TABLE channel_user (
    chunk_id INTEGER NOT NULL REFERENCES chunk(id),
    channel_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    idx INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (chunk_id, channel_id, user_id)
);

CREATE TABLE workspace (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chunk_id INTEGER NOT NULL REFERENCES chunk(id),
    team TEXT NOT NULL,
    username TEXT,
    team_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    enterprise_id TEXT,
    url TEXT,
    data TEXT NOT NULL
);

CREATE TABLE search_message (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chunk_id INTEGER NOT NULL REFERENCES chunk(id),
    ts TEXT NOT NULL,
    channel_id TEXT,
    idx INTEGER NOT NULL DEFAULT 0,
    txt TEXT,
    data TEXT NOT NULL
);

CREATE TABLE search_file (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chunk_id INTEGER NOT NULL REFERENCES chunk(id),
    file_id TEXT NOT NULL,
    idx INTEGER NOT NULL DEFAULT 0,
    filename TEXT,
    url TEXT,
    data TEXT NOT NULL
);

CREATE INDEX idx_chunk_session ON chunk(session_id);
CREATE INDEX idx_chunk_channel ON chunk(channel_id, type_id, final);
CREATE INDEX idx_message_id ON message(id);
CREATE INDEX idx_message_channel ON message(channel_id);
CREATE INDEX idx_message_parent ON message(parent_id);
CREATE INDEX idx_file_channel ON file(channel_id);
CREATE INDEX idx_channel_user_channel ON channel_user(channel_id);
"#;

/// v2: the two views backing the completeness queries.
///
/// `v_unfinished_channels` has a row per (session, channel) whose history
/// reached a final messages-chunk; `ref_count` is the number of thread
/// starters still expecting replies minus the number of final thread-message
/// chunks. No row means "don't know yet".
///
/// `v_thread_only_threads` has a row per thread captured in thread-only mode
/// that reached a final chunk; `parts` counts its chunks. Threads that never
/// went final (or ordinary crawls) produce no row.
const V2_VIEWS: &str = r#"
CREATE VIEW v_unfinished_channels AS
WITH final_channel AS (
    SELECT DISTINCT session_id, channel_id
      FROM chunk
     WHERE type_id = 0 AND final = 1 AND channel_id IS NOT NULL
),
lead_msg AS (
    SELECT c.session_id AS session_id,
           m.channel_id AS channel_id,
           m.id AS id,
           m.latest_reply AS latest_reply,
           MAX(m.chunk_id) AS chunk_id
      FROM message m
      JOIN chunk c ON c.id = m.chunk_id
     WHERE c.type_id = 0 AND m.is_parent = 1
     GROUP BY c.session_id, m.channel_id, m.id
),
open_lead AS (
    SELECT session_id, channel_id, COUNT(*) AS cnt
      FROM lead_msg
     WHERE latest_reply IS NULL OR latest_reply <> 'no_replies'
     GROUP BY session_id, channel_id
),
final_thread AS (
    SELECT session_id, channel_id, COUNT(*) AS cnt
      FROM chunk
     WHERE type_id = 1 AND final = 1
     GROUP BY session_id, channel_id
)
SELECT fc.session_id AS session_id,
       fc.channel_id AS channel_id,
       COALESCE(ol.cnt, 0) - COALESCE(ft.cnt, 0) AS ref_count
  FROM final_channel fc
  LEFT JOIN open_lead ol
         ON ol.session_id = fc.session_id AND ol.channel_id = fc.channel_id
  LEFT JOIN final_thread ft
         ON ft.session_id = fc.session_id AND ft.channel_id = fc.channel_id;

CREATE VIEW v_thread_only_threads AS
SELECT c.session_id AS session_id,
       c.channel_id AS channel_id,
       m.thread_ts AS thread_ts,
       COUNT(DISTINCT c.id) AS parts
  FROM chunk c
  JOIN message m ON m.chunk_id = c.id AND m.is_parent = 1
 WHERE c.type_id = 1 AND c.thread_only = 1
 GROUP BY c.session_id, c.channel_id, m.thread_ts
HAVING MAX(c.final) = 1;
"#;

const MIGRATIONS: &[&str] = &[V1_TABLES, V2_VIEWS];

/// Brings the database up to the latest schema version. Safe to call on
/// every open; already-applied steps are skipped.
pub fn migrate(conn: &Connection) -> Result<()> {
    let version: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(Error::db("migrate: user_version"))?;

    for (i, step) in MIGRATIONS.iter().enumerate().skip(version as usize) {
        let target = (i + 1) as i64;
        debug!(version = target, "applying schema migration");
        conn.execute_batch(step)
            .map_err(Error::db(format!("migrate: step {target}")))?;
        conn.pragma_update(None, "user_version", target)
            .map_err(Error::db(format!("migrate: set version {target}")))?;
    }
    Ok(())
}
