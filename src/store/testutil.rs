//! Shared helpers for repository tests: in-memory databases with the full
//! schema, plus session/chunk scaffolding.

use rusqlite::Connection;

use crate::chunk::ChunkType;

use super::chunkrec::{ChunkRepository, DbChunk};
use super::schema;
use super::session::SessionRepository;
use super::SessionInfo;

pub(crate) fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    schema::migrate(&conn).unwrap();
    conn
}

pub(crate) fn test_session(conn: &Connection) -> i64 {
    SessionRepository
        .insert(conn, &SessionInfo::default(), None)
        .unwrap()
}

/// One chunk to scaffold: (type, channel, final, thread_only).
pub(crate) struct TestChunk {
    pub type_id: ChunkType,
    pub channel_id: Option<&'static str>,
    pub is_final: bool,
    pub thread_only: bool,
}

impl TestChunk {
    pub fn new(type_id: ChunkType, channel_id: &'static str, is_final: bool) -> Self {
        TestChunk {
            type_id,
            channel_id: Some(channel_id),
            is_final,
            thread_only: false,
        }
    }
}

/// Inserts a session plus the given chunks; returns (session id, chunk ids).
pub(crate) fn prep_chunks(conn: &Connection, chunks: &[TestChunk]) -> (i64, Vec<i64>) {
    let sid = test_session(conn);
    let r = ChunkRepository;
    let mut ids = Vec::with_capacity(chunks.len());
    for tc in chunks {
        let id = r
            .insert(
                conn,
                &DbChunk {
                    id: 0,
                    session_id: sid,
                    unix_ts: 1_700_000_000_000,
                    type_id: tc.type_id,
                    num_rec: 0,
                    channel_id: tc.channel_id.map(str::to_string),
                    search_query: None,
                    is_final: tc.is_final,
                    thread_only: (tc.type_id == ChunkType::ThreadMessages)
                        .then_some(tc.thread_only),
                },
            )
            .unwrap();
        ids.push(id);
    }
    (sid, ids)
}
