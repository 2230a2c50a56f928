//! SQLite persistence: the write pipeline ([`ChunkStore`]), the read facade
//! ([`Source`]), and the per-entity repositories underneath them.
//!
//! Write side: every chunk becomes one ledger row plus its payload rows,
//! inside one transaction. A chunk either lands whole or leaves no trace.
//! Read side: latest-wins resolution over the accumulated revisions.

mod assemble;
mod channel;
mod chunkrec;
mod entity;
mod error;
mod file;
mod message;
mod schema;
mod search;
mod session;
mod source;
#[cfg(test)]
mod testutil;
mod user;
mod workspace;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::chunk::{Chunk, ChunkConsumer, ChunkType};
use crate::fasttime;

use channel::{ChannelRepository, DbChannel, DbChannelUser};
use chunkrec::ChunkRepository;
use file::{DbFile, FileRepository};
use message::{DbMessage, MessageRepository};
use search::{DbSearchFile, DbSearchMessage, SearchRepository};
use session::SessionRepository;
use user::{DbUser, UserRepository};
use workspace::{DbWorkspace, WorkspaceRepository};

pub use chunkrec::DbChunk;
pub use error::{Error, Result};
pub use session::Session;
pub use source::Source;

/// Crawl parameters recorded with the session row.
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    pub from_ts: Option<DateTime<Utc>>,
    pub to_ts: Option<DateTime<Utc>>,
    pub files_enabled: bool,
    pub avatars_enabled: bool,
    pub mode: String,
    pub args: String,
}

#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Skip user rows whose payload is byte-identical to the stored latest
    /// revision. Keeps repeated roster crawls from bloating the table.
    pub dedupe_users: bool,
}

/// The write half: owns the connection, the open session, and the one-chunk
/// one-transaction discipline. Shareable across threads; writes serialize on
/// the connection lock.
pub struct ChunkStore {
    conn: Mutex<Connection>,
    session_id: i64,
    closed: AtomicBool,
    opts: StoreOptions,
}

impl ChunkStore {
    /// Opens (creating if needed) the database at `path`, migrates it, and
    /// records a new session.
    pub fn create(path: impl AsRef<Path>, info: &SessionInfo) -> Result<Self> {
        Self::create_with_options(path, info, StoreOptions::default())
    }

    pub fn create_with_options(
        path: impl AsRef<Path>,
        info: &SessionInfo,
        opts: StoreOptions,
    ) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(Error::db("open database"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(Error::db("set journal_mode"))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(Error::db("set synchronous"))?;
        Self::with_connection(conn, info, opts)
    }

    /// Wraps an already-open connection. Used for in-memory stores.
    pub fn with_connection(
        conn: Connection,
        info: &SessionInfo,
        opts: StoreOptions,
    ) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(Error::db("set foreign_keys"))?;
        schema::migrate(&conn)?;
        let session_id = SessionRepository.insert(&conn, info, None)?;
        info!(session_id, mode = %info.mode, "session started");
        Ok(ChunkStore {
            conn: Mutex::new(conn),
            session_id,
            closed: AtomicBool::new(false),
            opts,
        })
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persists one chunk: ledger row plus payload rows, in one
    /// transaction. Returns the assigned chunk id.
    pub fn encode(&self, chunk: &Chunk) -> Result<i64> {
        let mut conn = self.lock();
        // checked under the lock: no chunk may land after close finalizes
        // the session
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Contract("store is closed".into()));
        }
        let tx = conn.transaction().map_err(Error::db("begin chunk"))?;

        let chunk_id = ChunkRepository.insert(
            &tx,
            &DbChunk {
                id: 0,
                session_id: self.session_id,
                unix_ts: chunk.timestamp,
                type_id: chunk.chunk_type,
                num_rec: 0,
                channel_id: (!chunk.channel_id.is_empty()).then(|| chunk.channel_id.clone()),
                search_query: (!chunk.search_query.is_empty())
                    .then(|| chunk.search_query.clone()),
                is_final: chunk.is_last,
                thread_only: (chunk.chunk_type == ChunkType::ThreadMessages)
                    .then_some(chunk.thread_only),
            },
        )?;
        let num_rec = self.write_payload(&tx, chunk_id, chunk)?;
        tx.execute(
            "UPDATE chunk SET num_rec = ? WHERE id = ?",
            rusqlite::params![num_rec as i64, chunk_id],
        )
        .map_err(Error::db("set num_rec"))?;

        tx.commit().map_err(Error::db("commit chunk"))?;
        debug!(
            chunk_id,
            chunk_type = %chunk.chunk_type,
            channel = %chunk.channel_id,
            num_rec,
            "chunk written"
        );
        Ok(chunk_id)
    }

    fn write_payload(&self, conn: &Connection, chunk_id: i64, chunk: &Chunk) -> Result<usize> {
        match chunk.chunk_type {
            ChunkType::Messages => {
                let channel_id = require_channel(chunk)?;
                MessageRepository::new().insert_batch(
                    conn,
                    chunk
                        .messages
                        .iter()
                        .enumerate()
                        .map(|(i, m)| DbMessage::new(chunk_id, i as i64, channel_id, m)),
                )
            }
            ChunkType::ThreadMessages => {
                let channel_id = require_channel(chunk)?;
                let parent = chunk.parent.as_ref().ok_or_else(|| {
                    Error::Contract("thread chunk without a parent message".into())
                })?;
                // the crawler sometimes repeats the starter in the reply
                // page; keep the prepended copy only
                let rows = std::iter::once(parent)
                    .chain(chunk.messages.iter().filter(|m| m.ts != parent.ts));
                MessageRepository::new().insert_batch(
                    conn,
                    rows.enumerate()
                        .map(|(i, m)| DbMessage::new(chunk_id, i as i64, channel_id, m)),
                )
            }
            ChunkType::Files => {
                let channel_id = require_channel(chunk)?;
                let parent = chunk.parent.as_ref().ok_or_else(|| {
                    Error::Contract("file chunk without a parent message".into())
                })?;
                fasttime::ts_to_id(&parent.ts).map_err(|_| Error::InvalidPayload {
                    chunk_type: chunk.chunk_type,
                    channel_id: channel_id.to_string(),
                    reason: format!("unparseable parent timestamp {:?}", parent.ts),
                })?;
                FileRepository::new().insert_batch(
                    conn,
                    chunk
                        .files
                        .iter()
                        .enumerate()
                        .map(|(i, f)| DbFile::new(chunk_id, i as i64, channel_id, parent, f)),
                )
            }
            ChunkType::Users => {
                let repo = UserRepository::new();
                let current = if self.opts.dedupe_users {
                    repo.current_payloads(conn)?
                } else {
                    HashMap::new()
                };
                let mut rows = Vec::with_capacity(chunk.users.len());
                for (i, u) in chunk.users.iter().enumerate() {
                    let row = DbUser::new(chunk_id, i as i64, u)?;
                    if current.get(&row.id) == Some(&row.data) {
                        continue;
                    }
                    rows.push(Ok(row));
                }
                repo.insert_batch(conn, rows)
            }
            ChunkType::Channels => ChannelRepository::new().insert_batch(
                conn,
                chunk
                    .channels
                    .iter()
                    .enumerate()
                    .map(|(i, c)| DbChannel::new(chunk_id, i as i64, c)),
            ),
            ChunkType::ChannelInfo => {
                let ch = chunk.channel.as_ref().ok_or_else(|| {
                    Error::Contract("channel-info chunk without a channel".into())
                })?;
                ChannelRepository::new()
                    .insert_batch(conn, [DbChannel::new(chunk_id, 0, ch)])
            }
            ChunkType::WorkspaceInfo => {
                let w = chunk.workspace_info.as_ref().ok_or_else(|| {
                    Error::Contract("workspace-info chunk without a payload".into())
                })?;
                WorkspaceRepository::new().insert(conn, &DbWorkspace::new(chunk_id, w)?)?;
                Ok(1)
            }
            ChunkType::ChannelUsers => {
                let channel_id = require_channel(chunk)?;
                ChannelRepository::new().insert_members(
                    conn,
                    chunk.channel_users.iter().enumerate().map(|(i, uid)| {
                        Ok(DbChannelUser {
                            chunk_id,
                            channel_id: channel_id.to_string(),
                            user_id: uid.clone(),
                            idx: i as i64,
                        })
                    }),
                )
            }
            ChunkType::SearchMessages => SearchRepository::new().insert_messages(
                conn,
                chunk
                    .search_messages
                    .iter()
                    .enumerate()
                    .map(|(i, m)| DbSearchMessage::new(chunk_id, i as i64, m)),
            ),
            ChunkType::SearchFiles => SearchRepository::new().insert_files(
                conn,
                chunk
                    .search_files
                    .iter()
                    .enumerate()
                    .map(|(i, f)| DbSearchFile::new(chunk_id, i as i64, f)),
            ),
        }
    }

    /// Whether the channel's capture is complete in this session: a final
    /// message chunk arrived and no thread starter is still waiting for its
    /// final thread chunk. Before the final message chunk the answer is
    /// always `false`.
    pub fn is_complete(&self, channel_id: &str) -> Result<bool> {
        let conn = self.lock();
        match MessageRepository::new().count_unfinished(&conn, self.session_id, channel_id) {
            Ok(n) => Ok(n <= 0),
            Err(Error::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether a thread-only capture of the thread has finished in this
    /// session.
    pub fn is_complete_thread(&self, channel_id: &str, thread_ts: &str) -> Result<bool> {
        let conn = self.lock();
        match MessageRepository::new().count_thread_only_parts(
            &conn,
            self.session_id,
            channel_id,
            thread_ts,
        ) {
            Ok(n) => Ok(n > 0),
            Err(Error::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[cfg(test)]
    pub(crate) fn into_connection(self) -> Connection {
        self.conn.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    /// Marks the session finished. Idempotent; the first call wins and
    /// later calls are no-ops.
    pub fn close(&self) -> Result<()> {
        let conn = self.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        SessionRepository.finalize(&conn, self.session_id)?;
        info!(session_id = self.session_id, "session finished");
        Ok(())
    }
}

impl ChunkConsumer for ChunkStore {
    fn encode(&mut self, chunk: Chunk) -> Result<()> {
        ChunkStore::encode(self, &chunk)?;
        Ok(())
    }
}

fn require_channel(chunk: &Chunk) -> Result<&str> {
    if chunk.channel_id.is_empty() {
        return Err(Error::Contract(format!(
            "{} chunk without a channel id",
            chunk.chunk_type
        )));
    }
    Ok(&chunk.channel_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{File, Message, User};

    fn mem_store(opts: StoreOptions) -> ChunkStore {
        let conn = Connection::open_in_memory().unwrap();
        ChunkStore::with_connection(
            conn,
            &SessionInfo {
                mode: "archive".into(),
                ..Default::default()
            },
            opts,
        )
        .unwrap()
    }

    fn msg(ts: &str, text: &str) -> Message {
        Message {
            ts: ts.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    fn msg_chunk(channel: &str, is_last: bool, messages: Vec<Message>) -> Chunk {
        Chunk {
            chunk_type: ChunkType::Messages,
            timestamp: 1_700_000_000_000,
            channel_id: channel.into(),
            is_last,
            messages,
            ..Default::default()
        }
    }

    #[test]
    fn chunks_accumulate_with_latest_wins() {
        let store = mem_store(StoreOptions::default());
        store
            .encode(&msg_chunk(
                "C1",
                false,
                vec![msg("100.000000", "A"), msg("200.000000", "B")],
            ))
            .unwrap();
        store
            .encode(&msg_chunk(
                "C1",
                true,
                vec![msg("200.000000", "B2"), msg("300.000000", "C")],
            ))
            .unwrap();

        let conn = store.lock();
        let r = MessageRepository::new();
        assert_eq!(r.count_channel(&conn, "C1").unwrap(), 3);
        let texts: Vec<String> = r
            .all_for_channel(&conn, "C1")
            .unwrap()
            .iter()
            .map(|m| m.val().unwrap().text)
            .collect();
        assert_eq!(texts, ["A", "B2", "C"]);
    }

    #[test]
    fn failed_chunk_leaves_no_trace() {
        let store = mem_store(StoreOptions::default());
        let err = store
            .encode(&msg_chunk(
                "C1",
                false,
                vec![msg("100.000000", "good"), msg("not-a-ts", "bad")],
            ))
            .unwrap_err();
        assert!(matches!(err, Error::BadTimestamp(_)));

        let conn = store.lock();
        let chunks: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunk", [], |r| r.get(0))
            .unwrap();
        let messages: i64 = conn
            .query_row("SELECT COUNT(*) FROM message", [], |r| r.get(0))
            .unwrap();
        assert_eq!((chunks, messages), (0, 0));
    }

    #[test]
    fn thread_chunk_requires_and_prepends_the_parent() {
        let store = mem_store(StoreOptions::default());
        let mut chunk = Chunk {
            chunk_type: ChunkType::ThreadMessages,
            channel_id: "C1".into(),
            messages: vec![
                // the crawler repeated the starter in the reply page
                Message {
                    ts: "100.000000".into(),
                    thread_ts: Some("100.000000".into()),
                    text: "lead-dup".into(),
                    ..Default::default()
                },
                Message {
                    ts: "200.000000".into(),
                    thread_ts: Some("100.000000".into()),
                    text: "reply".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert!(matches!(
            store.encode(&chunk).unwrap_err(),
            Error::Contract(_)
        ));

        chunk.parent = Some(Message {
            ts: "100.000000".into(),
            thread_ts: Some("100.000000".into()),
            text: "lead".into(),
            ..Default::default()
        });
        let id = store.encode(&chunk).unwrap();

        let conn = store.lock();
        let rows = MessageRepository::new().all_for_chunk(&conn, id).unwrap();
        let texts: Vec<String> = rows.iter().map(|m| m.val().unwrap().text).collect();
        assert_eq!(texts, ["lead", "reply"]);
    }

    #[test]
    fn file_chunk_rejects_unlocatable_parent() {
        let store = mem_store(StoreOptions::default());
        let chunk = Chunk {
            chunk_type: ChunkType::Files,
            channel_id: "C1".into(),
            parent: Some(msg("garbage", "lead")),
            files: vec![File {
                id: "F1".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(
            store.encode(&chunk).unwrap_err(),
            Error::InvalidPayload { .. }
        ));
        let conn = store.lock();
        let files: i64 = conn
            .query_row("SELECT COUNT(*) FROM file", [], |r| r.get(0))
            .unwrap();
        assert_eq!(files, 0);
    }

    #[test]
    fn user_dedupe_skips_unchanged_payloads() {
        let store = mem_store(StoreOptions { dedupe_users: true });
        let users = vec![
            User {
                id: "U1".into(),
                name: "ann".into(),
                ..Default::default()
            },
            User {
                id: "U2".into(),
                name: "bob".into(),
                ..Default::default()
            },
        ];
        let chunk = |users: Vec<User>| Chunk {
            chunk_type: ChunkType::Users,
            users,
            ..Default::default()
        };
        store.encode(&chunk(users.clone())).unwrap();

        // U1 unchanged, U2 renamed
        let mut next = users;
        next[1].name = "rob".into();
        store.encode(&chunk(next)).unwrap();

        let conn = store.lock();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM user", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 3);
        assert_eq!(
            UserRepository::new()
                .get(&conn, "U2")
                .unwrap()
                .username
                .as_deref(),
            Some("rob")
        );
    }

    #[test]
    fn completeness_flips_with_final_chunks() {
        let store = mem_store(StoreOptions::default());
        assert!(!store.is_complete("C1").unwrap());

        let mut lead = msg("100.000000", "lead");
        lead.thread_ts = Some("100.000000".into());
        lead.latest_reply = Some("300.000000".into());
        store
            .encode(&msg_chunk("C1", true, vec![lead.clone()]))
            .unwrap();
        assert!(!store.is_complete("C1").unwrap());

        store
            .encode(&Chunk {
                chunk_type: ChunkType::ThreadMessages,
                channel_id: "C1".into(),
                is_last: true,
                parent: Some(lead),
                messages: vec![Message {
                    ts: "300.000000".into(),
                    thread_ts: Some("100.000000".into()),
                    text: "reply".into(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .unwrap();
        assert!(store.is_complete("C1").unwrap());
    }

    #[test]
    fn thread_only_completeness() {
        let store = mem_store(StoreOptions::default());
        let lead = Message {
            ts: "100.000000".into(),
            thread_ts: Some("100.000000".into()),
            text: "lead".into(),
            ..Default::default()
        };
        let part = |is_last| Chunk {
            chunk_type: ChunkType::ThreadMessages,
            channel_id: "C1".into(),
            thread_only: true,
            is_last,
            parent: Some(lead.clone()),
            ..Default::default()
        };
        store.encode(&part(false)).unwrap();
        assert!(!store.is_complete_thread("C1", "100.000000").unwrap());
        store.encode(&part(true)).unwrap();
        assert!(store.is_complete_thread("C1", "100.000000").unwrap());
    }

    #[test]
    fn close_excludes_racing_encodes() {
        let store = mem_store(StoreOptions::default());
        std::thread::scope(|s| {
            let writer = s.spawn(|| {
                let mut committed = 0i64;
                for i in 0..50 {
                    let ts = format!("{}.000000", 100 + i);
                    match store.encode(&msg_chunk("C1", false, vec![msg(&ts, "x")])) {
                        Ok(_) => committed += 1,
                        Err(Error::Contract(_)) => break,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
                committed
            });
            store.close().unwrap();
            let committed = writer.join().unwrap();

            // exactly the chunks that beat the close are in the ledger;
            // nothing landed after the session was finalized
            let conn = store.lock();
            let chunks: i64 = conn
                .query_row("SELECT COUNT(*) FROM chunk", [], |r| r.get(0))
                .unwrap();
            assert_eq!(chunks, committed);
            assert!(SessionRepository
                .get(&conn, store.session_id())
                .unwrap()
                .finished);
        });
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let store = mem_store(StoreOptions::default());
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(
            store.encode(&msg_chunk("C1", false, vec![])).unwrap_err(),
            Error::Contract(_)
        ));
        let conn = store.lock();
        assert!(SessionRepository
            .get(&conn, store.session_id())
            .unwrap()
            .finished);
    }
}
