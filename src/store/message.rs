//! Message storage and the timeline/thread/completeness queries.
//!
//! Messages are the only entity with two distinct read shapes: the channel
//! timeline (lead messages plus thread starters captured in thread-only
//! crawls) and a single thread (starter plus replies, with broadcast copies
//! deduplicated in favor of the thread-chunk version).

use rusqlite::types::Value;
use rusqlite::{params, Connection, Row};

use crate::chunk::{ChunkType, Message};
use crate::fasttime;

use super::entity::{or_null, Entity, Filter, Order, Repository};
use super::{Error, Result};

/// Types whose chunks may carry channel messages.
const MESSAGE_TYPES: &[ChunkType] = &[ChunkType::Messages, ChunkType::ThreadMessages];

/// Channel timeline membership. Rows from plain message chunks count unless
/// the chunk was a thread-only capture; thread chunks contribute only the
/// starter, and only when captured thread-only (otherwise the starter is
/// already in the timeline).
const CHANNEL_COND: &str = "T.channel_id = ? AND \
     ((CH.type_id = 0 AND (CH.thread_only IS NULL OR CH.thread_only = 0)) OR \
      (CH.type_id = 1 AND CH.thread_only = 1 AND T.is_parent = 1))";

/// Thread membership. Broadcast copies that landed in plain message chunks
/// are skipped; the thread chunk carries the authoritative version. Other
/// subtypes (bot_message and friends) stay in the thread.
const THREAD_COND: &str = "T.channel_id = ? AND T.parent_id = ? AND \
     (CH.type_id = 1 OR \
      json_extract(T.data, '$.subtype') IS NULL OR \
      json_extract(T.data, '$.subtype') <> 'thread_broadcast')";

/// Merged channel stream: timeline messages and thread replies together,
/// with the same broadcast dedup rule as the thread view.
const MERGED_COND: &str = "T.channel_id = ? AND \
     (CH.type_id = 1 OR \
      json_extract(T.data, '$.subtype') IS NULL OR \
      json_extract(T.data, '$.subtype') <> 'thread_broadcast')";

#[derive(Debug, Clone, PartialEq)]
pub struct DbMessage {
    pub id: i64,
    pub chunk_id: i64,
    pub channel_id: String,
    pub ts: String,
    pub parent_id: Option<i64>,
    pub thread_ts: Option<String>,
    pub latest_reply: Option<String>,
    pub is_parent: bool,
    pub idx: i64,
    pub num_files: i64,
    pub txt: Option<String>,
    pub data: String,
}

impl DbMessage {
    pub fn new(chunk_id: i64, idx: i64, channel_id: &str, m: &Message) -> Result<Self> {
        let id = fasttime::ts_to_id(&m.ts)?;
        let parent_id = m
            .thread_ts
            .as_deref()
            .map(fasttime::ts_to_id)
            .transpose()?;
        Ok(DbMessage {
            id,
            chunk_id,
            channel_id: channel_id.to_string(),
            ts: m.ts.clone(),
            parent_id,
            thread_ts: m.thread_ts.clone(),
            latest_reply: m.latest_reply.clone(),
            is_parent: m.is_thread_start(),
            idx,
            num_files: m.files.len() as i64,
            txt: (!m.text.is_empty()).then(|| m.text.clone()),
            data: serde_json::to_string(m)?,
        })
    }

    /// Decodes the stored payload.
    pub fn val(&self) -> Result<Message> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

impl Entity for DbMessage {
    const TABLE: &'static str = "message";

    fn key_columns() -> &'static [&'static str] {
        &["id"]
    }

    fn columns() -> &'static [&'static str] {
        &[
            "id",
            "chunk_id",
            "channel_id",
            "ts",
            "parent_id",
            "thread_ts",
            "latest_reply",
            "is_parent",
            "idx",
            "num_files",
            "txt",
            "data",
        ]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            self.id.into(),
            self.chunk_id.into(),
            self.channel_id.clone().into(),
            self.ts.clone().into(),
            self.parent_id.map_or(Value::Null, Value::from),
            self.thread_ts.clone().map_or(Value::Null, Value::from),
            self.latest_reply.clone().map_or(Value::Null, Value::from),
            self.is_parent.into(),
            self.idx.into(),
            self.num_files.into(),
            or_null(self.txt.is_some(), self.txt.clone().unwrap_or_default()),
            self.data.clone().into(),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DbMessage {
            id: row.get(0)?,
            chunk_id: row.get(1)?,
            channel_id: row.get(2)?,
            ts: row.get(3)?,
            parent_id: row.get(4)?,
            thread_ts: row.get(5)?,
            latest_reply: row.get(6)?,
            is_parent: row.get(7)?,
            idx: row.get(8)?,
            num_files: row.get(9)?,
            txt: row.get(10)?,
            data: row.get(11)?,
        })
    }
}

/// Highest captured message per channel, for crawl resumption.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestMessage {
    pub channel_id: String,
    pub id: i64,
}

/// Highest captured reply per thread, for crawl resumption.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestThread {
    pub channel_id: String,
    pub thread_ts: String,
    pub id: i64,
}

pub(crate) struct MessageRepository {
    inner: Repository<DbMessage>,
}

impl MessageRepository {
    pub fn new() -> Self {
        MessageRepository {
            inner: Repository::new(),
        }
    }

    pub fn insert_batch<I>(&self, conn: &Connection, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<DbMessage>>,
    {
        self.inner.insert_batch(conn, items)
    }

    pub fn get(&self, conn: &Connection, id: i64) -> Result<DbMessage> {
        self.inner.get(conn, id)
    }

    pub fn all_for_chunk(&self, conn: &Connection, chunk_id: i64) -> Result<Vec<DbMessage>> {
        self.inner.all_for_chunk(conn, chunk_id)
    }

    fn channel_filter(channel_id: &str) -> Filter {
        Filter::new(CHANNEL_COND, vec![channel_id.to_string().into()]).ordered(Order::Key)
    }

    fn thread_filter(channel_id: &str, thread_id: i64) -> Filter {
        Filter::new(
            THREAD_COND,
            vec![channel_id.to_string().into(), thread_id.into()],
        )
        .ordered(Order::Key)
    }

    /// Latest-wins channel timeline, ascending by timestamp.
    pub fn all_for_channel(&self, conn: &Connection, channel_id: &str) -> Result<Vec<DbMessage>> {
        self.inner
            .all_where(conn, MESSAGE_TYPES, &Self::channel_filter(channel_id))
    }

    pub fn count_channel(&self, conn: &Connection, channel_id: &str) -> Result<i64> {
        self.inner
            .count_where(conn, MESSAGE_TYPES, &Self::channel_filter(channel_id))
    }

    /// Latest-wins thread view (starter plus replies), ascending by
    /// timestamp.
    pub fn all_for_thread(
        &self,
        conn: &Connection,
        channel_id: &str,
        thread_id: i64,
    ) -> Result<Vec<DbMessage>> {
        self.inner.all_where(
            conn,
            MESSAGE_TYPES,
            &Self::thread_filter(channel_id, thread_id),
        )
    }

    pub fn count_thread(
        &self,
        conn: &Connection,
        channel_id: &str,
        thread_id: i64,
    ) -> Result<i64> {
        self.inner.count_where(
            conn,
            MESSAGE_TYPES,
            &Self::thread_filter(channel_id, thread_id),
        )
    }

    /// Every latest-wins message of the channel, timeline and thread
    /// replies merged, in timestamp order. The viewer's flat feed.
    pub fn sorted(
        &self,
        conn: &Connection,
        channel_id: &str,
        desc: bool,
    ) -> Result<Vec<DbMessage>> {
        let order = if desc { "T.id DESC" } else { "T.id" };
        self.inner.all_where(
            conn,
            MESSAGE_TYPES,
            &Filter::new(MERGED_COND, vec![channel_id.to_string().into()])
                .ordered(Order::By(vec![order.to_string()])),
        )
    }

    /// Thread starters of the channel still waiting for a final thread
    /// chunk, within one session. Zero means the channel is fully captured;
    /// `NotFound` means the channel never reached a final message chunk, so
    /// completeness is unknowable.
    pub fn count_unfinished(
        &self,
        conn: &Connection,
        session_id: i64,
        channel_id: &str,
    ) -> Result<i64> {
        conn.query_row(
            "SELECT ref_count FROM v_unfinished_channels \
             WHERE session_id = ? AND channel_id = ?",
            params![session_id, channel_id],
            |row| row.get(0),
        )
        .map_err(Error::db("count unfinished"))
    }

    /// Number of chunks a thread-only capture of the given thread produced,
    /// counting only threads that reached a final chunk. `NotFound` when the
    /// thread was never captured thread-only or never finished.
    pub fn count_thread_only_parts(
        &self,
        conn: &Connection,
        session_id: i64,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<i64> {
        conn.query_row(
            "SELECT parts FROM v_thread_only_threads \
             WHERE session_id = ? AND channel_id = ? AND thread_ts = ?",
            params![session_id, channel_id, thread_ts],
            |row| row.get(0),
        )
        .map_err(Error::db("count thread parts"))
    }

    /// Per-channel resume points: the highest message id ever captured in a
    /// plain message chunk.
    pub fn latest_messages(&self, conn: &Connection) -> Result<Vec<LatestMessage>> {
        let mut stmt = conn
            .prepare(
                "SELECT M.channel_id, MAX(M.id) AS id \
                 FROM message M JOIN chunk C ON C.id = M.chunk_id \
                 WHERE C.type_id = 0 \
                 GROUP BY M.channel_id",
            )
            .map_err(Error::db("latest messages: prepare"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LatestMessage {
                    channel_id: row.get(0)?,
                    id: row.get(1)?,
                })
            })
            .map_err(Error::db("latest messages"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::db("latest messages: scan"))
    }

    /// Per-thread resume points from thread chunks.
    pub fn latest_threads(&self, conn: &Connection) -> Result<Vec<LatestThread>> {
        let mut stmt = conn
            .prepare(
                "SELECT M.channel_id, M.thread_ts, MAX(M.id) AS id \
                 FROM message M JOIN chunk C ON C.id = M.chunk_id \
                 WHERE C.type_id = 1 AND M.parent_id IS NOT NULL \
                 GROUP BY M.channel_id, M.parent_id",
            )
            .map_err(Error::db("latest threads: prepare"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LatestThread {
                    channel_id: row.get(0)?,
                    thread_ts: row.get(1)?,
                    id: row.get(2)?,
                })
            })
            .map_err(Error::db("latest threads"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::db("latest threads: scan"))
    }
}
