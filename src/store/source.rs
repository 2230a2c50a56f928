//! Read facade over a finished (or in-progress) crawl database.
//!
//! Everything here resolves latest-wins: readers see the newest captured
//! revision of each entity, never the capture history. The history stays
//! reachable through [`Source::replay`], which re-emits a session's chunks
//! in their original order.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use crate::chunk::{Channel, ChunkConsumer, ChunkType, Message, SearchMessage, User, Workspace};
use crate::fasttime;

use super::assemble::assemble;
use super::channel::ChannelRepository;
use super::chunkrec::ChunkRepository;
use super::file::FileRepository;
use super::message::MessageRepository;
use super::schema;
use super::search::SearchRepository;
use super::session::{Session, SessionRepository};
use super::user::UserRepository;
use super::workspace::WorkspaceRepository;
use super::{Error, Result};

pub struct Source {
    conn: Connection,
}

impl Source {
    /// Opens the database read-only. The file is first opened writable to
    /// apply pending migrations and fold the WAL back into the main file,
    /// then reopened with a read-only handle.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        {
            let conn = Connection::open(path).map_err(Error::db("open database"))?;
            schema::migrate(&conn)?;
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
                .map_err(Error::db("checkpoint"))?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(Error::db("reopen read-only"))?;
        Ok(Source { conn })
    }

    /// Wraps an already-open connection, migrating it if needed.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        schema::migrate(&conn)?;
        Ok(Source { conn })
    }

    /// The channel roster. Info snapshots take precedence; channels only
    /// seen in workspace listings fill the rest. Membership is attached
    /// from the membership table. Sorted by name.
    pub fn channels(&self) -> Result<Vec<Channel>> {
        let repo = ChannelRepository::new();
        let info = repo.all_of_type(&self.conn, &[ChunkType::ChannelInfo])?;
        let listed = repo.all_of_type(&self.conn, &[ChunkType::Channels])?;

        let known: HashSet<&str> = info.iter().map(|c| c.id.as_str()).collect();
        let mut out = Vec::with_capacity(info.len() + listed.len());
        for row in info.iter().chain(listed.iter().filter(|c| !known.contains(c.id.as_str()))) {
            let mut ch = row.val()?;
            ch.members = repo.members_of(&self.conn, &row.id)?;
            out.push(ch);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    /// Latest snapshot of one channel, preferring the info probe over the
    /// workspace listing.
    pub fn channel_info(&self, channel_id: &str) -> Result<Channel> {
        let repo = ChannelRepository::new();
        let row = match repo.get_info(&self.conn, channel_id) {
            Err(Error::NotFound) => repo.get(&self.conn, channel_id)?,
            other => other?,
        };
        let mut ch = row.val()?;
        ch.members = repo.members_of(&self.conn, channel_id)?;
        Ok(ch)
    }

    pub fn users(&self) -> Result<Vec<User>> {
        UserRepository::new()
            .all(&self.conn)?
            .iter()
            .map(|r| r.val())
            .collect()
    }

    pub fn workspace_info(&self) -> Result<Workspace> {
        WorkspaceRepository::new().get(&self.conn)?.val()
    }

    /// Latest-wins channel timeline in timestamp order.
    pub fn all_messages(&self, channel_id: &str) -> Result<Vec<Message>> {
        MessageRepository::new()
            .all_for_channel(&self.conn, channel_id)?
            .iter()
            .map(|r| r.val())
            .collect()
    }

    /// Latest-wins thread view (starter first) in timestamp order.
    pub fn all_thread_messages(&self, channel_id: &str, thread_ts: &str) -> Result<Vec<Message>> {
        let thread_id = fasttime::ts_to_id(thread_ts)?;
        MessageRepository::new()
            .all_for_thread(&self.conn, channel_id, thread_id)?
            .iter()
            .map(|r| r.val())
            .collect()
    }

    /// Merged flat feed of a channel: timeline messages and thread replies
    /// together in timestamp order, newest first when `desc` is set.
    pub fn sorted(&self, channel_id: &str, desc: bool) -> Result<Vec<Message>> {
        MessageRepository::new()
            .sorted(&self.conn, channel_id, desc)?
            .iter()
            .map(|r| r.val())
            .collect()
    }

    pub fn count_messages(&self, channel_id: &str) -> Result<i64> {
        MessageRepository::new().count_channel(&self.conn, channel_id)
    }

    pub fn files_for_channel(&self, channel_id: &str) -> Result<Vec<crate::chunk::File>> {
        FileRepository::new()
            .all_for_channel(&self.conn, channel_id)?
            .iter()
            .map(|r| r.val())
            .collect()
    }

    pub fn search_messages(&self) -> Result<Vec<SearchMessage>> {
        SearchRepository::new()
            .all_messages(&self.conn)?
            .iter()
            .map(|r| r.val())
            .collect()
    }

    pub fn search_files(&self) -> Result<Vec<crate::chunk::File>> {
        SearchRepository::new()
            .all_files(&self.conn)?
            .iter()
            .map(|r| r.val())
            .collect()
    }

    pub fn sessions(&self) -> Result<Vec<Session>> {
        SessionRepository.all(&self.conn)
    }

    pub fn session(&self, id: i64) -> Result<Session> {
        SessionRepository.get(&self.conn, id)
    }

    /// Resume points for an incremental crawl: per channel (keyed by the
    /// channel id) and per thread (keyed by `channel:thread_ts`), the
    /// capture time of the newest stored message.
    pub fn latest(&self) -> Result<HashMap<String, DateTime<Utc>>> {
        let repo = MessageRepository::new();
        let mut out = HashMap::new();
        for m in repo.latest_messages(&self.conn)? {
            out.insert(m.channel_id, fasttime::id_to_time(m.id));
        }
        for t in repo.latest_threads(&self.conn)? {
            out.insert(
                format!("{}:{}", t.channel_id, t.thread_ts),
                fasttime::id_to_time(t.id),
            );
        }
        Ok(out)
    }

    /// Re-emits every chunk of a finished session, in ledger order, into
    /// the consumer. Fails with [`Error::Incomplete`] if the session never
    /// finished.
    pub fn replay(&self, session_id: i64, consumer: &mut dyn ChunkConsumer) -> Result<()> {
        let session = SessionRepository.get(&self.conn, session_id)?;
        if !session.finished {
            return Err(Error::Incomplete(session_id));
        }
        let chunks = ChunkRepository.all_for_session(&self.conn, session_id, &[])?;
        debug!(session_id, chunks = chunks.len(), "replaying session");
        for rec in &chunks {
            consumer.encode(assemble(&self.conn, rec)?)?;
        }
        Ok(())
    }
}
