//! Channel storage: the channel roster, per-channel info snapshots, and the
//! membership table.
//!
//! Channel rows arrive from two chunk kinds with different fidelity: the
//! workspace-wide listing and the per-channel info probe. Readers pick which
//! kind they trust through the type filter, so a stale listing never
//! overrides a newer info snapshot within the same filter.

use rusqlite::types::Value;
use rusqlite::{Connection, Row};

use crate::chunk::{Channel, ChunkType};

use super::entity::{or_null, Entity, Filter, Order, Repository};
use super::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct DbChannel {
    pub id: String,
    pub chunk_id: i64,
    pub name: Option<String>,
    pub idx: i64,
    pub data: String,
}

impl DbChannel {
    pub fn new(chunk_id: i64, idx: i64, c: &Channel) -> Result<Self> {
        Ok(DbChannel {
            id: c.id.clone(),
            chunk_id,
            name: (!c.name.is_empty()).then(|| c.name.clone()),
            idx,
            data: serde_json::to_string(c)?,
        })
    }

    pub fn val(&self) -> Result<Channel> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

impl Entity for DbChannel {
    const TABLE: &'static str = "channel";

    fn key_columns() -> &'static [&'static str] {
        &["id"]
    }

    fn columns() -> &'static [&'static str] {
        &["id", "chunk_id", "name", "idx", "data"]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            self.id.clone().into(),
            self.chunk_id.into(),
            or_null(self.name.is_some(), self.name.clone().unwrap_or_default()),
            self.idx.into(),
            self.data.clone().into(),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DbChannel {
            id: row.get(0)?,
            chunk_id: row.get(1)?,
            name: row.get(2)?,
            idx: row.get(3)?,
            data: row.get(4)?,
        })
    }
}

/// One membership row per (channel, user) within a chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct DbChannelUser {
    pub chunk_id: i64,
    pub channel_id: String,
    pub user_id: String,
    pub idx: i64,
}

impl Entity for DbChannelUser {
    const TABLE: &'static str = "channel_user";

    fn key_columns() -> &'static [&'static str] {
        &["channel_id", "user_id"]
    }

    fn columns() -> &'static [&'static str] {
        &["chunk_id", "channel_id", "user_id", "idx"]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            self.chunk_id.into(),
            self.channel_id.clone().into(),
            self.user_id.clone().into(),
            self.idx.into(),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DbChannelUser {
            chunk_id: row.get(0)?,
            channel_id: row.get(1)?,
            user_id: row.get(2)?,
            idx: row.get(3)?,
        })
    }
}

pub(crate) struct ChannelRepository {
    inner: Repository<DbChannel>,
    members: Repository<DbChannelUser>,
}

impl ChannelRepository {
    pub fn new() -> Self {
        ChannelRepository {
            inner: Repository::new(),
            members: Repository::new(),
        }
    }

    pub fn insert_batch<I>(&self, conn: &Connection, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<DbChannel>>,
    {
        self.inner.insert_batch(conn, items)
    }

    pub fn insert_members<I>(&self, conn: &Connection, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<DbChannelUser>>,
    {
        self.members.insert_batch(conn, items)
    }

    /// Latest channel rows from chunks of the given kinds, sorted by name.
    pub fn all_of_type(&self, conn: &Connection, types: &[ChunkType]) -> Result<Vec<DbChannel>> {
        self.inner.all_where(
            conn,
            types,
            &Filter::default().ordered(Order::By(vec!["T.name".into(), "T.id".into()])),
        )
    }

    /// Latest info snapshot for one channel.
    pub fn get_info(&self, conn: &Connection, channel_id: &str) -> Result<DbChannel> {
        self.inner
            .get_of_type(conn, &[ChunkType::ChannelInfo], channel_id.to_string())
    }

    pub fn get(&self, conn: &Connection, channel_id: &str) -> Result<DbChannel> {
        self.inner.get(conn, channel_id.to_string())
    }

    pub fn all_for_chunk(&self, conn: &Connection, chunk_id: i64) -> Result<Vec<DbChannel>> {
        self.inner.all_for_chunk(conn, chunk_id)
    }

    pub fn one_for_chunk(&self, conn: &Connection, chunk_id: i64) -> Result<DbChannel> {
        self.inner.one_for_chunk(conn, chunk_id)
    }

    /// Latest membership of one channel, in capture order.
    pub fn members_of(&self, conn: &Connection, channel_id: &str) -> Result<Vec<String>> {
        let rows = self.members.all_where(
            conn,
            &[ChunkType::ChannelUsers],
            &Filter::new("T.channel_id = ?", vec![channel_id.to_string().into()])
                .ordered(Order::By(vec!["T.idx".into()])),
        )?;
        Ok(rows.into_iter().map(|r| r.user_id).collect())
    }

    pub fn members_for_chunk(&self, conn: &Connection, chunk_id: i64) -> Result<Vec<DbChannelUser>> {
        let mut rows = self.members.all_for_chunk(conn, chunk_id)?;
        rows.sort_by_key(|r| r.idx);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{prep_chunks, test_conn, TestChunk};
    use super::*;

    fn chan(id: &str, name: &str) -> Channel {
        Channel {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn type_filter_scopes_latest_wins() {
        let conn = test_conn();
        let (_, chunks) = prep_chunks(
            &conn,
            &[
                TestChunk::new(ChunkType::ChannelInfo, "C1", true),
                TestChunk::new(ChunkType::Channels, "C1", true),
            ],
        );
        let r = ChannelRepository::new();
        r.insert_batch(&conn, [DbChannel::new(chunks[0], 0, &chan("C1", "old"))])
            .unwrap();
        r.insert_batch(&conn, [DbChannel::new(chunks[1], 0, &chan("C1", "new"))])
            .unwrap();

        // unfiltered, the later listing row wins
        assert_eq!(r.get(&conn, "C1").unwrap().name.as_deref(), Some("new"));
        // the info filter never sees listing rows
        assert_eq!(
            r.get_info(&conn, "C1").unwrap().name.as_deref(),
            Some("old")
        );
    }

    #[test]
    fn roster_sorts_by_name() {
        let conn = test_conn();
        let (_, chunks) = prep_chunks(
            &conn,
            &[TestChunk::new(ChunkType::Channels, "C1", true)],
        );
        let r = ChannelRepository::new();
        r.insert_batch(
            &conn,
            [
                DbChannel::new(chunks[0], 0, &chan("C2", "zulu")),
                DbChannel::new(chunks[0], 1, &chan("C1", "alpha")),
            ],
        )
        .unwrap();
        let names: Vec<_> = r
            .all_of_type(&conn, &[ChunkType::Channels])
            .unwrap()
            .into_iter()
            .map(|c| c.name.unwrap())
            .collect();
        assert_eq!(names, ["alpha", "zulu"]);
    }

    #[test]
    fn membership_is_versioned_per_pair() {
        let conn = test_conn();
        let (_, chunks) = prep_chunks(
            &conn,
            &[
                TestChunk::new(ChunkType::ChannelUsers, "C1", false),
                TestChunk::new(ChunkType::ChannelUsers, "C1", true),
            ],
        );
        let r = ChannelRepository::new();
        r.insert_members(
            &conn,
            [
                Ok(DbChannelUser {
                    chunk_id: chunks[0],
                    channel_id: "C1".into(),
                    user_id: "U1".into(),
                    idx: 0,
                }),
                Ok(DbChannelUser {
                    chunk_id: chunks[0],
                    channel_id: "C1".into(),
                    user_id: "U2".into(),
                    idx: 1,
                }),
            ],
        )
        .unwrap();
        // the pair repeats in a later chunk; it must not double-count
        r.insert_members(
            &conn,
            [Ok(DbChannelUser {
                chunk_id: chunks[1],
                channel_id: "C1".into(),
                user_id: "U1".into(),
                idx: 0,
            })],
        )
        .unwrap();
        let members = r.members_of(&conn, "C1").unwrap();
        assert_eq!(members, ["U1", "U2"]);
    }
}
