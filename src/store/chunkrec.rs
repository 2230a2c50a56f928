//! Chunk ledger: one row per atomically-written payload batch.
//!
//! Chunk ids come from the rowid sequence, so they strictly increase; the
//! versioned queries rely on that for tie-free latest-wins resolution.

use rusqlite::{params, Connection, Row};

use crate::chunk::{Chunk, ChunkType};

use super::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct DbChunk {
    pub id: i64,
    pub session_id: i64,
    /// Capture time, unix milliseconds.
    pub unix_ts: i64,
    pub type_id: ChunkType,
    pub num_rec: i64,
    pub channel_id: Option<String>,
    pub search_query: Option<String>,
    pub is_final: bool,
    pub thread_only: Option<bool>,
}

impl DbChunk {
    /// Chunk header for reassembly; the payload vectors are filled by the
    /// per-type assemblers.
    pub fn to_chunk(&self) -> Chunk {
        Chunk {
            chunk_type: self.type_id,
            timestamp: self.unix_ts,
            channel_id: self.channel_id.clone().unwrap_or_default(),
            count: self.num_rec,
            is_last: self.is_final,
            thread_only: self.thread_only.unwrap_or_default(),
            search_query: self.search_query.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<DbChunk> {
    Ok(DbChunk {
        id: row.get(0)?,
        session_id: row.get(1)?,
        unix_ts: row.get(2)?,
        type_id: row.get(3)?,
        num_rec: row.get(4)?,
        channel_id: row.get(5)?,
        search_query: row.get(6)?,
        is_final: row.get(7)?,
        thread_only: row.get(8)?,
    })
}

const COLUMNS: &str =
    "id, session_id, unix_ts, type_id, num_rec, channel_id, search_query, final, thread_only";

pub(crate) struct ChunkRepository;

impl ChunkRepository {
    /// Inserts the ledger row and returns the assigned chunk id. Fails if
    /// the owning session does not exist.
    pub fn insert(&self, conn: &Connection, c: &DbChunk) -> Result<i64> {
        conn.query_row(
            "INSERT INTO chunk \
             (session_id, unix_ts, type_id, num_rec, channel_id, search_query, final, thread_only) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            params![
                c.session_id,
                c.unix_ts,
                c.type_id,
                c.num_rec,
                c.channel_id,
                c.search_query,
                c.is_final,
                c.thread_only,
            ],
            |row| row.get(0),
        )
        .map_err(Error::db("insert chunk"))
    }

    /// All chunks of a session in ledger order (ascending id), optionally
    /// restricted to a set of types.
    pub fn all_for_session(
        &self,
        conn: &Connection,
        session_id: i64,
        types: &[ChunkType],
    ) -> Result<Vec<DbChunk>> {
        let mut sql = format!("SELECT {COLUMNS} FROM chunk WHERE session_id = ?");
        let mut binds: Vec<rusqlite::types::Value> = vec![session_id.into()];
        if !types.is_empty() {
            let ph = vec!["?"; types.len()].join(",");
            sql.push_str(&format!(" AND type_id IN ({ph})"));
            binds.extend(types.iter().map(|t| rusqlite::types::Value::from(*t as i64)));
        }
        sql.push_str(" ORDER BY id");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(Error::db("list chunks: prepare"))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(binds), from_row)
            .map_err(Error::db("list chunks"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::db("list chunks: scan"))
    }

    /// Per-type chunk counts for a session.
    pub fn count_for_session(
        &self,
        conn: &Connection,
        session_id: i64,
    ) -> Result<Vec<(ChunkType, i64)>> {
        let mut stmt = conn
            .prepare("SELECT type_id, COUNT(*) FROM chunk WHERE session_id = ? GROUP BY type_id")
            .map_err(Error::db("count chunks: prepare"))?;
        let rows = stmt
            .query_map([session_id], |row| {
                Ok((row.get::<_, ChunkType>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(Error::db("count chunks"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::db("count chunks: scan"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{test_conn, test_session};
    use super::*;

    fn chunk_row(session_id: i64, type_id: ChunkType) -> DbChunk {
        DbChunk {
            id: 0,
            session_id,
            unix_ts: 1_700_000_000_000,
            type_id,
            num_rec: 0,
            channel_id: Some("C123".into()),
            search_query: None,
            is_final: false,
            thread_only: None,
        }
    }

    #[test]
    fn ids_strictly_increase() {
        let conn = test_conn();
        let sid = test_session(&conn);
        let r = ChunkRepository;
        let a = r.insert(&conn, &chunk_row(sid, ChunkType::Messages)).unwrap();
        let b = r.insert(&conn, &chunk_row(sid, ChunkType::Users)).unwrap();
        assert!(b > a);
    }

    #[test]
    fn insert_requires_session() {
        let conn = test_conn();
        let r = ChunkRepository;
        assert!(r.insert(&conn, &chunk_row(42, ChunkType::Messages)).is_err());
    }

    #[test]
    fn listing_is_in_ledger_order_and_typed() {
        let conn = test_conn();
        let sid = test_session(&conn);
        let r = ChunkRepository;
        r.insert(&conn, &chunk_row(sid, ChunkType::Messages)).unwrap();
        r.insert(&conn, &chunk_row(sid, ChunkType::Users)).unwrap();
        r.insert(&conn, &chunk_row(sid, ChunkType::Messages)).unwrap();

        let all = r.all_for_session(&conn, sid, &[]).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));

        let msgs = r
            .all_for_session(&conn, sid, &[ChunkType::Messages])
            .unwrap();
        assert_eq!(msgs.len(), 2);

        let counts = r.count_for_session(&conn, sid).unwrap();
        assert!(counts.contains(&(ChunkType::Messages, 2)));
        assert!(counts.contains(&(ChunkType::Users, 1)));
    }
}
