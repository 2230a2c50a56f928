//! Workspace user roster.

use rusqlite::types::Value;
use rusqlite::{Connection, Row};

use crate::chunk::{ChunkType, User};

use super::entity::{or_null, Entity, Filter, Order, Repository};
use super::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct DbUser {
    pub id: String,
    pub chunk_id: i64,
    pub username: Option<String>,
    pub idx: i64,
    pub data: String,
}

impl DbUser {
    pub fn new(chunk_id: i64, idx: i64, u: &User) -> Result<Self> {
        Ok(DbUser {
            id: u.id.clone(),
            chunk_id,
            username: (!u.name.is_empty()).then(|| u.name.clone()),
            idx,
            data: serde_json::to_string(u)?,
        })
    }

    pub fn val(&self) -> Result<User> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

impl Entity for DbUser {
    const TABLE: &'static str = "user";

    fn key_columns() -> &'static [&'static str] {
        &["id"]
    }

    fn columns() -> &'static [&'static str] {
        &["id", "chunk_id", "username", "idx", "data"]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            self.id.clone().into(),
            self.chunk_id.into(),
            or_null(
                self.username.is_some(),
                self.username.clone().unwrap_or_default(),
            ),
            self.idx.into(),
            self.data.clone().into(),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DbUser {
            id: row.get(0)?,
            chunk_id: row.get(1)?,
            username: row.get(2)?,
            idx: row.get(3)?,
            data: row.get(4)?,
        })
    }
}

pub(crate) struct UserRepository {
    inner: Repository<DbUser>,
}

impl UserRepository {
    pub fn new() -> Self {
        UserRepository {
            inner: Repository::new(),
        }
    }

    pub fn insert_batch<I>(&self, conn: &Connection, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<DbUser>>,
    {
        self.inner.insert_batch(conn, items)
    }

    /// Latest user rows sorted by username, then id.
    pub fn all(&self, conn: &Connection) -> Result<Vec<DbUser>> {
        self.inner.all_where(
            conn,
            &[ChunkType::Users],
            &Filter::default().ordered(Order::By(vec!["T.username".into(), "T.id".into()])),
        )
    }

    pub fn count(&self, conn: &Connection) -> Result<i64> {
        self.inner.count_of_type(conn, &[ChunkType::Users])
    }

    pub fn get(&self, conn: &Connection, user_id: &str) -> Result<DbUser> {
        self.inner
            .get_of_type(conn, &[ChunkType::Users], user_id.to_string())
    }

    pub fn all_for_chunk(&self, conn: &Connection, chunk_id: i64) -> Result<Vec<DbUser>> {
        self.inner.all_for_chunk(conn, chunk_id)
    }

    /// Stored payloads of the current roster, keyed by user id. Used to skip
    /// re-inserting users whose payload has not changed since the last
    /// capture.
    pub fn current_payloads(
        &self,
        conn: &Connection,
    ) -> Result<std::collections::HashMap<String, String>> {
        let rows = self.inner.all_of_type(conn, &[ChunkType::Users])?;
        Ok(rows.into_iter().map(|u| (u.id, u.data)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{prep_chunks, test_conn, TestChunk};
    use super::*;

    fn user(id: &str, name: &str) -> User {
        User {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn latest_roster_by_username() {
        let conn = test_conn();
        let (_, chunks) = prep_chunks(
            &conn,
            &[
                TestChunk::new(ChunkType::Users, "C1", false),
                TestChunk::new(ChunkType::Users, "C1", true),
            ],
        );
        let r = UserRepository::new();
        r.insert_batch(
            &conn,
            [
                DbUser::new(chunks[0], 0, &user("U1", "zoe")),
                DbUser::new(chunks[0], 1, &user("U2", "amy")),
            ],
        )
        .unwrap();
        // U1 renamed in a later chunk
        r.insert_batch(&conn, [DbUser::new(chunks[1], 0, &user("U1", "ann"))])
            .unwrap();

        assert_eq!(r.count(&conn).unwrap(), 2);
        let names: Vec<_> = r
            .all(&conn)
            .unwrap()
            .into_iter()
            .map(|u| u.username.unwrap())
            .collect();
        assert_eq!(names, ["amy", "ann"]);
        assert_eq!(r.get(&conn, "U1").unwrap().username.as_deref(), Some("ann"));
    }
}
