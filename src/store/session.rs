//! Session ledger: one row per crawl execution.
//!
//! A session is inserted once at run start and mutated exactly once, to set
//! the finished flag. Parent references are enforced by the schema's
//! foreign key, not re-validated above it.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Error, Result, SessionInfo};

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub from_ts: Option<DateTime<Utc>>,
    pub to_ts: Option<DateTime<Utc>>,
    pub files_enabled: bool,
    pub avatars_enabled: bool,
    pub mode: String,
    pub args: String,
    pub finished: bool,
}

const COLUMNS: &str = "id, parent_id, created_at, updated_at, from_ts, to_ts, \
                       files_enabled, avatars_enabled, mode, args, finished";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
        from_ts: row
            .get::<_, Option<String>>(4)?
            .and_then(|s| s.parse().ok()),
        to_ts: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| s.parse().ok()),
        files_enabled: row.get(6)?,
        avatars_enabled: row.get(7)?,
        mode: row.get(8)?,
        args: row.get(9)?,
        finished: row.get(10)?,
    })
}

pub(crate) struct SessionRepository;

impl SessionRepository {
    /// Records a new crawl execution and returns its id. Fails if
    /// `parent_id` names a session that does not exist.
    pub fn insert(
        &self,
        conn: &Connection,
        info: &SessionInfo,
        parent_id: Option<i64>,
    ) -> Result<i64> {
        conn.query_row(
            "INSERT INTO session \
             (parent_id, from_ts, to_ts, files_enabled, avatars_enabled, mode, args) \
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
            params![
                parent_id,
                info.from_ts.map(|t| t.to_rfc3339()),
                info.to_ts.map(|t| t.to_rfc3339()),
                info.files_enabled,
                info.avatars_enabled,
                info.mode,
                info.args,
            ],
            |row| row.get(0),
        )
        .map_err(Error::db("insert session"))
    }

    /// Marks the session finished. Fails with `NotFound` if the row does
    /// not exist.
    pub fn finalize(&self, conn: &Connection, id: i64) -> Result<()> {
        let n = conn
            .execute(
                "UPDATE session SET finished = 1, updated_at = datetime('now') WHERE id = ?",
                params![id],
            )
            .map_err(Error::db("finalize session"))?;
        if n == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    pub fn get(&self, conn: &Connection, id: i64) -> Result<Session> {
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM session WHERE id = ?"),
            params![id],
            from_row,
        )
        .optional()
        .map_err(Error::db("get session"))?
        .ok_or(Error::NotFound)
    }

    pub fn all(&self, conn: &Connection) -> Result<Vec<Session>> {
        let mut stmt = conn
            .prepare(&format!("SELECT {COLUMNS} FROM session ORDER BY id"))
            .map_err(Error::db("list sessions: prepare"))?;
        let rows = stmt
            .query_map([], from_row)
            .map_err(Error::db("list sessions"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::db("list sessions: scan"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::test_conn;
    use super::*;

    fn info(mode: &str) -> SessionInfo {
        SessionInfo {
            mode: mode.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn insert_and_get() {
        let conn = test_conn();
        let r = SessionRepository;
        let id = r.insert(&conn, &info("archive"), None).unwrap();
        let s = r.get(&conn, id).unwrap();
        assert_eq!(s.mode, "archive");
        assert!(!s.finished);
        assert!(s.parent_id.is_none());
    }

    #[test]
    fn insert_with_missing_parent_fails() {
        let conn = test_conn();
        let r = SessionRepository;
        let err = r.insert(&conn, &info("resume"), Some(999)).unwrap_err();
        assert!(!err.is_not_found(), "FK violation is a storage error");
    }

    #[test]
    fn insert_resumption_chain() {
        let conn = test_conn();
        let r = SessionRepository;
        let first = r.insert(&conn, &info("archive"), None).unwrap();
        let second = r.insert(&conn, &info("resume"), Some(first)).unwrap();
        assert_eq!(r.get(&conn, second).unwrap().parent_id, Some(first));
    }

    #[test]
    fn finalize_once() {
        let conn = test_conn();
        let r = SessionRepository;
        let id = r.insert(&conn, &info("archive"), None).unwrap();
        r.finalize(&conn, id).unwrap();
        assert!(r.get(&conn, id).unwrap().finished);
        assert!(r.finalize(&conn, 999).unwrap_err().is_not_found());
    }

    #[test]
    fn all_in_insert_order() {
        let conn = test_conn();
        let r = SessionRepository;
        r.insert(&conn, &info("a"), None).unwrap();
        r.insert(&conn, &info("b"), None).unwrap();
        let all = r.all(&conn).unwrap();
        assert_eq!(
            all.iter().map(|s| s.mode.as_str()).collect::<Vec<_>>(),
            ["a", "b"]
        );
    }
}
