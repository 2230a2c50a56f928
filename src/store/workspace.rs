//! Workspace identity snapshots, one per auth probe.

use rusqlite::types::Value;
use rusqlite::{Connection, Row};

use crate::chunk::{ChunkType, Workspace};

use super::entity::{or_null, Entity, Repository};
use super::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct DbWorkspace {
    pub chunk_id: i64,
    pub team: String,
    pub username: Option<String>,
    pub team_id: String,
    pub user_id: String,
    pub enterprise_id: Option<String>,
    pub url: Option<String>,
    pub data: String,
}

impl DbWorkspace {
    pub fn new(chunk_id: i64, w: &Workspace) -> Result<Self> {
        Ok(DbWorkspace {
            chunk_id,
            team: w.team.clone(),
            username: (!w.user.is_empty()).then(|| w.user.clone()),
            team_id: w.team_id.clone(),
            user_id: w.user_id.clone(),
            enterprise_id: w.enterprise_id.clone(),
            url: (!w.url.is_empty()).then(|| w.url.clone()),
            data: serde_json::to_string(w)?,
        })
    }

    pub fn val(&self) -> Result<Workspace> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

impl Entity for DbWorkspace {
    const TABLE: &'static str = "workspace";

    fn key_columns() -> &'static [&'static str] {
        &["team_id"]
    }

    // the autoincrement id stays out of the insert list
    fn columns() -> &'static [&'static str] {
        &[
            "chunk_id",
            "team",
            "username",
            "team_id",
            "user_id",
            "enterprise_id",
            "url",
            "data",
        ]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            self.chunk_id.into(),
            self.team.clone().into(),
            or_null(
                self.username.is_some(),
                self.username.clone().unwrap_or_default(),
            ),
            self.team_id.clone().into(),
            self.user_id.clone().into(),
            or_null(
                self.enterprise_id.is_some(),
                self.enterprise_id.clone().unwrap_or_default(),
            ),
            or_null(self.url.is_some(), self.url.clone().unwrap_or_default()),
            self.data.clone().into(),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DbWorkspace {
            chunk_id: row.get(0)?,
            team: row.get(1)?,
            username: row.get(2)?,
            team_id: row.get(3)?,
            user_id: row.get(4)?,
            enterprise_id: row.get(5)?,
            url: row.get(6)?,
            data: row.get(7)?,
        })
    }
}

pub(crate) struct WorkspaceRepository {
    inner: Repository<DbWorkspace>,
}

impl WorkspaceRepository {
    pub fn new() -> Self {
        WorkspaceRepository {
            inner: Repository::new(),
        }
    }

    pub fn insert(&self, conn: &Connection, w: &DbWorkspace) -> Result<()> {
        self.inner.insert(conn, w)
    }

    /// The latest workspace snapshot.
    pub fn get(&self, conn: &Connection) -> Result<DbWorkspace> {
        self.inner
            .all_of_type(conn, &[ChunkType::WorkspaceInfo])?
            .into_iter()
            .next()
            .ok_or(super::Error::NotFound)
    }

    pub fn one_for_chunk(&self, conn: &Connection, chunk_id: i64) -> Result<DbWorkspace> {
        self.inner.one_for_chunk(conn, chunk_id)
    }
}
