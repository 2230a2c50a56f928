//! Search result captures. Unlike channel entities these are append-only:
//! each hit is keyed by its own rowid, so repeated searches accumulate
//! rather than supersede.

use rusqlite::types::Value;
use rusqlite::{Connection, Row};

use crate::chunk::{ChunkType, File, SearchMessage};

use super::entity::{or_null, Entity, Repository};
use super::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct DbSearchMessage {
    pub chunk_id: i64,
    pub ts: String,
    pub channel_id: Option<String>,
    pub idx: i64,
    pub txt: Option<String>,
    pub data: String,
}

impl DbSearchMessage {
    pub fn new(chunk_id: i64, idx: i64, m: &SearchMessage) -> Result<Self> {
        Ok(DbSearchMessage {
            chunk_id,
            ts: m.ts.clone(),
            channel_id: m.channel.as_ref().map(|c| c.id.clone()),
            idx,
            txt: (!m.text.is_empty()).then(|| m.text.clone()),
            data: serde_json::to_string(m)?,
        })
    }

    pub fn val(&self) -> Result<SearchMessage> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

impl Entity for DbSearchMessage {
    const TABLE: &'static str = "search_message";

    // the rowid: every capture is its own entity
    fn key_columns() -> &'static [&'static str] {
        &["id"]
    }

    fn columns() -> &'static [&'static str] {
        &["chunk_id", "ts", "channel_id", "idx", "txt", "data"]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            self.chunk_id.into(),
            self.ts.clone().into(),
            or_null(
                self.channel_id.is_some(),
                self.channel_id.clone().unwrap_or_default(),
            ),
            self.idx.into(),
            or_null(self.txt.is_some(), self.txt.clone().unwrap_or_default()),
            self.data.clone().into(),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DbSearchMessage {
            chunk_id: row.get(0)?,
            ts: row.get(1)?,
            channel_id: row.get(2)?,
            idx: row.get(3)?,
            txt: row.get(4)?,
            data: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DbSearchFile {
    pub chunk_id: i64,
    pub file_id: String,
    pub idx: i64,
    pub filename: Option<String>,
    pub url: Option<String>,
    pub data: String,
}

impl DbSearchFile {
    pub fn new(chunk_id: i64, idx: i64, f: &File) -> Result<Self> {
        Ok(DbSearchFile {
            chunk_id,
            file_id: f.id.clone(),
            idx,
            filename: (!f.name.is_empty()).then(|| f.name.clone()),
            url: f.url_private_download.clone(),
            data: serde_json::to_string(f)?,
        })
    }

    pub fn val(&self) -> Result<File> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

impl Entity for DbSearchFile {
    const TABLE: &'static str = "search_file";

    fn key_columns() -> &'static [&'static str] {
        &["id"]
    }

    fn columns() -> &'static [&'static str] {
        &["chunk_id", "file_id", "idx", "filename", "url", "data"]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            self.chunk_id.into(),
            self.file_id.clone().into(),
            self.idx.into(),
            or_null(
                self.filename.is_some(),
                self.filename.clone().unwrap_or_default(),
            ),
            or_null(self.url.is_some(), self.url.clone().unwrap_or_default()),
            self.data.clone().into(),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DbSearchFile {
            chunk_id: row.get(0)?,
            file_id: row.get(1)?,
            idx: row.get(2)?,
            filename: row.get(3)?,
            url: row.get(4)?,
            data: row.get(5)?,
        })
    }
}

pub(crate) struct SearchRepository {
    messages: Repository<DbSearchMessage>,
    files: Repository<DbSearchFile>,
}

impl SearchRepository {
    pub fn new() -> Self {
        SearchRepository {
            messages: Repository::new(),
            files: Repository::new(),
        }
    }

    pub fn insert_messages<I>(&self, conn: &Connection, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<DbSearchMessage>>,
    {
        self.messages.insert_batch(conn, items)
    }

    pub fn insert_files<I>(&self, conn: &Connection, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<DbSearchFile>>,
    {
        self.files.insert_batch(conn, items)
    }

    /// Every captured message hit, in capture order.
    pub fn all_messages(&self, conn: &Connection) -> Result<Vec<DbSearchMessage>> {
        self.messages
            .all_of_type(conn, &[ChunkType::SearchMessages])
    }

    pub fn all_files(&self, conn: &Connection) -> Result<Vec<DbSearchFile>> {
        self.files.all_of_type(conn, &[ChunkType::SearchFiles])
    }

    pub fn messages_for_chunk(
        &self,
        conn: &Connection,
        chunk_id: i64,
    ) -> Result<Vec<DbSearchMessage>> {
        let mut rows = self.messages.all_for_chunk(conn, chunk_id)?;
        rows.sort_by_key(|r| r.idx);
        Ok(rows)
    }

    pub fn files_for_chunk(&self, conn: &Connection, chunk_id: i64) -> Result<Vec<DbSearchFile>> {
        let mut rows = self.files.all_for_chunk(conn, chunk_id)?;
        rows.sort_by_key(|r| r.idx);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{prep_chunks, test_conn, TestChunk};
    use super::*;
    use crate::chunk::SearchChannel;

    #[test]
    fn repeated_hits_accumulate() {
        let conn = test_conn();
        let (_, chunks) = prep_chunks(
            &conn,
            &[
                TestChunk {
                    type_id: ChunkType::SearchMessages,
                    channel_id: None,
                    is_final: false,
                    thread_only: false,
                },
                TestChunk {
                    type_id: ChunkType::SearchMessages,
                    channel_id: None,
                    is_final: true,
                    thread_only: false,
                },
            ],
        );
        let hit = SearchMessage {
            ts: "100.000000".into(),
            text: "needle".into(),
            channel: Some(SearchChannel {
                id: "C1".into(),
                name: "general".into(),
            }),
            ..Default::default()
        };
        let r = SearchRepository::new();
        r.insert_messages(&conn, [DbSearchMessage::new(chunks[0], 0, &hit)])
            .unwrap();
        r.insert_messages(&conn, [DbSearchMessage::new(chunks[1], 0, &hit)])
            .unwrap();

        // same ts twice: search hits are never deduplicated
        let all = r.all_messages(&conn).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].channel_id.as_deref(), Some("C1"));
    }
}
