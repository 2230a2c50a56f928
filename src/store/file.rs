//! File attachments. Rows are denormalized with the owning channel, message
//! and thread so the download queue can be rebuilt without decoding
//! payloads.

use rusqlite::types::Value;
use rusqlite::{Connection, Row};

use crate::chunk::{ChunkType, File, Message};
use crate::fasttime;

use super::entity::{or_null, Entity, Filter, Order, Repository};
use super::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct DbFile {
    pub id: String,
    pub chunk_id: i64,
    pub channel_id: String,
    pub message_id: Option<i64>,
    pub thread_id: Option<i64>,
    pub idx: i64,
    pub mode: Option<String>,
    pub filename: Option<String>,
    pub url: Option<String>,
    pub data: String,
}

impl DbFile {
    /// Builds the row for a file attached to `parent`. The parent timestamp
    /// must be a valid identity key; a file chunk without a locatable parent
    /// is not storable.
    pub fn new(
        chunk_id: i64,
        idx: i64,
        channel_id: &str,
        parent: &Message,
        f: &File,
    ) -> Result<Self> {
        let message_id = fasttime::ts_to_id(&parent.ts)?;
        let thread_id = parent
            .thread_ts
            .as_deref()
            .map(fasttime::ts_to_id)
            .transpose()?;
        Ok(DbFile {
            id: f.id.clone(),
            chunk_id,
            channel_id: channel_id.to_string(),
            message_id: Some(message_id),
            thread_id,
            idx,
            mode: (!f.mode.is_empty()).then(|| f.mode.clone()),
            filename: (!f.name.is_empty()).then(|| f.name.clone()),
            url: f.url_private_download.clone(),
            data: serde_json::to_string(f)?,
        })
    }

    pub fn val(&self) -> Result<File> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

impl Entity for DbFile {
    const TABLE: &'static str = "file";

    fn key_columns() -> &'static [&'static str] {
        &["id"]
    }

    fn columns() -> &'static [&'static str] {
        &[
            "id",
            "chunk_id",
            "channel_id",
            "message_id",
            "thread_id",
            "idx",
            "mode",
            "filename",
            "url",
            "data",
        ]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            self.id.clone().into(),
            self.chunk_id.into(),
            self.channel_id.clone().into(),
            self.message_id.map_or(Value::Null, Value::from),
            self.thread_id.map_or(Value::Null, Value::from),
            self.idx.into(),
            or_null(self.mode.is_some(), self.mode.clone().unwrap_or_default()),
            or_null(
                self.filename.is_some(),
                self.filename.clone().unwrap_or_default(),
            ),
            or_null(self.url.is_some(), self.url.clone().unwrap_or_default()),
            self.data.clone().into(),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DbFile {
            id: row.get(0)?,
            chunk_id: row.get(1)?,
            channel_id: row.get(2)?,
            message_id: row.get(3)?,
            thread_id: row.get(4)?,
            idx: row.get(5)?,
            mode: row.get(6)?,
            filename: row.get(7)?,
            url: row.get(8)?,
            data: row.get(9)?,
        })
    }
}

pub(crate) struct FileRepository {
    inner: Repository<DbFile>,
}

impl FileRepository {
    pub fn new() -> Self {
        FileRepository {
            inner: Repository::new(),
        }
    }

    pub fn insert_batch<I>(&self, conn: &Connection, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<DbFile>>,
    {
        self.inner.insert_batch(conn, items)
    }

    pub fn count(&self, conn: &Connection) -> Result<i64> {
        self.inner.count_of_type(conn, &[ChunkType::Files])
    }

    pub fn get(&self, conn: &Connection, file_id: &str) -> Result<DbFile> {
        self.inner
            .get_of_type(conn, &[ChunkType::Files], file_id.to_string())
    }

    /// Latest file rows of a channel in capture order.
    pub fn all_for_channel(&self, conn: &Connection, channel_id: &str) -> Result<Vec<DbFile>> {
        self.inner.all_where(
            conn,
            &[ChunkType::Files],
            &Filter::new("T.channel_id = ?", vec![channel_id.to_string().into()])
                .ordered(Order::By(vec!["T.message_id".into(), "T.idx".into()])),
        )
    }

    pub fn all_for_chunk(&self, conn: &Connection, chunk_id: i64) -> Result<Vec<DbFile>> {
        self.inner.all_for_chunk(conn, chunk_id)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{prep_chunks, test_conn, TestChunk};
    use super::*;

    fn file(id: &str, name: &str) -> File {
        File {
            id: id.into(),
            name: name.into(),
            url_private_download: Some(format!("https://files.example.com/{id}")),
            ..Default::default()
        }
    }

    #[test]
    fn rows_are_anchored_to_the_parent_message() {
        let conn = test_conn();
        let (_, chunks) = prep_chunks(
            &conn,
            &[TestChunk::new(ChunkType::Files, "C1", false)],
        );
        let parent = Message {
            ts: "100.000001".into(),
            thread_ts: Some("100.000001".into()),
            ..Default::default()
        };
        let r = FileRepository::new();
        r.insert_batch(
            &conn,
            [
                DbFile::new(chunks[0], 0, "C1", &parent, &file("F1", "a.png")),
                DbFile::new(chunks[0], 1, "C1", &parent, &file("F2", "b.png")),
            ],
        )
        .unwrap();

        let got = r.get(&conn, "F1").unwrap();
        assert_eq!(got.message_id, Some(100_000001));
        assert_eq!(got.thread_id, Some(100_000001));
        assert_eq!(got.filename.as_deref(), Some("a.png"));

        let all = r.all_for_channel(&conn, "C1").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(r.count(&conn).unwrap(), 2);
    }

    #[test]
    fn unparseable_parent_is_rejected() {
        let parent = Message {
            ts: "garbage".into(),
            ..Default::default()
        };
        assert!(DbFile::new(1, 0, "C1", &parent, &file("F1", "a.png")).is_err());
    }
}
