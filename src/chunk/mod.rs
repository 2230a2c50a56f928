//! The chunk is the unit of exchange with the crawler: one API page of
//! same-kind records, written to the store atomically.

mod types;

pub use types::{
    Channel, File, Message, SearchChannel, SearchMessage, User, Workspace,
    LATEST_REPLY_NO_REPLIES,
};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

use crate::store::Error;

/// Type tag of a chunk. The numeric values are stored in the `chunk` table
/// and must stay stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
#[repr(u8)]
pub enum ChunkType {
    Messages = 0,
    ThreadMessages = 1,
    Files = 2,
    Users = 3,
    Channels = 4,
    ChannelInfo = 5,
    WorkspaceInfo = 6,
    ChannelUsers = 7,
    SearchMessages = 8,
    SearchFiles = 9,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Messages => "messages",
            ChunkType::ThreadMessages => "thread_messages",
            ChunkType::Files => "files",
            ChunkType::Users => "users",
            ChunkType::Channels => "channels",
            ChunkType::ChannelInfo => "channel_info",
            ChunkType::WorkspaceInfo => "workspace_info",
            ChunkType::ChannelUsers => "channel_users",
            ChunkType::SearchMessages => "search_messages",
            ChunkType::SearchFiles => "search_files",
        }
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ChunkType> for i64 {
    fn from(ct: ChunkType) -> i64 {
        ct as i64
    }
}

impl TryFrom<i64> for ChunkType {
    type Error = Error;

    fn try_from(v: i64) -> Result<Self, Error> {
        Ok(match v {
            0 => ChunkType::Messages,
            1 => ChunkType::ThreadMessages,
            2 => ChunkType::Files,
            3 => ChunkType::Users,
            4 => ChunkType::Channels,
            5 => ChunkType::ChannelInfo,
            6 => ChunkType::WorkspaceInfo,
            7 => ChunkType::ChannelUsers,
            8 => ChunkType::SearchMessages,
            9 => ChunkType::SearchFiles,
            _ => return Err(Error::Contract(format!("unknown chunk type {v}"))),
        })
    }
}

impl ToSql for ChunkType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(*self as i64))
    }
}

impl FromSql for ChunkType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let v = i64::column_result(value)?;
        ChunkType::try_from(v).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// One atomically-persisted batch of captured payload. Exactly one of the
/// payload vectors is populated, matching `chunk_type`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(rename = "t")]
    pub chunk_type: ChunkType,
    /// Capture time, unix milliseconds.
    #[serde(rename = "ts")]
    pub timestamp: i64,
    #[serde(rename = "id", default, skip_serializing_if = "String::is_empty")]
    pub channel_id: String,
    #[serde(rename = "n", default)]
    pub count: i64,
    /// Set when this is the last chunk needed for its channel/thread/query.
    #[serde(rename = "l", default)]
    pub is_last: bool,
    /// Set on thread-message chunks captured in thread-only mode.
    #[serde(rename = "to", default)]
    pub thread_only: bool,
    #[serde(rename = "r", default, skip_serializing_if = "String::is_empty")]
    pub thread_ts: String,

    /// Parent message of a thread or file chunk.
    #[serde(rename = "p", default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Message>,
    #[serde(rename = "ci", default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(rename = "w", default, skip_serializing_if = "Option::is_none")]
    pub workspace_info: Option<Workspace>,

    #[serde(rename = "m", default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(rename = "f", default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,
    #[serde(rename = "u", default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<User>,
    #[serde(rename = "ch", default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<Channel>,
    #[serde(rename = "cu", default, skip_serializing_if = "Vec::is_empty")]
    pub channel_users: Vec<String>,
    #[serde(rename = "sq", default, skip_serializing_if = "String::is_empty")]
    pub search_query: String,
    #[serde(rename = "sm", default, skip_serializing_if = "Vec::is_empty")]
    pub search_messages: Vec<SearchMessage>,
    #[serde(rename = "sf", default, skip_serializing_if = "Vec::is_empty")]
    pub search_files: Vec<File>,
}

impl Default for ChunkType {
    fn default() -> Self {
        ChunkType::Messages
    }
}

/// Anything that accepts a stream of chunks: another store, an exporter, a
/// viewer pipeline. Session replay feeds a consumer one chunk at a time.
pub trait ChunkConsumer {
    fn encode(&mut self, chunk: Chunk) -> Result<(), Error>;
}

impl<F> ChunkConsumer for F
where
    F: FnMut(Chunk) -> Result<(), Error>,
{
    fn encode(&mut self, chunk: Chunk) -> Result<(), Error> {
        self(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_type_values_are_stable() {
        for (tag, ct) in [
            (0, ChunkType::Messages),
            (1, ChunkType::ThreadMessages),
            (5, ChunkType::ChannelInfo),
            (9, ChunkType::SearchFiles),
        ] {
            assert_eq!(ct as i64, tag);
            assert_eq!(ChunkType::try_from(tag).unwrap(), ct);
        }
        assert!(ChunkType::try_from(10).is_err());
    }
}
