//! Chunk reassembly: turns a ledger row plus its payload rows back into the
//! chunk the crawler originally handed over. Used by session replay.

use rusqlite::Connection;

use crate::chunk::{Chunk, ChunkType, Message};
use crate::fasttime;

use super::channel::ChannelRepository;
use super::chunkrec::DbChunk;
use super::file::FileRepository;
use super::message::MessageRepository;
use super::search::SearchRepository;
use super::user::UserRepository;
use super::workspace::WorkspaceRepository;
use super::{Error, Result};

/// Rebuilds the full chunk for a ledger row.
pub(crate) fn assemble(conn: &Connection, rec: &DbChunk) -> Result<Chunk> {
    let mut chunk = rec.to_chunk();
    match rec.type_id {
        ChunkType::Messages => {
            chunk.messages = messages_in_capture_order(conn, rec.id)?;
        }
        ChunkType::ThreadMessages => {
            // the write pipeline stores the starter at idx 0
            let mut msgs = messages_in_capture_order(conn, rec.id)?;
            if msgs.is_empty() {
                return Err(Error::Contract(format!(
                    "thread chunk {} has no messages",
                    rec.id
                )));
            }
            let parent = msgs.remove(0);
            chunk.thread_ts = parent.thread_ts.clone().unwrap_or_default();
            chunk.parent = Some(parent);
            chunk.messages = msgs;
        }
        ChunkType::Files => {
            let mut rows = FileRepository::new().all_for_chunk(conn, rec.id)?;
            rows.sort_by_key(|r| r.idx);
            if let Some(first) = rows.first() {
                chunk.parent = Some(file_parent(conn, first.message_id)?);
            }
            chunk.files = rows.iter().map(|r| r.val()).collect::<Result<_>>()?;
        }
        ChunkType::Users => {
            let mut rows = UserRepository::new().all_for_chunk(conn, rec.id)?;
            rows.sort_by_key(|r| r.idx);
            chunk.users = rows.iter().map(|r| r.val()).collect::<Result<_>>()?;
        }
        ChunkType::Channels => {
            let mut rows = ChannelRepository::new().all_for_chunk(conn, rec.id)?;
            rows.sort_by_key(|r| r.idx);
            chunk.channels = rows.iter().map(|r| r.val()).collect::<Result<_>>()?;
        }
        ChunkType::ChannelInfo => {
            chunk.channel = Some(ChannelRepository::new().one_for_chunk(conn, rec.id)?.val()?);
        }
        ChunkType::WorkspaceInfo => {
            chunk.workspace_info =
                Some(WorkspaceRepository::new().one_for_chunk(conn, rec.id)?.val()?);
        }
        ChunkType::ChannelUsers => {
            chunk.channel_users = ChannelRepository::new()
                .members_for_chunk(conn, rec.id)?
                .into_iter()
                .map(|r| r.user_id)
                .collect();
        }
        ChunkType::SearchMessages => {
            chunk.search_messages = SearchRepository::new()
                .messages_for_chunk(conn, rec.id)?
                .iter()
                .map(|r| r.val())
                .collect::<Result<_>>()?;
        }
        ChunkType::SearchFiles => {
            chunk.search_files = SearchRepository::new()
                .files_for_chunk(conn, rec.id)?
                .iter()
                .map(|r| r.val())
                .collect::<Result<_>>()?;
        }
    }
    Ok(chunk)
}

fn messages_in_capture_order(conn: &Connection, chunk_id: i64) -> Result<Vec<Message>> {
    let mut rows = MessageRepository::new().all_for_chunk(conn, chunk_id)?;
    rows.sort_by_key(|r| r.idx);
    rows.iter().map(|r| r.val()).collect()
}

/// The parent message a file chunk was anchored to. Preferably the stored
/// message row; if the crawl never captured it, a stub carrying just the
/// timestamps is enough to re-anchor the files.
fn file_parent(conn: &Connection, message_id: Option<i64>) -> Result<Message> {
    let id = message_id.ok_or_else(|| Error::Contract("file chunk without an anchor".into()))?;
    match MessageRepository::new().get(conn, id) {
        Ok(row) => row.val(),
        Err(Error::NotFound) => Ok(Message {
            ts: fasttime::id_to_ts(id),
            ..Default::default()
        }),
        Err(e) => Err(e),
    }
}
