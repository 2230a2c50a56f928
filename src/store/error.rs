//! Store error taxonomy.
//!
//! The split that matters to callers: [`Error::NotFound`] is an answer
//! ("the store does not know yet"), everything else is a failure. The
//! completeness queries rely on that distinction, so repository code maps
//! `QueryReturnedNoRows` to `NotFound` and never lets it surface as a raw
//! database error.

use crate::chunk::ChunkType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The query matched no rows. Distinct from a broken store: a crawl in
    /// progress hits this constantly.
    #[error("not found")]
    NotFound,

    /// Invalid input to a write operation. Never retried, surfaced as-is.
    #[error("contract violation: {0}")]
    Contract(String),

    /// A chunk payload that cannot be decomposed into rows.
    #[error("invalid {chunk_type} payload, channel {channel_id:?}: {reason}")]
    InvalidPayload {
        chunk_type: ChunkType,
        channel_id: String,
        reason: String,
    },

    /// Replay was asked for a session that is not finished yet.
    #[error("session {0} is incomplete")]
    Incomplete(i64),

    /// A failed statement, transaction or migration, wrapped with the
    /// operation that issued it.
    #[error("{op}: {source}")]
    Db {
        op: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Stored payload that does not deserialize. Only raised when the
    /// decoded value is actually requested.
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// A timestamp that does not parse into an identity key.
    #[error("bad timestamp {0:?}")]
    BadTimestamp(String),
}

impl Error {
    /// Wraps a rusqlite error with operation context, keeping the
    /// no-rows case a distinct `NotFound`.
    pub(crate) fn db(op: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> Error {
        let op = op.into();
        move |source| match source {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            source => Error::Db { op, source },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rows_becomes_not_found() {
        let err = Error::db("get")(rusqlite::Error::QueryReturnedNoRows);
        assert!(err.is_not_found());

        let err = Error::db("get")(rusqlite::Error::InvalidQuery);
        assert!(!err.is_not_found());
        assert!(err.to_string().starts_with("get:"));
    }
}
