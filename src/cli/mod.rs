//! Read-only inspection commands over a crawl database.

pub mod channels;
pub mod info;
pub mod messages;
pub mod sessions;
pub mod users;
