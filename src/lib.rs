//! packrat - persistent chunk store for paginated workspace crawls
//!
//! The crawler hands us typed chunks as it pages through a workspace; we
//! persist them into a single SQLite file, answer "is this channel or thread
//! fully captured" while the crawl runs, and reassemble ordered domain
//! objects for viewers and exporters afterwards.

pub mod chunk;
pub mod cli;
pub mod config;
pub mod fasttime;
pub mod store;
