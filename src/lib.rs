//! RSS keyword watcher: periodically ingests a feed, deduplicates posts,
//! matches them against stored keyword subscriptions, and delivers hits to
//! a Telegram chat.

pub mod cache;
pub mod config;
pub mod feed;
pub mod matcher;
pub mod notify;
pub mod pipeline;
pub mod storage;
pub mod util;
