mod config;
mod posts;
mod schema;
mod subscriptions;
mod types;

pub use schema::Database;
pub use types::{
    BotConfig, ConfigPatch, NewSubscription, Post, PostFilter, PostPage, PostStats, PushStatus,
    StatusUpdate, StorageError, Subscription,
};
