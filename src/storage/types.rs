use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage-layer errors.
///
/// Callers treat these as non-fatal for the specific item or step that
/// failed; batch operations degrade to best-effort rather than aborting.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A post row carries a push_status outside the known state machine
    #[error("Unknown push status value: {0}")]
    InvalidStatus(i64),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

// ============================================================================
// Push Status
// ============================================================================

/// Lifecycle of a post with respect to delivery.
///
/// Transitions are one-directional: `Unpushed` may become `Pushed` or
/// `Skipped` (both terminal) and may repeat after a failed delivery.
/// Enforcement lives in the UPDATE statements (`WHERE push_status = 0`),
/// so a terminal row can never revert regardless of caller bugs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    /// Not yet evaluated or delivery failed; eligible next cycle.
    Unpushed,
    /// Delivered to the bound destination. Terminal.
    Pushed,
    /// Matched no subscription; will never be reconsidered. Terminal.
    Skipped,
}

impl PushStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            PushStatus::Unpushed => 0,
            PushStatus::Pushed => 1,
            PushStatus::Skipped => 2,
        }
    }

    pub fn from_i64(value: i64) -> Result<Self, StorageError> {
        match value {
            0 => Ok(PushStatus::Unpushed),
            1 => Ok(PushStatus::Pushed),
            2 => Ok(PushStatus::Skipped),
            other => Err(StorageError::InvalidStatus(other)),
        }
    }
}

// ============================================================================
// Config
// ============================================================================

/// The singleton configuration row.
///
/// `chat_id` is the bound destination; empty means unbound and delivery is
/// held back until a chat binds. `username`/`password` belong to the web
/// dashboard and are only stored here.
#[derive(Clone)]
pub struct BotConfig {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub bot_token: Option<String>,
    pub chat_id: String,
    pub stop_push: bool,
    pub only_title: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl BotConfig {
    /// True when a destination chat is bound and a bot token is present.
    pub fn can_deliver(&self) -> bool {
        !self.chat_id.is_empty() && self.bot_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Mask credentials in Debug output to prevent secret leakage in logs.
impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "[REDACTED]"))
            .field("chat_id", &self.chat_id)
            .field("stop_push", &self.stop_push)
            .field("only_title", &self.only_title)
            .finish()
    }
}

/// Partial update for the config row; `None` fields are left untouched.
/// Unbinding is expressed by setting `chat_id` to an empty string.
#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub username: Option<String>,
    pub password: Option<String>,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub stop_push: Option<bool>,
    pub only_title: Option<bool>,
}

// ============================================================================
// Subscription
// ============================================================================

/// A keyword subscription.
///
/// At least one of the keyword/creator/category fields is non-empty — the
/// management layer enforces this at input time.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: i64,
    pub keyword1: Option<String>,
    pub keyword2: Option<String>,
    pub keyword3: Option<String>,
    pub creator: Option<String>,
    pub category: Option<String>,
    pub created_at: i64,
}

impl Subscription {
    /// The non-empty keywords, in declaration order.
    pub fn keywords(&self) -> Vec<&str> {
        [&self.keyword1, &self.keyword2, &self.keyword3]
            .into_iter()
            .filter_map(|k| k.as_deref())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .collect()
    }
}

/// Fields for creating a subscription (id and timestamp are assigned by the store).
#[derive(Debug, Clone, Default)]
pub struct NewSubscription {
    pub keyword1: Option<String>,
    pub keyword2: Option<String>,
    pub keyword3: Option<String>,
    pub creator: Option<String>,
    pub category: Option<String>,
}

// ============================================================================
// Post
// ============================================================================

/// A persisted feed post.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: i64,
    /// Stable id extracted from the source item's link — the dedup key.
    pub post_id: i64,
    pub title: String,
    pub snippet: String,
    pub category: String,
    pub creator: String,
    pub status: PushStatus,
    /// Subscription that triggered delivery; set atomically with `Pushed`.
    pub sub_id: Option<i64>,
    pub published_at: i64,
    pub delivered_at: Option<i64>,
    pub ingested_at: i64,
}

/// Internal row type for post queries; converts to [`Post`] with status decoding.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PostDbRow {
    pub id: i64,
    pub post_id: i64,
    pub title: String,
    pub snippet: String,
    pub category: String,
    pub creator: String,
    pub push_status: i64,
    pub sub_id: Option<i64>,
    pub published_at: i64,
    pub delivered_at: Option<i64>,
    pub ingested_at: i64,
}

impl PostDbRow {
    pub(crate) fn into_post(self) -> Result<Post, StorageError> {
        Ok(Post {
            id: self.id,
            post_id: self.post_id,
            title: self.title,
            snippet: self.snippet,
            category: self.category,
            creator: self.creator,
            status: PushStatus::from_i64(self.push_status)?,
            sub_id: self.sub_id,
            published_at: self.published_at,
            delivered_at: self.delivered_at,
            ingested_at: self.ingested_at,
        })
    }
}

/// One queued status transition for the end-of-cycle batch write.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub post_id: i64,
    pub status: PushStatus,
    pub sub_id: Option<i64>,
    pub delivered_at: Option<i64>,
}

// ============================================================================
// Aggregates
// ============================================================================

/// Counter snapshot for the dashboard and logs. Counts use the 24h window
/// the retention job keeps.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PostStats {
    pub total_posts: i64,
    pub unpushed_posts: i64,
    pub pushed_posts: i64,
    pub skipped_posts: i64,
    pub total_subscriptions: i64,
    pub delivered_today: i64,
}

/// Optional filters for the paginated post listing.
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub status: Option<PushStatus>,
    pub creator: Option<String>,
    pub category: Option<String>,
}

/// One page of posts plus paging metadata.
#[derive(Debug)]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub total: i64,
    pub page: i64,
    pub total_pages: i64,
}
