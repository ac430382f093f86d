//! The ingestion cycle: fetch, dedup, persist, match, deliver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::feed::{self, FetchError, ParseError};
use crate::matcher;
use crate::notify::{self, Notifier};
use crate::storage::{Database, PushStatus, StatusUpdate, StorageError};

/// Pause after this many consecutive successful deliveries, to stay under
/// the bot API's per-chat rate limit.
const DELIVERY_BURST: usize = 5;
const DELIVERY_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("a cycle is already running")]
    AlreadyRunning,
    #[error("bot configuration row is missing, run setup first")]
    NotInitialized,
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Per-post outcome recorded in the cycle summary.
#[derive(Debug, Serialize)]
pub struct ItemOutcome {
    pub post_id: i64,
    pub title: String,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct CycleSummary {
    /// Entries seen in the fetched document.
    pub processed: usize,
    /// New rows persisted this cycle.
    pub ingested: usize,
    /// Entries dropped during normalization.
    pub dropped: usize,
    pub delivered: usize,
    pub skipped: usize,
    /// Delivery failures plus entries dropped during normalization.
    pub errors: usize,
    pub details: Vec<ItemOutcome>,
}

pub struct PipelineSettings {
    pub feed_url: String,
    pub post_url_template: String,
    pub fetch_timeout: Duration,
}

/// Owns one end-to-end ingestion cycle. Cheap to share across tasks; the
/// atomic guard makes overlapping cycles a no-op rather than a pile-up.
pub struct Pipeline {
    db: Database,
    client: reqwest::Client,
    notifier: Notifier,
    settings: PipelineSettings,
    running: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        db: Database,
        client: reqwest::Client,
        notifier: Notifier,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            db,
            client,
            notifier,
            settings,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run one full cycle. Returns `AlreadyRunning` without touching the
    /// network when another cycle holds the guard.
    pub async fn run_cycle(&self) -> Result<CycleSummary, CycleError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CycleError::AlreadyRunning);
        }
        let result = self.run_cycle_inner().await;
        self.running.store(false, Ordering::Release);
        result
    }

    async fn run_cycle_inner(&self) -> Result<CycleSummary, CycleError> {
        let config = self
            .db
            .get_config()
            .await?
            .ok_or(CycleError::NotInitialized)?;

        let bytes = feed::fetch_feed(
            &self.client,
            &self.settings.feed_url,
            self.settings.fetch_timeout,
        )
        .await?;
        let parsed = feed::parse_feed(&bytes, chrono::Utc::now())?;

        // A dropped entry is an error for the cycle as a whole; `dropped`
        // stays separate so the summary still shows the cause.
        let mut summary = CycleSummary {
            processed: parsed.posts.len() + parsed.dropped,
            dropped: parsed.dropped,
            errors: parsed.dropped,
            ..CycleSummary::default()
        };

        // Dedup against rows from earlier cycles before inserting; the
        // UNIQUE constraint is the backstop for races within a cycle.
        let ids: Vec<i64> = parsed.posts.iter().map(|p| p.external_id).collect();
        let existing = self.db.find_existing_by_ids(&ids).await?;
        let fresh: Vec<_> = parsed
            .posts
            .into_iter()
            .filter(|p| !existing.contains_key(&p.external_id))
            .collect();
        summary.ingested = self.db.batch_insert(&fresh).await?;
        debug!(
            processed = summary.processed,
            ingested = summary.ingested,
            "feed ingested"
        );

        if config.stop_push {
            info!("push is paused, leaving new posts queued");
            return Ok(summary);
        }
        if !config.can_deliver() {
            warn!("bot token or chat id not configured, leaving new posts queued");
            return Ok(summary);
        }

        let (subscriptions, pending) =
            tokio::try_join!(self.db.list_subscriptions(), self.db.list_unpushed())?;

        // Chat token is checked by can_deliver above
        let token = config.bot_token.as_deref().unwrap_or_default();
        let mut skips: Vec<StatusUpdate> = Vec::new();
        let mut streak = 0usize;

        for post in &pending {
            let matches = matcher::match_all(post, &subscriptions, &config);
            let Some(found) = matches.first() else {
                skips.push(StatusUpdate {
                    post_id: post.post_id,
                    status: PushStatus::Skipped,
                    sub_id: None,
                    delivered_at: None,
                });
                summary.skipped += 1;
                summary.details.push(ItemOutcome {
                    post_id: post.post_id,
                    title: post.title.clone(),
                    outcome: "skipped",
                    reason: None,
                });
                continue;
            };

            let text = notify::format_post(post, found, &self.settings.post_url_template);
            match self.notifier.send(token, &config.chat_id, &text).await {
                Ok(()) => {
                    // Written immediately so a crash cannot redeliver
                    let now = chrono::Utc::now().timestamp();
                    self.db
                        .update_status(
                            post.post_id,
                            PushStatus::Pushed,
                            Some(found.subscription.id),
                            Some(now),
                        )
                        .await?;
                    summary.delivered += 1;
                    summary.details.push(ItemOutcome {
                        post_id: post.post_id,
                        title: post.title.clone(),
                        outcome: "delivered",
                        reason: None,
                    });
                    streak += 1;
                    if streak % DELIVERY_BURST == 0 {
                        tokio::time::sleep(DELIVERY_PAUSE).await;
                    }
                }
                Err(err) => {
                    // Stays Unpushed and is retried next cycle
                    warn!(post_id = post.post_id, error = %err, "delivery failed");
                    summary.errors += 1;
                    summary.details.push(ItemOutcome {
                        post_id: post.post_id,
                        title: post.title.clone(),
                        outcome: "error",
                        reason: Some(err.to_string()),
                    });
                }
            }
        }

        self.db.batch_update_status(&skips).await?;

        info!(
            ingested = summary.ingested,
            delivered = summary.delivered,
            skipped = summary.skipped,
            errors = summary.errors,
            "cycle complete"
        );
        Ok(summary)
    }
}
