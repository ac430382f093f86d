use std::sync::Arc;

use crate::cache::{CacheDomain, STATS_TTL, SUBSCRIPTIONS_TTL};

use super::schema::Database;
use super::types::{NewSubscription, StorageError, Subscription};

#[derive(sqlx::FromRow)]
struct SubscriptionDbRow {
    id: i64,
    keyword1: Option<String>,
    keyword2: Option<String>,
    keyword3: Option<String>,
    creator: Option<String>,
    category: Option<String>,
    created_at: i64,
}

impl SubscriptionDbRow {
    fn into_subscription(self) -> Subscription {
        Subscription {
            id: self.id,
            keyword1: self.keyword1,
            keyword2: self.keyword2,
            keyword3: self.keyword3,
            creator: self.creator,
            category: self.category,
            created_at: self.created_at,
        }
    }
}

impl Database {
    // ========================================================================
    // Subscription Operations
    // ========================================================================

    /// All subscriptions, newest-created first (cached 60s).
    ///
    /// The order is load-bearing: the matcher tries subscriptions in this
    /// order and the coordinator acts on the first hit, so the newest
    /// subscription wins ties.
    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>, StorageError> {
        if let Some(cached) = self
            .cache
            .get::<Vec<Subscription>>(CacheDomain::Subscriptions, "all")
        {
            return Ok((*cached).clone());
        }

        let rows: Vec<SubscriptionDbRow> = sqlx::query_as(
            r#"
            SELECT id, keyword1, keyword2, keyword3, creator, category, created_at
            FROM subscriptions
            ORDER BY created_at DESC, id DESC
        "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let subscriptions: Vec<Subscription> = rows
            .into_iter()
            .map(SubscriptionDbRow::into_subscription)
            .collect();

        self.cache.insert(
            CacheDomain::Subscriptions,
            "all",
            Arc::new(subscriptions.clone()),
            SUBSCRIPTIONS_TTL,
        );
        Ok(subscriptions)
    }

    /// Look up a single subscription (manual-push boundary).
    pub async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>, StorageError> {
        let row: Option<SubscriptionDbRow> = sqlx::query_as(
            r#"
            SELECT id, keyword1, keyword2, keyword3, creator, category, created_at
            FROM subscriptions
            WHERE id = ?
        "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(SubscriptionDbRow::into_subscription))
    }

    /// Create a subscription. The management layer validates that at least
    /// one field is non-empty before calling this.
    pub async fn create_subscription(
        &self,
        new: &NewSubscription,
    ) -> Result<Subscription, StorageError> {
        let now = chrono::Utc::now().timestamp();
        let row: SubscriptionDbRow = sqlx::query_as(
            r#"
            INSERT INTO subscriptions (keyword1, keyword2, keyword3, creator, category, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, keyword1, keyword2, keyword3, creator, category, created_at
        "#,
        )
        .bind(&new.keyword1)
        .bind(&new.keyword2)
        .bind(&new.keyword3)
        .bind(&new.creator)
        .bind(&new.category)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        self.cache.invalidate(CacheDomain::Subscriptions);
        Ok(row.into_subscription())
    }

    /// Delete a subscription, returning whether a row was removed.
    pub async fn delete_subscription(&self, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            self.cache.invalidate(CacheDomain::Subscriptions);
        }
        Ok(removed)
    }

    /// Subscription count (cached with the other aggregates).
    pub async fn count_subscriptions(&self) -> Result<i64, StorageError> {
        if let Some(cached) = self.cache.get::<i64>(CacheDomain::PostStats, "subs:total") {
            return Ok(*cached);
        }

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subscriptions")
            .fetch_one(&self.pool)
            .await?;

        self.cache.insert(
            CacheDomain::PostStats,
            "subs:total",
            Arc::new(count),
            STATS_TTL,
        );
        Ok(count)
    }
}
