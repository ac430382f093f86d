use std::collections::HashMap;
use std::sync::Arc;

use sqlx::QueryBuilder;

use crate::cache::{CacheDomain, STATS_TTL};
use crate::feed::NormalizedPost;

use super::schema::Database;
use super::types::{
    Post, PostDbRow, PostFilter, PostPage, PostStats, PushStatus, StatusUpdate, StorageError,
};

/// Chunk size for bulk IN queries (stays well under SQLite's bind limit).
const IN_CHUNK: usize = 500;

/// Chunk size for batch inserts (7 columns * 100 = 700 binds).
const INSERT_CHUNK: usize = 100;

const POST_COLUMNS: &str = "id, post_id, title, snippet, category, creator, push_status, \
                            sub_id, published_at, delivered_at, ingested_at";

impl Database {
    // ========================================================================
    // Dedup / Ingestion
    // ========================================================================

    /// Bulk lookup of already-ingested posts by external id.
    ///
    /// One IN query per 500 ids instead of a round-trip per item; the
    /// ingestion step diffs the feed against this map.
    pub async fn find_existing_by_ids(
        &self,
        post_ids: &[i64],
    ) -> Result<HashMap<i64, Post>, StorageError> {
        let mut existing = HashMap::new();
        if post_ids.is_empty() {
            return Ok(existing);
        }

        for chunk in post_ids.chunks(IN_CHUNK) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(format!(
                "SELECT {} FROM posts WHERE post_id IN (",
                POST_COLUMNS
            ));
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let rows: Vec<PostDbRow> = builder.build_query_as().fetch_all(&self.pool).await?;
            for row in rows {
                let post = row.into_post()?;
                existing.insert(post.post_id, post);
            }
        }

        Ok(existing)
    }

    /// Insert normalized posts as Unpushed, returning the number inserted.
    ///
    /// `INSERT OR IGNORE` on the unique external id makes re-ingestion a
    /// no-op. A failing chunk is logged and excluded from the count rather
    /// than aborting the whole batch.
    pub async fn batch_insert(&self, posts: &[NormalizedPost]) -> Result<usize, StorageError> {
        if posts.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut inserted = 0usize;

        for chunk in posts.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO posts \
                 (post_id, title, snippet, category, creator, push_status, published_at, ingested_at) ",
            );
            builder.push_values(chunk, |mut b, post| {
                b.push_bind(post.external_id)
                    .push_bind(&post.title)
                    .push_bind(&post.snippet)
                    .push_bind(&post.category)
                    .push_bind(&post.creator)
                    .push_bind(PushStatus::Unpushed.as_i64())
                    .push_bind(post.published_at)
                    .push_bind(now);
            });

            match builder.build().execute(&self.pool).await {
                Ok(result) => inserted += result.rows_affected() as usize,
                Err(e) => {
                    tracing::warn!(error = %e, chunk = chunk.len(), "Batch insert chunk failed, continuing");
                }
            }
        }

        self.cache.invalidate(CacheDomain::PostStats);
        Ok(inserted)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Look up one post by its external id.
    pub async fn get_post(&self, post_id: i64) -> Result<Option<Post>, StorageError> {
        let row: Option<PostDbRow> = sqlx::query_as(&format!(
            "SELECT {} FROM posts WHERE post_id = ?",
            POST_COLUMNS
        ))
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PostDbRow::into_post).transpose()
    }

    /// All Unpushed posts, oldest publish time first.
    ///
    /// Delivery walks this in order so notifications arrive chronologically.
    pub async fn list_unpushed(&self) -> Result<Vec<Post>, StorageError> {
        let rows: Vec<PostDbRow> = sqlx::query_as(&format!(
            "SELECT {} FROM posts WHERE push_status = ? ORDER BY published_at ASC, id ASC",
            POST_COLUMNS
        ))
        .bind(PushStatus::Unpushed.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PostDbRow::into_post).collect()
    }

    /// Paginated post listing over the 24h window, with optional filters.
    /// Serves the dashboard; the core never calls it.
    pub async fn list_posts(
        &self,
        page: i64,
        per_page: i64,
        filter: &PostFilter,
    ) -> Result<PostPage, StorageError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);
        let offset = (page - 1) * per_page;
        let since = chrono::Utc::now().timestamp() - 24 * 3600;

        let push_where = |builder: &mut QueryBuilder<sqlx::Sqlite>| {
            builder.push(" WHERE ingested_at >= ").push_bind(since);
            if let Some(status) = filter.status {
                builder
                    .push(" AND push_status = ")
                    .push_bind(status.as_i64());
            }
            if let Some(creator) = &filter.creator {
                builder
                    .push(" AND creator LIKE ")
                    .push_bind(format!("%{}%", creator));
            }
            if let Some(category) = &filter.category {
                builder
                    .push(" AND category LIKE ")
                    .push_bind(format!("%{}%", category));
            }
        };

        let mut query: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM posts", POST_COLUMNS));
        push_where(&mut query);
        query
            .push(" ORDER BY published_at DESC LIMIT ")
            .push_bind(per_page)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows: Vec<PostDbRow> = query.build_query_as().fetch_all(&self.pool).await?;
        let posts: Vec<Post> = rows
            .into_iter()
            .map(PostDbRow::into_post)
            .collect::<Result<_, _>>()?;

        let mut count: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM posts");
        push_where(&mut count);
        let (total,): (i64,) = count.build_query_as().fetch_one(&self.pool).await?;

        Ok(PostPage {
            posts,
            total,
            page,
            total_pages: (total + per_page - 1) / per_page,
        })
    }

    // ========================================================================
    // Status Transitions
    // ========================================================================

    /// Immediately persist one transition for the post just dispatched.
    ///
    /// `WHERE push_status = 0` keeps the state machine one-directional:
    /// terminal rows cannot revert no matter who calls this. Returns whether
    /// a row changed.
    pub async fn update_status(
        &self,
        post_id: i64,
        status: PushStatus,
        sub_id: Option<i64>,
        delivered_at: Option<i64>,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE posts SET push_status = ?, sub_id = ?, delivered_at = ? \
             WHERE post_id = ? AND push_status = 0",
        )
        .bind(status.as_i64())
        .bind(sub_id)
        .bind(delivered_at)
        .bind(post_id)
        .execute(&self.pool)
        .await?;

        self.cache.invalidate(CacheDomain::PostStats);
        Ok(result.rows_affected() > 0)
    }

    /// Flush queued transitions (the cycle's Skipped posts) in one transaction.
    pub async fn batch_update_status(&self, updates: &[StatusUpdate]) -> Result<(), StorageError> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for update in updates {
            sqlx::query(
                "UPDATE posts SET push_status = ?, sub_id = ?, delivered_at = ? \
                 WHERE post_id = ? AND push_status = 0",
            )
            .bind(update.status.as_i64())
            .bind(update.sub_id)
            .bind(update.delivered_at)
            .bind(update.post_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.cache.invalidate(CacheDomain::PostStats);
        Ok(())
    }

    // ========================================================================
    // Counters
    // ========================================================================

    async fn cached_count(&self, key: &str, sql: &str, binds: &[i64]) -> Result<i64, StorageError> {
        if let Some(cached) = self.cache.get::<i64>(CacheDomain::PostStats, key) {
            return Ok(*cached);
        }

        let mut query = sqlx::query_as::<_, (i64,)>(sql);
        for value in binds {
            query = query.bind(*value);
        }
        let (count,) = query.fetch_one(&self.pool).await?;

        self.cache
            .insert(CacheDomain::PostStats, key, Arc::new(count), STATS_TTL);
        Ok(count)
    }

    /// Posts ingested in the last 24h (cached 30s).
    pub async fn count_posts(&self) -> Result<i64, StorageError> {
        let since = chrono::Utc::now().timestamp() - 24 * 3600;
        self.cached_count(
            "posts:total",
            "SELECT COUNT(*) FROM posts WHERE ingested_at >= ?",
            &[since],
        )
        .await
    }

    /// Posts in the 24h window with the given status (cached 30s).
    pub async fn count_posts_by_status(&self, status: PushStatus) -> Result<i64, StorageError> {
        let since = chrono::Utc::now().timestamp() - 24 * 3600;
        self.cached_count(
            &format!("posts:status:{}", status.as_i64()),
            "SELECT COUNT(*) FROM posts WHERE push_status = ? AND ingested_at >= ?",
            &[status.as_i64(), since],
        )
        .await
    }

    /// Deliveries in the last 24h (cached 30s).
    pub async fn count_delivered_today(&self) -> Result<i64, StorageError> {
        let since = chrono::Utc::now().timestamp() - 24 * 3600;
        self.cached_count(
            "posts:delivered_today",
            "SELECT COUNT(*) FROM posts WHERE push_status = 1 AND delivered_at >= ?",
            &[since],
        )
        .await
    }

    /// Counter snapshot for the dashboard and cycle logs.
    pub async fn stats(&self) -> Result<PostStats, StorageError> {
        let (total, unpushed, pushed, skipped, subs, delivered) = tokio::try_join!(
            self.count_posts(),
            self.count_posts_by_status(PushStatus::Unpushed),
            self.count_posts_by_status(PushStatus::Pushed),
            self.count_posts_by_status(PushStatus::Skipped),
            self.count_subscriptions(),
            self.count_delivered_today(),
        )?;

        Ok(PostStats {
            total_posts: total,
            unpushed_posts: unpushed,
            pushed_posts: pushed,
            skipped_posts: skipped,
            total_subscriptions: subs,
            delivered_today: delivered,
        })
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Delete posts older than the retention window, returning the count.
    pub async fn cleanup_older_than(&self, hours: i64) -> Result<u64, StorageError> {
        let cutoff = chrono::Utc::now().timestamp() - hours * 3600;
        let result = sqlx::query("DELETE FROM posts WHERE ingested_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        self.cache.invalidate(CacheDomain::PostStats);
        Ok(result.rows_affected())
    }
}
