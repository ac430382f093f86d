use std::sync::Arc;

use sqlx::QueryBuilder;

use crate::cache::{CacheDomain, CONFIG_TTL};

use super::schema::Database;
use super::types::{BotConfig, ConfigPatch, StorageError};

/// Row mapper for the config table.
#[derive(sqlx::FromRow)]
struct ConfigDbRow {
    id: i64,
    username: String,
    password: String,
    bot_token: Option<String>,
    chat_id: String,
    stop_push: i64,
    only_title: i64,
    created_at: i64,
    updated_at: i64,
}

impl ConfigDbRow {
    fn into_config(self) -> BotConfig {
        BotConfig {
            id: self.id,
            username: self.username,
            password: self.password,
            bot_token: self.bot_token,
            chat_id: self.chat_id,
            stop_push: self.stop_push != 0,
            only_title: self.only_title != 0,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const SELECT_CONFIG: &str = r#"
    SELECT id, username, password, bot_token, chat_id, stop_push, only_title,
           created_at, updated_at
    FROM bot_config
    LIMIT 1
"#;

impl Database {
    // ========================================================================
    // Config Operations
    // ========================================================================

    /// The singleton config row, or `None` before initialization.
    /// Cached for 120s; writers invalidate on every mutation.
    pub async fn get_config(&self) -> Result<Option<BotConfig>, StorageError> {
        if let Some(cached) = self
            .cache
            .get::<Option<BotConfig>>(CacheDomain::Config, "row")
        {
            return Ok((*cached).clone());
        }

        let row: Option<ConfigDbRow> = sqlx::query_as(SELECT_CONFIG)
            .fetch_optional(&self.pool)
            .await?;
        let config = row.map(ConfigDbRow::into_config);

        self.cache.insert(
            CacheDomain::Config,
            "row",
            Arc::new(config.clone()),
            CONFIG_TTL,
        );
        Ok(config)
    }

    /// Create the config row. Called once at system initialization;
    /// does nothing if a row already exists.
    pub async fn create_config(
        &self,
        username: &str,
        password: &str,
        bot_token: Option<&str>,
        chat_id: &str,
    ) -> Result<BotConfig, StorageError> {
        if let Some(existing) = self.get_config().await? {
            return Ok(existing);
        }

        let now = chrono::Utc::now().timestamp();
        let row: ConfigDbRow = sqlx::query_as(
            r#"
            INSERT INTO bot_config
                (username, password, bot_token, chat_id, stop_push, only_title, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, 0, ?, ?)
            RETURNING id, username, password, bot_token, chat_id, stop_push, only_title,
                      created_at, updated_at
        "#,
        )
        .bind(username)
        .bind(password)
        .bind(bot_token)
        .bind(chat_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        self.cache.invalidate(CacheDomain::Config);
        Ok(row.into_config())
    }

    /// Apply a partial update to the config row.
    ///
    /// Returns the updated row, or `None` if no row exists yet. A patch with
    /// no set fields is a read. The config cache group is invalidated before
    /// returning, so the next `get_config` reflects the new values even
    /// inside the old TTL window.
    pub async fn update_config(
        &self,
        patch: &ConfigPatch,
    ) -> Result<Option<BotConfig>, StorageError> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE bot_config SET ");
        let mut any = false;
        {
            let mut fields = builder.separated(", ");
            if let Some(username) = &patch.username {
                fields.push("username = ").push_bind_unseparated(username);
                any = true;
            }
            if let Some(password) = &patch.password {
                fields.push("password = ").push_bind_unseparated(password);
                any = true;
            }
            if let Some(bot_token) = &patch.bot_token {
                fields.push("bot_token = ").push_bind_unseparated(bot_token);
                any = true;
            }
            if let Some(chat_id) = &patch.chat_id {
                fields.push("chat_id = ").push_bind_unseparated(chat_id);
                any = true;
            }
            if let Some(stop_push) = patch.stop_push {
                fields
                    .push("stop_push = ")
                    .push_bind_unseparated(stop_push as i64);
                any = true;
            }
            if let Some(only_title) = patch.only_title {
                fields
                    .push("only_title = ")
                    .push_bind_unseparated(only_title as i64);
                any = true;
            }
            if any {
                fields
                    .push("updated_at = ")
                    .push_bind_unseparated(chrono::Utc::now().timestamp());
            }
        }

        if !any {
            return self.get_config().await;
        }

        builder.push(
            " WHERE id = (SELECT id FROM bot_config LIMIT 1) \
             RETURNING id, username, password, bot_token, chat_id, stop_push, only_title, \
                       created_at, updated_at",
        );

        let row: Option<ConfigDbRow> = builder
            .build_query_as()
            .fetch_optional(&self.pool)
            .await?;

        self.cache.invalidate(CacheDomain::Config);
        Ok(row.map(ConfigDbRow::into_config))
    }
}
