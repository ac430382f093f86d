//! Outbound notification delivery over the Telegram Bot HTTP API.

use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::matcher::SubMatch;
use crate::storage::Post;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("telegram api rejected the message: {0}")]
    Rejected(String),
    #[error("send timed out after {}s", SEND_TIMEOUT.as_secs())]
    Timeout,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Thin client around the `sendMessage` endpoint.
///
/// The base URL is injectable so tests can point it at a local mock server;
/// production wiring uses [`DEFAULT_API_BASE`].
pub struct Notifier {
    client: reqwest::Client,
    api_base: String,
}

impl Notifier {
    pub fn new(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        let mut api_base = api_base.into();
        while api_base.ends_with('/') {
            api_base.pop();
        }
        Self { client, api_base }
    }

    /// Send a Markdown message to a chat. Errors are returned to the caller,
    /// which decides whether the post stays queued for a later cycle.
    pub async fn send(
        &self,
        token: &str,
        chat_id: &str,
        text: &str,
    ) -> Result<(), DeliveryError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, token);
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        let response = tokio::time::timeout(
            SEND_TIMEOUT,
            self.client.post(&url).json(&body).send(),
        )
        .await
        .map_err(|_| DeliveryError::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ApiResponse>()
                .await
                .ok()
                .and_then(|r| r.description)
                .unwrap_or_else(|| format!("http status {}", status.as_u16()));
            return Err(DeliveryError::Rejected(detail));
        }

        let parsed: ApiResponse = response.json().await?;
        if !parsed.ok {
            return Err(DeliveryError::Rejected(
                parsed.description.unwrap_or_else(|| "ok=false".to_string()),
            ));
        }

        debug!(chat_id, "message delivered");
        Ok(())
    }
}

/// Render the notification message for a matched post.
///
/// The title becomes a Markdown link, so ASCII brackets inside it are
/// swapped for their full-width CJK counterparts; otherwise Telegram's
/// parser would cut the link short.
pub fn format_post(post: &Post, found: &SubMatch<'_>, post_url_template: &str) -> String {
    let title = sanitize_title(&post.title);
    let url = post_url_template.replace("{id}", &post.post_id.to_string());

    let mut lines = Vec::with_capacity(4);
    if !found.matched_keywords.is_empty() {
        lines.push(format!("🎯 {}", found.matched_keywords.join(", ")));
    }
    if let Some(creator) = found
        .subscription
        .creator
        .as_deref()
        .filter(|c| !c.trim().is_empty())
    {
        lines.push(format!("👤 {}", creator));
    }
    if let Some(category) = found
        .subscription
        .category
        .as_deref()
        .filter(|c| !c.trim().is_empty())
    {
        lines.push(format!("🗂️ {}", category));
    }
    lines.push(format!("[{}]({})", title, url));

    lines.join("\n")
}

fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '[' => '「',
            ']' => '」',
            '(' => '（',
            ')' => '）',
            other => other,
        })
        .collect()
}
