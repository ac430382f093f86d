use chrono::{DateTime, Utc};
use thiserror::Error;
use url::Url;

use crate::util::{collapse_whitespace, strip_tags, truncate_chars};

/// Bound on the stored content snippet, in characters.
const SNIPPET_MAX_CHARS: usize = 500;

/// Errors raised while parsing the feed document as a whole.
///
/// Individual malformed entries never surface here — they are dropped and
/// counted in [`ParseOutcome::dropped`].
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Feed document could not be parsed: {0}")]
    Document(#[from] feed_rs::parser::ParseFeedError),
}

/// A feed entry normalized into the shape the store persists.
///
/// All fields are explicit; a post either has a numeric external id derived
/// from its link or it does not exist as far as the pipeline is concerned.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPost {
    /// Stable id extracted from the entry link — the dedup key.
    pub external_id: i64,
    pub title: String,
    /// Tag-stripped description, at most 500 chars.
    pub snippet: String,
    pub category: String,
    pub creator: String,
    /// Unix seconds; entries with unparseable dates get the ingestion time.
    pub published_at: i64,
}

/// Result of normalizing one feed document.
#[derive(Debug)]
pub struct ParseOutcome {
    /// Normalized posts in source document order.
    pub posts: Vec<NormalizedPost>,
    /// Entries dropped for lacking a derivable external id.
    pub dropped: usize,
}

/// Parse and normalize a feed document.
///
/// CDATA unwrapping and entity decoding are the XML parser's job; this layer
/// only cleans text and derives identifiers. Entries without a numeric id in
/// their link are dropped (warned and counted), never fatal to the cycle.
/// No dedup happens here — that is the store's responsibility.
pub fn parse_feed(bytes: &[u8], now: DateTime<Utc>) -> Result<ParseOutcome, ParseError> {
    let feed = feed_rs::parser::parse(bytes)?;

    let mut posts = Vec::with_capacity(feed.entries.len());
    let mut dropped = 0usize;

    for entry in feed.entries {
        let link = entry.links.first().map(|l| l.href.as_str()).unwrap_or("");
        let Some(external_id) = extract_external_id(link) else {
            tracing::warn!(link = %link, "No numeric id derivable from entry link, dropping");
            dropped += 1;
            continue;
        };

        let title = collapse_whitespace(&entry.title.map(|t| t.content).unwrap_or_default());

        let raw_snippet = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .unwrap_or_default();
        let snippet = truncate_chars(
            &collapse_whitespace(&strip_tags(&raw_snippet)),
            SNIPPET_MAX_CHARS,
        );

        let category = entry
            .categories
            .first()
            .map(|c| c.term.trim().to_string())
            .unwrap_or_default();
        let creator = entry
            .authors
            .first()
            .map(|a| a.name.trim().to_string())
            .unwrap_or_default();

        // A missing or unparseable date is not a reason to reject an item
        let published_at = entry
            .published
            .or(entry.updated)
            .map(|dt| dt.timestamp())
            .unwrap_or_else(|| now.timestamp());

        posts.push(NormalizedPost {
            external_id,
            title,
            snippet,
            category,
            creator,
            published_at,
        });
    }

    Ok(ParseOutcome { posts, dropped })
}

/// Derive the stable numeric id from an entry link.
///
/// Primary form is a path segment `post-<digits>-`; the fallback is an `id`
/// query parameter. Links yielding neither have no identity.
fn extract_external_id(link: &str) -> Option<i64> {
    for (idx, _) in link.match_indices("post-") {
        let rest = &link[idx + "post-".len()..];
        let digit_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digit_end > 0 && rest[digit_end..].starts_with('-') {
            if let Ok(id) = rest[..digit_end].parse() {
                return Some(id);
            }
        }
    }

    let url = Url::parse(link).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "id")
        .and_then(|(_, value)| value.parse().ok())
}
