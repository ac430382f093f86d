//! Subscription matching.
//!
//! Pure functions over `(post, subscriptions, config)` — no I/O, no clock.
//! The coordinator feeds subscriptions in newest-first order and acts on the
//! first match, which makes the newest subscription win when several match
//! the same post.

use crate::storage::{BotConfig, Post, Subscription};

/// Which field family satisfied every keyword, for observability.
///
/// `Mixed` means the keywords were satisfied across different fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Title,
    Content,
    Author,
    Category,
    Mixed,
}

/// A subscription that matched a post.
#[derive(Debug)]
pub struct SubMatch<'a> {
    pub subscription: &'a Subscription,
    pub matched_keywords: Vec<String>,
    pub kind: MatchKind,
}

/// Evaluate a post against every subscription, preserving input order.
///
/// The caller acts on the first element; later matches are kept for
/// diagnostics and the manual-push boundary.
pub fn match_all<'a>(
    post: &Post,
    subscriptions: &'a [Subscription],
    config: &BotConfig,
) -> Vec<SubMatch<'a>> {
    let fields = PostFields::new(post);
    subscriptions
        .iter()
        .filter_map(|sub| match_one(&fields, sub, config))
        .collect()
}

/// Lowercased post fields, computed once per post rather than per subscription.
struct PostFields {
    title: String,
    content: String,
    creator: String,
    category: String,
}

impl PostFields {
    fn new(post: &Post) -> Self {
        Self {
            title: post.title.to_lowercase(),
            content: post.snippet.to_lowercase(),
            creator: post.creator.to_lowercase(),
            category: post.category.to_lowercase(),
        }
    }
}

fn filter_value(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_lowercase)
}

fn match_one<'a>(
    fields: &PostFields,
    subscription: &'a Subscription,
    config: &BotConfig,
) -> Option<SubMatch<'a>> {
    let creator_filter = filter_value(&subscription.creator);
    let category_filter = filter_value(&subscription.category);
    let keywords = subscription.keywords();

    // A subscription with nothing specified matches nothing; the input layer
    // should prevent these from existing at all.
    if keywords.is_empty() && creator_filter.is_none() && category_filter.is_none() {
        return None;
    }

    // Hard filters first: a specified creator/category must be contained in
    // the post's field or the subscription cannot match at all.
    if let Some(creator) = &creator_filter {
        if !fields.creator.contains(creator.as_str()) {
            return None;
        }
    }
    if let Some(category) = &category_filter {
        if !fields.category.contains(category.as_str()) {
            return None;
        }
    }

    // Per keyword: OR across the permitted fields. A field already consumed
    // as a hard filter is not double-used for keyword matching; content is
    // out of scope when the config restricts matching to titles.
    let mut matched_keywords = Vec::new();
    let mut title_hits = 0usize;
    let mut content_hits = 0usize;
    let mut author_hits = 0usize;
    let mut category_hits = 0usize;

    for keyword in &keywords {
        let needle = keyword.to_lowercase();
        let hit = if fields.title.contains(&needle) {
            title_hits += 1;
            true
        } else if !config.only_title && fields.content.contains(&needle) {
            content_hits += 1;
            true
        } else if creator_filter.is_none() && fields.creator.contains(&needle) {
            author_hits += 1;
            true
        } else if category_filter.is_none() && fields.category.contains(&needle) {
            category_hits += 1;
            true
        } else {
            false
        };

        if hit {
            matched_keywords.push((*keyword).to_string());
        }
    }

    // AND across keywords (vacuously true when there are none)
    if matched_keywords.len() != keywords.len() {
        return None;
    }

    let kind = if title_hits == keywords.len() {
        MatchKind::Title
    } else if content_hits == keywords.len() {
        MatchKind::Content
    } else if author_hits == keywords.len() {
        MatchKind::Author
    } else if category_hits == keywords.len() {
        MatchKind::Category
    } else {
        MatchKind::Mixed
    };

    Some(SubMatch {
        subscription,
        matched_keywords,
        kind,
    })
}
