//! Normalization of raw provider post payloads.
//!
//! Each provider (and sometimes each endpoint of the same provider) uses a
//! different JSON shape for the same post. This module flattens those shapes
//! into [`NormalizedPost`] by probing an ordered list of candidate paths per
//! field and taking the first hit.

use chrono::{DateTime, Utc};
use pulseboard_core::MetricCounts;
use serde_json::Value;

use crate::timestamp::parse_timestamp;

/// A provider-agnostic post, ready for upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPost {
    pub post_id: String,
    pub username: String,
    pub posted_at: DateTime<Utc>,
    pub counts: MetricCounts,
    pub caption: Option<String>,
}

const ID_PATHS: [&[&str]; 6] = [
    &["video_id"],
    &["id"],
    &["aweme_id"],
    &["post_id"],
    &["code"],
    &["media", "id"],
];

const VIEW_PATHS: [&[&str]; 8] = [
    &["playCount"],
    &["play_count"],
    &["play"],
    &["views"],
    &["view_count"],
    &["stats", "playCount"],
    &["stats", "play_count"],
    &["statistics", "viewCount"],
];

const LIKE_PATHS: [&[&str]; 7] = [
    &["diggCount"],
    &["digg_count"],
    &["likes"],
    &["like_count"],
    &["stats", "diggCount"],
    &["stats", "digg_count"],
    &["statistics", "likeCount"],
];

const COMMENT_PATHS: [&[&str]; 6] = [
    &["commentCount"],
    &["comment_count"],
    &["comments"],
    &["stats", "commentCount"],
    &["stats", "comment_count"],
    &["statistics", "commentCount"],
];

const SHARE_PATHS: [&[&str]; 5] = [
    &["shareCount"],
    &["share_count"],
    &["shares"],
    &["stats", "shareCount"],
    &["stats", "share_count"],
];

const SAVE_PATHS: [&[&str]; 5] = [
    &["collectCount"],
    &["collect_count"],
    &["save_count"],
    &["saves"],
    &["stats", "collectCount"],
];

const CAPTION_PATHS: [&[&str]; 5] = [
    &["desc"],
    &["title"],
    &["caption"],
    &["description"],
    &["caption", "text"],
];

const TIMESTAMP_PATHS: [&[&str]; 6] = [
    &["create_time"],
    &["createTime"],
    &["taken_at"],
    &["timestamp"],
    &["published_at"],
    &["publishedAt"],
];

/// Normalizes one raw post object for the given account.
///
/// Returns `None` when no post id or no timestamp can be extracted; such
/// posts cannot be keyed or dated and are dropped with a warning by the
/// caller.
#[must_use]
pub fn normalize_post(raw: &Value, username: &str) -> Option<NormalizedPost> {
    let post_id = extract_post_id(raw)?;

    let posted_at = extract_posted_at(raw)?;

    let counts = MetricCounts {
        views: first_count(raw, &VIEW_PATHS),
        likes: first_count(raw, &LIKE_PATHS),
        comments: first_count(raw, &COMMENT_PATHS),
        shares: first_count(raw, &SHARE_PATHS),
        saves: first_count(raw, &SAVE_PATHS),
    };

    let caption = CAPTION_PATHS
        .iter()
        .filter_map(|path| lookup(raw, path))
        .find_map(|v| v.as_str())
        .map(str::to_string)
        .filter(|s| !s.is_empty());

    Some(NormalizedPost {
        post_id,
        username: username.to_string(),
        posted_at,
        counts,
        caption,
    })
}

/// Normalizes a batch of raw posts, dropping the ones with no usable id.
#[must_use]
pub fn normalize_posts(raw_posts: &[Value], username: &str) -> Vec<NormalizedPost> {
    raw_posts
        .iter()
        .filter_map(|raw| {
            let post = normalize_post(raw, username);
            if post.is_none() {
                tracing::warn!(username, "dropping post with no extractable id or timestamp");
            }
            post
        })
        .collect()
}

/// Extracts a post's id from a raw payload without full normalization.
/// Collectors use this for cross-page dedup.
pub(crate) fn extract_post_id(raw: &Value) -> Option<String> {
    for path in &ID_PATHS {
        if let Some(value) = lookup(raw, path) {
            match value {
                Value::String(s) if !s.is_empty() => return Some(s.clone()),
                Value::Number(n) => return Some(n.to_string()),
                _ => {}
            }
        }
    }
    // Last resort: some payloads only carry the id inside a media URL, as in
    // ".../video/7312345678901234567?...".
    for key in ["url", "video_url", "share_url", "permalink"] {
        if let Some(url) = raw.get(key).and_then(Value::as_str) {
            if let Some(id) = id_from_media_url(url) {
                return Some(id);
            }
        }
    }
    None
}

fn id_from_media_url(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next()?;
    let (path, query) = match without_fragment.split_once('?') {
        Some((path, query)) => (path, query),
        None => (without_fragment, ""),
    };

    // Watch-style URLs ("watch?v=<id>") carry the id in the query string;
    // the path segment is the same for every post.
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if matches!(key, "v" | "video_id") && is_media_id(value) {
                return Some(value.to_string());
            }
        }
    }

    // Path-style URLs like "/video/<id>" put the id last.
    let last = path.trim_end_matches('/').rsplit('/').next()?;
    if is_media_id(last) {
        Some(last.to_string())
    } else {
        None
    }
}

fn is_media_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Extracts a post's timestamp from a raw payload without full
/// normalization. Collectors use this for window filtering and for
/// synthesizing a cursor from the oldest post seen.
pub(crate) fn extract_posted_at(raw: &Value) -> Option<DateTime<Utc>> {
    TIMESTAMP_PATHS
        .iter()
        .filter_map(|path| lookup(raw, path))
        .find_map(parse_timestamp)
}

fn first_count(raw: &Value, paths: &[&[&str]]) -> i64 {
    paths
        .iter()
        .filter_map(|path| lookup(raw, path))
        .find_map(as_count)
        .unwrap_or(0)
}

/// Counts arrive as integers, floats, or numeric strings. Negative values
/// are provider glitches and clamp to zero.
fn as_count(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i.max(0));
            }
            #[allow(clippy::cast_possible_truncation)]
            n.as_f64().map(|f| (f.max(0.0)) as i64)
        }
        Value::String(s) => s.trim().parse::<i64>().ok().map(|i| i.max(0)),
        _ => None,
    }
}

fn lookup<'a>(raw: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = raw;
    for key in path {
        current = current.get(key)?;
    }
    Some(current)
}
