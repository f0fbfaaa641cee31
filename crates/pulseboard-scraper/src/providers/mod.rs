//! Paginated post collectors.
//!
//! Two provider pagination styles are supported:
//! - [`cursor`]: opaque forward cursor with an optional backward time-window
//!   sweep for deep history.
//! - [`continuation`]: continuation-token pagination that needs a separate
//!   account-details call to obtain a `secondary_id`.
//!
//! Collectors return raw JSON post objects, deduplicated by post id and
//! restricted to the requested time window. Normalization into typed rows is
//! a separate step ([`crate::normalize`]).

pub mod continuation;
pub mod cursor;

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::normalize::{extract_post_id, extract_posted_at};

/// Shared collector settings, derived from `AppConfig`.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Sent as `x-rapidapi-host` when present.
    pub host: Option<String>,
    pub page_size: usize,
    pub inter_request_delay: Duration,
}

impl ProviderConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            host: None,
            page_size: 30,
            inter_request_delay: Duration::from_millis(250),
        }
    }
}

/// Accumulates raw posts across pages, deduplicating by post id and
/// dropping posts that fall outside the requested window.
#[derive(Debug, Default)]
pub(crate) struct PostAccumulator {
    seen_ids: HashSet<String>,
    posts: Vec<Value>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl PostAccumulator {
    pub(crate) fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self {
            seen_ids: HashSet::new(),
            posts: Vec::new(),
            start,
            end,
        }
    }

    /// Absorbs a page of raw posts. Returns how many were new.
    pub(crate) fn absorb(&mut self, page: &[Value]) -> usize {
        let mut added = 0;
        for raw in page {
            let Some(id) = extract_post_id(raw) else {
                continue;
            };
            if self.seen_ids.contains(&id) {
                continue;
            }
            // A post with a parseable timestamp outside the window is
            // dropped; unparseable timestamps are kept and left to the
            // normalizer.
            if let Some(ts) = extract_posted_at(raw) {
                if self.start.is_some_and(|s| ts < s) || self.end.is_some_and(|e| ts > e) {
                    self.seen_ids.insert(id);
                    continue;
                }
            }
            self.seen_ids.insert(id);
            self.posts.push(raw.clone());
            added += 1;
        }
        added
    }

    pub(crate) fn len(&self) -> usize {
        self.posts.len()
    }

    /// Oldest parseable timestamp among accepted posts.
    pub(crate) fn oldest_posted_at(&self) -> Option<DateTime<Utc>> {
        self.posts.iter().filter_map(extract_posted_at).min()
    }

    pub(crate) fn into_posts(self) -> Vec<Value> {
        self.posts
    }
}
