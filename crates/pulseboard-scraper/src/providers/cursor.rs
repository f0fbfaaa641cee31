//! Cursor-paginated post collector.
//!
//! Provider shape: `GET {base}/user/posts?username=&count=&start=&end=&cursor=`
//! returning `{ "data": { "videos": [...], "hasMore": bool, "cursor": ... } }`.
//!
//! Providers of this shape are unreliable at depth: cursors loop back on
//! themselves and `hasMore` lies. The collector runs an explicit state loop
//! with stall and cursor-repeat counters, and falls back to a backward sweep
//! over fixed time windows when forward pagination comes up short on a deep
//! history request.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;

use crate::error::ScrapeError;
use crate::keypool::RotatingClient;
use crate::providers::{PostAccumulator, ProviderConfig};

/// Hard cap on pages per window. The stall and repeat counters terminate
/// long before this; the cap only guards against a pathological provider.
const MAX_PAGES_PER_WINDOW: usize = 60;
/// Consecutive pages contributing no new posts before giving up.
const STALL_LIMIT: u32 = 3;
/// Consecutive identical cursors before synthesizing or giving up.
const CURSOR_REPEAT_LIMIT: u32 = 3;
/// Requests deeper than this trigger the backward sweep check.
const DEEP_HISTORY_DAYS: i64 = 60;
const SWEEP_WINDOW_DAYS: i64 = 21;
/// Consecutive sweep windows contributing nothing before the sweep stops.
const ZERO_WINDOW_LIMIT: u32 = 3;

enum FetchState {
    ForwardPage,
    StallCheck,
    BackwardSweep,
    Done,
}

/// One parsed page of the provider response.
#[derive(Debug)]
struct Page {
    videos: Vec<Value>,
    has_more: bool,
    cursor: Option<String>,
}

pub struct CursorCollector<'a> {
    client: &'a RotatingClient,
    config: &'a ProviderConfig,
}

impl<'a> CursorCollector<'a> {
    #[must_use]
    pub fn new(client: &'a RotatingClient, config: &'a ProviderConfig) -> Self {
        Self { client, config }
    }

    /// Collects all posts for `username` within `[start, end]`, deduplicated
    /// by post id.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::AllKeysExhausted`] when no API key can serve a
    /// page, [`ScrapeError::MissingData`] on a malformed page, or
    /// [`ScrapeError::PaginationLimit`] if a single window exceeds the page
    /// cap.
    pub async fn fetch_posts(
        &self,
        username: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, ScrapeError> {
        let mut acc = PostAccumulator::new(start, end);
        let mut state = FetchState::ForwardPage;

        loop {
            match state {
                FetchState::ForwardPage => {
                    self.collect_window(username, start, end, &mut acc).await?;
                    state = FetchState::StallCheck;
                }
                FetchState::StallCheck => {
                    state = if self.needs_backward_sweep(start, end, acc.len()) {
                        tracing::info!(
                            username,
                            collected = acc.len(),
                            "forward pagination came up short on deep history, sweeping backward"
                        );
                        FetchState::BackwardSweep
                    } else {
                        FetchState::Done
                    };
                }
                FetchState::BackwardSweep => {
                    self.backward_sweep(username, start, end, &mut acc).await?;
                    state = FetchState::Done;
                }
                FetchState::Done => return Ok(acc.into_posts()),
            }
        }
    }

    /// Deep requests that forward pagination could not fill (less than one
    /// full page) get the window sweep.
    fn needs_backward_sweep(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        collected: usize,
    ) -> bool {
        let Some(start) = start else {
            return false;
        };
        let end = end.unwrap_or_else(Utc::now);
        let deep = end - start > ChronoDuration::days(DEEP_HISTORY_DAYS);
        deep && collected < self.config.page_size
    }

    async fn backward_sweep(
        &self,
        username: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        acc: &mut PostAccumulator,
    ) -> Result<(), ScrapeError> {
        let Some(start) = start else {
            return Ok(());
        };
        let mut window_end = end.unwrap_or_else(Utc::now);
        let mut zero_windows = 0u32;

        while window_end > start {
            if zero_windows >= ZERO_WINDOW_LIMIT {
                tracing::info!(
                    username,
                    "stopping backward sweep after {ZERO_WINDOW_LIMIT} empty windows"
                );
                break;
            }
            let window_start = (window_end - ChronoDuration::days(SWEEP_WINDOW_DAYS)).max(start);

            let before = acc.len();
            self.collect_window(username, Some(window_start), Some(window_end), acc)
                .await?;
            if acc.len() == before {
                zero_windows += 1;
            } else {
                zero_windows = 0;
            }

            window_end = window_start;
        }
        Ok(())
    }

    /// Pages through one window until the provider signals completion or a
    /// stall/repeat counter trips.
    async fn collect_window(
        &self,
        username: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        acc: &mut PostAccumulator,
    ) -> Result<(), ScrapeError> {
        let mut cursor: Option<String> = None;
        let mut stalls = 0u32;
        let mut repeats = 0u32;
        let mut synthesized = false;

        for page_index in 0..MAX_PAGES_PER_WINDOW {
            if page_index > 0 {
                tokio::time::sleep(self.config.inter_request_delay).await;
            }

            let url = self.page_url(username, start, end, cursor.as_deref());
            let body = self
                .client
                .get(&url, self.config.host.as_deref())
                .await?
                .into_json("user posts page")?;
            let page = parse_page(&body)?;

            let added = acc.absorb(&page.videos);
            if added == 0 {
                stalls += 1;
                if stalls >= STALL_LIMIT {
                    tracing::debug!(username, "pagination stalled, stopping window");
                    return Ok(());
                }
            } else {
                stalls = 0;
            }

            let Some(next) = page.cursor else {
                return Ok(());
            };
            if !page.has_more {
                return Ok(());
            }

            if cursor.as_deref() == Some(next.as_str()) {
                repeats += 1;
                if repeats >= CURSOR_REPEAT_LIMIT {
                    if synthesized {
                        tracing::debug!(username, "cursor still cycling after synthesis, stopping");
                        return Ok(());
                    }
                    // Providers sometimes hand back the same cursor forever.
                    // Jump past the cycle by pretending the cursor is the
                    // oldest timestamp we have seen.
                    let Some(oldest) = acc.oldest_posted_at() else {
                        return Ok(());
                    };
                    cursor = Some(oldest.timestamp_millis().to_string());
                    synthesized = true;
                    repeats = 0;
                    continue;
                }
            } else {
                repeats = 0;
            }
            cursor = Some(next);
        }

        Err(ScrapeError::PaginationLimit {
            username: username.to_string(),
            max_pages: MAX_PAGES_PER_WINDOW,
        })
    }

    fn page_url(
        &self,
        username: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        cursor: Option<&str>,
    ) -> String {
        let mut url = format!(
            "{}/user/posts?username={}&count={}",
            self.config.base_url, username, self.config.page_size
        );
        if let Some(start) = start {
            url.push_str(&format!("&start={}", start.timestamp()));
        }
        if let Some(end) = end {
            url.push_str(&format!("&end={}", end.timestamp()));
        }
        if let Some(cursor) = cursor {
            url.push_str(&format!("&cursor={cursor}"));
        }
        url
    }
}

fn parse_page(body: &Value) -> Result<Page, ScrapeError> {
    let data = body.get("data").unwrap_or(body);

    let videos = data
        .get("videos")
        .or_else(|| data.get("items"))
        .and_then(Value::as_array)
        .ok_or_else(|| ScrapeError::MissingData {
            context: "data.videos".to_string(),
        })?
        .clone();

    let has_more = data
        .get("hasMore")
        .or_else(|| data.get("has_more"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let cursor = match data.get("cursor") {
        Some(Value::String(s)) if !s.is_empty() && s != "0" => Some(s.clone()),
        Some(Value::Number(n)) if n.as_i64() != Some(0) => Some(n.to_string()),
        _ => None,
    };

    Ok(Page {
        videos,
        has_more,
        cursor,
    })
}
