//! The per-platform refresh orchestrator.
//!
//! Each invocation processes one small batch of handles: due retry-queue
//! entries first, then handles from the sorted handle list starting at the
//! caller's offset. The caller polls repeatedly until `remaining == 0`.
//! A wall-clock budget stops new work from starting near the external
//! execution limit; unstarted handles are reported as skipped and do not
//! advance the offset.

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{Duration, Utc};
use futures::StreamExt;
use pulseboard_core::keys::KeyPoolsFile;
use pulseboard_core::{AppConfig, Platform};
use pulseboard_db::{
    complete_refresh_run, create_refresh_run, enqueue_retry, fail_refresh_run, list_due_retries,
    list_handles, remove_retry, resolve_owner, start_refresh_run, upsert_post, NewPost,
};
use pulseboard_scraper::{
    normalize_posts, ContinuationCollector, Cooldowns, CursorCollector, ProviderConfig,
    RotatingClient,
};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::snapshot::write_owner_snapshot;
use crate::IngestError;

/// Which external provider serves a platform's posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderKind {
    /// Aggregator service, cursor-style pagination.
    AggregatorCursor,
    /// RapidAPI-hosted endpoint, continuation-token pagination.
    RapidApiContinuation,
}

fn provider_kind(platform: Platform) -> ProviderKind {
    match platform {
        Platform::TikTok | Platform::YouTube => ProviderKind::AggregatorCursor,
        Platform::Instagram => ProviderKind::RapidApiContinuation,
    }
}

/// Outcome of one handle attempt, as reported to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct HandleResult {
    pub username: String,
    pub status: &'static str,
    pub posts_upserted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub from_retry_queue: bool,
}

/// Result of one orchestrator batch.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub platform: Platform,
    pub run_id: Uuid,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub retries_drained: usize,
    /// Offset for the caller's next invocation.
    pub next_offset: usize,
    /// Handles left beyond `next_offset`; zero means the sweep is complete.
    pub remaining: usize,
    pub results: Vec<HandleResult>,
}

pub struct Refresher {
    pool: PgPool,
    config: AppConfig,
    key_pools: KeyPoolsFile,
    cooldowns: Arc<Cooldowns>,
}

impl Refresher {
    #[must_use]
    pub fn new(pool: PgPool, config: AppConfig, key_pools: KeyPoolsFile) -> Self {
        Self {
            pool,
            config,
            key_pools,
            cooldowns: Arc::new(Cooldowns::new()),
        }
    }

    /// Runs one batch for `platform` starting at `offset` into the sorted
    /// handle list.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] when the run cannot be set up at all (run row,
    /// handle list, or provider client). Per-handle failures are not errors;
    /// they land in the retry queue and in the summary.
    pub async fn run_batch(
        &self,
        platform: Platform,
        offset: usize,
        batch_size: Option<usize>,
        trigger_source: &str,
    ) -> Result<RefreshSummary, IngestError> {
        let run = create_refresh_run(&self.pool, platform, trigger_source).await?;
        start_refresh_run(&self.pool, run.id).await?;

        match self.run_batch_inner(platform, offset, batch_size, run.public_id).await {
            Ok((summary, posts_total)) => {
                let records = i32::try_from(posts_total).unwrap_or(i32::MAX);
                complete_refresh_run(&self.pool, run.id, records).await?;
                Ok(summary)
            }
            Err(e) => {
                fail_refresh_run(&self.pool, run.id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// Refreshes exactly one handle, with its own run row. The result
    /// carries per-handle failure detail; only setup problems are errors.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] when the run row or provider client cannot
    /// be set up.
    pub async fn run_single(
        &self,
        platform: Platform,
        username: &str,
        trigger_source: &str,
    ) -> Result<HandleResult, IngestError> {
        let run = create_refresh_run(&self.pool, platform, trigger_source).await?;
        start_refresh_run(&self.pool, run.id).await?;

        let kind = provider_kind(platform);
        let (client, provider_config) = match self.client_for(kind) {
            Ok(pair) => pair,
            Err(e) => {
                fail_refresh_run(&self.pool, run.id, &e.to_string()).await?;
                return Err(e);
            }
        };

        let result = self
            .attempt_handle(
                platform,
                kind,
                &client,
                &provider_config,
                username.to_string(),
                false,
            )
            .await;

        let records = i32::try_from(result.posts_upserted).unwrap_or(i32::MAX);
        complete_refresh_run(&self.pool, run.id, records).await?;
        Ok(result)
    }

    async fn run_batch_inner(
        &self,
        platform: Platform,
        offset: usize,
        batch_size: Option<usize>,
        run_id: Uuid,
    ) -> Result<(RefreshSummary, usize), IngestError> {
        let started = Instant::now();
        let budget = StdDuration::from_secs(self.config.refresh_wall_clock_budget_secs);
        let batch_size = batch_size.unwrap_or(self.config.refresh_batch_size).max(1);

        let kind = provider_kind(platform);
        let (client, provider_config) = self.client_for(kind)?;

        let handles = list_handles(&self.pool, platform).await?;
        let due = list_due_retries(&self.pool, platform, i64::try_from(batch_size).unwrap_or(i64::MAX))
            .await?;

        // Retry entries are drained first and never consume main-list slots
        // that would stall the offset cursor on a failing handle set.
        let main_slots = batch_size.saturating_sub(due.len());
        let main_batch: Vec<String> = handles
            .iter()
            .skip(offset)
            .take(main_slots)
            .map(|h| h.username.clone())
            .collect();

        let work: Vec<(String, bool)> = due
            .iter()
            .map(|r| (r.username.clone(), true))
            .chain(main_batch.iter().map(|u| (u.clone(), false)))
            .collect();

        tracing::info!(
            platform = platform.as_str(),
            offset,
            retries = due.len(),
            fresh = main_batch.len(),
            "starting refresh batch"
        );

        let results: Vec<HandleResult> = futures::stream::iter(work.into_iter().map(
            |(username, from_retry)| {
                let client = &client;
                let provider_config = &provider_config;
                async move {
                    if started.elapsed() >= budget {
                        return HandleResult {
                            username,
                            status: "skipped",
                            posts_upserted: 0,
                            error: None,
                            from_retry_queue: from_retry,
                        };
                    }
                    self.attempt_handle(platform, kind, client, provider_config, username, from_retry)
                        .await
                }
            },
        ))
        .buffer_unordered(self.config.refresh_max_concurrent_handles.max(1))
        .collect()
        .await;

        let succeeded = results.iter().filter(|r| r.status == "ok").count();
        let failed = results.iter().filter(|r| r.status == "failed").count();
        let retries_drained = results
            .iter()
            .filter(|r| r.from_retry_queue && r.status != "skipped")
            .count();
        let attempted_main = results
            .iter()
            .filter(|r| !r.from_retry_queue && r.status != "skipped")
            .count();
        let posts_total: usize = results.iter().map(|r| r.posts_upserted).sum();

        // Failures still advance the offset; the retry queue owns them now.
        let next_offset = offset + attempted_main;
        let remaining = handles.len().saturating_sub(next_offset);

        let summary = RefreshSummary {
            platform,
            run_id,
            attempted: attempted_main + retries_drained,
            succeeded,
            failed,
            retries_drained,
            next_offset,
            remaining,
            results,
        };
        Ok((summary, posts_total))
    }

    /// Collector + normalizer + upsert + snapshot for one handle, with
    /// retry-queue bookkeeping. Never fails the batch.
    async fn attempt_handle(
        &self,
        platform: Platform,
        kind: ProviderKind,
        client: &RotatingClient,
        provider_config: &ProviderConfig,
        username: String,
        from_retry: bool,
    ) -> HandleResult {
        match self
            .refresh_handle(platform, kind, client, provider_config, &username)
            .await
        {
            Ok(posts_upserted) => {
                if let Err(e) = remove_retry(&self.pool, platform, &username).await {
                    tracing::warn!(username, error = %e, "failed to clear retry entry");
                }
                HandleResult {
                    username,
                    status: "ok",
                    posts_upserted,
                    error: None,
                    from_retry_queue: from_retry,
                }
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(username, error = %message, "handle refresh failed, enqueueing retry");
                if let Err(enqueue_err) = enqueue_retry(&self.pool, platform, &username, &message).await
                {
                    tracing::error!(username, error = %enqueue_err, "failed to enqueue retry");
                }
                HandleResult {
                    username,
                    status: "failed",
                    posts_upserted: 0,
                    error: Some(message),
                    from_retry_queue: from_retry,
                }
            }
        }
    }

    async fn refresh_handle(
        &self,
        platform: Platform,
        kind: ProviderKind,
        client: &RotatingClient,
        provider_config: &ProviderConfig,
        username: &str,
    ) -> Result<usize, IngestError> {
        let captured_at = Utc::now();
        let window_start = captured_at - Duration::days(self.config.snapshot_window_days);

        let raw = match kind {
            ProviderKind::AggregatorCursor => {
                CursorCollector::new(client, provider_config)
                    .fetch_posts(username, Some(window_start), Some(captured_at))
                    .await?
            }
            ProviderKind::RapidApiContinuation => {
                ContinuationCollector::new(client, provider_config)
                    .fetch_posts(username, Some(window_start), Some(captured_at))
                    .await?
            }
        };

        let posts = normalize_posts(&raw, username);
        let upserted = posts.len();
        for post in posts {
            upsert_post(
                &self.pool,
                platform,
                &NewPost {
                    post_id: post.post_id,
                    username: post.username,
                    posted_at: post.posted_at,
                    counts: post.counts,
                    caption: post.caption,
                },
            )
            .await?;
        }

        if let Some(owner) = resolve_owner(&self.pool, platform, username).await? {
            write_owner_snapshot(
                &self.pool,
                owner,
                platform,
                self.config.snapshot_window_days,
                captured_at,
            )
            .await?;
        } else {
            tracing::debug!(username, "handle has no owner, posts stored without snapshot");
        }

        Ok(upserted)
    }

    fn client_for(&self, kind: ProviderKind) -> Result<(RotatingClient, ProviderConfig), IngestError> {
        let (provider, base_url) = match kind {
            ProviderKind::AggregatorCursor => ("aggregator", &self.config.aggregator_base_url),
            ProviderKind::RapidApiContinuation => ("rapidapi", &self.config.rapidapi_base_url),
        };

        let pool = self
            .key_pools
            .pool_for(provider)
            .ok_or_else(|| IngestError::MissingKeyPool {
                provider: provider.to_string(),
            })?;

        let client = RotatingClient::new(
            provider,
            pool,
            self.config.scraper_request_timeout_secs,
            self.config.scraper_max_per_key_retries,
            Arc::clone(&self.cooldowns),
        )?;

        let mut provider_config = ProviderConfig::new(base_url.clone());
        provider_config.page_size = usize::try_from(self.config.scraper_page_size).unwrap_or(30);
        provider_config.inter_request_delay =
            StdDuration::from_millis(self.config.scraper_inter_request_delay_ms);
        if kind == ProviderKind::RapidApiContinuation {
            provider_config.host = host_of(base_url);
        }

        Ok((client, provider_config))
    }
}

/// Host portion of a URL, for the `x-rapidapi-host` header.
fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let host = rest.split(['/', '?']).next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction_handles_common_shapes() {
        assert_eq!(
            host_of("https://tiktok-api.p.rapidapi.com/v2").as_deref(),
            Some("tiktok-api.p.rapidapi.com")
        );
        assert_eq!(
            host_of("http://127.0.0.1:8080").as_deref(),
            Some("127.0.0.1:8080")
        );
        assert_eq!(host_of("").as_deref(), None);
    }

    #[test]
    fn platforms_map_to_their_provider() {
        assert_eq!(provider_kind(Platform::TikTok), ProviderKind::AggregatorCursor);
        assert_eq!(provider_kind(Platform::YouTube), ProviderKind::AggregatorCursor);
        assert_eq!(
            provider_kind(Platform::Instagram),
            ProviderKind::RapidApiContinuation
        );
    }
}
