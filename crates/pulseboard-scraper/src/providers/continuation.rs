//! Continuation-token post collector.
//!
//! Provider shape:
//! - `GET {base}/user/details?username=` → `{ "data": { "secondary_id": .. } }`
//! - `GET {base}/user/videos?username=` → first page
//! - `GET {base}/user/videos/continuation?username=&secondary_id=&continuation_token=`
//!   → subsequent pages
//!
//! The continuation endpoint needs the account's `secondary_id`, which only
//! the details call exposes. Tokens keep coming even when the feed is
//! exhausted, so the loop also stops after three consecutive iterations
//! that add nothing.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::ScrapeError;
use crate::keypool::RotatingClient;
use crate::providers::{PostAccumulator, ProviderConfig};

const NON_GROWING_LIMIT: u32 = 3;
const MAX_ITERATIONS: usize = 60;

#[derive(Debug)]
struct Page {
    videos: Vec<Value>,
    token: Option<String>,
}

pub struct ContinuationCollector<'a> {
    client: &'a RotatingClient,
    config: &'a ProviderConfig,
}

impl<'a> ContinuationCollector<'a> {
    #[must_use]
    pub fn new(client: &'a RotatingClient, config: &'a ProviderConfig) -> Self {
        Self { client, config }
    }

    /// Collects all posts for `username` within `[start, end]`, deduplicated
    /// by post id.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::MissingData`] when the details call has no
    /// `secondary_id` or a page has no video list, or
    /// [`ScrapeError::AllKeysExhausted`] when no API key can serve a request.
    pub async fn fetch_posts(
        &self,
        username: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, ScrapeError> {
        let secondary_id = self.fetch_secondary_id(username).await?;
        let mut acc = PostAccumulator::new(start, end);

        let first_url = format!("{}/user/videos?username={}", self.config.base_url, username);
        let body = self
            .client
            .get(&first_url, self.config.host.as_deref())
            .await?
            .into_json("user videos page")?;
        let page = parse_page(&body)?;
        acc.absorb(&page.videos);

        let mut token = page.token;
        let mut non_growing = 0u32;

        for _ in 0..MAX_ITERATIONS {
            let Some(current) = token else {
                break;
            };
            tokio::time::sleep(self.config.inter_request_delay).await;

            let url = format!(
                "{}/user/videos/continuation?username={}&secondary_id={}&continuation_token={}",
                self.config.base_url, username, secondary_id, current
            );
            let body = self
                .client
                .get(&url, self.config.host.as_deref())
                .await?
                .into_json("user videos continuation page")?;
            let page = parse_page(&body)?;

            if acc.absorb(&page.videos) == 0 {
                non_growing += 1;
                if non_growing >= NON_GROWING_LIMIT {
                    tracing::debug!(username, "continuation feed stopped growing, stopping");
                    break;
                }
            } else {
                non_growing = 0;
            }
            token = page.token;
        }

        Ok(acc.into_posts())
    }

    async fn fetch_secondary_id(&self, username: &str) -> Result<String, ScrapeError> {
        let url = format!("{}/user/details?username={}", self.config.base_url, username);
        let body = self
            .client
            .get(&url, self.config.host.as_deref())
            .await?
            .into_json("user details")?;

        let data = body.get("data").unwrap_or(&body);
        data.get("secondary_id")
            .or_else(|| data.get("secondaryId"))
            .and_then(secondary_id_string)
            .ok_or_else(|| ScrapeError::MissingData {
                context: format!("secondary_id for @{username}"),
            })
    }
}

fn secondary_id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
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

    let token = data
        .get("continuation_token")
        .or_else(|| data.get("continuationToken"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(Page { videos, token })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_page_with_token() {
        let body = json!({
            "data": {"videos": [{"id": "a"}], "continuation_token": "tok-2"}
        });

        let page = parse_page(&body).expect("page");
        assert_eq!(page.videos.len(), 1);
        assert_eq!(page.token.as_deref(), Some("tok-2"));
    }

    #[test]
    fn empty_token_means_no_token() {
        let body = json!({"data": {"videos": [], "continuation_token": ""}});
        let page = parse_page(&body).expect("page");
        assert!(page.token.is_none());
    }

    #[test]
    fn numeric_secondary_id_is_accepted() {
        assert_eq!(
            secondary_id_string(&json!(6_881_290_705_i64)).as_deref(),
            Some("6881290705")
        );
        assert_eq!(secondary_id_string(&json!("MS4w")).as_deref(), Some("MS4w"));
        assert!(secondary_id_string(&json!("")).is_none());
        assert!(secondary_id_string(&json!(null)).is_none());
    }
}
