//! Key-rotating HTTP client for rate-limited scraper providers.
//!
//! Wraps `reqwest` with a pool of API keys. A designated premium key is
//! always tried first; the remaining keys are tried in a rotation derived
//! from a time-bucket + URL hash, so repeated calls to the same URL within
//! a bucket prefer the same key and load spreads across processes.
//!
//! Quota responses (429/403 or quota-phrased bodies) put the offending key
//! on cooldown and advance to the next key without consuming a retry slot.
//! Other failures are retried on the same key with exponential backoff.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pulseboard_core::keys::KeyPoolConfig;
use sha2::{Digest, Sha256};

use crate::error::ScrapeError;

const PREMIUM_COOLDOWN: Duration = Duration::from_secs(5 * 60);
const POOL_COOLDOWN: Duration = Duration::from_secs(15 * 60);
/// Rotation bucket width: calls within the same half hour hash to the same
/// pool key for a given URL.
const ROTATION_BUCKET_SECS: u64 = 30 * 60;
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 10_000;

const QUOTA_PHRASES: [&str; 4] = ["quota", "rate limit", "too many requests", "exceeded"];

/// Per-key cooldown state, keyed by key-pool index.
///
/// Methods take an explicit `now` so tests can drive time deterministically.
/// State is shared process-wide and best-effort: a race only means a key is
/// tried slightly more or less than optimal.
#[derive(Debug, Default)]
pub struct Cooldowns {
    until: Mutex<HashMap<usize, Instant>>,
}

impl Cooldowns {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(&self, key_index: usize, now: Instant, ttl: Duration) {
        let mut until = self.until.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        until.insert(key_index, now + ttl);
    }

    #[must_use]
    pub fn is_cooling(&self, key_index: usize, now: Instant) -> bool {
        let until = self.until.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        until.get(&key_index).is_some_and(|&t| t > now)
    }
}

/// A provider response body: JSON when the `content-type` says so, raw text
/// otherwise.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    Json(serde_json::Value),
    Text(String),
}

impl ResponseBody {
    /// Interpret the body as JSON, parsing text bodies as a fallback.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Deserialize`] if a text body is not valid JSON.
    pub fn into_json(self, context: &str) -> Result<serde_json::Value, ScrapeError> {
        match self {
            ResponseBody::Json(v) => Ok(v),
            ResponseBody::Text(t) => {
                serde_json::from_str(&t).map_err(|e| ScrapeError::Deserialize {
                    context: context.to_string(),
                    source: e,
                })
            }
        }
    }
}

/// HTTP client that rotates through a pool of provider API keys.
pub struct RotatingClient {
    client: reqwest::Client,
    provider: String,
    premium: Option<String>,
    pool: Vec<String>,
    cooldowns: Arc<Cooldowns>,
    max_per_key_retries: u32,
}

impl RotatingClient {
    /// Creates a rotating client for one provider's key pool.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::NoKeysConfigured`] if the pool is empty, or
    /// [`ScrapeError::Http`] if the underlying `reqwest::Client` cannot be
    /// constructed.
    pub fn new(
        provider: &str,
        keys: &KeyPoolConfig,
        timeout_secs: u64,
        max_per_key_retries: u32,
        cooldowns: Arc<Cooldowns>,
    ) -> Result<Self, ScrapeError> {
        if keys.is_empty() {
            return Err(ScrapeError::NoKeysConfigured {
                provider: provider.to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("pulseboard/0.1 (social-metrics)")
            .build()?;

        Ok(Self {
            client,
            provider: provider.to_string(),
            premium: keys.premium.clone(),
            pool: keys.keys.clone(),
            cooldowns,
            max_per_key_retries,
        })
    }

    /// Sends a GET request, rotating across keys until one succeeds.
    ///
    /// `host` is set as the `x-rapidapi-host` header when present.
    ///
    /// # Errors
    ///
    /// - [`ScrapeError::AllKeysExhausted`] when every key failed or is
    ///   cooling down.
    /// - Never returns a per-key transient error directly; those are folded
    ///   into the exhaustion summary.
    pub async fn get(&self, url: &str, host: Option<&str>) -> Result<ResponseBody, ScrapeError> {
        let order = self.rotation_order(url, unix_now_secs());
        let mut failures: Vec<String> = Vec::new();
        let mut tried = 0usize;

        for key_index in order {
            if self.cooldowns.is_cooling(key_index, Instant::now()) {
                continue;
            }
            tried += 1;

            match self.try_key(url, host, key_index).await {
                Ok(body) => return Ok(body),
                Err(KeyAttemptError::Quota { status }) => {
                    let ttl = if self.is_premium(key_index) {
                        PREMIUM_COOLDOWN
                    } else {
                        POOL_COOLDOWN
                    };
                    self.cooldowns.place(key_index, Instant::now(), ttl);
                    tracing::warn!(
                        provider = %self.provider,
                        key_index,
                        status,
                        cooldown_secs = ttl.as_secs(),
                        "key hit quota — cooling down and rotating"
                    );
                    failures.push(format!("key #{key_index}: quota (status {status})"));
                }
                Err(KeyAttemptError::Exhausted(message)) => {
                    tracing::warn!(
                        provider = %self.provider,
                        key_index,
                        error = %message,
                        "key exhausted its retries — rotating"
                    );
                    failures.push(format!("key #{key_index}: {message}"));
                }
            }
        }

        if tried == 0 {
            failures.push("all keys cooling down".to_string());
        }

        Err(ScrapeError::AllKeysExhausted {
            url: url.to_string(),
            key_count: self.key_count(),
            details: failures.join("; "),
        })
    }

    /// Attempts one key: up to `max_per_key_retries` extra tries with
    /// exponential backoff for transient failures. Quota responses are
    /// reported immediately without consuming a retry slot.
    async fn try_key(
        &self,
        url: &str,
        host: Option<&str>,
        key_index: usize,
    ) -> Result<ResponseBody, KeyAttemptError> {
        let key = self.key_at(key_index);
        let mut last_error = String::new();

        for attempt in 0..=self.max_per_key_retries {
            if attempt > 0 {
                let computed = BACKOFF_BASE_MS.saturating_mul(1u64 << (attempt - 1).min(10));
                let capped = computed.min(BACKOFF_CAP_MS);
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss
                )]
                let delay_ms = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            let mut request = self.client.get(url).header("x-rapidapi-key", key);
            if let Some(host) = host {
                request = request.header("x-rapidapi-host", host);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = format!("network error: {e}");
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(KeyAttemptError::Quota {
                    status: status.as_u16(),
                });
            }

            let is_json = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.contains("json"));

            let body = match response.text().await {
                Ok(b) => b,
                Err(e) => {
                    last_error = format!("body read failed: {e}");
                    continue;
                }
            };

            // Providers sometimes report quota in a 2xx/4xx body instead of
            // the status line.
            if body_has_quota_phrasing(&body) {
                return Err(KeyAttemptError::Quota {
                    status: status.as_u16(),
                });
            }

            if !status.is_success() {
                last_error = format!("status {status}");
                continue;
            }

            if is_json {
                return match serde_json::from_str(&body) {
                    Ok(v) => Ok(ResponseBody::Json(v)),
                    Err(e) => {
                        last_error = format!("invalid JSON: {e}");
                        continue;
                    }
                };
            }
            return Ok(ResponseBody::Text(body));
        }

        Err(KeyAttemptError::Exhausted(last_error))
    }

    /// Premium key first, then pool keys starting at a deterministic offset
    /// derived from the current time bucket and the URL.
    fn rotation_order(&self, url: &str, now_secs: u64) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.key_count());
        if self.premium.is_some() {
            order.push(0);
        }

        let pool_len = self.pool.len();
        if pool_len > 0 {
            let offset = rotation_offset(url, now_secs, pool_len);
            let base = usize::from(self.premium.is_some());
            for i in 0..pool_len {
                order.push(base + (offset + i) % pool_len);
            }
        }
        order
    }

    fn key_at(&self, index: usize) -> &str {
        if let Some(premium) = &self.premium {
            if index == 0 {
                return premium;
            }
            return &self.pool[index - 1];
        }
        &self.pool[index]
    }

    fn is_premium(&self, index: usize) -> bool {
        self.premium.is_some() && index == 0
    }

    fn key_count(&self) -> usize {
        usize::from(self.premium.is_some()) + self.pool.len()
    }
}

enum KeyAttemptError {
    Quota { status: u16 },
    Exhausted(String),
}

fn unix_now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

fn rotation_offset(url: &str, now_secs: u64, pool_len: usize) -> usize {
    let bucket = now_secs / ROTATION_BUCKET_SECS;
    let mut hasher = Sha256::new();
    hasher.update(bucket.to_be_bytes());
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    let word = u64::from_be_bytes(digest[..8].try_into().expect("digest has 32 bytes"));
    usize::try_from(word % pool_len.max(1) as u64).unwrap_or(0)
}

fn body_has_quota_phrasing(body: &str) -> bool {
    // Only sniff short bodies; a full posts payload can legitimately contain
    // these words in captions.
    if body.len() > 2048 {
        return false;
    }
    let lower = body.to_lowercase();
    QUOTA_PHRASES.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(premium: Option<&str>, keys: &[&str]) -> KeyPoolConfig {
        KeyPoolConfig {
            premium: premium.map(str::to_string),
            keys: keys.iter().map(|k| (*k).to_string()).collect(),
        }
    }

    #[test]
    fn cooldown_expires_with_time() {
        let cooldowns = Cooldowns::new();
        let t0 = Instant::now();
        cooldowns.place(1, t0, Duration::from_secs(60));

        assert!(cooldowns.is_cooling(1, t0));
        assert!(cooldowns.is_cooling(1, t0 + Duration::from_secs(59)));
        assert!(!cooldowns.is_cooling(1, t0 + Duration::from_secs(61)));
        assert!(!cooldowns.is_cooling(2, t0));
    }

    #[test]
    fn rotation_order_puts_premium_first() {
        let client = RotatingClient::new(
            "tiktok",
            &pool(Some("prem"), &["a", "b", "c"]),
            10,
            0,
            Arc::new(Cooldowns::new()),
        )
        .expect("client");

        let order = client.rotation_order("https://x.test/u", 0);
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], 0, "premium key index always first");
        let mut rest = order[1..].to_vec();
        rest.sort_unstable();
        assert_eq!(rest, vec![1, 2, 3], "every pool key appears once");
    }

    #[test]
    fn rotation_offset_is_stable_within_a_bucket() {
        let a = rotation_offset("https://x.test/u?username=alice", 1_000, 5);
        let b = rotation_offset("https://x.test/u?username=alice", 1_700, 5);
        assert_eq!(a, b, "same bucket, same URL, same offset");
    }

    #[test]
    fn rotation_offset_varies_by_url() {
        let offsets: std::collections::HashSet<usize> = (0..20)
            .map(|i| rotation_offset(&format!("https://x.test/u{i}"), 0, 97))
            .collect();
        assert!(offsets.len() > 1, "different URLs should spread offsets");
    }

    #[test]
    fn quota_phrasing_detected_case_insensitively() {
        assert!(body_has_quota_phrasing("{\"message\":\"Monthly QUOTA reached\"}"));
        assert!(body_has_quota_phrasing("Rate Limit hit"));
        assert!(!body_has_quota_phrasing("{\"data\":{\"videos\":[]}}"));
    }

    #[test]
    fn quota_phrasing_ignores_large_payloads() {
        let big = format!("{{\"caption\":\"quota {}\"}}", "x".repeat(3000));
        assert!(!body_has_quota_phrasing(&big));
    }

    #[test]
    fn empty_pool_is_rejected() {
        let result = RotatingClient::new(
            "tiktok",
            &pool(None, &[]),
            10,
            0,
            Arc::new(Cooldowns::new()),
        );
        assert!(matches!(result, Err(ScrapeError::NoKeysConfigured { .. })));
    }
}
