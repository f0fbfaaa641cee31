//! Shared domain types: platforms, handles, and metric counters.

use serde::{Deserialize, Serialize};

/// An external social platform whose posts we collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    TikTok,
    Instagram,
    YouTube,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::TikTok, Platform::Instagram, Platform::YouTube];

    /// Stable lowercase name, used for table selection and queue rows.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::TikTok => "tiktok",
            Platform::Instagram => "instagram",
            Platform::YouTube => "youtube",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tiktok" => Ok(Platform::TikTok),
            "instagram" => Ok(Platform::Instagram),
            "youtube" => Ok(Platform::YouTube),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// A creator account on one platform.
///
/// Usernames are normalized on construction: one leading `@` is stripped
/// and the rest lowercased, so `@Alice` and `alice` identify the same
/// account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    pub platform: Platform,
    pub username: String,
}

impl Handle {
    #[must_use]
    pub fn new(platform: Platform, username: &str) -> Self {
        Self {
            platform,
            username: normalize_username(username),
        }
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/@{}", self.platform, self.username)
    }
}

/// Strip one leading `@` and lowercase.
#[must_use]
pub fn normalize_username(raw: &str) -> String {
    raw.trim().strip_prefix('@').unwrap_or(raw.trim()).to_lowercase()
}

/// The five counter fields carried by every post and snapshot.
///
/// Counters are absolute provider values, never deltas. Arithmetic is
/// saturating: provider jitter must not wrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricCounts {
    pub views: i64,
    pub likes: i64,
    pub comments: i64,
    pub shares: i64,
    pub saves: i64,
}

impl MetricCounts {
    #[must_use]
    pub fn add(self, other: MetricCounts) -> MetricCounts {
        MetricCounts {
            views: self.views.saturating_add(other.views),
            likes: self.likes.saturating_add(other.likes),
            comments: self.comments.saturating_add(other.comments),
            shares: self.shares.saturating_add(other.shares),
            saves: self.saves.saturating_add(other.saves),
        }
    }

    /// Per-metric `max(0, self - previous)`.
    ///
    /// A decreased counter (deleted post, provider re-scrape) clamps to
    /// zero rather than reporting negative growth.
    #[must_use]
    pub fn delta_from(self, previous: MetricCounts) -> MetricCounts {
        MetricCounts {
            views: (self.views - previous.views).max(0),
            likes: (self.likes - previous.likes).max(0),
            comments: (self.comments - previous.comments).max(0),
            shares: (self.shares - previous.shares).max(0),
            saves: (self.saves - previous.saves).max(0),
        }
    }

    #[must_use]
    pub fn is_zero(self) -> bool {
        self == MetricCounts::default()
    }
}
