//! Hashtag predicate applied to post captions.
//!
//! Campaign-scoped aggregation only counts posts whose caption carries every
//! required hashtag. The predicate stays outside the accrual algorithm: it
//! filters which post rows are selected as aggregation input.

use std::sync::OnceLock;

use regex::Regex;

fn hashtag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#([[:alnum:]_]+)").expect("hashtag regex is valid"))
}

/// Extract all hashtags from a caption, lowercased, without the `#`.
#[must_use]
pub fn extract_hashtags(caption: &str) -> Vec<String> {
    hashtag_regex()
        .captures_iter(caption)
        .map(|c| c[1].to_lowercase())
        .collect()
}

/// Requires every listed hashtag to appear in a caption.
#[derive(Debug, Clone, Default)]
pub struct HashtagFilter {
    required: Vec<String>,
}

impl HashtagFilter {
    /// Build a filter from raw tags; leading `#` and case are ignored.
    #[must_use]
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            required: required
                .into_iter()
                .map(|t| t.as_ref().trim_start_matches('#').to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// An empty filter matches everything, including posts with no caption.
    #[must_use]
    pub fn matches(&self, caption: Option<&str>) -> bool {
        if self.required.is_empty() {
            return true;
        }
        let Some(caption) = caption else {
            return false;
        };
        let tags = extract_hashtags(caption);
        self.required.iter().all(|r| tags.contains(r))
    }
}
