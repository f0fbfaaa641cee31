use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no API keys configured for provider '{provider}'")]
    NoKeysConfigured { provider: String },

    #[error("all {key_count} API keys exhausted or cooling down for {url}: {details}")]
    AllKeysExhausted {
        url: String,
        key_count: usize,
        details: String,
    },

    #[error("pagination limit reached for @{username}: exceeded {max_pages} pages")]
    PaginationLimit { username: String, max_pages: usize },

    #[error("missing expected field in provider response: {context}")]
    MissingData { context: String },
}
