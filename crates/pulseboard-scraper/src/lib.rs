//! Provider scraping: key-rotating HTTP client, paginated collectors, and
//! payload normalization.
//!
//! The flow for one account is: pick the provider's collector, fetch raw
//! post JSON (deduplicated, window-restricted), then normalize into
//! [`NormalizedPost`] rows for upsert.

pub mod error;
pub mod keypool;
pub mod normalize;
pub mod providers;
pub mod timestamp;

pub use error::ScrapeError;
pub use keypool::{Cooldowns, ResponseBody, RotatingClient};
pub use normalize::{normalize_post, normalize_posts, NormalizedPost};
pub use providers::continuation::ContinuationCollector;
pub use providers::cursor::CursorCollector;
pub use providers::ProviderConfig;
pub use timestamp::parse_timestamp;
