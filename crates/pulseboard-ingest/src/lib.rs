//! Ingestion wiring: per-handle refresh, snapshot writing, and the batch
//! orchestrator that walks a platform's handle list under a wall-clock
//! budget.

use thiserror::Error;

pub mod refresh;
pub mod snapshot;

pub use refresh::{HandleResult, RefreshSummary, Refresher};
pub use snapshot::write_owner_snapshot;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Scrape(#[from] pulseboard_scraper::ScrapeError),
    #[error(transparent)]
    Db(#[from] pulseboard_db::DbError),
    #[error("no key pool configured for provider '{provider}'")]
    MissingKeyPool { provider: String },
}
