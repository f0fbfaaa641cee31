//! Daily accrual aggregation over cumulative metric snapshots.
//!
//! Snapshots record rolling cumulative totals per account owner. This crate
//! turns them into a per-day delta series: how much each metric grew on each
//! calendar day, summed across owners. Everything here is pure over its row
//! inputs; fetching lives in `pulseboard-db` and wiring in the callers.

pub mod series;

pub use series::{accrue, AccrualOptions, DayMetrics, PostDayTotal, SnapshotInput};
