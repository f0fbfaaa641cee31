//! The accrual algorithm.
//!
//! For each owner: take the last snapshot of each calendar day, seed the
//! previous value from the day-before-start snapshot when one exists, and
//! emit `max(0, current - previous)` per metric per day. Owner deltas are
//! then summed into a single zero-filled series covering every day of the
//! requested range.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use pulseboard_core::MetricCounts;
use serde::Serialize;

/// One snapshot row, already scoped to a platform by the caller.
///
/// Rows must arrive sorted by capture time so the last row per calendar day
/// wins.
#[derive(Debug, Clone)]
pub struct SnapshotInput {
    pub user_id: i64,
    pub captured_on: NaiveDate,
    pub counts: MetricCounts,
}

/// Absolute per-day post totals, used as the fallback when no snapshot
/// history exists yet.
#[derive(Debug, Clone)]
pub struct PostDayTotal {
    pub day: NaiveDate,
    pub counts: MetricCounts,
}

/// One day of the output series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayMetrics {
    pub day: NaiveDate,
    #[serde(flatten)]
    pub counts: MetricCounts,
}

#[derive(Debug, Clone)]
pub struct AccrualOptions {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Days strictly before this date are zeroed while staying on the axis.
    pub cutoff: Option<NaiveDate>,
    pub apply_cutoff_mask: bool,
    /// Drop leading all-zero days from the result.
    pub trim_leading_zeros: bool,
}

impl AccrualOptions {
    #[must_use]
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            cutoff: None,
            apply_cutoff_mask: true,
            trim_leading_zeros: false,
        }
    }
}

/// Computes the accrual series.
///
/// `snapshots` must be ordered by capture time within each owner and should
/// cover `[start - 1 day, end]` so baselines resolve. `fallback` supplies
/// absolute per-post-date totals substituted when the accrual series sums to
/// zero, which happens for owners with no snapshot history yet.
#[must_use]
pub fn accrue(
    snapshots: &[SnapshotInput],
    fallback: &[PostDayTotal],
    options: &AccrualOptions,
) -> Vec<DayMetrics> {
    if options.end < options.start {
        return Vec::new();
    }

    let mut days: BTreeMap<NaiveDate, MetricCounts> = zero_filled(options.start, options.end);

    for (_, owner_snapshots) in group_by_owner(snapshots) {
        accrue_owner(&owner_snapshots, options.start, &mut days);
    }

    if days.values().all(|c| c.is_zero()) && !fallback.is_empty() {
        for total in fallback {
            if let Some(slot) = days.get_mut(&total.day) {
                *slot = total.counts;
            }
        }
    }

    if options.apply_cutoff_mask {
        if let Some(cutoff) = options.cutoff {
            for (day, counts) in &mut days {
                if *day < cutoff {
                    *counts = MetricCounts::default();
                }
            }
        }
    }

    let mut series: Vec<DayMetrics> = days
        .into_iter()
        .map(|(day, counts)| DayMetrics { day, counts })
        .collect();

    if options.trim_leading_zeros {
        let first_active = series.iter().position(|d| !d.counts.is_zero());
        series = match first_active {
            Some(index) => series.split_off(index),
            None => Vec::new(),
        };
    }

    series
}

/// Accrues one owner's snapshots into the shared day map.
fn accrue_owner(
    snapshots: &[SnapshotInput],
    start: NaiveDate,
    days: &mut BTreeMap<NaiveDate, MetricCounts>,
) {
    // Last snapshot per calendar day; input order is capture order.
    let mut per_day: BTreeMap<NaiveDate, MetricCounts> = BTreeMap::new();
    for snapshot in snapshots {
        per_day.insert(snapshot.captured_on, snapshot.counts);
    }

    let baseline_day = start.pred_opt();
    let mut previous: Option<MetricCounts> =
        baseline_day.and_then(|day| per_day.get(&day).copied());

    for (day, counts) in per_day.range(start..) {
        // Without a baseline, the first observed snapshot only seeds the
        // carried previous value; there is nothing to difference against.
        if let Some(prev) = previous {
            let delta = counts.delta_from(prev);
            if let Some(slot) = days.get_mut(day) {
                *slot = slot.add(delta);
            }
        }
        previous = Some(*counts);
    }
}

fn group_by_owner(snapshots: &[SnapshotInput]) -> BTreeMap<i64, Vec<SnapshotInput>> {
    let mut owners: BTreeMap<i64, Vec<SnapshotInput>> = BTreeMap::new();
    for snapshot in snapshots {
        owners.entry(snapshot.user_id).or_default().push(snapshot.clone());
    }
    owners
}

fn zero_filled(start: NaiveDate, end: NaiveDate) -> BTreeMap<NaiveDate, MetricCounts> {
    start
        .iter_days()
        .take_while(|day| *day <= end)
        .map(|day| (day, MetricCounts::default()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().expect("valid date")
    }

    fn counts(views: i64) -> MetricCounts {
        MetricCounts {
            views,
            likes: views / 10,
            comments: 0,
            shares: 0,
            saves: 0,
        }
    }

    fn snapshot(user_id: i64, day: &str, views: i64) -> SnapshotInput {
        SnapshotInput {
            user_id,
            captured_on: date(day),
            counts: counts(views),
        }
    }

    #[test]
    fn cumulative_growth_becomes_daily_deltas() {
        let snapshots = vec![
            snapshot(1, "2026-01-31", 100),
            snapshot(1, "2026-02-01", 150),
            snapshot(1, "2026-02-02", 150),
            snapshot(1, "2026-02-03", 230),
        ];
        let options = AccrualOptions::new(date("2026-02-01"), date("2026-02-03"));

        let series = accrue(&snapshots, &[], &options);

        let views: Vec<i64> = series.iter().map(|d| d.counts.views).collect();
        assert_eq!(views, vec![50, 0, 80]);
    }

    #[test]
    fn last_snapshot_of_the_day_wins() {
        let snapshots = vec![
            snapshot(1, "2026-01-31", 100),
            snapshot(1, "2026-02-01", 120),
            snapshot(1, "2026-02-01", 140),
        ];
        let options = AccrualOptions::new(date("2026-02-01"), date("2026-02-01"));

        let series = accrue(&snapshots, &[], &options);
        assert_eq!(series[0].counts.views, 40);
    }

    #[test]
    fn shrinking_counters_clamp_to_zero() {
        let snapshots = vec![
            snapshot(1, "2026-01-31", 100),
            snapshot(1, "2026-02-01", 70),
            snapshot(1, "2026-02-02", 90),
        ];
        let options = AccrualOptions::new(date("2026-02-01"), date("2026-02-02"));

        let series = accrue(&snapshots, &[], &options);
        let views: Vec<i64> = series.iter().map(|d| d.counts.views).collect();
        assert_eq!(views, vec![0, 20], "deltas are never negative");
    }

    #[test]
    fn previous_carries_across_snapshotless_days() {
        let snapshots = vec![
            snapshot(1, "2026-01-31", 100),
            snapshot(1, "2026-02-03", 160),
        ];
        let options = AccrualOptions::new(date("2026-02-01"), date("2026-02-04"));

        let series = accrue(&snapshots, &[], &options);
        let views: Vec<i64> = series.iter().map(|d| d.counts.views).collect();
        assert_eq!(
            views,
            vec![0, 0, 60, 0],
            "gap days are zero and the gap's growth lands on the next snapshot day"
        );
    }

    #[test]
    fn missing_baseline_defers_deltas_to_second_snapshot() {
        let snapshots = vec![
            snapshot(1, "2026-02-02", 500),
            snapshot(1, "2026-02-03", 520),
        ];
        let options = AccrualOptions::new(date("2026-02-01"), date("2026-02-03"));

        let series = accrue(&snapshots, &[], &options);
        let views: Vec<i64> = series.iter().map(|d| d.counts.views).collect();
        assert_eq!(
            views,
            vec![0, 0, 20],
            "the first observed snapshot seeds previous without emitting a delta"
        );
    }

    #[test]
    fn owners_sum_per_day() {
        let snapshots = vec![
            snapshot(1, "2026-01-31", 100),
            snapshot(1, "2026-02-01", 130),
            snapshot(2, "2026-01-31", 10),
            snapshot(2, "2026-02-01", 25),
        ];
        let options = AccrualOptions::new(date("2026-02-01"), date("2026-02-01"));

        let series = accrue(&snapshots, &[], &options);
        assert_eq!(series[0].counts.views, 45);
    }

    #[test]
    fn cutoff_mask_zeroes_but_keeps_dates() {
        let snapshots = vec![
            snapshot(1, "2026-01-31", 100),
            snapshot(1, "2026-02-01", 150),
            snapshot(1, "2026-02-02", 170),
        ];
        let mut options = AccrualOptions::new(date("2026-02-01"), date("2026-02-02"));
        options.cutoff = Some(date("2026-02-02"));

        let series = accrue(&snapshots, &[], &options);

        assert_eq!(series.len(), 2, "masked days stay on the axis");
        assert_eq!(series[0].day, date("2026-02-01"));
        assert!(series[0].counts.is_zero());
        assert_eq!(series[1].counts.views, 20);
    }

    #[test]
    fn cutoff_mask_can_be_disabled() {
        let snapshots = vec![
            snapshot(1, "2026-01-31", 100),
            snapshot(1, "2026-02-01", 150),
        ];
        let mut options = AccrualOptions::new(date("2026-02-01"), date("2026-02-01"));
        options.cutoff = Some(date("2026-02-02"));
        options.apply_cutoff_mask = false;

        let series = accrue(&snapshots, &[], &options);
        assert_eq!(series[0].counts.views, 50);
    }

    #[test]
    fn fallback_fills_an_all_zero_series() {
        let fallback = vec![
            PostDayTotal {
                day: date("2026-02-01"),
                counts: counts(300),
            },
            PostDayTotal {
                day: date("2026-03-15"),
                counts: counts(999),
            },
        ];
        let options = AccrualOptions::new(date("2026-02-01"), date("2026-02-03"));

        let series = accrue(&[], &fallback, &options);

        assert_eq!(series[0].counts.views, 300);
        assert!(series[1].counts.is_zero());
        assert_eq!(series.len(), 3, "out-of-range fallback days are ignored");
    }

    #[test]
    fn fallback_is_ignored_when_accrual_produced_anything() {
        let snapshots = vec![
            snapshot(1, "2026-01-31", 100),
            snapshot(1, "2026-02-01", 101),
        ];
        let fallback = vec![PostDayTotal {
            day: date("2026-02-01"),
            counts: counts(9999),
        }];
        let options = AccrualOptions::new(date("2026-02-01"), date("2026-02-01"));

        let series = accrue(&snapshots, &fallback, &options);
        assert_eq!(series[0].counts.views, 1);
    }

    #[test]
    fn trim_drops_leading_zero_days_only() {
        let snapshots = vec![
            snapshot(1, "2026-02-02", 100),
            snapshot(1, "2026-02-03", 160),
        ];
        let mut options = AccrualOptions::new(date("2026-02-01"), date("2026-02-04"));
        options.trim_leading_zeros = true;

        let series = accrue(&snapshots, &[], &options);

        assert_eq!(series.first().map(|d| d.day), Some(date("2026-02-03")));
        assert_eq!(series.len(), 2, "trailing zero days are kept");
    }

    #[test]
    fn empty_range_yields_empty_series() {
        let options = AccrualOptions::new(date("2026-02-02"), date("2026-02-01"));
        assert!(accrue(&[], &[], &options).is_empty());
    }

    #[test]
    fn day_metrics_serialize_flat() {
        let day = DayMetrics {
            day: date("2026-02-01"),
            counts: counts(10),
        };
        let json = serde_json::to_value(&day).expect("serializes");
        assert_eq!(json["day"], "2026-02-01");
        assert_eq!(json["views"], 10);
    }
}
