//! OHLC bar quality filter.
//!
//! Runs sequentially over a provider's bars and drops any bar that:
//! - is not strictly newer than the previously kept bar (duplicates and
//!   out-of-order bars; the first bar of a run wins)
//! - has a non-positive (or NaN) open/high/low/close
//! - violates `low <= open <= high` or `low <= close <= high`
//!
//! This is a filter, not a repair. Kept bars preserve input order and are
//! never modified, and the filter never fails.

use log::{debug, warn};

use crate::models::{OhlcBar, UnixSeconds};

/// Why a bar was dropped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DropReason {
    /// Timestamp not strictly after the previously kept bar.
    NotIncreasing,
    /// One of the four prices is `<= 0` or NaN.
    NonPositivePrice,
    /// Open or close lies outside `[low, high]`.
    OutOfRange,
}

/// Outcome of a quality pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QualityReport {
    pub kept: Vec<OhlcBar>,
    pub not_increasing: usize,
    pub non_positive_price: usize,
    pub out_of_range: usize,
}

impl QualityReport {
    pub fn dropped(&self) -> usize {
        self.not_increasing + self.non_positive_price + self.out_of_range
    }

    fn record(&mut self, reason: DropReason) {
        match reason {
            DropReason::NotIncreasing => self.not_increasing += 1,
            DropReason::NonPositivePrice => self.non_positive_price += 1,
            DropReason::OutOfRange => self.out_of_range += 1,
        }
    }
}

/// First rule `bar` breaks, given the last kept timestamp.
fn check_bar(bar: &OhlcBar, last_kept: Option<UnixSeconds>) -> Option<DropReason> {
    if last_kept.is_some_and(|last| bar.timestamp <= last) {
        return Some(DropReason::NotIncreasing);
    }
    if !bar.has_positive_prices() {
        return Some(DropReason::NonPositivePrice);
    }
    if !bar.is_within_range() {
        return Some(DropReason::OutOfRange);
    }
    None
}

/// Filter `bars` and report what was dropped and why.
pub fn validate_ohlc_quality_with_report(bars: Vec<OhlcBar>) -> QualityReport {
    let mut report = QualityReport {
        kept: Vec::with_capacity(bars.len()),
        ..QualityReport::default()
    };
    let mut last_kept: Option<UnixSeconds> = None;

    for bar in bars {
        match check_bar(&bar, last_kept) {
            None => {
                last_kept = Some(bar.timestamp);
                report.kept.push(bar);
            }
            Some(reason) => {
                debug!("Dropping OHLC bar at {}: {:?}", bar.timestamp, reason);
                report.record(reason);
            }
        }
    }

    if report.dropped() > 0 {
        warn!(
            "OHLC quality filter dropped {} bars (not increasing: {}, non-positive: {}, out of range: {}), kept {}",
            report.dropped(),
            report.not_increasing,
            report.non_positive_price,
            report.out_of_range,
            report.kept.len()
        );
    }

    report
}

/// Filter `bars`, keeping only well-formed, strictly increasing bars.
pub fn validate_ohlc_quality(bars: Vec<OhlcBar>) -> Vec<OhlcBar> {
    validate_ohlc_quality_with_report(bars).kept
}
