//! Batch planner: partitions requests into calendar-month retrievals.

use std::collections::BTreeSet;

use chrono::{Datelike, Timelike};

use crate::config::{ProductType, RequestIndex};
use crate::temporal::Bracket;
use crate::time::YearMonth;

/// Everything one month's retrieval has to cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthBatch {
    pub month: YearMonth,
    /// Calendar days to retrieve, ascending
    pub days: Vec<u32>,
    /// Hours of day to retrieve, ascending
    pub hours: Vec<u32>,
    /// Indices into [`RequestIndex::requests`] whose timestamp falls in this month
    pub requests: Vec<usize>,
}

impl MonthBatch {
    /// The month was planned only because a late bracket reaches into it.
    pub fn has_no_requests(&self) -> bool {
        self.requests.is_empty()
    }

    /// Number of (timestamp, location) pairs this month resolves.
    pub fn location_count(&self, index: &RequestIndex) -> usize {
        self.requests
            .iter()
            .filter_map(|&i| index.requests().get(i))
            .map(|r| r.locations.len())
            .sum()
    }
}

/// The set of months touched by the request index.
///
/// A timestamp's own month is always included. A timestamp at 21:00 or later
/// has its bracket1 on the following day; when that day is in the next
/// month, the next month is planned too.
pub fn plan_months(index: &RequestIndex) -> BTreeSet<YearMonth> {
    let mut months = BTreeSet::new();
    for request in index.requests() {
        months.insert(YearMonth::of(&request.time));
        if request.time.hour() >= 21 {
            let bracket = Bracket::for_timestamp(&request.time);
            months.insert(YearMonth::of(&bracket.t1));
        }
    }
    months
}

/// Days and hours that must be retrieved for `month`.
///
/// Days are the distinct days of the month's timestamps, plus bracket1's day
/// when a blend reaches past midnight within the same month.
pub fn select_days_and_hours(
    index: &RequestIndex,
    month: YearMonth,
    product: ProductType,
) -> (Vec<u32>, Vec<u32>) {
    let mut days = BTreeSet::new();
    for request in index.requests().iter().filter(|r| month.contains(&r.time)) {
        days.insert(request.time.day());
        if product == ProductType::Analysis {
            let bracket = Bracket::for_timestamp(&request.time);
            if bracket.needs_blend() {
                days.insert(bracket.t1.day());
            }
        }
    }
    (days.into_iter().collect(), product.hours())
}

/// Plan every month batch, in chronological order.
pub fn plan(index: &RequestIndex, product: ProductType) -> Vec<MonthBatch> {
    plan_months(index)
        .into_iter()
        .map(|month| {
            let (days, hours) = select_days_and_hours(index, month, product);
            let requests = index
                .requests()
                .iter()
                .enumerate()
                .filter(|(_, r)| month.contains(&r.time))
                .map(|(i, _)| i)
                .collect();
            MonthBatch {
                month,
                days,
                hours,
                requests,
            }
        })
        .collect()
}
