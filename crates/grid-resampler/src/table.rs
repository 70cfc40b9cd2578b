//! The accumulating result table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ResampleError, Result};
use crate::time::YearMonth;

/// Column names taken by the row key; no variable may use them.
pub const RESERVED_COLUMNS: [&str; 6] = ["id", "year_month", "time", "lat", "lon", "height_level"];

/// One resolved `(time, lat, lon, height_level)` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Request key, verbatim
    pub time: String,
    pub year_month: YearMonth,
    pub lat: f64,
    pub lon: f64,
    pub height_level: u32,
    /// One value per table variable, in column order
    pub values: Vec<f64>,
}

/// What a committed month was expected to cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthCoverage {
    /// (timestamp, location) pairs planned for the month
    pub expected_locations: usize,
    pub rows: usize,
}

/// All rows produced for one month.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthRows {
    pub month: YearMonth,
    pub expected_locations: usize,
    pub rows: Vec<ResultRow>,
    /// Tensor slices the provider left empty
    pub gaps: usize,
    /// Rows discarded by the gap policy
    pub dropped: usize,
}

/// Rows for every committed month, plus per-month coverage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    variables: Vec<String>,
    rows: Vec<ResultRow>,
    months: BTreeMap<YearMonth, MonthCoverage>,
}

impl ResultTable {
    pub fn new(variables: Vec<String>) -> Self {
        Self {
            variables,
            rows: Vec::new(),
            months: BTreeMap::new(),
        }
    }

    /// Rebuild a table from persisted parts.
    pub fn from_parts(
        variables: Vec<String>,
        rows: Vec<ResultRow>,
        months: BTreeMap<YearMonth, MonthCoverage>,
    ) -> Self {
        Self {
            variables,
            rows,
            months,
        }
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains_month(&self, month: &YearMonth) -> bool {
        self.months.contains_key(month)
    }

    pub fn coverage(&self, month: &YearMonth) -> Option<MonthCoverage> {
        self.months.get(month).copied()
    }

    pub fn months(&self) -> impl Iterator<Item = (&YearMonth, &MonthCoverage)> {
        self.months.iter()
    }

    /// Rows belonging to one month.
    pub fn month_rows<'a>(&'a self, month: &'a YearMonth) -> impl Iterator<Item = &'a ResultRow> + 'a {
        self.rows.iter().filter(move |r| &r.year_month == month)
    }

    /// Values of one variable column, in row order.
    pub fn column(&self, variable: &str) -> Option<Vec<f64>> {
        let idx = self.variables.iter().position(|v| v == variable)?;
        Some(self.rows.iter().map(|r| r.values[idx]).collect())
    }

    /// Append a whole month.
    ///
    /// Fails without touching the table if the month is already present or a
    /// row is malformed.
    pub fn append_month(&mut self, month: MonthRows) -> Result<MonthCoverage> {
        if self.months.contains_key(&month.month) {
            return Err(ResampleError::storage(format!(
                "month {} already present in result table",
                month.month
            )));
        }
        if let Some(bad) = month
            .rows
            .iter()
            .find(|r| r.values.len() != self.variables.len() || r.year_month != month.month)
        {
            return Err(ResampleError::storage(format!(
                "row {} @ {} does not fit month {} with {} variable(s)",
                bad.time,
                bad.height_level,
                month.month,
                self.variables.len()
            )));
        }

        let coverage = MonthCoverage {
            expected_locations: month.expected_locations,
            rows: month.rows.len(),
        };
        self.rows.extend(month.rows);
        self.months.insert(month.month, coverage);
        Ok(coverage)
    }
}
