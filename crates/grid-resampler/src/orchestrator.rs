//! Resampling orchestrator.
//!
//! One run goes `plan -> {fetch -> index -> resolve -> append} per month -> save`.
//! Months already present in the stored table are skipped before any
//! retrieval, so a restarted run picks up where the last one stopped.

use std::collections::BTreeMap;

use chrono::{Datelike, Timelike};
use metrics::counter;
use tracing::{debug, info, instrument, warn};

use crate::config::{GapPolicy, ProductType, ResampleConfig, RunOptions};
use crate::error::{ResampleError, Result};
use crate::grid::{normalize_longitude, CoordinateGrid};
use crate::indexer::{self, FieldTensor};
use crate::planner::{self, MonthBatch};
use crate::provider::{GridProvider, RetrievalRequest};
use crate::spatial::{interpolate_at, Neighbours, PointValues};
use crate::store::TableStore;
use crate::table::{MonthCoverage, MonthRows, ResultRow, ResultTable};
use crate::temporal::{composite, Bracket};
use crate::time::{YearMonth, FORECAST_ISSUE_HOUR};

/// Summary of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub months_planned: usize,
    /// Already in the table
    pub months_skipped: usize,
    /// Planned only for a bracket, nothing to resolve
    pub months_empty: usize,
    pub months_processed: usize,
    pub rows_appended: usize,
    /// Rows discarded under [`GapPolicy::Drop`]
    pub rows_dropped: usize,
    /// Indexing gaps seen in each processed month
    pub gaps_per_month: BTreeMap<YearMonth, usize>,
}

impl RunReport {
    pub fn total_gaps(&self) -> usize {
        self.gaps_per_month.values().sum()
    }
}

/// The table produced by a run, with its report.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub table: ResultTable,
    pub report: RunReport,
}

/// Drives a resampling run against a provider and a table store.
pub struct Resampler<P, S> {
    config: ResampleConfig,
    options: RunOptions,
    provider: P,
    store: S,
}

impl<P: GridProvider, S: TableStore> Resampler<P, S> {
    pub fn new(config: ResampleConfig, options: RunOptions, provider: P, store: S) -> Self {
        Self {
            config,
            options,
            provider,
            store,
        }
    }

    pub fn config(&self) -> &ResampleConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run every planned month and persist the table.
    pub async fn run(&self) -> Result<RunOutcome> {
        let batches = planner::plan(&self.config.requests, self.config.product_type);
        let mut table = self.store.load(&self.config.variables).await?;

        info!(
            months = batches.len(),
            timestamps = self.config.requests.len(),
            locations = self.config.requests.location_count(),
            product_type = %self.config.product_type,
            resumed_months = table.months().count(),
            "Starting resampling run"
        );

        let mut report = RunReport {
            months_planned: batches.len(),
            ..Default::default()
        };

        for batch in &batches {
            let expected = batch.location_count(&self.config.requests);

            if let Some(coverage) = table.coverage(&batch.month) {
                self.check_resume(batch.month, expected, coverage)?;
                info!(month = %batch.month, rows = coverage.rows, "Month already in table, skipping");
                counter!("resampler_months_skipped_total").increment(1);
                report.months_skipped += 1;
                continue;
            }

            if batch.has_no_requests() {
                debug!(month = %batch.month, "Month planned for a bracket only, nothing to fetch");
                report.months_empty += 1;
                continue;
            }

            let rows = self.process_month(batch).await?;
            report.gaps_per_month.insert(batch.month, rows.gaps);
            report.rows_dropped += rows.dropped;

            let coverage = table.append_month(rows)?;
            counter!("resampler_rows_appended_total").increment(coverage.rows as u64);
            report.rows_appended += coverage.rows;
            report.months_processed += 1;

            if self.options.checkpoint_months {
                self.store.save(&table).await?;
            }
        }

        self.store.save(&table).await?;

        info!(
            processed = report.months_processed,
            skipped = report.months_skipped,
            rows = report.rows_appended,
            gaps = report.total_gaps(),
            "Resampling run complete"
        );

        Ok(RunOutcome { table, report })
    }

    fn check_resume(&self, month: YearMonth, expected: usize, coverage: MonthCoverage) -> Result<()> {
        if coverage.expected_locations == expected {
            return Ok(());
        }
        let err = ResampleError::ResumeInconsistency {
            month,
            expected,
            recorded: coverage.expected_locations,
        };
        if self.options.strict_resume {
            return Err(err);
        }
        warn!(month = %month, error = %err, "Stored month does not match the current plan");
        Ok(())
    }

    /// Fetch, index and resolve one month.
    #[instrument(skip(self, batch), fields(month = %batch.month))]
    async fn process_month(&self, batch: &MonthBatch) -> Result<MonthRows> {
        let request = RetrievalRequest::for_month(batch, &self.config, &self.options.retrieval);

        let raw = self.provider.fetch(&request).await.map_err(|e| match e {
            ResampleError::ProviderFailure { .. } => e,
            other => ResampleError::provider(batch.month, other.to_string()),
        })?;

        let (tensor, grid) = indexer::index(
            &raw,
            &self.config.variables,
            &self.config.height_levels,
            &batch.days,
            &batch.hours,
        )?;
        drop(raw);
        debug!(bounds = ?grid.bounds(), "Batch grid extent");

        let gaps = report_gaps(batch.month, &tensor);
        if gaps > 0 && self.options.gap_policy == GapPolicy::Fail {
            return Err(ResampleError::IndexingGap {
                month: batch.month,
                count: gaps,
            });
        }

        let rows = resolve_month(&self.config, batch, &tensor, &grid, self.options.gap_policy)?;
        info!(
            rows = rows.rows.len(),
            dropped = rows.dropped,
            gaps = rows.gaps,
            "Month resolved"
        );
        Ok(rows)
    }
}

/// Emit the diagnostic channel for a month's indexing gaps. Returns the gap count.
fn report_gaps(month: YearMonth, tensor: &FieldTensor) -> usize {
    let gaps = tensor.gaps();
    for gap in &gaps {
        warn!(
            month = %month,
            variable = %gap.variable,
            height_level = gap.height_level,
            day = gap.day,
            hour = gap.hour,
            "Provider returned no message for requested slice"
        );
    }
    if !gaps.is_empty() {
        counter!("resampler_indexing_gaps_total").increment(gaps.len() as u64);
    }
    gaps.len()
}

/// Resolve every (timestamp, location) of a month into result rows.
///
/// Rows come out in request order, then location order, then height-level
/// order. Under [`GapPolicy::Drop`] a row whose height level touches an
/// indexing gap is left out.
pub fn resolve_month(
    config: &ResampleConfig,
    batch: &MonthBatch,
    tensor: &FieldTensor,
    grid: &CoordinateGrid,
    gap_policy: GapPolicy,
) -> Result<MonthRows> {
    let mut rows = Vec::new();
    let mut dropped = 0usize;
    let mut expected_locations = 0usize;

    for request in batch.requests.iter().filter_map(|&i| config.requests.requests().get(i)) {
        let bracket = Bracket::for_timestamp(&request.time);

        for location in &request.locations {
            expected_locations += 1;
            let neighbours = Neighbours::find(grid, location.lat, normalize_longitude(location.lon))?;

            let values = match config.product_type {
                ProductType::Forecast => {
                    snapshot(&neighbours, tensor, batch.month, request.time.day(), FORECAST_ISSUE_HOUR)?
                }
                ProductType::Analysis => {
                    let bracket0 =
                        snapshot(&neighbours, tensor, batch.month, bracket.t0.day(), bracket.t0.hour())?;
                    let bracket1 = if bracket.needs_blend() {
                        Some(snapshot(
                            &neighbours,
                            tensor,
                            batch.month,
                            bracket.t1.day(),
                            bracket.t1.hour(),
                        )?)
                    } else {
                        None
                    };
                    composite(&bracket, bracket0, bracket1)?
                }
            };

            for (li, &height_level) in config.height_levels.iter().enumerate() {
                if gap_policy == GapPolicy::Drop && values.level_has_gap(li) {
                    dropped += 1;
                    continue;
                }
                rows.push(ResultRow {
                    time: request.key.clone(),
                    year_month: batch.month,
                    lat: location.lat,
                    lon: location.lon,
                    height_level,
                    values: values.values.column(li).to_vec(),
                });
            }
        }
    }

    Ok(MonthRows {
        month: batch.month,
        expected_locations,
        rows,
        gaps: tensor.gap_count(),
        dropped,
    })
}

fn snapshot(
    neighbours: &Neighbours,
    tensor: &FieldTensor,
    month: YearMonth,
    day: u32,
    hour: u32,
) -> Result<PointValues> {
    interpolate_at(neighbours, tensor, day, hour).ok_or(ResampleError::MissingSnapshot { month, day, hour })
}
