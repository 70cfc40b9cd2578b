//! In-memory grid providers for orchestrator tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use grid_resampler::{GridProvider, RawBatch, ResampleError, Result, RetrievalRequest, YearMonth};

use crate::fixtures::grid::GridSpec;
use crate::generators::{BatchBuilder, FieldFn, Sample};

/// Builds each month's batch on demand from the retrieval request and
/// records every request it receives.
pub struct RecordingProvider {
    spec: GridSpec,
    field: FieldFn,
    failing: HashSet<YearMonth>,
    skipped: Vec<(String, u32, u32, u32)>,
    requests: Mutex<Vec<RetrievalRequest>>,
}

impl RecordingProvider {
    pub fn new(spec: GridSpec, field: impl Fn(&Sample<'_>) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            spec,
            field: Arc::new(field),
            failing: HashSet::new(),
            skipped: Vec::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail every fetch for `month`.
    pub fn fail_month(mut self, month: YearMonth) -> Self {
        self.failing.insert(month);
        self
    }

    /// Omit one message from every batch.
    pub fn omit(mut self, variable: &str, level: u32, day: u32, hour: u32) -> Self {
        self.skipped.push((variable.to_string(), level, day, hour));
        self
    }

    pub fn calls(&self) -> usize {
        self.requests().len()
    }

    pub fn requests(&self) -> Vec<RetrievalRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

fn parse_hour(time: &str) -> Option<u32> {
    time.split(':').next()?.parse().ok()
}

#[async_trait]
impl GridProvider for RecordingProvider {
    async fn fetch(&self, request: &RetrievalRequest) -> Result<RawBatch> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());

        let month = request.year_month()?;
        if self.failing.contains(&month) {
            return Err(ResampleError::provider(month, "retrieval rejected"));
        }

        let hours: Vec<u32> = request.time.iter().filter_map(|t| parse_hour(t)).collect();
        let variables: Vec<&str> = request.variable.iter().map(String::as_str).collect();

        let mut builder = BatchBuilder::new(self.spec)
            .variables(&variables)
            .levels(&request.height_level)
            .days(&request.day)
            .hours(&hours);
        for (variable, level, day, hour) in &self.skipped {
            builder = builder.skip(variable, *level, *day, *hour);
        }

        Ok(builder.shared_field(Arc::clone(&self.field)).build())
    }
}
