//! Grid provider: materializes one month's raw batch.
//!
//! The engine only talks to [`GridProvider`]. [`ArchiveProvider`] is the
//! file-exchange implementation used in production: it drops a retrieval
//! request next to the archive and polls until the matching batch file
//! appears, backing off exponentially between checks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::batch::RawBatch;
use crate::config::{ProductType, ResampleConfig, RetrievalDefaults};
use crate::error::{ResampleError, Result};
use crate::planner::MonthBatch;
use crate::time::YearMonth;

/// Everything a provider needs to materialize one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub dataset: String,
    pub domain: String,
    pub variable: Vec<String>,
    pub height_level: Vec<u32>,
    pub product_type: ProductType,
    pub year: i32,
    pub month: u32,
    pub day: Vec<u32>,
    /// Hours of day, written `HH:00`
    pub time: Vec<String>,
    pub grid: [f64; 2],
    pub area: [f64; 4],
    pub format: String,
    /// Only set for forecast retrievals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leadtime_hour: Option<u32>,
}

impl RetrievalRequest {
    /// Build the request for a planned month.
    pub fn for_month(batch: &MonthBatch, config: &ResampleConfig, defaults: &RetrievalDefaults) -> Self {
        let leadtime_hour = match config.product_type {
            ProductType::Forecast => Some(config.leadtime_hour),
            ProductType::Analysis => None,
        };

        Self {
            dataset: defaults.dataset.clone(),
            domain: defaults.domain.clone(),
            variable: config.variables.clone(),
            height_level: config.height_levels.clone(),
            product_type: config.product_type,
            year: batch.month.year,
            month: batch.month.month,
            day: batch.days.clone(),
            time: batch.hours.iter().map(|h| format!("{:02}:00", h)).collect(),
            grid: defaults.grid,
            area: defaults.area,
            format: defaults.format.clone(),
            leadtime_hour,
        }
    }

    pub fn year_month(&self) -> Result<YearMonth> {
        YearMonth::new(self.year, self.month)
    }
}

/// Source of raw grid batches.
#[async_trait]
pub trait GridProvider: Send + Sync {
    /// Materialize the batch for one month.
    ///
    /// Blocks (asynchronously) until the batch is available or the provider gives up.
    async fn fetch(&self, request: &RetrievalRequest) -> Result<RawBatch>;
}

/// Polling schedule for [`ArchiveProvider`].
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// First wait between checks (doubles each check)
    pub initial_interval: Duration,
    /// Upper bound on the wait between checks
    pub max_interval: Duration,
    /// Give up once this much time has passed
    pub max_wait: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(120),
            max_wait: Duration::from_secs(24 * 3600),
        }
    }
}

/// File-exchange provider.
///
/// For month `YYYY-MM` it writes `<dir>/YYYY-MM.request.json` and waits for
/// `<dir>/YYYY-MM.batch.json`. A batch already present is used as is.
#[derive(Debug, Clone)]
pub struct ArchiveProvider {
    dir: PathBuf,
    poll: PollConfig,
}

impl ArchiveProvider {
    pub fn new(dir: impl Into<PathBuf>, poll: PollConfig) -> Self {
        Self {
            dir: dir.into(),
            poll,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn request_path(&self, month: &YearMonth) -> PathBuf {
        self.dir.join(format!("{}.request.json", month))
    }

    pub fn batch_path(&self, month: &YearMonth) -> PathBuf {
        self.dir.join(format!("{}.batch.json", month))
    }

    async fn try_read(path: &Path) -> Result<Option<RawBatch>> {
        match tokio::fs::read(path).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl GridProvider for ArchiveProvider {
    #[instrument(skip(self, request), fields(year = request.year, month = request.month))]
    async fn fetch(&self, request: &RetrievalRequest) -> Result<RawBatch> {
        let month = request.year_month()?;
        let batch_path = self.batch_path(&month);

        // A batch already in the archive is final; a broken one will not heal.
        match Self::try_read(&batch_path).await {
            Ok(Some(batch)) => {
                info!(path = %batch_path.display(), messages = batch.len(), "Using archived batch");
                return Ok(batch);
            }
            Ok(None) => {}
            Err(e) => {
                error!(path = %batch_path.display(), error = %e, "Archived batch unreadable");
                return Err(ResampleError::provider(
                    month,
                    format!("archived batch {} unreadable: {}", batch_path.display(), e),
                ));
            }
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ResampleError::provider(month, format!("cannot create {}: {}", self.dir.display(), e)))?;
        let request_path = self.request_path(&month);
        let body = serde_json::to_vec_pretty(request)?;
        tokio::fs::write(&request_path, body)
            .await
            .map_err(|e| ResampleError::provider(month, format!("cannot write {}: {}", request_path.display(), e)))?;

        info!(
            request = %request_path.display(),
            days = request.day.len(),
            hours = request.time.len(),
            "Retrieval requested, waiting for batch"
        );

        let started = Instant::now();
        let mut delay = self.poll.initial_interval;
        let mut last_error: Option<String> = None;

        loop {
            match Self::try_read(&batch_path).await {
                Ok(Some(batch)) => {
                    info!(
                        path = %batch_path.display(),
                        messages = batch.len(),
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Batch available"
                    );
                    return Ok(batch);
                }
                Ok(None) => debug!(path = %batch_path.display(), "Batch not ready"),
                Err(e) => {
                    // Possibly still being written.
                    warn!(path = %batch_path.display(), error = %e, "Batch unreadable, will retry");
                    last_error = Some(e.to_string());
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= self.poll.max_wait {
                let reason = match last_error {
                    Some(e) => format!("batch unreadable after {:?}: {}", elapsed, e),
                    None => format!("no batch at {} after {:?}", batch_path.display(), elapsed),
                };
                return Err(ResampleError::provider(month, reason));
            }

            tokio::time::sleep(delay.min(self.poll.max_wait - elapsed)).await;
            delay = std::cmp::min(delay * 2, self.poll.max_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResampleConfig;
    use crate::planner::plan;
    use ndarray::array;

    fn config(product: &str) -> ResampleConfig {
        let doc = format!(
            r#"{{"param": {{"product_type": "{}", "variable": ["Temperature"],
                "height_levels": [15, 100], "leadtime_hour": "24"}},
                "timestamp_location": {{"2024-06-03T12:00:00": [[65.0, -20.0]]}}}}"#,
            product
        );
        ResampleConfig::from_json(&doc).unwrap()
    }

    fn fast_poll(max_wait_ms: u64) -> PollConfig {
        PollConfig {
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(20),
            max_wait: Duration::from_millis(max_wait_ms),
        }
    }

    #[test]
    fn test_request_for_month() {
        let config = config("analysis");
        let batches = plan(&config.requests, config.product_type);
        let request = RetrievalRequest::for_month(&batches[0], &config, &RetrievalDefaults::default());

        assert_eq!(request.dataset, "reanalysis-carra-height-levels");
        assert_eq!((request.year, request.month), (2024, 6));
        assert_eq!(request.day, vec![3]);
        assert_eq!(request.time.first().map(String::as_str), Some("00:00"));
        assert_eq!(request.time.len(), 8);
        assert_eq!(request.leadtime_hour, None);

        let config = self::config("forecast");
        let batches = plan(&config.requests, config.product_type);
        let request = RetrievalRequest::for_month(&batches[0], &config, &RetrievalDefaults::default());
        assert_eq!(request.time, vec!["12:00".to_string()]);
        assert_eq!(request.leadtime_hour, Some(24));
    }

    #[tokio::test]
    async fn test_archive_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ArchiveProvider::new(dir.path(), fast_poll(50));
        let config = config("analysis");
        let batches = plan(&config.requests, config.product_type);
        let request = RetrievalRequest::for_month(&batches[0], &config, &RetrievalDefaults::default());

        let result = provider.fetch(&request).await;
        assert!(matches!(result, Err(ResampleError::ProviderFailure { .. })));

        // The request was left for the retrieval side.
        let month = YearMonth::new(2024, 6).unwrap();
        let written: RetrievalRequest =
            serde_json::from_slice(&std::fs::read(provider.request_path(&month)).unwrap()).unwrap();
        assert_eq!(written, request);
    }

    #[tokio::test]
    async fn test_archive_uses_existing_batch() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ArchiveProvider::new(dir.path(), fast_poll(0));
        let month = YearMonth::new(2024, 6).unwrap();
        let batch = RawBatch::new(array![[64.0, 64.0], [65.0, 65.0]], array![[340.0, 341.0], [340.0, 341.0]]);
        batch.write_json(&provider.batch_path(&month)).unwrap();

        let config = config("analysis");
        let batches = plan(&config.requests, config.product_type);
        let request = RetrievalRequest::for_month(&batches[0], &config, &RetrievalDefaults::default());
        let fetched = provider.fetch(&request).await.unwrap();
        assert_eq!(fetched.latitudes, batch.latitudes);
        assert!(!provider.request_path(&month).exists());
    }

    #[tokio::test]
    async fn test_archive_fails_fast_on_broken_batch() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ArchiveProvider::new(dir.path(), fast_poll(60_000));
        let month = YearMonth::new(2024, 6).unwrap();
        std::fs::write(provider.batch_path(&month), b"{not json").unwrap();

        let config = config("analysis");
        let batches = plan(&config.requests, config.product_type);
        let request = RetrievalRequest::for_month(&batches[0], &config, &RetrievalDefaults::default());

        let started = std::time::Instant::now();
        let result = provider.fetch(&request).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        match result {
            Err(ResampleError::ProviderFailure { month: m, reason }) => {
                assert_eq!(m, month);
                assert!(reason.contains("unreadable"), "{}", reason);
            }
            other => panic!("expected provider failure, got {:?}", other.map(|b| b.len())),
        }
        assert!(!provider.request_path(&month).exists());
    }
}
