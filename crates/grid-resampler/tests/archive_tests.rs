//! File-exchange provider: request documents, batch polling and timeouts.

use std::time::Duration;

use grid_resampler::{
    ArchiveProvider, GridProvider, PollConfig, RawBatch, ResampleConfig, ResampleError, Resampler,
    RetrievalRequest, RunOptions, SqliteTableStore, YearMonth,
};
use test_utils::{assert_approx_eq, clock_field, grid, params, scratch_dir, BatchBuilder};

fn poll(max_wait: Duration) -> PollConfig {
    PollConfig {
        initial_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(50),
        max_wait,
    }
}

fn june() -> YearMonth {
    YearMonth::new(2024, 6).unwrap()
}

/// What the retrieval side would deliver for a request.
fn deliver(request: &RetrievalRequest) -> RawBatch {
    let hours: Vec<u32> = request
        .time
        .iter()
        .map(|t| t[..2].parse().unwrap())
        .collect();
    let variables: Vec<&str> = request.variable.iter().map(String::as_str).collect();
    BatchBuilder::new(grid::ICELAND_COARSE)
        .variables(&variables)
        .levels(&request.height_level)
        .days(&request.day)
        .hours(&hours)
        .field(clock_field(270.0))
        .build()
}

#[tokio::test]
async fn test_waits_for_batch_written_later() {
    let archive = scratch_dir();
    let provider = ArchiveProvider::new(archive.path(), poll(Duration::from_secs(10)));
    let request_path = provider.request_path(&june());
    let batch_path = provider.batch_path(&june());

    // Plays the retrieval agent: picks up the request, then drops the batch.
    let agent = tokio::spawn(async move {
        loop {
            if let Ok(content) = tokio::fs::read(&request_path).await {
                if let Ok(request) = serde_json::from_slice::<RetrievalRequest>(&content) {
                    let staging = batch_path.with_extension("partial");
                    deliver(&request).write_json(&staging).unwrap();
                    tokio::fs::rename(&staging, &batch_path).await.unwrap();
                    return request;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let config = ResampleConfig::from_json(&params::single_analysis()).unwrap();
    let table_path = archive.path().join("results.db");
    let store = SqliteTableStore::open(&table_path, &config.variables).await.unwrap();
    let outcome = Resampler::new(config, RunOptions::default(), provider, store)
        .run()
        .await
        .unwrap();

    let seen = agent.await.unwrap();
    assert_eq!(seen.dataset, "reanalysis-carra-height-levels");
    assert_eq!(seen.domain, "west_domain");
    assert_eq!(seen.area, [66.6, -24.6, 63.3, -13.4]);
    assert_eq!(seen.format, "grib");
    assert_eq!(seen.day, vec![1]);

    assert_eq!(outcome.table.len(), 1);
    assert_approx_eq!(outcome.table.rows()[0].values[0], 300.0, 1e-3);
}

#[tokio::test]
async fn test_archived_batch_used_without_request() {
    let archive = scratch_dir();
    let provider = ArchiveProvider::new(archive.path(), poll(Duration::from_millis(0)));

    let config = ResampleConfig::from_json(&params::single_analysis()).unwrap();
    let batches = grid_resampler::plan(&config.requests, config.product_type);
    let request = RetrievalRequest::for_month(&batches[0], &config, &RunOptions::default().retrieval);
    deliver(&request).write_json(&provider.batch_path(&june())).unwrap();

    let batch = provider.fetch(&request).await.unwrap();
    assert_eq!(batch.len(), 8);
    assert!(!provider.request_path(&june()).exists());
}

#[tokio::test]
async fn test_missing_batch_times_out() {
    let archive = scratch_dir();
    let provider = ArchiveProvider::new(archive.path().join("pending"), poll(Duration::from_millis(80)));

    let config = ResampleConfig::from_json(&params::single_analysis()).unwrap();
    let resampler = Resampler::new(
        config,
        RunOptions::default(),
        provider,
        grid_resampler::MemoryTableStore::new(),
    );

    let result = resampler.run().await;
    assert!(matches!(result, Err(ResampleError::ProviderFailure { month, .. }) if month == june()));
    // The request is left for the retrieval side to pick up.
    assert!(resampler.provider().request_path(&june()).exists());
}
