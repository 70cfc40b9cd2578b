//! End-to-end resampling runs against synthetic batches.
//!
//! Every run goes through the real planner, indexer, interpolators and
//! result table; only the grid provider and the table store are in memory.

use grid_resampler::{
    GapPolicy, MemoryTableStore, ResampleConfig, ResampleError, Resampler, RunOptions, YearMonth,
};
use test_utils::{
    assert_approx_eq, clock_field, grid, params, plane_field, stations, variables, RecordingProvider,
    Sample,
};

fn resampler(
    doc: &str,
    provider: RecordingProvider,
    options: RunOptions,
) -> Resampler<RecordingProvider, MemoryTableStore> {
    let config = ResampleConfig::from_json(doc).unwrap();
    Resampler::new(config, options, provider, MemoryTableStore::new())
}

fn temperature_at(key: &str, location: (f64, f64)) -> String {
    params::document("analysis", &[variables::TEMPERATURE], &[100], &[(key, &[location])])
}

fn ym(s: &str) -> YearMonth {
    s.parse().unwrap()
}

// ============================================================================
// Temporal resolution
// ============================================================================

#[tokio::test]
async fn test_exact_timestamp_single_row() {
    let provider = RecordingProvider::new(grid::ICELAND_COARSE, clock_field(270.0));
    let resampler = resampler(&params::single_analysis(), provider, RunOptions::default());

    let outcome = resampler.run().await.unwrap();
    assert_eq!(outcome.table.len(), 1);
    assert_eq!(outcome.table.variables(), &["Temperature".to_string()]);

    let row = &outcome.table.rows()[0];
    assert_eq!(row.time, "2024-06-01T06:00:00");
    assert_eq!(row.year_month, ym("2024-06"));
    assert_eq!((row.lat, row.lon), stations::CENTRAL);
    assert_eq!(row.height_level, 100);
    // Uniform field: day 1 * 24 + hour 6.
    assert_approx_eq!(row.values[0], 300.0, 1e-3);

    let requests = resampler.provider().requests();
    assert_eq!(requests.len(), 1);
    assert_eq!((requests[0].year, requests[0].month), (2024, 6));
    assert_eq!(requests[0].day, vec![1]);
    assert_eq!(requests[0].time.len(), 8);
    assert_eq!(requests[0].leadtime_hour, None);
}

#[tokio::test]
async fn test_mid_cadence_timestamp_blends() {
    let provider = RecordingProvider::new(grid::ICELAND_COARSE, clock_field(270.0));
    let resampler = resampler(
        &temperature_at("2024-06-01T07:30:00", stations::CENTRAL),
        provider,
        RunOptions::default(),
    );

    let outcome = resampler.run().await.unwrap();
    // Halfway between 06:00 (300) and 09:00 (303).
    assert_approx_eq!(outcome.table.rows()[0].values[0], 301.5, 1e-3);
}

#[tokio::test]
async fn test_late_hour_blends_into_next_day() {
    let provider = RecordingProvider::new(grid::ICELAND_COARSE, clock_field(270.0));
    let resampler = resampler(
        &temperature_at("2024-01-14T22:00:00", stations::CENTRAL),
        provider,
        RunOptions::default(),
    );

    let outcome = resampler.run().await.unwrap();
    // 21:00 on the 14th is 627, 00:00 on the 15th is 630, w = 2/3.
    assert_approx_eq!(outcome.table.rows()[0].values[0], 628.0, 1e-3);
    assert_eq!(resampler.provider().requests()[0].day, vec![14, 15]);
}

#[tokio::test]
async fn test_cross_month_uses_bracket0() {
    let provider = RecordingProvider::new(grid::ICELAND_COARSE, clock_field(270.0));
    let resampler = resampler(
        &temperature_at("2024-01-31T23:00:00", stations::CENTRAL),
        provider,
        RunOptions::default(),
    );

    let outcome = resampler.run().await.unwrap();
    // 21:00 on the 31st, no blend with February.
    assert_approx_eq!(outcome.table.rows()[0].values[0], 270.0 + 31.0 * 24.0 + 21.0, 1e-3);

    assert_eq!(outcome.report.months_planned, 2);
    assert_eq!(outcome.report.months_processed, 1);
    assert_eq!(outcome.report.months_empty, 1);
    // February is planned but never fetched.
    assert_eq!(resampler.provider().calls(), 1);
}

#[tokio::test]
async fn test_forecast_resolves_daily_issuance() {
    let doc = params::document(
        "forecast",
        &[variables::TEMPERATURE],
        &[100],
        &[("2024-06-03T18:00:00", &[stations::CENTRAL])],
    );
    let provider = RecordingProvider::new(grid::ICELAND_COARSE, clock_field(270.0));
    let resampler = resampler(&doc, provider, RunOptions::default());

    let outcome = resampler.run().await.unwrap();
    assert_approx_eq!(outcome.table.rows()[0].values[0], 270.0 + 72.0 + 12.0, 1e-3);

    let request = &resampler.provider().requests()[0];
    assert_eq!(request.time, vec!["12:00".to_string()]);
    assert_eq!(request.leadtime_hour, Some(24));
}

// ============================================================================
// Spatial resolution and row layout
// ============================================================================

#[tokio::test]
async fn test_station_on_grid_cell_takes_cell_value() {
    let provider = RecordingProvider::new(grid::ICELAND_COARSE, plane_field(10.0, 1.0, 2.0));
    let resampler = resampler(
        &temperature_at("2024-06-01T06:00:00", stations::ON_CELL),
        provider,
        RunOptions::default(),
    );

    let outcome = resampler.run().await.unwrap();
    let (lat, lon) = stations::ON_CELL;
    assert_approx_eq!(outcome.table.rows()[0].values[0], 10.0 + lat + 2.0 * lon, 0.01);
}

#[tokio::test]
async fn test_interpolated_value_within_neighbour_range() {
    let provider = RecordingProvider::new(grid::ICELAND_COARSE, plane_field(0.0, 1.0, 0.0));
    let (lat, lon) = stations::REYKJAVIK;
    let resampler = resampler(
        &temperature_at("2024-06-01T06:00:00", (lat, lon)),
        provider,
        RunOptions::default(),
    );

    let outcome = resampler.run().await.unwrap();
    let value = outcome.table.rows()[0].values[0];
    // Neighbouring rows lie within one grid step of the station.
    assert!((value - lat).abs() <= grid::ICELAND_COARSE.dlat, "value {} vs lat {}", value, lat);
}

#[tokio::test]
async fn test_rows_follow_location_then_level_order() {
    let doc = params::document(
        "analysis",
        &variables::ALL,
        &variables::HEIGHT_LEVELS,
        &[("2024-06-01T12:00:00", &[stations::REYKJAVIK, stations::SELFOSS])],
    );
    let field = |s: &Sample<'_>| {
        let base = match s.variable {
            "Wind speed" => 0.0,
            "Wind direction" => 1000.0,
            "Pressure" => 2000.0,
            _ => 3000.0,
        };
        base + s.level as f64
    };
    let provider = RecordingProvider::new(grid::ICELAND_COARSE, field);
    let resampler = resampler(&doc, provider, RunOptions::default());

    let outcome = resampler.run().await.unwrap();
    let rows = outcome.table.rows();
    assert_eq!(rows.len(), 2 * 4);

    for (i, row) in rows.iter().enumerate() {
        let station = if i < 4 { stations::REYKJAVIK } else { stations::SELFOSS };
        assert_eq!((row.lat, row.lon), station);
        assert_eq!(row.height_level, variables::HEIGHT_LEVELS[i % 4]);

        let level = row.height_level as f64;
        assert_approx_eq!(row.values[0], level, 1e-3);
        assert_approx_eq!(row.values[1], 1000.0 + level, 1e-3);
        assert_approx_eq!(row.values[2], 2000.0 + level, 1e-3);
        assert_approx_eq!(row.values[3], 3000.0 + level, 1e-3);
    }

    let temperature = outcome.table.column("Temperature").unwrap();
    assert_approx_eq!(temperature[0], 3015.0, 1e-3);
}

#[tokio::test]
async fn test_months_processed_in_order() {
    let doc = params::document(
        "analysis",
        &[variables::TEMPERATURE],
        &[100],
        &[
            ("2024-07-02T03:00:00", &[stations::CENTRAL]),
            ("2024-05-20T06:00:00", &[stations::CENTRAL]),
        ],
    );
    let provider = RecordingProvider::new(grid::ICELAND_COARSE, clock_field(0.0));
    let resampler = resampler(&doc, provider, RunOptions::default());

    let outcome = resampler.run().await.unwrap();
    let months: Vec<YearMonth> = outcome.table.rows().iter().map(|r| r.year_month).collect();
    assert_eq!(months, vec![ym("2024-05"), ym("2024-07")]);

    let fetched: Vec<u32> = resampler.provider().requests().iter().map(|r| r.month).collect();
    assert_eq!(fetched, vec![5, 7]);
}

// ============================================================================
// Indexing gaps
// ============================================================================

fn gappy_provider() -> RecordingProvider {
    RecordingProvider::new(grid::ICELAND_COARSE, clock_field(270.0)).omit("Temperature", 100, 1, 6)
}

#[tokio::test]
async fn test_gap_kept_and_reported() {
    let resampler = resampler(&params::single_analysis(), gappy_provider(), RunOptions::default());

    let outcome = resampler.run().await.unwrap();
    assert_eq!(outcome.table.len(), 1);
    // The gap reads as zero.
    assert_eq!(outcome.table.rows()[0].values[0], 0.0);
    assert_eq!(outcome.report.gaps_per_month.get(&ym("2024-06")), Some(&1));
    assert_eq!(outcome.report.total_gaps(), 1);
}

#[tokio::test]
async fn test_gap_dropped() {
    let options = RunOptions {
        gap_policy: GapPolicy::Drop,
        ..Default::default()
    };
    let resampler = resampler(&params::single_analysis(), gappy_provider(), options);

    let outcome = resampler.run().await.unwrap();
    assert!(outcome.table.is_empty());
    assert_eq!(outcome.report.rows_dropped, 1);
    // The month is still recorded as done.
    let coverage = outcome.table.coverage(&ym("2024-06")).unwrap();
    assert_eq!(coverage.expected_locations, 1);
    assert_eq!(coverage.rows, 0);
}

#[tokio::test]
async fn test_gap_fails_run() {
    let options = RunOptions {
        gap_policy: GapPolicy::Fail,
        ..Default::default()
    };
    let resampler = resampler(&params::single_analysis(), gappy_provider(), options);

    let result = resampler.run().await;
    assert!(matches!(
        result,
        Err(ResampleError::IndexingGap { count: 1, .. })
    ));
    assert!(resampler.store().snapshot().await.is_none());
}

#[tokio::test]
async fn test_unrelated_gap_does_not_touch_rows() {
    // 09:00 is missing but an exact 06:00 request never reads it.
    let provider =
        RecordingProvider::new(grid::ICELAND_COARSE, clock_field(270.0)).omit("Temperature", 100, 1, 9);
    let options = RunOptions {
        gap_policy: GapPolicy::Drop,
        ..Default::default()
    };
    let resampler = resampler(&params::single_analysis(), provider, options);

    let outcome = resampler.run().await.unwrap();
    assert_eq!(outcome.table.len(), 1);
    assert_eq!(outcome.report.total_gaps(), 1);
    assert_approx_eq!(outcome.table.rows()[0].values[0], 300.0, 1e-3);
}
