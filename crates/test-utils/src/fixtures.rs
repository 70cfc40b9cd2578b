//! Common test fixtures for grid-resampler tests.
//!
//! This module provides pre-defined grids, stations and parameter documents
//! for the scenarios the resampler is exercised with.

/// Grid specifications for synthetic batches.
pub mod grid {
    /// Coarse grid over south-west Iceland (0.5 degree, 8 x 12).
    ///
    /// Longitudes are written in the 0..360 convention, as raw messages carry them.
    pub const ICELAND_COARSE: GridSpec = GridSpec {
        nlat: 8,
        nlon: 12,
        south: 62.9,
        west: 334.8,
        dlat: 0.5,
        dlon: 0.5,
    };

    /// Smallest grid the neighbour search accepts.
    pub const TINY_2X2: GridSpec = GridSpec {
        nlat: 2,
        nlon: 2,
        south: 64.0,
        west: 339.0,
        dlat: 1.0,
        dlon: 1.0,
    };

    /// A regular raw grid; row 0 is the southernmost row, as in raw messages.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct GridSpec {
        pub nlat: usize,
        pub nlon: usize,
        pub south: f64,
        pub west: f64,
        pub dlat: f64,
        pub dlon: f64,
    }

    impl GridSpec {
        pub fn shape(&self) -> (usize, usize) {
            (self.nlat, self.nlon)
        }

        pub fn north(&self) -> f64 {
            self.south + self.dlat * (self.nlat - 1) as f64
        }

        /// Raw latitude of row `row`.
        pub fn lat(&self, row: usize) -> f64 {
            self.south + self.dlat * row as f64
        }

        /// Raw (0..360) longitude of column `col`.
        pub fn lon(&self, col: usize) -> f64 {
            self.west + self.dlon * col as f64
        }
    }
}

/// Station coordinates as `(lat, lon)`.
pub mod stations {
    /// Inside the coarse grid, off any cell centre.
    pub const CENTRAL: (f64, f64) = (65.0, -20.0);

    pub const REYKJAVIK: (f64, f64) = (64.13, -21.9);

    pub const SELFOSS: (f64, f64) = (63.93, -21.0);

    /// On a coarse grid cell (row 3, column 10).
    pub const ON_CELL: (f64, f64) = (64.4, -20.2);
}

/// Variable and level sets.
pub mod variables {
    pub const TEMPERATURE: &str = "Temperature";
    pub const WIND_SPEED: &str = "Wind speed";
    pub const WIND_DIRECTION: &str = "Wind direction";
    pub const PRESSURE: &str = "Pressure";

    pub const ALL: [&str; 4] = [WIND_SPEED, WIND_DIRECTION, PRESSURE, TEMPERATURE];

    pub const HEIGHT_LEVELS: [u32; 4] = [15, 100, 250, 500];
}

/// Parameter documents.
pub mod params {
    use serde_json::{json, Map, Value};

    /// Build a parameter document.
    ///
    /// `requests` pairs each timestamp key with its `(lat, lon)` list.
    pub fn document(
        product_type: &str,
        variables: &[&str],
        height_levels: &[u32],
        requests: &[(&str, &[(f64, f64)])],
    ) -> String {
        let mut index = Map::new();
        for (key, locations) in requests {
            let locations: Vec<Value> = locations.iter().map(|(lat, lon)| json!([lat, lon])).collect();
            index.insert(key.to_string(), Value::Array(locations));
        }

        json!({
            "param": {
                "product_type": product_type,
                "variable": variables,
                "height_levels": height_levels,
                "leadtime_hour": "24",
                "feather_file": "all.feather",
            },
            "timestamp_location": index,
        })
        .to_string()
    }

    /// One analysis request: Temperature at 100 m, 2024-06-01 06:00, at (65.0, -20.0).
    pub fn single_analysis() -> String {
        document(
            "analysis",
            &[super::variables::TEMPERATURE],
            &[100],
            &[("2024-06-01T06:00:00", &[super::stations::CENTRAL])],
        )
    }
}
