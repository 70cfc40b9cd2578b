//! Parameter document and run options.
//!
//! The parameter document is the JSON produced by the station-preparation
//! step:
//!
//! ```json
//! {
//!   "param": {
//!     "product_type": "analysis",
//!     "variable": ["Wind speed", "Temperature"],
//!     "height_levels": [15, 100],
//!     "leadtime_hour": "24",
//!     "feather_file": "all.feather"
//!   },
//!   "timestamp_location": {
//!     "2024-06-01T06:00:00": [[65.0, -20.0]]
//!   }
//! }
//! ```
//!
//! It is validated once at load time so a bad document fails before any
//! retrieval is attempted.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::error::{ResampleError, Result};
use crate::table::RESERVED_COLUMNS;
use crate::time::{parse_timestamp, FORECAST_ISSUE_HOUR};

/// Default lead time for forecast retrievals, in hours.
pub const DEFAULT_LEADTIME_HOUR: u32 = 24;

/// Whether retrieved fields are analyses or daily forecasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Analysis,
    Forecast,
}

impl ProductType {
    /// Hours of day retrieved for each requested day.
    pub fn hours(&self) -> Vec<u32> {
        match self {
            Self::Forecast => vec![FORECAST_ISSUE_HOUR],
            Self::Analysis => vec![0, 3, 6, 9, 12, 15, 18, 21],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Forecast => "forecast",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A station coordinate, written `[lat, lon]` in the document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=360.0).contains(&self.lon)
    }
}

impl From<[f64; 2]> for Location {
    fn from([lat, lon]: [f64; 2]) -> Self {
        Self { lat, lon }
    }
}

impl From<Location> for [f64; 2] {
    fn from(loc: Location) -> Self {
        [loc.lat, loc.lon]
    }
}

/// One request-index entry: a timestamp and the locations wanted at it.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// The key exactly as written in the document; copied into output rows
    pub key: String,
    pub time: NaiveDateTime,
    pub locations: Vec<Location>,
}

/// Timestamp -> ordered locations, parsed and sorted by time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestIndex {
    requests: Vec<Request>,
}

impl RequestIndex {
    /// Parse raw keys. Locations keep their document order.
    pub fn from_raw(raw: BTreeMap<String, Vec<Location>>) -> Result<Self> {
        let mut requests = raw
            .into_iter()
            .map(|(key, locations)| {
                let time = parse_timestamp(&key)?;
                Ok(Request {
                    key,
                    time,
                    locations,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        requests.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.key.cmp(&b.key)));
        Ok(Self { requests })
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Total number of (timestamp, location) pairs.
    pub fn location_count(&self) -> usize {
        self.requests.iter().map(|r| r.locations.len()).sum()
    }
}

#[derive(Debug, Deserialize)]
struct RawParams {
    #[serde(rename = "variable")]
    variables: Vec<String>,
    #[serde(deserialize_with = "flatten_levels")]
    height_levels: Vec<u32>,
    product_type: ProductType,
    #[serde(default, deserialize_with = "lenient_hour")]
    leadtime_hour: Option<u32>,
    #[serde(default, alias = "feather_file")]
    output: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    param: RawParams,
    #[serde(alias = "date_location")]
    timestamp_location: BTreeMap<String, Vec<Location>>,
}

/// Accept `[15, 100]` as well as the accidentally nested `[[15, 100]]`.
fn flatten_levels<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u32>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Level {
        One(u32),
        Many(Vec<u32>),
    }

    let raw = Vec::<Level>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .flat_map(|l| match l {
            Level::One(v) => vec![v],
            Level::Many(vs) => vs,
        })
        .collect())
}

/// Accept `"24"` or `24`.
fn lenient_hour<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u32>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Hour {
        Num(u32),
        Text(String),
    }

    match Option::<Hour>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Hour::Num(h)) => Ok(Some(h)),
        Some(Hour::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid leadtime_hour '{}'", s))),
    }
}

/// Validated parameter document.
#[derive(Debug, Clone)]
pub struct ResampleConfig {
    pub variables: Vec<String>,
    pub height_levels: Vec<u32>,
    pub product_type: ProductType,
    pub leadtime_hour: u32,
    /// Output identifier from the document, if any
    pub output: Option<String>,
    pub requests: RequestIndex,
}

impl ResampleConfig {
    /// Load and validate a parameter document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ResampleError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&content)?;
        debug!(
            path = %path.display(),
            variables = config.variables.len(),
            height_levels = config.height_levels.len(),
            timestamps = config.requests.len(),
            "Loaded parameter document"
        );
        Ok(config)
    }

    /// Parse and validate a parameter document.
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: RawDocument = serde_json::from_str(content)
            .map_err(|e| ResampleError::config(format!("malformed parameter document: {}", e)))?;

        let requests = RequestIndex::from_raw(raw.timestamp_location)
            .map_err(|e| ResampleError::config(e.to_string()))?;

        let config = Self {
            variables: raw.param.variables,
            height_levels: raw.param.height_levels,
            product_type: raw.param.product_type,
            leadtime_hour: raw.param.leadtime_hour.unwrap_or(DEFAULT_LEADTIME_HOUR),
            output: raw.param.output,
            requests,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the resampler relies on.
    pub fn validate(&self) -> Result<()> {
        if self.variables.is_empty() {
            return Err(ResampleError::config("variable list is empty"));
        }
        if self.height_levels.is_empty() {
            return Err(ResampleError::config("height_levels list is empty"));
        }
        if let Some(reserved) = self
            .variables
            .iter()
            .find(|v| RESERVED_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(v)))
        {
            return Err(ResampleError::config(format!(
                "variable '{}' clashes with a result table column",
                reserved
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.variables.iter().find(|v| !seen.insert(v.as_str())) {
            return Err(ResampleError::config(format!("duplicate variable '{}'", dup)));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.height_levels.iter().find(|l| !seen.insert(**l)) {
            return Err(ResampleError::config(format!("duplicate height level {}", dup)));
        }
        if self.requests.is_empty() {
            return Err(ResampleError::config("timestamp_location is empty"));
        }
        for request in self.requests.requests() {
            if let Some(bad) = request.locations.iter().find(|l| !l.is_valid()) {
                return Err(ResampleError::config(format!(
                    "invalid location [{}, {}] at {}",
                    bad.lat, bad.lon, request.key
                )));
            }
        }
        Ok(())
    }
}

/// What to do with rows built on an indexing gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapPolicy {
    /// Keep the row; the gap is only reported
    #[default]
    Keep,
    /// Drop rows whose height level touches a gap
    Drop,
    /// Abort the run
    Fail,
}

impl FromStr for GapPolicy {
    type Err = ResampleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "drop" => Ok(Self::Drop),
            "fail" => Ok(Self::Fail),
            other => Err(ResampleError::config(format!("unknown gap policy '{}'", other))),
        }
    }
}

/// Fixed retrieval constants passed through to the grid provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalDefaults {
    pub dataset: String,
    pub domain: String,
    /// Grid spacing `[dlat, dlon]` in degrees
    pub grid: [f64; 2],
    /// Area `[north, west, south, east]`
    pub area: [f64; 4],
    pub format: String,
}

impl Default for RetrievalDefaults {
    fn default() -> Self {
        Self {
            dataset: "reanalysis-carra-height-levels".to_string(),
            domain: "west_domain".to_string(),
            grid: [0.04180602, 0.01826484],
            area: [66.6, -24.6, 63.3, -13.4],
            format: "grib".to_string(),
        }
    }
}

/// Options controlling a resampling run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub gap_policy: GapPolicy,
    /// Save the table after every month instead of once at the end
    pub checkpoint_months: bool,
    /// Treat a coverage mismatch on resume as an error
    pub strict_resume: bool,
    pub retrieval: RetrievalDefaults,
}
