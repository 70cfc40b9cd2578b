//! Synthetic raw grid batches.
//!
//! Batches are laid out exactly as a provider delivers them: coordinate rows
//! run south to north and longitudes use the 0..360 convention, so every test
//! that goes through the indexer also exercises the row flip and the
//! longitude shift.

use std::collections::HashSet;
use std::sync::Arc;

use grid_resampler::{FieldMessage, RawBatch, YearMonth};
use ndarray::Array2;

use crate::fixtures::grid::GridSpec;

/// Where a generated value is sampled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<'a> {
    pub variable: &'a str,
    pub level: u32,
    pub day: u32,
    pub hour: u32,
    /// Raw latitude of the cell
    pub lat: f64,
    /// Longitude of the cell, normalized to [-180, 180)
    pub lon: f64,
}

/// A shareable value generator.
pub type FieldFn = Arc<dyn Fn(&Sample<'_>) -> f64 + Send + Sync>;

/// Raw `(latitudes, longitudes)` arrays for a spec.
pub fn raw_coordinates(spec: &GridSpec) -> (Array2<f64>, Array2<f64>) {
    let lat = Array2::from_shape_fn(spec.shape(), |(r, _)| spec.lat(r));
    let lon = Array2::from_shape_fn(spec.shape(), |(_, c)| spec.lon(c));
    (lat, lon)
}

/// Builds a [`RawBatch`] covering `variables x levels x days x hours`.
///
/// # Example
///
/// ```
/// use test_utils::{grid, BatchBuilder};
///
/// let batch = BatchBuilder::new(grid::ICELAND_COARSE)
///     .variables(&["Temperature"])
///     .levels(&[100])
///     .days(&[1])
///     .hours(&[0, 3])
///     .field(|s| 270.0 + s.hour as f64)
///     .build();
/// assert_eq!(batch.len(), 2);
/// ```
pub struct BatchBuilder {
    spec: GridSpec,
    variables: Vec<String>,
    levels: Vec<u32>,
    days: Vec<u32>,
    hours: Vec<u32>,
    field: FieldFn,
    skipped: HashSet<(String, u32, u32, u32)>,
}

impl BatchBuilder {
    pub fn new(spec: GridSpec) -> Self {
        Self {
            spec,
            variables: Vec::new(),
            levels: Vec::new(),
            days: Vec::new(),
            hours: Vec::new(),
            field: Arc::new(|_: &Sample<'_>| 0.0f64),
            skipped: HashSet::new(),
        }
    }

    pub fn variables(mut self, variables: &[&str]) -> Self {
        self.variables = variables.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn levels(mut self, levels: &[u32]) -> Self {
        self.levels = levels.to_vec();
        self
    }

    pub fn days(mut self, days: &[u32]) -> Self {
        self.days = days.to_vec();
        self
    }

    /// Every day of `month`.
    pub fn whole_month(mut self, month: YearMonth) -> Self {
        self.days = (1..=month.days_in_month()).collect();
        self
    }

    pub fn hours(mut self, hours: &[u32]) -> Self {
        self.hours = hours.to_vec();
        self
    }

    /// Value generator, called once per cell.
    pub fn field(mut self, f: impl Fn(&Sample<'_>) -> f64 + Send + Sync + 'static) -> Self {
        self.field = Arc::new(f);
        self
    }

    /// Use an already shared generator.
    pub fn shared_field(mut self, f: FieldFn) -> Self {
        self.field = f;
        self
    }

    /// Leave one message out of the batch.
    pub fn skip(mut self, variable: &str, level: u32, day: u32, hour: u32) -> Self {
        self.skipped.insert((variable.to_string(), level, day, hour));
        self
    }

    pub fn build(&self) -> RawBatch {
        let (lat, lon) = raw_coordinates(&self.spec);
        let mut batch = RawBatch::new(lat.clone(), lon.clone());

        for &day in &self.days {
            for &hour in &self.hours {
                for variable in &self.variables {
                    for &level in &self.levels {
                        if self.skipped.contains(&(variable.clone(), level, day, hour)) {
                            continue;
                        }
                        let values = Array2::from_shape_fn(self.spec.shape(), |(r, c)| {
                            let raw_lon = lon[[r, c]];
                            (self.field)(&Sample {
                                variable,
                                level,
                                day,
                                hour,
                                lat: lat[[r, c]],
                                lon: if raw_lon >= 180.0 { raw_lon - 360.0 } else { raw_lon },
                            })
                        });
                        batch.push(FieldMessage {
                            name: variable.clone(),
                            day,
                            hour,
                            level,
                            values,
                        });
                    }
                }
            }
        }
        batch
    }
}

/// A field that depends only on time: `base + day * 24 + hour`.
pub fn clock_field(base: f64) -> impl Fn(&Sample<'_>) -> f64 + Send + Sync + 'static {
    move |s: &Sample<'_>| base + (s.day * 24 + s.hour) as f64
}

/// A field linear in latitude and longitude, constant in time.
pub fn plane_field(a: f64, b: f64, c: f64) -> impl Fn(&Sample<'_>) -> f64 + Send + Sync + 'static {
    move |s: &Sample<'_>| a + b * s.lat + c * s.lon
}
