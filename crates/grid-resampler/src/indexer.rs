//! Grid indexer: turns a raw batch into a per-(day, hour, variable) tensor.
//!
//! Every `(day, hour, variable)` in the requested Cartesian product gets a
//! zero-filled `(height_level, lat, lon)` slot up front. Messages are then
//! matched by equality on their own day, hour, name and level fields and
//! written, row-flipped, into the matching height-level slice.
//!
//! Slices that never receive a message stay zero. Each slot carries a
//! coverage mask so such gaps can be told apart from genuine zero values.

use std::collections::HashMap;

use ndarray::{Array3, ArrayView2};
use tracing::debug;

use crate::batch::RawBatch;
use crate::error::{ResampleError, Result};
use crate::grid::{flip_rows, CoordinateGrid};

/// Key of one tensor slot. `variable` indexes [`FieldTensor::variables`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub day: u32,
    pub hour: u32,
    pub variable: usize,
}

/// One `(height_level, lat, lon)` array plus its coverage mask.
#[derive(Debug, Clone)]
pub struct Slot {
    values: Array3<f64>,
    covered: Vec<bool>,
}

impl Slot {
    fn zeros(levels: usize, shape: (usize, usize)) -> Self {
        Self {
            values: Array3::zeros((levels, shape.0, shape.1)),
            covered: vec![false; levels],
        }
    }

    pub fn values(&self) -> &Array3<f64> {
        &self.values
    }

    /// Value at `(level, row, col)`.
    #[inline]
    pub fn value(&self, level: usize, row: usize, col: usize) -> f64 {
        self.values[[level, row, col]]
    }

    /// Whether a message was written into height-level slice `level`.
    pub fn is_covered(&self, level: usize) -> bool {
        self.covered.get(level).copied().unwrap_or(false)
    }
}

/// A requested slice that no message filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingGap {
    pub day: u32,
    pub hour: u32,
    pub variable: String,
    pub height_level: u32,
}

/// Indexed fields for one month batch.
#[derive(Debug, Clone)]
pub struct FieldTensor {
    variables: Vec<String>,
    height_levels: Vec<u32>,
    days: Vec<u32>,
    hours: Vec<u32>,
    shape: (usize, usize),
    slots: HashMap<SlotKey, Slot>,
}

impl FieldTensor {
    /// Allocate zero slots for every `days x hours x variables` combination.
    pub fn zeros(
        variables: &[String],
        height_levels: &[u32],
        days: &[u32],
        hours: &[u32],
        shape: (usize, usize),
    ) -> Self {
        let mut slots = HashMap::with_capacity(days.len() * hours.len() * variables.len());
        for &day in days {
            for &hour in hours {
                for variable in 0..variables.len() {
                    slots.insert(
                        SlotKey { day, hour, variable },
                        Slot::zeros(height_levels.len(), shape),
                    );
                }
            }
        }

        Self {
            variables: variables.to_vec(),
            height_levels: height_levels.to_vec(),
            days: days.to_vec(),
            hours: hours.to_vec(),
            shape,
            slots,
        }
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn height_levels(&self) -> &[u32] {
        &self.height_levels
    }

    pub fn days(&self) -> &[u32] {
        &self.days
    }

    pub fn hours(&self) -> &[u32] {
        &self.hours
    }

    /// Grid shape `(nlat, nlon)` of every slice.
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v == name)
    }

    pub fn level_index(&self, level: u32) -> Option<usize> {
        self.height_levels.iter().position(|&l| l == level)
    }

    pub fn slot(&self, day: u32, hour: u32, variable: usize) -> Option<&Slot> {
        self.slots.get(&SlotKey { day, hour, variable })
    }

    /// Whether a snapshot `(day, hour)` was allocated at all.
    pub fn has_snapshot(&self, day: u32, hour: u32) -> bool {
        self.days.contains(&day) && self.hours.contains(&hour)
    }

    /// Write a message's raw values into a slice, flipping rows to grid orientation.
    pub fn write(
        &mut self,
        key: SlotKey,
        level: usize,
        raw: ArrayView2<'_, f64>,
    ) -> Result<bool> {
        // Messages outside the requested slots are ignored whatever their shape.
        let allocated = self
            .slots
            .get(&key)
            .is_some_and(|slot| level < slot.covered.len());
        if !allocated {
            return Ok(false);
        }
        if raw.dim() != self.shape {
            return Err(ResampleError::ShapeMismatch {
                expected: self.shape,
                actual: raw.dim(),
                context: format!(
                    "{} day {} hour {:02}",
                    self.variables.get(key.variable).map(String::as_str).unwrap_or("?"),
                    key.day,
                    key.hour
                ),
            });
        }
        let Some(slot) = self.slots.get_mut(&key) else {
            return Ok(false);
        };

        slot.values
            .index_axis_mut(ndarray::Axis(0), level)
            .assign(&flip_rows(raw));
        slot.covered[level] = true;
        Ok(true)
    }

    /// All requested slices without a message, ordered by day, hour, variable, level.
    pub fn gaps(&self) -> Vec<IndexingGap> {
        let mut gaps = Vec::new();
        for &day in &self.days {
            for &hour in &self.hours {
                for (vi, variable) in self.variables.iter().enumerate() {
                    let Some(slot) = self.slot(day, hour, vi) else {
                        continue;
                    };
                    for (li, &height_level) in self.height_levels.iter().enumerate() {
                        if !slot.is_covered(li) {
                            gaps.push(IndexingGap {
                                day,
                                hour,
                                variable: variable.clone(),
                                height_level,
                            });
                        }
                    }
                }
            }
        }
        gaps
    }

    pub fn gap_count(&self) -> usize {
        self.slots
            .values()
            .map(|slot| slot.covered.iter().filter(|c| !**c).count())
            .sum()
    }
}

/// Index a raw batch into a tensor plus its coordinate grid.
///
/// Messages that match no requested `(day, hour, variable, level)` are
/// ignored. Requested slices without a message stay zero and are reported by
/// [`FieldTensor::gaps`].
pub fn index(
    batch: &RawBatch,
    variables: &[String],
    height_levels: &[u32],
    days: &[u32],
    hours: &[u32],
) -> Result<(FieldTensor, CoordinateGrid)> {
    let grid = batch.coordinate_grid()?;
    let mut tensor = FieldTensor::zeros(variables, height_levels, days, hours, grid.shape());

    let mut matched = 0usize;
    let mut unmatched = 0usize;

    for message in batch.messages() {
        let key = tensor.variable_index(&message.name).map(|variable| SlotKey {
            day: message.day,
            hour: message.hour,
            variable,
        });
        let level = tensor.level_index(message.level);

        let written = match (key, level) {
            (Some(key), Some(level)) => tensor.write(key, level, message.values.view())?,
            _ => false,
        };

        if written {
            matched += 1;
        } else {
            unmatched += 1;
            debug!(
                name = %message.name,
                day = message.day,
                hour = message.hour,
                level = message.level,
                "Message matches no requested slot"
            );
        }
    }

    debug!(
        messages = batch.len(),
        matched = matched,
        unmatched = unmatched,
        shape = ?grid.shape(),
        "Indexed grid batch"
    );

    Ok((tensor, grid))
}
