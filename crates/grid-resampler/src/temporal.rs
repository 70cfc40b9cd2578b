//! Linear blending between the two cadence snapshots around a timestamp.

use chrono::NaiveDateTime;

use crate::error::{ResampleError, Result};
use crate::spatial::PointValues;
use crate::time::{floor_to_cadence, is_on_cadence, next_snapshot, YearMonth, CADENCE_SECONDS};

/// The snapshots bracketing a requested timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    /// Latest snapshot at or before the timestamp
    pub t0: NaiveDateTime,
    /// Snapshot one cadence step after `t0`
    pub t1: NaiveDateTime,
    /// Weight on `t0`: `1 - (seconds past t0) / 10800`
    pub weight: f64,
    exact: bool,
}

impl Bracket {
    pub fn for_timestamp(t: &NaiveDateTime) -> Self {
        let t0 = floor_to_cadence(t);
        let t1 = next_snapshot(&t0);
        let elapsed = (*t - t0).num_seconds() as f64;
        Self {
            t0,
            t1,
            weight: 1.0 - elapsed / CADENCE_SECONDS as f64,
            exact: is_on_cadence(t),
        }
    }

    /// The timestamp sits on a cadence boundary.
    pub fn is_exact(&self) -> bool {
        self.exact
    }

    /// `t1` falls in a different calendar month than `t0`.
    pub fn crosses_month(&self) -> bool {
        YearMonth::of(&self.t0) != YearMonth::of(&self.t1)
    }

    /// Whether `t1` must be interpolated and blended in.
    ///
    /// Blending never reaches into the next month's batch.
    pub fn needs_blend(&self) -> bool {
        !self.exact && !self.crosses_month()
    }
}

/// Blend `bracket0` and `bracket1` for the bracket's timestamp.
///
/// Returns `bracket0` unchanged when no blend is needed. Gap flags are
/// OR-ed so a blended value built on a gap stays flagged.
pub fn composite(
    bracket: &Bracket,
    bracket0: PointValues,
    bracket1: Option<PointValues>,
) -> Result<PointValues> {
    if !bracket.needs_blend() {
        return Ok(bracket0);
    }

    let bracket1 = bracket1.ok_or_else(|| ResampleError::MissingSnapshot {
        month: YearMonth::of(&bracket.t1),
        day: chrono::Datelike::day(&bracket.t1),
        hour: chrono::Timelike::hour(&bracket.t1),
    })?;

    if bracket0.values.dim() != bracket1.values.dim() {
        return Err(ResampleError::ShapeMismatch {
            expected: bracket0.values.dim(),
            actual: bracket1.values.dim(),
            context: "bracket1 values".to_string(),
        });
    }

    let w = bracket.weight;
    let values = &bracket0.values * w + &bracket1.values * (1.0 - w);
    let gaps = ndarray::Zip::from(&bracket0.gaps)
        .and(&bracket1.gaps)
        .map_collect(|a, b| *a || *b);

    Ok(PointValues { values, gaps })
}
