//! Raw grid batches as materialized by the grid provider.

use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::grid::CoordinateGrid;

/// One field message: a single variable at one height level, day and hour.
///
/// `values` is in raw message row order, the same order as the batch's raw
/// coordinate arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMessage {
    /// Variable name as the provider spells it (e.g. "Temperature")
    pub name: String,
    /// Calendar day of month
    pub day: u32,
    /// Hour of day
    pub hour: u32,
    /// Height level in metres
    pub level: u32,
    pub values: Array2<f64>,
}

/// A materialized batch: shared raw coordinates plus field messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBatch {
    pub latitudes: Array2<f64>,
    pub longitudes: Array2<f64>,
    #[serde(default)]
    pub messages: Vec<FieldMessage>,
}

impl RawBatch {
    pub fn new(latitudes: Array2<f64>, longitudes: Array2<f64>) -> Self {
        Self {
            latitudes,
            longitudes,
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: FieldMessage) {
        self.messages.push(message);
    }

    /// The oriented coordinate grid shared by all messages.
    pub fn coordinate_grid(&self) -> Result<CoordinateGrid> {
        CoordinateGrid::from_raw(self.latitudes.view(), self.longitudes.view())
    }

    pub fn messages(&self) -> impl Iterator<Item = &FieldMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Read a batch previously written as JSON.
    pub fn read_json(path: &Path) -> Result<Self> {
        let content = std::fs::read(path)?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Write the batch as JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_vec(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024-06.batch.json");

        let mut batch = RawBatch::new(array![[63.0, 63.0], [64.0, 64.0]], array![[340.0, 341.0], [340.0, 341.0]]);
        batch.push(FieldMessage {
            name: "Temperature".to_string(),
            day: 1,
            hour: 6,
            level: 100,
            values: array![[271.5, 272.0], [270.0, 270.25]],
        });
        batch.write_json(&path).unwrap();

        let back = RawBatch::read_json(&path).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back.messages[0].values[[1, 1]], 270.25);
        assert_eq!(back.coordinate_grid().unwrap().at(0, 0), Some((64.0, -20.0)));
    }
}
