//! Shared test utilities for the grid-resampler workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Synthetic raw grid batch generators
//! - Parameter document and station fixtures
//! - A recording in-memory grid provider
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in integration tests:
//!
//! ```ignore
//! use test_utils::{assert_approx_eq, grid, BatchBuilder, RecordingProvider};
//! ```

pub mod fixtures;
pub mod generators;
pub mod provider;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;
pub use provider::*;

/// A scratch directory for archives and table files, removed on drop.
pub fn scratch_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("grid-resampler-test")
        .tempdir()
        .unwrap_or_else(|e| panic!("cannot create scratch dir: {}", e))
}

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Approximate equality of a `(lat, lon)` pair.
#[macro_export]
macro_rules! assert_location_approx_eq {
    (($lat1:expr, $lon1:expr), ($lat2:expr, $lon2:expr), $epsilon:expr) => {{
        $crate::assert_approx_eq!($lat1, $lat2, $epsilon);
        $crate::assert_approx_eq!($lon1, $lon2, $epsilon);
    }};
}
