//! Spatiotemporal resampling of 3-hourly gridded fields onto station points.
//!
//! Requests are timestamped station locations. They are grouped into
//! calendar-month retrievals, each month's raw grid batch is indexed into a
//! field tensor, and every request is resolved by four-neighbour inverse
//! distance weighting in space followed by linear blending between the two
//! bracketing 3-hour snapshots in time.
//!
//! # Example
//!
//! ```ignore
//! use grid_resampler::{ArchiveProvider, PollConfig, ResampleConfig, Resampler, RunOptions, SqliteTableStore};
//!
//! let config = ResampleConfig::load("params.json".as_ref())?;
//! let store = SqliteTableStore::open("out/results.db".as_ref(), &config.variables).await?;
//! let provider = ArchiveProvider::new("archive", PollConfig::default());
//! let outcome = Resampler::new(config, RunOptions::default(), provider, store).run().await?;
//! println!("{} rows", outcome.table.len());
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod grid;
pub mod indexer;
pub mod orchestrator;
pub mod planner;
pub mod provider;
pub mod spatial;
pub mod store;
pub mod table;
pub mod temporal;
pub mod time;

pub use batch::{FieldMessage, RawBatch};
pub use config::{
    GapPolicy, Location, ProductType, Request, RequestIndex, ResampleConfig, RetrievalDefaults, RunOptions,
};
pub use error::{ResampleError, Result};
pub use grid::CoordinateGrid;
pub use indexer::{index, FieldTensor, IndexingGap};
pub use orchestrator::{resolve_month, Resampler, RunOutcome, RunReport};
pub use planner::{plan, MonthBatch};
pub use provider::{ArchiveProvider, GridProvider, PollConfig, RetrievalRequest};
pub use spatial::{interpolate, Neighbours, PointValues};
pub use store::{MemoryTableStore, SqliteTableStore, TableStore};
pub use table::{MonthCoverage, ResultRow, ResultTable};
pub use temporal::{composite, Bracket};
pub use time::YearMonth;
