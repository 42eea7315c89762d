//! Grouped min/mean/max aggregation of `name;value` lines over very large files.
//!
//! The input is cut into fixed-size blocks with no regard for line boundaries. Each block is
//! aggregated on its own worker into a fixed-capacity [`StationTable`]. The records cut in
//! half by block edges are stitched back together and added once every block is in.

use std::path::Path;

use anyhow::Result;

pub mod baseline;
pub mod block;
pub mod config;
pub mod error;
pub mod fragment;
pub mod parse;
pub mod report;
pub mod scheduler;
pub mod source;
pub mod table;

pub use config::{EngineConfig, MalformedPolicy, TableLayout};
pub use report::{write_report, OutputFormat, Tenths};
pub use scheduler::{Aggregate, RunSummary};
pub use source::{BlockSource, IoMode};
pub use table::{Station, StationTable};

/// Aggregates every record in `source` with the block engine.
pub fn aggregate<S: BlockSource + ?Sized>(source: &S, config: &EngineConfig) -> Result<Aggregate> {
    scheduler::run(source, config)
}

pub fn aggregate_file(path: &Path, io: IoMode, config: &EngineConfig) -> Result<Aggregate> {
    let source = source::open(path, io)?;
    aggregate(source.as_ref(), config)
}
