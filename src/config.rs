use std::{num::NonZeroUsize, thread, time::Duration};

use anyhow::{ensure, Result};
use clap::ValueEnum;

pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_HASH_SPACE: usize = 8192;
pub const DEFAULT_COLLISION_SLACK: usize = 4;
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(600);

/// What to do with a record whose value or delimiter is malformed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum MalformedPolicy {
    /// Abort the run on the first malformed record.
    #[default]
    Fail,
    /// Drop the record and count it.
    Skip,
}

/// Shape of a fixed-capacity station table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    /// Number of home slots. Must be a power of two.
    pub hash_space: usize,
    /// Extra slots past the end, and the number of linear-probe steps allowed.
    pub collision_slack: usize,
}

impl TableLayout {
    pub fn slots(&self) -> usize {
        self.hash_space + self.collision_slack
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.hash_space.is_power_of_two(),
            "hash space must be a power of two, got {}",
            self.hash_space
        );
        Ok(())
    }
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            hash_space: DEFAULT_HASH_SPACE,
            collision_slack: DEFAULT_COLLISION_SLACK,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub block_size: usize,
    pub workers: usize,
    pub table: TableLayout,
    /// Overall deadline for the parallel phase; `None` waits forever.
    pub deadline: Option<Duration>,
    pub on_malformed: MalformedPolicy,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.block_size > 0, "block size must be positive");
        ensure!(self.workers > 0, "worker count must be positive");
        self.table.validate()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            workers: available_workers(),
            table: TableLayout::default(),
            deadline: Some(DEFAULT_DEADLINE),
            on_malformed: MalformedPolicy::Fail,
        }
    }
}

pub fn available_workers() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
