use std::{
    io::{self, BufWriter},
    path::PathBuf,
    time::Duration,
};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use station_agg::{
    baseline,
    config::{
        available_workers, DEFAULT_BLOCK_SIZE, DEFAULT_COLLISION_SLACK, DEFAULT_HASH_SPACE,
    },
    source::MmapSource,
    write_report, EngineConfig, IoMode, MalformedPolicy, OutputFormat, TableLayout,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Strategy {
    /// Fixed-size blocks, per-block tables and boundary stitching.
    Blocks,
    /// Line-aligned chunks aggregated into hash maps on the rayon pool.
    Baseline,
}

/// Prints min/mean/max per station name for a file of `name;value` lines.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to measurements file
    #[arg(default_value = "measurements.txt")]
    path: PathBuf,
    /// Worker threads [default: available parallelism]
    #[arg(short, long)]
    threads: Option<usize>,
    /// Bytes per block
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,
    /// Home slots per table; a power of two comfortably above the number of names
    #[arg(long, default_value_t = DEFAULT_HASH_SPACE)]
    hash_space: usize,
    /// Linear-probe steps allowed past a home slot
    #[arg(long, default_value_t = DEFAULT_COLLISION_SLACK)]
    collision_slack: usize,
    /// Abort if aggregation runs longer than this; 0 disables the limit
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,
    #[arg(long, value_enum, default_value_t = IoMode::Mmap)]
    io: IoMode,
    #[arg(long, value_enum, default_value_t = MalformedPolicy::Fail)]
    on_malformed: MalformedPolicy,
    #[arg(long, value_enum, default_value_t = OutputFormat::Slash)]
    format: OutputFormat,
    #[arg(long, value_enum, default_value_t = Strategy::Blocks)]
    strategy: Strategy,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            block_size: self.block_size,
            workers: self.threads.unwrap_or_else(available_workers),
            table: TableLayout {
                hash_space: self.hash_space,
                collision_slack: self.collision_slack,
            },
            deadline: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
            on_malformed: self.on_malformed,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = args.engine_config();

    let stations = match args.strategy {
        Strategy::Blocks => station_agg::aggregate_file(&args.path, args.io, &config)?
            .table
            .into_sorted(),
        Strategy::Baseline => {
            let source = MmapSource::open(&args.path)?;
            baseline::run(source.as_bytes(), &config)?.0
        }
    };

    let mut out = BufWriter::new(io::stdout().lock());
    write_report(&mut out, &stations, args.format)?;
    Ok(())
}
