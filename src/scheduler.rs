use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, select, Receiver, RecvError, Sender};
use tracing::{debug, info, warn};

use crate::{
    block::{BlockPlan, BlockRange},
    config::EngineConfig,
    error::DeadlineExceeded,
    fragment::{split_block, BlockFragments, FragmentStore, SplitBlock},
    parse::records,
    source::BlockSource,
    table::{StationTable, Tally},
};

/// Everything one worker produced for one block.
#[derive(Debug)]
pub struct BlockOutput {
    pub index: usize,
    pub table: StationTable,
    pub fragments: BlockFragments,
    pub tally: Tally,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub blocks: usize,
    pub workers: usize,
    pub stations: usize,
    pub records: u64,
    pub skipped: u64,
    pub elapsed: Duration,
}

/// The final table together with how it was produced.
#[derive(Debug)]
pub struct Aggregate {
    pub table: StationTable,
    pub summary: RunSummary,
}

/// Aggregates the terminated records of one block into a fresh table and copies out its edges.
pub fn process_block(bytes: &[u8], index: usize, config: &EngineConfig) -> Result<BlockOutput> {
    let SplitBlock { body, fragments } = split_block(bytes, index);
    let mut table = StationTable::new(config.table);
    let tally = table
        .absorb(
            records(body).map(|r| r.map_err(|malformed| malformed.in_block(index))),
            config.on_malformed,
        )
        .with_context(|| format!("failed to aggregate block {index}"))?;
    Ok(BlockOutput {
        index,
        table,
        fragments,
        tally,
    })
}

fn worker<S: BlockSource + ?Sized>(
    source: &S,
    config: &EngineConfig,
    jobs: Receiver<BlockRange>,
    done: Sender<Result<BlockOutput>>,
    cancel: &AtomicBool,
) {
    let mut scratch = Vec::new();
    for range in jobs {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let output = source
            .read_block(range, &mut scratch)
            .with_context(|| format!("couldn't read block {}", range.index))
            .and_then(|bytes| process_block(bytes, range.index, config));
        if done.send(output).is_err() {
            break;
        }
    }
}

enum Event {
    Assigned(bool),
    Finished(Result<Result<BlockOutput>, RecvError>),
    Expired,
}

struct Collected {
    table: StationTable,
    fragments: FragmentStore,
    tally: Tally,
}

/// Hands out block indices and folds in finished blocks until every block is back.
///
/// Runs on the calling thread only, so merging needs no locks. Completion order is arbitrary;
/// fragments are keyed by block index.
fn coordinate(
    plan: &BlockPlan,
    jobs: Sender<BlockRange>,
    done: Receiver<Result<BlockOutput>>,
    config: &EngineConfig,
) -> Result<Collected> {
    let block_count = plan.block_count();
    let limit = config.deadline.unwrap_or_default();
    let deadline = match config.deadline {
        Some(limit) => crossbeam_channel::after(limit),
        None => crossbeam_channel::never(),
    };

    let mut pending = plan.blocks().peekable();
    let mut jobs = Some(jobs);
    let mut table = StationTable::new(config.table);
    let mut fragments = FragmentStore::new(block_count);
    let mut tally = Tally::default();
    let mut collected = 0;

    while collected < block_count {
        let event = match (pending.peek().copied(), &jobs) {
            (Some(range), Some(tx)) => select! {
                send(tx, range) -> sent => Event::Assigned(sent.is_ok()),
                recv(done) -> output => Event::Finished(output),
                recv(deadline) -> _ => Event::Expired,
            },
            _ => select! {
                recv(done) -> output => Event::Finished(output),
                recv(deadline) -> _ => Event::Expired,
            },
        };

        match event {
            Event::Assigned(true) => {
                pending.next();
                if pending.peek().is_none() {
                    // Lets idle workers exit as soon as the queue drains.
                    jobs = None;
                }
            }
            Event::Assigned(false) => bail!("worker pool shut down with blocks still unassigned"),
            Event::Finished(Ok(output)) => {
                let BlockOutput {
                    index,
                    table: block_table,
                    fragments: edges,
                    tally: block_tally,
                } = output?;
                debug!(
                    block = index,
                    stations = block_table.len(),
                    records = block_tally.records,
                    "merging block"
                );
                table
                    .merge_table(block_table)
                    .with_context(|| format!("failed to merge block {index}"))?;
                fragments.insert(index, edges);
                tally += block_tally;
                collected += 1;
            }
            Event::Finished(Err(RecvError)) => {
                bail!("worker pool shut down before every block finished")
            }
            Event::Expired => return Err(DeadlineExceeded(limit).into()),
        }
    }

    Ok(Collected {
        table,
        fragments,
        tally,
    })
}

/// Runs the whole block-partitioned aggregation over `source`.
///
/// `config.workers` threads each take one block at a time from a bounded queue. The
/// calling thread merges their tables, then stitches the records that straddle block
/// boundaries back together once every block is in. Any failure aborts the run.
pub fn run<S: BlockSource + ?Sized>(source: &S, config: &EngineConfig) -> Result<Aggregate> {
    config.validate()?;
    let started = Instant::now();
    let plan = BlockPlan::new(source.len(), config.block_size);
    let blocks = plan.block_count();
    let workers = config.workers.min(blocks).max(1);
    info!(bytes = source.len(), blocks, workers, "starting aggregation");

    let (job_tx, job_rx) = bounded::<BlockRange>(workers);
    let (done_tx, done_rx) = bounded::<Result<BlockOutput>>(workers);
    let cancel = AtomicBool::new(false);

    let collected = thread::scope(|scope| {
        for _ in 0..workers {
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            let cancel = &cancel;
            scope.spawn(move || worker(source, config, jobs, done, cancel));
        }
        drop(job_rx);
        drop(done_tx);

        let result = coordinate(&plan, job_tx, done_rx, config);
        if result.is_err() {
            cancel.store(true, Ordering::Relaxed);
        }
        result
    })?;

    let Collected {
        mut table,
        fragments,
        mut tally,
    } = collected;
    tally += fragments
        .resolve_into(&mut table, config.on_malformed)
        .context("failed to resolve block boundaries")?;

    if tally.skipped > 0 {
        warn!(skipped = tally.skipped, "skipped malformed records");
    }
    let summary = RunSummary {
        blocks,
        workers,
        stations: table.len(),
        records: tally.records,
        skipped: tally.skipped,
        elapsed: started.elapsed(),
    };
    info!(
        stations = summary.stations,
        records = summary.records,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "aggregation finished"
    );
    Ok(Aggregate { table, summary })
}
