//! The plain way to do it: cut the input at line boundaries, aggregate each piece into a
//! hash map on the rayon pool, and merge the maps. Slower than the block engine, but it shares
//! neither the tokenizer nor the fixed-capacity table with it, which makes it a useful
//! cross-check.

use std::{
    ops::Range,
    time::{Duration, Instant},
};

use ahash::AHashMap;
use anyhow::{Context, Result};
use memchr::memchr;
use rayon::prelude::*;
use tracing::info;

use crate::{
    config::{EngineConfig, MalformedPolicy},
    error::{DeadlineExceeded, MalformedKind, MalformedRecord},
    parse::{name_hash, DELIMITER, NEWLINE},
    table::{Station, Tally},
};

type StationMap<'a> = AHashMap<&'a [u8], Station>;

fn merge_maps<'a>(mut global: StationMap<'a>, local: StationMap<'a>) -> StationMap<'a> {
    for (name, stats) in local {
        global
            .entry(name)
            .and_modify(|g| g.combine(&stats))
            .or_insert(stats);
    }
    global
}

/// `-?\d{1,2}\.\d`; anything else is malformed even when it reads as a float.
fn has_value_shape(text: &[u8]) -> bool {
    let digits = text.strip_prefix(b"-").unwrap_or(text);
    match digits {
        [units, b'.', tenths] => units.is_ascii_digit() && tenths.is_ascii_digit(),
        [tens, units, b'.', tenths] => {
            tens.is_ascii_digit() && units.is_ascii_digit() && tenths.is_ascii_digit()
        }
        _ => false,
    }
}

fn parse_value(text: &[u8]) -> Option<i32> {
    let text = text.strip_suffix(b"\r").unwrap_or(text);
    if !has_value_shape(text) {
        return None;
    }
    let value: f64 = lexical_core::parse(text).ok()?;
    Some((value * 10.0).round() as i32)
}

fn process_chunk(chunk: &[u8], policy: MalformedPolicy) -> Result<(StationMap<'_>, Tally)> {
    let mut local = StationMap::with_capacity(1024);
    let mut tally = Tally::default();
    for line in chunk.split(|&b| b == NEWLINE) {
        if line.is_empty() {
            continue;
        }
        let parsed = match memchr(DELIMITER, line) {
            None => Err(MalformedKind::MissingDelimiter),
            Some(i) => parse_value(&line[i + 1..])
                .map(|value| (&line[..i], value))
                .ok_or(MalformedKind::BadValue),
        };
        let (name, value) = match parsed {
            Ok(record) => record,
            Err(kind) => match policy {
                MalformedPolicy::Fail => return Err(MalformedRecord::new(kind, line).into()),
                MalformedPolicy::Skip => {
                    tally.skipped += 1;
                    continue;
                }
            },
        };
        local
            .entry(name)
            .and_modify(|s| s.add(value))
            .or_insert_with(|| Station::new(name, name_hash(name), value));
        tally.records += 1;
    }
    Ok((local, tally))
}

/// Splits `bytes` into about `pieces` ranges, each ending just after a newline (or at the end).
fn line_ranges(bytes: &[u8], pieces: usize) -> Vec<Range<usize>> {
    let len = bytes.len();
    let chunk_size = (len / pieces.max(1)).max(1);
    let mut ranges = Vec::with_capacity(pieces);
    let mut start = 0;
    while start < len {
        let end = match memchr(NEWLINE, &bytes[(start + chunk_size).min(len)..]) {
            Some(offset) => (start + chunk_size + offset + 1).min(len),
            None => len,
        };
        ranges.push(start..end);
        start = end;
    }
    ranges
}

/// Runs the baseline under `config`: its own pool of `config.workers` threads, its malformed
/// policy and its deadline. Block size and table layout only shape the block engine.
pub fn run(bytes: &[u8], config: &EngineConfig) -> Result<(Vec<Station>, Tally)> {
    config.validate()?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
        .context("couldn't start the rayon pool")?;
    let deadline = config
        .deadline
        .and_then(|limit| Some((Instant::now().checked_add(limit)?, limit)));
    pool.install(|| aggregate_until(bytes, config.on_malformed, deadline))
}

/// Aggregates `bytes` on the current rayon pool, returning the stations sorted by name.
pub fn aggregate(bytes: &[u8], policy: MalformedPolicy) -> Result<(Vec<Station>, Tally)> {
    aggregate_until(bytes, policy, None)
}

fn aggregate_until(
    bytes: &[u8],
    policy: MalformedPolicy,
    deadline: Option<(Instant, Duration)>,
) -> Result<(Vec<Station>, Tally)> {
    let started = Instant::now();
    let pieces = rayon::current_num_threads() * 4;
    let (map, tally) = line_ranges(bytes, pieces)
        .into_par_iter()
        .map(|range| {
            // Checked per chunk; a chunk already running is finished.
            if let Some((at, limit)) = deadline {
                if Instant::now() >= at {
                    return Err(DeadlineExceeded(limit).into());
                }
            }
            process_chunk(&bytes[range], policy)
        })
        .try_reduce(
            || (StationMap::default(), Tally::default()),
            |(a, mut ta), (b, tb)| {
                ta += tb;
                Ok((merge_maps(a, b), ta))
            },
        )?;

    let mut stations: Vec<Station> = map.into_iter().map(|(_, station)| station).collect();
    stations.sort_unstable_by(|a, b| a.name.cmp(&b.name));
    info!(
        stations = stations.len(),
        records = tally.records,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "baseline aggregation finished"
    );
    Ok((stations, tally))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_end_on_newlines_and_cover_everything() {
        let bytes = b"a;1.0\nbb;2.0\nccc;3.0\nd;4.0";
        for pieces in 1..8 {
            let ranges = line_ranges(bytes, pieces);
            assert_eq!(ranges.first().unwrap().start, 0);
            assert_eq!(ranges.last().unwrap().end, bytes.len());
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
                assert_eq!(bytes[pair[0].end - 1], b'\n');
            }
        }
        assert!(line_ranges(b"", 4).is_empty());
    }

    #[test]
    fn aggregates_and_sorts() {
        let (stations, tally) = aggregate(
            b"Paris;12.3\nParis;15.7\nLondon;9.1\n",
            MalformedPolicy::Fail,
        )
        .unwrap();
        assert_eq!(tally.records, 3);
        let names: Vec<_> = stations.iter().map(|s| s.name_lossy().into_owned()).collect();
        assert_eq!(names, ["London", "Paris"]);
        assert_eq!((stations[1].count, stations[1].sum), (2, 280));
    }

    #[test]
    fn skips_or_fails_on_malformed_lines() {
        let input = b"Paris;12.3\nno delimiter\nParis;x\n";
        let (_, tally) = aggregate(input, MalformedPolicy::Skip).unwrap();
        assert_eq!((tally.records, tally.skipped), (1, 2));

        let err = aggregate(input, MalformedPolicy::Fail).unwrap_err();
        assert!(err.downcast_ref::<MalformedRecord>().is_some());
    }

    #[test]
    fn floats_outside_the_value_shape_are_malformed() {
        let input = b"Paris;1.25\nParis;123.4\nParis;1e1\nLondon;9.1\n";

        let err = aggregate(input, MalformedPolicy::Fail).unwrap_err();
        let malformed = err.downcast_ref::<MalformedRecord>().unwrap();
        assert_eq!(malformed.kind, MalformedKind::BadValue);
        assert!(malformed.line.starts_with(b"Paris;"));

        let (stations, tally) = aggregate(input, MalformedPolicy::Skip).unwrap();
        assert_eq!((tally.records, tally.skipped), (1, 3));
        let names: Vec<_> = stations.iter().map(|s| s.name_lossy().into_owned()).collect();
        assert_eq!(names, ["London"]);
    }

    #[test]
    fn run_validates_config_and_honours_deadline() {
        let input = b"Paris;12.3\nParis;15.7\nLondon;9.1\n";
        let config = |workers, deadline| EngineConfig {
            workers,
            deadline,
            ..EngineConfig::default()
        };

        let (stations, tally) = run(input, &config(2, None)).unwrap();
        assert_eq!(tally.records, 3);
        assert_eq!(stations, aggregate(input, MalformedPolicy::Fail).unwrap().0);

        assert!(run(input, &config(0, None)).is_err());

        let err = run(input, &config(2, Some(Duration::ZERO))).unwrap_err();
        assert!(err.downcast_ref::<DeadlineExceeded>().is_some());
    }

    #[test]
    fn parses_values_in_tenths() {
        assert_eq!(parse_value(b"-99.9"), Some(-999));
        assert_eq!(parse_value(b"0.1\r"), Some(1));
        assert_eq!(parse_value(b"x"), None);
        assert_eq!(parse_value(b"1.25"), None);
        assert_eq!(parse_value(b"123.4"), None);
        assert_eq!(parse_value(b"+1.0"), None);
        assert_eq!(parse_value(b"1e1"), None);
    }
}
