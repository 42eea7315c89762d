use std::{
    fmt,
    io::{self, Write},
};

use clap::ValueEnum;

use crate::table::Station;

/// A scaled integer shown with one decimal place: `-32` displays as `-3.2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tenths(pub i32);

impl fmt::Display for Tenths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{}", abs / 10, abs % 10)
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            Tenths(self.min),
            Tenths(self.mean_tenths()),
            Tenths(self.max)
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `name=min/mean/max`
    #[default]
    Slash,
    /// `name;min;mean;max`
    Semicolon,
}

/// Writes one line per station, in the order given.
pub fn write_report<W: Write>(
    out: &mut W,
    stations: &[Station],
    format: OutputFormat,
) -> io::Result<()> {
    for station in stations {
        let name = station.name_lossy();
        match format {
            OutputFormat::Slash => writeln!(out, "{name}={station}")?,
            OutputFormat::Semicolon => writeln!(
                out,
                "{name};{};{};{}",
                Tenths(station.min),
                Tenths(station.mean_tenths()),
                Tenths(station.max)
            )?,
        }
    }
    out.flush()
}
