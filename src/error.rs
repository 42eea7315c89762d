use std::{fmt, time::Duration};

/// Fatal table failures. Both mean the table was sized or hashed wrong for the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    CapacityExceeded {
        hash: u32,
        probe_limit: usize,
    },
    HashConflict {
        hash: u32,
        existing: String,
        incoming: String,
    },
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::CapacityExceeded { hash, probe_limit } => write!(
                f,
                "table capacity exceeded: no free slot for hash {hash:#010x} within {probe_limit} probes"
            ),
            TableError::HashConflict {
                hash,
                existing,
                incoming,
            } => write!(
                f,
                "hash conflict: {incoming:?} and {existing:?} both hash to {hash:#010x}"
            ),
        }
    }
}

impl std::error::Error for TableError {}

/// The value text did not match `-?\d{1,2}\.\d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedValue;

impl fmt::Display for MalformedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("value does not match -?d{1,2}.d")
    }
}

impl std::error::Error for MalformedValue {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedKind {
    MissingDelimiter,
    BadValue,
}

/// A record that could not be tokenized or decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub kind: MalformedKind,
    /// Block the record was found in; `None` for records stitched from fragments.
    pub block: Option<usize>,
    pub line: Vec<u8>,
}

impl MalformedRecord {
    pub fn new(kind: MalformedKind, line: &[u8]) -> Self {
        Self {
            kind,
            block: None,
            line: line.to_vec(),
        }
    }

    pub fn in_block(mut self, index: usize) -> Self {
        self.block = Some(index);
        self
    }
}

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            MalformedKind::MissingDelimiter => "record has no ';' delimiter",
            MalformedKind::BadValue => "record value does not match -?d{1,2}.d",
        };
        let line = String::from_utf8_lossy(&self.line);
        match self.block {
            Some(index) => write!(f, "{what}: {line:?} (block {index})"),
            None => write!(f, "{what}: {line:?} (block boundary)"),
        }
    }
}

impl std::error::Error for MalformedRecord {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineExceeded(pub Duration);

impl fmt::Display for DeadlineExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run exceeded its deadline of {:.1}s", self.0.as_secs_f64())
    }
}

impl std::error::Error for DeadlineExceeded {}
