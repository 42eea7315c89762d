use std::{
    fs::File,
    io::{self, ErrorKind},
    path::Path,
};

use anyhow::{Context, Result};
use clap::ValueEnum;
use memmap2::Mmap;

use crate::block::BlockRange;

/// How blocks are fetched from the input file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum IoMode {
    #[default]
    Mmap,
    Pread,
}

pub fn open(path: &Path, mode: IoMode) -> Result<Box<dyn BlockSource>> {
    let source: Box<dyn BlockSource> = match mode {
        IoMode::Mmap => Box::new(MmapSource::open(path)?),
        IoMode::Pread => Box::new(FileSource::open(path)?),
    };
    Ok(source)
}

/// Positioned byte-range reads over the input.
///
/// Implementations must be safe to read from several workers at once, at independent offsets.
pub trait BlockSource: Sync {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the bytes of `range`. Sources that cannot lend their storage read into `scratch`.
    fn read_block<'a>(
        &'a self,
        range: BlockRange,
        scratch: &'a mut Vec<u8>,
    ) -> io::Result<&'a [u8]>;
}

fn slice_range(bytes: &[u8], range: BlockRange) -> io::Result<&[u8]> {
    let start = range.offset as usize;
    start
        .checked_add(range.len)
        .and_then(|end| bytes.get(start..end))
        .ok_or_else(|| {
            io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("block {} reads past end of input", range.index),
            )
        })
}

impl BlockSource for [u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_block<'a>(&'a self, range: BlockRange, _: &'a mut Vec<u8>) -> io::Result<&'a [u8]> {
        slice_range(self, range)
    }
}

/// The whole file mapped into memory; blocks are borrowed views into the map.
pub struct MmapSource {
    // Zero-length files are not mapped.
    map: Option<Mmap>,
}

impl MmapSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("couldn't open file {}", path.display()))?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(Self { map: None });
        }
        // SAFETY: the input is treated as read-only for the whole run; truncating it
        // underneath us is outside what this tool supports.
        let map = unsafe { Mmap::map(&file) }
            .with_context(|| format!("couldn't map file {}", path.display()))?;
        #[cfg(unix)]
        map.advise(memmap2::Advice::Sequential)?;
        Ok(Self { map: Some(map) })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or_default()
    }
}

impl BlockSource for MmapSource {
    fn len(&self) -> u64 {
        self.as_bytes().len() as u64
    }

    fn read_block<'a>(&'a self, range: BlockRange, _: &'a mut Vec<u8>) -> io::Result<&'a [u8]> {
        slice_range(self.as_bytes(), range)
    }
}

/// Positioned reads through one shared file handle into each worker's own buffer.
pub struct FileSource {
    file: File,
    len: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("couldn't open file {}", path.display()))?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }

    #[cfg(unix)]
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)
    }

    #[cfg(windows)]
    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            match self.file.seek_read(buf, offset) {
                Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl BlockSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_block<'a>(
        &'a self,
        range: BlockRange,
        scratch: &'a mut Vec<u8>,
    ) -> io::Result<&'a [u8]> {
        scratch.clear();
        scratch.resize(range.len, 0);
        self.read_exact_at(scratch, range.offset)?;
        Ok(scratch.as_slice())
    }
}
