use memchr::memchr;

use crate::error::{MalformedKind, MalformedRecord, MalformedValue};

pub const DELIMITER: u8 = b';';
pub const NEWLINE: u8 = b'\n';

/// Rolling `h * 31 + byte` hash of a station name.
#[inline]
pub fn name_hash(name: &[u8]) -> u32 {
    name.iter().fold(0, |h, &b| step_hash(h, b))
}

#[inline(always)]
fn step_hash(h: u32, b: u8) -> u32 {
    h.wrapping_mul(31).wrapping_add(b as u32)
}

#[inline(always)]
fn digit(b: u8) -> Result<i32, MalformedValue> {
    if b.is_ascii_digit() {
        Ok((b - b'0') as i32)
    } else {
        Err(MalformedValue)
    }
}

/// Decodes `-?\d{1,2}\.\d` into tenths, e.g. `b"-3.2"` to `-32`.
///
/// Only the sign and the digit count are branched on; the digits sit at fixed positions
/// once those are known. A trailing `\r` is ignored.
#[inline]
pub fn decode_scaled(text: &[u8]) -> Result<i32, MalformedValue> {
    let text = text.strip_suffix(b"\r").unwrap_or(text);
    let (negative, digits) = match text.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, text),
    };
    let magnitude = match *digits {
        [units, b'.', tenths] => digit(units)? * 10 + digit(tenths)?,
        [tens, units, b'.', tenths] => digit(tens)? * 100 + digit(units)? * 10 + digit(tenths)?,
        _ => return Err(MalformedValue),
    };
    Ok(if negative { -magnitude } else { magnitude })
}

/// One decoded `name;value` line. The name borrows from the buffer being scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub name: &'a [u8],
    pub hash: u32,
    pub value: i32,
}

/// Scans records out of a buffer in which every record ends with `\n` or the end of the buffer.
/// Empty lines are skipped.
pub struct Records<'a> {
    buf: &'a [u8],
    pos: usize,
}

pub fn records(buf: &[u8]) -> Records<'_> {
    Records { buf, pos: 0 }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<Record<'a>, MalformedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let buf = self.buf;
        loop {
            let start = self.pos;
            if start >= buf.len() {
                return None;
            }

            // The hash is built while the name is consumed, so it is ready at the delimiter.
            let mut hash = 0u32;
            let mut i = start;
            while i < buf.len() && buf[i] != DELIMITER && buf[i] != NEWLINE {
                hash = step_hash(hash, buf[i]);
                i += 1;
            }

            if i == buf.len() || buf[i] == NEWLINE {
                self.pos = i + 1;
                if i == start {
                    continue;
                }
                return Some(Err(MalformedRecord::new(
                    MalformedKind::MissingDelimiter,
                    &buf[start..i],
                )));
            }

            let name = &buf[start..i];
            let value_start = i + 1;
            let value_end = memchr(NEWLINE, &buf[value_start..])
                .map_or(buf.len(), |offset| value_start + offset);
            self.pos = value_end + 1;

            return Some(match decode_scaled(&buf[value_start..value_end]) {
                Ok(value) => Ok(Record { name, hash, value }),
                Err(MalformedValue) => Err(MalformedRecord::new(
                    MalformedKind::BadValue,
                    &buf[start..value_end],
                )),
            });
        }
    }
}
