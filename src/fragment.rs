use anyhow::{Context, Result};
use memchr::{memchr, memrchr};

use crate::{
    config::MalformedPolicy,
    parse::{records, NEWLINE},
    table::{StationTable, Tally},
};

/// The partial records at the edges of one block, copied out of the block buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockFragments {
    /// `start` is everything before the first newline, `end` everything after the last one.
    /// Block 0 starts on a record boundary and always has an empty `start`.
    Bounded { start: Vec<u8>, end: Vec<u8> },
    /// The block has no newline at all; every byte belongs to a record that straddles it.
    Unterminated(Vec<u8>),
}

/// A block cut into its fully terminated body and its edge fragments.
#[derive(Debug)]
pub struct SplitBlock<'a> {
    pub body: &'a [u8],
    pub fragments: BlockFragments,
}

/// Separates the edge fragments of block `index` from the records it can parse on its own.
///
/// The body never contains the trailing partial record, and never the leading one either,
/// so each record is seen by exactly one of the block or the resolver.
pub fn split_block(buf: &[u8], index: usize) -> SplitBlock<'_> {
    let Some(last) = memrchr(NEWLINE, buf) else {
        return SplitBlock {
            body: &[],
            fragments: BlockFragments::Unterminated(buf.to_vec()),
        };
    };
    let (start, body_start) = match index {
        0 => (&buf[..0], 0),
        _ => {
            let first = memchr(NEWLINE, buf).unwrap_or(last);
            (&buf[..first], first + 1)
        }
    };
    SplitBlock {
        body: &buf[body_start..=last],
        fragments: BlockFragments::Bounded {
            start: start.to_vec(),
            end: buf[last + 1..].to_vec(),
        },
    }
}

/// Arena of per-block fragments, indexed by block number.
///
/// Filled in whatever order blocks complete; read once, in index order, after all of them have.
#[derive(Debug)]
pub struct FragmentStore {
    blocks: Vec<Option<BlockFragments>>,
}

impl FragmentStore {
    pub fn new(block_count: usize) -> Self {
        Self {
            blocks: vec![None; block_count],
        }
    }

    pub fn insert(&mut self, index: usize, fragments: BlockFragments) {
        let slot = &mut self.blocks[index];
        debug_assert!(slot.is_none(), "fragments of block {index} stored twice");
        *slot = Some(fragments);
    }

    /// Stitches each boundary-straddling record back together and feeds it into `table`.
    ///
    /// The tail of block N is joined with the head of block N+1, including any
    /// newline-free blocks in between. A tail left after the last block is the file's
    /// final, unterminated record.
    pub fn resolve_into(self, table: &mut StationTable, policy: MalformedPolicy) -> Result<Tally> {
        let mut tally = Tally::default();
        let mut carry = Vec::new();
        for (index, fragments) in self.blocks.into_iter().enumerate() {
            let fragments = fragments
                .with_context(|| format!("fragments of block {index} were never collected"))?;
            match fragments {
                BlockFragments::Bounded { start, end } => {
                    carry.extend_from_slice(&start);
                    tally += table.absorb(records(&carry), policy)?;
                    carry = end;
                }
                BlockFragments::Unterminated(bytes) => carry.extend_from_slice(&bytes),
            }
        }
        tally += table.absorb(records(&carry), policy)?;
        Ok(tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableLayout;

    fn bounded(start: &str, end: &str) -> BlockFragments {
        BlockFragments::Bounded {
            start: start.into(),
            end: end.into(),
        }
    }

    #[test]
    fn first_block_keeps_its_leading_record() {
        let split = split_block(b"Paris;12.3\nLondo", 0);
        assert_eq!(split.body, b"Paris;12.3\n");
        assert_eq!(split.fragments, bounded("", "Londo"));
    }

    #[test]
    fn later_blocks_hand_off_both_edges() {
        let split = split_block(b"n;15.2\nOslo;1.0\nRo", 1);
        assert_eq!(split.body, b"Oslo;1.0\n");
        assert_eq!(split.fragments, bounded("n;15.2", "Ro"));

        let split = split_block(b"a;1.0\nb", 3);
        assert_eq!(split.body, b"");
        assert_eq!(split.fragments, bounded("a;1.0", "b"));
    }

    #[test]
    fn block_ending_on_newline_has_empty_tail() {
        let split = split_block(b"x;2.0\ny;3.0\n", 2);
        assert_eq!(split.body, b"y;3.0\n");
        assert_eq!(split.fragments, bounded("x;2.0", ""));
    }

    #[test]
    fn block_without_newline_is_unterminated() {
        let split = split_block(b"Llanfair", 4);
        assert!(split.body.is_empty());
        assert_eq!(split.fragments, BlockFragments::Unterminated(b"Llanfair".to_vec()));
    }

    #[test]
    fn straddling_record_is_counted_once() {
        let mut table = StationTable::new(TableLayout::default());
        let mut store = FragmentStore::new(2);
        store.insert(1, bounded("n;15.2", ""));
        store.insert(0, bounded("", "Londo"));

        let tally = store
            .resolve_into(&mut table, MalformedPolicy::Fail)
            .unwrap();
        assert_eq!(tally.records, 1);
        let london = table.get(b"London").unwrap();
        assert_eq!((london.count, london.sum), (1, 152));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn chains_through_newline_free_blocks() {
        let mut table = StationTable::new(TableLayout::default());
        let mut store = FragmentStore::new(4);
        store.insert(0, bounded("", "Ta"));
        store.insert(1, BlockFragments::Unterminated(b"mpe".to_vec()));
        store.insert(2, BlockFragments::Unterminated(b"re;-4".to_vec()));
        store.insert(3, bounded(".5", "Oslo;1.0"));

        let tally = store
            .resolve_into(&mut table, MalformedPolicy::Fail)
            .unwrap();
        assert_eq!(tally.records, 2);
        assert_eq!(table.get(b"Tampere").unwrap().sum, -45);
        assert_eq!(table.get(b"Oslo").unwrap().sum, 10);
    }

    #[test]
    fn missing_block_is_an_error() {
        let mut table = StationTable::new(TableLayout::default());
        let mut store = FragmentStore::new(2);
        store.insert(0, bounded("", ""));
        let err = store
            .resolve_into(&mut table, MalformedPolicy::Fail)
            .unwrap_err();
        assert!(err.to_string().contains("block 1"));
    }
}
