//! Table of contents: stored file name → index of the chain's first block.
//!
//! Only chain heads are recorded.  The rest of a chain is reached through
//! the `next_block_index` links in the block headers.

use log::debug;
use std::collections::btree_map::{self, BTreeMap};
use std::io::{Read, Seek, Write};

use crate::error::{ArchiveError, ArchiveResult};
use crate::io_stream::BlockStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toc {
    entries: BTreeMap<String, u64>,
}

impl Toc {
    /// Rebuild from the block headers of an opened archive.
    ///
    /// Blocks are scanned in ascending index order and the first live block
    /// seen for each name is taken as its chain head.  Later blocks of the
    /// same chain never overwrite it.
    pub fn reconstruct<S: Read + Write + Seek>(store: &mut BlockStore<S>) -> ArchiveResult<Self> {
        let mut toc = Toc::default();
        for index in 0..store.num_blocks() {
            let block = store.read_block(index)?;
            if block.header.is_empty {
                continue;
            }
            if block.header.file_name.is_empty() {
                return Err(ArchiveError::bad_block(index, "live block without a file name"));
            }
            if let btree_map::Entry::Vacant(slot) =
                toc.entries.entry(block.header.file_name.as_str().to_owned())
            {
                slot.insert(index);
            }
        }
        debug!("reconstructed TOC: {} files over {} blocks", toc.len(), store.num_blocks());
        Ok(toc)
    }

    /// Register or overwrite the first block of `name`.
    pub fn add_entry(&mut self, name: &str, first_block: u64) {
        self.entries.insert(name.to_owned(), first_block);
    }

    pub fn lookup(&self, name: &str) -> ArchiveResult<u64> {
        self.entries
            .get(name)
            .copied()
            .ok_or_else(|| ArchiveError::FileNotFound(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn remove_entry(&mut self, name: &str) -> Option<u64> {
        self.entries.remove(name)
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Rewrite every first-block index through `remap`.  Fails without
    /// touching the TOC if any entry has no mapping.
    pub fn remap<F: Fn(u64) -> Option<u64>>(&mut self, remap: F) -> ArchiveResult<()> {
        let mut next = BTreeMap::new();
        for (name, &index) in &self.entries {
            let moved = remap(index).ok_or_else(|| {
                ArchiveError::BadArchive(format!("{name} starts at block {index}, which is not live"))
            })?;
            next.insert(name.clone(), moved);
        }
        self.entries = next;
        Ok(())
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, BlockName, NamePolicy};
    use std::io::Cursor;

    fn block(index: u64, next: u64, name: &str, empty: bool) -> Block {
        let mut b = Block::default();
        b.header.block_index = index;
        b.header.next_block_index = next;
        b.header.is_empty = empty;
        b.header.file_name = BlockName::new(name, NamePolicy::Reject).unwrap();
        b
    }

    #[test]
    fn reconstruct_keeps_first_block_of_each_chain() {
        let mut store = BlockStore::empty(Cursor::new(Vec::new()));
        store.write_block(0, &block(0, 0, "stale", true)).unwrap();
        store.write_block(1, &block(1, 3, "a", false)).unwrap();
        store.write_block(2, &block(2, 2, "b", false)).unwrap();
        store.write_block(3, &block(3, 4, "a", false)).unwrap();
        store.write_block(4, &block(4, 4, "a", false)).unwrap();

        let toc = Toc::reconstruct(&mut store).unwrap();
        assert_eq!(toc.len(), 2);
        assert_eq!(toc.lookup("a").unwrap(), 1);
        assert_eq!(toc.lookup("b").unwrap(), 2);
        assert!(!toc.contains("stale"));
    }

    #[test]
    fn lookup_of_missing_name_fails() {
        let toc = Toc::default();
        assert!(matches!(toc.lookup("nope"), Err(ArchiveError::FileNotFound(_))));
    }

    #[test]
    fn add_overwrites_and_remove_erases() {
        let mut toc = Toc::default();
        toc.add_entry("a", 4);
        toc.add_entry("a", 9);
        assert_eq!(toc.lookup("a").unwrap(), 9);
        assert_eq!(toc.remove_entry("a"), Some(9));
        assert!(toc.is_empty());
    }

    #[test]
    fn remap_is_all_or_nothing() {
        let mut toc = Toc::default();
        toc.add_entry("a", 2);
        toc.add_entry("b", 5);
        let before = toc.clone();
        assert!(toc.remap(|i| (i == 2).then_some(0)).is_err());
        assert_eq!(toc, before);

        toc.remap(|i| Some(i - 2)).unwrap();
        assert_eq!(toc.iter().collect::<Vec<_>>(), vec![("a", 0), ("b", 3)]);
    }
}
