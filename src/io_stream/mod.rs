//! Block I/O adapter.
//!
//! [`BlockStore`] owns the archive's backing stream and moves whole blocks
//! to and from block offsets.  [`read_external_chunk`] and
//! [`write_external_chunk`] move one payload's worth of bytes between a
//! block and a plain external stream, which has no headers and no padding.
//!
//! # Block count
//! `stream_block_count(len)` is `len / BLOCK_SIZE + 1`; the number
//! of live blocks in an archive of `len` bytes is one less than that.  A
//! trailing partial block is ignored.

use log::debug;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::block::{Block, BLOCK_SIZE, PAYLOAD_SIZE};
use crate::error::{ArchiveError, ArchiveResult};

/// Block count of a stream length, one unit past exact division.
pub fn stream_block_count(len: u64) -> u64 {
    len / BLOCK_SIZE as u64 + 1
}

/// Blocks an external input of `len` bytes occupies.  An empty input still
/// takes one zero-length block.
pub fn blocks_needed(len: u64) -> u64 {
    len.div_ceil(PAYLOAD_SIZE as u64).max(1)
}

// ── BlockStore ───────────────────────────────────────────────────────────────

pub struct BlockStore<S: Read + Write + Seek> {
    stream:     S,
    num_blocks: u64,
}

impl<S: Read + Write + Seek> BlockStore<S> {
    /// Wrap an existing archive stream, measuring its length for the block count.
    pub fn open(mut stream: S) -> ArchiveResult<Self> {
        let len = stream.seek(SeekFrom::End(0)).map_err(ArchiveError::FileRead)?;
        stream.seek(SeekFrom::Start(0)).map_err(ArchiveError::FileRead)?;
        let num_blocks = stream_block_count(len) - 1;
        debug!("opened block store: {len} bytes, {num_blocks} blocks");
        Ok(Self { stream, num_blocks })
    }

    /// Wrap an empty stream.
    pub fn empty(stream: S) -> Self {
        Self { stream, num_blocks: 0 }
    }

    pub fn num_blocks(&self) -> u64 { self.num_blocks }

    /// Read block `index` verbatim.
    pub fn read_block(&mut self, index: u64) -> ArchiveResult<Block> {
        if index >= self.num_blocks {
            return Err(ArchiveError::BadBlockIndex { index, num_blocks: self.num_blocks });
        }
        self.stream
            .seek(SeekFrom::Start(index * BLOCK_SIZE as u64))
            .map_err(ArchiveError::FileRead)?;
        let mut buf = [0u8; BLOCK_SIZE];
        self.stream.read_exact(&mut buf).map_err(ArchiveError::FileRead)?;
        Block::read(&buf[..]).map_err(ArchiveError::FileRead)
    }

    /// Write `block` verbatim, header and full payload, at `index`.
    /// Writing at or past the end grows the archive.
    pub fn write_block(&mut self, index: u64, block: &Block) -> ArchiveResult<()> {
        if index > self.num_blocks {
            // only dense growth; a gap would leave unreadable holes
            return Err(ArchiveError::BadBlockIndex { index, num_blocks: self.num_blocks });
        }
        self.stream
            .seek(SeekFrom::Start(index * BLOCK_SIZE as u64))
            .map_err(ArchiveError::FileWrite)?;
        let mut buf = [0u8; BLOCK_SIZE];
        block.write(&mut buf[..]).map_err(ArchiveError::FileWrite)?;
        self.stream.write_all(&buf).map_err(ArchiveError::FileWrite)?;
        if index == self.num_blocks {
            self.num_blocks += 1;
        }
        Ok(())
    }

    /// Every free block, ascending by index.
    pub fn scan_empty_blocks(&mut self) -> ArchiveResult<Vec<Block>> {
        self.scan(|b| b.header.is_empty)
    }

    /// Every live block whose payload came from a processor, ascending by index.
    pub fn scan_processed_blocks(&mut self) -> ArchiveResult<Vec<Block>> {
        self.scan(|b| !b.header.is_empty && b.header.is_processed)
    }

    fn scan<F: Fn(&Block) -> bool>(&mut self, keep: F) -> ArchiveResult<Vec<Block>> {
        let mut out = Vec::new();
        for index in 0..self.num_blocks {
            let block = self.read_block(index)?;
            if keep(&block) {
                out.push(block);
            }
        }
        Ok(out)
    }

    /// Visit every block of the chain starting at `first`, in chain order.
    ///
    /// Each block is checked before `visit` sees it: it must be live, carry
    /// its own index, belong to `name`, fit its payload, and point inside the
    /// archive.  A chain longer than the archive is reported as
    /// `BadBlockCount` rather than walked forever.
    pub fn walk_chain<F>(&mut self, first: u64, name: &str, mut visit: F) -> ArchiveResult<u64>
    where
        F: FnMut(&mut Self, Block) -> ArchiveResult<()>,
    {
        let mut index = first;
        let mut hops  = 0u64;
        loop {
            if hops >= self.num_blocks {
                return Err(ArchiveError::BadBlockCount { first, limit: self.num_blocks });
            }
            let block = self.read_block(index)?;
            validate_chain_block(&block, index, name, self.num_blocks)?;
            hops += 1;
            let next = block.header.next_block_index;
            let done = block.header.is_chain_end();
            visit(self, block)?;
            if done {
                debug!("walked chain of {name} from block {first}: {hops} blocks");
                return Ok(hops);
            }
            index = next;
        }
    }

    pub fn flush(&mut self) -> ArchiveResult<()> {
        self.stream.flush().map_err(ArchiveError::FileWrite)
    }

    pub fn get_ref(&self) -> &S { &self.stream }

    pub fn into_inner(self) -> S { self.stream }
}

fn validate_chain_block(block: &Block, index: u64, name: &str, num_blocks: u64) -> ArchiveResult<()> {
    let h = &block.header;
    if h.is_empty {
        return Err(ArchiveError::bad_block(index, "chain reaches a free block"));
    }
    if h.block_index != index {
        return Err(ArchiveError::bad_block(
            index,
            format!("header claims index {}", h.block_index),
        ));
    }
    if h.file_name.as_str() != name {
        return Err(ArchiveError::bad_block(
            index,
            format!("belongs to {:?}, expected {name:?}", h.file_name.as_str()),
        ));
    }
    if h.block_data_len > PAYLOAD_SIZE as u64 {
        return Err(ArchiveError::BadBlockLength {
            index,
            len: h.block_data_len,
            capacity: PAYLOAD_SIZE,
        });
    }
    if h.next_block_index >= num_blocks {
        return Err(ArchiveError::BadBlockIndex { index: h.next_block_index, num_blocks });
    }
    Ok(())
}

// ── External streams ─────────────────────────────────────────────────────────

/// Fill `block`'s payload from `src`, reading up to [`PAYLOAD_SIZE`] bytes.
///
/// The payload is zeroed first so padding never carries stale bytes.  Sets
/// `block_data_len` to the bytes read and marks the block live.
pub fn read_external_chunk<R: Read>(block: &mut Block, mut src: R) -> ArchiveResult<usize> {
    block.payload.fill(0);
    let mut filled = 0;
    while filled < PAYLOAD_SIZE {
        match src.read(&mut block.payload[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ArchiveError::FileRead(e)),
        }
    }
    block.header.block_data_len = filled as u64;
    block.header.is_empty = false;
    Ok(filled)
}

/// Write only the used part of `block`'s payload to `dst`.
pub fn write_external_chunk<W: Write>(block: &Block, mut dst: W) -> ArchiveResult<()> {
    dst.write_all(block.data()).map_err(ArchiveError::FileWrite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockName, NamePolicy};
    use std::io::Cursor;

    fn live(index: u64, next: u64, name: &str) -> Block {
        let mut b = Block::default();
        b.header.block_index = index;
        b.header.next_block_index = next;
        b.header.file_name = BlockName::new(name, NamePolicy::Reject).unwrap();
        b
    }

    /// Counts the calls that reach the underlying stream.
    struct Counting {
        inner:  Cursor<Vec<u8>>,
        reads:  usize,
        writes: usize,
    }

    impl Read for Counting {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reads += 1;
            self.inner.read(buf)
        }
    }

    impl Write for Counting {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            self.inner.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> { Ok(()) }
    }

    impl Seek for Counting {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> { self.inner.seek(pos) }
    }

    #[test]
    fn one_stream_call_per_block() {
        let stream = Counting { inner: Cursor::new(Vec::new()), reads: 0, writes: 0 };
        let mut store = BlockStore::empty(stream);
        let mut block = live(0, 0, "f");
        block.payload.fill(7);
        store.write_block(0, &block).unwrap();
        assert_eq!(store.get_ref().writes, 1);

        let back = store.read_block(0).unwrap();
        assert_eq!(store.get_ref().reads, 1);
        assert_eq!(back, block);
    }

    #[test]
    fn trailing_partial_block_is_ignored() {
        let mut bytes = Vec::new();
        live(0, 0, "f").write(&mut bytes).unwrap();
        bytes.extend_from_slice(&[0u8; 10]);
        let mut store = BlockStore::open(Cursor::new(bytes)).unwrap();
        assert_eq!(store.num_blocks(), 1);
        assert!(store.read_block(0).is_ok());
    }

    #[test]
    fn stream_block_count_adds_one() {
        assert_eq!(stream_block_count(0), 1);
        assert_eq!(stream_block_count(BLOCK_SIZE as u64 * 3), 4);
        assert_eq!(stream_block_count(BLOCK_SIZE as u64 * 3 + 10), 4);
    }

    #[test]
    fn blocks_needed_rounds_up() {
        assert_eq!(blocks_needed(0), 1);
        assert_eq!(blocks_needed(1), 1);
        assert_eq!(blocks_needed(PAYLOAD_SIZE as u64), 1);
        assert_eq!(blocks_needed(PAYLOAD_SIZE as u64 + 1), 2);
    }

    #[test]
    fn write_then_read_at_offset() {
        let mut store = BlockStore::empty(Cursor::new(Vec::new()));
        for i in 0..3 {
            store.write_block(i, &live(i, i, "f")).unwrap();
        }
        assert_eq!(store.num_blocks(), 3);
        assert_eq!(store.read_block(2).unwrap().header.block_index, 2);
        assert_eq!(store.into_inner().into_inner().len(), 3 * BLOCK_SIZE);
    }

    #[test]
    fn writing_past_the_end_is_rejected() {
        let mut store = BlockStore::empty(Cursor::new(Vec::new()));
        let err = store.write_block(1, &live(1, 1, "f")).unwrap_err();
        assert!(matches!(err, ArchiveError::BadBlockIndex { index: 1, .. }));
    }

    #[test]
    fn scans_return_ascending_matches() {
        let mut store = BlockStore::empty(Cursor::new(Vec::new()));
        for i in 0..5 {
            let mut b = live(i, i, "f");
            b.header.is_empty = i % 2 == 1;
            b.header.is_processed = i == 2;
            store.write_block(i, &b).unwrap();
        }
        let empty: Vec<u64> = store.scan_empty_blocks().unwrap()
            .iter().map(|b| b.header.block_index).collect();
        assert_eq!(empty, vec![1, 3]);
        let processed: Vec<u64> = store.scan_processed_blocks().unwrap()
            .iter().map(|b| b.header.block_index).collect();
        assert_eq!(processed, vec![2]);
    }

    #[test]
    fn reopen_counts_blocks_from_length() {
        let mut store = BlockStore::empty(Cursor::new(Vec::new()));
        store.write_block(0, &live(0, 0, "f")).unwrap();
        store.write_block(1, &live(1, 1, "g")).unwrap();
        let reopened = BlockStore::open(store.into_inner()).unwrap();
        assert_eq!(reopened.num_blocks(), 2);
    }

    #[test]
    fn external_chunk_zero_fills_tail() {
        let mut block = Block::default();
        block.payload.fill(0xAA);
        block.header.is_empty = true;
        let n = read_external_chunk(&mut block, &b"hello"[..]).unwrap();
        assert_eq!(n, 5);
        assert!(!block.header.is_empty);
        assert_eq!(block.data(), b"hello");
        assert!(block.payload[5..].iter().all(|&b| b == 0));

        let mut out = Vec::new();
        write_external_chunk(&block, &mut out).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn walk_follows_links_until_self_pointer() {
        let mut store = BlockStore::empty(Cursor::new(Vec::new()));
        store.write_block(0, &live(0, 2, "f")).unwrap();
        store.write_block(1, &live(1, 1, "g")).unwrap();
        store.write_block(2, &live(2, 2, "f")).unwrap();
        let mut seen = Vec::new();
        let hops = store.walk_chain(0, "f", |_, b| {
            seen.push(b.header.block_index);
            Ok(())
        }).unwrap();
        assert_eq!(hops, 2);
        assert_eq!(seen, vec![0, 2]);
    }

    #[test]
    fn walk_rejects_cycles() {
        let mut store = BlockStore::empty(Cursor::new(Vec::new()));
        store.write_block(0, &live(0, 1, "f")).unwrap();
        store.write_block(1, &live(1, 0, "f")).unwrap();
        let err = store.walk_chain(0, "f", |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, ArchiveError::BadBlockCount { first: 0, limit: 2 }));
    }

    #[test]
    fn walk_rejects_foreign_and_free_blocks() {
        let mut store = BlockStore::empty(Cursor::new(Vec::new()));
        store.write_block(0, &live(0, 1, "f")).unwrap();
        store.write_block(1, &live(1, 1, "g")).unwrap();
        let err = store.walk_chain(0, "f", |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, ArchiveError::BadBlock { index: 1, .. }));

        let mut free = live(2, 2, "f");
        free.header.is_empty = true;
        store.write_block(2, &free).unwrap();
        let err = store.walk_chain(2, "f", |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, ArchiveError::BadBlock { index: 2, .. }));
    }
}
