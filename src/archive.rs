//! High-level [`Archive`] API.
//!
//! ```no_run
//! use chainarc::archive::{Archive, ArchiveOptions};
//! use chainarc::observer::LogObserver;
//! use chainarc::processor::{get_processor, ProcessorTag};
//!
//! let mut ar = Archive::create("store", ArchiveOptions::default())?;   // store.arc
//! ar.add_observer(LogObserver);
//! ar.add("notes/readme.txt", None)?;
//! ar.add("notes/big.log", Some(get_processor(ProcessorTag::Compression)?))?;
//! ar.extract("notes/big.log", "/tmp/big.log")?;
//! ar.remove("notes/readme.txt")?;
//! ar.compact()?;
//! # Ok::<(), chainarc::ArchiveError>(())
//! ```

use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::block::{Block, BlockName, NamePolicy, BLOCK_SIZE};
use crate::error::{ArchiveError, ArchiveResult};
use crate::index::Toc;
use crate::io_stream::{blocks_needed, read_external_chunk, write_external_chunk, BlockStore};
use crate::observer::{ActionType, ArchiveObserver};
use crate::processor::{
    processor_for_name, sibling_path, DataProcessor, ProcessorTag, PROCESSED_SUFFIX, REVERSE_SUFFIX,
};

pub const ARCHIVE_EXTENSION: &str = "arc";
/// Printed twice after the file names by [`Archive::list`].
pub const LIST_SENTINEL: &str = "#";

// ── ArchiveOptions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    pub name_policy:       NamePolicy,
    /// Keep `*_processed.*` files after add and `*_reverse_process.*` files
    /// after extract instead of deleting them.
    pub keep_intermediate: bool,
}

// ── ArchiveStats ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveStats {
    pub blocks:           u64,
    pub free_blocks:      u64,
    pub processed_blocks: u64,
    pub files:            usize,
}

// ── Archive ───────────────────────────────────────────────────────────────────

pub struct Archive {
    path:      PathBuf,
    folder:    PathBuf,
    store:     BlockStore<File>,
    toc:       Toc,
    options:   ArchiveOptions,
    observers: Vec<Box<dyn ArchiveObserver>>,
}

impl Archive {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Create a new, empty archive, truncating any existing file.
    pub fn create<P: AsRef<Path>>(path: P, options: ArchiveOptions) -> ArchiveResult<Self> {
        let path = archive_path(path.as_ref());
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| ArchiveError::open(&path, e))?;
        info!("created archive {}", path.display());
        Ok(Self::assemble(path, BlockStore::empty(file), Toc::default(), options))
    }

    /// Open an existing archive and rebuild its TOC from the block headers.
    pub fn open<P: AsRef<Path>>(path: P, options: ArchiveOptions) -> ArchiveResult<Self> {
        let path = archive_path(path.as_ref());
        let file = File::options()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| ArchiveError::open(&path, e))?;
        let mut store = BlockStore::open(file)?;
        let toc = Toc::reconstruct(&mut store)?;
        info!("opened archive {}: {} files, {} blocks", path.display(), toc.len(), store.num_blocks());
        Ok(Self::assemble(path, store, toc, options))
    }

    pub fn open_or_create<P: AsRef<Path>>(path: P, options: ArchiveOptions) -> ArchiveResult<Self> {
        if archive_path(path.as_ref()).exists() {
            Self::open(path, options)
        } else {
            Self::create(path, options)
        }
    }

    fn assemble(path: PathBuf, store: BlockStore<File>, toc: Toc, options: ArchiveOptions) -> Self {
        let folder = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self { path, folder, store, toc, options, observers: Vec::new() }
    }

    // ── Observers ────────────────────────────────────────────────────────────

    pub fn add_observer<O: ArchiveObserver + 'static>(&mut self, observer: O) -> &mut Self {
        self.observers.push(Box::new(observer));
        self
    }

    fn notify(&self, action: ActionType, target: &str, ok: bool) {
        for observer in &self.observers {
            observer.notify(action, target, ok);
        }
    }

    // ── Add ──────────────────────────────────────────────────────────────────

    /// Store the external file at `path`, optionally transformed by `processor`.
    /// The stored name is `path` as given.
    pub fn add<P: AsRef<Path>>(
        &mut self,
        path: P,
        processor: Option<&dyn DataProcessor>,
    ) -> ArchiveResult<()> {
        let path = path.as_ref();
        let result = self.add_file(path, processor);
        self.notify(ActionType::Added, &path.to_string_lossy(), result.is_ok());
        result
    }

    /// Store `len` bytes read from `reader` under `name`, unprocessed.
    pub fn add_stream<R: Read>(&mut self, name: &str, reader: R, len: u64) -> ArchiveResult<()> {
        let result = self.insert_stream(name, reader, len, None);
        self.notify(ActionType::Added, name, result.is_ok());
        result
    }

    fn add_file(&mut self, input: &Path, processor: Option<&dyn DataProcessor>) -> ArchiveResult<()> {
        let text = input
            .to_str()
            .ok_or_else(|| ArchiveError::BadFilename(input.to_string_lossy().into_owned()))?;
        // reject before paying for the processor
        self.check_new_name(text)?;

        let (source, tag) = match processor {
            Some(p) => {
                p.process(input)?;
                (sibling_path(input, PROCESSED_SUFFIX)?, Some(p.tag()))
            }
            None => (input.to_path_buf(), None),
        };

        let inserted = File::open(&source)
            .map_err(|e| ArchiveError::open(&source, e))
            .and_then(|file| {
                let len = file.metadata().map_err(ArchiveError::FileRead)?.len();
                self.insert_stream(text, file, len, tag)
            });
        if tag.is_some() && !self.options.keep_intermediate {
            discard(&source);
        }
        inserted
    }

    fn check_new_name(&self, text: &str) -> ArchiveResult<BlockName> {
        let name = BlockName::new(text, self.options.name_policy)?;
        if self.toc.contains(name.as_str()) {
            return Err(ArchiveError::FileExists(name.to_string()));
        }
        Ok(name)
    }

    fn insert_stream<R: Read>(
        &mut self,
        text: &str,
        reader: R,
        len: u64,
        tag: Option<ProcessorTag>,
    ) -> ArchiveResult<()> {
        let name = self.check_new_name(text)?;
        let first = self.store_chain(&name, reader, len, tag)?;
        self.toc.add_entry(name.as_str(), first);
        info!("added {name} at block {first}");
        Ok(())
    }

    /// Chunk `len` bytes of `reader` into blocks, reusing free blocks first,
    /// and return the index of the first block written.  On failure the
    /// blocks already written are freed again.
    fn store_chain<R: Read>(
        &mut self,
        name: &BlockName,
        reader: R,
        len: u64,
        tag: Option<ProcessorTag>,
    ) -> ArchiveResult<u64> {
        let needed = blocks_needed(len);
        let free: Vec<u64> = self.store
            .scan_empty_blocks()?
            .iter()
            .map(|b| b.header.block_index)
            .collect();
        let positions = allocate(&free, self.store.num_blocks(), needed);
        debug!("{name}: {len} bytes into blocks {positions:?}");

        let mut reader = BufReader::new(reader);
        let mut written = Vec::with_capacity(positions.len());
        for (i, &pos) in positions.iter().enumerate() {
            let mut block = Block::default();
            block.header.block_index = pos;
            block.header.next_block_index = positions.get(i + 1).copied().unwrap_or(pos);
            block.header.file_name = name.clone();
            if let Some(tag) = tag {
                block.header.is_processed = true;
                block.header.processor_type = tag.to_field();
            }

            let step = read_external_chunk(&mut block, &mut reader)
                .and_then(|_| self.store.write_block(pos, &block));
            if let Err(e) = step {
                self.roll_back(&written);
                return Err(e);
            }
            written.push(pos);
        }
        if let Err(e) = self.store.flush() {
            self.roll_back(&written);
            return Err(e);
        }
        Ok(positions[0])
    }

    /// Best-effort: free the blocks an aborted add already wrote.
    fn roll_back(&mut self, written: &[u64]) {
        for &pos in written {
            let freed = self.store.read_block(pos).and_then(|mut block| {
                block.header.is_empty = true;
                block.header.block_data_len = 0;
                self.store.write_block(pos, &block)
            });
            if let Err(e) = freed {
                warn!("rollback could not free block {pos}: {e}");
            }
        }
    }

    // ── Extract ──────────────────────────────────────────────────────────────

    /// Reassemble stored file `name` into `dest`.
    pub fn extract<P: AsRef<Path>>(&mut self, name: &str, dest: P) -> ArchiveResult<()> {
        let result = self.extract_file(name, dest.as_ref());
        self.notify(ActionType::Extracted, name, result.is_ok());
        result
    }

    fn extract_file(&mut self, name: &str, dest: &Path) -> ArchiveResult<()> {
        let (key, first) = self.resolve(name)?;
        let head = self.store.read_block(first)?;
        let processed = head.header.is_processed;
        let processor = match head.header.processor_tag() {
            Some(tag) => Some(processor_for_name(tag)?),
            None if processed => {
                return Err(ArchiveError::BadProcessor("unreadable processor tag".into()));
            }
            None => None,
        };

        let staging = match processor {
            Some(_) => sibling_path(dest, REVERSE_SUFFIX)?,
            None    => dest.to_path_buf(),
        };
        let file = File::create(&staging).map_err(|e| ArchiveError::open(&staging, e))?;
        let mut out = BufWriter::new(file);

        let walked = self
            .store
            .walk_chain(first, &key, |_, block| {
                if block.header.is_processed != processed {
                    return Err(ArchiveError::bad_block(
                        block.header.block_index,
                        "processed flag differs from chain head",
                    ));
                }
                write_external_chunk(&block, &mut out)
            })
            .and_then(|hops| out.flush().map(|_| hops).map_err(ArchiveError::FileWrite));
        drop(out);
        let hops = match walked {
            Ok(hops) => hops,
            Err(e) => {
                discard(&staging);
                return Err(e);
            }
        };

        if let Some(p) = processor {
            let restored = p.reverse_process(dest);
            if !self.options.keep_intermediate {
                discard(&staging);
            }
            restored?;
        }
        info!("extracted {key} ({hops} blocks) to {}", dest.display());
        Ok(())
    }

    // ── Remove ───────────────────────────────────────────────────────────────

    /// Free every block of `name` and drop it from the TOC.
    pub fn remove(&mut self, name: &str) -> ArchiveResult<()> {
        let result = self.remove_file(name);
        self.notify(ActionType::Removed, name, result.is_ok());
        result
    }

    fn remove_file(&mut self, name: &str) -> ArchiveResult<()> {
        let (key, first) = self.resolve(name)?;
        let freed = self.store.walk_chain(first, &key, |store, mut block| {
            block.header.is_empty = true;
            block.header.block_data_len = 0;
            store.write_block(block.header.block_index, &block)
        })?;
        self.store.flush()?;
        self.toc.remove_entry(&key);
        info!("removed {key}, freed {freed} blocks");
        Ok(())
    }

    // ── List / dump ──────────────────────────────────────────────────────────

    /// Write each stored file's display name, then two sentinel lines.
    /// Returns the number of files.
    pub fn list<W: Write>(&self, out: &mut W) -> ArchiveResult<usize> {
        let result = self.write_list(out);
        self.notify(ActionType::Listed, "", result.is_ok());
        result
    }

    fn write_list<W: Write>(&self, out: &mut W) -> ArchiveResult<usize> {
        for (name, _) in self.toc.iter() {
            writeln!(out, "{}", self.display_name(name)).map_err(ArchiveError::FileWrite)?;
        }
        writeln!(out, "{LIST_SENTINEL}\n{LIST_SENTINEL}").map_err(ArchiveError::FileWrite)?;
        Ok(self.toc.len())
    }

    /// Write one `index empty name` line per block.  Returns the number of
    /// blocks scanned.
    ///
    /// Free blocks print only `index 1`: the name left in a freed header is
    /// stale and no longer owns the block.
    pub fn debug_dump<W: Write>(&mut self, out: &mut W) -> ArchiveResult<u64> {
        let result = self.write_dump(out);
        self.notify(ActionType::Dumped, "", result.is_ok());
        result
    }

    fn write_dump<W: Write>(&mut self, out: &mut W) -> ArchiveResult<u64> {
        let total = self.store.num_blocks();
        for index in 0..total {
            let h = self.store.read_block(index)?.header;
            let line = if h.is_empty {
                writeln!(out, "{} 1", h.block_index)
            } else {
                writeln!(out, "{} 0 {}", h.block_index, self.display_name(h.file_name.as_str()))
            };
            line.map_err(ArchiveError::FileWrite)?;
        }
        Ok(total)
    }

    // ── Compact ──────────────────────────────────────────────────────────────

    /// Rewrite the archive without its free blocks, remapping every chain
    /// link and TOC entry.  Returns the number of blocks kept.
    pub fn compact(&mut self) -> ArchiveResult<u64> {
        let result = self.compact_blocks();
        self.notify(ActionType::Compacted, "", result.is_ok());
        result
    }

    fn compact_blocks(&mut self) -> ArchiveResult<u64> {
        let total = self.store.num_blocks();
        let mut remap: Vec<Option<u64>> = Vec::with_capacity(total as usize);
        let mut live = 0u64;
        for index in 0..total {
            if self.store.read_block(index)?.header.is_empty {
                remap.push(None);
            } else {
                remap.push(Some(live));
                live += 1;
            }
        }
        let moved = |old: u64| remap.get(old as usize).copied().flatten();

        let mut toc = self.toc.clone();
        toc.remap(moved)?;

        let tmp = compact_path(&self.path);
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| ArchiveError::open(&tmp, e))?;
        let mut out = BlockStore::empty(file);

        let replaced = copy_live_blocks(&mut self.store, &mut out, moved)
            .and_then(|_| out.get_ref().sync_all().map_err(ArchiveError::FileWrite))
            .and_then(|_| fs::rename(&tmp, &self.path).map_err(ArchiveError::FileWrite));
        if let Err(e) = replaced {
            discard(&tmp);
            return Err(e);
        }

        // the handle follows the renamed inode
        self.store = out;
        self.toc = toc;
        info!(
            "compacted {}: {total} -> {live} blocks ({} bytes reclaimed)",
            self.path.display(),
            (total - live) * BLOCK_SIZE as u64
        );
        Ok(live)
    }

    // ── Inspection ───────────────────────────────────────────────────────────

    /// Block indices of `name`'s chain, in chain order.
    pub fn chain(&mut self, name: &str) -> ArchiveResult<Vec<u64>> {
        let (key, first) = self.resolve(name)?;
        let mut indices = Vec::new();
        self.store.walk_chain(first, &key, |_, block| {
            indices.push(block.header.block_index);
            Ok(())
        })?;
        Ok(indices)
    }

    pub fn stats(&mut self) -> ArchiveResult<ArchiveStats> {
        Ok(ArchiveStats {
            blocks:           self.store.num_blocks(),
            free_blocks:      self.store.scan_empty_blocks()?.len() as u64,
            processed_blocks: self.store.scan_processed_blocks()?.len() as u64,
            files:            self.toc.len(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    pub fn toc(&self) -> &Toc { &self.toc }

    pub fn num_blocks(&self) -> u64 { self.store.num_blocks() }

    pub fn path(&self) -> &Path { &self.path }

    // ── Names ────────────────────────────────────────────────────────────────

    /// Map a caller-supplied name to its TOC key and first block.  A name not
    /// stored verbatim is retried under the archive's folder.
    fn resolve(&self, name: &str) -> ArchiveResult<(String, u64)> {
        if let Ok(first) = self.toc.lookup(name) {
            return Ok((name.to_owned(), first));
        }
        let joined = self.folder.join(name).to_string_lossy().into_owned();
        match self.toc.lookup(&joined) {
            Ok(first) => Ok((joined, first)),
            Err(_) => Err(ArchiveError::FileNotFound(name.to_owned())),
        }
    }

    /// `name` with the archive's folder prefix stripped.
    fn display_name(&self, name: &str) -> String {
        match Path::new(name).strip_prefix(&self.folder) {
            Ok(rel) if !self.folder.as_os_str().is_empty() => rel.to_string_lossy().into_owned(),
            _ => name.to_owned(),
        }
    }
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// `path` with `.arc` appended unless it already has that extension.
pub fn archive_path(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|e| e == ARCHIVE_EXTENSION) {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ARCHIVE_EXTENSION);
    PathBuf::from(name)
}

fn compact_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".compact");
    PathBuf::from(name)
}

/// Positions for `needed` blocks: free blocks first in the order given, then
/// fresh blocks appended from `end`.
fn allocate(free: &[u64], end: u64, needed: u64) -> Vec<u64> {
    let reused = free.iter().copied().take(needed as usize);
    let fresh = end..end + needed.saturating_sub(free.len() as u64);
    reused.chain(fresh).collect()
}

fn copy_live_blocks<F: Fn(u64) -> Option<u64>>(
    src: &mut BlockStore<File>,
    dst: &mut BlockStore<File>,
    moved: F,
) -> ArchiveResult<()> {
    for index in 0..src.num_blocks() {
        let mut block = src.read_block(index)?;
        if block.header.is_empty {
            continue;
        }
        let new_index = moved(index).ok_or(ArchiveError::BadBlockIndex {
            index,
            num_blocks: src.num_blocks(),
        })?;
        let new_next = moved(block.header.next_block_index).ok_or_else(|| {
            ArchiveError::bad_block(index, format!(
                "links to block {}, which is not live",
                block.header.next_block_index
            ))
        })?;
        block.header.block_index = new_index;
        block.header.next_block_index = new_next;
        dst.write_block(new_index, &block)?;
    }
    Ok(())
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("could not remove {}: {e}", path.display());
    }
}
