//! Data processors: reversible whole-file transforms applied before a file
//! is chunked into blocks and undone after its chain is reassembled.
//!
//! # Naming convention
//! A processor never returns a path.  [`DataProcessor::process`] reads
//! `dir/name.ext` and writes `dir/name_processed.ext`;
//! [`DataProcessor::reverse_process`] reads `dir/name_reverse_process.ext`
//! and writes `dir/name.ext`.  The archive derives both sibling paths with
//! [`sibling_path`].
//!
//! # Identity
//! Every processor carries an explicit [`ProcessorTag`].  The tag's short
//! name is what lands in each block header; on extract it is resolved back
//! to an implementation through [`processor_for_name`].

use log::warn;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::block::{PAYLOAD_SIZE, PROCESSOR_TAG_SIZE};
use crate::error::{ArchiveError, ArchiveResult};

pub const PROCESSED_SUFFIX: &str = "_processed";
pub const REVERSE_SUFFIX:   &str = "_reverse_process";

/// Default zstd level for [`CompressionProcessor`].
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

// ── ProcessorTag ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorTag {
    /// Streaming zstd.
    Compression,
    /// LZ4 frame format.
    Lz4,
}

impl ProcessorTag {
    pub const ALL: [ProcessorTag; 2] = [ProcessorTag::Compression, ProcessorTag::Lz4];

    /// On-disk short name.
    pub fn name(self) -> &'static str {
        match self {
            ProcessorTag::Compression => "comp",
            ProcessorTag::Lz4         => "lz4f",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == s)
    }

    /// The tag as a NUL-padded header field.
    pub fn to_field(self) -> [u8; PROCESSOR_TAG_SIZE] {
        let mut field = [0u8; PROCESSOR_TAG_SIZE];
        let name = self.name().as_bytes();
        field[..name.len()].copy_from_slice(name);
        field
    }
}

impl std::fmt::Display for ProcessorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── DataProcessor ────────────────────────────────────────────────────────────

pub trait DataProcessor: Send + Sync {
    fn tag(&self) -> ProcessorTag;

    /// Forward transform, streaming `src` into `dst`.
    fn encode(&self, src: &mut dyn Read, dst: &mut dyn Write) -> io::Result<()>;

    /// Inverse of [`encode`](Self::encode).
    fn decode(&self, src: &mut dyn Read, dst: &mut dyn Write) -> io::Result<()>;

    /// Transform `input` into its `_processed` sibling.
    fn process(&self, input: &Path) -> ArchiveResult<()> {
        let output = sibling_path(input, PROCESSED_SUFFIX)?;
        transform_file(self.tag(), input, &output, |src, dst| self.encode(src, dst))
    }

    /// Restore `target` from its `_reverse_process` sibling.
    fn reverse_process(&self, target: &Path) -> ArchiveResult<()> {
        let input = sibling_path(target, REVERSE_SUFFIX)?;
        transform_file(self.tag(), &input, target, |src, dst| self.decode(src, dst))
    }
}

/// `dir/name.ext` → `dir/name{suffix}.ext`; `dir/name` → `dir/name{suffix}`.
pub fn sibling_path(path: &Path, suffix: &str) -> ArchiveResult<PathBuf> {
    let stem = path
        .file_stem()
        .ok_or_else(|| ArchiveError::BadPath(path.display().to_string()))?;
    let mut name = stem.to_os_string();
    name.push(suffix);
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    Ok(path.with_file_name(name))
}

fn transform_file<F>(tag: ProcessorTag, input: &Path, output: &Path, run: F) -> ArchiveResult<()>
where
    F: FnOnce(&mut dyn Read, &mut dyn Write) -> io::Result<()>,
{
    let mut src = File::open(input).map_err(|e| ArchiveError::open(input, e))?;
    let file = File::create(output).map_err(|e| ArchiveError::open(output, e))?;
    let mut dst = BufWriter::new(file);

    let result = run(&mut src, &mut dst).and_then(|_| dst.flush());
    drop(dst);
    if let Err(e) = result {
        if let Err(rm) = fs::remove_file(output) {
            warn!("could not remove partial output {}: {rm}", output.display());
        }
        return Err(ArchiveError::BadProcessor(format!("{tag}: {e}")));
    }
    Ok(())
}

/// Copy `src` to `dst` one payload-sized buffer at a time.
fn pump<R: Read + ?Sized, W: Write + ?Sized>(src: &mut R, dst: &mut W) -> io::Result<()> {
    let mut buf = [0u8; PAYLOAD_SIZE];
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        dst.write_all(&buf[..n])?;
    }
}

// ── Built-in processors ──────────────────────────────────────────────────────

pub struct CompressionProcessor {
    pub level: i32,
}

impl Default for CompressionProcessor {
    fn default() -> Self { Self { level: DEFAULT_COMPRESSION_LEVEL } }
}

impl DataProcessor for CompressionProcessor {
    fn tag(&self) -> ProcessorTag { ProcessorTag::Compression }

    fn encode(&self, src: &mut dyn Read, dst: &mut dyn Write) -> io::Result<()> {
        let mut enc = zstd::stream::write::Encoder::new(dst, self.level)?;
        pump(src, &mut enc)?;
        enc.finish()?;
        Ok(())
    }

    fn decode(&self, src: &mut dyn Read, dst: &mut dyn Write) -> io::Result<()> {
        let mut dec = zstd::stream::read::Decoder::new(src)?;
        pump(&mut dec, dst)
    }
}

pub struct Lz4Processor;

impl DataProcessor for Lz4Processor {
    fn tag(&self) -> ProcessorTag { ProcessorTag::Lz4 }

    fn encode(&self, src: &mut dyn Read, dst: &mut dyn Write) -> io::Result<()> {
        let mut enc = lz4_flex::frame::FrameEncoder::new(dst);
        pump(src, &mut enc)?;
        enc.finish()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(())
    }

    fn decode(&self, src: &mut dyn Read, dst: &mut dyn Write) -> io::Result<()> {
        let mut dec = lz4_flex::frame::FrameDecoder::new(src);
        pump(&mut dec, dst)
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

fn registry() -> &'static HashMap<ProcessorTag, Box<dyn DataProcessor>> {
    static REGISTRY: OnceLock<HashMap<ProcessorTag, Box<dyn DataProcessor>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<ProcessorTag, Box<dyn DataProcessor>> = HashMap::new();
        map.insert(ProcessorTag::Compression, Box::new(CompressionProcessor::default()));
        map.insert(ProcessorTag::Lz4, Box::new(Lz4Processor));
        map
    })
}

/// The registered implementation for `tag`.
pub fn get_processor(tag: ProcessorTag) -> ArchiveResult<&'static dyn DataProcessor> {
    registry()
        .get(&tag)
        .map(|p| p.as_ref())
        .ok_or_else(|| ArchiveError::BadProcessor(format!("no processor registered for {tag}")))
}

/// Resolve an on-disk tag name.  Unknown names fail with `BadProcessor`.
pub fn processor_for_name(name: &str) -> ArchiveResult<&'static dyn DataProcessor> {
    let tag = ProcessorTag::from_name(name)
        .ok_or_else(|| ArchiveError::BadProcessor(format!("unknown processor tag {name:?}")))?;
    get_processor(tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sibling_names_insert_before_extension() {
        let p = sibling_path(Path::new("/tmp/dir/report.txt"), PROCESSED_SUFFIX).unwrap();
        assert_eq!(p, Path::new("/tmp/dir/report_processed.txt"));
        let p = sibling_path(Path::new("notes"), REVERSE_SUFFIX).unwrap();
        assert_eq!(p, Path::new("notes_reverse_process"));
        let p = sibling_path(Path::new("a.tar.gz"), PROCESSED_SUFFIX).unwrap();
        assert_eq!(p, Path::new("a.tar_processed.gz"));
    }

    #[test]
    fn tags_resolve_by_name() {
        for tag in ProcessorTag::ALL {
            assert_eq!(ProcessorTag::from_name(tag.name()), Some(tag));
            assert_eq!(processor_for_name(tag.name()).unwrap().tag(), tag);
            assert_eq!(&tag.to_field()[..tag.name().len()], tag.name().as_bytes());
        }
        assert!(matches!(processor_for_name("zip"), Err(ArchiveError::BadProcessor(_))));
    }

    #[test]
    fn encode_decode_restores_bytes() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        for tag in ProcessorTag::ALL {
            let p = get_processor(tag).unwrap();
            let mut packed = Vec::new();
            p.encode(&mut &data[..], &mut packed).unwrap();
            assert!(packed.len() < data.len(), "{tag} did not shrink repetitive input");
            let mut restored = Vec::new();
            p.decode(&mut &packed[..], &mut restored).unwrap();
            assert_eq!(restored, data);
        }
    }

    #[test]
    fn process_and_reverse_use_sibling_files() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("data.bin");
        fs::write(&input, vec![7u8; 4096]).unwrap();

        let p = CompressionProcessor::default();
        p.process(&input).unwrap();
        let processed = dir.path().join("data_processed.bin");
        assert!(processed.exists());

        let target = dir.path().join("out.bin");
        fs::copy(&processed, dir.path().join("out_reverse_process.bin")).unwrap();
        p.reverse_process(&target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), vec![7u8; 4096]);
    }

    #[test]
    fn failed_reverse_leaves_no_output() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("broken.bin");
        fs::write(dir.path().join("broken_reverse_process.bin"), b"not zstd at all").unwrap();
        let err = CompressionProcessor::default().reverse_process(&target).unwrap_err();
        assert!(matches!(err, ArchiveError::BadProcessor(_)));
        assert!(!target.exists());
    }
}
