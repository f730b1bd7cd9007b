//! Fixed on-disk block layout.
//!
//! Every block is exactly [`BLOCK_SIZE`] bytes: a [`HEADER_SIZE`]-byte
//! header followed by a [`PAYLOAD_SIZE`]-byte payload region.  Block `n`
//! lives at byte offset `n * BLOCK_SIZE`.
//!
//! # Header layout (little-endian, frozen)
//!
//! | offset | size | field              |
//! |-------:|-----:|--------------------|
//! |      0 |    8 | `block_index`      |
//! |      8 |    8 | `next_block_index` |
//! |     16 |    8 | `block_data_len`   |
//! |     24 |    1 | `is_empty`         |
//! |     25 |    1 | `is_processed`     |
//! |     26 |    8 | `processor_type`   |
//! |     34 |  222 | `block_file_name`  |
//!
//! A chain ends at the block whose `next_block_index` equals its own
//! `block_index`.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{ArchiveError, ArchiveResult};

pub const BLOCK_SIZE:         usize = 1024;
pub const HEADER_SIZE:        usize = 256;
pub const PAYLOAD_SIZE:       usize = BLOCK_SIZE - HEADER_SIZE;
pub const PROCESSOR_TAG_SIZE: usize = 8;
pub const FILE_NAME_SIZE:     usize = HEADER_SIZE - 3 * 8 - 2 - PROCESSOR_TAG_SIZE;

// ── NamePolicy / BlockName ────────────────────────────────────────────────────

/// What to do with a name longer than [`FILE_NAME_SIZE`] bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamePolicy {
    #[default]
    Reject,
    /// Cut at the last UTF-8 boundary that fits.
    Truncate,
}

/// A file name that is guaranteed to fit the header's name field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockName(String);

impl BlockName {
    pub fn new(name: &str, policy: NamePolicy) -> ArchiveResult<Self> {
        if name.is_empty() {
            return Err(ArchiveError::BadFilename("empty name".into()));
        }
        if name.contains('\0') {
            return Err(ArchiveError::BadFilename(format!("{name:?} contains NUL")));
        }
        if name.len() <= FILE_NAME_SIZE {
            return Ok(Self(name.to_owned()));
        }
        match policy {
            NamePolicy::Reject => Err(ArchiveError::BadFilename(format!(
                "{} bytes exceeds the {FILE_NAME_SIZE}-byte limit: {name}",
                name.len()
            ))),
            NamePolicy::Truncate => {
                let mut end = FILE_NAME_SIZE;
                while !name.is_char_boundary(end) {
                    end -= 1;
                }
                Ok(Self(name[..end].to_owned()))
            }
        }
    }

    /// Decode a NUL-padded name field as stored on disk.
    fn from_field(field: &[u8]) -> Self {
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        Self(String::from_utf8_lossy(&field[..end]).into_owned())
    }

    pub fn as_str(&self) -> &str { &self.0 }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl std::fmt::Display for BlockName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── BlockHeader ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub block_index:      u64,
    pub next_block_index: u64,
    pub block_data_len:   u64,
    pub is_empty:         bool,
    pub is_processed:     bool,
    /// Raw processor tag, NUL padded.  All zero when `is_processed` is false.
    pub processor_type:   [u8; PROCESSOR_TAG_SIZE],
    pub file_name:        BlockName,
}

impl BlockHeader {
    pub fn is_chain_end(&self) -> bool {
        self.next_block_index == self.block_index
    }

    /// Processor tag as text, `None` when the block is not processed.
    pub fn processor_tag(&self) -> Option<&str> {
        if !self.is_processed {
            return None;
        }
        let end = self.processor_type.iter().position(|&b| b == 0).unwrap_or(PROCESSOR_TAG_SIZE);
        std::str::from_utf8(&self.processor_type[..end]).ok()
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.block_index)?;
        writer.write_u64::<LittleEndian>(self.next_block_index)?;
        writer.write_u64::<LittleEndian>(self.block_data_len)?;
        writer.write_u8(self.is_empty as u8)?;
        writer.write_u8(self.is_processed as u8)?;
        writer.write_all(&self.processor_type)?;

        let mut name = [0u8; FILE_NAME_SIZE];
        // a lossily decoded on-disk name can exceed the field; clip it
        let bytes = self.file_name.as_str().as_bytes();
        let len = bytes.len().min(FILE_NAME_SIZE);
        name[..len].copy_from_slice(&bytes[..len]);
        writer.write_all(&name)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let block_index      = reader.read_u64::<LittleEndian>()?;
        let next_block_index = reader.read_u64::<LittleEndian>()?;
        let block_data_len   = reader.read_u64::<LittleEndian>()?;
        let is_empty         = reader.read_u8()? != 0;
        let is_processed     = reader.read_u8()? != 0;
        let mut processor_type = [0u8; PROCESSOR_TAG_SIZE];
        reader.read_exact(&mut processor_type)?;
        let mut name = [0u8; FILE_NAME_SIZE];
        reader.read_exact(&mut name)?;
        Ok(Self {
            block_index,
            next_block_index,
            block_data_len,
            is_empty,
            is_processed,
            processor_type,
            file_name: BlockName::from_field(&name),
        })
    }
}

// ── Block ─────────────────────────────────────────────────────────────────────

/// One header plus its full payload region, including padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header:  BlockHeader,
    pub payload: Box<[u8; PAYLOAD_SIZE]>,
}

impl Default for Block {
    fn default() -> Self {
        Self { header: BlockHeader::default(), payload: Box::new([0u8; PAYLOAD_SIZE]) }
    }
}

impl Block {
    /// The used part of the payload.
    pub fn data(&self) -> &[u8] {
        let len = (self.header.block_data_len as usize).min(PAYLOAD_SIZE);
        &self.payload[..len]
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        self.header.write(&mut writer)?;
        writer.write_all(&self.payload[..])
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let header = BlockHeader::read(&mut reader)?;
        let mut payload = Box::new([0u8; PAYLOAD_SIZE]);
        reader.read_exact(&mut payload[..])?;
        Ok(Self { header, payload })
    }
}
