pub mod error;
pub mod block;
pub mod io_stream;
pub mod index;
pub mod processor;
pub mod observer;
pub mod archive;

pub use error::{ArchiveError, ArchiveResult, ErrorCode};
pub use block::{Block, BlockHeader, BlockName, NamePolicy, BLOCK_SIZE, HEADER_SIZE, PAYLOAD_SIZE};
pub use index::Toc;
pub use processor::{DataProcessor, ProcessorTag, get_processor};
pub use observer::{ActionType, ArchiveObserver, LogObserver};
pub use archive::{Archive, ArchiveOptions, ArchiveStats};
