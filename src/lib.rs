//! Random-access gzip.
//!
//! An idzip file is an ordinary gzip stream whose members each carry a
//! dictzip-style `RA` extra subfield: the compressed length of every
//! fixed-size chunk. Chunks are deflated with a full flush between them, so
//! any chunk can be inflated on its own. Plain gzip tools still decode the
//! whole file.

pub mod api;
pub mod cache;
pub mod error;
pub mod fallback;
pub mod field;
pub mod file;
pub mod format;
pub mod reader;
pub mod seek_index;
pub mod writer;

pub use api::{
    compress, compress_file, compress_file_with, compress_with, decompress, decompress_file,
};
pub use cache::{CachePolicy, ChunkCache, ChunkKey, NoCache, RandomEvictionCache};
pub use error::{Error, Result};
pub use fallback::GzipFallback;
pub use file::{IdzipFile, IdzipStream};
pub use format::{CHUNK_LENGTH, MAX_MEMBER_SIZE, MAX_NUM_CHUNKS};
pub use reader::{is_idzip, IdzipReader, ReaderConfig, ReaderStats};
pub use seek_index::{ChunkEntry, ChunkIndex, MemberInfo};
pub use writer::{compress_member, compress_stream, IdzipWriter, WriterConfig};
