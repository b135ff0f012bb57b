use std::io;

use crate::tag::TagId;

/// Possible errors while opening a region file.
#[derive(Debug)]
pub enum RegionOpenError {
    /// The filename does not have the `r.<X>.<Z>.mca` shape.
    BadFilename { reason: &'static str },
    /// The file ended before the 4096-byte locator header.
    ///
    /// Region file are corrupted or still being written.
    ShortHeader {
        /// Bytes actually read.
        read: usize,
    },
    /// I/O error which happened while were opening or reading the file.
    IOError { io_error: io::Error },
}

impl From<io::Error> for RegionOpenError {
    fn from(io_error: io::Error) -> Self {
        RegionOpenError::IOError { io_error }
    }
}

/// Possible errors while loading a chunk.
#[derive(Debug)]
pub enum ChunkReadError {
    /// Chunk at specified coordinates inside region not found.
    ///
    /// The locator slot's sector pointer is zero.
    ChunkNotFound { chunk_x: u8, chunk_z: u8 },
    /// Currently are only 2 types of compression: Gzip and Zlib.
    ///
    /// This should not occur under normal conditions.
    ///
    /// Region file are corrupted or was introduced new compression type.
    UnsupportedCompressionScheme {
        /// Compression scheme type id.
        compression_scheme: u8,
    },
    /// The compressed payload did not inflate cleanly.
    Decompress { io_error: io::Error },
    /// The chunk has no `TileEntities` list to cut a window around.
    WindowNotFound,
    /// I/O Error which happened while were reading chunk data from region file.
    IOError { io_error: io::Error },
}

impl From<io::Error> for ChunkReadError {
    fn from(io_error: io::Error) -> Self {
        ChunkReadError::IOError { io_error }
    }
}

/// Possible errors while decoding a tagged blob or using its index.
#[derive(Debug)]
pub enum NbtError {
    /// A read would advance the cursor past the end of the blob.
    Truncated {
        /// Cursor position at the failed read.
        cursor: usize,
        /// Bytes the read needed.
        needed: usize,
        /// Blob length.
        len: usize,
    },
    /// A tag id byte outside the 13 known values.
    InvalidTagId { value: u8 },
    /// The destination shape does not match the tag id at the cursor.
    TypeMismatch { expected: TagId, found: TagId },
    /// An End tag terminated the enclosing compound.
    ///
    /// Expected sentinel, not a failure. Callers unwind one level.
    EndOfCompound,
    /// The cursor is not at the payload start of any indexed tag.
    InvalidHeaderLocation,
    /// An indexed entry other than the root has no parent.
    ///
    /// This should not occur under normal conditions.
    IndexCorrupt,
    /// Indexing is required before calling this method.
    NotIndexed,
    /// The index build failed part way through; no partial index is kept.
    IndexBuild { detail: String },
}
