//! Structural queries over voxel-world region storage.
//!
//! A region file packs 32x32 chunks of compressed, tagged binary blobs.
//! This crate reads that container, decodes the tagged format through a
//! zero-copy cursor, and builds a selective structural index so callers
//! can find tags by name, walk back up to their enclosing tile entity,
//! and report world coordinates — without materializing whole blobs.

pub mod error;
pub mod index;
pub mod position;
pub mod provider;
pub mod reader;
pub mod region;
pub mod tag;
pub mod tile;

pub use crate::error::{ChunkReadError, NbtError, RegionOpenError};
pub use crate::index::{build_index, Breadcrumb, EntryId, Index, IndexEntry};
pub use crate::position::{ChunkPos, Coord, RegionPos};
pub use crate::reader::{Reader, Value};
pub use crate::region::{
    decompress_gzip, decompress_zlib, ChunkData, CompressionScheme, RegionReader,
};
pub use crate::tag::{OwnedTagHeader, TagHeader, TagId};
pub use crate::tile::{tile_entities_window, TileEntityDetails};
