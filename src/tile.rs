use std::io::Read;

use flate2::read::ZlibDecoder;
use serde::Serialize;

use crate::error::{ChunkReadError, NbtError};
use crate::index::EntryId;
use crate::position::Coord;
use crate::reader::{find, Reader};
use crate::region::ChunkData;
use crate::tag::{OwnedTagHeader, TagId};

/// Streaming scan buffer size for window extraction.
const WINDOW_BUF_LEN: usize = 16384;

/// Voxel context of a matched tag: where it sits in the world and whether
/// it was found inside a container inventory rather than directly on the
/// tile entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileEntityDetails {
    pub location: Coord,
    pub container: bool,
    pub count: i32,
}

impl<'a> Reader<'a> {
    /// Climbs parent entries from `entry` until a compound with direct
    /// `x`/`y`/`z` Int children gives the voxel location, then keeps
    /// climbing for a `Count` byte. Returns `None` when no ancestor
    /// carries the coordinate triple.
    pub fn tile_entity_details(
        &self,
        entry: EntryId,
    ) -> Result<Option<TileEntityDetails>, NbtError> {
        let index = self.index().ok_or(NbtError::NotIndexed)?;

        let start_parent = index.entry(entry).parent;
        let mut found_location = None;
        let mut count: i8 = 0;

        let mut current = start_parent;

        while let Some(current_id) = current {
            let current_entry = index.entry(current_id);

            let mut x = 0;
            let mut y = 0;
            let mut z = 0;
            let mut found = 0;

            for &child_id in &current_entry.children {
                let child = index.entry(child_id);
                let name = child.header.name;

                // Only Int coordinates and a Byte count qualify; a
                // same-named field of another type does not disqualify
                // ancestors further up.
                if name == b"x" && child.header.id == TagId::Int && found_location.is_none() {
                    x = self.copy(child.pos).read_int(TagId::Int)?;
                    found += 1;
                } else if name == b"y" && child.header.id == TagId::Int && found_location.is_none()
                {
                    y = self.copy(child.pos).read_int(TagId::Int)?;
                    found += 1;
                } else if name == b"z" && child.header.id == TagId::Int && found_location.is_none()
                {
                    z = self.copy(child.pos).read_int(TagId::Int)?;
                    found += 1;
                } else if name == b"Count" && child.header.id == TagId::Byte && count == 0 {
                    count = self.copy(child.pos).read_byte(TagId::Byte)?;
                }
            }

            if found == 3 {
                found_location = Some(Coord::new(x, y, z));

                // Coordinates directly on the matched tag's own compound
                // mean the tag sits on the tile entity itself.
                if current == start_parent {
                    return Ok(Some(TileEntityDetails {
                        location: Coord::new(x, y, z),
                        container: false,
                        count: 1,
                    }));
                }
            }

            current = current_entry.parent;
        }

        Ok(found_location.map(|location| TileEntityDetails {
            location,
            container: true,
            count: if count == 0 { 1 } else { count as i32 },
        }))
    }
}

/// Cuts the byte window of a chunk blob between the encoded header of the
/// `TileEntities` list and the encoded header of the `Entities` list,
/// streaming the zlib payload through a fixed-size buffer with overlap so
/// patterns spanning a read boundary are still seen. When the end marker
/// never appears, the whole buffered remainder is returned.
pub fn tile_entities_window(chunk: &ChunkData) -> Result<Vec<u8>, ChunkReadError> {
    let start_pattern = OwnedTagHeader::new(TagId::List, "TileEntities").to_bytes();
    let end_pattern = OwnedTagHeader::new(TagId::List, "Entities").to_bytes();

    let mut decoder = ZlibDecoder::new(chunk.data.as_slice());
    let mut buf = [0u8; WINDOW_BUF_LEN];

    // Phase 1: hunt for the start marker, carrying a pattern-length tail
    // across reads.
    let mut scan: Vec<u8> = Vec::new();
    let mut window: Vec<u8>;

    loop {
        let n = decoder
            .read(&mut buf)
            .map_err(|io_error| ChunkReadError::Decompress { io_error })?;

        if n == 0 {
            return Err(ChunkReadError::WindowNotFound);
        }

        scan.extend_from_slice(&buf[..n]);

        if let Some(pos) = find(&scan, &start_pattern) {
            window = scan.split_off(pos);
            break;
        }

        let keep = scan.len().saturating_sub(start_pattern.len());
        scan.drain(..keep);
    }

    // Phase 2: accumulate until the end marker, which cannot occur inside
    // the start marker, so the search never needs to back up.
    let mut searched = 0;

    loop {
        if let Some(pos) = find(&window[searched..], &end_pattern) {
            window.truncate(searched + pos);
            return Ok(window);
        }

        searched = window.len().saturating_sub(end_pattern.len());

        let n = decoder
            .read(&mut buf)
            .map_err(|io_error| ChunkReadError::Decompress { io_error })?;

        if n == 0 {
            return Ok(window);
        }

        window.extend_from_slice(&buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    use crate::index::tests::{byte_tag, int_tag, tile_entities_blob};
    use crate::position::{ChunkPos, Coord};
    use crate::reader::Reader;
    use crate::region::{ChunkData, CompressionScheme};
    use crate::tag::{OwnedTagHeader, TagId};

    fn zlib_chunk(blob: &[u8]) -> ChunkData {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(blob).unwrap();

        ChunkData {
            chunk: ChunkPos::new(0, 0, 0),
            scheme: CompressionScheme::Zlib,
            data: encoder.finish().unwrap(),
        }
    }

    #[test]
    fn test_details_on_tile_entity() {
        let blob = tile_entities_blob();
        let mut reader = Reader::new(&blob);
        reader.prepare_index(None).unwrap();

        let pattern = OwnedTagHeader::new(TagId::Int, "computerID").to_bytes();
        let first = reader.match_tags(&[pattern]).unwrap()[0];

        let details = reader.tile_entity_details(first).unwrap().unwrap();
        assert_eq!(details.location, Coord::new(10, 64, 20));
        assert!(!details.container);
        assert_eq!(details.count, 1);
    }

    /// Tile entity with coordinates, holding an inventory whose item tag
    /// carries the computer id three levels below the coordinates.
    fn container_blob(with_count: bool) -> Vec<u8> {
        let mut blob = OwnedTagHeader::new(TagId::Compound, "Level").to_bytes();
        blob.extend_from_slice(&OwnedTagHeader::new(TagId::List, "TileEntities").to_bytes());
        blob.push(TagId::Compound as u8);
        blob.extend_from_slice(&1i32.to_be_bytes());

        // Tile entity compound.
        blob.extend_from_slice(&int_tag("x", 10));
        blob.extend_from_slice(&int_tag("y", 64));
        blob.extend_from_slice(&int_tag("z", 20));

        // Items list with one slot.
        blob.extend_from_slice(&OwnedTagHeader::new(TagId::List, "Items").to_bytes());
        blob.push(TagId::Compound as u8);
        blob.extend_from_slice(&1i32.to_be_bytes());

        // Slot compound.
        if with_count {
            blob.extend_from_slice(&byte_tag("Count", 3));
        }
        blob.extend_from_slice(&OwnedTagHeader::new(TagId::Compound, "tag").to_bytes());
        blob.extend_from_slice(&int_tag("computerID", 42));
        blob.push(0); // end of tag
        blob.push(0); // end of slot

        blob.push(0); // end of tile entity
        blob.push(0); // end of Level
        blob
    }

    #[test]
    fn test_details_in_container() {
        let blob = container_blob(true);
        let mut reader = Reader::new(&blob);
        reader.prepare_index(None).unwrap();

        let pattern = OwnedTagHeader::new(TagId::Int, "computerID").to_bytes();
        let hit = reader.match_tags(&[pattern]).unwrap()[0];

        let details = reader.tile_entity_details(hit).unwrap().unwrap();
        assert_eq!(details.location, Coord::new(10, 64, 20));
        assert!(details.container);
        assert_eq!(details.count, 3);
    }

    #[test]
    fn test_details_in_container_without_count() {
        let blob = container_blob(false);
        let mut reader = Reader::new(&blob);
        reader.prepare_index(None).unwrap();

        let pattern = OwnedTagHeader::new(TagId::Int, "computerID").to_bytes();
        let hit = reader.match_tags(&[pattern]).unwrap()[0];

        let details = reader.tile_entity_details(hit).unwrap().unwrap();
        assert!(details.container);
        assert_eq!(details.count, 1);
    }

    #[test]
    fn test_wrong_typed_coordinate_does_not_disqualify_ancestors() {
        // The matched tag's own compound carries a String named "x"; the
        // real Int triple lives one level up.
        let mut blob = OwnedTagHeader::new(TagId::Compound, "Level").to_bytes();
        blob.extend_from_slice(&int_tag("x", 10));
        blob.extend_from_slice(&int_tag("y", 64));
        blob.extend_from_slice(&int_tag("z", 20));

        blob.extend_from_slice(&OwnedTagHeader::new(TagId::Compound, "data").to_bytes());
        blob.extend_from_slice(&OwnedTagHeader::new(TagId::String, "x").to_bytes());
        blob.extend_from_slice(&[0, 4]);
        blob.extend_from_slice(b"east");
        blob.extend_from_slice(&int_tag("computerID", 42));
        blob.push(0); // end of data

        blob.push(0); // end of Level

        let mut reader = Reader::new(&blob);
        reader.prepare_index(None).unwrap();

        let pattern = OwnedTagHeader::new(TagId::Int, "computerID").to_bytes();
        let hit = reader.match_tags(&[pattern]).unwrap()[0];

        let details = reader.tile_entity_details(hit).unwrap().unwrap();
        assert_eq!(details.location, Coord::new(10, 64, 20));
        assert!(details.container);
        assert_eq!(details.count, 1);
    }

    #[test]
    fn test_details_without_coordinates() {
        let mut blob = OwnedTagHeader::new(TagId::Compound, "Level").to_bytes();
        blob.extend_from_slice(&int_tag("computerID", 1));
        blob.push(0);

        let mut reader = Reader::new(&blob);
        reader.prepare_index(None).unwrap();

        let pattern = OwnedTagHeader::new(TagId::Int, "computerID").to_bytes();
        let hit = reader.match_tags(&[pattern]).unwrap()[0];

        assert!(reader.tile_entity_details(hit).unwrap().is_none());
    }

    #[test]
    fn test_window_extraction() {
        let blob = tile_entities_blob();
        let chunk = zlib_chunk(&blob);

        let window = crate::tile::tile_entities_window(&chunk).unwrap();

        let start = OwnedTagHeader::new(TagId::List, "TileEntities").to_bytes();
        let end = OwnedTagHeader::new(TagId::List, "Entities").to_bytes();

        assert!(window.starts_with(&start));
        assert!(crate::reader::find(&window, &end).is_none());

        // The window is still a queryable blob: it keeps both TileEntities
        // lists (one behind the Nested compound) and all four entries.
        let mut reader = Reader::new(&window);
        let selection = [OwnedTagHeader::new(TagId::List, "TileEntities")];
        reader.prepare_index(Some(&selection)).unwrap();

        let pattern = OwnedTagHeader::new(TagId::Int, "computerID").to_bytes();
        assert_eq!(reader.match_tags(&[pattern]).unwrap().len(), 4);
    }

    #[test]
    fn test_window_without_end_marker_returns_remainder() {
        let mut blob = OwnedTagHeader::new(TagId::Compound, "Level").to_bytes();
        blob.extend_from_slice(&OwnedTagHeader::new(TagId::List, "TileEntities").to_bytes());
        blob.push(TagId::Compound as u8);
        blob.extend_from_slice(&0i32.to_be_bytes());
        blob.push(0);

        let chunk = zlib_chunk(&blob);
        let window = crate::tile::tile_entities_window(&chunk).unwrap();

        let start = OwnedTagHeader::new(TagId::List, "TileEntities").to_bytes();
        assert!(window.starts_with(&start));
        assert_eq!(window.len(), blob.len() - 3 - "Level".len());
    }

    #[test]
    fn test_window_not_found() {
        let mut blob = OwnedTagHeader::new(TagId::Compound, "Level").to_bytes();
        blob.extend_from_slice(&int_tag("n", 1));
        blob.push(0);

        let chunk = zlib_chunk(&blob);

        match crate::tile::tile_entities_window(&chunk) {
            Err(crate::error::ChunkReadError::WindowNotFound) => {}
            other => panic!("Expected `WindowNotFound` but got `{:?}`", other),
        }
    }

    #[test]
    fn test_window_spanning_multiple_reads() {
        // Pad the front so the markers land past the first scan buffer.
        let mut blob = OwnedTagHeader::new(TagId::Compound, "Level").to_bytes();
        blob.extend_from_slice(&OwnedTagHeader::new(TagId::ByteArray, "pad").to_bytes());
        let pad = vec![0xabu8; 50_000];
        blob.extend_from_slice(&(pad.len() as i32).to_be_bytes());
        blob.extend_from_slice(&pad);

        blob.extend_from_slice(&OwnedTagHeader::new(TagId::List, "TileEntities").to_bytes());
        blob.push(TagId::Compound as u8);
        blob.extend_from_slice(&1i32.to_be_bytes());
        blob.extend_from_slice(&int_tag("x", 1));
        blob.push(0);

        blob.extend_from_slice(&OwnedTagHeader::new(TagId::List, "Entities").to_bytes());
        blob.push(TagId::Compound as u8);
        blob.extend_from_slice(&0i32.to_be_bytes());
        blob.push(0);

        let chunk = zlib_chunk(&blob);
        let window = crate::tile::tile_entities_window(&chunk).unwrap();

        let start = OwnedTagHeader::new(TagId::List, "TileEntities").to_bytes();
        let end = OwnedTagHeader::new(TagId::List, "Entities").to_bytes();

        assert!(window.starts_with(&start));
        assert!(crate::reader::find(&window, &end).is_none());
    }
}
