use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::{GzDecoder, ZlibDecoder};
use highway::{HighwayHash, HighwayHasher, Key};
use log::debug;

use crate::error::{ChunkReadError, RegionOpenError};
use crate::position::{ChunkPos, RegionPos};

/// Region locator header length in bytes: 1024 four-byte slots.
const REGION_HEADER_BYTES_LENGTH: usize = 4096;
/// Shift from sector index to byte position (4 KiB sectors).
const SECTOR_SHIFT: u32 = 12;

/// Gzip compression type value.
const GZIP_COMPRESSION_TYPE: u8 = 1;
/// Zlib compression type value.
const ZLIB_COMPRESSION_TYPE: u8 = 2;

/// Key for content-addressing compressed chunk payloads. Changing it
/// invalidates every stored hash, so it is fixed here rather than
/// configurable.
const HASH_KEY: [u8; 32] = [
    0x8f, 0x7f, 0x9e, 0x63, 0x9f, 0x74, 0x8a, 0xc3, 0xe4, 0x21, 0xe8, 0xda, 0x7a, 0x7e, 0xbc,
    0x12, 0x3a, 0xec, 0x2e, 0x15, 0xc4, 0xf4, 0x7d, 0x18, 0x8c, 0x7e, 0x2d, 0xf0, 0x86, 0x01,
    0x26, 0xd9,
];

/// Compression scheme used for a chunk payload.
///
/// In practice, you will only ever encounter chunks compressed using zlib;
/// gzip appears in player data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionScheme {
    Gzip,
    Zlib,
}

impl CompressionScheme {
    fn from_byte(byte: u8) -> Result<CompressionScheme, ChunkReadError> {
        match byte {
            GZIP_COMPRESSION_TYPE => Ok(CompressionScheme::Gzip),
            ZLIB_COMPRESSION_TYPE => Ok(CompressionScheme::Zlib),
            compression_scheme => {
                Err(ChunkReadError::UnsupportedCompressionScheme { compression_scheme })
            }
        }
    }
}

/// Compressed payload of one chunk slot, as stored on disk.
#[derive(Debug, Clone)]
pub struct ChunkData {
    /// World chunk coordinate of the slot this payload came from.
    pub chunk: ChunkPos,
    /// Framing of `data`.
    pub scheme: CompressionScheme,
    /// Compressed bytes, without the length/scheme framing.
    pub data: Vec<u8>,
}

impl ChunkData {
    /// Inflates the payload into the raw tagged blob.
    pub fn decompress(&self) -> Result<Vec<u8>, ChunkReadError> {
        match self.scheme {
            CompressionScheme::Zlib => decompress_zlib(&self.data),
            CompressionScheme::Gzip => decompress_gzip(&self.data),
        }
    }

    /// 128-bit keyed hash of the compressed payload, for content
    /// addressing.
    pub fn hash(&self) -> [u8; 16] {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&HASH_KEY[i * 8..i * 8 + 8]);
            *word = u64::from_le_bytes(bytes);
        }

        let mut hasher = HighwayHasher::new(Key(words));
        hasher.append(&self.data);
        let halves = hasher.finalize128();

        let mut hash = [0u8; 16];
        hash[..8].copy_from_slice(&halves[0].to_le_bytes());
        hash[8..].copy_from_slice(&halves[1].to_le_bytes());
        hash
    }
}

/// Inflates a zlib-framed blob.
pub fn decompress_zlib(data: &[u8]) -> Result<Vec<u8>, ChunkReadError> {
    let mut decompressed = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut decompressed)
        .map_err(|io_error| ChunkReadError::Decompress { io_error })?;

    Ok(decompressed)
}

/// Inflates a gzip-framed blob, the framing used by player data files.
pub fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>, ChunkReadError> {
    let mut decompressed = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut decompressed)
        .map_err(|io_error| ChunkReadError::Decompress { io_error })?;

    Ok(decompressed)
}

/// Read-only view of one region file: the 4096-byte locator header held in
/// memory, chunk payloads read on demand.
pub struct RegionReader {
    /// Position parsed from the filename.
    region: RegionPos,
    /// Locator header: 1024 entries of 3-byte sector index + 1-byte count.
    header: Vec<u8>,
    /// File in which region are stored.
    file: File,
}

impl RegionReader {
    /// Opens a region file, validating its `r.<X>.<Z>.mca` name and
    /// reading the locator header eagerly.
    pub fn open(path: &Path) -> Result<RegionReader, RegionOpenError> {
        let region = RegionPos::from_filename(path)?;
        let mut file = File::open(path)?;

        let mut header = vec![0u8; REGION_HEADER_BYTES_LENGTH];
        let mut read = 0;

        while read < header.len() {
            match file.read(&mut header[read..])? {
                0 => return Err(RegionOpenError::ShortHeader { read }),
                n => read += n,
            }
        }

        debug!(target: "anvil-query", "opened region x: {}, z: {}", region.x, region.z);

        Ok(RegionReader {
            region,
            header,
            file,
        })
    }

    pub fn region(&self) -> RegionPos {
        self.region
    }

    /// Reads the payload for the slot owning `chunk`. The slot is selected
    /// by the chunk's low 5 bits on each axis; an empty slot reports
    /// `ChunkNotFound`.
    pub fn read_chunk(&mut self, chunk: ChunkPos) -> Result<ChunkData, ChunkReadError> {
        let offset = chunk.region_chunk_offset();

        match self.read_slot(offset)? {
            Some(chunk_data) => Ok(chunk_data),
            None => Err(ChunkReadError::ChunkNotFound {
                chunk_x: (chunk.x & 31) as u8,
                chunk_z: (chunk.z & 31) as u8,
            }),
        }
    }

    /// Streams every occupied slot in locator order (which is not raster
    /// order in the world) into `sink`.
    pub fn read_all_chunks(
        &mut self,
        mut sink: impl FnMut(ChunkData),
    ) -> Result<(), ChunkReadError> {
        for chunk in self.chunks() {
            sink(chunk?);
        }

        Ok(())
    }

    /// Iterator over the occupied slots in locator order.
    pub fn chunks(&mut self) -> Chunks<'_> {
        Chunks {
            region: self,
            offset: 0,
        }
    }

    /// Reads the slot at a locator `offset`, or `None` when the slot's
    /// sector pointer is zero (unoccupied).
    fn read_slot(&mut self, offset: usize) -> Result<Option<ChunkData>, ChunkReadError> {
        let sector = (self.header[offset] as u64) << 16
            | (self.header[offset + 1] as u64) << 8
            | self.header[offset + 2] as u64;

        if sector == 0 {
            return Ok(None);
        }

        self.file.seek(SeekFrom::Start(sector << SECTOR_SHIFT))?;

        let length = self.file.read_u32::<BigEndian>()?;
        let scheme = CompressionScheme::from_byte(self.file.read_u8()?)?;

        // The declared length counts the scheme byte.
        let mut data = vec![0u8; length.saturating_sub(1) as usize];
        self.file.read_exact(&mut data)?;

        Ok(Some(ChunkData {
            chunk: self.region.offset_to_chunk(offset),
            scheme,
            data,
        }))
    }
}

/// Iterator produced by [`RegionReader::chunks`].
pub struct Chunks<'r> {
    region: &'r mut RegionReader,
    offset: usize,
}

impl Iterator for Chunks<'_> {
    type Item = Result<ChunkData, ChunkReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.offset < REGION_HEADER_BYTES_LENGTH {
            let offset = self.offset;
            self.offset += 4;

            match self.region.read_slot(offset) {
                Ok(Some(chunk)) => return Some(Ok(chunk)),
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;

    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    use crate::error::{ChunkReadError, RegionOpenError};
    use crate::position::{ChunkPos, RegionPos};
    use crate::region::{CompressionScheme, RegionReader};

    /// Builds `r.0.0.mca` with a single occupied slot at locator offset 0
    /// pointing to sector 1, holding the zlib-compressed `blob`.
    pub(crate) fn write_region_file(dir: &TempDir, blob: &[u8]) -> std::path::PathBuf {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(blob).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut file = vec![0u8; 4096];
        file[2] = 1; // sector index 1
        file[3] = 1; // sector count

        file.resize(4096 + 4 + 1 + compressed.len(), 0);
        let length = (compressed.len() + 1) as u32;
        file[4096..4100].copy_from_slice(&length.to_be_bytes());
        file[4100] = 2; // zlib
        file[4101..].copy_from_slice(&compressed);

        let path = dir.path().join("r.0.0.mca");
        fs::write(&path, file).unwrap();
        path
    }

    #[test]
    fn test_read_chunk_round_trip() {
        let blob = crate::reader::tests::sample_blob();
        let dir = TempDir::new().unwrap();
        let path = write_region_file(&dir, &blob);

        let mut region = RegionReader::open(&path).unwrap();
        assert_eq!(region.region(), RegionPos::new(0, 0));

        let chunk = region.read_chunk(ChunkPos::new(0, 0, 0)).unwrap();
        assert_eq!(chunk.chunk, ChunkPos::new(0, 0, 0));
        assert_eq!(chunk.scheme, CompressionScheme::Zlib);
        assert_eq!(chunk.decompress().unwrap(), blob);
    }

    #[test]
    fn test_read_chunk_not_found() {
        let blob = crate::reader::tests::sample_blob();
        let dir = TempDir::new().unwrap();
        let path = write_region_file(&dir, &blob);

        let mut region = RegionReader::open(&path).unwrap();
        let err = region.read_chunk(ChunkPos::new(14, 0, 12)).unwrap_err();

        match err {
            ChunkReadError::ChunkNotFound { chunk_x, chunk_z } => {
                assert_eq!(chunk_x, 14);
                assert_eq!(chunk_z, 12);
            }
            e => panic!("Expected `ChunkNotFound` but got `{:?}`", e),
        }
    }

    #[test]
    fn test_chunks_iterator_skips_empty_slots() {
        let blob = crate::reader::tests::sample_blob();
        let dir = TempDir::new().unwrap();
        let path = write_region_file(&dir, &blob);

        let mut region = RegionReader::open(&path).unwrap();
        let chunks: Vec<_> = region.chunks().collect::<Result<_, _>>().unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk, ChunkPos::new(0, 0, 0));
    }

    #[test]
    fn test_open_bad_filename() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-a-region.mca");
        fs::write(&path, vec![0u8; 4096]).unwrap();

        match RegionReader::open(&path) {
            Err(RegionOpenError::BadFilename { .. }) => {}
            other => panic!("Expected `BadFilename` but got `{:?}`", other.err()),
        }
    }

    #[test]
    fn test_open_short_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.0.0.mca");
        fs::write(&path, vec![0u8; 100]).unwrap();

        match RegionReader::open(&path) {
            Err(RegionOpenError::ShortHeader { read: 100 }) => {}
            other => panic!("Expected `ShortHeader` but got `{:?}`", other.err()),
        }
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.1.1.mca");

        match RegionReader::open(&path) {
            Err(RegionOpenError::IOError { .. }) => {}
            other => panic!("Expected `IOError` but got `{:?}`", other.err()),
        }
    }

    #[test]
    fn test_hash_is_keyed_and_stable() {
        let blob = crate::reader::tests::sample_blob();
        let dir = TempDir::new().unwrap();
        let path = write_region_file(&dir, &blob);

        let mut region = RegionReader::open(&path).unwrap();
        let chunk = region.read_chunk(ChunkPos::new(0, 0, 0)).unwrap();

        let first = chunk.hash();
        assert_eq!(first, chunk.hash());

        let mut other = chunk.clone();
        other.data.push(0);
        assert_ne!(first, other.hash());
    }
}
