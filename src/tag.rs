use crate::error::NbtError;

/// Tag type discriminant, one byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TagId {
    End = 0,
    Byte = 1,
    Short = 2,
    Int = 3,
    Long = 4,
    Float = 5,
    Double = 6,
    ByteArray = 7,
    String = 8,
    List = 9,
    Compound = 10,
    IntArray = 11,
    LongArray = 12,
}

impl TryFrom<u8> for TagId {
    type Error = NbtError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TagId::End),
            1 => Ok(TagId::Byte),
            2 => Ok(TagId::Short),
            3 => Ok(TagId::Int),
            4 => Ok(TagId::Long),
            5 => Ok(TagId::Float),
            6 => Ok(TagId::Double),
            7 => Ok(TagId::ByteArray),
            8 => Ok(TagId::String),
            9 => Ok(TagId::List),
            10 => Ok(TagId::Compound),
            11 => Ok(TagId::IntArray),
            12 => Ok(TagId::LongArray),
            _ => Err(NbtError::InvalidTagId { value }),
        }
    }
}

impl TagId {
    /// Compound and List payloads contain further tags; everything else is
    /// an opaque payload the indexer skips over.
    pub fn is_container(self) -> bool {
        matches!(self, TagId::List | TagId::Compound)
    }
}

/// Decoded tag header. The name borrows from the blob, it is never copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader<'a> {
    pub id: TagId,
    pub name: &'a [u8],
}

impl<'a> TagHeader<'a> {
    pub fn new(id: TagId, name: &'a [u8]) -> TagHeader<'a> {
        TagHeader { id, name }
    }

    /// Number of bytes this header occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        if self.id == TagId::End {
            1
        } else {
            3 + self.name.len()
        }
    }

    /// Re-encodes the header bytes, as used for pattern searches.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_header(self.id, self.name)
    }

    pub fn to_owned(&self) -> OwnedTagHeader {
        OwnedTagHeader {
            id: self.id,
            name: self.name.to_vec(),
        }
    }
}

/// Tag header with an owned name, for selections and search patterns that
/// outlive any one blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedTagHeader {
    pub id: TagId,
    pub name: Vec<u8>,
}

impl OwnedTagHeader {
    pub fn new(id: TagId, name: impl Into<Vec<u8>>) -> OwnedTagHeader {
        OwnedTagHeader {
            id,
            name: name.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode_header(self.id, &self.name)
    }

    /// True when `header` carries the same tag id and name.
    pub fn matches(&self, header: &TagHeader<'_>) -> bool {
        self.id == header.id && self.name == header.name
    }
}

fn encode_header(id: TagId, name: &[u8]) -> Vec<u8> {
    if id == TagId::End {
        return vec![0];
    }

    let mut bytes = Vec::with_capacity(3 + name.len());
    bytes.push(id as u8);
    bytes.push(((name.len() >> 8) & 0xff) as u8);
    bytes.push((name.len() & 0xff) as u8);
    bytes.extend_from_slice(name);
    bytes
}

#[cfg(test)]
mod tests {
    use crate::error::NbtError;
    use crate::tag::{OwnedTagHeader, TagHeader, TagId};

    #[test]
    fn test_tag_id_round_trip() {
        for value in 0u8..=12 {
            let id = TagId::try_from(value).unwrap();
            assert_eq!(id as u8, value);
        }
    }

    #[test]
    fn test_tag_id_invalid() {
        match TagId::try_from(13) {
            Err(NbtError::InvalidTagId { value: 13 }) => {}
            other => panic!("Expected `InvalidTagId` but got `{:?}`", other),
        }
    }

    #[test]
    fn test_header_encoding() {
        let header = OwnedTagHeader::new(TagId::Int, "computerID");
        let bytes = header.to_bytes();

        assert_eq!(bytes[0], 3);
        assert_eq!(bytes[1], 0);
        assert_eq!(bytes[2], 10);
        assert_eq!(&bytes[3..], b"computerID");
        assert_eq!(bytes.len(), TagHeader::new(TagId::Int, b"computerID").encoded_len());
    }

    #[test]
    fn test_end_header_is_one_byte() {
        assert_eq!(TagHeader::new(TagId::End, b"").to_bytes(), vec![0]);
        assert_eq!(TagHeader::new(TagId::End, b"").encoded_len(), 1);
    }

    #[test]
    fn test_selection_matches() {
        let selection = OwnedTagHeader::new(TagId::List, "TileEntities");

        assert!(selection.matches(&TagHeader::new(TagId::List, b"TileEntities")));
        assert!(!selection.matches(&TagHeader::new(TagId::List, b"Entities")));
        assert!(!selection.matches(&TagHeader::new(TagId::Compound, b"TileEntities")));
    }
}
