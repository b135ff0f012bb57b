use std::collections::HashMap;
use std::rc::Rc;

use log::warn;

use crate::error::NbtError;
use crate::reader::{find, Reader};
use crate::tag::{OwnedTagHeader, TagHeader, TagId};

/// Handle to an entry inside one [`Index`]. Entries form a tree through
/// parent and child ids rather than references, so the arena can be
/// iterated, copied and serialized without ownership cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(usize);

/// One indexed tag occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry<'a> {
    /// Absolute byte position of the tag's payload, i.e. the cursor
    /// position immediately after its header.
    pub pos: usize,
    /// Position within the parent list, `None` for compound children.
    pub list_index: Option<usize>,
    /// Decoded header; list children carry an empty name.
    pub header: TagHeader<'a>,
    /// `None` only for the synthetic root.
    pub parent: Option<EntryId>,
    /// Children in traversal order.
    pub children: Vec<EntryId>,
}

/// Structural index over one tagged blob: a flat arena of entries plus a
/// payload-position lookup. Built once, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index<'a> {
    entries: Vec<IndexEntry<'a>>,
    by_pos: HashMap<usize, EntryId>,
}

impl<'a> Index<'a> {
    fn new() -> Index<'a> {
        Index {
            entries: Vec::new(),
            by_pos: HashMap::new(),
        }
    }

    /// The synthetic root enclosing the blob's top-level tags.
    pub fn root(&self) -> EntryId {
        EntryId(0)
    }

    pub fn entry(&self, id: EntryId) -> &IndexEntry<'a> {
        &self.entries[id.0]
    }

    /// Entry whose payload starts at `pos`.
    pub fn lookup(&self, pos: usize) -> Option<EntryId> {
        self.by_pos.get(&pos).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (EntryId, &IndexEntry<'a>)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (EntryId(i), entry))
    }

    fn push(
        &mut self,
        pos: usize,
        list_index: Option<usize>,
        header: TagHeader<'a>,
        parent: Option<EntryId>,
    ) -> EntryId {
        let id = EntryId(self.entries.len());
        self.entries.push(IndexEntry {
            pos,
            list_index,
            header,
            parent,
            children: Vec::new(),
        });
        self.by_pos.insert(pos, id);

        if let Some(parent) = parent {
            self.entries[parent.0].children.push(id);
        }

        id
    }

    /// Chain of entries from `entry` up to the root; element 0 is `entry`
    /// itself, the last element is the root.
    pub fn ancestors(&self, entry: EntryId) -> Vec<EntryId> {
        let mut chain = vec![entry];
        let mut current = entry;

        while let Some(parent) = self.entry(current).parent {
            chain.push(parent);
            current = parent;
        }

        chain
    }

    /// Dotted path from the root down to `entry`, list children rendered
    /// as bracketed indices: `root.TileEntities[3].computerID`.
    pub fn path(&self, entry: EntryId) -> String {
        let mut path = String::new();

        for &id in self.ancestors(entry).iter().rev() {
            let entry = self.entry(id);

            if let Some(list_index) = entry.list_index {
                path.push_str(&format!("[{}]", list_index));
            } else {
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(&String::from_utf8_lossy(entry.header.name));
            }
        }

        path
    }

    /// Serializes the index as a flat record array: for each entry its
    /// payload position, parent position (−1 for none), child positions,
    /// header and list index (−1 for none), every integer big-endian and
    /// every variable-length field length-prefixed.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());

        for entry in &self.entries {
            buf.extend_from_slice(&(entry.pos as i64).to_be_bytes());

            let parent_pos = entry
                .parent
                .map_or(-1, |parent| self.entry(parent).pos as i64);
            buf.extend_from_slice(&parent_pos.to_be_bytes());

            buf.extend_from_slice(&(entry.children.len() as u32).to_be_bytes());
            for &child in &entry.children {
                buf.extend_from_slice(&(self.entry(child).pos as i64).to_be_bytes());
            }

            buf.push(entry.header.id as u8);
            buf.extend_from_slice(&(entry.header.name.len() as u16).to_be_bytes());
            buf.extend_from_slice(entry.header.name);

            let list_index = entry.list_index.map_or(-1, |i| i as i64);
            buf.extend_from_slice(&list_index.to_be_bytes());
        }

        buf
    }

    /// Renders the indexed structure as JSON: compounds become objects,
    /// lists become arrays, leaves become their tag id number.
    pub fn structure_to_json(&self, entry: EntryId) -> serde_json::Value {
        let name = String::from_utf8_lossy(self.entry(entry).header.name).into_owned();

        let mut object = serde_json::Map::new();
        object.insert(name, self.structure_value(entry));
        serde_json::Value::Object(object)
    }

    fn structure_value(&self, id: EntryId) -> serde_json::Value {
        let entry = self.entry(id);

        match entry.header.id {
            TagId::List => entry
                .children
                .iter()
                .map(|&child| self.structure_value(child))
                .collect(),
            TagId::Compound => {
                let mut object = serde_json::Map::new();
                for &child in &entry.children {
                    let name = String::from_utf8_lossy(self.entry(child).header.name).into_owned();
                    object.insert(name, self.structure_value(child));
                }
                serde_json::Value::Object(object)
            }
            other => serde_json::json!(other as u8),
        }
    }
}

/// A step on the walk from a matched tag back to the root: the entry plus
/// a reader positioned at its payload.
pub struct Breadcrumb<'a> {
    pub entry: EntryId,
    pub reader: Reader<'a>,
}

/// Ancestor frame tracked during a selective build. Frames are enrolled
/// into the index lazily, only once a descendant matches the selection.
struct Frame<'a> {
    pos: usize,
    list_index: Option<usize>,
    header: TagHeader<'a>,
    id: Option<EntryId>,
}

struct IndexBuilder<'a, 's> {
    index: Index<'a>,
    stack: Vec<Frame<'a>>,
    selection: Option<&'s [OwnedTagHeader]>,
}

impl<'a, 's> IndexBuilder<'a, 's> {
    /// Enrolls every pending ancestor frame, outermost first, and returns
    /// the id of the innermost one (the parent for a new entry).
    fn enroll_stack(&mut self) -> EntryId {
        let mut parent = None;

        for frame in &mut self.stack {
            let id = match frame.id {
                Some(id) => id,
                None => {
                    let id = self
                        .index
                        .push(frame.pos, frame.list_index, frame.header, parent);
                    frame.id = Some(id);
                    id
                }
            };

            parent = Some(id);
        }

        parent.expect("stack always contains the root frame")
    }

    fn matches_selection(&self, header: &TagHeader<'_>) -> bool {
        match self.selection {
            Some(selection) => selection.iter().any(|sel| sel.matches(header)),
            None => true,
        }
    }

    /// Walks the children of the compound whose payload starts at the
    /// cursor. `indexed` means the enclosing subtree is already selected,
    /// so every child is recorded.
    fn walk_compound(&mut self, reader: &mut Reader<'a>, indexed: bool) -> Result<(), NbtError> {
        loop {
            let header = match reader.read_tag_header()? {
                // End of blob terminates the synthetic root's compound.
                None => return Ok(()),
                Some(header) => header,
            };

            if header.id == TagId::End {
                return Ok(());
            }

            let pos = reader.cursor();
            let should_index = indexed || self.matches_selection(&header);

            if should_index {
                let parent = self.enroll_stack();
                self.index.push(pos, None, header, Some(parent));
            }

            match header.id {
                TagId::Compound => {
                    self.descend(reader, pos, None, header, should_index)?;
                }
                TagId::List => {
                    self.walk_list_frame(reader, pos, None, header, should_index)?;
                }
                other => reader.skip_tag(other)?,
            }
        }
    }

    /// Walks a list payload. Lists of anything but compounds or lists are
    /// opaque and skipped without descending.
    fn walk_list(&mut self, reader: &mut Reader<'a>, indexed: bool) -> Result<(), NbtError> {
        let (elem_id, length) = reader.read_list_tag_header()?;

        if !elem_id.is_container() {
            for _ in 0..length {
                reader.skip_tag(elem_id)?;
            }
            return Ok(());
        }

        for list_index in 0..length {
            let pos = reader.cursor();
            let header = TagHeader::new(elem_id, &[]);

            if indexed {
                let parent = self.enroll_stack();
                self.index.push(pos, Some(list_index), header, Some(parent));
            }

            self.descend_list_child(reader, pos, list_index, header, indexed)?;
        }

        Ok(())
    }

    fn descend(
        &mut self,
        reader: &mut Reader<'a>,
        pos: usize,
        list_index: Option<usize>,
        header: TagHeader<'a>,
        indexed: bool,
    ) -> Result<(), NbtError> {
        let id = self.index.lookup(pos).filter(|_| indexed);
        self.stack.push(Frame {
            pos,
            list_index,
            header,
            id,
        });

        let result = self.walk_compound(reader, indexed);
        self.stack.pop();
        result
    }

    fn walk_list_frame(
        &mut self,
        reader: &mut Reader<'a>,
        pos: usize,
        list_index: Option<usize>,
        header: TagHeader<'a>,
        indexed: bool,
    ) -> Result<(), NbtError> {
        let id = self.index.lookup(pos).filter(|_| indexed);
        self.stack.push(Frame {
            pos,
            list_index,
            header,
            id,
        });

        let result = self.walk_list(reader, indexed);
        self.stack.pop();
        result
    }

    fn descend_list_child(
        &mut self,
        reader: &mut Reader<'a>,
        pos: usize,
        list_index: usize,
        header: TagHeader<'a>,
        indexed: bool,
    ) -> Result<(), NbtError> {
        match header.id {
            TagId::Compound => self.descend(reader, pos, Some(list_index), header, indexed),
            TagId::List => self.walk_list_frame(reader, pos, Some(list_index), header, indexed),
            _ => unreachable!("list children are containers by construction"),
        }
    }
}

/// Builds an index over `reader`'s blob starting at its current cursor.
///
/// With a selection, traversal still visits every tag but records only
/// matching entries, their descendants, and the ancestor chain linking
/// them to the root. The cursor is restored whether the build succeeds or
/// fails, and a failed build yields no index at all.
pub fn build_index<'a>(
    reader: &mut Reader<'a>,
    selection: Option<&[OwnedTagHeader]>,
) -> Result<Index<'a>, NbtError> {
    let saved_cursor = reader.cursor();

    let mut builder = IndexBuilder {
        index: Index::new(),
        stack: Vec::new(),
        selection,
    };

    // Synthetic root: the blob behaves as the payload of a compound
    // starting at the current cursor.
    let root_header = TagHeader::new(TagId::Compound, b"root");
    let root = builder
        .index
        .push(saved_cursor, None, root_header, None);
    builder.stack.push(Frame {
        pos: saved_cursor,
        list_index: None,
        header: root_header,
        id: Some(root),
    });

    let result = builder.walk_compound(reader, selection.is_none());
    reader.seek_to(saved_cursor);

    match result {
        Ok(()) => Ok(builder.index),
        Err(err) => Err(NbtError::IndexBuild {
            detail: format!("{:?}", err),
        }),
    }
}

impl<'a> Reader<'a> {
    /// Builds and stores the index if none exists yet; a stored index is
    /// never rebuilt. Pass `None` for a full index.
    pub fn prepare_index(&mut self, selection: Option<&[OwnedTagHeader]>) -> Result<(), NbtError> {
        if self.index.is_some() {
            return Ok(());
        }

        let index = build_index(self, selection)?;
        self.index = Some(Rc::new(index));

        Ok(())
    }

    pub fn index(&self) -> Option<&Index<'a>> {
        self.index.as_deref()
    }

    /// Confirms the cursor sits at the payload start of an indexed tag.
    pub fn verify_tag_header(&self) -> Result<(), NbtError> {
        let index = self.index.as_ref().ok_or(NbtError::NotIndexed)?;

        if index.lookup(self.cursor).is_none() {
            return Err(NbtError::InvalidHeaderLocation);
        }

        Ok(())
    }

    /// Scans backwards one byte at a time until the cursor lands on an
    /// indexed payload position, seeking there and returning the entry.
    /// Returns `None` without an index, or when the scan reaches the start
    /// of the blob without a hit.
    pub fn align_to_index(&mut self) -> Option<EntryId> {
        let index = self.index.clone()?;
        let mut pos = self.cursor;

        loop {
            if let Some(id) = index.lookup(pos) {
                self.seek_to(pos);
                return Some(id);
            }

            if pos == 0 {
                return None;
            }

            pos -= 1;
        }
    }

    /// Walk from `entry` up to the root. Element 0 is `entry`, the last
    /// element is the root; each step carries a reader positioned at its
    /// entry's payload.
    pub fn breadcrumbs(&self, entry: EntryId) -> Result<Vec<Breadcrumb<'a>>, NbtError> {
        let index = self.index.as_ref().ok_or(NbtError::NotIndexed)?;

        Ok(index
            .ancestors(entry)
            .into_iter()
            .map(|id| Breadcrumb {
                entry: id,
                reader: self.copy(index.entry(id).pos),
            })
            .collect())
    }

    /// Finds indexed entries whose encoded header matches the first
    /// pattern and whose siblings account for every remaining pattern,
    /// order-independently. Substring hits that do not line up with an
    /// indexed tag are logged and discarded; the cursor is restored before
    /// returning.
    pub fn match_tags(&mut self, header_group: &[Vec<u8>]) -> Result<Vec<EntryId>, NbtError> {
        let index = self.index.clone().ok_or(NbtError::NotIndexed)?;

        let saved_cursor = self.cursor;
        let result = self.match_tags_scan(&index, header_group);
        self.seek_to(saved_cursor);

        result
    }

    fn match_tags_scan(
        &mut self,
        index: &Index<'a>,
        header_group: &[Vec<u8>],
    ) -> Result<Vec<EntryId>, NbtError> {
        let mut results = Vec::new();

        let first = match header_group.first() {
            Some(first) => first,
            None => return Ok(results),
        };

        self.seek_to(0);

        loop {
            let next = match find(&self.data[self.cursor..], first) {
                Some(next) => next,
                None => break,
            };
            self.seek_to(self.cursor + next);

            if let Err(err) = self.skip_tag_header() {
                warn!(target: "anvil-query", "malformed tag header in match scan: {:?}", err);
                self.seek_to(self.cursor + 1);
                continue;
            }

            let id = match index.lookup(self.cursor) {
                Some(id) => id,
                None => {
                    warn!(
                        target: "anvil-query",
                        "matching tag not in index at {}", self.cursor
                    );
                    continue;
                }
            };

            let parent = match index.entry(id).parent {
                Some(parent) => parent,
                None => return Err(NbtError::IndexCorrupt),
            };

            let mut checks: Vec<&[u8]> = header_group[1..].iter().map(Vec::as_slice).collect();

            if !checks.is_empty() {
                for &child_id in &index.entry(parent).children {
                    let child = index.entry(child_id);

                    if child.pos == self.cursor || child.list_index.is_some() {
                        continue;
                    }

                    let header_pos = child.pos - child.header.encoded_len();

                    for (i, pattern) in checks.iter().enumerate() {
                        if self.data.len() - header_pos < pattern.len() {
                            continue;
                        }

                        if &self.data[header_pos..header_pos + pattern.len()] == *pattern {
                            checks.swap_remove(i);
                            break;
                        }
                    }

                    if checks.is_empty() {
                        break;
                    }
                }
            }

            if checks.is_empty() {
                results.push(id);
            }
        }

        Ok(results)
    }
}
