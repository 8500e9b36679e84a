//! The EBML element tree.
//!
//! Elements are kept in an arena (`Vec`) and linked by indices: parent,
//! first child, next sibling. Children are read on demand; reading a
//! header never touches the payload, so skipping a multi-megabyte Cluster
//! costs one seek.

use tagweave_model::{Result, TagError};

use crate::ebml::vint;
use crate::io::ByteStream;

/// Handle into an [`ElementTree`] arena.
pub type ElementIdx = usize;

/// One parsed element header.
#[derive(Debug, Clone)]
pub struct ElementNode {
    /// Element id in marker-kept form (e.g. `0x1A45DFA3`).
    pub id: u64,
    pub id_length: u8,
    pub size_length: u8,
    /// Declared payload size; `None` for the unknown-length marker.
    pub data_size: Option<u64>,
    /// Absolute file offset of the header.
    pub start_offset: u64,
    /// Resolved absolute end of the payload. For unknown-length elements
    /// this is the parent boundary (or the enclosing scan bound).
    pub data_end: u64,
    pub parent: Option<ElementIdx>,
    pub first_child: Option<ElementIdx>,
    pub next_sibling: Option<ElementIdx>,
}

impl ElementNode {
    pub fn header_size(&self) -> u64 {
        u64::from(self.id_length) + u64::from(self.size_length)
    }

    /// Absolute file offset of the payload.
    pub fn data_offset(&self) -> u64 {
        self.start_offset + self.header_size()
    }

    /// Payload length in bytes (resolved for unknown-length elements).
    pub fn payload_len(&self) -> u64 {
        self.data_end - self.data_offset()
    }

    /// Total element length including the header.
    pub fn total_len(&self) -> u64 {
        self.data_end - self.start_offset
    }
}

/// Arena of parsed element headers with the VINT length caps in effect.
#[derive(Debug)]
pub struct ElementTree {
    nodes: Vec<ElementNode>,
    max_id_length: u64,
    max_size_length: u64,
}

impl ElementTree {
    pub fn new(max_id_length: u64, max_size_length: u64) -> Self {
        Self {
            nodes: Vec::new(),
            max_id_length,
            max_size_length,
        }
    }

    pub fn set_limits(&mut self, max_id_length: u64, max_size_length: u64) {
        self.max_id_length = max_id_length;
        self.max_size_length = max_size_length;
    }

    pub fn node(&self, idx: ElementIdx) -> &ElementNode {
        &self.nodes[idx]
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Reads the element header at `offset` as a root-level element whose
    /// payload may extend up to `end_bound`. Returns `None` at the bound.
    pub fn read_root(
        &mut self,
        stream: &mut ByteStream,
        offset: u64,
        end_bound: u64,
    ) -> Result<Option<ElementIdx>> {
        if offset >= end_bound {
            return Ok(None);
        }
        let idx = self.read_header(stream, offset, end_bound, None)?;
        Ok(Some(idx))
    }

    /// Reads the next child of `parent`, following cached links when the
    /// child has been read before. `prev` is the previously returned
    /// sibling, or `None` for the first child. Returns `None` at the end of
    /// the parent payload.
    pub fn next_child(
        &mut self,
        stream: &mut ByteStream,
        parent: ElementIdx,
        prev: Option<ElementIdx>,
    ) -> Result<Option<ElementIdx>> {
        let (offset, cached) = match prev {
            None => (self.nodes[parent].data_offset(), self.nodes[parent].first_child),
            Some(p) => (self.nodes[p].data_end, self.nodes[p].next_sibling),
        };
        if let Some(idx) = cached {
            return Ok(Some(idx));
        }
        let parent_end = self.nodes[parent].data_end;
        if offset >= parent_end {
            return Ok(None);
        }
        let idx = self.read_header(stream, offset, parent_end, Some(parent))?;
        match prev {
            None => self.nodes[parent].first_child = Some(idx),
            Some(p) => self.nodes[p].next_sibling = Some(idx),
        }
        Ok(Some(idx))
    }

    /// Reads all children of `parent` (suitable for small master elements).
    pub fn parse_children(
        &mut self,
        stream: &mut ByteStream,
        parent: ElementIdx,
    ) -> Result<Vec<ElementIdx>> {
        let mut children = Vec::new();
        let mut prev = None;
        while let Some(idx) = self.next_child(stream, parent, prev)? {
            children.push(idx);
            prev = Some(idx);
        }
        Ok(children)
    }

    /// First child of `parent` with the given id, parsing children as
    /// needed.
    pub fn find_child(
        &mut self,
        stream: &mut ByteStream,
        parent: ElementIdx,
        id: u64,
    ) -> Result<Option<ElementIdx>> {
        let mut prev = None;
        while let Some(idx) = self.next_child(stream, parent, prev)? {
            if self.nodes[idx].id == id {
                return Ok(Some(idx));
            }
            prev = Some(idx);
        }
        Ok(None)
    }

    fn read_header(
        &mut self,
        stream: &mut ByteStream,
        offset: u64,
        end_bound: u64,
        parent: Option<ElementIdx>,
    ) -> Result<ElementIdx> {
        stream.seek(offset)?;
        let (id, id_length) = vint::read_id(stream, self.max_id_length)?;
        let (data_size, size_length) = vint::read_size(stream, self.max_size_length)?;
        let data_offset = offset + u64::from(id_length) + u64::from(size_length);
        if data_offset > end_bound {
            return Err(TagError::TruncatedData(format!(
                "header of element 0x{id:X} at offset {offset} extends beyond its bound"
            )));
        }
        let data_end = match data_size {
            Some(size) => {
                let end = data_offset.checked_add(size).ok_or_else(|| {
                    TagError::InvalidData(format!(
                        "size of element 0x{id:X} at offset {offset} overflows"
                    ))
                })?;
                if end > end_bound {
                    return Err(TagError::TruncatedData(format!(
                        "element 0x{id:X} at offset {offset} claims {size} bytes but only {} remain",
                        end_bound - data_offset
                    )));
                }
                end
            }
            // Unknown length: the payload runs to the parent boundary.
            None => end_bound,
        };
        self.nodes.push(ElementNode {
            id,
            id_length,
            size_length,
            data_size,
            start_offset: offset,
            data_end,
            parent,
            first_child: None,
            next_sibling: None,
        });
        Ok(self.nodes.len() - 1)
    }

    // --- payload readers for leaf elements ---

    /// Reads an unsigned-integer payload (0–8 bytes, big-endian).
    pub fn read_uint(&self, stream: &mut ByteStream, idx: ElementIdx) -> Result<u64> {
        let node = &self.nodes[idx];
        let len = node.payload_len();
        if len > 8 {
            return Err(TagError::InvalidData(format!(
                "integer element 0x{:X} has a payload of {len} bytes",
                node.id
            )));
        }
        stream.seek(node.data_offset())?;
        let mut value = 0u64;
        for _ in 0..len {
            value = (value << 8) | u64::from(stream.read_u8()?);
        }
        Ok(value)
    }

    /// Reads a float payload (0, 4 or 8 bytes, big-endian).
    pub fn read_float(&self, stream: &mut ByteStream, idx: ElementIdx) -> Result<f64> {
        let node = &self.nodes[idx];
        stream.seek(node.data_offset())?;
        match node.payload_len() {
            0 => Ok(0.0),
            4 => Ok(f64::from(f32::from_bits(stream.read_u32_be()?))),
            8 => Ok(f64::from_bits(stream.read_u64_be()?)),
            other => Err(TagError::InvalidData(format!(
                "float element 0x{:X} has a payload of {other} bytes",
                node.id
            ))),
        }
    }

    /// Reads a UTF-8 string payload; invalid sequences are replaced.
    pub fn read_string(&self, stream: &mut ByteStream, idx: ElementIdx) -> Result<String> {
        let bytes = self.read_binary(stream, idx)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    pub fn read_binary(&self, stream: &mut ByteStream, idx: ElementIdx) -> Result<Vec<u8>> {
        let node = &self.nodes[idx];
        stream.seek(node.data_offset())?;
        stream.read_bytes(node.payload_len())
    }

    /// Reads the raw bytes of the whole element including its header.
    pub fn read_raw(&self, stream: &mut ByteStream, idx: ElementIdx) -> Result<Vec<u8>> {
        let node = &self.nodes[idx];
        stream.seek(node.start_offset)?;
        stream.read_bytes(node.total_len())
    }
}
