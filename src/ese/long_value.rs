//! Long value assembly.
//!
//! Column values too large for a record spill into the table's long-value
//! tree. The tree keys use big-endian encoding for lexicographic
//! locality: a 4-byte key is the descriptor of one long value (logical
//! size and reference count), an 8-byte key appends the big-endian byte
//! offset of one data segment. The referencing record field stores the
//! identifier little-endian; lookups convert to the big-endian tree key.
//!
//! Assembly walks the segments of an identifier in key order and copies
//! each at its offset. Every byte of the logical value must be written
//! exactly once; a gap or overlap is a structural error.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::Serialize;

use crate::ese::cache::PageReader;
use crate::ese::catalog::LongValueDefinition;
use crate::ese::page_tree::PageTree;
use crate::ese::source::ByteSource;
use crate::EseError;

/// The descriptor stored under a long value's 4-byte key.
#[derive(Debug, Clone, Serialize)]
pub struct LongValueDescriptor {
    /// Logical size of the assembled value in bytes.
    pub total_size: u32,
    /// Number of record fields referencing this value.
    pub reference_count: u32,
}

impl LongValueDescriptor {
    /// Parse a descriptor leaf payload.
    pub fn parse(data: &[u8], id: u32) -> Result<Self, EseError> {
        if data.len() < 8 {
            return Err(EseError::LongValueMissing {
                id,
                reason: format!("descriptor of {} bytes", data.len()),
            });
        }
        Ok(LongValueDescriptor {
            total_size: LittleEndian::read_u32(&data[0..]),
            reference_count: LittleEndian::read_u32(&data[4..]),
        })
    }
}

/// The 4-byte descriptor key of a long value.
pub fn descriptor_key(id: u32) -> [u8; 4] {
    id.to_be_bytes()
}

/// The 8-byte key of the segment of `id` starting at `offset`.
pub fn segment_key(id: u32, offset: u32) -> [u8; 8] {
    let mut key = [0u8; 8];
    BigEndian::write_u32(&mut key[0..], id);
    BigEndian::write_u32(&mut key[4..], offset);
    key
}

/// Look up the descriptor of long value `id`.
pub fn read_descriptor<S: ByteSource>(
    reader: &mut PageReader<S>,
    definition: &LongValueDefinition,
    id: u32,
) -> Result<LongValueDescriptor, EseError> {
    let mut tree = PageTree::new(reader, definition.identifier, definition.fdp_page_number);
    match tree.find(&descriptor_key(id), false)? {
        Some(leaf) => LongValueDescriptor::parse(&leaf.data, id),
        None => Err(EseError::LongValueMissing {
            id,
            reason: "descriptor not found".to_string(),
        }),
    }
}

/// Assemble the full bytes of long value `id`.
pub fn read_long_value<S: ByteSource>(
    reader: &mut PageReader<S>,
    definition: &LongValueDefinition,
    id: u32,
) -> Result<Vec<u8>, EseError> {
    let descriptor = read_descriptor(reader, definition, id)?;
    read_window(reader, definition, id, 0, descriptor.total_size)
}

/// Read `length` bytes of long value `id` starting at `offset`.
///
/// The window is clipped to the logical size; a window starting past the
/// end yields an empty vector.
pub fn read_long_value_range<S: ByteSource>(
    reader: &mut PageReader<S>,
    definition: &LongValueDefinition,
    id: u32,
    offset: u32,
    length: u32,
) -> Result<Vec<u8>, EseError> {
    let descriptor = read_descriptor(reader, definition, id)?;
    if offset >= descriptor.total_size {
        return Ok(Vec::new());
    }
    let length = length.min(descriptor.total_size - offset);
    read_window(reader, definition, id, offset, length)
}

/// Copy every segment intersecting `[offset, offset + length)` into a
/// window buffer and verify single coverage.
fn read_window<S: ByteSource>(
    reader: &mut PageReader<S>,
    definition: &LongValueDefinition,
    id: u32,
    offset: u32,
    length: u32,
) -> Result<Vec<u8>, EseError> {
    let window_start = offset as usize;
    let window_len = length as usize;
    let mut buffer = vec![0u8; window_len];
    let mut covered = vec![false; window_len];

    let tree = PageTree::new(reader, definition.identifier, definition.fdp_page_number);
    let mut walker = tree.leaf_walker_from(&segment_key(id, 0))?;

    while let Some(leaf) = walker.next_value()? {
        if leaf.key.len() < 4 {
            continue;
        }
        let leaf_id = BigEndian::read_u32(&leaf.key[0..]);
        if leaf_id < id {
            continue;
        }
        if leaf_id > id {
            break;
        }
        if leaf.key.len() != 8 {
            // The descriptor of this id.
            continue;
        }
        let segment_offset = BigEndian::read_u32(&leaf.key[4..]) as usize;
        let segment_len = leaf.data.len();

        let begin = segment_offset.max(window_start);
        let end = (segment_offset + segment_len).min(window_start + window_len);
        if begin >= end {
            continue;
        }
        for position in begin..end {
            let window_position = position - window_start;
            if covered[window_position] {
                return Err(EseError::LongValueMissing {
                    id,
                    reason: format!("segments overlap at byte {}", position),
                });
            }
            covered[window_position] = true;
            buffer[window_position] = leaf.data[position - segment_offset];
        }
    }

    if let Some(gap) = covered.iter().position(|&c| !c) {
        return Err(EseError::LongValueMissing {
            id,
            reason: format!("no segment covers byte {}", window_start + gap),
        });
    }
    Ok(buffer)
}
