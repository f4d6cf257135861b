//! Space tree reading.
//!
//! Every user tree may own a pair of space trees (owned and available
//! extents) rooted at the page named by its root page header. Space-tree
//! leaves carry a 4-byte big-endian last-page-number key and a 4-byte
//! little-endian page count. The engine reads them only for validation
//! diagnostics; data walks skip space-tree pages entirely.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::Serialize;

use crate::ese::cache::PageReader;
use crate::ese::constants::PAGE_FLAG_IS_SPACE_TREE;
use crate::ese::page_tree::PageTree;
use crate::ese::source::ByteSource;
use crate::EseError;

/// One extent tracked by a space tree.
#[derive(Debug, Clone, Serialize)]
pub struct SpaceTreeEntry {
    /// Last page number of the extent (the leaf key, big-endian).
    pub last_page_number: u32,
    /// Number of pages in the extent.
    pub number_of_pages: u32,
}

/// The decoded extents of one space tree.
#[derive(Debug, Clone, Serialize)]
pub struct SpaceTree {
    entries: Vec<SpaceTreeEntry>,
}

impl SpaceTree {
    /// Read the space tree of `object_id` rooted at `root_page_number`.
    pub fn read<S: ByteSource>(
        reader: &mut PageReader<S>,
        object_id: u32,
        root_page_number: u32,
    ) -> Result<Self, EseError> {
        let tree = PageTree::new(reader, object_id, root_page_number);
        let mut entries = Vec::new();
        let mut walker = tree.leaf_walker();

        while let Some(leaf) = walker.next_value()? {
            if (leaf.page_flags & PAGE_FLAG_IS_SPACE_TREE) == 0 {
                return Err(EseError::TreeInvariant(format!(
                    "object {}: page {} in a space tree walk is not a space tree page",
                    object_id, leaf.page_number
                )));
            }
            if leaf.key.len() != 4 {
                return Err(EseError::PageMalformed {
                    page: leaf.page_number,
                    reason: format!("space tree key of {} bytes", leaf.key.len()),
                });
            }
            if leaf.data.len() < 4 {
                return Err(EseError::PageMalformed {
                    page: leaf.page_number,
                    reason: format!("space tree value of {} bytes", leaf.data.len()),
                });
            }
            entries.push(SpaceTreeEntry {
                last_page_number: BigEndian::read_u32(&leaf.key),
                number_of_pages: LittleEndian::read_u32(&leaf.data),
            });
        }

        Ok(SpaceTree { entries })
    }

    /// The extents in leaf-key order.
    pub fn entries(&self) -> &[SpaceTreeEntry] {
        &self.entries
    }

    /// Sum of the page counts of every extent.
    pub fn total_pages(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.number_of_pages as u64)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_pages_sums_extents() {
        let tree = SpaceTree {
            entries: vec![
                SpaceTreeEntry {
                    last_page_number: 16,
                    number_of_pages: 8,
                },
                SpaceTreeEntry {
                    last_page_number: 64,
                    number_of_pages: 32,
                },
            ],
        };
        assert_eq!(tree.total_pages(), 40);
    }
}
