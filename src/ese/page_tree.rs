//! B+-tree page tree traversal.
//!
//! Every object in an ESE database (the catalog included) is a B+-tree of
//! pages sharing one father data page (FDP) object identifier. The root
//! page carries a [`RootPageHeader`] in tag 0; non-root pages carry the
//! page's common key blob there instead. Tags 1..n hold [`PageTreeValue`]s:
//! an optional common-key prefix length, a local key, and the payload.
//! Branch payloads end with a 4-byte little-endian child page number;
//! leaf payloads are records, index entries, or long-value segments
//! depending on the page flags.
//!
//! [`PageTree`] is the universal walker: leftmost-leaf scans over the
//! sibling chain, key search with optional reversed-key comparison, and
//! enumeration by leaf-value index backed by per-page value counts. Every
//! descent checks the father object identifier, the recursion depth, the
//! child page range, and a visited set against malformed loops; leaf
//! scans additionally stop at the configured leaf-page cap.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::ese::cache::PageReader;
use crate::ese::constants::*;
use crate::ese::page::{Page, PageValue};
use crate::ese::source::ByteSource;
use crate::EseError;

/// Parsed root page header (tag 0 of a root page; 16 bytes, 25 extended).
#[derive(Debug, Clone, Serialize)]
pub struct RootPageHeader {
    /// Initial number of pages allocated to the tree.
    pub initial_number_of_pages: u32,
    /// Parent father data page number.
    pub parent_page_number: u32,
    /// Extent space.
    pub extent_space: u32,
    /// Page number of the space tree, 0 if the tree has none.
    pub space_tree_page_number: u32,
}

impl RootPageHeader {
    /// Parse a root page header from tag 0 of a root page.
    pub fn parse(data: &[u8], page_number: u32) -> Result<Self, EseError> {
        if data.len() != SIZE_ROOT_PAGE_HEADER && data.len() != SIZE_EXTENDED_ROOT_PAGE_HEADER {
            return Err(EseError::PageMalformed {
                page: page_number,
                reason: format!("root page header of {} bytes", data.len()),
            });
        }
        Ok(RootPageHeader {
            initial_number_of_pages: LittleEndian::read_u32(&data[0..]),
            parent_page_number: LittleEndian::read_u32(&data[4..]),
            extent_space: LittleEndian::read_u32(&data[8..]),
            space_tree_page_number: LittleEndian::read_u32(&data[12..]),
        })
    }
}

/// The logical payload of one page tag inside a B+-tree page.
#[derive(Debug, Clone)]
pub struct PageTreeValue {
    /// The logical key: common-key prefix plus local key.
    pub key: Vec<u8>,
    /// The payload after the key.
    pub data: Vec<u8>,
}

impl PageTreeValue {
    /// Decode a page value into key and payload.
    ///
    /// `common_key` is the page's tag-0 blob (empty on root pages). In the
    /// extended-header layout the high 3 bits of the first 16-bit word are
    /// the tag flags and are masked off here; the source bytes are left
    /// untouched.
    ///
    /// Returns `None` for defunct values.
    pub fn parse(
        value: &PageValue,
        common_key: &[u8],
        extended: bool,
        page_number: u32,
    ) -> Result<Option<Self>, EseError> {
        if (value.flags & PAGE_TAG_FLAG_IS_DEFUNCT) != 0 {
            return Ok(None);
        }
        let data = &value.data;
        let mut cursor = 0usize;

        let read_u16 = |cursor: &mut usize, mask: bool| -> Result<u16, EseError> {
            if *cursor + 2 > data.len() {
                return Err(EseError::PageMalformed {
                    page: page_number,
                    reason: "page tree value truncated".to_string(),
                });
            }
            let mut word = LittleEndian::read_u16(&data[*cursor..]);
            if mask && extended {
                word &= 0x1fff;
            }
            *cursor += 2;
            Ok(word)
        };

        let mut key = Vec::new();
        if (value.flags & PAGE_TAG_FLAG_HAS_COMMON_KEY_SIZE) != 0 {
            let common_key_size = read_u16(&mut cursor, true)? as usize;
            if common_key_size > common_key.len() {
                return Err(EseError::PageMalformed {
                    page: page_number,
                    reason: format!(
                        "common key size {} exceeds common key of {} bytes",
                        common_key_size,
                        common_key.len()
                    ),
                });
            }
            key.extend_from_slice(&common_key[..common_key_size]);
            let local_key_size = read_u16(&mut cursor, false)? as usize;
            if cursor + local_key_size > data.len() {
                return Err(EseError::PageMalformed {
                    page: page_number,
                    reason: "local key exceeds page tree value".to_string(),
                });
            }
            key.extend_from_slice(&data[cursor..cursor + local_key_size]);
            cursor += local_key_size;
        } else {
            let local_key_size = read_u16(&mut cursor, true)? as usize;
            if cursor + local_key_size > data.len() {
                return Err(EseError::PageMalformed {
                    page: page_number,
                    reason: "local key exceeds page tree value".to_string(),
                });
            }
            key.extend_from_slice(&data[cursor..cursor + local_key_size]);
            cursor += local_key_size;
        }

        Ok(Some(PageTreeValue {
            key,
            data: data[cursor..].to_vec(),
        }))
    }

    /// The child page number of a branch value (last 4 bytes, LE).
    pub fn child_page_number(&self, page_number: u32) -> Result<u32, EseError> {
        if self.data.len() < 4 {
            return Err(EseError::PageMalformed {
                page: page_number,
                reason: "branch value without child page number".to_string(),
            });
        }
        Ok(LittleEndian::read_u32(&self.data[self.data.len() - 4..]))
    }
}

/// One leaf value yielded by a tree walk, with its origin page context.
#[derive(Debug, Clone)]
pub struct LeafValue {
    /// The page the value was found on.
    pub page_number: u32,
    /// The flags of that page (index / long value / space tree).
    pub page_flags: u32,
    /// The logical key.
    pub key: Vec<u8>,
    /// The payload.
    pub data: Vec<u8>,
}

/// The tag-0 common key blob of a page (empty for root pages, whose tag 0
/// is the root page header).
fn page_common_key(page: &Page) -> &[u8] {
    if page.is_root() {
        &[]
    } else {
        page.value(0).map(|v| v.data.as_slice()).unwrap_or(&[])
    }
}

/// Parse a leaf-level page value, demoting malformation to a diagnostic
/// so bulk enumeration continues past damaged entries. Branch values stay
/// strict: descending through a malformed pointer would be blind.
fn parse_live_value(
    value: &PageValue,
    common_key: &[u8],
    extended: bool,
    page_number: u32,
) -> Option<PageTreeValue> {
    match PageTreeValue::parse(value, common_key, extended, page_number) {
        Ok(parsed) => parsed,
        Err(error) => {
            log::warn!("skipping malformed value on page {}: {}", page_number, error);
            None
        }
    }
}

/// Compare a query key against a stored tree key.
///
/// Forward mode is plain lexicographic. Reversed mode (used by some index
/// trees) reads the query back-to-front while the stored key is read
/// front-to-back; ties are broken by length.
pub fn compare_keys(query: &[u8], stored: &[u8], reversed: bool) -> Ordering {
    if reversed {
        let common = query.len().min(stored.len());
        for i in 0..common {
            let q = query[query.len() - 1 - i];
            match q.cmp(&stored[i]) {
                Ordering::Equal => {}
                other => return other,
            }
        }
        query.len().cmp(&stored.len())
    } else {
        query.cmp(stored)
    }
}

/// A B+-tree walker over the pages of one object.
pub struct PageTree<'r, S: ByteSource> {
    reader: &'r mut PageReader<S>,
    object_id: u32,
    root_page_number: u32,
    root_header: Option<RootPageHeader>,
    leaf_value_counts: HashMap<u32, usize>,
    total_leaf_values: Option<usize>,
}

impl<'r, S: ByteSource> PageTree<'r, S> {
    /// Create a walker for the tree of `object_id` rooted at
    /// `root_page_number`.
    pub fn new(reader: &'r mut PageReader<S>, object_id: u32, root_page_number: u32) -> Self {
        PageTree {
            reader,
            object_id,
            root_page_number,
            root_header: None,
            leaf_value_counts: HashMap::new(),
            total_leaf_values: None,
        }
    }

    /// The object identifier this walker checks on every page.
    pub fn object_id(&self) -> u32 {
        self.object_id
    }

    /// Mutable access to the underlying page reader, for sibling walks
    /// (e.g. long-value lookups) that run between leaf reads.
    pub fn reader(&mut self) -> &mut PageReader<S> {
        self.reader
    }

    /// Load a page of this tree, checking the father object identifier.
    fn load_tree_page(&mut self, number: u32) -> Result<Rc<Page>, EseError> {
        if number == 0 || number as u64 > self.reader.context().last_page_number {
            return Err(EseError::TreeInvariant(format!(
                "object {}: child page {} beyond last page {}",
                self.object_id,
                number,
                self.reader.context().last_page_number
            )));
        }
        let page = self.reader.load_page(number)?;
        if page.header.father_object_id != self.object_id {
            return Err(EseError::TreeInvariant(format!(
                "page {} belongs to object {} but the walk expects object {}",
                number, page.header.father_object_id, self.object_id
            )));
        }
        Ok(page)
    }

    /// The root page header of this tree.
    pub fn root_page_header(&mut self) -> Result<RootPageHeader, EseError> {
        if let Some(header) = &self.root_header {
            return Ok(header.clone());
        }
        let root_page_number = self.root_page_number;
        let root = self.load_tree_page(root_page_number)?;
        if !root.is_root() {
            return Err(EseError::TreeInvariant(format!(
                "page {} is not a root page",
                self.root_page_number
            )));
        }
        let value = root.value(0).ok_or_else(|| EseError::PageMalformed {
            page: self.root_page_number,
            reason: "root page without a header value".to_string(),
        })?;
        let header = RootPageHeader::parse(&value.data, self.root_page_number)?;
        self.root_header = Some(header.clone());
        Ok(header)
    }

    /// Descend from the root to the leftmost leaf page.
    fn leftmost_leaf(&mut self) -> Result<Option<Rc<Page>>, EseError> {
        let mut page = self.load_tree_page(self.root_page_number)?;
        let extended = self.reader.context().has_extended_page_header();
        let mut visited = HashSet::new();

        for _depth in 0..MAX_TREE_DEPTH {
            if page.is_leaf() {
                return Ok(Some(page));
            }
            if !visited.insert(page.number) {
                return Err(EseError::TreeInvariant(format!(
                    "object {}: page {} revisited during descent",
                    self.object_id, page.number
                )));
            }
            let common = page_common_key(&page).to_vec();
            let mut child = None;
            for value in page.values().iter().skip(1) {
                if let Some(tree_value) =
                    PageTreeValue::parse(value, &common, extended, page.number)?
                {
                    child = Some(tree_value.child_page_number(page.number)?);
                    break;
                }
            }
            match child {
                Some(number) => page = self.load_tree_page(number)?,
                // A branch with no live children: the tree is empty.
                None => return Ok(None),
            }
        }
        Err(EseError::TreeInvariant(format!(
            "object {}: descent exceeded maximum depth {}",
            self.object_id, MAX_TREE_DEPTH
        )))
    }

    /// Descend to the leaf page whose key range covers `key`.
    ///
    /// Returns `None` when every branch key compares below the query.
    fn descend_to_leaf(
        &mut self,
        key: &[u8],
        reversed: bool,
    ) -> Result<Option<Rc<Page>>, EseError> {
        let mut page = self.load_tree_page(self.root_page_number)?;
        let extended = self.reader.context().has_extended_page_header();
        let mut visited = HashSet::new();

        for _depth in 0..MAX_TREE_DEPTH {
            if page.is_leaf() {
                return Ok(Some(page));
            }
            if !visited.insert(page.number) {
                return Err(EseError::TreeInvariant(format!(
                    "object {}: page {} revisited during descent",
                    self.object_id, page.number
                )));
            }
            let common = page_common_key(&page).to_vec();
            let mut child = None;
            for value in page.values().iter().skip(1) {
                let tree_value =
                    match PageTreeValue::parse(value, &common, extended, page.number)? {
                        Some(v) => v,
                        None => continue,
                    };
                // Branch keys are inclusive upper bounds; an empty key is
                // an unbounded rightmost child.
                if tree_value.key.is_empty()
                    || compare_keys(key, &tree_value.key, reversed) != Ordering::Greater
                {
                    child = Some(tree_value.child_page_number(page.number)?);
                    break;
                }
            }
            match child {
                Some(number) => page = self.load_tree_page(number)?,
                None => return Ok(None),
            }
        }
        Err(EseError::TreeInvariant(format!(
            "object {}: descent exceeded maximum depth {}",
            self.object_id, MAX_TREE_DEPTH
        )))
    }

    /// Find the leaf value with exactly `key`.
    pub fn find(&mut self, key: &[u8], reversed: bool) -> Result<Option<LeafValue>, EseError> {
        let extended = self.reader.context().has_extended_page_header();
        let page = match self.descend_to_leaf(key, reversed)? {
            Some(page) => page,
            None => return Ok(None),
        };
        let common = page_common_key(&page).to_vec();
        for value in page.values().iter().skip(1) {
            if let Some(tree_value) = PageTreeValue::parse(value, &common, extended, page.number)? {
                match compare_keys(key, &tree_value.key, reversed) {
                    Ordering::Equal => {
                        return Ok(Some(LeafValue {
                            page_number: page.number,
                            page_flags: page.header.flags,
                            key: tree_value.key,
                            data: tree_value.data,
                        }))
                    }
                    Ordering::Less => return Ok(None),
                    Ordering::Greater => {}
                }
            }
        }
        Ok(None)
    }

    /// Start a left-to-right walk over every leaf value. The walker owns
    /// this tree; drop it to get the reader borrow back.
    pub fn leaf_walker(self) -> LeafWalker<'r, S> {
        LeafWalker {
            tree: self,
            state: WalkState::NotStarted,
        }
    }

    /// Start a walk at the leaf page covering `key` instead of the
    /// leftmost leaf; values before `key` on that page are still yielded.
    pub fn leaf_walker_from(mut self, key: &[u8]) -> Result<LeafWalker<'r, S>, EseError> {
        let start = self.descend_to_leaf(key, false)?;
        Ok(LeafWalker {
            tree: self,
            state: match start {
                Some(page) => WalkState::InPage {
                    page,
                    tag_index: 1,
                    visited: HashSet::new(),
                },
                None => WalkState::Done,
            },
        })
    }

    /// Total number of live leaf values in the tree.
    ///
    /// The first call walks every leaf; the result is cached.
    pub fn number_of_leaf_values(&mut self) -> Result<usize, EseError> {
        if let Some(total) = self.total_leaf_values {
            return Ok(total);
        }
        let mut total = 0usize;
        let scan = PageTree::new(&mut *self.reader, self.object_id, self.root_page_number);
        let mut walker = scan.leaf_walker();
        while walker.next_value()?.is_some() {
            total += 1;
        }
        self.total_leaf_values = Some(total);
        Ok(total)
    }

    /// The `index`-th live leaf value, skipping whole pages through the
    /// count cache where it is already warm.
    pub fn leaf_value_at(&mut self, index: usize) -> Result<Option<LeafValue>, EseError> {
        let extended = self.reader.context().has_extended_page_header();
        let max_leaf_pages = self.reader.context().max_leaf_pages;
        let mut remaining = index;
        let mut page = match self.leftmost_leaf()? {
            Some(page) => page,
            None => return Ok(None),
        };
        let mut visited = HashSet::new();

        loop {
            if !visited.insert(page.number) {
                return Err(EseError::TreeInvariant(format!(
                    "object {}: leaf page {} revisited",
                    self.object_id, page.number
                )));
            }
            if visited.len() > max_leaf_pages {
                return Err(EseError::TreeInvariant(format!(
                    "object {}: leaf walk exceeded {} pages",
                    self.object_id, max_leaf_pages
                )));
            }
            let count = match self.leaf_value_counts.get(&page.number) {
                Some(&count) => count,
                None => {
                    let common = page_common_key(&page).to_vec();
                    let count = page
                        .values()
                        .iter()
                        .skip(1)
                        .filter(|value| {
                            parse_live_value(value, &common, extended, page.number).is_some()
                        })
                        .count();
                    self.leaf_value_counts.insert(page.number, count);
                    count
                }
            };

            if remaining < count {
                let common = page_common_key(&page).to_vec();
                for value in page.values().iter().skip(1) {
                    if let Some(tree_value) =
                        parse_live_value(value, &common, extended, page.number)
                    {
                        if remaining == 0 {
                            return Ok(Some(LeafValue {
                                page_number: page.number,
                                page_flags: page.header.flags,
                                key: tree_value.key,
                                data: tree_value.data,
                            }));
                        }
                        remaining -= 1;
                    }
                }
                return Err(EseError::PageMalformed {
                    page: page.number,
                    reason: "cached leaf value count diverged from page contents".to_string(),
                });
            }
            remaining -= count;

            let next = page.header.next_page;
            if next == 0 {
                return Ok(None);
            }
            let previous = page.number;
            page = self.load_tree_page(next)?;
            if page.header.previous_page != previous {
                return Err(EseError::TreeInvariant(format!(
                    "object {}: leaf chain broken between pages {} and {}",
                    self.object_id, previous, next
                )));
            }
        }
    }
}

enum WalkState {
    NotStarted,
    InPage {
        page: Rc<Page>,
        tag_index: usize,
        visited: HashSet<u32>,
    },
    Done,
}

/// A lazy left-to-right walk over the leaf values of one tree.
///
/// Produced by [`PageTree::leaf_walker`]; advance with
/// [`LeafWalker::next_value`].
pub struct LeafWalker<'r, S: ByteSource> {
    tree: PageTree<'r, S>,
    state: WalkState,
}

impl<S: ByteSource> LeafWalker<'_, S> {
    /// Mutable access to the page reader, for nested lookups between
    /// leaf reads.
    pub fn reader(&mut self) -> &mut PageReader<S> {
        self.tree.reader()
    }

    /// The next live leaf value, or `None` when the walk is finished.
    pub fn next_value(&mut self) -> Result<Option<LeafValue>, EseError> {
        loop {
            match &mut self.state {
                WalkState::NotStarted => {
                    self.state = match self.tree.leftmost_leaf()? {
                        Some(page) => WalkState::InPage {
                            page,
                            tag_index: 1,
                            visited: HashSet::new(),
                        },
                        None => WalkState::Done,
                    };
                }
                WalkState::Done => return Ok(None),
                WalkState::InPage {
                    page,
                    tag_index,
                    visited,
                } => {
                    let extended = self.tree.reader.context().has_extended_page_header();
                    if *tag_index < page.values().len() {
                        let value = &page.values()[*tag_index];
                        *tag_index += 1;
                        let common = page_common_key(page);
                        if let Some(tree_value) =
                            parse_live_value(value, common, extended, page.number)
                        {
                            return Ok(Some(LeafValue {
                                page_number: page.number,
                                page_flags: page.header.flags,
                                key: tree_value.key,
                                data: tree_value.data,
                            }));
                        }
                        continue;
                    }

                    // Page exhausted: follow the sibling chain.
                    let next = page.header.next_page;
                    let previous = page.number;
                    if next == 0 {
                        self.state = WalkState::Done;
                        continue;
                    }
                    if !visited.insert(previous) {
                        return Err(EseError::TreeInvariant(format!(
                            "object {}: leaf page {} revisited",
                            self.tree.object_id, previous
                        )));
                    }
                    let max_leaf_pages = self.tree.reader.context().max_leaf_pages;
                    if visited.len() >= max_leaf_pages {
                        return Err(EseError::TreeInvariant(format!(
                            "object {}: leaf walk exceeded {} pages",
                            self.tree.object_id, max_leaf_pages
                        )));
                    }
                    let taken_visited = std::mem::take(visited);
                    let next_page = self.tree.load_tree_page(next)?;
                    if !next_page.is_leaf() {
                        return Err(EseError::TreeInvariant(format!(
                            "object {}: leaf chain reached non-leaf page {}",
                            self.tree.object_id, next
                        )));
                    }
                    if next_page.header.previous_page != previous {
                        return Err(EseError::TreeInvariant(format!(
                            "object {}: leaf chain broken between pages {} and {}",
                            self.tree.object_id, previous, next
                        )));
                    }
                    if taken_visited.contains(&next) {
                        return Err(EseError::TreeInvariant(format!(
                            "object {}: leaf chain cycles back to page {}",
                            self.tree.object_id, next
                        )));
                    }
                    self.state = WalkState::InPage {
                        page: next_page,
                        tag_index: 1,
                        visited: taken_visited,
                    };
                }
            }
        }
    }
}
