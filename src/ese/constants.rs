//! ESE page and file structure constants.
//!
//! Offsets and magic values of the EDB on-disk format. All multi-byte
//! fields are little-endian unless a comment says otherwise; the notable
//! exceptions are B+-tree keys with lexicographic locality (long-value
//! identifiers and space-tree page numbers).

// ── Page sizes ──────────────────────────────────────────────────────

/// Smallest supported page size (2 KiB).
pub const SIZE_PAGE_2K: u32 = 2048;
/// 4 KiB page size.
pub const SIZE_PAGE_4K: u32 = 4096;
/// 8 KiB page size.
pub const SIZE_PAGE_8K: u32 = 8192;
/// 16 KiB page size.
pub const SIZE_PAGE_16K: u32 = 16384;
/// Largest supported page size (32 KiB).
pub const SIZE_PAGE_32K: u32 = 32768;

/// The page sizes a file header may declare.
pub const SUPPORTED_PAGE_SIZES: [u32; 5] = [
    SIZE_PAGE_2K,
    SIZE_PAGE_4K,
    SIZE_PAGE_8K,
    SIZE_PAGE_16K,
    SIZE_PAGE_32K,
];

// ── File header ─────────────────────────────────────────────────────

/// The file signature, stored little-endian at byte 4 (`ef cd ab 89`).
pub const FILE_SIGNATURE: u32 = 0x89AB_CDEF;

/// Seed of every XOR-32 checksum in the legacy format.
pub const XOR32_SEED: u32 = 0x89AB_CDEF;

/// Offset of the stored XOR-32 checksum over the header block. 4 bytes.
pub const HDR_CHECKSUM: usize = 0;
/// Offset of the file signature. 4 bytes.
pub const HDR_SIGNATURE: usize = 4;
/// Offset of the file format version. 4 bytes.
pub const HDR_FORMAT_VERSION: usize = 8;
/// Offset of the file type (0 = database, 1 = streaming log). 4 bytes.
pub const HDR_FILE_TYPE: usize = 12;
/// Offset of the database state. 4 bytes.
pub const HDR_DATABASE_STATE: usize = 52;
/// Offset of the file format revision. 4 bytes.
pub const HDR_FORMAT_REVISION: usize = 236;
/// Offset of the page size. 4 bytes.
pub const HDR_PAGE_SIZE: usize = 240;
/// Offset of the creation file format version. 4 bytes.
pub const HDR_CREATION_FORMAT_VERSION: usize = 244;
/// Offset of the creation file format revision. 4 bytes.
pub const HDR_CREATION_FORMAT_REVISION: usize = 248;

/// Database state value of a file that was not shut down cleanly. Header
/// and page checksum mismatches are tolerated (with a warning) in this
/// state.
pub const DATABASE_STATE_DIRTY_SHUTDOWN: u32 = 2;

/// First format revision with the new record format (ECC-32 page
/// checksums, Exchange 2003 SP1).
pub const FORMAT_REVISION_NEW_RECORD_FORMAT: u32 = 0x0b;
/// First format revision with the extended page header on pages of
/// 16 KiB and larger (Windows 7).
pub const FORMAT_REVISION_EXTENDED_PAGE_HEADER: u32 = 0x11;

// ── Page header (40 bytes, present at the start of every page) ──────

/// Size of the common page header in bytes.
pub const SIZE_PAGE_HEADER: usize = 40;
/// Size of the extended page header in bytes (format revision >= 0x11,
/// pages of 16 KiB and larger, immediately after the common header).
pub const SIZE_EXTENDED_PAGE_HEADER: usize = 40;

/// Offset of the XOR-32 checksum. 4 bytes.
pub const PAGE_XOR_CHECKSUM: usize = 0;
/// Offset of the page number, or the ECC-32 checksum in the new record
/// format. 4 bytes.
pub const PAGE_NUMBER_OR_ECC: usize = 4;
/// Offset of the database last modification time. 8 bytes.
pub const PAGE_MODIFICATION_TIME: usize = 8;
/// Offset of the previous page number in the sibling chain. 4 bytes.
pub const PAGE_PREVIOUS: usize = 16;
/// Offset of the next page number in the sibling chain. 4 bytes.
pub const PAGE_NEXT: usize = 20;
/// Offset of the father data page (FDP) object identifier. 4 bytes.
pub const PAGE_FDP_OBJECT_ID: usize = 24;
/// Offset of the available data size. 2 bytes.
pub const PAGE_AVAILABLE_DATA_SIZE: usize = 28;
/// Offset of the available uncommitted data size. 2 bytes.
pub const PAGE_AVAILABLE_UNCOMMITTED_DATA_SIZE: usize = 30;
/// Offset of the first available data offset. 2 bytes.
pub const PAGE_AVAILABLE_DATA_OFFSET: usize = 32;
/// Offset of the first available page tag (the tag count). 2 bytes.
pub const PAGE_AVAILABLE_PAGE_TAG: usize = 34;
/// Offset of the page flags. 4 bytes.
pub const PAGE_FLAGS: usize = 36;

// ── Page flags ──────────────────────────────────────────────────────

/// The page is the root of its tree.
pub const PAGE_FLAG_IS_ROOT: u32 = 0x0001;
/// The page is a leaf.
pub const PAGE_FLAG_IS_LEAF: u32 = 0x0002;
/// The page is an internal (parent) node.
pub const PAGE_FLAG_IS_PARENT: u32 = 0x0004;
/// The page is empty.
pub const PAGE_FLAG_IS_EMPTY: u32 = 0x0008;
/// The page belongs to a space tree.
pub const PAGE_FLAG_IS_SPACE_TREE: u32 = 0x0020;
/// The page belongs to an index tree.
pub const PAGE_FLAG_IS_INDEX: u32 = 0x0040;
/// The page belongs to a long-value tree.
pub const PAGE_FLAG_IS_LONG_VALUE: u32 = 0x0080;
/// Vendor-specific, seen on Exchange databases.
pub const PAGE_FLAG_0X0400: u32 = 0x0400;
/// Vendor-specific, seen on Exchange databases.
pub const PAGE_FLAG_0X0800: u32 = 0x0800;
/// The page uses the new record format (Exchange 2003 SP1).
pub const PAGE_FLAG_IS_NEW_RECORD_FORMAT: u32 = 0x2000;

// ── Page tags ───────────────────────────────────────────────────────

/// Size of one page tag entry (two 16-bit words).
pub const SIZE_PAGE_TAG: usize = 4;

/// Tag flag: the value is defunct and must be skipped by tree walks.
pub const PAGE_TAG_FLAG_IS_DEFUNCT: u8 = 0x04;
/// Tag flag: the value starts with a 16-bit common key size.
pub const PAGE_TAG_FLAG_HAS_COMMON_KEY_SIZE: u8 = 0x02;
/// Tag flag of unknown meaning, observed in the wild.
pub const PAGE_TAG_FLAG_UNKNOWN_0X01: u8 = 0x01;

// ── Well-known objects ──────────────────────────────────────────────

/// Object identifier of the database root tree.
pub const OBJECT_ID_DATABASE: u32 = 1;
/// Object identifier of the catalog tree.
pub const OBJECT_ID_CATALOG: u32 = 2;
/// Page number of the database root tree.
pub const PAGE_NUMBER_DATABASE: u32 = 1;
/// Page number of the catalog root.
pub const PAGE_NUMBER_CATALOG: u32 = 4;

/// Maximum B+-tree descent depth; exceeding it is a tree invariant error.
pub const MAX_TREE_DEPTH: usize = 256;

/// Default cap on leaf pages visited by one walk. A corrupt sibling
/// chain that keeps producing fresh page numbers is cut off here instead
/// of running to the end of the file.
pub const MAX_LEAF_PAGES: usize = 1 << 20;

// ── Root page header ────────────────────────────────────────────────

/// Size of the root page header in bytes.
pub const SIZE_ROOT_PAGE_HEADER: usize = 16;
/// Size of the extended root page header in bytes.
pub const SIZE_EXTENDED_ROOT_PAGE_HEADER: usize = 25;

// ── Catalog ─────────────────────────────────────────────────────────

/// Catalog object type: table.
pub const CATALOG_TYPE_TABLE: u16 = 1;
/// Catalog object type: column.
pub const CATALOG_TYPE_COLUMN: u16 = 2;
/// Catalog object type: index.
pub const CATALOG_TYPE_INDEX: u16 = 3;
/// Catalog object type: long value.
pub const CATALOG_TYPE_LONG_VALUE: u16 = 4;
/// Catalog object type: callback.
pub const CATALOG_TYPE_CALLBACK: u16 = 5;

/// First variable-size data type number in definitions and records.
pub const FIRST_VARIABLE_DATA_TYPE: u16 = 128;

/// Variable data type carrying the object name.
pub const VARIABLE_DATA_TYPE_NAME: u16 = 128;
/// Variable data type carrying the template table name on table entries.
pub const VARIABLE_DATA_TYPE_TEMPLATE_TABLE: u16 = 130;
/// Variable data type carrying the default value on column entries.
pub const VARIABLE_DATA_TYPE_DEFAULT_VALUE: u16 = 131;

// ── Tagged data value flags ─────────────────────────────────────────

/// The tagged value holds a 4-byte long-value identifier instead of data.
pub const VALUE_FLAG_LONG_VALUE: u8 = 0x01;
/// The tagged value is 7-bit or XPRESS compressed.
pub const VALUE_FLAG_COMPRESSED: u8 = 0x02;
/// The tagged value is a multi-value (16-bit offset table).
pub const VALUE_FLAG_MULTI_VALUE: u8 = 0x08;
/// The tagged value is a sparse multi-value.
pub const VALUE_FLAG_MULTI_VALUE_OFFSET: u8 = 0x10;

// ── Code pages ──────────────────────────────────────────────────────

/// UTF-16 little-endian.
pub const CODEPAGE_UNICODE: u32 = 1200;
/// UTF-16 big-endian.
pub const CODEPAGE_UNICODE_BE: u32 = 1201;
/// Windows Western (latin 1); the default for object names.
pub const CODEPAGE_WINDOWS_1252: u32 = 1252;
/// 7-bit ASCII.
pub const CODEPAGE_ASCII: u32 = 20127;
