//! Extensible Storage Engine (ESE) database parsing library.
//!
//! The `esedb-utils` crate (library name `ese`) provides Rust types and
//! functions for reading ESE database files (`.edb`), the on-disk format
//! used by Exchange, Active Directory, the Windows search and update
//! services, and several browser storage subsystems. The engine is strictly
//! read-only: it opens a database produced by another process and exposes
//! its tables, columns, indexes, records, and long values.
//!
//! # Quick example
//!
//! ```no_run
//! use ese::ese::database::Database;
//!
//! // Open a database (page size is read from the file header)
//! let mut db = Database::open("Windows.edb").unwrap();
//!
//! let names: Vec<String> = db.table_names().map(str::to_string).collect();
//! for name in names {
//!     let mut table = db.table(&name).unwrap();
//!     println!("{}: {} columns", name, table.columns().len());
//!     let mut records = table.records();
//!     while let Some(record) = records.next_record().unwrap() {
//!         let _ = record.value(1);
//!     }
//! }
//! ```
//!
//! ## Key entry points
//!
//! | Type / Function | Purpose |
//! |-----------------|---------|
//! | [`Database`](ese::database::Database) | Open `.edb` files, resolve tables, iterate records |
//! | [`FileHeader`](ese::header::FileHeader) | Parse and validate the database file header |
//! | [`Page`](ese::page::Page) | One decoded database page with its tag array |
//! | [`PageTree`](ese::page_tree::PageTree) | Generic B+-tree walker over the pages of one object |
//! | [`Catalog`](ese::catalog::Catalog) | Table/column/index/long-value definitions (object id 2) |
//! | [`TypedValue`](ese::value::TypedValue) | Decoded column value |
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`ese::source`] | Random-access byte source abstraction and file adapter |
//! | [`ese::checksum`] | XOR-32 and ECC-32 page integrity codes |
//! | [`ese::header`] | File header parsing and validation |
//! | [`ese::page`] | Page header, tag array, page values |
//! | [`ese::cache`] | Fixed-capacity LRU cache of decoded pages |
//! | [`ese::page_tree`] | B+-tree traversal (branch descent, leaf chains, key search) |
//! | [`ese::space_tree`] | Owned/available space tree diagnostics |
//! | [`ese::catalog`] | Catalog page tree and object definitions |
//! | [`ese::record`] | Record decoding against a column catalog |
//! | [`ese::long_value`] | Multi-segment long value assembly |
//! | [`ese::value`] | Typed value conversion (integers, floats, text, GUID, filetime) |
//! | [`ese::codepage`] | Windows code page to UTF-8 conversion |
//! | [`ese::database`] | Public facade: open, tables, records |
//! | [`ese::constants`] | ESE page/file structure constants |

pub mod ese;

use thiserror::Error;

/// Errors returned by `ese` operations.
///
/// I/O and structural errors bubble up to the caller. Per-record and
/// per-value errors are surfaced on the offending record or value so that
/// bulk enumeration of a partially damaged database can make progress; the
/// non-fatal events are also reported through the [`log`] crate.
#[derive(Error, Debug)]
pub enum EseError {
    /// The byte source failed or returned a short read.
    #[error("I/O error: {0}")]
    Io(String),

    /// Wrong file signature or an unsupported page size / format revision.
    #[error("signature mismatch: {0}")]
    SignatureMismatch(String),

    /// A stored page checksum does not match the calculated value on a
    /// clean-shutdown file.
    #[error("checksum mismatch on page {page}: stored {stored:#010x}, calculated {calculated:#010x} ({kind})")]
    ChecksumMismatch {
        /// Page number (0 for the file header block).
        page: u32,
        /// Which integrity code failed ("XOR-32" or "ECC-32").
        kind: &'static str,
        /// The checksum stored on disk.
        stored: u32,
        /// The checksum calculated from the page bytes.
        calculated: u32,
    },

    /// Tag offsets out of range or an impossible page header.
    #[error("malformed page {page}: {reason}")]
    PageMalformed {
        /// Page number.
        page: u32,
        /// What was wrong with it.
        reason: String,
    },

    /// Father-object-id mismatch, recursion depth exceeded, or a page cycle.
    #[error("tree invariant violated: {0}")]
    TreeInvariant(String),

    /// A table or other catalog object was not found.
    #[error("catalog object not found: {0}")]
    CatalogMissing(String),

    /// The record decoder read past the record end or saw an unknown column.
    #[error("malformed record (column {column}): {reason}")]
    RecordMalformed {
        /// Identifier of the offending column.
        column: u32,
        /// What was wrong with it.
        reason: String,
    },

    /// A long-value descriptor is absent or its segments leave a gap.
    #[error("long value {id:#010x}: {reason}")]
    LongValueMissing {
        /// Long value identifier.
        id: u32,
        /// What was wrong with it.
        reason: String,
    },

    /// A column value could not be decoded to its declared type.
    #[error("value decode error (column {column}): {reason}")]
    ValueDecode {
        /// Identifier of the offending column.
        column: u32,
        /// What was wrong with it.
        reason: String,
    },
}
