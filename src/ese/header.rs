//! ESE file header parsing and validation.
//!
//! The file header occupies one page-size block at offset 0 and carries
//! the signature, format version/revision, database state, and the page
//! size that shapes the rest of the file. A backup copy lives in the next
//! block; only the primary is consumed here.
//!
//! The stored XOR-32 checksum covers bytes `[4..page_size)` with seed
//! `0x89ABCDEF`. A mismatch is fatal unless the database state records a
//! dirty shutdown, in which case it is tolerated with a warning: the
//! file may legitimately be ahead of its header.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::ese::checksum::xor32;
use crate::ese::constants::*;
use crate::EseError;

/// Parsed file header.
#[derive(Debug, Clone, Serialize)]
pub struct FileHeader {
    /// The stored XOR-32 checksum over the header block. Bytes 0-3.
    pub checksum: u32,
    /// The file format version. Bytes 8-11.
    pub format_version: u32,
    /// The file type (0 = database, 1 = streaming file). Bytes 12-15.
    pub file_type: u32,
    /// The database state. Bytes 52-55.
    pub database_state: u32,
    /// The file format revision. Bytes 236-239.
    pub format_revision: u32,
    /// The page size in bytes. Bytes 240-243.
    pub page_size: u32,
    /// The format version the file was created with. Bytes 244-247.
    pub creation_format_version: u32,
    /// The format revision the file was created with. Bytes 248-251.
    pub creation_format_revision: u32,
}

impl FileHeader {
    /// Minimum number of bytes needed to parse the fixed fields.
    pub const MIN_SIZE: usize = 252;

    /// Parse the file header fields from a byte slice.
    ///
    /// The slice must hold at least [`FileHeader::MIN_SIZE`] bytes.
    /// Validates the signature and the declared page size; checksum
    /// verification is separate (see [`FileHeader::verify_checksum`])
    /// because it covers a full page-size block.
    pub fn parse(data: &[u8]) -> Result<Self, EseError> {
        if data.len() < Self::MIN_SIZE {
            return Err(EseError::SignatureMismatch(format!(
                "file header truncated: {} bytes",
                data.len()
            )));
        }

        let signature = LittleEndian::read_u32(&data[HDR_SIGNATURE..]);
        if signature != FILE_SIGNATURE {
            return Err(EseError::SignatureMismatch(format!(
                "bad file signature {:#010x}",
                signature
            )));
        }

        let header = FileHeader {
            checksum: LittleEndian::read_u32(&data[HDR_CHECKSUM..]),
            format_version: LittleEndian::read_u32(&data[HDR_FORMAT_VERSION..]),
            file_type: LittleEndian::read_u32(&data[HDR_FILE_TYPE..]),
            database_state: LittleEndian::read_u32(&data[HDR_DATABASE_STATE..]),
            format_revision: LittleEndian::read_u32(&data[HDR_FORMAT_REVISION..]),
            page_size: LittleEndian::read_u32(&data[HDR_PAGE_SIZE..]),
            creation_format_version: LittleEndian::read_u32(&data[HDR_CREATION_FORMAT_VERSION..]),
            creation_format_revision: LittleEndian::read_u32(&data[HDR_CREATION_FORMAT_REVISION..]),
        };

        if !SUPPORTED_PAGE_SIZES.contains(&header.page_size) {
            return Err(EseError::SignatureMismatch(format!(
                "unsupported page size {}",
                header.page_size
            )));
        }

        Ok(header)
    }

    /// Verify the stored XOR-32 checksum over the full header block.
    ///
    /// `block` must be the first `page_size` bytes of the file. A mismatch
    /// on a dirty-shutdown database is downgraded to a warning.
    pub fn verify_checksum(&self, block: &[u8]) -> Result<(), EseError> {
        let calculated = xor32(&block[4..], XOR32_SEED);
        if calculated == self.checksum {
            return Ok(());
        }
        if self.database_state == DATABASE_STATE_DIRTY_SHUTDOWN {
            log::warn!(
                "file header checksum mismatch tolerated on dirty shutdown \
                 (stored {:#010x}, calculated {:#010x})",
                self.checksum,
                calculated
            );
            return Ok(());
        }
        Err(EseError::ChecksumMismatch {
            page: 0,
            kind: "XOR-32",
            stored: self.checksum,
            calculated,
        })
    }

    /// Returns true if the database was shut down dirty.
    pub fn is_dirty(&self) -> bool {
        self.database_state == DATABASE_STATE_DIRTY_SHUTDOWN
    }

    /// Returns true if pages carry the extended 40-byte header.
    pub fn has_extended_page_header(&self) -> bool {
        self.format_revision >= FORMAT_REVISION_EXTENDED_PAGE_HEADER
            && self.page_size >= SIZE_PAGE_16K
    }

    /// The highest valid user page number for a file of `file_size` bytes.
    ///
    /// The header block and its backup copy are reserved, so the last user
    /// page is two blocks short of the file end.
    pub fn last_page_number(&self, file_size: u64) -> u64 {
        (file_size / self.page_size as u64).saturating_sub(2)
    }
}
