//! Random-access byte source abstraction.
//!
//! The engine reads pages through [`ByteSource`], a minimal positioned-read
//! trait. [`FileSource`] adapts a [`std::fs::File`]; any snapshot with
//! `read_exact_at`-style semantics (a memory buffer, a forensic image
//! reader) can implement the trait instead. Short reads are errors; the
//! hot path only ever issues page-aligned requests and never retries.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::EseError;

/// A positioned, random-access byte source over a consistent snapshot.
///
/// The engine never mutates the source and never reads it concurrently
/// from more than one logical thread of control.
pub trait ByteSource {
    /// Fill `buf` from `offset`. A short read is an error.
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), EseError>;

    /// Total size of the source in bytes.
    fn size(&mut self) -> Result<u64, EseError>;
}

/// A [`ByteSource`] over a file on disk.
pub struct FileSource {
    file: File,
    file_size: u64,
}

impl FileSource {
    /// Open a file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EseError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| EseError::Io(format!("Cannot open {}: {}", path.display(), e)))?;
        let file_size = file
            .metadata()
            .map_err(|e| EseError::Io(format!("Cannot stat {}: {}", path.display(), e)))?
            .len();

        Ok(FileSource { file, file_size })
    }
}

impl ByteSource for FileSource {
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), EseError> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| EseError::Io(format!("Cannot seek to offset {}: {}", offset, e)))?;
        self.file.read_exact(buf).map_err(|e| {
            EseError::Io(format!(
                "Cannot read {} bytes at offset {}: {}",
                buf.len(),
                offset,
                e
            ))
        })
    }

    fn size(&mut self) -> Result<u64, EseError> {
        Ok(self.file_size)
    }
}

/// A [`ByteSource`] over an in-memory buffer, used by tests and callers
/// that already hold the whole database.
pub struct SliceSource {
    data: Vec<u8>,
}

impl SliceSource {
    /// Wrap an owned byte buffer.
    pub fn new(data: Vec<u8>) -> Self {
        SliceSource { data }
    }
}

impl ByteSource for SliceSource {
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), EseError> {
        let start = offset as usize;
        let end = start.checked_add(buf.len()).ok_or_else(|| {
            EseError::Io(format!("read range overflow at offset {}", offset))
        })?;
        if end > self.data.len() {
            return Err(EseError::Io(format!(
                "short read: {} bytes at offset {} beyond {} byte source",
                buf.len(),
                offset,
                self.data.len()
            )));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn size(&mut self) -> Result<u64, EseError> {
        Ok(self.data.len() as u64)
    }
}
