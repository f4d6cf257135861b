//! Public database facade.
//!
//! [`Database`] opens an `.edb` file (or any [`ByteSource`] snapshot),
//! validates the file header, reads the catalog, and hands out [`Table`]
//! handles. A table handle owns its effective column list (template
//! columns included) and drives lazy record iteration through a
//! [`RecordCursor`]; long values referenced by record fields are
//! dereferenced through the same handle.
//!
//! One database handle is single-threaded: traversal state, the page
//! cache, and every cursor belong to one logical thread of control. Open
//! the file twice for independent readers. The only piece that may cross
//! threads is the [`AbortHandle`] used for cooperative interruption.

use std::path::Path;
use std::rc::Rc;

use crate::ese::cache::{AbortHandle, PageReader, DEFAULT_PAGE_CACHE_SIZE};
use crate::ese::catalog::{Catalog, ColumnDefinition, LongValueDefinition, TableDefinition};
use crate::ese::constants::*;
use crate::ese::header::FileHeader;
use crate::ese::long_value;
use crate::ese::page::FormatContext;
use crate::ese::page_tree::{LeafWalker, PageTree, RootPageHeader};
use crate::ese::record::Record;
use crate::ese::source::{ByteSource, FileSource};
use crate::ese::space_tree::SpaceTree;
use crate::EseError;

/// Options controlling how a database is opened and read.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Treat checksum mismatches on clean-shutdown files as fatal. With
    /// this off, mismatches are logged and parsing continues best-effort.
    pub strict_checksums: bool,
    /// Number of decoded pages the handle keeps cached.
    pub page_cache_size: usize,
    /// Cap on leaf pages one scan may visit; a sibling chain that runs
    /// past it is cut off as a tree invariant violation.
    pub max_leaf_pages: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            strict_checksums: true,
            page_cache_size: DEFAULT_PAGE_CACHE_SIZE,
            max_leaf_pages: MAX_LEAF_PAGES,
        }
    }
}

/// An open ESE database.
pub struct Database<S: ByteSource = FileSource> {
    reader: PageReader<S>,
    header: FileHeader,
    catalog: Catalog,
}

impl Database<FileSource> {
    /// Open a database file with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EseError> {
        Self::open_with_options(path, OpenOptions::default())
    }

    /// Open a database file with explicit options.
    pub fn open_with_options<P: AsRef<Path>>(
        path: P,
        options: OpenOptions,
    ) -> Result<Self, EseError> {
        Self::from_source(FileSource::open(path)?, options)
    }
}

impl<S: ByteSource> Database<S> {
    /// Open a database over any byte source snapshot.
    pub fn from_source(mut source: S, options: OpenOptions) -> Result<Self, EseError> {
        // The fixed header fields fit well within the smallest page size;
        // the page size then decides how much the header checksum covers.
        let mut probe = vec![0u8; SIZE_PAGE_2K as usize];
        source.read_exact_at(0, &mut probe)?;
        let header = FileHeader::parse(&probe)?;

        if header.file_type != 0 {
            return Err(EseError::SignatureMismatch(format!(
                "file type {} is not a database",
                header.file_type
            )));
        }

        let mut block = vec![0u8; header.page_size as usize];
        source.read_exact_at(0, &mut block)?;
        if let Err(error) = header.verify_checksum(&block) {
            if options.strict_checksums {
                return Err(error);
            }
            log::warn!("continuing past file header: {}", error);
        }

        let file_size = source.size()?;
        let mut ctx = FormatContext::new(&header, file_size, options.strict_checksums);
        ctx.max_leaf_pages = options.max_leaf_pages;
        let mut reader = PageReader::new(source, ctx, options.page_cache_size);
        let catalog = Catalog::read(&mut reader)?;

        Ok(Database {
            reader,
            header,
            catalog,
        })
    }

    /// The validated file header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// The catalog read at open time.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// A handle that cooperatively interrupts any running iteration.
    pub fn abort_handle(&self) -> AbortHandle {
        self.reader.abort_handle()
    }

    /// Every table definition in catalog order.
    pub fn tables(&self) -> &[TableDefinition] {
        self.catalog.tables()
    }

    /// The names of every table in catalog order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.catalog.tables().iter().map(|t| t.name.as_str())
    }

    /// Open a table by name.
    pub fn table(&mut self, name: &str) -> Result<Table<'_, S>, EseError> {
        let definition = self
            .catalog
            .table_by_name(name)
            .cloned()
            .ok_or_else(|| EseError::CatalogMissing(format!("table \"{}\"", name)))?;
        let columns = Rc::new(self.catalog.effective_columns(&definition));
        Ok(Table {
            reader: &mut self.reader,
            definition,
            columns,
            record_count: None,
        })
    }

    /// The root page header of the database tree (object id 1, page 1),
    /// exposed for diagnostics.
    pub fn root_page_header(&mut self) -> Result<RootPageHeader, EseError> {
        let mut tree = PageTree::new(&mut self.reader, OBJECT_ID_DATABASE, PAGE_NUMBER_DATABASE);
        tree.root_page_header()
    }
}

/// A handle on one table, created from the catalog on demand.
pub struct Table<'db, S: ByteSource> {
    reader: &'db mut PageReader<S>,
    definition: TableDefinition,
    columns: Rc<Vec<ColumnDefinition>>,
    record_count: Option<usize>,
}

impl<'db, S: ByteSource> Table<'db, S> {
    /// The table name.
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// The catalog definition this handle was created from.
    pub fn definition(&self) -> &TableDefinition {
        &self.definition
    }

    /// The effective columns: template-table columns first, then the
    /// table's own, both in catalog order.
    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// Find a column by name.
    pub fn column_by_name(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Number of records in the table. The first call scans the leaf
    /// chain; the count is cached on the handle.
    pub fn number_of_records(&mut self) -> Result<usize, EseError> {
        if let Some(count) = self.record_count {
            return Ok(count);
        }
        let mut tree = self.data_tree();
        let count = tree.number_of_leaf_values()?;
        self.record_count = Some(count);
        Ok(count)
    }

    /// Fetch one record by its position in leaf-key order.
    pub fn record(&mut self, index: usize) -> Result<Option<Record>, EseError> {
        let columns = Rc::clone(&self.columns);
        let ctx = *self.reader.context();
        let mut tree = self.data_tree();
        match tree.leaf_value_at(index)? {
            Some(leaf) => Record::decode(leaf.key, &leaf.data, columns, &ctx).map(Some),
            None => Ok(None),
        }
    }

    /// Start a lazy scan over every record in leaf-key order.
    pub fn records(&mut self) -> RecordCursor<'_, S> {
        let columns = Rc::clone(&self.columns);
        let long_value = self.definition.long_value.clone();
        let tree = PageTree::new(
            &mut *self.reader,
            self.definition.fdp_object_id,
            self.definition.fdp_page_number,
        );
        RecordCursor {
            walker: tree.leaf_walker(),
            columns,
            long_value,
        }
    }

    /// Start a lazy scan over the leaf entries of a secondary index.
    pub fn index_entries(&mut self, index_name: &str) -> Result<IndexCursor<'_, S>, EseError> {
        let index = self
            .definition
            .indexes
            .iter()
            .find(|i| i.name == index_name)
            .ok_or_else(|| {
                EseError::CatalogMissing(format!(
                    "index \"{}\" on table \"{}\"",
                    index_name, self.definition.name
                ))
            })?;
        let tree = PageTree::new(&mut *self.reader, index.identifier, index.fdp_page_number);
        Ok(IndexCursor {
            walker: tree.leaf_walker(),
        })
    }

    /// Assemble the full bytes of a long value referenced by a record
    /// field of this table.
    pub fn long_value(&mut self, id: u32) -> Result<Vec<u8>, EseError> {
        let definition = self.long_value_definition(id)?;
        long_value::read_long_value(self.reader, &definition, id)
    }

    /// Read a byte range of a long value.
    pub fn long_value_range(
        &mut self,
        id: u32,
        offset: u32,
        length: u32,
    ) -> Result<Vec<u8>, EseError> {
        let definition = self.long_value_definition(id)?;
        long_value::read_long_value_range(self.reader, &definition, id, offset, length)
    }

    /// The space tree of this table's data tree, when it has one.
    pub fn owned_space(&mut self) -> Result<Option<SpaceTree>, EseError> {
        let object_id = self.definition.fdp_object_id;
        let root_header = self.data_tree().root_page_header()?;
        if root_header.space_tree_page_number == 0 {
            return Ok(None);
        }
        SpaceTree::read(self.reader, object_id, root_header.space_tree_page_number).map(Some)
    }

    fn data_tree(&mut self) -> PageTree<'_, S> {
        PageTree::new(
            &mut *self.reader,
            self.definition.fdp_object_id,
            self.definition.fdp_page_number,
        )
    }

    fn long_value_definition(&self, id: u32) -> Result<LongValueDefinition, EseError> {
        self.definition
            .long_value
            .clone()
            .ok_or_else(|| EseError::LongValueMissing {
                id,
                reason: format!("table \"{}\" has no long value tree", self.definition.name),
            })
    }
}

/// A lazy, single-pass scan over a table's records.
///
/// Records own their bytes; advancing the cursor does not invalidate
/// previously returned records. Records that fail to decode are skipped
/// with a diagnostic so a partially damaged table still enumerates.
pub struct RecordCursor<'t, S: ByteSource> {
    walker: LeafWalker<'t, S>,
    columns: Rc<Vec<ColumnDefinition>>,
    long_value: Option<LongValueDefinition>,
}

impl<S: ByteSource> RecordCursor<'_, S> {
    /// The next record, or `None` at the end of the table.
    pub fn next_record(&mut self) -> Result<Option<Record>, EseError> {
        loop {
            let leaf = match self.walker.next_value()? {
                Some(leaf) => leaf,
                None => return Ok(None),
            };
            let ctx = *self.walker.reader().context();
            match Record::decode(leaf.key, &leaf.data, Rc::clone(&self.columns), &ctx) {
                Ok(record) => return Ok(Some(record)),
                Err(error @ EseError::RecordMalformed { .. }) => {
                    log::warn!(
                        "skipping record on page {}: {}",
                        leaf.page_number,
                        error
                    );
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Dereference a long value while iterating, without releasing the
    /// cursor.
    pub fn long_value(&mut self, id: u32) -> Result<Vec<u8>, EseError> {
        let definition = self
            .long_value
            .clone()
            .ok_or_else(|| EseError::LongValueMissing {
                id,
                reason: "table has no long value tree".to_string(),
            })?;
        long_value::read_long_value(self.walker.reader(), &definition, id)
    }
}

/// One leaf entry of a secondary index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// The collated index key.
    pub key: Vec<u8>,
    /// The entry payload (the primary key of the indexed record).
    pub data: Vec<u8>,
}

/// A lazy scan over the leaf entries of a secondary index, in collation
/// order.
pub struct IndexCursor<'t, S: ByteSource> {
    walker: LeafWalker<'t, S>,
}

impl<S: ByteSource> IndexCursor<'_, S> {
    /// The next index entry, or `None` at the end.
    pub fn next_entry(&mut self) -> Result<Option<IndexEntry>, EseError> {
        match self.walker.next_value()? {
            Some(leaf) => Ok(Some(IndexEntry {
                key: leaf.key,
                data: leaf.data,
            })),
            None => Ok(None),
        }
    }
}
