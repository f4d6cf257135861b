//! Catalog reading.
//!
//! The catalog is the B+-tree of object id 2 rooted at page 4. Every leaf
//! value is a data definition describing one object: a table, a column,
//! an index, a long-value tree, or a callback. Entries arrive in key
//! order, tables first within their subtree; each non-table entry
//! attaches to the most recently seen table with the same father data
//! page object identifier.
//!
//! A data definition is a fixed region of up to eleven numbered fields
//! (the `last_fixed_size_data_type` byte says how many are present),
//! followed by a variable region of 2-byte cumulative sizes and value
//! bytes. Variable data type 128 is the object name; 130 names the
//! template table whose columns a table inherits.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::ese::cache::PageReader;
use crate::ese::codepage;
use crate::ese::constants::*;
use crate::ese::page_tree::PageTree;
use crate::ese::source::ByteSource;
use crate::ese::value::ColumnType;
use crate::EseError;

/// One raw catalog data definition, before typing.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogDefinition {
    /// Father data page object identifier of the described object's owner.
    pub father_data_page_object_id: u32,
    /// Object type (table, column, index, long value, callback).
    pub object_type: u16,
    /// Object identifier (column id, index id, ...).
    pub identifier: u32,
    /// Column type for columns; FDP page number for every other type.
    pub column_type_or_page: u32,
    /// Space usage: declared size for columns.
    pub size: u32,
    /// Object flags.
    pub flags: u32,
    /// Code page for columns, locale identifier for indexes.
    pub codepage_or_lcid: u32,
    /// Root flag.
    pub root_flag: u8,
    /// Record offset.
    pub record_offset: u16,
    /// Locale map flags.
    pub lc_map_flags: u32,
    /// Maximum key size.
    pub key_most: u16,
    /// Object name decoded from variable data type 128.
    pub name: String,
    /// The raw undecoded name bytes.
    pub name_raw: Vec<u8>,
    /// Template table name from variable data type 130, if present.
    pub template_table_name: Option<String>,
    /// Default value bytes from variable data type 131, if present.
    pub default_value: Option<Vec<u8>>,
    /// Remaining variable entries kept raw, by numeric data type.
    pub other_variable_data: Vec<(u16, Vec<u8>)>,
}

impl CatalogDefinition {
    /// Parse a catalog leaf value.
    pub fn parse(data: &[u8]) -> Result<Self, EseError> {
        if data.len() < 4 {
            return Err(EseError::RecordMalformed {
                column: 0,
                reason: format!("catalog definition of {} bytes", data.len()),
            });
        }
        let last_fixed = data[0];
        let last_variable = data[1];
        let variable_offset = LittleEndian::read_u16(&data[2..]) as usize;

        if !(5..=11).contains(&last_fixed) {
            return Err(EseError::RecordMalformed {
                column: 0,
                reason: format!("last fixed size data type {} out of range", last_fixed),
            });
        }

        let mut definition = CatalogDefinition {
            father_data_page_object_id: 0,
            object_type: 0,
            identifier: 0,
            column_type_or_page: 0,
            size: 0,
            flags: 0,
            codepage_or_lcid: 0,
            root_flag: 0,
            record_offset: 0,
            lc_map_flags: 0,
            key_most: 0,
            name: String::new(),
            name_raw: Vec::new(),
            template_table_name: None,
            default_value: None,
            other_variable_data: Vec::new(),
        };

        // Fixed region: field k is present when last_fixed >= k.
        let mut cursor = 4usize;
        definition.father_data_page_object_id = LittleEndian::read_u32(take(data, &mut cursor, 4)?);
        definition.object_type = LittleEndian::read_u16(take(data, &mut cursor, 2)?);
        definition.identifier = LittleEndian::read_u32(take(data, &mut cursor, 4)?);
        definition.column_type_or_page = LittleEndian::read_u32(take(data, &mut cursor, 4)?);
        definition.size = LittleEndian::read_u32(take(data, &mut cursor, 4)?);
        if last_fixed >= 6 {
            definition.flags = LittleEndian::read_u32(take(data, &mut cursor, 4)?);
        }
        if last_fixed >= 7 {
            definition.codepage_or_lcid = LittleEndian::read_u32(take(data, &mut cursor, 4)?);
        }
        if last_fixed >= 8 {
            definition.root_flag = take(data, &mut cursor, 1)?[0];
        }
        if last_fixed >= 9 {
            definition.record_offset = LittleEndian::read_u16(take(data, &mut cursor, 2)?);
        }
        if last_fixed >= 10 {
            definition.lc_map_flags = LittleEndian::read_u32(take(data, &mut cursor, 4)?);
        }
        if last_fixed >= 11 {
            definition.key_most = LittleEndian::read_u16(take(data, &mut cursor, 2)?);
        }

        // Variable region: cumulative 2-byte sizes, then value bytes.
        if last_variable >= FIRST_VARIABLE_DATA_TYPE as u8 {
            let count = (last_variable as usize) - 127;
            if variable_offset + 2 * count > data.len() {
                return Err(EseError::RecordMalformed {
                    column: 0,
                    reason: "catalog variable size array truncated".to_string(),
                });
            }
            let values_start = variable_offset + 2 * count;
            let mut previous_end = 0usize;
            for index in 0..count {
                let raw =
                    LittleEndian::read_u16(&data[variable_offset + 2 * index..]);
                if (raw & 0x8000) != 0 {
                    continue;
                }
                let end = raw as usize;
                if end < previous_end || values_start + end > data.len() {
                    return Err(EseError::RecordMalformed {
                        column: 0,
                        reason: format!(
                            "catalog variable data type {} spans invalid range",
                            FIRST_VARIABLE_DATA_TYPE as usize + index
                        ),
                    });
                }
                let value = &data[values_start + previous_end..values_start + end];
                previous_end = end;

                let data_type = FIRST_VARIABLE_DATA_TYPE + index as u16;
                match data_type {
                    VARIABLE_DATA_TYPE_NAME => {
                        definition.name_raw = value.to_vec();
                        definition.name = codepage::decode(value, CODEPAGE_WINDOWS_1252)
                            .unwrap_or_default();
                    }
                    VARIABLE_DATA_TYPE_TEMPLATE_TABLE => {
                        definition.template_table_name =
                            codepage::decode(value, CODEPAGE_WINDOWS_1252).ok();
                    }
                    VARIABLE_DATA_TYPE_DEFAULT_VALUE => {
                        definition.default_value = Some(value.to_vec());
                    }
                    other => {
                        definition.other_variable_data.push((other, value.to_vec()));
                    }
                }
            }
        }

        Ok(definition)
    }
}

/// Consume `size` bytes of the fixed region.
fn take<'a>(data: &'a [u8], cursor: &mut usize, size: usize) -> Result<&'a [u8], EseError> {
    if *cursor + size > data.len() {
        return Err(EseError::RecordMalformed {
            column: 0,
            reason: "catalog fixed region truncated".to_string(),
        });
    }
    let slice = &data[*cursor..*cursor + size];
    *cursor += size;
    Ok(slice)
}

/// A column of a table.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnDefinition {
    /// Column identifier. Identifiers below 128 are fixed-size columns,
    /// 128-255 variable-size, 256 and up tagged.
    pub identifier: u32,
    /// Column name.
    pub name: String,
    /// Declared column type.
    pub column_type: ColumnType,
    /// Declared size (maximum for variable columns).
    pub size: u32,
    /// Column flags.
    pub flags: u32,
    /// Code page for text columns.
    pub codepage: u32,
    /// True when the column was inherited from a template table.
    pub inherited: bool,
}

impl ColumnDefinition {
    /// Returns true for fixed-size columns (identifier below 128).
    pub fn is_fixed(&self) -> bool {
        self.identifier < FIRST_VARIABLE_DATA_TYPE as u32
    }

    /// Returns true for variable-size columns (identifier 128-255).
    pub fn is_variable(&self) -> bool {
        (FIRST_VARIABLE_DATA_TYPE as u32..256).contains(&self.identifier)
    }

    /// Returns true for tagged columns (identifier 256 and up).
    pub fn is_tagged(&self) -> bool {
        self.identifier >= 256
    }

    /// Storage size of this column in the fixed region of a record.
    pub fn fixed_size(&self) -> usize {
        self.column_type
            .fixed_size()
            .unwrap_or(self.size as usize)
    }
}

/// A secondary index of a table.
#[derive(Debug, Clone, Serialize)]
pub struct IndexDefinition {
    /// Index identifier; the father object id of the index tree's pages.
    pub identifier: u32,
    /// Index name.
    pub name: String,
    /// Root page of the index tree.
    pub fdp_page_number: u32,
    /// Index flags.
    pub flags: u32,
    /// Collation locale identifier.
    pub locale_identifier: u32,
}

/// The long-value tree of a table.
#[derive(Debug, Clone, Serialize)]
pub struct LongValueDefinition {
    /// Long-value tree identifier; the father object id of its pages.
    pub identifier: u32,
    /// Root page of the long-value tree.
    pub fdp_page_number: u32,
}

/// A callback registered on a table.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackDefinition {
    /// Callback identifier.
    pub identifier: u32,
    /// Callback name.
    pub name: String,
}

/// A table with everything the catalog declares for it.
#[derive(Debug, Clone, Serialize)]
pub struct TableDefinition {
    /// Father data page object identifier; pages of the table's data tree
    /// carry this id.
    pub fdp_object_id: u32,
    /// Root page of the data tree.
    pub fdp_page_number: u32,
    /// Table name.
    pub name: String,
    /// Raw name bytes as stored.
    pub name_raw: Vec<u8>,
    /// Name of the template table whose columns this table inherits.
    pub template_table_name: Option<String>,
    /// The table's own columns, in catalog order.
    pub columns: Vec<ColumnDefinition>,
    /// Secondary indexes.
    pub indexes: Vec<IndexDefinition>,
    /// The long-value tree, if the table has one.
    pub long_value: Option<LongValueDefinition>,
    /// The callback, if the table has one.
    pub callback: Option<CallbackDefinition>,
}

/// All object definitions of a database, read from the catalog tree.
#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    tables: Vec<TableDefinition>,
}

impl Catalog {
    /// Walk the catalog page tree and build every table definition.
    pub fn read<S: ByteSource>(reader: &mut PageReader<S>) -> Result<Self, EseError> {
        let tree = PageTree::new(reader, OBJECT_ID_CATALOG, PAGE_NUMBER_CATALOG);
        let mut tables: Vec<TableDefinition> = Vec::new();
        let mut walker = tree.leaf_walker();

        while let Some(leaf) = walker.next_value()? {
            let definition = match CatalogDefinition::parse(&leaf.data) {
                Ok(definition) => definition,
                Err(error) => {
                    log::warn!(
                        "skipping undecodable catalog entry on page {}: {}",
                        leaf.page_number,
                        error
                    );
                    continue;
                }
            };

            if definition.object_type == CATALOG_TYPE_TABLE {
                tables.push(TableDefinition {
                    fdp_object_id: definition.father_data_page_object_id,
                    fdp_page_number: definition.column_type_or_page,
                    name: definition.name,
                    name_raw: definition.name_raw,
                    template_table_name: definition.template_table_name,
                    columns: Vec::new(),
                    indexes: Vec::new(),
                    long_value: None,
                    callback: None,
                });
                continue;
            }

            // Attach to the most recently seen table with the same father
            // data page object identifier.
            let table = match tables
                .iter_mut()
                .rev()
                .find(|t| t.fdp_object_id == definition.father_data_page_object_id)
            {
                Some(table) => table,
                None => {
                    log::warn!(
                        "catalog entry \"{}\" (type {}) has no parent table with object id {}",
                        definition.name,
                        definition.object_type,
                        definition.father_data_page_object_id
                    );
                    continue;
                }
            };

            match definition.object_type {
                CATALOG_TYPE_COLUMN => table.columns.push(ColumnDefinition {
                    identifier: definition.identifier,
                    name: definition.name,
                    column_type: ColumnType::from_u32(definition.column_type_or_page),
                    size: definition.size,
                    flags: definition.flags,
                    codepage: definition.codepage_or_lcid,
                    inherited: false,
                }),
                CATALOG_TYPE_INDEX => table.indexes.push(IndexDefinition {
                    identifier: definition.identifier,
                    name: definition.name,
                    fdp_page_number: definition.column_type_or_page,
                    flags: definition.flags,
                    locale_identifier: definition.codepage_or_lcid,
                }),
                CATALOG_TYPE_LONG_VALUE => {
                    if table.long_value.is_some() {
                        log::warn!("table \"{}\" declares more than one long value tree", table.name);
                    } else {
                        table.long_value = Some(LongValueDefinition {
                            identifier: definition.identifier,
                            fdp_page_number: definition.column_type_or_page,
                        });
                    }
                }
                CATALOG_TYPE_CALLBACK => {
                    if table.callback.is_some() {
                        log::warn!("table \"{}\" declares more than one callback", table.name);
                    } else {
                        table.callback = Some(CallbackDefinition {
                            identifier: definition.identifier,
                            name: definition.name,
                        });
                    }
                }
                other => {
                    log::warn!(
                        "catalog entry \"{}\" has unknown type {}",
                        definition.name,
                        other
                    );
                }
            }
        }

        Ok(Catalog { tables })
    }

    /// Every table in catalog order.
    pub fn tables(&self) -> &[TableDefinition] {
        &self.tables
    }

    /// Find a table by name, comparing both the decoded name and the raw
    /// stored bytes.
    pub fn table_by_name(&self, name: &str) -> Option<&TableDefinition> {
        self.tables
            .iter()
            .find(|t| t.name == name || t.name_raw == name.as_bytes())
    }

    /// The effective column list of a table: the template table's columns
    /// first (in the template's order), then the table's own.
    pub fn effective_columns(&self, table: &TableDefinition) -> Vec<ColumnDefinition> {
        let mut columns = Vec::new();
        if let Some(template_name) = &table.template_table_name {
            match self.table_by_name(template_name) {
                Some(template) => {
                    for column in &template.columns {
                        let mut inherited = column.clone();
                        inherited.inherited = true;
                        columns.push(inherited);
                    }
                }
                None => log::warn!(
                    "table \"{}\" names missing template table \"{}\"",
                    table.name,
                    template_name
                ),
            }
        }
        columns.extend(table.columns.iter().cloned());
        columns
    }
}
