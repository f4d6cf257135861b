//! Record decoding.
//!
//! A table record is the payload of one data-page leaf value, projected
//! onto the table's column catalog. The layout is a 4-byte header (last
//! fixed data type, last variable data type, variable region offset), a
//! null-flag bitmap and the packed fixed values, the variable-size
//! cumulative size array and its value bytes, and finally the tagged
//! region.
//!
//! Storage class follows the column identifier: below 128 fixed, 128-255
//! variable, 256 and up tagged. Tagged entries come in three layouts:
//! plain pairs before the new record format, pairs with flag bits folded
//! into the offset word after it, and 15-bit offsets with a mandatory
//! leading flag byte on large-page databases. Tagged flags mark long
//! values, compression, and multi-values.
//!
//! The decoder never reads past the record; a malformed offset is a
//! [`EseError::RecordMalformed`] naming the offending column, and bulk
//! iteration skips such records with a diagnostic instead of stopping.

use std::rc::Rc;

use byteorder::{ByteOrder, LittleEndian};

use crate::ese::catalog::ColumnDefinition;
use crate::ese::constants::*;
use crate::ese::page::FormatContext;
use crate::ese::value::{decode_value, TypedValue};
use crate::EseError;

/// The decoded storage of one column inside a record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Declared null (fixed bitmap bit or variable high bit).
    Null,
    /// Value bytes stored inline.
    Inline(Vec<u8>),
    /// Compressed value bytes, kept raw.
    Compressed(Vec<u8>),
    /// A long-value reference; the identifier is stored little-endian in
    /// the record and converted to the big-endian tree key on lookup.
    LongValueRef(u32),
    /// A multi-value: one byte vector per entry.
    MultiValue(Vec<Vec<u8>>),
}

/// One column's presence in a record.
#[derive(Debug, Clone)]
pub struct FieldData {
    /// Column identifier.
    pub column_id: u32,
    /// How the value is stored.
    pub kind: FieldKind,
}

/// A decoded record, self-contained and valid independently of the page
/// cache.
#[derive(Debug, Clone)]
pub struct Record {
    key: Vec<u8>,
    fields: Vec<FieldData>,
    columns: Rc<Vec<ColumnDefinition>>,
}

impl Record {
    /// Decode a data-page leaf payload against a column catalog.
    pub fn decode(
        key: Vec<u8>,
        data: &[u8],
        columns: Rc<Vec<ColumnDefinition>>,
        ctx: &FormatContext,
    ) -> Result<Self, EseError> {
        let fields = parse_record(data, &columns, ctx)?;
        Ok(Record {
            key,
            fields,
            columns,
        })
    }

    /// The logical B+-tree key of this record.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The column catalog this record was decoded against.
    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// The raw decoded fields, present columns only.
    pub fn fields(&self) -> &[FieldData] {
        &self.fields
    }

    /// The stored field of a column, `None` when the record does not
    /// mention it.
    pub fn field(&self, column_id: u32) -> Option<&FieldData> {
        self.fields.iter().find(|f| f.column_id == column_id)
    }

    /// The long-value identifier referenced by a column, if that column
    /// holds a long-value reference.
    pub fn long_value_id(&self, column_id: u32) -> Option<u32> {
        match self.field(column_id).map(|f| &f.kind) {
            Some(FieldKind::LongValueRef(id)) => Some(*id),
            _ => None,
        }
    }

    /// The typed value of a column.
    ///
    /// A declared column the record does not mention decodes to
    /// [`TypedValue::Null`]; an unknown column identifier is a
    /// [`EseError::CatalogMissing`].
    pub fn value(&self, column_id: u32) -> Result<TypedValue, EseError> {
        let column = self
            .columns
            .iter()
            .find(|c| c.identifier == column_id)
            .ok_or_else(|| {
                EseError::CatalogMissing(format!("column {} is not declared", column_id))
            })?;

        let field = match self.field(column_id) {
            Some(field) => field,
            None => return Ok(TypedValue::Null),
        };

        match &field.kind {
            FieldKind::Null => Ok(TypedValue::Null),
            FieldKind::Inline(bytes) => {
                decode_value(bytes, column.column_type, column.codepage, column_id)
            }
            FieldKind::LongValueRef(id) => Ok(TypedValue::LongValue(*id)),
            FieldKind::Compressed(bytes) => {
                if column.column_type.is_text() {
                    Err(EseError::ValueDecode {
                        column: column_id,
                        reason: "compressed text value".to_string(),
                    })
                } else {
                    Ok(TypedValue::Binary(bytes.clone()))
                }
            }
            FieldKind::MultiValue(entries) => {
                let mut values = Vec::with_capacity(entries.len());
                for entry in entries {
                    values.push(decode_value(
                        entry,
                        column.column_type,
                        column.codepage,
                        column_id,
                    )?);
                }
                Ok(TypedValue::MultiValue(values))
            }
        }
    }
}

fn malformed(column: u32, reason: impl Into<String>) -> EseError {
    EseError::RecordMalformed {
        column,
        reason: reason.into(),
    }
}

fn find_column(columns: &[ColumnDefinition], identifier: u32) -> Result<&ColumnDefinition, EseError> {
    columns
        .iter()
        .find(|c| c.identifier == identifier)
        .ok_or_else(|| malformed(identifier, "column is not in the table catalog"))
}

/// Decode a record's raw bytes into per-column fields.
pub fn parse_record(
    data: &[u8],
    columns: &[ColumnDefinition],
    ctx: &FormatContext,
) -> Result<Vec<FieldData>, EseError> {
    if data.len() < 4 {
        return Err(malformed(0, format!("record of {} bytes", data.len())));
    }
    let last_fixed = data[0] as u32;
    let last_variable = data[1] as u32;
    let variable_offset = LittleEndian::read_u16(&data[2..]) as usize;
    if variable_offset > data.len() {
        return Err(malformed(0, "variable region offset beyond record end"));
    }

    let mut fields = Vec::new();

    // Fixed region: null bitmap, then the packed values of the non-null
    // fixed columns in ascending identifier order.
    let bitmap_len = (last_fixed as usize).div_ceil(8);
    let mut cursor = 4 + bitmap_len;
    if cursor > data.len() {
        return Err(malformed(0, "fixed null bitmap beyond record end"));
    }
    for identifier in 1..=last_fixed {
        let column = find_column(columns, identifier)?;
        let bit = (identifier - 1) as usize;
        let is_null = (data[4 + bit / 8] >> (bit % 8)) & 1 != 0;
        if is_null {
            fields.push(FieldData {
                column_id: identifier,
                kind: FieldKind::Null,
            });
            continue;
        }
        let size = column.fixed_size();
        if cursor + size > data.len() || cursor + size > variable_offset {
            return Err(malformed(identifier, "fixed value beyond its region"));
        }
        fields.push(FieldData {
            column_id: identifier,
            kind: FieldKind::Inline(data[cursor..cursor + size].to_vec()),
        });
        cursor += size;
    }

    // Variable region: cumulative 2-byte sizes, then value bytes.
    let variable_count = last_variable.saturating_sub(127) as usize;
    let values_start = variable_offset + 2 * variable_count;
    if values_start > data.len() {
        return Err(malformed(0, "variable size array beyond record end"));
    }
    let mut previous_end = 0usize;
    for index in 0..variable_count {
        let identifier = FIRST_VARIABLE_DATA_TYPE as u32 + index as u32;
        let column = find_column(columns, identifier)?;
        let raw = LittleEndian::read_u16(&data[variable_offset + 2 * index..]);
        if (raw & 0x8000) != 0 {
            fields.push(FieldData {
                column_id: identifier,
                kind: FieldKind::Null,
            });
            continue;
        }
        let end = raw as usize;
        if end < previous_end || values_start + end > data.len() {
            return Err(malformed(column.identifier, "variable value spans invalid range"));
        }
        fields.push(FieldData {
            column_id: identifier,
            kind: FieldKind::Inline(data[values_start + previous_end..values_start + end].to_vec()),
        });
        previous_end = end;
    }

    // Tagged region, when any bytes remain.
    let tagged_start = values_start + previous_end;
    if tagged_start < data.len() {
        parse_tagged_region(&data[tagged_start..], columns, ctx, &mut fields)?;
    }

    Ok(fields)
}

/// Decode the tagged region of a record.
///
/// Entries are `{identifier, offset}` pairs of 16-bit words; the offset of
/// the first entry doubles as the size of the entry array. Layout varies
/// with the format revision and page size:
///
/// - before the new record format: plain offsets, no flags;
/// - new record format on small pages: 14-bit offsets, bit 0x4000 marks a
///   leading flag byte in the value;
/// - large-page databases (16 KiB and up): 15-bit offsets, the flag byte
///   is always present.
fn parse_tagged_region(
    region: &[u8],
    columns: &[ColumnDefinition],
    ctx: &FormatContext,
    fields: &mut Vec<FieldData>,
) -> Result<(), EseError> {
    if region.len() < 4 {
        return Err(malformed(0, "tagged region smaller than one entry"));
    }

    let new_format = ctx.format_revision >= FORMAT_REVISION_NEW_RECORD_FORMAT;
    let large_pages = ctx.page_size >= SIZE_PAGE_16K;
    let offset_mask: u16 = if !new_format {
        0xffff
    } else if large_pages {
        0x7fff
    } else {
        0x3fff
    };

    let first_offset = (LittleEndian::read_u16(&region[2..]) & offset_mask) as usize;
    if first_offset < 4 || first_offset > region.len() || first_offset % 4 != 0 {
        return Err(malformed(0, "tagged entry array has an invalid extent"));
    }
    let entry_count = first_offset / 4;

    struct TaggedEntry {
        identifier: u32,
        offset: usize,
        has_flag_byte: bool,
    }
    let mut entries = Vec::with_capacity(entry_count);
    for index in 0..entry_count {
        let identifier = LittleEndian::read_u16(&region[index * 4..]) as u32;
        let word = LittleEndian::read_u16(&region[index * 4 + 2..]);
        let offset = (word & offset_mask) as usize;
        let has_flag_byte = if !new_format {
            false
        } else if large_pages {
            true
        } else {
            (word & 0x4000) != 0
        };
        entries.push(TaggedEntry {
            identifier,
            offset,
            has_flag_byte,
        });
    }

    for index in 0..entries.len() {
        let entry = &entries[index];
        let end = if index + 1 < entries.len() {
            entries[index + 1].offset
        } else {
            region.len()
        };
        if entry.offset > end || end > region.len() {
            return Err(malformed(entry.identifier, "tagged value spans invalid range"));
        }
        let column = find_column(columns, entry.identifier)?;

        let mut value = &region[entry.offset..end];
        let mut flags = 0u8;
        if entry.has_flag_byte {
            if value.is_empty() {
                return Err(malformed(entry.identifier, "tagged value missing its flag byte"));
            }
            flags = value[0];
            value = &value[1..];
        }

        let kind = decode_tagged_value(value, flags, column)?;
        fields.push(FieldData {
            column_id: entry.identifier,
            kind,
        });
    }
    Ok(())
}

fn decode_tagged_value(
    value: &[u8],
    flags: u8,
    column: &ColumnDefinition,
) -> Result<FieldKind, EseError> {
    if (flags & VALUE_FLAG_MULTI_VALUE_OFFSET) != 0 {
        // Sparse multi-values have no documented layout; keep the bytes.
        log::debug!(
            "column {}: sparse multi-value kept raw",
            column.identifier
        );
        return Ok(FieldKind::Inline(value.to_vec()));
    }
    if (flags & VALUE_FLAG_MULTI_VALUE) != 0 {
        if (flags & VALUE_FLAG_LONG_VALUE) != 0 {
            log::warn!(
                "column {}: multi-value of long values kept raw",
                column.identifier
            );
            return Ok(FieldKind::Inline(value.to_vec()));
        }
        return decode_multi_value(value, column.identifier);
    }
    if (flags & VALUE_FLAG_LONG_VALUE) != 0 {
        if value.len() != 4 {
            return Err(malformed(
                column.identifier,
                format!("long value reference of {} bytes", value.len()),
            ));
        }
        return Ok(FieldKind::LongValueRef(LittleEndian::read_u32(value)));
    }
    if (flags & VALUE_FLAG_COMPRESSED) != 0 {
        return Ok(FieldKind::Compressed(value.to_vec()));
    }
    Ok(FieldKind::Inline(value.to_vec()))
}

/// Decode a multi-value: a table of 16-bit offsets (the first one fixes
/// the entry count), then the concatenated entry bytes.
fn decode_multi_value(value: &[u8], column_id: u32) -> Result<FieldKind, EseError> {
    if value.len() < 2 {
        return Err(malformed(column_id, "multi-value without an offset table"));
    }
    let first_offset = LittleEndian::read_u16(value) as usize;
    if first_offset < 2 || first_offset > value.len() || first_offset % 2 != 0 {
        return Err(malformed(column_id, "multi-value offset table has an invalid extent"));
    }
    let count = first_offset / 2;
    let mut offsets = Vec::with_capacity(count + 1);
    for index in 0..count {
        offsets.push(LittleEndian::read_u16(&value[index * 2..]) as usize);
    }
    offsets.push(value.len());

    let mut entries = Vec::with_capacity(count);
    for pair in offsets.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        if start > end || end > value.len() {
            return Err(malformed(column_id, "multi-value entry spans invalid range"));
        }
        entries.push(value[start..end].to_vec());
    }
    Ok(FieldKind::MultiValue(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ese::value::ColumnType;

    fn ctx(format_revision: u32, page_size: u32) -> FormatContext {
        FormatContext {
            format_revision,
            page_size,
            last_page_number: 64,
            strict_checksums: true,
            max_leaf_pages: MAX_LEAF_PAGES,
        }
    }

    fn column(identifier: u32, column_type: ColumnType, codepage: u32) -> ColumnDefinition {
        ColumnDefinition {
            identifier,
            name: format!("c{}", identifier),
            column_type,
            size: column_type.fixed_size().unwrap_or(255) as u32,
            flags: 0,
            codepage,
            inherited: false,
        }
    }

    /// Assemble record bytes: fixed values (None = null), variable values
    /// (None = null), and a pre-built tagged region.
    pub(crate) fn build_record(
        fixed: &[Option<&[u8]>],
        variable: &[Option<&[u8]>],
        tagged: &[u8],
    ) -> Vec<u8> {
        let last_fixed = fixed.len() as u8;
        let last_variable = if variable.is_empty() {
            0
        } else {
            127 + variable.len() as u8
        };
        let bitmap_len = (fixed.len()).div_ceil(8);

        let mut fixed_bytes = Vec::new();
        let mut bitmap = vec![0u8; bitmap_len];
        for (index, value) in fixed.iter().enumerate() {
            match value {
                Some(bytes) => fixed_bytes.extend_from_slice(bytes),
                None => bitmap[index / 8] |= 1 << (index % 8),
            }
        }

        let variable_offset = (4 + bitmap_len + fixed_bytes.len()) as u16;
        let mut record = Vec::new();
        record.push(last_fixed);
        record.push(last_variable);
        record.extend_from_slice(&variable_offset.to_le_bytes());
        record.extend_from_slice(&bitmap);
        record.extend_from_slice(&fixed_bytes);

        let mut sizes = Vec::new();
        let mut values = Vec::new();
        for value in variable {
            match value {
                Some(bytes) => {
                    values.extend_from_slice(bytes);
                    sizes.push(values.len() as u16);
                }
                None => sizes.push(values.len() as u16 | 0x8000),
            }
        }
        for size in &sizes {
            record.extend_from_slice(&size.to_le_bytes());
        }
        record.extend_from_slice(&values);
        record.extend_from_slice(tagged);
        record
    }

    /// Assemble a small-page new-format tagged region.
    pub(crate) fn build_tagged(entries: &[(u16, Option<u8>, &[u8])]) -> Vec<u8> {
        let array_size = entries.len() * 4;
        let mut header = Vec::new();
        let mut body = Vec::new();
        for (identifier, flag, data) in entries {
            let mut offset = (array_size + body.len()) as u16;
            assert!((offset & 0xc000) == 0);
            if flag.is_some() {
                offset |= 0x4000;
            }
            header.extend_from_slice(&identifier.to_le_bytes());
            header.extend_from_slice(&offset.to_le_bytes());
            if let Some(flag) = flag {
                body.push(*flag);
            }
            body.extend_from_slice(data);
        }
        header.extend_from_slice(&body);
        header
    }

    #[test]
    fn test_fixed_columns_with_null_bitmap() {
        let columns = vec![
            column(1, ColumnType::Integer32, 0),
            column(2, ColumnType::Integer16, 0),
            column(3, ColumnType::UnsignedByte, 0),
        ];
        let data = build_record(
            &[Some(&42i32.to_le_bytes()), None, Some(&[7u8])],
            &[],
            &[],
        );
        let record = Record::decode(vec![], &data, Rc::new(columns), &ctx(0x0c, 4096)).unwrap();

        assert_eq!(record.value(1).unwrap(), TypedValue::I32(42));
        assert_eq!(record.value(2).unwrap(), TypedValue::Null);
        assert_eq!(record.value(3).unwrap(), TypedValue::U8(7));
    }

    #[test]
    fn test_variable_columns_and_null_high_bit() {
        let columns = vec![
            column(128, ColumnType::Text, CODEPAGE_WINDOWS_1252),
            column(129, ColumnType::Binary, 0),
            column(130, ColumnType::Binary, 0),
        ];
        let data = build_record(&[], &[Some(b"hello"), None, Some(b"\x01\x02")], &[]);
        let record = Record::decode(vec![], &data, Rc::new(columns), &ctx(0x0c, 4096)).unwrap();

        assert_eq!(record.value(128).unwrap(), TypedValue::Text("hello".into()));
        assert_eq!(record.value(129).unwrap(), TypedValue::Null);
        assert_eq!(record.value(130).unwrap(), TypedValue::Binary(vec![1, 2]));
    }

    #[test]
    fn test_variable_column_empty_value_is_present() {
        let columns = vec![column(128, ColumnType::Binary, 0)];
        let data = build_record(&[], &[Some(b"")], &[]);
        let record = Record::decode(vec![], &data, Rc::new(columns), &ctx(0x0c, 4096)).unwrap();
        assert_eq!(record.value(128).unwrap(), TypedValue::Binary(Vec::new()));
    }

    #[test]
    fn test_tagged_inline_and_flagged_values() {
        let columns = vec![
            column(256, ColumnType::Binary, 0),
            column(257, ColumnType::LongText, CODEPAGE_WINDOWS_1252),
        ];
        let tagged = build_tagged(&[
            (256, None, b"abc"),
            (257, Some(VALUE_FLAG_LONG_VALUE), &5u32.to_le_bytes()),
        ]);
        let data = build_record(&[], &[], &tagged);
        let record = Record::decode(vec![], &data, Rc::new(columns), &ctx(0x0c, 4096)).unwrap();

        assert_eq!(record.value(256).unwrap(), TypedValue::Binary(b"abc".to_vec()));
        assert_eq!(record.value(257).unwrap(), TypedValue::LongValue(5));
        assert_eq!(record.long_value_id(257), Some(5));
    }

    #[test]
    fn test_tagged_zero_length_value_is_present_not_null() {
        let columns = vec![column(256, ColumnType::Binary, 0)];
        let tagged = build_tagged(&[(256, None, b"")]);
        let data = build_record(&[], &[], &tagged);
        let record = Record::decode(vec![], &data, Rc::new(columns), &ctx(0x0c, 4096)).unwrap();
        assert_eq!(record.value(256).unwrap(), TypedValue::Binary(Vec::new()));
    }

    #[test]
    fn test_multi_value_entries() {
        let columns = vec![column(300, ColumnType::Text, CODEPAGE_WINDOWS_1252)];
        // Two entries: offset table [4, 7], bytes "one" + "two".
        let mut mv = Vec::new();
        mv.extend_from_slice(&4u16.to_le_bytes());
        mv.extend_from_slice(&7u16.to_le_bytes());
        mv.extend_from_slice(b"onetwo");
        let tagged = build_tagged(&[(300, Some(VALUE_FLAG_MULTI_VALUE), &mv)]);
        let data = build_record(&[], &[], &tagged);
        let record = Record::decode(vec![], &data, Rc::new(columns), &ctx(0x0c, 4096)).unwrap();

        assert_eq!(
            record.value(300).unwrap(),
            TypedValue::MultiValue(vec![
                TypedValue::Text("one".into()),
                TypedValue::Text("two".into()),
            ])
        );
    }

    #[test]
    fn test_compressed_text_is_a_decode_error() {
        let columns = vec![column(256, ColumnType::LongText, CODEPAGE_WINDOWS_1252)];
        let tagged = build_tagged(&[(256, Some(VALUE_FLAG_COMPRESSED), b"\x18compressed")]);
        let data = build_record(&[], &[], &tagged);
        let record = Record::decode(vec![], &data, Rc::new(columns), &ctx(0x0c, 4096)).unwrap();
        assert!(matches!(
            record.value(256),
            Err(EseError::ValueDecode { column: 256, .. })
        ));
    }

    #[test]
    fn test_unknown_fixed_column_is_malformed() {
        let columns = vec![column(1, ColumnType::Integer32, 0)];
        // last_fixed = 2 but only column 1 is declared.
        let data = build_record(
            &[Some(&1i32.to_le_bytes()), Some(&2i32.to_le_bytes())],
            &[],
            &[],
        );
        assert!(matches!(
            Record::decode(vec![], &data, Rc::new(columns), &ctx(0x0c, 4096)),
            Err(EseError::RecordMalformed { column: 2, .. })
        ));
    }

    #[test]
    fn test_truncated_fixed_value_is_malformed() {
        let columns = vec![column(1, ColumnType::Integer32, 0)];
        let mut data = build_record(&[Some(&1i32.to_le_bytes())], &[], &[]);
        // Claim the variable region starts inside the fixed value.
        LittleEndian::write_u16(&mut data[2..], 6);
        assert!(Record::decode(vec![], &data, Rc::new(columns), &ctx(0x0c, 4096)).is_err());
    }

    #[test]
    fn test_undeclared_column_lookup_is_catalog_missing() {
        let columns = vec![column(1, ColumnType::Integer32, 0)];
        let data = build_record(&[Some(&1i32.to_le_bytes())], &[], &[]);
        let record = Record::decode(vec![], &data, Rc::new(columns), &ctx(0x0c, 4096)).unwrap();
        assert!(matches!(
            record.value(999),
            Err(EseError::CatalogMissing(_))
        ));
    }

    #[test]
    fn test_pre_new_format_tagged_pairs() {
        let columns = vec![column(256, ColumnType::Binary, 0)];
        // Old layout: no flag bits, offset is the raw word.
        let mut tagged = Vec::new();
        tagged.extend_from_slice(&256u16.to_le_bytes());
        tagged.extend_from_slice(&4u16.to_le_bytes());
        tagged.extend_from_slice(b"old");
        let data = build_record(&[], &[], &tagged);
        let record = Record::decode(vec![], &data, Rc::new(columns), &ctx(0x06, 4096)).unwrap();
        assert_eq!(record.value(256).unwrap(), TypedValue::Binary(b"old".to_vec()));
    }

    #[test]
    fn test_large_page_tagged_always_has_flag_byte() {
        let columns = vec![column(256, ColumnType::Binary, 0)];
        let mut tagged = Vec::new();
        tagged.extend_from_slice(&256u16.to_le_bytes());
        tagged.extend_from_slice(&4u16.to_le_bytes());
        tagged.push(0); // flag byte, always present on large pages
        tagged.extend_from_slice(b"big");
        let data = build_record(&[], &[], &tagged);
        let record = Record::decode(vec![], &data, Rc::new(columns), &ctx(0x11, 32768)).unwrap();
        assert_eq!(record.value(256).unwrap(), TypedValue::Binary(b"big".to_vec()));
    }
}
