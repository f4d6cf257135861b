//! Typed column value conversion.
//!
//! Maps the raw bytes of a record field onto a [`TypedValue`] using the
//! column's declared type and code page. Integers and floats are
//! little-endian; currency is a 64-bit count of 1e-4 units; date/time
//! values are FILETIME ticks (100 ns since 1601-01-01 UTC); GUIDs use the
//! Microsoft mixed-endian layout with the first three fields
//! little-endian.
//!
//! Long text/binary fields that were spilled to the long-value tree carry
//! a 4-byte little-endian identifier instead of inline bytes; the decoder
//! surfaces those as [`TypedValue::LongValue`] for the caller to
//! dereference.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::ese::codepage;
use crate::EseError;

/// ESE column data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnType {
    /// Invalid / not set.
    Nil,
    /// 1-byte boolean.
    Bool,
    /// 1-byte unsigned integer.
    UnsignedByte,
    /// 2-byte signed integer.
    Integer16,
    /// 4-byte signed integer.
    Integer32,
    /// 8-byte currency (count of 1e-4 units).
    Currency,
    /// 4-byte IEEE 754 single.
    Float32,
    /// 8-byte IEEE 754 double.
    Double64,
    /// 8-byte FILETIME.
    DateTime,
    /// Variable-size binary.
    Binary,
    /// Variable-size text with a code page.
    Text,
    /// Binary that may spill to the long-value tree.
    LongBinary,
    /// Text that may spill to the long-value tree.
    LongText,
    /// Super-long value (obsolete).
    SuperLong,
    /// 4-byte unsigned integer.
    UnsignedInteger32,
    /// 8-byte signed integer.
    Integer64,
    /// 16-byte GUID.
    Guid,
    /// 2-byte unsigned integer.
    UnsignedInteger16,
    /// Unrecognized type code.
    Unknown(u32),
}

impl ColumnType {
    /// Map an on-disk column type code.
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => ColumnType::Nil,
            1 => ColumnType::Bool,
            2 => ColumnType::UnsignedByte,
            3 => ColumnType::Integer16,
            4 => ColumnType::Integer32,
            5 => ColumnType::Currency,
            6 => ColumnType::Float32,
            7 => ColumnType::Double64,
            8 => ColumnType::DateTime,
            9 => ColumnType::Binary,
            10 => ColumnType::Text,
            11 => ColumnType::LongBinary,
            12 => ColumnType::LongText,
            13 => ColumnType::SuperLong,
            14 => ColumnType::UnsignedInteger32,
            15 => ColumnType::Integer64,
            16 => ColumnType::Guid,
            17 => ColumnType::UnsignedInteger16,
            other => ColumnType::Unknown(other),
        }
    }

    /// The storage size of a fixed-size type, `None` for variable types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            ColumnType::Bool | ColumnType::UnsignedByte => Some(1),
            ColumnType::Integer16 | ColumnType::UnsignedInteger16 => Some(2),
            ColumnType::Integer32 | ColumnType::UnsignedInteger32 | ColumnType::Float32 => Some(4),
            ColumnType::Currency
            | ColumnType::Double64
            | ColumnType::DateTime
            | ColumnType::Integer64 => Some(8),
            ColumnType::Guid => Some(16),
            _ => None,
        }
    }

    /// Returns true for types whose values may live in the long-value tree.
    pub fn is_long(&self) -> bool {
        matches!(
            self,
            ColumnType::LongBinary | ColumnType::LongText | ColumnType::SuperLong
        )
    }

    /// Returns true for text types (code page applies).
    pub fn is_text(&self) -> bool {
        matches!(self, ColumnType::Text | ColumnType::LongText)
    }
}

/// A decoded column value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    /// Column is null or absent from the record.
    Null,
    /// Boolean.
    Bool(bool),
    /// 1-byte unsigned integer.
    U8(u8),
    /// 2-byte signed integer.
    I16(i16),
    /// 4-byte signed integer.
    I32(i32),
    /// 8-byte signed integer.
    I64(i64),
    /// 2-byte unsigned integer.
    U16(u16),
    /// 4-byte unsigned integer.
    U32(u32),
    /// Single-precision float.
    F32(f32),
    /// Double-precision float.
    F64(f64),
    /// Currency in 1e-4 units.
    Currency(i64),
    /// FILETIME ticks (100 ns since 1601-01-01 UTC).
    Filetime(u64),
    /// GUID in canonical string form.
    Guid(String),
    /// Decoded text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Identifier of a value stored in the long-value tree.
    LongValue(u32),
    /// A multi-valued column, one entry per value.
    MultiValue(Vec<TypedValue>),
}

impl TypedValue {
    /// Returns true for [`TypedValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }
}

/// Format 16 GUID bytes in the canonical mixed-endian form: the first
/// three fields little-endian, the last two big-endian.
pub fn format_guid(bytes: &[u8]) -> String {
    format!(
        "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        LittleEndian::read_u32(&bytes[0..]),
        LittleEndian::read_u16(&bytes[4..]),
        LittleEndian::read_u16(&bytes[6..]),
        bytes[8],
        bytes[9],
        bytes[10],
        bytes[11],
        bytes[12],
        bytes[13],
        bytes[14],
        bytes[15],
    )
}

fn size_error(column_id: u32, column_type: ColumnType, len: usize) -> EseError {
    EseError::ValueDecode {
        column: column_id,
        reason: format!("{:?} value of {} bytes", column_type, len),
    }
}

/// Decode the bytes of one column value.
///
/// `data` are the value bytes exactly as stored; fixed-size types must
/// match their declared size. Variable types yield empty-but-present
/// values for zero-length data. Long types are returned as
/// [`TypedValue::LongValue`] only by the record decoder (which sees the
/// long-value flag); here they decode like their inline counterparts.
pub fn decode_value(
    data: &[u8],
    column_type: ColumnType,
    codepage: u32,
    column_id: u32,
) -> Result<TypedValue, EseError> {
    let expect = |size: usize| -> Result<(), EseError> {
        if data.len() == size {
            Ok(())
        } else {
            Err(size_error(column_id, column_type, data.len()))
        }
    };

    match column_type {
        ColumnType::Bool => {
            expect(1)?;
            Ok(TypedValue::Bool(data[0] != 0))
        }
        ColumnType::UnsignedByte => {
            expect(1)?;
            Ok(TypedValue::U8(data[0]))
        }
        ColumnType::Integer16 => {
            expect(2)?;
            Ok(TypedValue::I16(LittleEndian::read_i16(data)))
        }
        ColumnType::UnsignedInteger16 => {
            expect(2)?;
            Ok(TypedValue::U16(LittleEndian::read_u16(data)))
        }
        ColumnType::Integer32 => {
            expect(4)?;
            Ok(TypedValue::I32(LittleEndian::read_i32(data)))
        }
        ColumnType::UnsignedInteger32 => {
            expect(4)?;
            Ok(TypedValue::U32(LittleEndian::read_u32(data)))
        }
        ColumnType::Integer64 => {
            expect(8)?;
            Ok(TypedValue::I64(LittleEndian::read_i64(data)))
        }
        ColumnType::Currency => {
            expect(8)?;
            Ok(TypedValue::Currency(LittleEndian::read_i64(data)))
        }
        ColumnType::Float32 => {
            expect(4)?;
            Ok(TypedValue::F32(LittleEndian::read_f32(data)))
        }
        ColumnType::Double64 => {
            expect(8)?;
            Ok(TypedValue::F64(LittleEndian::read_f64(data)))
        }
        ColumnType::DateTime => {
            expect(8)?;
            Ok(TypedValue::Filetime(LittleEndian::read_u64(data)))
        }
        ColumnType::Guid => {
            expect(16)?;
            Ok(TypedValue::Guid(format_guid(data)))
        }
        ColumnType::Text | ColumnType::LongText => codepage::decode(data, codepage)
            .map(TypedValue::Text)
            .map_err(|reason| EseError::ValueDecode {
                column: column_id,
                reason,
            }),
        ColumnType::Binary | ColumnType::LongBinary | ColumnType::SuperLong => {
            Ok(TypedValue::Binary(data.to_vec()))
        }
        ColumnType::Nil | ColumnType::Unknown(_) => Err(EseError::ValueDecode {
            column: column_id,
            reason: format!("undecodable column type {:?}", column_type),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ese::constants::{CODEPAGE_UNICODE, CODEPAGE_WINDOWS_1252};

    #[test]
    fn test_column_type_round_trip_codes() {
        assert_eq!(ColumnType::from_u32(4), ColumnType::Integer32);
        assert_eq!(ColumnType::from_u32(12), ColumnType::LongText);
        assert_eq!(ColumnType::from_u32(99), ColumnType::Unknown(99));
    }

    #[test]
    fn test_fixed_sizes() {
        assert_eq!(ColumnType::Bool.fixed_size(), Some(1));
        assert_eq!(ColumnType::Integer32.fixed_size(), Some(4));
        assert_eq!(ColumnType::Guid.fixed_size(), Some(16));
        assert_eq!(ColumnType::Text.fixed_size(), None);
        assert_eq!(ColumnType::LongBinary.fixed_size(), None);
    }

    #[test]
    fn test_decode_integers() {
        assert_eq!(
            decode_value(&42i32.to_le_bytes(), ColumnType::Integer32, 0, 1).unwrap(),
            TypedValue::I32(42)
        );
        assert_eq!(
            decode_value(&(-7i16).to_le_bytes(), ColumnType::Integer16, 0, 1).unwrap(),
            TypedValue::I16(-7)
        );
        assert_eq!(
            decode_value(&0xDEAD_BEEFu32.to_le_bytes(), ColumnType::UnsignedInteger32, 0, 1)
                .unwrap(),
            TypedValue::U32(0xDEAD_BEEF)
        );
    }

    #[test]
    fn test_decode_floats_and_currency() {
        assert_eq!(
            decode_value(&1.5f32.to_le_bytes(), ColumnType::Float32, 0, 1).unwrap(),
            TypedValue::F32(1.5)
        );
        assert_eq!(
            decode_value(&2.25f64.to_le_bytes(), ColumnType::Double64, 0, 1).unwrap(),
            TypedValue::F64(2.25)
        );
        // 1.2345 currency units
        assert_eq!(
            decode_value(&12345i64.to_le_bytes(), ColumnType::Currency, 0, 1).unwrap(),
            TypedValue::Currency(12345)
        );
    }

    #[test]
    fn test_decode_filetime() {
        // 2021-01-01 00:00:00 UTC in FILETIME ticks.
        let ticks = 132_539_040_000_000_000u64;
        assert_eq!(
            decode_value(&ticks.to_le_bytes(), ColumnType::DateTime, 0, 1).unwrap(),
            TypedValue::Filetime(ticks)
        );
    }

    #[test]
    fn test_decode_guid_mixed_endian() {
        let bytes = [
            0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD,
            0xEE, 0xFF,
        ];
        assert_eq!(
            decode_value(&bytes, ColumnType::Guid, 0, 1).unwrap(),
            TypedValue::Guid("00112233-4455-6677-8899-aabbccddeeff".to_string())
        );
    }

    #[test]
    fn test_decode_text_codepages() {
        assert_eq!(
            decode_value(b"name", ColumnType::Text, CODEPAGE_WINDOWS_1252, 1).unwrap(),
            TypedValue::Text("name".to_string())
        );
        assert_eq!(
            decode_value(&[0x48, 0x00, 0x69, 0x00], ColumnType::LongText, CODEPAGE_UNICODE, 1)
                .unwrap(),
            TypedValue::Text("Hi".to_string())
        );
    }

    #[test]
    fn test_decode_empty_variable_value_is_present() {
        assert_eq!(
            decode_value(b"", ColumnType::Binary, 0, 1).unwrap(),
            TypedValue::Binary(Vec::new())
        );
        assert_eq!(
            decode_value(b"", ColumnType::Text, CODEPAGE_WINDOWS_1252, 1).unwrap(),
            TypedValue::Text(String::new())
        );
    }

    #[test]
    fn test_decode_size_mismatch_is_error() {
        assert!(matches!(
            decode_value(&[1, 2], ColumnType::Integer32, 0, 9),
            Err(EseError::ValueDecode { column: 9, .. })
        ));
    }

    #[test]
    fn test_decode_malformed_utf16_is_error() {
        assert!(decode_value(&[0x41], ColumnType::LongText, CODEPAGE_UNICODE, 3).is_err());
    }
}
