//! Fixed-width primitive decoders over big-endian register data.

use std::{collections::BTreeMap, sync::Arc};

use crate::{
    bits::{self, IntWidth},
    errors::{ConstructionError, DecodeError, EncodeError},
    value::Value,
};

/// Mapping from integer codes to symbolic tags.
///
/// A tolerant table passes unmapped integers through unchanged instead of
/// failing the field.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumTable {
    entries: Arc<BTreeMap<i64, String>>,
    tolerant: bool,
}

impl EnumTable {
    pub fn new<I, S>(entries: I) -> Result<Self, ConstructionError>
    where
        I: IntoIterator<Item = (i64, S)>,
        S: Into<String>,
    {
        let entries: BTreeMap<i64, String> =
            entries.into_iter().map(|(k, v)| (k, v.into())).collect();
        if entries.is_empty() {
            return Err(ConstructionError::EmptyEnumTable);
        }

        Ok(EnumTable {
            entries: Arc::new(entries),
            tolerant: false,
        })
    }

    /// Returns a copy that lets unmapped codes through as integers.
    pub fn tolerant(mut self) -> Self {
        self.tolerant = true;
        self
    }

    pub fn tag(&self, code: i64) -> Option<&str> {
        self.entries.get(&code).map(String::as_str)
    }

    pub fn code(&self, tag: &str) -> Option<i64> {
        self.entries
            .iter()
            .find(|(_, t)| t.as_str() == tag)
            .map(|(code, _)| *code)
    }

    /// Maps `code` to a [Value::Tag], or passes it through when tolerant.
    pub fn map(&self, code: i64) -> Result<Value, DecodeError> {
        match self.tag(code) {
            Some(tag) => Ok(Value::Tag(tag.to_string())),
            None if self.tolerant => Ok(Value::Int(code)),
            None => Err(DecodeError::UnmappedEnum {
                field: String::new(),
                value: code,
            }),
        }
    }
}

/// A wire-level value type.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    /// Fixed-length ASCII text, trailing NUL and space padding stripped.
    Ascii(usize),
    /// Raw flag word, decoded as an unsigned integer.
    Bitmap(IntWidth),
    /// Unsigned code mapped through an [EnumTable].
    Enum(IntWidth, EnumTable),
    /// One byte, non-zero is true.
    Bool,
}

impl PrimitiveType {
    /// Width on the wire in bytes.
    pub fn width(&self) -> usize {
        match self {
            PrimitiveType::U8 | PrimitiveType::I8 | PrimitiveType::Bool => 1,
            PrimitiveType::U16 | PrimitiveType::I16 => 2,
            PrimitiveType::U32 | PrimitiveType::I32 => 4,
            PrimitiveType::Ascii(len) => *len,
            PrimitiveType::Bitmap(w) | PrimitiveType::Enum(w, _) => w.bytes(),
        }
    }

    /// Whether the primitive carries an integer that bit ranges can slice.
    pub fn is_integer(&self) -> bool {
        !matches!(self, PrimitiveType::Ascii(_) | PrimitiveType::Bool)
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            PrimitiveType::I8 | PrimitiveType::I16 | PrimitiveType::I32
        )
    }

    fn name(&self) -> &'static str {
        match self {
            PrimitiveType::U8 => "u8",
            PrimitiveType::I8 => "i8",
            PrimitiveType::U16 => "u16",
            PrimitiveType::I16 => "i16",
            PrimitiveType::U32 => "u32",
            PrimitiveType::I32 => "i32",
            PrimitiveType::Ascii(_) => "ascii",
            PrimitiveType::Bitmap(_) => "bitmap",
            PrimitiveType::Enum(_, _) => "enum",
            PrimitiveType::Bool => "bool",
        }
    }

    /// Reads the unsigned bits at `offset`, without sign extension or mapping.
    pub fn decode_raw(&self, data: &[u8], offset: usize) -> Result<u64, DecodeError> {
        bits::read_be(data, offset, self.width())
    }

    /// Decodes the value at `offset`.
    pub fn decode(&self, data: &[u8], offset: usize) -> Result<Value, DecodeError> {
        match self {
            PrimitiveType::Ascii(len) => {
                let bytes = bits::slice_at(data, offset, *len)?;
                let end = bytes
                    .iter()
                    .rposition(|b| *b != 0x00 && *b != b' ')
                    .map_or(0, |i| i + 1);
                Ok(Value::Str(bytes[..end].iter().map(|b| char::from(*b)).collect()))
            }
            PrimitiveType::Bool => Ok(Value::Bool(self.decode_raw(data, offset)? != 0)),
            PrimitiveType::Enum(_, table) => table.map(self.decode_raw(data, offset)? as i64),
            _ => {
                let raw = self.decode_raw(data, offset)?;
                Ok(Value::Int(self.interpret(raw)))
            }
        }
    }

    /// Converts raw unsigned bits of this primitive's width into its integer value.
    pub fn interpret(&self, raw: u64) -> i64 {
        if self.is_signed() {
            bits::sign_extend(raw, self.width() as u32 * 8)
        } else {
            raw as i64
        }
    }

    /// Encodes `value` into this primitive's wire bytes.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, EncodeError> {
        match (self, value) {
            (PrimitiveType::Ascii(width), Value::Str(s)) => {
                if !s.is_ascii() {
                    return Err(EncodeError::NotAscii);
                }
                if s.len() > *width {
                    return Err(EncodeError::TooLong {
                        len: s.len(),
                        width: *width,
                    });
                }
                let mut out = s.as_bytes().to_vec();
                out.resize(*width, 0);
                Ok(out)
            }
            (PrimitiveType::Bool, Value::Bool(b)) => Ok(vec![u8::from(*b)]),
            (PrimitiveType::Enum(_, table), Value::Tag(tag)) => {
                let code = table
                    .code(tag)
                    .ok_or_else(|| EncodeError::UnknownTag(tag.clone()))?;
                self.encode_int(code)
            }
            (p, Value::Int(v)) if p.is_integer() => self.encode_int(*v),
            _ => Err(EncodeError::TypeMismatch {
                expected: self.name(),
                found: value.kind(),
            }),
        }
    }

    fn encode_int(&self, v: i64) -> Result<Vec<u8>, EncodeError> {
        let width = self.width();
        let bits = width as u32 * 8;
        let (min, max) = if self.is_signed() {
            (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
        } else {
            (0, (1i64 << bits) - 1)
        };
        if v < min || v > max {
            return Err(EncodeError::OutOfRange { value: v, bits });
        }

        let be = (v as u64).to_be_bytes();
        Ok(be[be.len() - width..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn modes() -> EnumTable {
        EnumTable::new([(0, "idle"), (1, "charge"), (2, "discharge")]).unwrap()
    }

    #[test]
    fn test_integers_big_endian() {
        let data = [0xFF, 0xFE, 0x00, 0x01];
        assert_eq!(PrimitiveType::U16.decode(&data, 0).unwrap(), Value::Int(0xFFFE));
        assert_eq!(PrimitiveType::I16.decode(&data, 0).unwrap(), Value::Int(-2));
        assert_eq!(PrimitiveType::I8.decode(&data, 0).unwrap(), Value::Int(-1));
        assert_eq!(
            PrimitiveType::U32.decode(&data, 0).unwrap(),
            Value::Int(0xFFFE_0001)
        );
        assert_eq!(
            PrimitiveType::I32.decode(&data, 0).unwrap(),
            Value::Int(-131_071)
        );
    }

    #[test]
    fn test_out_of_bounds() {
        let err = PrimitiveType::U32.decode(&[0, 1, 2], 0).unwrap_err();
        assert_eq!(
            err,
            DecodeError::OutOfBounds {
                field: String::new(),
                offset: 0,
                width: 4,
                len: 3,
            }
        );
    }

    #[test]
    fn test_ascii_strips_padding() {
        let data = b"ESS-5K\0\0  ";
        assert_eq!(
            PrimitiveType::Ascii(10).decode(data, 0).unwrap(),
            Value::Str("ESS-5K".to_string())
        );
        assert_eq!(
            PrimitiveType::Ascii(4).decode(&[0, 0, 0, 0], 0).unwrap(),
            Value::Str(String::new())
        );
    }

    #[test]
    fn test_ascii_passes_non_printables_through() {
        let data = [b'A', 0x07, 0xC3, b'B'];
        let value = PrimitiveType::Ascii(4).decode(&data, 0).unwrap();
        assert_eq!(value, Value::Str("A\u{7}\u{c3}B".to_string()));
    }

    #[test]
    fn test_enum_mapping() {
        let p = PrimitiveType::Enum(IntWidth::W16, modes());
        assert_eq!(
            p.decode(&[0x00, 0x02], 0).unwrap(),
            Value::Tag("discharge".to_string())
        );
        assert_eq!(
            p.decode(&[0x00, 0x07], 0).unwrap_err(),
            DecodeError::UnmappedEnum {
                field: String::new(),
                value: 7,
            }
        );

        let tolerant = PrimitiveType::Enum(IntWidth::W16, modes().tolerant());
        assert_eq!(tolerant.decode(&[0x00, 0x07], 0).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_empty_enum_table() {
        let entries: Vec<(i64, String)> = vec![];
        assert_eq!(
            EnumTable::new(entries).unwrap_err(),
            ConstructionError::EmptyEnumTable
        );
    }

    #[test]
    fn test_bitmap_and_bool() {
        assert_eq!(
            PrimitiveType::Bitmap(IntWidth::W16).decode(&[0x80, 0x01], 0).unwrap(),
            Value::Int(0x8001)
        );
        assert_eq!(PrimitiveType::Bool.decode(&[0x02], 0).unwrap(), Value::Bool(true));
        assert_eq!(PrimitiveType::Bool.decode(&[0x00], 0).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_encode_errors() {
        assert_eq!(
            PrimitiveType::U8.encode(&Value::Int(256)).unwrap_err(),
            EncodeError::OutOfRange { value: 256, bits: 8 }
        );
        assert_eq!(
            PrimitiveType::Ascii(2).encode(&Value::Str("abc".to_string())).unwrap_err(),
            EncodeError::TooLong { len: 3, width: 2 }
        );
        assert_eq!(
            PrimitiveType::Ascii(4).encode(&Value::Str("é".to_string())).unwrap_err(),
            EncodeError::NotAscii
        );
        assert_eq!(
            PrimitiveType::U16.encode(&Value::Float(1.0)).unwrap_err(),
            EncodeError::TypeMismatch {
                expected: "u16",
                found: "float",
            }
        );
    }

    #[test]
    fn test_encode_enum_tag() {
        let p = PrimitiveType::Enum(IntWidth::W8, modes());
        assert_eq!(p.encode(&Value::Tag("charge".to_string())).unwrap(), vec![1]);
        assert!(p.encode(&Value::Tag("standby".to_string())).is_err());
    }

    proptest! {
        #[test]
        fn prop_u16_round_trip(v in any::<u16>()) {
            let bytes = PrimitiveType::U16.encode(&Value::Int(i64::from(v))).unwrap();
            prop_assert_eq!(PrimitiveType::U16.decode(&bytes, 0).unwrap(), Value::Int(i64::from(v)));
        }

        #[test]
        fn prop_i16_round_trip(v in any::<i16>()) {
            let bytes = PrimitiveType::I16.encode(&Value::Int(i64::from(v))).unwrap();
            prop_assert_eq!(PrimitiveType::I16.decode(&bytes, 0).unwrap(), Value::Int(i64::from(v)));
        }

        #[test]
        fn prop_u32_round_trip(v in any::<u32>()) {
            let bytes = PrimitiveType::U32.encode(&Value::Int(i64::from(v))).unwrap();
            prop_assert_eq!(PrimitiveType::U32.decode(&bytes, 0).unwrap(), Value::Int(i64::from(v)));
        }

        #[test]
        fn prop_i32_round_trip(v in any::<i32>()) {
            let bytes = PrimitiveType::I32.encode(&Value::Int(i64::from(v))).unwrap();
            prop_assert_eq!(PrimitiveType::I32.decode(&bytes, 0).unwrap(), Value::Int(i64::from(v)));
        }

        #[test]
        fn prop_i8_round_trip(v in any::<i8>()) {
            let bytes = PrimitiveType::I8.encode(&Value::Int(i64::from(v))).unwrap();
            prop_assert_eq!(PrimitiveType::I8.decode(&bytes, 0).unwrap(), Value::Int(i64::from(v)));
        }

        #[test]
        fn prop_ascii_round_trip(s in "[A-Za-z0-9_-]{0,12}") {
            let p = PrimitiveType::Ascii(12);
            let bytes = p.encode(&Value::Str(s.clone())).unwrap();
            prop_assert_eq!(p.decode(&bytes, 0).unwrap(), Value::Str(s));
        }

        #[test]
        fn prop_u8_round_trip(v in any::<u8>()) {
            let bytes = PrimitiveType::U8.encode(&Value::Int(i64::from(v))).unwrap();
            prop_assert_eq!(PrimitiveType::U8.decode(&bytes, 0).unwrap(), Value::Int(i64::from(v)));
        }

        #[test]
        fn prop_bitmap_round_trip(v in any::<u32>()) {
            for width in [IntWidth::W8, IntWidth::W16, IntWidth::W32] {
                let p = PrimitiveType::Bitmap(width);
                let v = i64::from(v) & ((1i64 << width.bits()) - 1);
                let bytes = p.encode(&Value::Int(v)).unwrap();
                prop_assert_eq!(bytes.len(), width.bytes());
                prop_assert_eq!(p.decode(&bytes, 0).unwrap(), Value::Int(v));
            }
        }

        #[test]
        fn prop_enum_tag_round_trip(code in 0i64..3) {
            let p = PrimitiveType::Enum(IntWidth::W16, modes());
            let tag = Value::Tag(modes().tag(code).unwrap().to_string());
            let bytes = p.encode(&tag).unwrap();
            prop_assert_eq!(p.decode(&bytes, 0).unwrap(), tag);
        }

        #[test]
        fn prop_tolerant_enum_int_round_trip(code in 3u16..=u16::MAX) {
            let p = PrimitiveType::Enum(IntWidth::W16, modes().tolerant());
            let bytes = p.encode(&Value::Int(i64::from(code))).unwrap();
            prop_assert_eq!(p.decode(&bytes, 0).unwrap(), Value::Int(i64::from(code)));
        }

        #[test]
        fn prop_bool_round_trip(b in any::<bool>()) {
            let bytes = PrimitiveType::Bool.encode(&Value::Bool(b)).unwrap();
            prop_assert_eq!(PrimitiveType::Bool.decode(&bytes, 0).unwrap(), Value::Bool(b));
        }
    }
}
