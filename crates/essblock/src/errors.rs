//! Error types for schema construction, decoding, parsing and encoding.

use thiserror::Error;

/// Errors produced when compiling field declarations into a [crate::schema::BlockSchema].
///
/// These are always raised while a schema is being built or registered, never
/// while a buffer is decoded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstructionError {
    /// Field name is empty.
    #[error("field name must not be empty")]
    EmptyFieldName,
    /// A primitive declared with a zero byte width.
    #[error("field `{0}` has a zero-byte primitive")]
    ZeroWidth(String),
    /// Two fields (or flattened packed sub-fields) share a name.
    #[error("duplicate field name `{0}`")]
    DuplicateFieldName(String),
    /// `Scale` with a zero or non-finite factor.
    #[error("scale factor {0} is degenerate")]
    InvalidScale(f64),
    /// `Minus` with a non-finite offset.
    #[error("offset {0} is not finite")]
    InvalidOffset(f64),
    /// `Clamp` whose bounds are inverted, equal, or non-finite.
    #[error("clamp range [{min}, {max}] is empty")]
    InvalidClamp { min: f64, max: f64 },
    /// `Shift` by 64 bits or more in either direction.
    #[error("shift by {0} bits is out of range")]
    InvalidShift(i32),
    /// `ExpandBits` width outside 1..=64.
    #[error("bit list width {0} is out of range")]
    InvalidBitListWidth(u32),
    /// A bit range is empty or wider than a sub-field may be.
    #[error("field `{field}`: bit count {count} is out of range")]
    InvalidBitCount { field: String, count: u32 },
    /// A bit range does not fit into the value it is taken from.
    #[error("field `{field}`: bits {start}..{end} exceed the {available}-bit source")]
    BitRangeOverflow {
        field: String,
        start: u32,
        end: u32,
        available: u32,
    },
    /// A bit range was declared on a primitive that is not an integer.
    #[error("field `{0}`: bit ranges need an integer primitive")]
    BitRangeOnNonInteger(String),
    /// Packed field with zero words or more than 128 bits in total.
    #[error("packed field `{field}`: {words} words of {word_bits} bits is not a valid span")]
    InvalidPackedSpan {
        field: String,
        words: usize,
        word_bits: u32,
    },
    /// Packed field without sub-fields.
    #[error("packed field `{0}` declares no sub-fields")]
    EmptyPackedField(String),
    /// Array count is zero.
    #[error("array `{0}` has a zero count")]
    InvalidArrayCount(String),
    /// Array stride is smaller than the element extent.
    #[error("array `{field}`: stride {stride} is smaller than the {extent}-byte element")]
    InvalidArrayStride {
        field: String,
        stride: usize,
        extent: usize,
    },
    /// A field's last byte lies beyond the largest addressable offset.
    #[error("field `{0}` extends past the addressable range")]
    LayoutOverflow(String),
    /// Record array element without members.
    #[error("array `{0}` has an empty element record")]
    EmptyArrayElement(String),
    /// A required field reaches past the declared minimum length.
    #[error("required field `{field}` ends at byte {end}, past the minimum length {min_length}")]
    RequiredBeyondMinLength {
        field: String,
        end: usize,
        min_length: usize,
    },
    /// A derived field names a source that is unknown, declared later, or not an integer.
    #[error("derived field `{field}` has no usable integer source `{source_field}`")]
    InvalidDerivedSource { field: String, source_field: String },
    /// An enum table contains no entries.
    #[error("enum table is empty")]
    EmptyEnumTable,
}

/// Errors produced while decoding a single field from a byte buffer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The field's byte range is beyond the end of the buffer.
    #[error("field `{field}`: {width} bytes at offset {offset} exceed the {len}-byte buffer")]
    OutOfBounds {
        field: String,
        offset: usize,
        width: usize,
        len: usize,
    },
    /// An integer has no symbolic mapping and the table is not tolerant.
    #[error("field `{field}`: value {value} has no enum mapping")]
    UnmappedEnum { field: String, value: i64 },
    /// A transform step received a value of the wrong kind.
    #[error("field `{field}`: {step} cannot be applied to {found}")]
    Transform {
        field: String,
        step: &'static str,
        found: &'static str,
    },
}

impl DecodeError {
    /// Attaches a field name to an error raised below the field level.
    pub fn in_field(self, name: &str) -> Self {
        match self {
            DecodeError::OutOfBounds {
                offset, width, len, ..
            } => DecodeError::OutOfBounds {
                field: name.to_string(),
                offset,
                width,
                len,
            },
            DecodeError::UnmappedEnum { value, .. } => DecodeError::UnmappedEnum {
                field: name.to_string(),
                value,
            },
            DecodeError::Transform { step, found, .. } => DecodeError::Transform {
                field: name.to_string(),
                step,
                found,
            },
        }
    }
}

/// Block-level failures that abort a parse.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParserError {
    /// Buffer is shorter than the schema's minimum length (strict schemas only).
    #[error("block {block_id}: buffer of {actual} bytes is shorter than the {needed}-byte minimum")]
    TooShort {
        block_id: u16,
        needed: usize,
        actual: usize,
    },
    /// A required field failed to decode in a strict schema.
    #[error("block {block_id}: required field failed: {source}")]
    RequiredField {
        block_id: u16,
        #[source]
        source: DecodeError,
    },
}

/// Errors produced when encoding values back to bytes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    /// Integer does not fit the target width.
    #[error("{value} does not fit in {bits} bits")]
    OutOfRange { value: i64, bits: u32 },
    /// String contains a non-ASCII character.
    #[error("string is not ASCII")]
    NotAscii,
    /// String is longer than the fixed field width.
    #[error("string of {len} bytes exceeds the {width}-byte field")]
    TooLong { len: usize, width: usize },
    /// Tag has no entry in the enum table.
    #[error("tag `{0}` is not in the enum table")]
    UnknownTag(String),
    /// Value kind does not match the primitive.
    #[error("cannot encode {found} as {expected}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    /// A packed sub-field value was not supplied.
    #[error("missing value for sub-field `{0}`")]
    MissingField(String),
}

/// Errors surfaced by [crate::registry::SchemaRegistry].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No schema is registered under the identifier.
    #[error("no schema registered for block {0}")]
    UnknownBlock(u16),
    /// A schema definition failed to compile.
    #[error(transparent)]
    Construction(#[from] ConstructionError),
    /// A schema definition document could not be read.
    #[error("invalid schema definition: {0}")]
    Definition(String),
}
