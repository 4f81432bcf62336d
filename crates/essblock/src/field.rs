//! Field declarations used to build a [crate::schema::BlockSchema].
//!
//! Declarations are plain data. They are checked and compiled by
//! [crate::schema::BlockSchema::compile]; nothing here validates on its own.

use crate::{
    bits::{BitRange, IntWidth},
    primitive::PrimitiveType,
    transform::Pipeline,
};

/// A single value at a byte offset.
#[derive(Debug, Clone)]
pub struct Field {
    /// Key in the parsed value map.
    pub name: String,
    /// Bytes from the start of the block (or of the array item).
    pub offset: usize,
    pub primitive: PrimitiveType,
    /// Optional slice of the primitive's integer, LSB-origin.
    pub bits: Option<BitRange>,
    pub pipeline: Pipeline,
    /// Physical unit label, e.g. `"V"` or `"Hz"`.
    pub unit: Option<String>,
    pub required: bool,
    /// Lowest protocol version that carries this field.
    pub min_version: Option<u16>,
    /// Layout proven from bytes but not yet confirmed on a live device.
    pub provisional: bool,
}

impl Field {
    /// A required field with no transform.
    pub fn new(name: impl Into<String>, offset: usize, primitive: PrimitiveType) -> Self {
        Field {
            name: name.into(),
            offset,
            primitive,
            bits: None,
            pipeline: Pipeline::identity(),
            unit: None,
            required: true,
            min_version: None,
            provisional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn bits(mut self, range: BitRange) -> Self {
        self.bits = Some(range);
        self
    }

    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn since(mut self, version: u16) -> Self {
        self.min_version = Some(version);
        self
    }

    pub fn provisional(mut self) -> Self {
        self.provisional = true;
        self
    }

    /// One past the last byte read, or `None` if that overflows.
    pub fn end(&self) -> Option<usize> {
        self.offset.checked_add(self.primitive.width())
    }
}

/// A named slice of a [PackedField]'s words.
#[derive(Debug, Clone)]
pub struct SubField {
    pub name: String,
    pub bits: BitRange,
    pub pipeline: Pipeline,
    pub unit: Option<String>,
    pub provisional: bool,
}

impl SubField {
    pub fn new(name: impl Into<String>, bits: BitRange) -> Self {
        SubField {
            name: name.into(),
            bits,
            pipeline: Pipeline::identity(),
            unit: None,
            provisional: false,
        }
    }

    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn provisional(mut self) -> Self {
        self.provisional = true;
        self
    }
}

/// Several sub-fields decoded from the same consecutive words.
///
/// The words are concatenated most significant first and sub-field bit
/// ranges are measured from the low bit of the result. Sub-fields may
/// overlap, e.g. a whole status word next to a named flag inside it.
#[derive(Debug, Clone)]
pub struct PackedField {
    pub name: String,
    pub offset: usize,
    pub word: IntWidth,
    pub words: usize,
    pub subfields: Vec<SubField>,
    pub required: bool,
    pub min_version: Option<u16>,
}

impl PackedField {
    pub fn new(name: impl Into<String>, offset: usize, word: IntWidth, words: usize) -> Self {
        PackedField {
            name: name.into(),
            offset,
            word,
            words,
            subfields: Vec::new(),
            required: true,
            min_version: None,
        }
    }

    pub fn sub(mut self, subfield: SubField) -> Self {
        self.subfields.push(subfield);
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn since(mut self, version: u16) -> Self {
        self.min_version = Some(version);
        self
    }

    /// One past the last byte read, or `None` if that overflows.
    pub fn end(&self) -> Option<usize> {
        self.word
            .bytes()
            .checked_mul(self.words)
            .and_then(|width| self.offset.checked_add(width))
    }
}

/// What each item of an [ArrayField] holds.
///
/// Offsets inside the element are relative to the item start.
#[derive(Debug, Clone)]
pub enum ArrayElement {
    /// One value per item; the field's own name is ignored.
    Value(Field),
    /// Several named values per item, yielding records.
    Record(Vec<Field>),
    /// A packed record per item.
    Packed(PackedField),
}

/// An element repeated `count` times, `stride` bytes apart.
#[derive(Debug, Clone)]
pub struct ArrayField {
    pub name: String,
    pub offset: usize,
    pub count: usize,
    pub stride: usize,
    pub element: ArrayElement,
    pub required: bool,
    pub min_version: Option<u16>,
}

impl ArrayField {
    pub fn new(
        name: impl Into<String>,
        offset: usize,
        count: usize,
        stride: usize,
        element: ArrayElement,
    ) -> Self {
        ArrayField {
            name: name.into(),
            offset,
            count,
            stride,
            element,
            required: true,
            min_version: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn since(mut self, version: u16) -> Self {
        self.min_version = Some(version);
        self
    }
}

/// A value sliced out of the raw integer of an earlier scalar field.
///
/// This is the explicit form of "same register, second meaning": the source
/// is named, so reuse of its bytes is declared rather than implied.
#[derive(Debug, Clone)]
pub struct DerivedField {
    pub name: String,
    pub source: String,
    pub bits: BitRange,
    pub pipeline: Pipeline,
    pub unit: Option<String>,
}

impl DerivedField {
    pub fn new(name: impl Into<String>, source: impl Into<String>, bits: BitRange) -> Self {
        DerivedField {
            name: name.into(),
            source: source.into(),
            bits,
            pipeline: Pipeline::identity(),
            unit: None,
        }
    }

    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// Any declaration a block schema can hold.
#[derive(Debug, Clone)]
pub enum FieldDecl {
    Scalar(Field),
    Array(ArrayField),
    Packed(PackedField),
    Derived(DerivedField),
}

impl From<Field> for FieldDecl {
    fn from(value: Field) -> Self {
        FieldDecl::Scalar(value)
    }
}

impl From<ArrayField> for FieldDecl {
    fn from(value: ArrayField) -> Self {
        FieldDecl::Array(value)
    }
}

impl From<PackedField> for FieldDecl {
    fn from(value: PackedField) -> Self {
        FieldDecl::Packed(value)
    }
}

impl From<DerivedField> for FieldDecl {
    fn from(value: DerivedField) -> Self {
        FieldDecl::Derived(value)
    }
}
