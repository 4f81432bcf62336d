use indexmap::IndexMap;

use crate::{
    bits::{self, BitRange, IntWidth, MAX_RANGE_BITS, WIDE_BITS},
    errors::{ConstructionError, DecodeError, EncodeError},
    field::{ArrayElement, ArrayField, DerivedField, Field, PackedField, SubField},
    primitive::PrimitiveType,
    transform::Pipeline,
    value::Value,
};

#[derive(Debug, Clone)]
pub enum CompiledField {
    Scalar(CompiledScalar),
    Array(CompiledArray),
    Packed(CompiledPacked),
    Derived(CompiledDerived),
}

impl CompiledField {
    pub fn name(&self) -> &str {
        match self {
            CompiledField::Scalar(s) => &s.name,
            CompiledField::Array(a) => &a.name,
            CompiledField::Packed(p) => &p.name,
            CompiledField::Derived(d) => &d.name,
        }
    }

    /// One past the last byte read; derived fields read no bytes.
    pub fn end(&self) -> Option<usize> {
        match self {
            CompiledField::Scalar(s) => Some(s.end()),
            CompiledField::Array(a) => Some(a.end()),
            CompiledField::Packed(p) => Some(p.end()),
            CompiledField::Derived(_) => None,
        }
    }

    pub fn required(&self) -> bool {
        match self {
            CompiledField::Scalar(s) => s.required,
            CompiledField::Array(a) => a.required,
            CompiledField::Packed(p) => p.required,
            CompiledField::Derived(_) => false,
        }
    }

    pub fn min_version(&self) -> Option<u16> {
        match self {
            CompiledField::Scalar(s) => s.min_version,
            CompiledField::Array(a) => a.min_version,
            CompiledField::Packed(p) => p.min_version,
            CompiledField::Derived(_) => None,
        }
    }

    /// Names this field contributes to the top-level value map.
    pub fn value_names(&self) -> Vec<&str> {
        match self {
            CompiledField::Packed(p) => p.subfields.iter().map(|s| s.name.as_str()).collect(),
            other => vec![other.name()],
        }
    }
}

fn check_name(name: &str) -> Result<(), ConstructionError> {
    if name.trim().is_empty() {
        return Err(ConstructionError::EmptyFieldName);
    }
    Ok(())
}

fn check_range(field: &str, range: &BitRange, available: u32) -> Result<(), ConstructionError> {
    if range.count == 0 || range.count > MAX_RANGE_BITS {
        return Err(ConstructionError::InvalidBitCount {
            field: field.to_string(),
            count: range.count,
        });
    }

    let end = range.start.checked_add(range.count).unwrap_or(u32::MAX);
    if end > available {
        return Err(ConstructionError::BitRangeOverflow {
            field: field.to_string(),
            start: range.start,
            end,
            available,
        });
    }

    Ok(())
}

pub(crate) fn check_unique<'a>(
    names: impl IntoIterator<Item = &'a str>,
) -> Result<(), ConstructionError> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConstructionError::DuplicateFieldName(name.to_string()));
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct CompiledScalar {
    pub name: String,
    pub offset: usize,
    pub primitive: PrimitiveType,
    pub bits: Option<BitRange>,
    pub pipeline: Pipeline,
    pub unit: Option<String>,
    pub required: bool,
    pub min_version: Option<u16>,
    pub provisional: bool,
}

impl TryFrom<&Field> for CompiledScalar {
    type Error = ConstructionError;

    fn try_from(value: &Field) -> Result<Self, Self::Error> {
        check_name(&value.name)?;

        if value.primitive.width() == 0 {
            return Err(ConstructionError::ZeroWidth(value.name.clone()));
        }
        if value.end().is_none() {
            return Err(ConstructionError::LayoutOverflow(value.name.clone()));
        }

        if let Some(range) = &value.bits {
            if !value.primitive.is_integer() {
                return Err(ConstructionError::BitRangeOnNonInteger(value.name.clone()));
            }
            check_range(&value.name, range, value.primitive.width() as u32 * 8)?;
        }

        Ok(CompiledScalar {
            name: value.name.clone(),
            offset: value.offset,
            primitive: value.primitive.clone(),
            bits: value.bits,
            pipeline: value.pipeline.clone(),
            unit: value.unit.clone(),
            required: value.required,
            min_version: value.min_version,
            provisional: value.provisional,
        })
    }
}

impl CompiledScalar {
    pub fn end(&self) -> usize {
        self.offset + self.primitive.width()
    }

    /// Decodes the field relative to `base`.
    ///
    /// Also returns the primitive's raw unsigned bits for integer primitives,
    /// which derived fields read from.
    pub fn decode_at(&self, data: &[u8], base: usize) -> Result<(Value, Option<u64>), DecodeError> {
        self.decode_inner(data, base)
            .map_err(|e| e.in_field(&self.name))
    }

    fn decode_inner(&self, data: &[u8], base: usize) -> Result<(Value, Option<u64>), DecodeError> {
        let offset = base + self.offset;

        let (value, raw) = if self.primitive.is_integer() {
            let raw = self.primitive.decode_raw(data, offset)?;
            let value = match (&self.bits, &self.primitive) {
                (Some(range), PrimitiveType::Enum(_, table)) => table.map(range.extract(u128::from(raw)))?,
                (Some(range), _) => Value::Int(range.extract(u128::from(raw))),
                (None, PrimitiveType::Enum(_, table)) => table.map(raw as i64)?,
                (None, primitive) => Value::Int(primitive.interpret(raw)),
            };
            (value, Some(raw))
        } else {
            (self.primitive.decode(data, offset)?, None)
        };

        Ok((self.pipeline.apply(value)?, raw))
    }
}

#[derive(Debug, Clone)]
pub struct CompiledSubField {
    pub name: String,
    pub bits: BitRange,
    pub pipeline: Pipeline,
    pub unit: Option<String>,
    pub provisional: bool,
}

#[derive(Debug, Clone)]
pub struct CompiledPacked {
    pub name: String,
    pub offset: usize,
    pub word: IntWidth,
    pub words: usize,
    pub total_bits: u32,
    pub subfields: Vec<CompiledSubField>,
    pub required: bool,
    pub min_version: Option<u16>,
}

impl TryFrom<&PackedField> for CompiledPacked {
    type Error = ConstructionError;

    fn try_from(value: &PackedField) -> Result<Self, Self::Error> {
        check_name(&value.name)?;

        let total_bits = (value.word.bits() as usize)
            .checked_mul(value.words)
            .unwrap_or(usize::MAX);
        if value.words == 0 || total_bits > WIDE_BITS as usize {
            return Err(ConstructionError::InvalidPackedSpan {
                field: value.name.clone(),
                words: value.words,
                word_bits: value.word.bits(),
            });
        }
        if value.end().is_none() {
            return Err(ConstructionError::LayoutOverflow(value.name.clone()));
        }
        if value.subfields.is_empty() {
            return Err(ConstructionError::EmptyPackedField(value.name.clone()));
        }

        let total_bits = total_bits as u32;
        let subfields = value
            .subfields
            .iter()
            .map(|sub: &SubField| {
                check_name(&sub.name)?;
                check_range(&sub.name, &sub.bits, total_bits)?;
                Ok(CompiledSubField {
                    name: sub.name.clone(),
                    bits: sub.bits,
                    pipeline: sub.pipeline.clone(),
                    unit: sub.unit.clone(),
                    provisional: sub.provisional,
                })
            })
            .collect::<Result<Vec<_>, ConstructionError>>()?;
        check_unique(subfields.iter().map(|s| s.name.as_str()))?;

        Ok(CompiledPacked {
            name: value.name.clone(),
            offset: value.offset,
            word: value.word,
            words: value.words,
            total_bits,
            subfields,
            required: value.required,
            min_version: value.min_version,
        })
    }
}

impl CompiledPacked {
    pub fn width(&self) -> usize {
        self.word.bytes() * self.words
    }

    pub fn end(&self) -> usize {
        self.offset + self.width()
    }

    /// Reads the words relative to `base` and decodes every sub-field.
    pub fn decode_at(
        &self,
        data: &[u8],
        base: usize,
    ) -> Result<IndexMap<String, Value>, DecodeError> {
        let wide = bits::concat_words(data, base + self.offset, self.word, self.words)
            .map_err(|e| e.in_field(&self.name))?;

        let mut out = IndexMap::with_capacity(self.subfields.len());
        for sub in &self.subfields {
            let value = sub
                .pipeline
                .apply(Value::Int(sub.bits.extract(wide)))
                .map_err(|e| e.in_field(&sub.name))?;
            out.insert(sub.name.clone(), value);
        }

        Ok(out)
    }

    /// Writes raw sub-field integers back into words.
    ///
    /// Every sub-field must be supplied; overlapping sub-fields are written in
    /// declaration order, so the later one wins on shared bits.
    pub fn pack(&self, values: &IndexMap<String, i64>) -> Result<Vec<u8>, EncodeError> {
        let mut wide = 0u128;

        for sub in &self.subfields {
            let v = *values
                .get(&sub.name)
                .ok_or_else(|| EncodeError::MissingField(sub.name.clone()))?;
            let count = sub.bits.count;
            let (min, max) = if sub.bits.signed {
                (-(1i128 << (count - 1)), (1i128 << (count - 1)) - 1)
            } else {
                (0, (1i128 << count) - 1)
            };
            if i128::from(v) < min || i128::from(v) > max {
                return Err(EncodeError::OutOfRange { value: v, bits: count });
            }
            wide = bits::insert_bits(wide, sub.bits.start, count, v as u64);
        }

        let be = wide.to_be_bytes();
        Ok(be[be.len() - self.width()..].to_vec())
    }
}

#[derive(Debug, Clone)]
pub enum CompiledElement {
    Value(CompiledScalar),
    Record(Vec<CompiledScalar>),
    Packed(CompiledPacked),
}

impl CompiledElement {
    /// Bytes an item occupies from its start.
    pub fn extent(&self) -> usize {
        match self {
            CompiledElement::Value(s) => s.end(),
            CompiledElement::Record(members) => members.iter().map(|m| m.end()).max().unwrap_or(0),
            CompiledElement::Packed(p) => p.end(),
        }
    }

    fn decode_at(&self, data: &[u8], base: usize) -> Result<Value, DecodeError> {
        match self {
            CompiledElement::Value(s) => s.decode_at(data, base).map(|(v, _)| v),
            CompiledElement::Record(members) => {
                let mut out = IndexMap::with_capacity(members.len());
                for member in members {
                    let (value, _) = member.decode_at(data, base)?;
                    out.insert(member.name.clone(), value);
                }
                Ok(Value::Record(out))
            }
            CompiledElement::Packed(p) => p.decode_at(data, base).map(Value::Record),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledArray {
    pub name: String,
    pub offset: usize,
    pub count: usize,
    pub stride: usize,
    pub element: CompiledElement,
    pub required: bool,
    pub min_version: Option<u16>,
}

impl TryFrom<&ArrayField> for CompiledArray {
    type Error = ConstructionError;

    fn try_from(value: &ArrayField) -> Result<Self, Self::Error> {
        check_name(&value.name)?;

        if value.count == 0 {
            return Err(ConstructionError::InvalidArrayCount(value.name.clone()));
        }

        let element = match &value.element {
            ArrayElement::Value(field) => CompiledElement::Value(field.try_into()?),
            ArrayElement::Record(members) => {
                if members.is_empty() {
                    return Err(ConstructionError::EmptyArrayElement(value.name.clone()));
                }
                let members = members
                    .iter()
                    .map(CompiledScalar::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                check_unique(members.iter().map(|m| m.name.as_str()))?;
                CompiledElement::Record(members)
            }
            ArrayElement::Packed(packed) => CompiledElement::Packed(packed.try_into()?),
        };

        let extent = element.extent();
        if value.count > 1 && value.stride < extent {
            return Err(ConstructionError::InvalidArrayStride {
                field: value.name.clone(),
                stride: value.stride,
                extent,
            });
        }

        // decode-time item positions rely on this bound
        let end = (value.count - 1)
            .checked_mul(value.stride)
            .and_then(|last| last.checked_add(value.offset))
            .and_then(|last| last.checked_add(extent));
        if end.is_none() {
            return Err(ConstructionError::LayoutOverflow(value.name.clone()));
        }

        Ok(CompiledArray {
            name: value.name.clone(),
            offset: value.offset,
            count: value.count,
            stride: value.stride,
            element,
            required: value.required,
            min_version: value.min_version,
        })
    }
}

impl CompiledArray {
    fn item_start(&self, index: usize) -> usize {
        self.offset + index * self.stride
    }

    pub fn end(&self) -> usize {
        self.item_start(self.count - 1) + self.element.extent()
    }

    /// Number of leading items that lie entirely inside `len` bytes.
    pub fn items_within(&self, len: usize) -> usize {
        let extent = self.element.extent();
        (0..self.count)
            .take_while(|i| self.item_start(*i) + extent <= len)
            .count()
    }

    /// Decodes the first `items` elements.
    pub fn decode_items(&self, data: &[u8], items: usize) -> Result<Value, DecodeError> {
        let mut values = Vec::with_capacity(items);
        for i in 0..items {
            values.push(self.element.decode_at(data, self.item_start(i))?);
        }

        Ok(Value::List(values))
    }

    /// The bounds error for the first item that does not fit in `len` bytes.
    pub fn truncation_error(&self, len: usize, fitting: usize) -> DecodeError {
        DecodeError::OutOfBounds {
            field: self.name.clone(),
            offset: self.item_start(fitting),
            width: self.element.extent(),
            len,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledDerived {
    pub name: String,
    pub source: String,
    pub bits: BitRange,
    pub pipeline: Pipeline,
    pub unit: Option<String>,
}

impl CompiledDerived {
    /// Compiles against the scalars declared before it.
    pub fn compile(
        value: &DerivedField,
        earlier: &[CompiledField],
    ) -> Result<Self, ConstructionError> {
        check_name(&value.name)?;

        let source = earlier.iter().find_map(|f| match f {
            CompiledField::Scalar(s) if s.name == value.source && s.primitive.is_integer() => {
                Some(s)
            }
            _ => None,
        });
        let Some(source) = source else {
            return Err(ConstructionError::InvalidDerivedSource {
                field: value.name.clone(),
                source_field: value.source.clone(),
            });
        };
        check_range(&value.name, &value.bits, source.primitive.width() as u32 * 8)?;

        Ok(CompiledDerived {
            name: value.name.clone(),
            source: value.source.clone(),
            bits: value.bits,
            pipeline: value.pipeline.clone(),
            unit: value.unit.clone(),
        })
    }

    /// Slices the source's raw bits and runs the pipeline.
    pub fn derive(&self, raw: u64) -> Result<Value, DecodeError> {
        self.pipeline
            .apply(Value::Int(self.bits.extract(u128::from(raw))))
            .map_err(|e| e.in_field(&self.name))
    }
}
