//! JSON-deserializable schema definitions.
//!
//! These types describe a block layout as data, so a new block type can be
//! shipped as a schema file instead of code. A [SchemaDef] converts into a
//! [BlockDef] and compiles through the same checks as a schema built in Rust.
//!
//! ```
//! use essblock::schema::BlockSchema;
//!
//! let schema = BlockSchema::from_json(r#"{
//!     "id": 2100,
//!     "name": "meter",
//!     "min_length": 2,
//!     "fields": [
//!         { "kind": "scalar", "name": "frequency", "offset": 0,
//!           "type": { "name": "u16" },
//!           "pipeline": [{ "op": "scale", "factor": 0.1 }],
//!           "unit": "Hz" }
//!     ]
//! }"#).unwrap();
//!
//! let block = schema.parse(&[0x01, 0xF4]);
//! assert_eq!(block.get("frequency").and_then(|v| v.as_f64()), Some(50.0));
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    bits::{BitRange, IntWidth},
    errors::{ConstructionError, RegistryError},
    field::{ArrayElement, ArrayField, DerivedField, Field, FieldDecl, PackedField, SubField},
    primitive::{EnumTable, PrimitiveType},
    schema::{BlockDef, BlockSchema, Strictness},
    transform::{Pipeline, TransformStep},
};

fn default_true() -> bool {
    true
}

/// Top-level description of one block.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchemaDef {
    pub id: u16,
    pub name: String,
    pub min_length: usize,
    #[serde(default)]
    pub strictness: Strictness,
    pub fields: Vec<FieldDeclDef>,
}

/// Any field declaration, tagged by `kind`.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldDeclDef {
    Scalar(FieldDef),
    Array(ArrayDef),
    Packed(PackedDef),
    Derived(DerivedDef),
}

/// A single value at a byte offset.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FieldDef {
    pub name: String,
    pub offset: usize,
    #[serde(rename = "type")]
    pub primitive: PrimitiveDef,
    #[serde(default)]
    pub bits: Option<BitRangeDef>,
    #[serde(default)]
    pub pipeline: Vec<StepDef>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default = "default_true")]
    pub required: bool,
    /// Lowest protocol version carrying the field.
    #[serde(default)]
    pub min_version: Option<u16>,
    #[serde(default)]
    pub provisional: bool,
}

/// Wire type, tagged by `name`.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum PrimitiveDef {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    Ascii {
        len: usize,
    },
    Bitmap {
        width: IntWidth,
    },
    Enum {
        width: IntWidth,
        entries: Vec<EnumEntryDef>,
        #[serde(default)]
        tolerant: bool,
    },
    Bool,
}

/// One transform step, tagged by `op`.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StepDef {
    Abs,
    Scale {
        factor: f64,
    },
    Minus {
        value: f64,
    },
    Bitmask {
        mask: u64,
    },
    /// Positive shifts left, negative shifts right.
    Shift {
        bits: i32,
    },
    Clamp {
        min: f64,
        max: f64,
    },
    EnumMap {
        entries: Vec<EnumEntryDef>,
        #[serde(default)]
        tolerant: bool,
    },
    ExpandBits {
        width: u32,
    },
}

/// One code-to-tag mapping.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EnumEntryDef {
    pub code: i64,
    pub tag: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct BitRangeDef {
    pub start: u32,
    pub count: u32,
    #[serde(default)]
    pub signed: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SubFieldDef {
    pub name: String,
    pub bits: BitRangeDef,
    #[serde(default)]
    pub pipeline: Vec<StepDef>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub provisional: bool,
}

/// Consecutive words holding several sub-fields.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PackedDef {
    pub name: String,
    pub offset: usize,
    pub word: IntWidth,
    pub words: usize,
    pub subfields: Vec<SubFieldDef>,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub min_version: Option<u16>,
}

/// Array item layout.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "snake_case")]
pub enum ElementDef {
    Value(FieldDef),
    Record(Vec<FieldDef>),
    Packed(PackedDef),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ArrayDef {
    pub name: String,
    pub offset: usize,
    pub count: usize,
    /// Distance in bytes between item starts.
    pub stride: usize,
    pub element: ElementDef,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub min_version: Option<u16>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DerivedDef {
    pub name: String,
    pub source: String,
    pub bits: BitRangeDef,
    #[serde(default)]
    pub pipeline: Vec<StepDef>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl From<BitRangeDef> for BitRange {
    fn from(value: BitRangeDef) -> Self {
        BitRange {
            start: value.start,
            count: value.count,
            signed: value.signed,
        }
    }
}

fn enum_table(entries: &[EnumEntryDef], tolerant: bool) -> Result<EnumTable, ConstructionError> {
    let table = EnumTable::new(entries.iter().map(|e| (e.code, e.tag.clone())))?;
    Ok(if tolerant { table.tolerant() } else { table })
}

impl TryFrom<&PrimitiveDef> for PrimitiveType {
    type Error = ConstructionError;

    fn try_from(value: &PrimitiveDef) -> Result<Self, Self::Error> {
        Ok(match value {
            PrimitiveDef::U8 => PrimitiveType::U8,
            PrimitiveDef::I8 => PrimitiveType::I8,
            PrimitiveDef::U16 => PrimitiveType::U16,
            PrimitiveDef::I16 => PrimitiveType::I16,
            PrimitiveDef::U32 => PrimitiveType::U32,
            PrimitiveDef::I32 => PrimitiveType::I32,
            PrimitiveDef::Ascii { len } => PrimitiveType::Ascii(*len),
            PrimitiveDef::Bitmap { width } => PrimitiveType::Bitmap(*width),
            PrimitiveDef::Enum {
                width,
                entries,
                tolerant,
            } => PrimitiveType::Enum(*width, enum_table(entries, *tolerant)?),
            PrimitiveDef::Bool => PrimitiveType::Bool,
        })
    }
}

impl TryFrom<&StepDef> for TransformStep {
    type Error = ConstructionError;

    fn try_from(value: &StepDef) -> Result<Self, Self::Error> {
        Ok(match value {
            StepDef::Abs => TransformStep::Abs,
            StepDef::Scale { factor } => TransformStep::Scale(*factor),
            StepDef::Minus { value } => TransformStep::Minus(*value),
            StepDef::Bitmask { mask } => TransformStep::Bitmask(*mask),
            StepDef::Shift { bits } => TransformStep::Shift(*bits),
            StepDef::Clamp { min, max } => TransformStep::Clamp { min: *min, max: *max },
            StepDef::EnumMap { entries, tolerant } => {
                TransformStep::EnumMap(enum_table(entries, *tolerant)?)
            }
            StepDef::ExpandBits { width } => TransformStep::ExpandBits(*width),
        })
    }
}

fn pipeline(steps: &[StepDef]) -> Result<Pipeline, ConstructionError> {
    let steps = steps
        .iter()
        .map(TransformStep::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Pipeline::new(steps)
}

impl TryFrom<&FieldDef> for Field {
    type Error = ConstructionError;

    fn try_from(value: &FieldDef) -> Result<Self, Self::Error> {
        Ok(Field {
            name: value.name.clone(),
            offset: value.offset,
            primitive: PrimitiveType::try_from(&value.primitive)?,
            bits: value.bits.map(BitRange::from),
            pipeline: pipeline(&value.pipeline)?,
            unit: value.unit.clone(),
            required: value.required,
            min_version: value.min_version,
            provisional: value.provisional,
        })
    }
}

impl TryFrom<&PackedDef> for PackedField {
    type Error = ConstructionError;

    fn try_from(value: &PackedDef) -> Result<Self, Self::Error> {
        let subfields = value
            .subfields
            .iter()
            .map(|sub| {
                Ok(SubField {
                    name: sub.name.clone(),
                    bits: sub.bits.into(),
                    pipeline: pipeline(&sub.pipeline)?,
                    unit: sub.unit.clone(),
                    provisional: sub.provisional,
                })
            })
            .collect::<Result<Vec<_>, ConstructionError>>()?;

        Ok(PackedField {
            name: value.name.clone(),
            offset: value.offset,
            word: value.word,
            words: value.words,
            subfields,
            required: value.required,
            min_version: value.min_version,
        })
    }
}

impl TryFrom<&ArrayDef> for ArrayField {
    type Error = ConstructionError;

    fn try_from(value: &ArrayDef) -> Result<Self, Self::Error> {
        let element = match &value.element {
            ElementDef::Value(field) => ArrayElement::Value(field.try_into()?),
            ElementDef::Record(members) => ArrayElement::Record(
                members
                    .iter()
                    .map(Field::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            ElementDef::Packed(packed) => ArrayElement::Packed(packed.try_into()?),
        };

        Ok(ArrayField {
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

impl TryFrom<&DerivedDef> for DerivedField {
    type Error = ConstructionError;

    fn try_from(value: &DerivedDef) -> Result<Self, Self::Error> {
        Ok(DerivedField {
            name: value.name.clone(),
            source: value.source.clone(),
            bits: value.bits.into(),
            pipeline: pipeline(&value.pipeline)?,
            unit: value.unit.clone(),
        })
    }
}

impl TryFrom<&FieldDeclDef> for FieldDecl {
    type Error = ConstructionError;

    fn try_from(value: &FieldDeclDef) -> Result<Self, Self::Error> {
        Ok(match value {
            FieldDeclDef::Scalar(f) => FieldDecl::Scalar(f.try_into()?),
            FieldDeclDef::Array(a) => FieldDecl::Array(a.try_into()?),
            FieldDeclDef::Packed(p) => FieldDecl::Packed(p.try_into()?),
            FieldDeclDef::Derived(d) => FieldDecl::Derived(d.try_into()?),
        })
    }
}

impl TryFrom<&SchemaDef> for BlockDef {
    type Error = ConstructionError;

    fn try_from(value: &SchemaDef) -> Result<Self, Self::Error> {
        Ok(BlockDef {
            id: value.id,
            name: value.name.clone(),
            min_length: value.min_length,
            strictness: value.strictness,
            fields: value
                .fields
                .iter()
                .map(FieldDecl::try_from)
                .collect::<Result<Vec<_>, _>>()?,
        })
    }
}

impl BlockSchema {
    /// Reads a [SchemaDef] from JSON and compiles it.
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let def: SchemaDef =
            serde_json::from_str(json).map_err(|e| RegistryError::Definition(e.to_string()))?;
        let schema = BlockSchema::compile(&BlockDef::try_from(&def)?)?;
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{registry::SchemaRegistry, value::Value};

    const TANKS: &str = r#"{
        "id": 2200,
        "name": "tank_bank",
        "min_length": 2,
        "strictness": "lenient",
        "fields": [
            { "kind": "packed", "name": "status", "offset": 0, "word": "w16", "words": 1,
              "subfields": [
                { "name": "week", "bits": { "start": 0, "count": 7 } },
                { "name": "action", "bits": { "start": 7, "count": 1 },
                  "pipeline": [{ "op": "enum_map", "entries": [{ "code": 0, "tag": "hold" }, { "code": 1, "tag": "run" }] }] }
              ] },
            { "kind": "array", "name": "tanks", "offset": 2, "count": 2, "stride": 2,
              "required": false,
              "element": { "record": [
                { "name": "volume", "offset": 0, "type": { "name": "u8" }, "provisional": true },
                { "name": "liquid", "offset": 1, "type": { "name": "u8" } }
              ] } }
        ]
    }"#;

    #[test]
    fn test_from_json() {
        let schema = BlockSchema::from_json(TANKS).unwrap();
        assert_eq!(schema.id(), 2200);
        assert_eq!(schema.strictness(), Strictness::Lenient);
        assert_eq!(schema.provisional_fields(), vec!["tanks.volume"]);

        let block = schema.parse(&[0x01, 0xA3, 10, 20, 11, 21]);
        assert_eq!(block.get("week"), Some(&Value::Int(0x23)));
        assert_eq!(block.get("action"), Some(&Value::Tag("run".to_string())));
        assert_eq!(block.get("tanks").and_then(|v| v.as_list()).map(|l| l.len()), Some(2));
    }

    #[test]
    fn test_register_json() {
        let mut registry = SchemaRegistry::empty();
        assert!(registry.register_json(TANKS).unwrap().is_none());
        assert!(registry.get(2200).is_some());
    }

    #[test]
    fn test_malformed_json_is_definition_error() {
        let err = BlockSchema::from_json(r#"{ "id": 1 }"#).unwrap_err();
        assert!(matches!(err, RegistryError::Definition(_)));
    }

    #[test]
    fn test_invalid_layout_is_construction_error() {
        let json = r#"{
            "id": 1, "name": "bad", "min_length": 2,
            "fields": [
                { "kind": "scalar", "name": "x", "offset": 0, "type": { "name": "u16" },
                  "pipeline": [{ "op": "scale", "factor": 0.0 }] }
            ]
        }"#;
        assert!(matches!(
            BlockSchema::from_json(json),
            Err(RegistryError::Construction(ConstructionError::InvalidScale(_)))
        ));
    }

    #[test]
    fn test_huge_offset_is_construction_error() {
        let json = r#"{
            "id": 1, "name": "far", "min_length": 0,
            "fields": [
                { "kind": "scalar", "name": "x", "offset": 18446744073709551615,
                  "type": { "name": "u16" }, "required": false }
            ]
        }"#;
        assert!(matches!(
            BlockSchema::from_json(json),
            Err(RegistryError::Construction(ConstructionError::LayoutOverflow(name))) if name == "x"
        ));

        let json = r#"{
            "id": 2, "name": "wide", "min_length": 0,
            "fields": [
                { "kind": "array", "name": "arr", "offset": 0, "count": 2,
                  "stride": 18446744073709551615, "required": false,
                  "element": { "value": { "name": "v", "offset": 0, "type": { "name": "u16" } } } }
            ]
        }"#;
        assert!(matches!(
            BlockSchema::from_json(json),
            Err(RegistryError::Construction(ConstructionError::LayoutOverflow(name))) if name == "arr"
        ));
    }

    #[test]
    fn test_parsed_block_serializes() {
        let schema = BlockSchema::from_json(TANKS).unwrap();
        let block = schema.parse(&[0x00, 0x05]);
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["values"]["week"], 5);
        assert_eq!(json["validation"]["valid"], true);
        assert_eq!(json["validation"]["missing_optional"][0], "tanks");
    }
}
