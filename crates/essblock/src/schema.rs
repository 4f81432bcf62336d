//! Block schemas: compiled, validated field layouts for one block identifier.

use crate::{
    compiled::{CompiledDerived, CompiledElement, CompiledField, check_unique},
    errors::ConstructionError,
    field::FieldDecl,
    parser::{self, ParsedBlock},
};

/// How a schema treats missing or short data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize, serde::Serialize),
    serde(rename_all = "snake_case")
)]
pub enum Strictness {
    /// A short buffer or a failed required field rejects the whole block.
    #[default]
    Strict,
    /// Decode whatever fits; failures become diagnostics.
    Lenient,
}

/// Declarative description of a block, compiled by [BlockSchema::compile].
#[derive(Debug, Clone)]
pub struct BlockDef {
    pub id: u16,
    pub name: String,
    pub min_length: usize,
    pub strictness: Strictness,
    pub fields: Vec<FieldDecl>,
}

impl BlockDef {
    pub fn new(id: u16, name: impl Into<String>, min_length: usize) -> Self {
        BlockDef {
            id,
            name: name.into(),
            min_length,
            strictness: Strictness::Strict,
            fields: Vec::new(),
        }
    }

    pub fn lenient(mut self) -> Self {
        self.strictness = Strictness::Lenient;
        self
    }

    pub fn field(mut self, decl: impl Into<FieldDecl>) -> Self {
        self.fields.push(decl.into());
        self
    }

    pub fn compile(&self) -> Result<BlockSchema, ConstructionError> {
        BlockSchema::compile(self)
    }
}

/// A compiled schema. Immutable once built and safe to share across threads.
#[derive(Debug, Clone)]
pub struct BlockSchema {
    id: u16,
    name: String,
    min_length: usize,
    strictness: Strictness,
    extent: usize,
    fields: Vec<CompiledField>,
}

impl BlockSchema {
    /// Compiles and validates a block definition.
    pub fn compile(def: &BlockDef) -> Result<Self, ConstructionError> {
        let mut fields: Vec<CompiledField> = Vec::with_capacity(def.fields.len());
        let mut extent = 0;

        for decl in &def.fields {
            let compiled = match decl {
                FieldDecl::Scalar(f) => CompiledField::Scalar(f.try_into()?),
                FieldDecl::Array(a) => CompiledField::Array(a.try_into()?),
                FieldDecl::Packed(p) => CompiledField::Packed(p.try_into()?),
                FieldDecl::Derived(d) => CompiledField::Derived(CompiledDerived::compile(d, &fields)?),
            };

            if let Some(end) = compiled.end() {
                if compiled.required() && end > def.min_length {
                    return Err(ConstructionError::RequiredBeyondMinLength {
                        field: compiled.name().to_string(),
                        end,
                        min_length: def.min_length,
                    });
                }
                extent = extent.max(end);
            }

            fields.push(compiled);
        }

        check_unique(fields.iter().flat_map(|f| f.value_names()))?;

        Ok(BlockSchema {
            id: def.id,
            name: def.name.clone(),
            min_length: def.min_length,
            strictness: def.strictness,
            extent,
            fields,
        })
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    pub fn strictness(&self) -> Strictness {
        self.strictness
    }

    /// One past the last byte any field reads.
    pub fn extent(&self) -> usize {
        self.extent
    }

    /// Compiled fields in declaration order.
    pub fn fields(&self) -> &[CompiledField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&CompiledField> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Unit label of a top-level value.
    pub fn unit_of(&self, name: &str) -> Option<&str> {
        self.fields.iter().find_map(|f| match f {
            CompiledField::Scalar(s) if s.name == name => s.unit.as_deref(),
            CompiledField::Derived(d) if d.name == name => d.unit.as_deref(),
            CompiledField::Packed(p) => p
                .subfields
                .iter()
                .find(|s| s.name == name)
                .and_then(|s| s.unit.as_deref()),
            CompiledField::Array(a) if a.name == name => match &a.element {
                CompiledElement::Value(s) => s.unit.as_deref(),
                _ => None,
            },
            _ => None,
        })
    }

    /// Paths of values whose layout still needs confirmation on a live device.
    ///
    /// Array members are reported as `array.member`.
    pub fn provisional_fields(&self) -> Vec<String> {
        let mut out = Vec::new();
        for field in &self.fields {
            match field {
                CompiledField::Scalar(s) if s.provisional => out.push(s.name.clone()),
                CompiledField::Packed(p) => out.extend(
                    p.subfields
                        .iter()
                        .filter(|s| s.provisional)
                        .map(|s| s.name.clone()),
                ),
                CompiledField::Array(a) => match &a.element {
                    CompiledElement::Value(s) if s.provisional => out.push(a.name.clone()),
                    CompiledElement::Record(members) => out.extend(
                        members
                            .iter()
                            .filter(|m| m.provisional)
                            .map(|m| format!("{}.{}", a.name, m.name)),
                    ),
                    CompiledElement::Packed(p) => out.extend(
                        p.subfields
                            .iter()
                            .filter(|s| s.provisional)
                            .map(|s| format!("{}.{}", a.name, s.name)),
                    ),
                    _ => {}
                },
                _ => {}
            }
        }
        out
    }

    /// Parses `data` with every field active.
    pub fn parse(&self, data: &[u8]) -> ParsedBlock {
        parser::parse(self, data)
    }

    /// Parses `data`, skipping fields introduced after `version`.
    pub fn parse_versioned(&self, data: &[u8], version: u16) -> ParsedBlock {
        parser::parse_versioned(self, data, Some(version))
    }
}
