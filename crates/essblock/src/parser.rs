//! Block parsing: walks a [BlockSchema] over a byte buffer and collects
//! values together with validation diagnostics.
//!
//! Parsing never panics and always yields a [ParsedBlock]. Hard failures are
//! carried in [ParsedBlock::failure]; use [ParsedBlock::into_result] to turn
//! them into an `Err`.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::{
    compiled::{CompiledArray, CompiledField},
    errors::{DecodeError, ParserError},
    schema::{BlockSchema, Strictness},
    value::Value,
};

/// Outcome of schema validation for one parse.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ValidationResult {
    /// False when the parse aborted or a required field failed.
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Optional fields that could not be decoded.
    pub missing_optional: Vec<String>,
}

/// Values decoded from one block buffer.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ParsedBlock {
    block_id: u16,
    name: String,
    values: IndexMap<String, Value>,
    #[cfg_attr(feature = "serde", serde(skip))]
    raw: Bytes,
    length: usize,
    protocol_version: Option<u16>,
    validation: ValidationResult,
    #[cfg_attr(feature = "serde", serde(skip))]
    failure: Option<ParserError>,
}

impl ParsedBlock {
    fn new(schema: &BlockSchema, data: &[u8], protocol_version: Option<u16>) -> Self {
        ParsedBlock {
            block_id: schema.id(),
            name: schema.name().to_string(),
            values: IndexMap::with_capacity(schema.fields().len()),
            raw: Bytes::copy_from_slice(data),
            length: data.len(),
            protocol_version,
            validation: ValidationResult {
                valid: true,
                ..Default::default()
            },
            failure: None,
        }
    }

    fn abort(mut self, failure: ParserError) -> Self {
        debug!(block_id = self.block_id, error = %failure, "block parse aborted");
        self.values.clear();
        self.validation.valid = false;
        self.validation.errors.push(failure.to_string());
        self.failure = Some(failure);
        self
    }

    pub fn block_id(&self) -> u16 {
        self.block_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Decoded values in schema declaration order.
    pub fn values(&self) -> &IndexMap<String, Value> {
        &self.values
    }

    /// The buffer exactly as received.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn protocol_version(&self) -> Option<u16> {
        self.protocol_version
    }

    pub fn validation(&self) -> &ValidationResult {
        &self.validation
    }

    pub fn is_valid(&self) -> bool {
        self.validation.valid
    }

    /// The error that aborted the parse, if any.
    pub fn failure(&self) -> Option<&ParserError> {
        self.failure.as_ref()
    }

    /// Returns the block, or the error that aborted it.
    ///
    /// Lenient parses never abort: a block with recorded errors is still `Ok`.
    pub fn into_result(mut self) -> Result<Self, ParserError> {
        match self.failure.take() {
            Some(failure) => Err(failure),
            None => Ok(self),
        }
    }

    pub fn into_values(self) -> IndexMap<String, Value> {
        self.values
    }
}

/// Parses `data` with every declared field active.
pub fn parse(schema: &BlockSchema, data: &[u8]) -> ParsedBlock {
    parse_versioned(schema, data, None)
}

/// Parses `data`, skipping fields whose minimum version exceeds `version`.
pub fn parse_versioned(schema: &BlockSchema, data: &[u8], version: Option<u16>) -> ParsedBlock {
    let mut block = ParsedBlock::new(schema, data, version);
    let strict = schema.strictness() == Strictness::Strict;

    if data.len() < schema.min_length() {
        if strict {
            return block.abort(ParserError::TooShort {
                block_id: schema.id(),
                needed: schema.min_length(),
                actual: data.len(),
            });
        }
        block.validation.warnings.push(format!(
            "buffer of {} bytes is shorter than the {}-byte minimum",
            data.len(),
            schema.min_length()
        ));
    }

    let mut raw_ints: HashMap<&str, u64> = HashMap::new();
    let mut gated: HashSet<&str> = HashSet::new();

    for field in schema.fields() {
        if let (Some(min), Some(requested)) = (field.min_version(), version) {
            if min > requested {
                trace!(field = field.name(), min, requested, "field not in protocol version");
                gated.insert(field.name());
                continue;
            }
        }

        let result = match field {
            CompiledField::Scalar(scalar) => scalar.decode_at(data, 0).map(|(value, raw)| {
                if let Some(raw) = raw {
                    raw_ints.insert(scalar.name.as_str(), raw);
                }
                block.values.insert(scalar.name.clone(), value);
            }),
            CompiledField::Packed(packed) => packed
                .decode_at(data, 0)
                .map(|subfields| block.values.extend(subfields)),
            CompiledField::Array(array) => decode_array(array, data, strict, &mut block),
            CompiledField::Derived(derived) => match raw_ints.get(derived.source.as_str()) {
                Some(raw) => derived.derive(*raw).map(|value| {
                    block.values.insert(derived.name.clone(), value);
                }),
                None if gated.contains(derived.source.as_str()) => {
                    trace!(field = derived.name.as_str(), "source not in protocol version");
                    continue;
                }
                None => {
                    block.validation.warnings.push(format!(
                        "field `{}`: source `{}` was not decoded",
                        derived.name, derived.source
                    ));
                    block.validation.missing_optional.push(derived.name.clone());
                    continue;
                }
            },
        };

        let Err(err) = result else {
            continue;
        };

        if !field.required() {
            block.validation.warnings.push(err.to_string());
            block.validation.missing_optional.push(field.name().to_string());
        } else if strict {
            return block.abort(ParserError::RequiredField {
                block_id: schema.id(),
                source: err,
            });
        } else {
            block.validation.valid = false;
            block.validation.errors.push(err.to_string());
        }
    }

    if data.len() > schema.extent() {
        block.validation.warnings.push(format!(
            "{} trailing bytes after the last field",
            data.len() - schema.extent()
        ));
    }

    trace!(
        block_id = block.block_id,
        values = block.values.len(),
        valid = block.validation.valid,
        "parsed block"
    );

    block
}

/// Strict schemas take an array whole or not at all; lenient ones keep the
/// leading items that fit.
fn decode_array(
    array: &CompiledArray,
    data: &[u8],
    strict: bool,
    block: &mut ParsedBlock,
) -> Result<(), DecodeError> {
    let fitting = array.items_within(data.len());

    if fitting < array.count {
        if strict || fitting == 0 {
            return Err(array.truncation_error(data.len(), fitting));
        }
        block.validation.warnings.push(format!(
            "array `{}`: decoded {} of {} items",
            array.name, fitting, array.count
        ));
    }

    let items = array.decode_items(data, fitting)?;
    block.values.insert(array.name.clone(), items);
    Ok(())
}
