//! # essblock
//!
//! A declarative codec for the binary register blocks reported by battery
//! energy-storage stations.
//!
//! Declare a block as fields at byte offsets (with optional bit ranges,
//! multi-word packed sub-fields, repeated arrays and a transform pipeline),
//! compile it into a [BlockSchema], then parse big-endian buffers into named
//! values plus validation diagnostics. A per-client [SchemaRegistry] resolves
//! block identifiers to schemas.
//!
//! ## Example
//!
//! ```
//! use essblock::bits::{BitRange, IntWidth};
//! use essblock::field::{Field, PackedField, SubField};
//! use essblock::primitive::PrimitiveType;
//! use essblock::schema::BlockDef;
//! use essblock::transform::Pipeline;
//! use essblock::value::Value;
//!
//! let schema = BlockDef::new(1100, "grid", 4)
//!     .field(Field::new("frequency", 0, PrimitiveType::U16).pipeline(Pipeline::scale(0.1).unwrap()))
//!     .field(
//!         PackedField::new("flags", 2, IntWidth::W16, 1)
//!             .sub(SubField::new("week", BitRange::new(0, 7)))
//!             .sub(SubField::new("action", BitRange::bit(7))),
//!     )
//!     .compile()
//!     .unwrap();
//!
//! let block = schema.parse(&[0x01, 0xF4, 0x01, 0x23]);
//! assert!(block.is_valid());
//! assert_eq!(block.get("frequency"), Some(&Value::Float(50.0)));
//! assert_eq!(block.get("week"), Some(&Value::Int(0x23)));
//! assert_eq!(block.get("action"), Some(&Value::Int(0)));
//! ```

pub mod bits;
pub mod builtin;
pub mod compiled;
#[cfg(feature = "serde")]
pub mod definition;
pub mod errors;
pub mod field;
pub mod parser;
pub mod primitive;
pub mod registry;
pub mod schema;
pub mod transform;
pub mod value;

pub use errors::{ConstructionError, DecodeError, EncodeError, ParserError, RegistryError};
pub use parser::{ParsedBlock, ValidationResult};
pub use registry::SchemaRegistry;
pub use schema::{BlockDef, BlockSchema, Strictness};
pub use value::Value;
