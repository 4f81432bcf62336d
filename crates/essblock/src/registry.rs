//! Per-client schema registry.
//!
//! Every client owns its own [SchemaRegistry]. Registering a schema in one
//! instance is never visible through another.

use std::{collections::BTreeMap, sync::Arc};

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::{builtin, errors::RegistryError, parser::ParsedBlock, schema::BlockSchema};

/// Lifecycle of a registry instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    /// Holds only what it was constructed with.
    Seeded,
    /// At least one schema was registered after construction.
    Extended,
}

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: BTreeMap<u16, Arc<BlockSchema>>,
    state: RegistryState,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

impl SchemaRegistry {
    /// A registry with no schemas.
    pub fn empty() -> Self {
        SchemaRegistry {
            schemas: BTreeMap::new(),
            state: RegistryState::Seeded,
        }
    }

    /// A registry seeded with the built-in block schemas.
    pub fn new_with_builtins() -> Result<Self, RegistryError> {
        let schemas = builtin::schemas()?
            .into_iter()
            .map(|schema| (schema.id(), Arc::new(schema)))
            .collect::<BTreeMap<_, _>>();
        debug!(count = schemas.len(), "seeded schema registry");

        Ok(SchemaRegistry {
            schemas,
            state: RegistryState::Seeded,
        })
    }

    /// Adds a schema, returning the one it replaced under the same id.
    pub fn register(&mut self, schema: BlockSchema) -> Option<Arc<BlockSchema>> {
        let id = schema.id();
        debug!(block_id = id, name = schema.name(), "registered schema");
        self.state = RegistryState::Extended;
        self.schemas.insert(id, Arc::new(schema))
    }

    /// Compiles a JSON schema definition and registers it.
    #[cfg(feature = "serde")]
    pub fn register_json(&mut self, json: &str) -> Result<Option<Arc<BlockSchema>>, RegistryError> {
        let schema = BlockSchema::from_json(json)?;
        Ok(self.register(schema))
    }

    pub fn get(&self, id: u16) -> Option<Arc<BlockSchema>> {
        self.schemas.get(&id).cloned()
    }

    pub fn contains(&self, id: u16) -> bool {
        self.schemas.contains_key(&id)
    }

    /// Looks up several ids at once, keeping the requested order.
    ///
    /// With `strict` an unknown id is an error; otherwise it is skipped.
    pub fn resolve_many(
        &self,
        ids: impl IntoIterator<Item = u16>,
        strict: bool,
    ) -> Result<IndexMap<u16, Arc<BlockSchema>>, RegistryError> {
        let mut out = IndexMap::new();
        for id in ids {
            match self.schemas.get(&id) {
                Some(schema) => {
                    out.insert(id, Arc::clone(schema));
                }
                None if strict => return Err(RegistryError::UnknownBlock(id)),
                None => warn!(block_id = id, "skipping unknown block"),
            }
        }
        Ok(out)
    }

    /// Parses `data` with the schema registered under `id`.
    pub fn parse(&self, id: u16, data: &[u8]) -> Result<ParsedBlock, RegistryError> {
        let schema = self.schemas.get(&id).ok_or(RegistryError::UnknownBlock(id))?;
        Ok(schema.parse(data))
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<u16> {
        self.schemas.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn state(&self) -> RegistryState {
        self.state
    }
}
