//! Explicit mapping from type names to factories.
//!
//! Every storable type is registered at startup. Lookup constructs objects
//! only through this table; an unknown discriminator is
//! [`StoreError::MissingType`].

use std::collections::HashMap;
use std::fmt;

use crate::error::{StoreError, StoreResult};
use crate::storable::{Storable, StorableType, TypeSchema};

type Factory = Box<dyn Fn() -> Box<dyn Storable> + Send + Sync>;

struct TypeEntry {
    schema: TypeSchema,
    factory: Option<Factory>,
}

/// Registry of storable types.
#[derive(Default)]
pub struct TypeRegistry {
    entries: HashMap<String, TypeEntry>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a concrete type. Re-registering replaces the entry.
    pub fn register<T: StorableType>(&mut self) -> &mut Self {
        self.entries.insert(
            T::TYPE_NAME.to_string(),
            TypeEntry {
                schema: T::schema(),
                factory: Some(Box::new(|| Box::new(T::default()))),
            },
        );
        self
    }

    /// Register a type the collector can traverse but lookup cannot build.
    pub fn register_schema(&mut self, type_name: impl Into<String>, schema: TypeSchema) -> &mut Self {
        self.entries.insert(
            type_name.into(),
            TypeEntry {
                schema,
                factory: None,
            },
        );
        self
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    /// Edge schema of a registered type.
    pub fn schema(&self, type_name: &str) -> Option<&TypeSchema> {
        self.entries.get(type_name).map(|entry| &entry.schema)
    }

    /// Construct an empty instance of a registered type.
    pub fn instantiate(&self, type_name: &str) -> StoreResult<Box<dyn Storable>> {
        let entry = self
            .entries
            .get(type_name)
            .ok_or_else(|| StoreError::MissingType(type_name.to_string()))?;
        let factory = entry
            .factory
            .as_ref()
            .ok_or_else(|| StoreError::MissingIdentityHook(type_name.to_string()))?;
        Ok(factory())
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}
