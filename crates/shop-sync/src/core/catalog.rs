//! Table catalog: schema and merge policy per table.
//!
//! The catalog is explicitly constructed and handed to the engine rather than
//! living in a global, so independent engines (and tests) can carry
//! different table sets side by side.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::policy::MergePolicy;
use super::schema::{TableId, TableSchema};
use super::tables;
use crate::error::{Result, SyncError};

/// A registered table: its definition and how it merges.
#[derive(Debug, Clone)]
pub struct TableEntry {
    pub schema: Arc<TableSchema>,
    pub policy: Arc<MergePolicy>,
}

/// Registry of target tables keyed by [`TableId`].
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: BTreeMap<TableId, TableEntry>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog holding every built-in commerce table and the
    /// calendar dimension.
    pub fn builtin() -> Result<Self> {
        let mut catalog = Self::new();
        for (schema, policy) in tables::builtin_tables() {
            catalog.register(schema, policy)?;
        }
        Ok(catalog)
    }

    /// Register a table, validating the schema and its policy together.
    pub fn register(&mut self, schema: TableSchema, policy: MergePolicy) -> Result<()> {
        schema.validate()?;
        policy.validate(&schema)?;
        if self.tables.contains_key(&schema.id) {
            return Err(SyncError::invalid_schema(
                schema.name(),
                "table registered twice",
            ));
        }
        self.tables.insert(
            schema.id,
            TableEntry {
                schema: Arc::new(schema),
                policy: Arc::new(policy),
            },
        );
        Ok(())
    }

    pub fn get(&self, id: TableId) -> Option<&TableEntry> {
        self.tables.get(&id)
    }

    /// Look up a table, failing with `UnknownTable` when absent.
    pub fn require(&self, id: TableId) -> Result<&TableEntry> {
        self.get(id)
            .ok_or_else(|| SyncError::UnknownTable(id.name().to_string()))
    }

    /// Resolve a producer-supplied table name.
    pub fn resolve(&self, name: &str) -> Result<&TableEntry> {
        let id: TableId = name.parse()?;
        self.get(id)
            .ok_or_else(|| SyncError::UnknownTable(name.to_string()))
    }

    pub fn entries(&self) -> impl Iterator<Item = &TableEntry> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
