//! Core traits of the sync engine.
//!
//! - [`Dialect`]: pure SQL generation strategy for one database engine
//! - [`MergeTarget`]: a database that can run one merge transaction
//!
//! Dialects perform no I/O and can be unit tested on their own; targets own
//! connections and execute what a dialect generated.

use async_trait::async_trait;
use serde::Serialize;

use super::policy::MergePolicy;
use super::schema::{ColumnDef, TableSchema};
use super::value::NormalizedRow;
use crate::dialect::MergePlan;
use crate::drivers::DialectImpl;
use crate::error::Result;

/// How an engine reconciles staged rows with the target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeFamily {
    /// A single set-based `MERGE` statement.
    SetBasedMerge,
    /// `INSERT ... SELECT` with a conflict clause.
    ConflictClause,
}

/// SQL syntax strategy for a database engine.
pub trait Dialect: Send + Sync {
    /// Dialect name (e.g., "mssql", "postgres").
    fn name(&self) -> &str;

    fn family(&self) -> MergeFamily;

    /// Quote an identifier (table, column name).
    fn quote_ident(&self, name: &str) -> Result<String>;

    /// Namespace-qualified, quoted table name.
    fn qualify(&self, namespace: &str, table: &str) -> Result<String>;

    /// Native column type for a logical column.
    fn native_type(&self, column: &ColumnDef) -> String;

    /// `CREATE TABLE` for the real target table, a no-op when it exists.
    fn build_create_table(&self, schema: &TableSchema, namespace: &str) -> Result<String>;

    /// Staging DDL, merge statement and cleanup for one table.
    fn build_merge_plan(
        &self,
        schema: &TableSchema,
        policy: &MergePolicy,
        namespace: &str,
    ) -> Result<MergePlan>;

    /// `SELECT COUNT(*)` over the target table.
    fn build_count_query(&self, schema: &TableSchema, namespace: &str) -> Result<String> {
        Ok(format!(
            "SELECT COUNT(*) FROM {}",
            self.qualify(namespace, schema.name())?
        ))
    }
}

/// Inserted/updated counts reported by one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeCounts {
    pub inserted: u64,
    pub updated: u64,
}

/// Everything a target needs to run one table's merge transaction.
#[derive(Debug, Clone, Copy)]
pub struct MergeRequest<'a> {
    pub schema: &'a TableSchema,
    pub policy: &'a MergePolicy,
    pub plan: &'a MergePlan,
    /// Never empty, merge keys unique within the slice.
    pub rows: &'a [NormalizedRow<'a>],
}

/// A database that merges staged rows into target tables.
///
/// `apply_merge` runs begin, staging DDL, bulk load, merge statement and
/// cleanup, then commits. Any failure rolls the transaction back so the
/// target table keeps its prior content.
#[async_trait]
pub trait MergeTarget: Send + Sync {
    /// Dialect the generated statements must be written in.
    fn dialect(&self) -> DialectImpl;

    /// Namespace (schema or database) holding the target tables.
    fn namespace(&self) -> &str;

    /// Create the target table if it does not exist.
    async fn ensure_table(&self, schema: &TableSchema) -> Result<()>;

    /// Run one merge transaction.
    async fn apply_merge(&self, request: MergeRequest<'_>) -> Result<MergeCounts>;

    /// Current row count of a target table.
    async fn row_count(&self, schema: &TableSchema) -> Result<u64>;

    /// Round-trip to the database.
    async fn ping(&self) -> Result<()>;

    /// Close all connections.
    async fn close(&self);
}
