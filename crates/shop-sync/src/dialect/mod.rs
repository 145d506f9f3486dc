//! Merge plans: the statements one table's merge transaction runs.
//!
//! A [`MergePlan`] is derived from a table schema, its merge policy and a
//! dialect alone. Schemas and policies never change after startup, so the
//! [`MergePlanner`] builds each table's plan once per connection and hands
//! out the cached copy for every later batch.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::debug;

use crate::core::{Dialect, MergeFamily, MergePolicy, TableId, TableSchema};
use crate::drivers::DialectImpl;
use crate::error::{Result, SyncError};

/// Statements for one table's merge, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergePlan {
    pub table: TableId,
    pub dialect: String,
    /// Unquoted staging table name, as bulk loaders address it.
    pub staging_table: String,
    pub staging_ddl: String,
    /// Counts staged rows whose key already exists in the target. Only set
    /// for dialects whose merge statement cannot report inserts and updates
    /// separately.
    pub match_probe: Option<String>,
    pub merge_statement: String,
    /// Drops the staging table; safe to run when it does not exist.
    pub cleanup_statement: String,
}

/// Build the merge plan for `schema` under `policy` in `dialect`.
///
/// Conflict-clause engines can only detect a match through the primary key,
/// so there the merge columns must be exactly the primary key.
pub fn build_merge_statement(
    schema: &TableSchema,
    policy: &MergePolicy,
    dialect: &DialectImpl,
    namespace: &str,
) -> Result<MergePlan> {
    if dialect.family() == MergeFamily::ConflictClause && !policy.key_matches_primary_key(schema) {
        return Err(SyncError::invalid_schema(
            schema.name(),
            format!(
                "{} resolves conflicts on the primary key; merge columns must equal it",
                dialect.name()
            ),
        ));
    }
    dialect.build_merge_plan(schema, policy, namespace)
}

/// Per-connection cache of merge plans keyed by table.
#[derive(Debug)]
pub struct MergePlanner {
    dialect: DialectImpl,
    namespace: String,
    plans: RwLock<HashMap<TableId, Arc<MergePlan>>>,
}

impl MergePlanner {
    pub fn new(dialect: DialectImpl, namespace: impl Into<String>) -> Self {
        Self {
            dialect,
            namespace: namespace.into(),
            plans: RwLock::new(HashMap::new()),
        }
    }

    pub fn dialect(&self) -> &DialectImpl {
        &self.dialect
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Cached plan for the table, built on first use.
    pub fn plan(&self, schema: &TableSchema, policy: &MergePolicy) -> Result<Arc<MergePlan>> {
        if let Ok(plans) = self.plans.read() {
            if let Some(plan) = plans.get(&schema.id) {
                return Ok(Arc::clone(plan));
            }
        }

        let plan = Arc::new(build_merge_statement(
            schema,
            policy,
            &self.dialect,
            &self.namespace,
        )?);
        debug!(
            "Built {} merge plan for {}",
            self.dialect.name(),
            schema.name()
        );

        if let Ok(mut plans) = self.plans.write() {
            let entry = plans.entry(schema.id).or_insert_with(|| Arc::clone(&plan));
            return Ok(Arc::clone(entry));
        }
        Ok(plan)
    }

    pub fn cached(&self) -> usize {
        self.plans.read().map(|p| p.len()).unwrap_or(0)
    }
}

/// Staging table name for a target table.
pub(crate) fn staging_name(table: &str) -> String {
    format!("stg_{}", table)
}

/// Quote each name, joined with `, `, optionally prefixed by an alias.
pub(crate) fn column_list<D: Dialect + ?Sized>(
    dialect: &D,
    names: &[&str],
    alias: Option<&str>,
) -> Result<String> {
    let quoted = names
        .iter()
        .map(|n| {
            let q = dialect.quote_ident(n)?;
            Ok(match alias {
                Some(a) => format!("{}.{}", a, q),
                None => q,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// `t.k1 = s.k1 AND t.k2 = s.k2`
pub(crate) fn key_join<D: Dialect + ?Sized>(
    dialect: &D,
    keys: &[String],
    left: &str,
    right: &str,
) -> Result<String> {
    let parts = keys
        .iter()
        .map(|k| {
            let q = dialect.quote_ident(k)?;
            Ok(format!("{left}.{q} = {right}.{q}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join(" AND "))
}

/// Schema columns that are not part of the merge key.
pub(crate) fn non_key_columns<'s>(schema: &'s TableSchema, policy: &MergePolicy) -> Vec<&'s str> {
    schema
        .column_names()
        .filter(|c| !policy.merge_columns.iter().any(|k| k == c))
        .collect()
}

/// Column definitions for `CREATE TABLE`, one per line.
pub(crate) fn column_definitions<D: Dialect + ?Sized>(
    dialect: &D,
    schema: &TableSchema,
) -> Result<Vec<String>> {
    schema
        .columns
        .iter()
        .map(|c| {
            Ok(format!(
                "{} {} {}",
                dialect.quote_ident(&c.name)?,
                dialect.native_type(c),
                if c.nullable { "NULL" } else { "NOT NULL" }
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Catalog;

    #[test]
    fn test_planner_caches_per_table() {
        let catalog = Catalog::builtin().unwrap();
        let planner = MergePlanner::new(DialectImpl::from_db_type("postgres").unwrap(), "public");
        let orders = catalog.require(TableId::Orders).unwrap();

        let first = planner.plan(&orders.schema, &orders.policy).unwrap();
        let second = planner.plan(&orders.schema, &orders.policy).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(planner.cached(), 1);

        let customers = catalog.require(TableId::Customers).unwrap();
        planner.plan(&customers.schema, &customers.policy).unwrap();
        assert_eq!(planner.cached(), 2);
    }

    #[test]
    fn test_conflict_dialects_require_primary_key_merge_columns() {
        let orders = crate::core::tables::orders();
        let by_email = MergePolicy::upsert(&["email"]);
        for db in ["mysql", "postgres"] {
            let dialect = DialectImpl::from_db_type(db).unwrap();
            let err = build_merge_statement(&orders, &by_email, &dialect, "shop").unwrap_err();
            assert!(matches!(err, SyncError::InvalidSchema { .. }), "{}", db);
            assert!(err.to_string().contains(db));
        }
    }

    #[test]
    fn test_set_based_merge_accepts_any_merge_columns() {
        let orders = crate::core::tables::orders();
        let dialect = DialectImpl::from_db_type("mssql").unwrap();
        let plan =
            build_merge_statement(&orders, &MergePolicy::upsert(&["email"]), &dialect, "dbo")
                .unwrap();
        assert!(plan.merge_statement.contains("target.[email] = source.[email]"));
    }

    #[test]
    fn test_every_builtin_table_plans_in_every_dialect() {
        let catalog = Catalog::builtin().unwrap();
        for db in ["mssql", "mysql", "postgres"] {
            let dialect = DialectImpl::from_db_type(db).unwrap();
            for entry in catalog.entries() {
                let plan =
                    build_merge_statement(&entry.schema, &entry.policy, &dialect, "shop").unwrap();
                assert_eq!(plan.table, entry.schema.id);
                assert_eq!(plan.dialect, db);
                assert!(!plan.merge_statement.is_empty());
                assert!(plan.staging_table.contains(entry.schema.name()));
            }
        }
    }

    #[test]
    fn test_non_key_columns() {
        let catalog = Catalog::builtin().unwrap();
        let entry = catalog.require(TableId::InventoryLevels).unwrap();
        assert_eq!(
            non_key_columns(&entry.schema, &entry.policy),
            vec!["available", "updated_at"]
        );
    }
}
