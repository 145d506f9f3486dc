//! MySQL/MariaDB SQL dialect: `INSERT ... SELECT` with a duplicate-key clause.
//!
//! MySQL has no guard clause on `ON DUPLICATE KEY UPDATE`, so change probes
//! are not expressed: with `update_on_match` every matched row is assigned
//! the staged values. Rows whose values are already equal are reported as
//! unchanged by the server, which keeps repeat loads a no-op.

use crate::core::identifier::{qualify_mysql, quote_mysql};
use crate::core::{ColumnDef, Dialect, LogicalType, MergeFamily, MergePolicy, TableSchema};
use crate::dialect::{
    column_definitions, column_list, key_join, non_key_columns, staging_name, MergePlan,
};
use crate::error::Result;

/// MySQL dialect implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    /// Create a new MySQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MysqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    fn family(&self) -> MergeFamily {
        MergeFamily::ConflictClause
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_mysql(name)
    }

    fn qualify(&self, namespace: &str, table: &str) -> Result<String> {
        qualify_mysql(namespace, table)
    }

    fn native_type(&self, column: &ColumnDef) -> String {
        match column.logical_type {
            LogicalType::Int64 => "BIGINT".into(),
            LogicalType::Int32 => "INT".into(),
            LogicalType::Float64 => "DOUBLE".into(),
            LogicalType::Bool => "TINYINT(1)".into(),
            LogicalType::String => match column.max_length {
                Some(n) if n <= 16_383 => format!("VARCHAR({})", n),
                _ => "LONGTEXT".into(),
            },
            LogicalType::DateTime => "DATETIME(6)".into(),
            LogicalType::Date => "DATE".into(),
            LogicalType::Decimal => "DECIMAL(19,4)".into(),
        }
    }

    fn build_create_table(&self, schema: &TableSchema, namespace: &str) -> Result<String> {
        let mut lines = column_definitions(self, schema)?;
        let pk: Vec<&str> = schema.primary_key.iter().map(String::as_str).collect();
        lines.push(format!("PRIMARY KEY ({})", column_list(self, &pk, None)?));
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            self.qualify(namespace, schema.name())?,
            lines.join(",\n    ")
        ))
    }

    fn build_merge_plan(
        &self,
        schema: &TableSchema,
        policy: &MergePolicy,
        namespace: &str,
    ) -> Result<MergePlan> {
        let target = self.qualify(namespace, schema.name())?;
        let staging_table = staging_name(schema.name());
        let staging = self.quote_ident(&staging_table)?;

        let staging_ddl = format!(
            "CREATE TEMPORARY TABLE {} (\n    {}\n)",
            staging,
            column_definitions(self, schema)?.join(",\n    ")
        );

        let all: Vec<&str> = schema.column_names().collect();
        let non_key = non_key_columns(schema, policy);
        let join = key_join(self, &policy.merge_columns, "t", "s")?;
        let insert_cols = column_list(self, &all, None)?;
        let select_cols = column_list(self, &all, Some("s"))?;

        let (merge_statement, match_probe) = if policy.update_on_match && !non_key.is_empty() {
            let set = non_key
                .iter()
                .map(|c| {
                    let q = self.quote_ident(c)?;
                    Ok(format!("{0} = VALUES({0})", q))
                })
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            let sql = format!(
                "INSERT INTO {} ({})\nSELECT {} FROM {} AS s\nON DUPLICATE KEY UPDATE {}",
                target, insert_cols, select_cols, staging, set
            );
            let probe = format!(
                "SELECT COUNT(*) FROM {} AS s INNER JOIN {} AS t ON {}",
                staging, target, join
            );
            (sql, Some(probe))
        } else {
            // Insert-only: no update clause, anti-join against the target.
            let first_key = self.quote_ident(&policy.merge_columns[0])?;
            let sql = format!(
                "INSERT INTO {} ({})\nSELECT {} FROM {} AS s\nLEFT JOIN {} AS t ON {}\nWHERE t.{} IS NULL",
                target, insert_cols, select_cols, staging, target, join, first_key
            );
            (sql, None)
        };

        Ok(MergePlan {
            table: schema.id,
            dialect: self.name().to_string(),
            cleanup_statement: format!("DROP TEMPORARY TABLE IF EXISTS {}", staging),
            staging_table,
            staging_ddl,
            match_probe,
            merge_statement,
        })
    }
}
