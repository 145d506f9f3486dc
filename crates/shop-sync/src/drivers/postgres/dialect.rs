//! PostgreSQL SQL dialect: `INSERT ... ON CONFLICT` with a change guard.

use crate::core::identifier::{qualify_pg, quote_pg};
use crate::core::{ColumnDef, Dialect, LogicalType, MergeFamily, MergePolicy, TableSchema};
use crate::dialect::{column_definitions, column_list, non_key_columns, staging_name, MergePlan};
use crate::error::Result;

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn family(&self) -> MergeFamily {
        MergeFamily::ConflictClause
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_pg(name)
    }

    fn qualify(&self, namespace: &str, table: &str) -> Result<String> {
        qualify_pg(namespace, table)
    }

    fn native_type(&self, column: &ColumnDef) -> String {
        match column.logical_type {
            LogicalType::Int64 => "BIGINT".into(),
            LogicalType::Int32 => "INTEGER".into(),
            LogicalType::Float64 => "DOUBLE PRECISION".into(),
            LogicalType::Bool => "BOOLEAN".into(),
            LogicalType::String => match column.max_length {
                Some(n) => format!("VARCHAR({})", n),
                None => "TEXT".into(),
            },
            LogicalType::DateTime => "TIMESTAMP(6)".into(),
            LogicalType::Date => "DATE".into(),
            LogicalType::Decimal => "NUMERIC(19,4)".into(),
        }
    }

    fn build_create_table(&self, schema: &TableSchema, namespace: &str) -> Result<String> {
        let mut lines = column_definitions(self, schema)?;
        let pk: Vec<&str> = schema.primary_key.iter().map(String::as_str).collect();
        lines.push(format!("PRIMARY KEY ({})", column_list(self, &pk, None)?));
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
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
            "CREATE TEMP TABLE {} (\n    {}\n) ON COMMIT DROP",
            staging,
            column_definitions(self, schema)?.join(",\n    ")
        );

        let all: Vec<&str> = schema.column_names().collect();
        let keys: Vec<&str> = policy.merge_columns.iter().map(String::as_str).collect();
        let non_key = non_key_columns(schema, policy);
        let insert_cols = column_list(self, &all, None)?;

        let mut sql = format!(
            "INSERT INTO {} AS t ({})\nSELECT {} FROM {}\nON CONFLICT ({}) ",
            target,
            insert_cols,
            insert_cols,
            staging,
            column_list(self, &keys, None)?
        );

        if policy.update_on_match && !non_key.is_empty() {
            let set = non_key
                .iter()
                .map(|c| {
                    let q = self.quote_ident(c)?;
                    Ok(format!("{0} = EXCLUDED.{0}", q))
                })
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            sql.push_str(&format!("DO UPDATE SET {}", set));

            if !policy.change_probe_columns.is_empty() {
                let guard = policy
                    .change_probe_columns
                    .iter()
                    .map(|c| {
                        let q = self.quote_ident(c)?;
                        Ok(format!("t.{0} IS DISTINCT FROM EXCLUDED.{0}", q))
                    })
                    .collect::<Result<Vec<_>>>()?
                    .join(" OR ");
                sql.push_str(&format!("\nWHERE {}", guard));
            }
            // xmax is zero only for freshly inserted tuples.
            sql.push_str("\nRETURNING (xmax = 0) AS inserted");
        } else {
            sql.push_str("DO NOTHING\nRETURNING true AS inserted");
        }

        Ok(MergePlan {
            table: schema.id,
            dialect: self.name().to_string(),
            cleanup_statement: format!("DROP TABLE IF EXISTS {}", staging),
            staging_table,
            staging_ddl,
            match_probe: None,
            merge_statement: sql,
        })
    }
}
