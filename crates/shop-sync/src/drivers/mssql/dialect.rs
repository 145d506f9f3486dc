//! MSSQL SQL dialect: set-based `MERGE` from a session temp table.

use crate::core::identifier::{qualify_mssql, quote_mssql};
use crate::core::{ColumnDef, Dialect, LogicalType, MergeFamily, MergePolicy, TableSchema};
use crate::dialect::{
    column_definitions, column_list, key_join, non_key_columns, staging_name, MergePlan,
};
use crate::error::Result;

/// Largest bounded `NVARCHAR` length, in UTF-16 code units.
const NVARCHAR_MAX_UNITS: u32 = 4000;

/// Microsoft SQL Server dialect implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    /// Create a new MSSQL dialect instance.
    pub fn new() -> Self {
        Self
    }

    /// Null-safe "differs" test; MSSQL has no `IS DISTINCT FROM`.
    fn differs(&self, column: &str) -> Result<String> {
        let q = quote_mssql(column)?;
        Ok(format!(
            "(target.{0} <> source.{0} OR (target.{0} IS NULL AND source.{0} IS NOT NULL) OR (target.{0} IS NOT NULL AND source.{0} IS NULL))",
            q
        ))
    }
}

impl Dialect for MssqlDialect {
    fn name(&self) -> &str {
        "mssql"
    }

    fn family(&self) -> MergeFamily {
        MergeFamily::SetBasedMerge
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_mssql(name)
    }

    fn qualify(&self, namespace: &str, table: &str) -> Result<String> {
        qualify_mssql(namespace, table)
    }

    fn native_type(&self, column: &ColumnDef) -> String {
        match column.logical_type {
            LogicalType::Int64 => "BIGINT".into(),
            LogicalType::Int32 => "INT".into(),
            LogicalType::Float64 => "FLOAT(53)".into(),
            LogicalType::Bool => "BIT".into(),
            // NVARCHAR(n) counts UTF-16 code units while max_length counts
            // characters; a supplementary-plane character takes two units.
            LogicalType::String => match column.max_length.map(|n| n.saturating_mul(2)) {
                Some(units) if units <= NVARCHAR_MAX_UNITS => format!("NVARCHAR({})", units),
                _ => "NVARCHAR(MAX)".into(),
            },
            LogicalType::DateTime => "DATETIME2(7)".into(),
            LogicalType::Date => "DATE".into(),
            LogicalType::Decimal => "DECIMAL(19,4)".into(),
        }
    }

    fn build_create_table(&self, schema: &TableSchema, namespace: &str) -> Result<String> {
        let table = self.qualify(namespace, schema.name())?;
        let mut lines = column_definitions(self, schema)?;
        let pk: Vec<&str> = schema.primary_key.iter().map(String::as_str).collect();
        lines.push(format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            self.quote_ident(&format!("PK_{}", schema.name()))?,
            column_list(self, &pk, None)?
        ));
        Ok(format!(
            "IF OBJECT_ID(N'{}', N'U') IS NULL\nCREATE TABLE {} (\n    {}\n);",
            table.replace('\'', "''"),
            table,
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
        let staging_table = format!("#{}", staging_name(schema.name()));
        let staging = self.quote_ident(&staging_table)?;

        let staging_ddl = format!(
            "CREATE TABLE {} (\n    {}\n);",
            staging,
            column_definitions(self, schema)?.join(",\n    ")
        );

        let all: Vec<&str> = schema.column_names().collect();
        let non_key = non_key_columns(schema, policy);

        let mut sql = format!(
            "MERGE INTO {} WITH (HOLDLOCK) AS target\nUSING {} AS source\nON {}",
            target,
            staging,
            key_join(self, &policy.merge_columns, "target", "source")?
        );

        if policy.update_on_match && !non_key.is_empty() {
            let set = non_key
                .iter()
                .map(|c| {
                    let q = self.quote_ident(c)?;
                    Ok(format!("{0} = source.{0}", q))
                })
                .collect::<Result<Vec<_>>>()?
                .join(", ");

            if policy.change_probe_columns.is_empty() {
                sql.push_str(&format!("\nWHEN MATCHED THEN UPDATE SET {}", set));
            } else {
                let probe = policy
                    .change_probe_columns
                    .iter()
                    .map(|c| self.differs(c))
                    .collect::<Result<Vec<_>>>()?
                    .join(" OR ");
                sql.push_str(&format!(
                    "\nWHEN MATCHED AND ({}) THEN UPDATE SET {}",
                    probe, set
                ));
            }
        }

        sql.push_str(&format!(
            "\nWHEN NOT MATCHED BY TARGET THEN INSERT ({}) VALUES ({})\nOUTPUT $action;",
            column_list(self, &all, None)?,
            column_list(self, &all, Some("source"))?
        ));

        let cleanup_statement = format!(
            "IF OBJECT_ID('tempdb..{}') IS NOT NULL DROP TABLE {};",
            staging_table.replace('\'', "''"),
            staging
        );

        Ok(MergePlan {
            table: schema.id,
            dialect: self.name().to_string(),
            staging_table,
            staging_ddl,
            match_probe: None,
            merge_statement: sql,
            cleanup_statement,
        })
    }
}
