//! Database driver implementations.
//!
//! Each driver module provides:
//! - a `Dialect`: pure SQL generation for the engine
//! - a writer implementing [`MergeTarget`] over a connection pool
//!
//! [`DialectImpl`] dispatches statically over the three dialects. Writers
//! are handed out as `Arc<dyn MergeTarget>` by [`connect_target`].

pub mod common;
pub mod mssql;
pub mod mysql;
pub mod postgres;

pub use common::{SslMode, TlsBuilder};

pub use mssql::{MssqlDialect, MssqlWriter};
pub use mysql::MysqlDialect;
#[cfg(feature = "mysql")]
pub use mysql::MysqlWriter;
pub use postgres::{PostgresDialect, PostgresWriter};

use std::sync::Arc;

use crate::config::Config;
use crate::core::{ColumnDef, Dialect, MergeFamily, MergePolicy, MergeTarget, TableSchema};
use crate::dialect::MergePlan;
use crate::error::{Result, SyncError};

/// Enum-based static dispatch for dialects.
#[derive(Debug, Clone, Copy)]
pub enum DialectImpl {
    Mssql(MssqlDialect),
    Mysql(MysqlDialect),
    Postgres(PostgresDialect),
}

impl Dialect for DialectImpl {
    fn name(&self) -> &str {
        match self {
            DialectImpl::Mssql(d) => d.name(),
            DialectImpl::Mysql(d) => d.name(),
            DialectImpl::Postgres(d) => d.name(),
        }
    }

    fn family(&self) -> MergeFamily {
        match self {
            DialectImpl::Mssql(d) => d.family(),
            DialectImpl::Mysql(d) => d.family(),
            DialectImpl::Postgres(d) => d.family(),
        }
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        match self {
            DialectImpl::Mssql(d) => d.quote_ident(name),
            DialectImpl::Mysql(d) => d.quote_ident(name),
            DialectImpl::Postgres(d) => d.quote_ident(name),
        }
    }

    fn qualify(&self, namespace: &str, table: &str) -> Result<String> {
        match self {
            DialectImpl::Mssql(d) => d.qualify(namespace, table),
            DialectImpl::Mysql(d) => d.qualify(namespace, table),
            DialectImpl::Postgres(d) => d.qualify(namespace, table),
        }
    }

    fn native_type(&self, column: &ColumnDef) -> String {
        match self {
            DialectImpl::Mssql(d) => d.native_type(column),
            DialectImpl::Mysql(d) => d.native_type(column),
            DialectImpl::Postgres(d) => d.native_type(column),
        }
    }

    fn build_create_table(&self, schema: &TableSchema, namespace: &str) -> Result<String> {
        match self {
            DialectImpl::Mssql(d) => d.build_create_table(schema, namespace),
            DialectImpl::Mysql(d) => d.build_create_table(schema, namespace),
            DialectImpl::Postgres(d) => d.build_create_table(schema, namespace),
        }
    }

    fn build_merge_plan(
        &self,
        schema: &TableSchema,
        policy: &MergePolicy,
        namespace: &str,
    ) -> Result<MergePlan> {
        match self {
            DialectImpl::Mssql(d) => d.build_merge_plan(schema, policy, namespace),
            DialectImpl::Mysql(d) => d.build_merge_plan(schema, policy, namespace),
            DialectImpl::Postgres(d) => d.build_merge_plan(schema, policy, namespace),
        }
    }
}

impl DialectImpl {
    /// Create a dialect implementation from a database type string.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DialectUnsupported`] if the type is not recognized.
    pub fn from_db_type(db_type: &str) -> Result<Self> {
        match db_type.to_lowercase().as_str() {
            "mssql" | "sqlserver" | "sql_server" => Ok(DialectImpl::Mssql(MssqlDialect::new())),
            "mysql" | "mariadb" => Ok(DialectImpl::Mysql(MysqlDialect::new())),
            "postgres" | "postgresql" | "pg" => Ok(DialectImpl::Postgres(PostgresDialect::new())),
            other => Err(SyncError::DialectUnsupported(other.to_string())),
        }
    }
}

/// Connect to the configured target and return it as a [`MergeTarget`].
pub async fn connect_target(config: &Config) -> Result<Arc<dyn MergeTarget>> {
    let target = &config.target;
    let namespace = target.namespace();
    let sync = &config.sync;

    match target.dialect()? {
        DialectImpl::Mssql(_) => {
            let writer = MssqlWriter::new(target, namespace, sync).await?;
            Ok(Arc::new(writer))
        }
        #[cfg(feature = "mysql")]
        DialectImpl::Mysql(_) => {
            let writer = MysqlWriter::new(target, namespace, sync).await?;
            Ok(Arc::new(writer))
        }
        #[cfg(not(feature = "mysql"))]
        DialectImpl::Mysql(_) => Err(SyncError::DialectUnsupported(
            "mysql (built without the 'mysql' feature)".to_string(),
        )),
        DialectImpl::Postgres(_) => {
            let writer = PostgresWriter::new(target, namespace, sync).await?;
            Ok(Arc::new(writer))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_impl_from_db_type() {
        assert_eq!(DialectImpl::from_db_type("mssql").unwrap().name(), "mssql");
        assert_eq!(DialectImpl::from_db_type("MySQL").unwrap().name(), "mysql");
        assert_eq!(
            DialectImpl::from_db_type("postgres").unwrap().name(),
            "postgres"
        );

        assert!(DialectImpl::from_db_type("sqlserver").is_ok());
        assert!(DialectImpl::from_db_type("mariadb").is_ok());
        assert!(DialectImpl::from_db_type("pg").is_ok());
    }

    #[test]
    fn test_unknown_dialect_is_unsupported() {
        let err = DialectImpl::from_db_type("oracle").unwrap_err();
        assert!(matches!(err, SyncError::DialectUnsupported(ref d) if d == "oracle"));
    }

    #[test]
    fn test_families() {
        let family = |db| DialectImpl::from_db_type(db).unwrap().family();
        assert_eq!(family("mssql"), MergeFamily::SetBasedMerge);
        assert_eq!(family("mysql"), MergeFamily::ConflictClause);
        assert_eq!(family("postgres"), MergeFamily::ConflictClause);
    }

    #[test]
    fn test_dispatch_quotes_per_engine() {
        let quote = |db| DialectImpl::from_db_type(db).unwrap().quote_ident("t").unwrap();
        assert_eq!(quote("mssql"), "[t]");
        assert_eq!(quote("mysql"), "`t`");
        assert_eq!(quote("postgres"), "\"t\"");
    }
}
