//! PostgreSQL merge target.
//!
//! Rows are streamed into an `ON COMMIT DROP` temp table with text-format
//! `COPY`, then merged with one `INSERT ... ON CONFLICT ... RETURNING`
//! statement whose result rows tell inserts from updates.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::SinkExt;
use tokio_postgres::error::SqlState;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use super::PostgresDialect;
use crate::config::{SyncConfig, TargetConfig};
use crate::core::{Dialect, MergeCounts, MergeRequest, MergeTarget, SqlValue, TableSchema};
use crate::dialect::column_list;
use crate::drivers::common::{connect_with_retry, TlsBuilder};
use crate::drivers::DialectImpl;
use crate::error::{Result, SyncError};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL merge target.
pub struct PostgresWriter {
    pool: Pool,
    namespace: String,
    dialect: PostgresDialect,
}

impl PostgresWriter {
    /// Build the pool and verify a connection, retrying with backoff.
    pub async fn new(config: &TargetConfig, namespace: String, sync: &SyncConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.effective_port());
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = match TlsBuilder::parse(&config.ssl_mode)?.build()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
        };

        let pool = Pool::builder(mgr)
            .max_size(sync.max_connections as usize)
            .build()
            .map_err(|e| SyncError::connection(e.to_string(), "creating PostgreSQL target pool"))?;

        connect_with_retry("Connecting to PostgreSQL target", sync.connect_retries, || {
            let pool = pool.clone();
            async move {
                let client = pool.get().await.map_err(|e| {
                    SyncError::connection(e.to_string(), "testing PostgreSQL target connection")
                })?;
                client.simple_query("SELECT 1").await.map_err(|e| {
                    SyncError::connection(describe(&e), "testing PostgreSQL target connection")
                })?;
                Ok(())
            }
        })
        .await?;

        info!(
            "Connected to PostgreSQL target: {}:{}/{}",
            config.host,
            config.effective_port(),
            config.database
        );

        Ok(Self {
            pool,
            namespace,
            dialect: PostgresDialect::new(),
        })
    }

    async fn get_client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| SyncError::connection(e.to_string(), "getting PostgreSQL connection"))
    }

    async fn stage_and_merge(
        &self,
        tx: &tokio_postgres::Transaction<'_>,
        request: &MergeRequest<'_>,
    ) -> Result<MergeCounts> {
        let table = request.schema.name();
        let plan = request.plan;

        tx.batch_execute(&plan.staging_ddl)
            .await
            .map_err(|e| classify(table, "creating staging table", &e))?;

        let columns: Vec<&str> = request.schema.column_names().collect();
        let copy_sql = format!(
            "COPY {} ({}) FROM STDIN",
            self.dialect.quote_ident(&plan.staging_table)?,
            column_list(&self.dialect, &columns, None)?
        );

        let mut buf = BytesMut::with_capacity(request.rows.len() * 256);
        for row in request.rows {
            write_copy_row(&mut buf, row.values());
        }

        let sink = tx
            .copy_in(&copy_sql)
            .await
            .map_err(|e| classify(table, "initiating COPY", &e))?;
        tokio::pin!(sink);
        sink.send(buf.freeze())
            .await
            .map_err(|e| classify(table, "sending COPY data", &e))?;
        sink.finish()
            .await
            .map_err(|e| classify(table, "finishing COPY", &e))?;

        let rows = tx
            .query(plan.merge_statement.as_str(), &[])
            .await
            .map_err(|e| classify(table, "merge", &e))?;

        let mut counts = MergeCounts::default();
        for row in &rows {
            if row.try_get::<_, bool>(0).unwrap_or(false) {
                counts.inserted += 1;
            } else {
                counts.updated += 1;
            }
        }

        tx.batch_execute(&plan.cleanup_statement)
            .await
            .map_err(|e| classify(table, "dropping staging table", &e))?;

        Ok(counts)
    }
}

#[async_trait]
impl MergeTarget for PostgresWriter {
    fn dialect(&self) -> DialectImpl {
        DialectImpl::Postgres(self.dialect)
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn ensure_table(&self, schema: &TableSchema) -> Result<()> {
        let client = self.get_client().await?;
        let create_schema = format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            self.dialect.quote_ident(&self.namespace)?
        );
        let ddl = self.dialect.build_create_table(schema, &self.namespace)?;
        client
            .batch_execute(&format!("{};\n{}", create_schema, ddl))
            .await
            .map_err(|e| SyncError::merge(schema.name(), format!("creating table: {}", describe(&e))))?;
        debug!("Ensured table {}.{}", self.namespace, schema.name());
        Ok(())
    }

    async fn apply_merge(&self, request: MergeRequest<'_>) -> Result<MergeCounts> {
        let table = request.schema.name();
        let mut client = self.get_client().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| classify(table, "begin transaction", &e))?;

        match self.stage_and_merge(&tx, &request).await {
            Ok(counts) => {
                tx.commit()
                    .await
                    .map_err(|e| classify(table, "commit", &e))?;
                debug!(
                    "PostgreSQL: merged {} rows into {} ({} inserted, {} updated)",
                    request.rows.len(),
                    table,
                    counts.inserted,
                    counts.updated
                );
                Ok(counts)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!("PostgreSQL: rollback of {} merge failed: {}", table, rb);
                }
                Err(e)
            }
        }
    }

    async fn row_count(&self, schema: &TableSchema) -> Result<u64> {
        let sql = self.dialect.build_count_query(schema, &self.namespace)?;
        let client = self.get_client().await?;
        let row = client
            .query_one(sql.as_str(), &[])
            .await
            .map_err(|e| SyncError::merge(schema.name(), describe(&e)))?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    async fn ping(&self) -> Result<()> {
        let client = self.get_client().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| SyncError::connection(describe(&e), "PostgreSQL ping"))?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// Server message when available; `Display` alone only says "db error".
fn describe(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => format!("{}: {}", db.code().code(), db.message()),
        None => e.to_string(),
    }
}

fn is_transient(e: &tokio_postgres::Error) -> bool {
    matches!(
        e.code(),
        Some(code) if *code == SqlState::T_R_DEADLOCK_DETECTED
            || *code == SqlState::T_R_SERIALIZATION_FAILURE
            || *code == SqlState::LOCK_NOT_AVAILABLE
    )
}

fn classify(table: &str, stage: &str, e: &tokio_postgres::Error) -> SyncError {
    let message = format!("{}: {}", stage, describe(e));
    if is_transient(e) {
        SyncError::transient_merge(table, message)
    } else {
        SyncError::merge(table, message)
    }
}

/// Append one row in COPY text format.
fn write_copy_row(buf: &mut BytesMut, values: &[SqlValue<'_>]) {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            buf.extend_from_slice(b"\t");
        }
        buf.extend_from_slice(value_to_text(value).as_bytes());
    }
    buf.extend_from_slice(b"\n");
}

fn value_to_text(value: &SqlValue<'_>) -> String {
    match value {
        SqlValue::Null(_) => "\\N".to_string(),
        SqlValue::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        SqlValue::I32(i) => i.to_string(),
        SqlValue::I64(i) => i.to_string(),
        SqlValue::F64(f) => f.to_string(),
        SqlValue::Text(s) => escape_copy_text(s),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
    }
}

/// Escape text for PostgreSQL COPY.
fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}
