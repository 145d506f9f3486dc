//! MySQL/MariaDB merge target.
//!
//! Rows are loaded into a session `TEMPORARY` table with batched multi-row
//! `INSERT`s and merged with one `INSERT ... SELECT`. MySQL reports a
//! combined affected-row count, so the match probe counts staged keys that
//! already exist before the merge runs.

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, SslOpts, TxOpts, Value};
use tracing::{debug, info, warn};

use super::MysqlDialect;
use crate::config::{SyncConfig, TargetConfig};
use crate::core::{Dialect, MergeCounts, MergeRequest, MergeTarget, SqlValue, TableSchema};
use crate::dialect::column_list;
use crate::drivers::common::{connect_with_retry, SslMode};
use crate::drivers::DialectImpl;
use crate::error::{Result, SyncError};

/// MySQL max placeholders per prepared statement.
const MYSQL_MAX_PLACEHOLDERS: usize = 65535;

/// Deadlock found when trying to get lock.
const ER_LOCK_DEADLOCK: u16 = 1213;

/// Lock wait timeout exceeded.
const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;

/// MySQL merge target using mysql_async.
pub struct MysqlWriter {
    pool: Pool,
    namespace: String,
    dialect: MysqlDialect,
}

impl MysqlWriter {
    /// Build the pool and verify a connection, retrying with backoff.
    pub async fn new(config: &TargetConfig, namespace: String, sync: &SyncConfig) -> Result<Self> {
        let ssl_opts = match SslMode::parse(&config.ssl_mode)? {
            SslMode::Disable => {
                warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
                None
            }
            SslMode::Require => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
            SslMode::VerifyCa => Some(SslOpts::default().with_danger_skip_domain_validation(true)),
            SslMode::VerifyFull => Some(SslOpts::default()),
        };

        let constraints = PoolConstraints::new(1, sync.max_connections.max(1) as usize)
            .ok_or_else(|| SyncError::Config("sync.max_connections must be at least 1".into()))?;

        let mut builder = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.effective_port())
            .db_name(Some(config.database.clone()))
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .init(vec!["SET NAMES utf8mb4"]);

        if let Some(ssl) = ssl_opts {
            builder = builder.ssl_opts(ssl);
        }

        let opts: Opts = builder
            .pool_opts(PoolOpts::new().with_constraints(constraints))
            .into();
        let pool = Pool::new(opts);

        connect_with_retry("Connecting to MySQL target", sync.connect_retries, || {
            let pool = pool.clone();
            async move {
                let mut conn = pool.get_conn().await.map_err(|e| {
                    SyncError::connection(e.to_string(), "testing MySQL target connection")
                })?;
                conn.query_drop("SELECT 1").await.map_err(|e| {
                    SyncError::connection(e.to_string(), "testing MySQL target connection")
                })?;
                Ok(())
            }
        })
        .await?;

        info!(
            "Connected to MySQL target: {}:{}/{}",
            config.host,
            config.effective_port(),
            config.database
        );

        Ok(Self {
            pool,
            namespace,
            dialect: MysqlDialect::new(),
        })
    }

    async fn get_conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| SyncError::connection(e.to_string(), "getting MySQL connection"))
    }

    async fn stage_and_merge(
        &self,
        tx: &mut mysql_async::Transaction<'_>,
        request: &MergeRequest<'_>,
    ) -> Result<MergeCounts> {
        let table = request.schema.name();
        let plan = request.plan;

        tx.query_drop(plan.staging_ddl.as_str())
            .await
            .map_err(|e| classify(table, "creating staging table", e))?;

        let columns: Vec<&str> = request.schema.column_names().collect();
        let staging = self.dialect.quote_ident(&plan.staging_table)?;
        let col_list = column_list(&self.dialect, &columns, None)?;
        let max_rows_per_batch = (MYSQL_MAX_PLACEHOLDERS / columns.len().max(1)).max(1);
        let placeholders_per_row = format!("({})", vec!["?"; columns.len()].join(", "));

        for chunk in request.rows.chunks(max_rows_per_batch) {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                staging,
                col_list,
                vec![placeholders_per_row.as_str(); chunk.len()].join(", ")
            );
            let params: Vec<Value> = chunk
                .iter()
                .flat_map(|row| row.values().iter().map(sql_value_to_mysql))
                .collect();
            tx.exec_drop(sql, params)
                .await
                .map_err(|e| classify(table, "loading staging table", e))?;
        }

        let mut matched = 0;
        if let Some(probe) = &plan.match_probe {
            let count: Option<u64> = tx
                .query_first(probe.as_str())
                .await
                .map_err(|e| classify(table, "match probe", e))?;
            matched = count.unwrap_or(0);
        }

        let result = tx
            .query_iter(plan.merge_statement.as_str())
            .await
            .map_err(|e| classify(table, "merge", e))?;
        let affected = result.affected_rows();
        result
            .drop_result()
            .await
            .map_err(|e| classify(table, "merge", e))?;

        tx.query_drop(plan.cleanup_statement.as_str())
            .await
            .map_err(|e| classify(table, "dropping staging table", e))?;

        Ok(split_affected_rows(
            request.rows.len() as u64,
            matched,
            affected,
            plan.match_probe.is_some(),
        ))
    }
}

/// Derive inserted/updated counts from MySQL's affected-row count.
///
/// With `ON DUPLICATE KEY UPDATE` an inserted row counts 1, a changed row 2
/// and an unchanged row 0. Without an update clause every affected row is an
/// insert.
fn split_affected_rows(staged: u64, matched: u64, affected: u64, upsert: bool) -> MergeCounts {
    if !upsert {
        return MergeCounts {
            inserted: affected,
            updated: 0,
        };
    }
    let inserted = staged.saturating_sub(matched);
    MergeCounts {
        inserted,
        updated: affected.saturating_sub(inserted) / 2,
    }
}

#[async_trait]
impl MergeTarget for MysqlWriter {
    fn dialect(&self) -> DialectImpl {
        DialectImpl::Mysql(self.dialect)
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn ensure_table(&self, schema: &TableSchema) -> Result<()> {
        let ddl = self.dialect.build_create_table(schema, &self.namespace)?;
        let mut conn = self.get_conn().await?;
        conn.query_drop(ddl)
            .await
            .map_err(|e| SyncError::merge(schema.name(), format!("creating table: {}", e)))?;
        debug!("Ensured table {}.{}", self.namespace, schema.name());
        Ok(())
    }

    async fn apply_merge(&self, request: MergeRequest<'_>) -> Result<MergeCounts> {
        let table = request.schema.name();
        let mut conn = self.get_conn().await?;

        // Temporary tables survive rollback; clear any leftover first.
        conn.query_drop(request.plan.cleanup_statement.as_str())
            .await
            .map_err(|e| classify(table, "dropping stale staging table", e))?;

        let mut tx = conn
            .start_transaction(TxOpts::default())
            .await
            .map_err(|e| classify(table, "begin transaction", e))?;

        let outcome = self.stage_and_merge(&mut tx, &request).await;
        match outcome {
            Ok(counts) => {
                tx.commit()
                    .await
                    .map_err(|e| classify(table, "commit", e))?;
                debug!(
                    "MySQL: merged {} rows into {} ({} inserted, {} updated)",
                    request.rows.len(),
                    table,
                    counts.inserted,
                    counts.updated
                );
                Ok(counts)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!("MySQL: rollback of {} merge failed: {}", table, rb);
                }
                conn.query_drop(request.plan.cleanup_statement.as_str())
                    .await
                    .ok();
                Err(e)
            }
        }
    }

    async fn row_count(&self, schema: &TableSchema) -> Result<u64> {
        let sql = self.dialect.build_count_query(schema, &self.namespace)?;
        let mut conn = self.get_conn().await?;
        let count: Option<u64> = conn
            .query_first(sql)
            .await
            .map_err(|e| SyncError::merge(schema.name(), e.to_string()))?;
        Ok(count.unwrap_or(0))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| SyncError::connection(e.to_string(), "MySQL ping"))
    }

    async fn close(&self) {
        if let Err(e) = self.pool.clone().disconnect().await {
            warn!("MySQL: error disconnecting pool: {}", e);
        }
    }
}

fn is_transient(e: &mysql_async::Error) -> bool {
    matches!(
        e,
        mysql_async::Error::Server(server)
            if server.code == ER_LOCK_DEADLOCK || server.code == ER_LOCK_WAIT_TIMEOUT
    )
}

fn classify(table: &str, stage: &str, e: mysql_async::Error) -> SyncError {
    let message = format!("{}: {}", stage, e);
    if is_transient(&e) {
        SyncError::transient_merge(table, message)
    } else {
        SyncError::merge(table, message)
    }
}

fn sql_value_to_mysql(value: &SqlValue<'_>) -> Value {
    match value {
        SqlValue::Null(_) => Value::NULL,
        SqlValue::Bool(b) => Value::from(*b),
        SqlValue::I32(i) => Value::from(*i),
        SqlValue::I64(i) => Value::from(*i),
        SqlValue::F64(f) => Value::from(*f),
        SqlValue::Text(s) => Value::from(s.as_ref()),
        SqlValue::Decimal(d) => Value::from(d.to_string()),
        SqlValue::DateTime(dt) => Value::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1_000,
        ),
        SqlValue::Date(d) => Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
    }
}
