//! MSSQL merge target.
//!
//! Each merge runs on one pooled connection inside an explicit
//! transaction: the rows are bulk loaded into a session temp table with the
//! TDS bulk insert protocol, merged with a single `MERGE ... OUTPUT $action`
//! and the temp table is dropped before commit.

use std::borrow::Cow;
use std::fmt::Display;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use tiberius::{AuthMethod as TiberiusAuthMethod, Client, ColumnData, Config, EncryptionLevel, TokenRow};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use super::MssqlDialect;
use crate::config::{AuthMethod, SyncConfig, TargetConfig};
use crate::core::{
    Dialect, MergeCounts, MergeRequest, MergeTarget, SqlNullType, SqlValue, TableSchema,
};
use crate::drivers::common::{connect_with_retry, SslMode};
use crate::drivers::DialectImpl;
use crate::error::{Result, SyncError};

/// Lock request timeout; retryable like a deadlock.
const LOCK_TIMEOUT_ERROR: u32 = 1222;

/// Scale of every `DECIMAL` column this driver creates.
const DECIMAL_SCALE: u32 = 4;

/// Connection pool timeouts.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    config: TargetConfig,
    ssl_mode: SslMode,
}

impl TiberiusConnectionManager {
    pub fn new(config: TargetConfig) -> Result<Self> {
        let ssl_mode = SslMode::parse(&config.ssl_mode)?;
        #[cfg(not(feature = "kerberos"))]
        if config.auth == AuthMethod::Integrated {
            return Err(SyncError::Config(
                "auth: integrated requires building with the 'kerberos' feature".into(),
            ));
        }
        Ok(Self { config, ssl_mode })
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.effective_port());
        config.database(&self.config.database);

        match self.config.auth {
            #[cfg(feature = "kerberos")]
            AuthMethod::Integrated => {
                config.authentication(TiberiusAuthMethod::Integrated);
            }
            _ => {
                config.authentication(TiberiusAuthMethod::sql_server(
                    &self.config.user,
                    &self.config.password,
                ));
            }
        }

        match self.ssl_mode {
            SslMode::Disable => config.encryption(EncryptionLevel::NotSupported),
            mode => {
                if !mode.verifies_certificate() {
                    config.trust_cert();
                }
                config.encryption(EncryptionLevel::Required);
            }
        }

        config
    }
}

/// Tracks whether a pooled connection can be handed out again.
///
/// A failed `COMMIT` or `ROLLBACK` leaves the session's transaction state
/// unknown, so the connection is marked broken and bb8 drops it on release.
#[derive(Debug, Default)]
struct ConnectionHealth {
    broken: Option<String>,
}

impl ConnectionHealth {
    fn record<T, E: Display>(&mut self, stage: &str, result: &std::result::Result<T, E>) {
        if let Err(e) = result {
            if self.broken.is_none() {
                self.broken = Some(format!("{} failed: {}", stage, e));
            }
        }
    }

    fn is_broken(&self) -> bool {
        self.broken.is_some()
    }

    fn reason(&self) -> Option<&str> {
        self.broken.as_deref()
    }
}

/// Pooled Tiberius client plus its health flag.
pub struct TdsConnection {
    client: Client<Compat<TcpStream>>,
    health: ConnectionHealth,
}

impl Deref for TdsConnection {
    type Target = Client<Compat<TcpStream>>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl DerefMut for TdsConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.client
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = TdsConnection;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            }
        })?;
        tcp.set_nodelay(true).ok();
        let client = Client::connect(config, tcp.compat_write()).await?;
        Ok(TdsConnection {
            client,
            health: ConnectionHealth::default(),
        })
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        if let Some(reason) = conn.health.reason() {
            warn!("MSSQL: discarding pooled connection ({})", reason);
        }
        conn.health.is_broken()
    }
}

type MssqlConn<'a> = PooledConnection<'a, TiberiusConnectionManager>;

/// MSSQL merge target.
pub struct MssqlWriter {
    pool: Pool<TiberiusConnectionManager>,
    namespace: String,
    dialect: MssqlDialect,
}

impl MssqlWriter {
    /// Connect, retrying with backoff, and verify the connection.
    pub async fn new(config: &TargetConfig, namespace: String, sync: &SyncConfig) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone())?;
        let max_size = sync.max_connections;

        let pool = connect_with_retry("Connecting to MSSQL target", sync.connect_retries, || {
            let manager = manager.clone();
            async move {
                let pool = Pool::builder()
                    .max_size(max_size)
                    .connection_timeout(POOL_CONNECTION_TIMEOUT)
                    .idle_timeout(Some(POOL_IDLE_TIMEOUT))
                    .max_lifetime(Some(POOL_MAX_LIFETIME))
                    .test_on_check_out(true)
                    .build(manager)
                    .await
                    .map_err(|e| SyncError::connection(e.to_string(), "creating MSSQL target pool"))?;
                {
                    let mut conn = pool.get().await.map_err(|e| {
                        SyncError::connection(e.to_string(), "testing MSSQL target connection")
                    })?;
                    ping(&mut conn).await?;
                }
                Ok(pool)
            }
        })
        .await?;

        info!(
            "Connected to MSSQL target: {}:{}/{} (pool_size={})",
            config.host,
            config.effective_port(),
            config.database,
            max_size
        );

        Ok(Self {
            pool,
            namespace,
            dialect: MssqlDialect::new(),
        })
    }

    async fn get_conn(&self) -> Result<MssqlConn<'_>> {
        self.pool
            .get()
            .await
            .map_err(|e| SyncError::connection(e.to_string(), "getting MSSQL target connection"))
    }

    /// Staging DDL, bulk load, merge and cleanup. Runs inside the caller's
    /// transaction.
    async fn stage_and_merge(
        &self,
        conn: &mut MssqlConn<'_>,
        request: &MergeRequest<'_>,
    ) -> Result<MergeCounts> {
        let table = request.schema.name();
        let plan = request.plan;

        execute(conn, &plan.staging_ddl)
            .await
            .map_err(|e| classify(table, "creating staging table", e))?;

        let mut bulk_load = conn
            .bulk_insert(&plan.staging_table)
            .await
            .map_err(|e| classify(table, "bulk insert init", e))?;
        for row in request.rows {
            let mut token_row = TokenRow::new();
            for value in row.values() {
                token_row.push(sql_value_to_column_data(value));
            }
            bulk_load
                .send(token_row)
                .await
                .map_err(|e| classify(table, "bulk insert send", e))?;
        }
        bulk_load
            .finalize()
            .await
            .map_err(|e| classify(table, "bulk insert finalize", e))?;

        let actions = conn
            .simple_query(&plan.merge_statement)
            .await
            .map_err(|e| classify(table, "merge", e))?
            .into_first_result()
            .await
            .map_err(|e| classify(table, "merge results", e))?;

        let mut counts = MergeCounts::default();
        for row in &actions {
            match row.get::<&str, _>(0) {
                Some("INSERT") => counts.inserted += 1,
                Some("UPDATE") => counts.updated += 1,
                _ => {}
            }
        }

        execute(conn, &plan.cleanup_statement)
            .await
            .map_err(|e| classify(table, "dropping staging table", e))?;

        Ok(counts)
    }
}

#[async_trait]
impl MergeTarget for MssqlWriter {
    fn dialect(&self) -> DialectImpl {
        DialectImpl::Mssql(self.dialect)
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn ensure_table(&self, schema: &TableSchema) -> Result<()> {
        let ddl = self.dialect.build_create_table(schema, &self.namespace)?;
        let mut conn = self.get_conn().await?;
        execute(&mut conn, &ddl)
            .await
            .map_err(|e| SyncError::merge(schema.name(), format!("creating table: {}", e)))?;
        debug!("Ensured table {}.{}", self.namespace, schema.name());
        Ok(())
    }

    async fn apply_merge(&self, request: MergeRequest<'_>) -> Result<MergeCounts> {
        let table = request.schema.name();
        let mut conn = self.get_conn().await?;

        execute(&mut conn, "BEGIN TRAN")
            .await
            .map_err(|e| classify(table, "begin transaction", e))?;

        match self.stage_and_merge(&mut conn, &request).await {
            Ok(counts) => {
                let committed = execute(&mut conn, "COMMIT TRAN").await;
                conn.health.record("commit", &committed);
                committed.map_err(|e| classify(table, "commit", e))?;
                debug!(
                    "MSSQL: merged {} rows into {} ({} inserted, {} updated)",
                    request.rows.len(),
                    table,
                    counts.inserted,
                    counts.updated
                );
                Ok(counts)
            }
            Err(e) => {
                let rolled_back = execute(&mut conn, "IF @@TRANCOUNT > 0 ROLLBACK TRAN").await;
                if let Err(rb) = &rolled_back {
                    warn!("MSSQL: rollback of {} merge failed: {}", table, rb);
                }
                conn.health.record("rollback", &rolled_back);
                // The temp table outlives a rolled back transaction only if it
                // was created before it; drop it either way.
                execute(&mut conn, &request.plan.cleanup_statement).await.ok();
                Err(e)
            }
        }
    }

    async fn row_count(&self, schema: &TableSchema) -> Result<u64> {
        let sql = self.dialect.build_count_query(schema, &self.namespace)?;
        let mut conn = self.get_conn().await?;
        let row = conn
            .simple_query(sql)
            .await
            .map_err(|e| SyncError::merge(schema.name(), e.to_string()))?
            .into_row()
            .await
            .map_err(|e| SyncError::merge(schema.name(), e.to_string()))?;
        let count: i32 = row.and_then(|r| r.get(0)).unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        ping(&mut conn).await
    }

    async fn close(&self) {
        // bb8 closes pooled connections on drop
        debug!("MSSQL: closing target pool");
    }
}

async fn ping(conn: &mut Client<Compat<TcpStream>>) -> Result<()> {
    conn.simple_query("SELECT 1")
        .await
        .map_err(|e| SyncError::connection(e.to_string(), "MSSQL ping"))?
        .into_row()
        .await
        .map_err(|e| SyncError::connection(e.to_string(), "MSSQL ping"))?;
    Ok(())
}

/// Run a statement batch and drain its results.
async fn execute(
    conn: &mut Client<Compat<TcpStream>>,
    sql: &str,
) -> std::result::Result<(), tiberius::error::Error> {
    conn.simple_query(sql).await?.into_results().await?;
    Ok(())
}

fn is_transient(e: &tiberius::error::Error) -> bool {
    match e {
        tiberius::error::Error::Server(token) => {
            e.is_deadlock() || token.code() == LOCK_TIMEOUT_ERROR
        }
        _ => false,
    }
}

fn classify(table: &str, stage: &str, e: tiberius::error::Error) -> SyncError {
    let message = format!("{}: {}", stage, e);
    if is_transient(&e) {
        SyncError::transient_merge(table, message)
    } else {
        SyncError::merge(table, message)
    }
}

fn tds_date(date: NaiveDate) -> Option<tiberius::time::Date> {
    let epoch = NaiveDate::from_ymd_opt(1, 1, 1)?;
    let days = (date - epoch).num_days();
    u32::try_from(days).ok().map(tiberius::time::Date::new)
}

fn tds_datetime2(dt: &NaiveDateTime) -> Option<tiberius::time::DateTime2> {
    let date = tds_date(dt.date())?;
    let time = dt.time();
    let nanos = time.num_seconds_from_midnight() as u64 * 1_000_000_000 + time.nanosecond() as u64;
    Some(tiberius::time::DateTime2::new(
        date,
        tiberius::time::Time::new(nanos / 100, 7),
    ))
}

fn sql_value_to_column_data(value: &SqlValue<'_>) -> ColumnData<'static> {
    match value {
        SqlValue::Null(null_type) => match null_type {
            SqlNullType::Bool => ColumnData::Bit(None),
            SqlNullType::I32 => ColumnData::I32(None),
            SqlNullType::I64 => ColumnData::I64(None),
            SqlNullType::F64 => ColumnData::F64(None),
            SqlNullType::String => ColumnData::String(None),
            SqlNullType::Decimal => ColumnData::Numeric(None),
            SqlNullType::DateTime => ColumnData::DateTime2(None),
            SqlNullType::Date => ColumnData::Date(None),
        },
        SqlValue::Bool(b) => ColumnData::Bit(Some(*b)),
        SqlValue::I32(i) => ColumnData::I32(Some(*i)),
        SqlValue::I64(i) => ColumnData::I64(Some(*i)),
        SqlValue::F64(f) => ColumnData::F64(Some(*f)),
        SqlValue::Text(s) => ColumnData::String(Some(Cow::Owned(s.to_string()))),
        SqlValue::Decimal(d) => {
            let mut d = *d;
            d.rescale(DECIMAL_SCALE);
            ColumnData::Numeric(Some(tiberius::numeric::Numeric::new_with_scale(
                d.mantissa(),
                DECIMAL_SCALE as u8,
            )))
        }
        SqlValue::DateTime(dt) => ColumnData::DateTime2(tds_datetime2(dt)),
        SqlValue::Date(d) => ColumnData::Date(tds_date(*d)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn target(auth: AuthMethod, ssl_mode: &str) -> TargetConfig {
        TargetConfig {
            r#type: "mssql".into(),
            host: "localhost".into(),
            port: None,
            database: "shop".into(),
            user: "sa".into(),
            password: "secret".into(),
            schema: None,
            auth,
            ssl_mode: ssl_mode.into(),
        }
    }

    #[test]
    fn test_manager_rejects_bad_ssl_mode() {
        assert!(matches!(
            TiberiusConnectionManager::new(target(AuthMethod::SqlServer, "bogus")),
            Err(SyncError::Config(_))
        ));
    }

    #[cfg(not(feature = "kerberos"))]
    #[test]
    fn test_integrated_auth_needs_kerberos_feature() {
        assert!(matches!(
            TiberiusConnectionManager::new(target(AuthMethod::Integrated, "require")),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_build_config_uses_default_port() {
        let manager = TiberiusConnectionManager::new(target(AuthMethod::SqlServer, "disable")).unwrap();
        assert_eq!(manager.build_config().get_addr(), "localhost:1433");
    }

    #[test]
    fn test_connection_health_breaks_on_failed_transaction_end() {
        let mut health = ConnectionHealth::default();
        health.record::<(), String>("commit", &Ok(()));
        assert!(!health.is_broken());

        health.record::<(), _>("rollback", &Err("connection reset"));
        assert!(health.is_broken());
        assert_eq!(health.reason(), Some("rollback failed: connection reset"));

        // first failure wins
        health.record::<(), _>("commit", &Err("later"));
        assert_eq!(health.reason(), Some("rollback failed: connection reset"));
    }

    #[test]
    fn test_decimal_rescaled_to_column_scale() {
        let data = sql_value_to_column_data(&SqlValue::Decimal(Decimal::new(499, 2)));
        match data {
            ColumnData::Numeric(Some(n)) => {
                assert_eq!(n.scale(), 4);
                assert_eq!(n.value(), 49_900);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_typed_nulls() {
        assert!(matches!(
            sql_value_to_column_data(&SqlValue::Null(SqlNullType::Date)),
            ColumnData::Date(None)
        ));
        assert!(matches!(
            sql_value_to_column_data(&SqlValue::Null(SqlNullType::I64)),
            ColumnData::I64(None)
        ));
    }

    #[test]
    fn test_datetime_encoding() {
        let dt = NaiveDate::from_ymd_opt(1900, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 1)
            .unwrap();
        match sql_value_to_column_data(&SqlValue::DateTime(dt)) {
            ColumnData::DateTime2(Some(v)) => {
                assert_eq!(v.time().increments(), 10_000_000);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
