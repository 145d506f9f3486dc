//! # shop-sync
//!
//! Schema-driven normalization and transactional upsert engine for
//! paginated commerce API data.
//!
//! Batches of loosely-typed JSON records are coerced to the shape of their
//! target table and merged into SQL Server, MySQL or PostgreSQL through a
//! staging table, so repeated runs over overlapping windows converge to the
//! same rows:
//!
//! - **Schema registry** of target tables and per-table merge policies
//! - **Normalizer** with null-fill, type coercion and timezone handling
//! - **Dialect SQL generation** (`MERGE` or insert-with-conflict)
//! - **Upsert executor** running one transaction per table per batch
//! - **Calendar dimension** builder for a date table
//!
//! ## Example
//!
//! ```rust,no_run
//! use shop_sync::{Config, JsonLinesSource, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> shop_sync::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     orchestrator.ensure_tables().await?;
//!     let pages = JsonLinesSource::open("pages.jsonl").await?.pages();
//!     let report = orchestrator.run(pages, &CancellationToken::new()).await?;
//!     println!("{} pages, {} issues", report.pages, report.issues.len());
//!     Ok(())
//! }
//! ```

pub mod calendar;
pub mod config;
pub mod core;
pub mod dialect;
pub mod drivers;
pub mod error;
pub mod executor;
pub mod normalize;
pub mod orchestrator;

// Re-exports for convenient access
pub use calendar::{build_calendar, build_calendar_rows, CalendarDay};
pub use config::{CalendarConfig, Config, SyncConfig, TargetConfig};
pub use self::core::{
    Batch, Catalog, ColumnDef, LogicalType, MergePolicy, MergeTarget, NormalizedRow, Page,
    RawRecord, SqlValue, TableId, TableSchema,
};
pub use dialect::{build_merge_statement, MergePlan, MergePlanner};
pub use drivers::{connect_target, DialectImpl};
pub use error::{CoercionError, Result, SyncError};
pub use executor::{MergeResult, UpsertExecutor};
pub use normalize::{normalize, NormalizeOutcome, Normalizer};
pub use orchestrator::{
    preview, HealthCheckResult, Issue, JsonLinesSource, Orchestrator, RunAborted, SyncReport,
    TablePreview,
};
