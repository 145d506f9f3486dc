//! Sync orchestrator: the per-batch driver.
//!
//! Pages are consumed strictly in order. For each batch in a page the
//! orchestrator resolves the table, normalizes the raw records and merges
//! the surviving rows in one transaction. Unknown tables, rejected rows and
//! failed merges are recorded in the [`SyncReport`] and the run moves on;
//! only a lost connection (or another fatal error) stops it, and then the
//! report built so far travels with the error in [`RunAborted`].

mod source;

pub use source::{parse_page, JsonLinesSource};

use std::collections::BTreeMap;
use std::pin::pin;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::calendar;
use crate::config::Config;
use crate::core::{Batch, Catalog, Dialect, MergeTarget, Page, TableId, TableSchema};
use crate::dialect::{MergePlan, MergePlanner};
use crate::drivers::connect_target;
use crate::error::{Result, SyncError};
use crate::executor::{MergeResult, UpsertExecutor};
use crate::normalize::Normalizer;

/// Something that went wrong without stopping the run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    /// A page could not be read or parsed.
    Page { page: usize, message: String },
    /// A batch named a table the catalog does not know.
    UnknownTable { page: usize, table: String },
    /// A row was rejected by the normalizer.
    Coercion {
        page: usize,
        table: TableId,
        row: usize,
        column: String,
        value: String,
        expected: String,
    },
    /// A merge transaction rolled back.
    Merge {
        page: usize,
        table: TableId,
        attempts: u32,
        message: String,
    },
}

/// Running totals for one table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableTotals {
    pub batches: usize,
    pub received: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failed_merges: usize,
}

/// Result of a sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    /// Pages consumed, including ones that failed to parse.
    pub pages: usize,
    /// The run stopped early on request.
    pub cancelled: bool,
    pub tables: BTreeMap<TableId, TableTotals>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar: Option<MergeResult>,
    pub issues: Vec<Issue>,
    /// The error that stopped the run early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
}

impl SyncReport {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: now,
            completed_at: now,
            duration_seconds: 0.0,
            pages: 0,
            cancelled: false,
            tables: BTreeMap::new(),
            calendar: None,
            issues: Vec::new(),
            fatal: None,
        }
    }

    /// Rolled back batch merges plus a calendar seed that did not commit.
    pub fn failed_merges(&self) -> usize {
        let batches = self
            .issues
            .iter()
            .filter(|i| matches!(i, Issue::Merge { .. }))
            .count();
        let calendar = self.calendar.as_ref().filter(|c| !c.is_success());
        batches + usize::from(calendar.is_some())
    }

    fn finish(&mut self, started: Instant) {
        self.completed_at = Utc::now();
        self.duration_seconds = started.elapsed().as_secs_f64();
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A run stopped by a fatal error, with everything it did before stopping.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct RunAborted {
    pub error: SyncError,
    pub report: Box<SyncReport>,
}

impl From<RunAborted> for SyncError {
    fn from(aborted: RunAborted) -> Self {
        aborted.error
    }
}

/// Connection-level health information.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub dialect: String,
    pub namespace: String,
    pub connected: bool,
    pub latency_ms: u64,
}

/// Statements generated for one table, for inspection without a database.
#[derive(Debug, Clone, Serialize)]
pub struct TablePreview {
    pub create_table: String,
    #[serde(flatten)]
    pub plan: MergePlan,
}

/// Engine context for one target.
pub struct Orchestrator {
    config: Config,
    normalizer: Normalizer,
    executor: UpsertExecutor,
}

impl Orchestrator {
    /// Connect to the configured target.
    pub async fn new(config: Config) -> Result<Self> {
        let target = connect_target(&config).await?;
        Self::with_target(config, target)
    }

    /// Build on an already connected target.
    pub fn with_target(config: Config, target: Arc<dyn MergeTarget>) -> Result<Self> {
        let normalizer = Normalizer::new(config.sync.tz()?);
        let executor = UpsertExecutor::new(target, Arc::new(Catalog::builtin()?))
            .with_retry(config.sync.max_retries, config.sync.retry_delay_ms);
        Ok(Self {
            config,
            normalizer,
            executor,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn executor(&self) -> &UpsertExecutor {
        &self.executor
    }

    pub fn catalog(&self) -> &Catalog {
        self.executor.catalog()
    }

    /// Create every registered table that does not exist yet.
    pub async fn ensure_tables(&self) -> Result<()> {
        let ids: Vec<TableId> = self.catalog().entries().map(|e| e.schema.id).collect();
        for id in &ids {
            self.executor.ensure_table(*id).await?;
        }
        info!("Ensured {} target tables", ids.len());
        Ok(())
    }

    /// Build the configured calendar range and load it insert-only.
    pub async fn seed_calendar(&self) -> Result<MergeResult> {
        let cal = &self.config.calendar;
        let rows = calendar::build_calendar_rows(cal.start_date, cal.horizon_days)?;
        info!(
            "Seeding calendar: {} days from {}",
            rows.len(),
            cal.start_date
        );
        let result = self.executor.merge(TableId::DateDimension, &rows).await?;
        if result.committed {
            info!(
                "Calendar seeded: {} new days, {} already present",
                result.inserted,
                result.unchanged()
            );
        } else {
            error!("Calendar seeding failed: {}", result.errors.join("; "));
        }
        Ok(result)
    }

    /// Ping the target and time the round trip.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let target = self.executor.target();
        let started = Instant::now();
        target.ping().await?;
        Ok(HealthCheckResult {
            dialect: target.dialect().name().to_string(),
            namespace: target.namespace().to_string(),
            connected: true,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Current row count of a table.
    pub async fn row_count(&self, table: TableId) -> Result<u64> {
        let entry = self.catalog().require(table)?;
        self.executor.target().row_count(&entry.schema).await
    }

    /// Close the target's connections.
    pub async fn close(&self) {
        self.executor.target().close().await;
    }

    /// Consume `pages` until the stream ends or `cancel` fires.
    ///
    /// Cancellation is checked between pages; a page already being merged
    /// runs to commit or rollback first. A fatal error ends the run with
    /// [`RunAborted`], which still carries the partial report.
    pub async fn run<S>(
        &self,
        pages: S,
        cancel: &CancellationToken,
    ) -> std::result::Result<SyncReport, RunAborted>
    where
        S: Stream<Item = Result<Page>>,
    {
        let mut report = SyncReport::new();
        let started = Instant::now();
        info!("Starting sync run: {}", report.run_id);

        let outcome = self.consume(pages, cancel, &mut report).await;
        report.finish(started);

        if let Err(error) = outcome {
            error!(
                "Sync run {} aborted after {} pages: {}",
                report.run_id, report.pages, error
            );
            report.fatal = Some(error.to_string());
            return Err(RunAborted {
                error,
                report: Box::new(report),
            });
        }

        let inserted: u64 = report.tables.values().map(|t| t.inserted).sum();
        let updated: u64 = report.tables.values().map(|t| t.updated).sum();
        info!(
            "Sync run {} finished: {} pages, {} inserted, {} updated, {} issues in {:.1}s",
            report.run_id,
            report.pages,
            inserted,
            updated,
            report.issues.len(),
            report.duration_seconds
        );
        Ok(report)
    }

    async fn consume<S>(
        &self,
        pages: S,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<()>
    where
        S: Stream<Item = Result<Page>>,
    {
        let mut pages = pin!(pages);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Cancellation requested, stopping after {} pages", report.pages);
                    report.cancelled = true;
                    break;
                }
                next = pages.next() => next,
            };
            let Some(page) = next else { break };

            let index = report.pages;
            report.pages += 1;
            match page {
                Ok(batches) => self.process_page(index, batches, report).await?,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("Page {}: {}", index, e);
                    report.issues.push(Issue::Page {
                        page: index,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn process_page(&self, page: usize, batches: Page, report: &mut SyncReport) -> Result<()> {
        let mut rows = 0;
        for batch in &batches {
            rows += batch.len();
            self.process_batch(page, batch, report).await?;
        }
        info!("Page {}: {} tables, {} records", page, batches.len(), rows);
        Ok(())
    }

    async fn process_batch(&self, page: usize, batch: &Batch, report: &mut SyncReport) -> Result<()> {
        let entry = match self.catalog().resolve(&batch.table) {
            Ok(entry) => entry,
            Err(_) => {
                warn!("Page {}: skipping unknown table '{}'", page, batch.table);
                report.issues.push(Issue::UnknownTable {
                    page,
                    table: batch.table.clone(),
                });
                return Ok(());
            }
        };
        let table = entry.schema.id;

        let outcome = self.normalizer.normalize(&entry.schema, &batch.rows);
        let totals = report.tables.entry(table).or_default();
        totals.batches += 1;
        totals.received += batch.len();
        totals.rejected += outcome.rejected_rows();
        for e in &outcome.errors {
            report.issues.push(Issue::Coercion {
                page,
                table,
                row: e.row,
                column: e.column.clone(),
                value: e.value.clone(),
                expected: e.expected.clone(),
            });
        }

        let result = match self.executor.merge(table, &outcome.rows).await {
            Ok(result) => result,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!("{}: {}", table, e);
                record_failure(report, page, table, 0, e.to_string());
                return Ok(());
            }
        };

        if !result.is_success() {
            let message = result.errors.last().cloned().unwrap_or_default();
            record_failure(report, page, table, result.attempts, message);
            return Ok(());
        }

        let totals = report.tables.entry(table).or_default();
        totals.duplicates += result.duplicates;
        totals.inserted += result.inserted;
        totals.updated += result.updated;
        totals.unchanged += result.unchanged();
        debug!(
            "Page {}: {} merged ({} inserted, {} updated)",
            page, table, result.inserted, result.updated
        );
        Ok(())
    }
}

fn record_failure(report: &mut SyncReport, page: usize, table: TableId, attempts: u32, message: String) {
    report.tables.entry(table).or_default().failed_merges += 1;
    report.issues.push(Issue::Merge {
        page,
        table,
        attempts,
        message,
    });
}

/// Generate DDL and merge statements for the configured dialect without
/// connecting.
pub fn preview(config: &Config, table: Option<TableId>) -> Result<Vec<TablePreview>> {
    let dialect = config.target.dialect()?;
    let namespace = config.target.namespace();
    let catalog = Catalog::builtin()?;
    let planner = MergePlanner::new(dialect, namespace.clone());

    let entries: Vec<_> = match table {
        Some(id) => vec![catalog.require(id)?.clone()],
        None => catalog.entries().cloned().collect(),
    };

    entries
        .iter()
        .map(|entry| {
            let schema: &TableSchema = &entry.schema;
            Ok(TablePreview {
                create_table: dialect.build_create_table(schema, &namespace)?,
                plan: planner.plan(schema, &entry.policy)?.as_ref().clone(),
            })
        })
        .collect()
}
