//! Upsert executor: one merge transaction per table per batch.
//!
//! The executor resolves the table's schema and policy, collapses rows that
//! repeat a merge key, fetches the cached [`MergePlan`](crate::dialect::MergePlan)
//! and hands everything to the [`MergeTarget`], which runs the transaction.
//! Deadlocks and lock timeouts retry the whole transaction with a linear
//! backoff; other merge failures are recorded in the [`MergeResult`] so the
//! caller can move on to the next table.

#[cfg(test)]
pub(crate) mod memory;

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::core::{Catalog, MergeRequest, MergeTarget, NormalizedRow, TableId};
use crate::dialect::MergePlanner;
use crate::drivers::common::merge_retry_delay;
use crate::error::Result;

/// Default transient-failure retries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay between retries, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 200;

/// Outcome of merging one batch into one table.
#[derive(Debug, Clone, Serialize)]
pub struct MergeResult {
    pub table: TableId,
    /// Rows handed to the target after key deduplication.
    pub staged: usize,
    /// Rows dropped because a later row in the batch had the same key.
    pub duplicates: usize,
    pub inserted: u64,
    pub updated: u64,
    /// Transactions attempted; 0 for an empty batch.
    pub attempts: u32,
    /// Whether the merge transaction committed.
    pub committed: bool,
    /// One message per failed attempt.
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl MergeResult {
    fn empty(table: TableId) -> Self {
        Self {
            table,
            staged: 0,
            duplicates: 0,
            inserted: 0,
            updated: 0,
            attempts: 0,
            committed: false,
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Committed, or nothing to do.
    pub fn is_success(&self) -> bool {
        self.committed || (self.attempts == 0 && self.errors.is_empty())
    }

    /// Staged rows that matched an existing row and were left as they were.
    pub fn unchanged(&self) -> u64 {
        (self.staged as u64).saturating_sub(self.inserted + self.updated)
    }
}

/// Runs merges against one target.
pub struct UpsertExecutor {
    target: Arc<dyn MergeTarget>,
    catalog: Arc<Catalog>,
    planner: MergePlanner,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl UpsertExecutor {
    pub fn new(target: Arc<dyn MergeTarget>, catalog: Arc<Catalog>) -> Self {
        let planner = MergePlanner::new(target.dialect(), target.namespace());
        Self {
            target,
            catalog,
            planner,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }

    /// Override the transient-failure retry policy.
    pub fn with_retry(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn planner(&self) -> &MergePlanner {
        &self.planner
    }

    pub fn target(&self) -> &Arc<dyn MergeTarget> {
        &self.target
    }

    /// Create the table in the target if it does not exist.
    pub async fn ensure_table(&self, table: TableId) -> Result<()> {
        let entry = self.catalog.require(table)?;
        self.target.ensure_table(&entry.schema).await
    }

    /// Merge `rows` into `table` in one transaction.
    ///
    /// An empty slice returns immediately without touching the target.
    /// Merge failures are recorded in the result; only errors that make the
    /// whole run pointless (lost connection, unknown table, invalid plan) are
    /// returned as `Err`.
    pub async fn merge(&self, table: TableId, rows: &[NormalizedRow<'_>]) -> Result<MergeResult> {
        let mut result = MergeResult::empty(table);
        if rows.is_empty() {
            return Ok(result);
        }

        let started = Instant::now();
        let entry = self.catalog.require(table)?;
        let schema = entry.schema.as_ref();
        let policy = entry.policy.as_ref();
        let plan = self.planner.plan(schema, policy)?;

        let key_positions = schema.positions(&policy.merge_columns)?;
        let staged = dedup_by_key(rows, &key_positions);
        result.staged = staged.len();
        result.duplicates = rows.len() - staged.len();
        if result.duplicates > 0 {
            debug!(
                "{}: collapsed {} rows with repeated merge keys",
                table, result.duplicates
            );
        }

        let request = MergeRequest {
            schema,
            policy,
            plan: plan.as_ref(),
            rows: staged.as_ref(),
        };

        loop {
            result.attempts += 1;
            match self.target.apply_merge(request).await {
                Ok(counts) => {
                    result.inserted = counts.inserted;
                    result.updated = counts.updated;
                    result.committed = true;
                    break;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if e.is_transient() && result.attempts <= self.max_retries => {
                    let delay = merge_retry_delay(self.retry_delay_ms, result.attempts);
                    warn!(
                        "{}: transient merge failure (attempt {}/{}), retrying in {:?}: {}",
                        table,
                        result.attempts,
                        self.max_retries + 1,
                        delay,
                        e
                    );
                    result.errors.push(e.to_string());
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("{}: merge rolled back: {}", table, e);
                    result.errors.push(e.to_string());
                    break;
                }
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        if result.committed {
            debug!(
                "{}: {} staged, {} inserted, {} updated in {}ms",
                table, result.staged, result.inserted, result.updated, result.duration_ms
            );
        }
        Ok(result)
    }
}

/// Collapse rows sharing a merge key, keeping the last occurrence at the
/// position of the first. Borrows when there is nothing to collapse.
fn dedup_by_key<'s, 'r>(
    rows: &'s [NormalizedRow<'r>],
    key_positions: &[usize],
) -> Cow<'s, [NormalizedRow<'r>]> {
    let mut seen: HashMap<_, usize> = HashMap::with_capacity(rows.len());
    let mut duplicate = false;
    for row in rows {
        if seen.insert(row.project(key_positions), 0).is_some() {
            duplicate = true;
            break;
        }
    }
    if !duplicate {
        return Cow::Borrowed(rows);
    }

    seen.clear();
    let mut out: Vec<NormalizedRow<'r>> = Vec::with_capacity(rows.len());
    for row in rows {
        match seen.get(&row.project(key_positions)) {
            Some(&index) => out[index] = row.clone(),
            None => {
                seen.insert(row.project(key_positions), out.len());
                out.push(row.clone());
            }
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryTarget;
    use super::*;
    use crate::core::{RawRecord, SqlValue, TableSchema};
    use crate::error::SyncError;
    use crate::normalize::normalize;
    use serde_json::{json, Value};

    fn records(v: Value) -> Vec<RawRecord> {
        v.as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().unwrap().clone())
            .collect()
    }

    fn setup() -> (Arc<MemoryTarget>, UpsertExecutor) {
        let target = Arc::new(MemoryTarget::new("postgres"));
        let executor = UpsertExecutor::new(target.clone(), Arc::new(Catalog::builtin().unwrap()))
            .with_retry(3, 1);
        (target, executor)
    }

    fn schema(executor: &UpsertExecutor, table: TableId) -> Arc<TableSchema> {
        executor.catalog().require(table).unwrap().schema.clone()
    }

    fn value(schema: &TableSchema, row: &[SqlValue<'_>], column: &str) -> SqlValue<'static> {
        row[schema.column_index(column).unwrap()].clone().into_owned()
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let (target, executor) = setup();
        let result = executor.merge(TableId::Orders, &[]).await.unwrap();
        assert_eq!(result.attempts, 0);
        assert!(result.is_success());
        assert_eq!(target.merge_calls(), 0);
    }

    #[tokio::test]
    async fn test_merge_twice_is_idempotent() {
        let (target, executor) = setup();
        let schema = schema(&executor, TableId::Orders);
        let raw = records(json!([
            {"id": 1, "updated_at": "2024-01-01T00:00:00Z", "email": "a@x.io"},
            {"id": 2, "updated_at": "2024-01-01T00:00:00Z", "email": "b@x.io"}
        ]));
        let rows = normalize(&schema, &raw).rows;

        let first = executor.merge(TableId::Orders, &rows).await.unwrap();
        assert_eq!((first.inserted, first.updated), (2, 0));
        let after_first = target.snapshot(TableId::Orders);

        let second = executor.merge(TableId::Orders, &rows).await.unwrap();
        assert!(second.committed);
        assert_eq!((second.inserted, second.updated), (0, 0));
        assert_eq!(second.unchanged(), 2);
        assert_eq!(target.snapshot(TableId::Orders), after_first);
    }

    #[tokio::test]
    async fn test_orders_end_to_end() {
        let (target, executor) = setup();
        let schema = schema(&executor, TableId::Orders);

        let page1 = records(json!([
            {"id": 1, "updated_at": "2024-01-01T00:00:00Z", "email": "one@x.io"},
            {"id": 2, "updated_at": "2024-01-01T00:00:00Z", "email": "two@x.io"},
            {"id": 3, "updated_at": "2024-01-01T00:00:00Z", "email": "three@x.io"}
        ]));
        let page2 = records(json!([
            {"id": 2, "updated_at": "2024-02-01T00:00:00Z", "email": "two-new@x.io"},
            {"id": 4, "updated_at": "2024-02-01T00:00:00Z", "email": "four@x.io"}
        ]));

        let r1 = executor
            .merge(TableId::Orders, &normalize(&schema, &page1).rows)
            .await
            .unwrap();
        let r2 = executor
            .merge(TableId::Orders, &normalize(&schema, &page2).rows)
            .await
            .unwrap();

        assert_eq!((r1.inserted, r1.updated), (3, 0));
        assert_eq!((r2.inserted, r2.updated), (1, 1));
        assert_eq!(target.len(TableId::Orders), 4);

        let row2 = target.row(TableId::Orders, &[SqlValue::I64(2)]).unwrap();
        assert_eq!(
            value(&schema, &row2, "email"),
            SqlValue::text_owned("two-new@x.io".into())
        );
    }

    #[tokio::test]
    async fn test_probe_unchanged_skips_update() {
        let (target, executor) = setup();
        let schema = schema(&executor, TableId::Orders);
        let first = records(json!([{"id": 7, "updated_at": "2024-01-01T00:00:00Z", "email": "old"}]));
        let same_probe = records(json!([{"id": 7, "updated_at": "2024-01-01T00:00:00Z", "email": "new"}]));

        executor
            .merge(TableId::Orders, &normalize(&schema, &first).rows)
            .await
            .unwrap();
        let result = executor
            .merge(TableId::Orders, &normalize(&schema, &same_probe).rows)
            .await
            .unwrap();

        assert_eq!(result.updated, 0);
        let row = target.row(TableId::Orders, &[SqlValue::I64(7)]).unwrap();
        assert_eq!(value(&schema, &row, "email"), SqlValue::text_owned("old".into()));
    }

    #[tokio::test]
    async fn test_insert_only_leaves_match_untouched() {
        let (target, executor) = setup();
        let schema = schema(&executor, TableId::LineItems);
        let first = records(json!([{"id": 10, "quantity": 1}]));
        let second = records(json!([{"id": 10, "quantity": 2}]));

        executor
            .merge(TableId::LineItems, &normalize(&schema, &first).rows)
            .await
            .unwrap();
        let result = executor
            .merge(TableId::LineItems, &normalize(&schema, &second).rows)
            .await
            .unwrap();

        assert_eq!((result.inserted, result.updated), (0, 0));
        let row = target.row(TableId::LineItems, &[SqlValue::I64(10)]).unwrap();
        assert_eq!(value(&schema, &row, "quantity"), SqlValue::I32(1));
    }

    #[tokio::test]
    async fn test_failed_load_rolls_back_customers() {
        let (target, executor) = setup();
        let schema = schema(&executor, TableId::Customers);
        let seed = records(json!([{"id": 1}, {"id": 2}]));
        executor
            .merge(TableId::Customers, &normalize(&schema, &seed).rows)
            .await
            .unwrap();
        let before = target.snapshot(TableId::Customers);

        target.fail_load(TableId::Customers);
        let more = records(json!([{"id": 2, "orders_count": 5}, {"id": 3}]));
        let result = executor
            .merge(TableId::Customers, &normalize(&schema, &more).rows)
            .await
            .unwrap();

        assert!(!result.committed);
        assert!(!result.is_success());
        assert_eq!(result.attempts, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(target.len(TableId::Customers), 2);
        assert_eq!(target.snapshot(TableId::Customers), before);
    }

    #[tokio::test]
    async fn test_deadlock_retried_then_succeeds() {
        let (target, executor) = setup();
        let schema = schema(&executor, TableId::Products);
        target.inject_deadlocks(TableId::Products, 2);

        let raw = records(json!([{"id": 1}]));
        let result = executor
            .merge(TableId::Products, &normalize(&schema, &raw).rows)
            .await
            .unwrap();

        assert!(result.committed);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(target.len(TableId::Products), 1);
    }

    #[tokio::test]
    async fn test_deadlock_retries_exhausted() {
        let (target, executor) = setup();
        let schema = schema(&executor, TableId::Products);
        target.inject_deadlocks(TableId::Products, 10);

        let raw = records(json!([{"id": 1}]));
        let result = executor
            .merge(TableId::Products, &normalize(&schema, &raw).rows)
            .await
            .unwrap();

        assert!(!result.committed);
        assert_eq!(result.attempts, 4);
        assert_eq!(target.merge_calls(), 4);
    }

    #[tokio::test]
    async fn test_connection_loss_is_fatal() {
        let (target, executor) = setup();
        let schema = schema(&executor, TableId::Orders);
        target.lose_connection();

        let raw = records(json!([{"id": 1}]));
        let err = executor
            .merge(TableId::Orders, &normalize(&schema, &raw).rows)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_repeated_key_last_row_wins() {
        let (target, executor) = setup();
        let schema = schema(&executor, TableId::Orders);
        let raw = records(json!([
            {"id": 5, "email": "first", "updated_at": "2024-01-01T00:00:00Z"},
            {"id": 6, "email": "other"},
            {"id": 5, "email": "last", "updated_at": "2024-01-02T00:00:00Z"}
        ]));

        let result = executor
            .merge(TableId::Orders, &normalize(&schema, &raw).rows)
            .await
            .unwrap();

        assert_eq!(result.staged, 2);
        assert_eq!(result.duplicates, 1);
        assert_eq!(result.inserted, 2);
        let row = target.row(TableId::Orders, &[SqlValue::I64(5)]).unwrap();
        assert_eq!(value(&schema, &row, "email"), SqlValue::text_owned("last".into()));
    }

    #[tokio::test]
    async fn test_plan_cached_across_batches() {
        let (_target, executor) = setup();
        let schema = schema(&executor, TableId::Refunds);
        let raw = records(json!([{"id": 1}]));
        let rows = normalize(&schema, &raw).rows;
        executor.merge(TableId::Refunds, &rows).await.unwrap();
        executor.merge(TableId::Refunds, &rows).await.unwrap();
        assert_eq!(executor.planner().cached(), 1);
    }

    #[tokio::test]
    async fn test_ensure_table() {
        let (target, executor) = setup();
        executor.ensure_table(TableId::DateDimension).await.unwrap();
        assert!(target.created(TableId::DateDimension));
    }
}
