//! In-memory merge target for tests.
//!
//! Models the merge semantics every real writer implements: match by merge
//! key, insert unmatched rows, update matched rows only under
//! `update_on_match` and only when a probe column differs (or, without
//! probes, when any value differs). Each `apply_merge` works on a snapshot
//! that is swapped in only on success, so an injected failure leaves the
//! table exactly as it was.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::{
    MergeCounts, MergeRequest, MergeTarget, SqlValue, TableId, TableSchema,
};
use crate::drivers::DialectImpl;
use crate::error::{Result, SyncError};

type Key = Vec<SqlValue<'static>>;
type Row = Vec<SqlValue<'static>>;

pub(crate) struct MemoryTarget {
    dialect: DialectImpl,
    tables: Mutex<HashMap<TableId, HashMap<Key, Row>>>,
    created: Mutex<HashSet<TableId>>,
    fail_load: Mutex<HashSet<TableId>>,
    deadlocks: Mutex<HashMap<TableId, u32>>,
    connection_lost: Mutex<bool>,
    merges: AtomicU32,
}

impl MemoryTarget {
    pub(crate) fn new(db_type: &str) -> Self {
        Self {
            dialect: DialectImpl::from_db_type(db_type).unwrap(),
            tables: Mutex::new(HashMap::new()),
            created: Mutex::new(HashSet::new()),
            fail_load: Mutex::new(HashSet::new()),
            deadlocks: Mutex::new(HashMap::new()),
            connection_lost: Mutex::new(false),
            merges: AtomicU32::new(0),
        }
    }

    /// Fail every staging load for `table`.
    pub(crate) fn fail_load(&self, table: TableId) {
        self.fail_load.lock().unwrap().insert(table);
    }

    /// Report a deadlock on the next `count` merges of `table`.
    pub(crate) fn inject_deadlocks(&self, table: TableId, count: u32) {
        self.deadlocks.lock().unwrap().insert(table, count);
    }

    pub(crate) fn lose_connection(&self) {
        *self.connection_lost.lock().unwrap() = true;
    }

    /// Number of `apply_merge` calls, including failed ones.
    pub(crate) fn merge_calls(&self) -> u32 {
        self.merges.load(Ordering::SeqCst)
    }

    pub(crate) fn created(&self, table: TableId) -> bool {
        self.created.lock().unwrap().contains(&table)
    }

    pub(crate) fn len(&self, table: TableId) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(&table)
            .map_or(0, HashMap::len)
    }

    /// Stored row for a merge key.
    pub(crate) fn row(&self, table: TableId, key: &[SqlValue<'_>]) -> Option<Row> {
        let key: Key = key.iter().cloned().map(SqlValue::into_owned).collect();
        self.tables
            .lock()
            .unwrap()
            .get(&table)
            .and_then(|t| t.get(&key).cloned())
    }

    /// Full table content, for comparing runs.
    pub(crate) fn snapshot(&self, table: TableId) -> HashMap<Key, Row> {
        self.tables
            .lock()
            .unwrap()
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MergeTarget for MemoryTarget {
    fn dialect(&self) -> DialectImpl {
        self.dialect
    }

    fn namespace(&self) -> &str {
        "memory"
    }

    async fn ensure_table(&self, schema: &TableSchema) -> Result<()> {
        self.created.lock().unwrap().insert(schema.id);
        Ok(())
    }

    async fn apply_merge(&self, request: MergeRequest<'_>) -> Result<MergeCounts> {
        self.merges.fetch_add(1, Ordering::SeqCst);
        let id = request.schema.id;
        let table = request.schema.name();

        if *self.connection_lost.lock().unwrap() {
            return Err(SyncError::connection("connection reset", "memory target"));
        }
        if let Some(left) = self.deadlocks.lock().unwrap().get_mut(&id) {
            if *left > 0 {
                *left -= 1;
                return Err(SyncError::transient_merge(table, "deadlock victim"));
            }
        }

        let mut snapshot = self.snapshot(id);
        if self.fail_load.lock().unwrap().contains(&id) {
            return Err(SyncError::merge(table, "bulk load failed"));
        }

        let key_positions = request.schema.positions(&request.policy.merge_columns)?;
        let probe_positions = request
            .schema
            .positions(&request.policy.change_probe_columns)?;

        let mut counts = MergeCounts::default();
        for row in request.rows {
            let key: Key = row
                .project(&key_positions)
                .into_iter()
                .map(SqlValue::into_owned)
                .collect();
            let staged: Row = row.values().iter().cloned().map(SqlValue::into_owned).collect();

            match snapshot.get_mut(&key) {
                None => {
                    snapshot.insert(key, staged);
                    counts.inserted += 1;
                }
                Some(existing) if request.policy.update_on_match => {
                    let changed = if probe_positions.is_empty() {
                        *existing != staged
                    } else {
                        probe_positions.iter().any(|&i| existing[i] != staged[i])
                    };
                    if changed {
                        *existing = staged;
                        counts.updated += 1;
                    }
                }
                Some(_) => {}
            }
        }

        self.tables.lock().unwrap().insert(id, snapshot);
        Ok(counts)
    }

    async fn row_count(&self, schema: &TableSchema) -> Result<u64> {
        Ok(self.len(schema.id) as u64)
    }

    async fn ping(&self) -> Result<()> {
        if *self.connection_lost.lock().unwrap() {
            return Err(SyncError::connection("connection reset", "memory target"));
        }
        Ok(())
    }

    async fn close(&self) {}
}
