//! Per-table merge policy.

use serde::Serialize;

use super::schema::TableSchema;
use crate::error::{Result, SyncError};

/// How staged rows reconcile with existing target rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergePolicy {
    /// Conflict key; identifies "the same logical row".
    pub merge_columns: Vec<String>,
    /// When non-empty, a matched row is updated only if one of these differs.
    pub change_probe_columns: Vec<String>,
    /// `false` leaves matched rows untouched (insert-only).
    pub update_on_match: bool,
}

impl MergePolicy {
    /// Insert new rows and update every matched row.
    pub fn upsert(merge_columns: &[&str]) -> Self {
        Self {
            merge_columns: to_owned(merge_columns),
            change_probe_columns: Vec::new(),
            update_on_match: true,
        }
    }

    /// Insert new rows, never touch matched rows.
    pub fn insert_only(merge_columns: &[&str]) -> Self {
        Self {
            merge_columns: to_owned(merge_columns),
            change_probe_columns: Vec::new(),
            update_on_match: false,
        }
    }

    /// Restrict updates to matched rows whose probe columns changed.
    #[must_use]
    pub fn with_probe(mut self, columns: &[&str]) -> Self {
        self.change_probe_columns = to_owned(columns);
        self
    }

    /// Check the policy against the table it governs.
    pub fn validate(&self, schema: &TableSchema) -> Result<()> {
        if self.merge_columns.is_empty() {
            return Err(SyncError::invalid_schema(
                schema.name(),
                "merge policy has no merge columns",
            ));
        }
        schema.positions(&self.merge_columns)?;
        schema.positions(&self.change_probe_columns)?;
        if self
            .change_probe_columns
            .iter()
            .any(|p| self.merge_columns.contains(p))
        {
            return Err(SyncError::invalid_schema(
                schema.name(),
                "a merge column cannot also be a change probe",
            ));
        }
        Ok(())
    }

    /// Whether the merge key is exactly the table's primary key, in any order.
    ///
    /// Conflict-clause dialects resolve conflicts on a unique index, so they
    /// need this to hold.
    pub fn key_matches_primary_key(&self, schema: &TableSchema) -> bool {
        self.merge_columns.len() == schema.primary_key.len()
            && self
                .merge_columns
                .iter()
                .all(|c| schema.primary_key.contains(c))
    }
}

fn to_owned(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}
