//! Coerce loosely-typed API records into rows shaped exactly like their
//! table schema.
//!
//! For every schema column, in schema order, the normalizer looks the column
//! up in the (flattened) raw record and coerces it:
//!
//! | logical type | absent / blank | unparsable |
//! |---|---|---|
//! | numeric, bool | `0` / `false`, or NULL if nullable | row rejected |
//! | string | `""` (never NULL) | n/a |
//! | datetime, date | NULL if nullable, else 1900-01-01 | same as absent |
//!
//! Raw fields with no matching column are dropped. Rejected rows are
//! reported as [`CoercionError`]s and the rest of the batch proceeds.

mod coerce;
pub mod datetime;

use std::borrow::Cow;
use std::collections::HashMap;

use chrono_tz::Tz;
use serde_json::Value;
use tracing::debug;

use crate::core::{NormalizedRow, RawRecord, TableSchema};
use crate::error::CoercionError;

/// Result of normalizing one batch.
#[derive(Debug, Default)]
pub struct NormalizeOutcome<'r> {
    pub rows: Vec<NormalizedRow<'r>>,
    /// One entry per offending value; a row may contribute several.
    pub errors: Vec<CoercionError>,
}

impl NormalizeOutcome<'_> {
    /// Number of distinct rows rejected.
    pub fn rejected_rows(&self) -> usize {
        let mut rows: Vec<usize> = self.errors.iter().map(|e| e.row).collect();
        rows.dedup();
        rows.len()
    }
}

/// Normalizer bound to a reference timezone.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    tz: Tz,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self { tz: chrono_tz::UTC }
    }
}

impl Normalizer {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn time_zone(&self) -> Tz {
        self.tz
    }

    /// Normalize `rows` against `schema`. Pure; text is borrowed from `rows`.
    pub fn normalize<'r>(&self, schema: &TableSchema, rows: &'r [RawRecord]) -> NormalizeOutcome<'r> {
        let mut outcome = NormalizeOutcome {
            rows: Vec::with_capacity(rows.len()),
            errors: Vec::new(),
        };

        for (index, record) in rows.iter().enumerate() {
            let fields = flatten(record);
            let mut values = Vec::with_capacity(schema.columns.len());
            let mut rejected = false;

            for column in &schema.columns {
                let raw = fields.get(column.name.as_str()).copied();
                match coerce::coerce(column, raw, self.tz) {
                    Ok(value) => values.push(value),
                    Err(_) => {
                        rejected = true;
                        outcome.errors.push(CoercionError::new(
                            index,
                            column.name.as_str(),
                            render(raw),
                            expected(column),
                        ));
                    }
                }
            }

            if !rejected {
                outcome.rows.push(NormalizedRow::from_values(values));
            }
        }

        if !outcome.errors.is_empty() {
            debug!(
                "{}: {} of {} rows rejected during normalization",
                schema.name(),
                outcome.rejected_rows(),
                rows.len()
            );
        }
        outcome
    }
}

/// Normalize with UTC as the reference timezone.
pub fn normalize<'r>(schema: &TableSchema, rows: &'r [RawRecord]) -> NormalizeOutcome<'r> {
    Normalizer::default().normalize(schema, rows)
}

/// Flatten nested objects with `_` separators.
///
/// `{"customer": {"id": 5}}` yields the key `customer_id`. Top-level keys
/// are borrowed; values are always borrowed from the record.
pub fn flatten(record: &RawRecord) -> HashMap<Cow<'_, str>, &Value> {
    let mut out = HashMap::with_capacity(record.len());
    flatten_into(None, record, &mut out);
    out
}

fn flatten_into<'r>(
    prefix: Option<&str>,
    map: &'r RawRecord,
    out: &mut HashMap<Cow<'r, str>, &'r Value>,
) {
    for (key, value) in map {
        let name: Cow<'r, str> = match prefix {
            None => Cow::Borrowed(key.as_str()),
            Some(p) => Cow::Owned(format!("{}_{}", p, key)),
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => {
                flatten_into(Some(name.as_ref()), inner, out)
            }
            _ => {
                // A literal top-level key wins over a flattened one.
                if prefix.is_none() || !out.contains_key(&name) {
                    out.insert(name, value);
                }
            }
        }
    }
}

fn render(raw: Option<&Value>) -> String {
    match raw {
        None => "<missing>".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

fn expected(column: &crate::core::ColumnDef) -> String {
    match column.max_length {
        Some(len) => format!("{}({})", column.logical_type, len),
        None => column.logical_type.to_string(),
    }
}
