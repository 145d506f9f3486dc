//! Value types flowing from raw API records to staged rows.

use std::borrow::Cow;
use std::hash::{Hash, Hasher};

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::Deserialize;

/// One loosely-typed record as delivered by the upstream API.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Type hint for NULL values so drivers can bind a correctly typed NULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlNullType {
    Bool,
    I32,
    I64,
    F64,
    String,
    Decimal,
    DateTime,
    Date,
}

/// SQL value for staged rows.
///
/// Text uses `Cow` so string fields of a raw record can be staged without
/// copying; call `.into_owned()` when the row must outlive the record.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue<'a> {
    /// NULL with type hint.
    Null(SqlNullType),
    Bool(bool),
    I32(i32),
    I64(i64),
    /// Always finite; the normalizer rejects NaN and infinities.
    F64(f64),
    Text(Cow<'a, str>),
    Decimal(Decimal),
    /// Timestamp without offset, already in the reference timezone.
    DateTime(NaiveDateTime),
    Date(NaiveDate),
}

impl<'a> SqlValue<'a> {
    /// Convert to a fully owned value with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> SqlValue<'static> {
        match self {
            SqlValue::Null(t) => SqlValue::Null(t),
            SqlValue::Bool(v) => SqlValue::Bool(v),
            SqlValue::I32(v) => SqlValue::I32(v),
            SqlValue::I64(v) => SqlValue::I64(v),
            SqlValue::F64(v) => SqlValue::F64(v),
            SqlValue::Text(v) => SqlValue::Text(Cow::Owned(v.into_owned())),
            SqlValue::Decimal(v) => SqlValue::Decimal(v),
            SqlValue::DateTime(v) => SqlValue::DateTime(v),
            SqlValue::Date(v) => SqlValue::Date(v),
        }
    }

    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Get the SqlNullType for this value.
    #[must_use]
    pub fn null_type(&self) -> SqlNullType {
        match self {
            SqlValue::Null(t) => *t,
            SqlValue::Bool(_) => SqlNullType::Bool,
            SqlValue::I32(_) => SqlNullType::I32,
            SqlValue::I64(_) => SqlNullType::I64,
            SqlValue::F64(_) => SqlNullType::F64,
            SqlValue::Text(_) => SqlNullType::String,
            SqlValue::Decimal(_) => SqlNullType::Decimal,
            SqlValue::DateTime(_) => SqlNullType::DateTime,
            SqlValue::Date(_) => SqlNullType::Date,
        }
    }

    /// Create a text value from a borrowed string slice.
    #[must_use]
    pub fn text_borrowed(s: &'a str) -> Self {
        SqlValue::Text(Cow::Borrowed(s))
    }

    /// Create a text value from an owned String.
    #[must_use]
    pub fn text_owned(s: String) -> SqlValue<'static> {
        SqlValue::Text(Cow::Owned(s))
    }
}

// Merge keys are hashed to collapse duplicate keys within a batch.
impl Eq for SqlValue<'_> {}

impl Hash for SqlValue<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            SqlValue::Null(t) => t.hash(state),
            SqlValue::Bool(v) => v.hash(state),
            SqlValue::I32(v) => v.hash(state),
            SqlValue::I64(v) => v.hash(state),
            SqlValue::F64(v) => v.to_bits().hash(state),
            SqlValue::Text(v) => v.hash(state),
            SqlValue::Decimal(v) => v.normalize().hash(state),
            SqlValue::DateTime(v) => v.hash(state),
            SqlValue::Date(v) => v.hash(state),
        }
    }
}

impl From<bool> for SqlValue<'static> {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue<'static> {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue<'static> {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<String> for SqlValue<'static> {
    fn from(v: String) -> Self {
        SqlValue::Text(Cow::Owned(v))
    }
}

impl<'a> From<&'a str> for SqlValue<'a> {
    fn from(v: &'a str) -> Self {
        SqlValue::Text(Cow::Borrowed(v))
    }
}

impl From<NaiveDateTime> for SqlValue<'static> {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl From<NaiveDate> for SqlValue<'static> {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

/// A row holding exactly the columns of its table schema, in schema order.
///
/// Only the normalizer and the calendar builder construct these, which is
/// what keeps the column set equal to the schema's.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow<'a> {
    values: Vec<SqlValue<'a>>,
}

impl<'a> NormalizedRow<'a> {
    pub(crate) fn from_values(values: Vec<SqlValue<'a>>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn values(&self) -> &[SqlValue<'a>] {
        &self.values
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&SqlValue<'a>> {
        self.values.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values at the given column positions, used as a merge-key tuple.
    #[must_use]
    pub fn project(&self, positions: &[usize]) -> Vec<SqlValue<'a>> {
        positions
            .iter()
            .filter_map(|&i| self.values.get(i).cloned())
            .collect()
    }

    #[must_use]
    pub fn into_owned(self) -> NormalizedRow<'static> {
        NormalizedRow {
            values: self.values.into_iter().map(SqlValue::into_owned).collect(),
        }
    }
}

/// One page of raw records for one target table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Batch {
    /// Table name as the producer spells it.
    pub table: String,
    pub rows: Vec<RawRecord>,
}

impl Batch {
    pub fn new(table: impl Into<String>, rows: Vec<RawRecord>) -> Self {
        Self {
            table: table.into(),
            rows,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Everything the producer delivered for one page of upstream data.
pub type Page = Vec<Batch>;
