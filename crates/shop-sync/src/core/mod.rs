//! Core abstractions of the sync engine.
//!
//! - [`schema`]: table and column definitions, logical types
//! - [`policy`]: per-table merge policies
//! - [`catalog`]: the registry pairing each table with its policy
//! - [`value`]: raw records, staged values and normalized rows
//! - [`traits`]: the dialect strategy and merge target seams

pub mod catalog;
pub mod identifier;
pub mod policy;
pub mod schema;
pub mod tables;
pub mod traits;
pub mod value;

pub use catalog::{Catalog, TableEntry};
pub use policy::MergePolicy;
pub use schema::{ColumnDef, LogicalType, TableId, TableSchema};
pub use traits::{Dialect, MergeCounts, MergeFamily, MergeRequest, MergeTarget};
pub use value::{Batch, NormalizedRow, Page, RawRecord, SqlNullType, SqlValue};
