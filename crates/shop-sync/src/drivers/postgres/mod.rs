//! PostgreSQL driver.
//!
//! - [`PostgresDialect`]: `INSERT ... ON CONFLICT` SQL generation
//! - [`PostgresWriter`]: merge target over a deadpool-postgres pool

mod dialect;
mod writer;

pub use dialect::PostgresDialect;
pub use writer::PostgresWriter;
