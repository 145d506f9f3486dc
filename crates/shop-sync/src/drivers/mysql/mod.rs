//! MySQL/MariaDB driver.
//!
//! - [`MysqlDialect`]: `INSERT ... ON DUPLICATE KEY UPDATE` SQL generation
//! - [`MysqlWriter`]: merge target over a mysql_async pool
//!
//! The dialect is always available so plans can be generated offline; the
//! writer needs the `mysql` feature (enabled by default).
//!
//! Supports MySQL 5.7+, 8.0+ and MariaDB 10.2+.

mod dialect;
#[cfg(feature = "mysql")]
mod writer;

pub use dialect::MysqlDialect;
#[cfg(feature = "mysql")]
pub use writer::MysqlWriter;
