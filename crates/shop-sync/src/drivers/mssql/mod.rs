//! Microsoft SQL Server driver.
//!
//! - [`MssqlDialect`]: `MERGE`-based SQL generation
//! - [`MssqlWriter`]: merge target over a bb8/Tiberius pool

mod dialect;
mod writer;

pub use dialect::MssqlDialect;
pub use writer::{MssqlWriter, TiberiusConnectionManager};
