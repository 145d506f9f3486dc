//! Utilities shared across database drivers.
//!
//! - [`tls`]: TLS configuration for PostgreSQL connections
//! - [`retry`]: connection backoff and merge retry delays

pub mod retry;
pub mod tls;

pub use retry::{connect_with_retry, merge_retry_delay};
pub use tls::{SslMode, TlsBuilder};
