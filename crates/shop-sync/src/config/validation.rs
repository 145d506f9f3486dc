//! Configuration validation.

use super::{AuthMethod, Config};
use crate::drivers::common::SslMode;
use crate::error::{Result, SyncError};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Dialect first: an unknown engine is fatal before anything else.
    config.target.dialect()?;

    if config.target.host.is_empty() {
        return Err(SyncError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(SyncError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() && config.target.auth != AuthMethod::Integrated {
        return Err(SyncError::Config(
            "target.user is required unless auth is integrated".into(),
        ));
    }
    if let Some(0) = config.target.port {
        return Err(SyncError::Config("target.port must be non-zero".into()));
    }
    SslMode::parse(&config.target.ssl_mode)?;

    config.sync.tz()?;
    if config.sync.max_connections == 0 {
        return Err(SyncError::Config(
            "sync.max_connections must be at least 1".into(),
        ));
    }
    if config.sync.connect_retries == 0 {
        return Err(SyncError::Config(
            "sync.connect_retries must be at least 1".into(),
        ));
    }
    if config.sync.max_retries > 20 {
        return Err(SyncError::Config(
            "sync.max_retries must be at most 20".into(),
        ));
    }

    Ok(())
}
