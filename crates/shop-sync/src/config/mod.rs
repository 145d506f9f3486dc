//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::drivers::DialectImpl;
use crate::error::{Result, SyncError};
use chrono_tz::Tz;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl TargetConfig {
    /// Resolve the dialect strategy for this target.
    pub fn dialect(&self) -> Result<DialectImpl> {
        DialectImpl::from_db_type(&self.r#type)
    }

    /// Port to connect to, falling back to the dialect's well-known port.
    pub fn effective_port(&self) -> u16 {
        if let Some(port) = self.port {
            return port;
        }
        match self.dialect() {
            Ok(DialectImpl::Mssql(_)) => 1433,
            Ok(DialectImpl::Mysql(_)) => 3306,
            _ => 5432,
        }
    }

    /// Namespace target tables live in.
    ///
    /// MySQL has no schema level below the database, so the database name is
    /// used there.
    pub fn namespace(&self) -> String {
        if let Some(schema) = self.schema.as_deref().filter(|s| !s.is_empty()) {
            return schema.to_string();
        }
        match self.dialect() {
            Ok(DialectImpl::Mssql(_)) => "dbo".to_string(),
            Ok(DialectImpl::Mysql(_)) => self.database.clone(),
            _ => "public".to_string(),
        }
    }
}

impl SyncConfig {
    /// Parse the reference timezone.
    pub fn tz(&self) -> Result<Tz> {
        self.time_zone.parse::<Tz>().map_err(|_| {
            SyncError::Config(format!(
                "sync.time_zone '{}' is not a known IANA timezone",
                self.time_zone
            ))
        })
    }
}
