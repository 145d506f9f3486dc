//! Configuration type definitions.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target database configuration.
    pub target: TargetConfig,

    /// Sync behavior configuration.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Calendar dimension seeding.
    #[serde(default)]
    pub calendar: CalendarConfig,
}

/// Authentication method for the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// User and password.
    #[default]
    #[serde(alias = "sql", alias = "password")]
    SqlServer,
    /// Integrated / trusted authentication (Kerberos on MSSQL).
    #[serde(alias = "trusted", alias = "kerberos")]
    Integrated,
}

/// Target database configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database type: mssql, mysql or postgres.
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port. Defaults per dialect when not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Database name.
    pub database: String,

    /// Username. May be empty with integrated auth.
    #[serde(default)]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Target schema / namespace. Defaults per dialect when not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Authentication method (default: sql_server).
    #[serde(default)]
    pub auth: AuthMethod,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,
}

impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("auth", &self.auth)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Sync behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// IANA name of the reference timezone datetimes are normalized to.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,

    /// Retries of a merge transaction after a deadlock or lock timeout.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between merge retries; grows linearly per attempt.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Connection attempts before giving up, with exponential backoff.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Create missing target tables before loading (default: true).
    #[serde(default = "default_true")]
    pub create_tables: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            time_zone: default_time_zone(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            connect_retries: default_connect_retries(),
            max_connections: default_max_connections(),
            create_tables: true,
        }
    }
}

/// Calendar dimension configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Seed the calendar table during `run` (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// First calendar day.
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,

    /// Days after `start_date` to generate, inclusive of both ends.
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_date: default_start_date(),
            horizon_days: default_horizon_days(),
        }
    }
}

// Default value functions for serde
fn default_require() -> String {
    "require".to_string()
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    200
}

fn default_connect_retries() -> u32 {
    3
}

fn default_max_connections() -> u32 {
    4
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2015, 1, 1).unwrap_or_default()
}

fn default_horizon_days() -> u32 {
    crate::calendar::DEFAULT_HORIZON_DAYS
}

fn default_true() -> bool {
    true
}
