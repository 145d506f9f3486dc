//! Identifier validation and quoting.
//!
//! Table and column names cannot be bound as statement parameters, so every
//! generated statement splices them in quoted. Names are validated first and
//! the dialect's closing quote is doubled inside the quotes, which keeps
//! reserved words such as `order` or `key` usable as column names.

use crate::error::{Result, SyncError};

/// Maximum identifier length (conservative limit across databases).
/// - PostgreSQL: 63 bytes
/// - SQL Server: 128 characters
/// - MySQL: 64 characters
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier.
///
/// Rejects empty names, names containing NUL and names longer than
/// 128 bytes.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SyncError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(SyncError::Config(format!(
            "Identifier contains a null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(SyncError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// ```ignore
/// assert_eq!(quote_pg("users")?, "\"users\"");
/// assert_eq!(quote_pg("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a MySQL identifier using backticks.
pub fn quote_mysql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{}`", name.replace('`', "``")))
}

/// Quote a SQL Server identifier using brackets.
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Qualify a PostgreSQL table name with schema.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

/// Qualify a MySQL table name with its database.
pub fn qualify_mysql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mysql(schema)?, quote_mysql(table)?))
}

/// Qualify a SQL Server table name with schema.
pub fn qualify_mssql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mssql(schema)?, quote_mssql(table)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("orders").is_ok());
        assert!(validate_identifier("TheDaySuffix").is_ok());
        assert!(validate_identifier("total_shipping_price_set_shop_money_amount").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_empty() {
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_validate_identifier_rejects_null_byte() {
        assert!(validate_identifier("orders\0; DROP TABLE x").is_err());
    }

    #[test]
    fn test_validate_identifier_length_limit() {
        assert!(validate_identifier(&"a".repeat(128)).is_ok());
        assert!(validate_identifier(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_quote_reserved_words() {
        assert_eq!(quote_pg("order").unwrap(), "\"order\"");
        assert_eq!(quote_mysql("key").unwrap(), "`key`");
        assert_eq!(quote_mssql("user").unwrap(), "[user]");
    }

    #[test]
    fn test_quote_escapes_closing_quote() {
        assert_eq!(quote_pg("a\"b").unwrap(), "\"a\"\"b\"");
        assert_eq!(quote_mysql("a`b").unwrap(), "`a``b`");
        assert_eq!(quote_mssql("a]b").unwrap(), "[a]]b]");
    }

    #[test]
    fn test_quote_mssql_injection_safely_quoted() {
        let quoted = quote_mssql("x]; DROP TABLE orders; --").unwrap();
        assert_eq!(quoted, "[x]]; DROP TABLE orders; --]");
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify_pg("public", "orders").unwrap(), "\"public\".\"orders\"");
        assert_eq!(qualify_mysql("shop", "orders").unwrap(), "`shop`.`orders`");
        assert_eq!(qualify_mssql("dbo", "orders").unwrap(), "[dbo].[orders]");
        assert!(qualify_mssql("", "orders").is_err());
    }
}
