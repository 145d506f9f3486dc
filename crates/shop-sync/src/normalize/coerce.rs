//! Per-column value coercion.

use std::borrow::Cow;
use std::str::FromStr;

use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde_json::Value;

use super::datetime::{min_date, min_datetime, parse_date, parse_timestamp, to_reference};
use crate::core::{ColumnDef, LogicalType, SqlNullType, SqlValue};

/// The raw value cannot be represented in the column's logical type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Unrepresentable;

type Coerced<'r> = std::result::Result<SqlValue<'r>, Unrepresentable>;

/// Coerce one raw value (or its absence) to `column`'s type.
pub(crate) fn coerce<'r>(column: &ColumnDef, raw: Option<&'r Value>, tz: Tz) -> Coerced<'r> {
    match column.logical_type {
        LogicalType::String => coerce_string(column, raw),
        LogicalType::DateTime => Ok(coerce_datetime(column, raw, tz)),
        LogicalType::Date => Ok(coerce_date(column, raw, tz)),
        numeric => match scrub(raw) {
            None if column.nullable => Ok(SqlValue::Null(null_type(numeric))),
            None => Ok(zero(numeric)),
            Some(v) => coerce_numeric(numeric, v),
        },
    }
}

/// Treat JSON null and whitespace-only strings as absent.
fn scrub(raw: Option<&Value>) -> Option<&Value> {
    match raw {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(v) => Some(v),
    }
}

fn null_type(ty: LogicalType) -> SqlNullType {
    match ty {
        LogicalType::Int64 => SqlNullType::I64,
        LogicalType::Int32 => SqlNullType::I32,
        LogicalType::Float64 => SqlNullType::F64,
        LogicalType::Bool => SqlNullType::Bool,
        LogicalType::Decimal => SqlNullType::Decimal,
        LogicalType::String => SqlNullType::String,
        LogicalType::DateTime => SqlNullType::DateTime,
        LogicalType::Date => SqlNullType::Date,
    }
}

fn zero(ty: LogicalType) -> SqlValue<'static> {
    match ty {
        LogicalType::Int64 => SqlValue::I64(0),
        LogicalType::Int32 => SqlValue::I32(0),
        LogicalType::Float64 => SqlValue::F64(0.0),
        LogicalType::Bool => SqlValue::Bool(false),
        LogicalType::Decimal => SqlValue::Decimal(Decimal::ZERO),
        LogicalType::String => SqlValue::Text(Cow::Borrowed("")),
        LogicalType::DateTime => SqlValue::DateTime(min_datetime()),
        LogicalType::Date => SqlValue::Date(min_date()),
    }
}

fn coerce_numeric(ty: LogicalType, v: &Value) -> Coerced<'static> {
    let value = match ty {
        LogicalType::Int64 => as_i64(v).map(SqlValue::I64),
        LogicalType::Int32 => as_i64(v)
            .and_then(|i| i32::try_from(i).ok())
            .map(SqlValue::I32),
        LogicalType::Float64 => as_f64(v).map(SqlValue::F64),
        LogicalType::Decimal => as_decimal(v).map(SqlValue::Decimal),
        LogicalType::Bool => as_bool(v).map(SqlValue::Bool),
        _ => None,
    };
    value.ok_or(Unrepresentable)
}

fn integral(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, hence the strict upper bound.
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    let f = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }?;
    f.is_finite().then_some(f)
}

fn as_decimal(v: &Value) -> Option<Decimal> {
    let parse = |s: &str| {
        Decimal::from_str(s)
            .or_else(|_| Decimal::from_scientific(s))
            .ok()
    };
    match v {
        Value::Number(n) => parse(&n.to_string()),
        Value::String(s) => parse(s.trim()),
        Value::Bool(b) => Some(Decimal::from(u8::from(*b))),
        _ => None,
    }
}

fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Strings are never NULL: absent values become `""`.
fn coerce_string<'r>(column: &ColumnDef, raw: Option<&'r Value>) -> Coerced<'r> {
    let text: Cow<'r, str> = match raw {
        None | Some(Value::Null) => Cow::Borrowed(""),
        Some(Value::String(s)) => Cow::Borrowed(s.as_str()),
        Some(Value::Bool(b)) => Cow::Borrowed(if *b { "true" } else { "false" }),
        Some(Value::Number(n)) => Cow::Owned(n.to_string()),
        Some(Value::Array(items)) => Cow::Owned(join_array(items)),
        Some(v @ Value::Object(_)) => Cow::Owned(v.to_string()),
    };
    if let Some(max) = column.max_length {
        if text.chars().count() > max as usize {
            return Err(Unrepresentable);
        }
    }
    Ok(SqlValue::Text(text))
}

/// `["stripe", "paypal"]` becomes `stripe, paypal`; nested arrays and
/// objects fall back to compact JSON.
fn join_array(items: &[Value]) -> String {
    if items.iter().any(|v| v.is_array() || v.is_object()) {
        return Value::Array(items.to_vec()).to_string();
    }
    items
        .iter()
        .filter_map(|v| match v {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn coerce_datetime<'r>(column: &ColumnDef, raw: Option<&'r Value>, tz: Tz) -> SqlValue<'r> {
    let parsed = raw
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .map(|ts| to_reference(ts, tz));
    match parsed {
        Some(dt) => SqlValue::DateTime(dt),
        None if column.nullable => SqlValue::Null(SqlNullType::DateTime),
        None => SqlValue::DateTime(min_datetime()),
    }
}

fn coerce_date<'r>(column: &ColumnDef, raw: Option<&'r Value>, tz: Tz) -> SqlValue<'r> {
    // A bare date names a calendar day and is not shifted between zones.
    let parsed = raw.and_then(Value::as_str).and_then(|s| {
        parse_date(s.trim()).or_else(|| parse_timestamp(s).map(|ts| to_reference(ts, tz).date()))
    });
    match parsed {
        Some(d) => SqlValue::Date(d),
        None if column.nullable => SqlValue::Null(SqlNullType::Date),
        None => SqlValue::Date(min_date()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn c(ty: LogicalType) -> ColumnDef {
        ColumnDef::new("c", ty)
    }

    fn run<'r>(column: &ColumnDef, v: &'r Value) -> Coerced<'r> {
        coerce(column, Some(v), chrono_tz::UTC)
    }

    #[test]
    fn test_missing_numeric_fills_zero_or_null() {
        assert_eq!(coerce(&c(LogicalType::Int64), None, chrono_tz::UTC), Ok(SqlValue::I64(0)));
        assert_eq!(
            coerce(&c(LogicalType::Int32).nullable(), None, chrono_tz::UTC),
            Ok(SqlValue::Null(SqlNullType::I32))
        );
        assert_eq!(
            coerce(&c(LogicalType::Bool), None, chrono_tz::UTC),
            Ok(SqlValue::Bool(false))
        );
    }

    #[test]
    fn test_blank_numeric_string_is_absent() {
        let v = json!("   ");
        assert_eq!(run(&c(LogicalType::Decimal), &v), Ok(SqlValue::Decimal(Decimal::ZERO)));
        assert_eq!(
            run(&c(LogicalType::Float64).nullable(), &v),
            Ok(SqlValue::Null(SqlNullType::F64))
        );
    }

    #[test]
    fn test_numeric_strings_parse() {
        assert_eq!(run(&c(LogicalType::Int64), &json!(" 42 ")), Ok(SqlValue::I64(42)));
        assert_eq!(run(&c(LogicalType::Int64), &json!(7.0)), Ok(SqlValue::I64(7)));
        assert_eq!(run(&c(LogicalType::Int32), &json!("12.0")), Ok(SqlValue::I32(12)));
        assert_eq!(
            run(&c(LogicalType::Decimal), &json!("19.99")),
            Ok(SqlValue::Decimal(Decimal::new(1999, 2)))
        );
        assert_eq!(
            run(&c(LogicalType::Decimal), &json!(5.25)),
            Ok(SqlValue::Decimal(Decimal::new(525, 2)))
        );
        assert_eq!(run(&c(LogicalType::Float64), &json!("2.5")), Ok(SqlValue::F64(2.5)));
    }

    #[test]
    fn test_numeric_garbage_rejected() {
        assert_eq!(run(&c(LogicalType::Int64), &json!("abc")), Err(Unrepresentable));
        assert_eq!(run(&c(LogicalType::Int64).nullable(), &json!("abc")), Err(Unrepresentable));
        assert_eq!(run(&c(LogicalType::Int64), &json!(1.5)), Err(Unrepresentable));
        assert_eq!(run(&c(LogicalType::Int32), &json!(5_000_000_000i64)), Err(Unrepresentable));
        assert_eq!(run(&c(LogicalType::Float64), &json!("NaN")), Err(Unrepresentable));
        assert_eq!(run(&c(LogicalType::Decimal), &json!([1])), Err(Unrepresentable));
    }

    #[test]
    fn test_bool_forms() {
        assert_eq!(run(&c(LogicalType::Bool), &json!("Yes")), Ok(SqlValue::Bool(true)));
        assert_eq!(run(&c(LogicalType::Bool), &json!(0)), Ok(SqlValue::Bool(false)));
        assert_eq!(run(&c(LogicalType::Bool), &json!(2)), Err(Unrepresentable));
        assert_eq!(run(&c(LogicalType::Bool), &json!("maybe")), Err(Unrepresentable));
    }

    #[test]
    fn test_strings_never_null() {
        assert_eq!(
            coerce(&c(LogicalType::String).nullable(), None, chrono_tz::UTC),
            Ok(SqlValue::Text(Cow::Borrowed("")))
        );
        assert_eq!(
            run(&c(LogicalType::String), &Value::Null),
            Ok(SqlValue::Text(Cow::Borrowed("")))
        );
    }

    #[test]
    fn test_string_borrows_source() {
        let v = json!("hello");
        match run(&c(LogicalType::String), &v) {
            Ok(SqlValue::Text(Cow::Borrowed(s))) => assert_eq!(s, "hello"),
            other => panic!("expected borrowed text, got {:?}", other),
        }
    }

    #[test]
    fn test_string_rendering() {
        assert_eq!(
            run(&c(LogicalType::String), &json!(["stripe", "paypal"])),
            Ok(SqlValue::text_owned("stripe, paypal".to_string()))
        );
        assert_eq!(
            run(&c(LogicalType::String), &json!(1234)),
            Ok(SqlValue::text_owned("1234".to_string()))
        );
        assert_eq!(
            run(&c(LogicalType::String), &json!([{"a": 1}])),
            Ok(SqlValue::text_owned("[{\"a\":1}]".to_string()))
        );
    }

    #[test]
    fn test_string_length_limit() {
        let column = c(LogicalType::String).max_length(2);
        assert!(run(&column, &json!("st")).is_ok());
        assert_eq!(run(&column, &json!("std")), Err(Unrepresentable));
    }

    #[test]
    fn test_datetime_null_or_sentinel() {
        let v = json!("garbage");
        assert_eq!(
            run(&c(LogicalType::DateTime).nullable(), &v),
            Ok(SqlValue::Null(SqlNullType::DateTime))
        );
        assert_eq!(
            run(&c(LogicalType::DateTime), &v),
            Ok(SqlValue::DateTime(min_datetime()))
        );
        assert_eq!(
            coerce(&c(LogicalType::DateTime), None, chrono_tz::UTC),
            Ok(SqlValue::DateTime(min_datetime()))
        );
    }

    #[test]
    fn test_datetime_converted_to_reference_zone() {
        let v = json!("2022-01-15T05:30:00Z");
        let got = coerce(&c(LogicalType::DateTime), Some(&v), chrono_tz::Asia::Tokyo).unwrap();
        let expected = NaiveDate::from_ymd_opt(2022, 1, 15)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        assert_eq!(got, SqlValue::DateTime(expected));
    }

    #[test]
    fn test_bare_date_not_shifted() {
        let v = json!("2022-01-15");
        let got = coerce(&c(LogicalType::Date), Some(&v), chrono_tz::America::Los_Angeles).unwrap();
        assert_eq!(got, SqlValue::Date(NaiveDate::from_ymd_opt(2022, 1, 15).unwrap()));
    }
}
