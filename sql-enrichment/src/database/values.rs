//! Conversions between database values and JSON shared by both drivers.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde_json::{Number, Value};

use crate::database::DatabaseError;

/// Decimals become JSON numbers when they parse as one, otherwise their
/// exact text.
pub fn decimal_to_json(value: Decimal) -> Value {
    let text = value.normalize().to_string();
    match text.parse::<Number>() {
        Ok(number) => Value::Number(number),
        Err(_) => Value::String(text),
    }
}

/// Non-finite floats have no JSON representation and become `null`.
pub fn float_to_json(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

pub fn timestamptz_to_json(value: DateTime<Utc>) -> Value {
    Value::String(value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

pub fn timestamp_to_json(value: NaiveDateTime) -> Value {
    Value::String(value.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

pub fn date_to_json(value: NaiveDate) -> Value {
    Value::String(value.format("%Y-%m-%d").to_string())
}

pub fn time_to_json(value: NaiveTime) -> Value {
    Value::String(value.format("%H:%M:%S%.f").to_string())
}

pub fn conversion_error(column: &str, error: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::Conversion {
        column: column.to_string(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_decimal_to_json() {
        assert_eq!(decimal_to_json(Decimal::from_str("12.50").unwrap()), json!(12.5));
        assert_eq!(decimal_to_json(Decimal::from(42)), json!(42));
        assert_eq!(decimal_to_json(Decimal::from_str("-3").unwrap()), json!(-3));
    }

    #[test]
    fn test_float_to_json() {
        assert_eq!(float_to_json(1.5), json!(1.5));
        assert_eq!(float_to_json(f64::NAN), Value::Null);
    }

    #[test]
    fn test_temporal_values_are_iso_8601() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(timestamptz_to_json(ts), json!("2024-03-01T12:30:05Z"));
        assert_eq!(
            timestamp_to_json(ts.naive_utc()),
            json!("2024-03-01T12:30:05")
        );
        assert_eq!(date_to_json(ts.date_naive()), json!("2024-03-01"));
        assert_eq!(time_to_json(ts.time()), json!("12:30:05"));
    }

    #[test]
    fn test_conversion_error_names_the_column() {
        let err = conversion_error("created_at", "unsupported type BYTEA");
        assert_eq!(
            err.to_string(),
            "could not convert column created_at: unsupported type BYTEA"
        );
    }
}
