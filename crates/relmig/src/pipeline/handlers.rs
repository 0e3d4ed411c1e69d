//! Per-type value handlers for the export side.
//!
//! Handlers are looked up by normalized source type name (see
//! [`normalize_type`]); unknown types fall back to the text handler.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::core::graph::Column;
use crate::core::traits::ValueHandler;
use crate::core::value::{RawValue, SqlValue};
use crate::typemap::normalize_type;

type ConvertResult = std::result::Result<SqlValue, String>;

/// Registry of value handlers keyed by normalized type name.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ValueHandler>>,
    fallback: Arc<dyn ValueHandler>,
}

impl HandlerRegistry {
    /// Empty registry with the text handler as fallback.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(TextHandler),
        }
    }

    /// Registry with handlers for the common source types.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let integer: Arc<dyn ValueHandler> = Arc::new(IntegerHandler);
        let number: Arc<dyn ValueHandler> = Arc::new(NumberHandler);
        let float: Arc<dyn ValueHandler> = Arc::new(FloatHandler);
        let boolean: Arc<dyn ValueHandler> = Arc::new(BoolHandler);
        let date: Arc<dyn ValueHandler> = Arc::new(DateHandler);
        let timestamp: Arc<dyn ValueHandler> = Arc::new(TimestampHandler);
        let timestamptz: Arc<dyn ValueHandler> = Arc::new(TimestampTzHandler);
        let time: Arc<dyn ValueHandler> = Arc::new(TimeHandler);
        let binary: Arc<dyn ValueHandler> = Arc::new(BinaryHandler);
        let uuid: Arc<dyn ValueHandler> = Arc::new(UuidHandler);

        for t in ["tinyint", "smallint", "int", "integer", "int2", "int4", "int8", "bigint", "mediumint"] {
            registry.register(t, integer.clone());
        }
        for t in ["number", "numeric", "decimal", "money", "smallmoney"] {
            registry.register(t, number.clone());
        }
        for t in ["float", "real", "double", "double precision", "binary_float", "binary_double", "float4", "float8"] {
            registry.register(t, float.clone());
        }
        for t in ["bit", "bool", "boolean"] {
            registry.register(t, boolean.clone());
        }
        registry.register("date", date);
        for t in ["datetime", "datetime2", "smalldatetime", "timestamp", "timestamp without time zone"] {
            registry.register(t, timestamp.clone());
        }
        for t in ["datetimeoffset", "timestamp with time zone", "timestamp with local time zone", "timestamptz"] {
            registry.register(t, timestamptz.clone());
        }
        for t in ["time", "time without time zone"] {
            registry.register(t, time.clone());
        }
        for t in ["binary", "varbinary", "image", "blob", "raw", "long raw", "bytea", "tinyblob", "mediumblob", "longblob"] {
            registry.register(t, binary.clone());
        }
        for t in ["uniqueidentifier", "uuid"] {
            registry.register(t, uuid.clone());
        }
        registry
    }

    /// Register a handler for a type name (normalized on insert).
    pub fn register(&mut self, data_type: &str, handler: Arc<dyn ValueHandler>) {
        self.handlers.insert(normalize_type(data_type), handler);
    }

    /// Handler for a column, falling back to the generic text handler.
    pub fn handler_for(&self, column: &Column) -> Arc<dyn ValueHandler> {
        self.handlers
            .get(&normalize_type(&column.data_type))
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Convert one value; JSON null is always SQL NULL.
    pub fn convert(&self, value: &RawValue, column: &Column) -> ConvertResult {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        self.handler_for(column).read(value, column)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn type_error(value: &RawValue, column: &Column) -> String {
    format!("cannot convert {} to {}", value, column.data_type)
}

/// Text of a scalar value; `None` for arrays and objects.
fn scalar_text(value: &RawValue) -> Option<String> {
    match value {
        RawValue::String(s) => Some(s.trim().to_string()),
        RawValue::Number(n) => Some(n.to_string()),
        RawValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Generic handler: strings pass through, everything else is rendered.
pub struct TextHandler;

impl ValueHandler for TextHandler {
    fn read(&self, value: &RawValue, _column: &Column) -> ConvertResult {
        Ok(match value {
            RawValue::String(s) => SqlValue::Text(s.clone()),
            RawValue::Null => SqlValue::Null,
            other => SqlValue::Text(other.to_string()),
        })
    }
}

pub struct IntegerHandler;

impl ValueHandler for IntegerHandler {
    fn read(&self, value: &RawValue, column: &Column) -> ConvertResult {
        if let Some(i) = value.as_i64() {
            return Ok(SqlValue::I64(i));
        }
        let text = scalar_text(value).ok_or_else(|| type_error(value, column))?;
        text.parse::<i64>()
            .map(SqlValue::I64)
            .map_err(|e| format!("invalid integer '{}': {}", text, e))
    }
}

/// NUMBER/DECIMAL: integral when the column has no scale and fits 18 digits.
pub struct NumberHandler;

impl ValueHandler for NumberHandler {
    fn read(&self, value: &RawValue, column: &Column) -> ConvertResult {
        let text = scalar_text(value).ok_or_else(|| type_error(value, column))?;
        if column.scale == 0 && (1..=18).contains(&column.precision) {
            if let Ok(i) = text.parse::<i64>() {
                return Ok(SqlValue::I64(i));
            }
        }
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .map(SqlValue::Decimal)
            .map_err(|e| format!("invalid decimal '{}': {}", text, e))
    }
}

pub struct FloatHandler;

impl ValueHandler for FloatHandler {
    fn read(&self, value: &RawValue, column: &Column) -> ConvertResult {
        if let Some(f) = value.as_f64() {
            return Ok(SqlValue::F64(f));
        }
        let text = scalar_text(value).ok_or_else(|| type_error(value, column))?;
        text.parse::<f64>()
            .map(SqlValue::F64)
            .map_err(|e| format!("invalid float '{}': {}", text, e))
    }
}

pub struct BoolHandler;

impl ValueHandler for BoolHandler {
    fn read(&self, value: &RawValue, column: &Column) -> ConvertResult {
        if let Some(b) = value.as_bool() {
            return Ok(SqlValue::Bool(b));
        }
        let text = scalar_text(value).ok_or_else(|| type_error(value, column))?;
        match text.to_lowercase().as_str() {
            "1" | "true" | "t" | "y" | "yes" => Ok(SqlValue::Bool(true)),
            "0" | "false" | "f" | "n" | "no" => Ok(SqlValue::Bool(false)),
            _ => Err(format!("invalid boolean '{}'", text)),
        }
    }
}

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

pub struct DateHandler;

impl ValueHandler for DateHandler {
    fn read(&self, value: &RawValue, column: &Column) -> ConvertResult {
        let text = scalar_text(value).ok_or_else(|| type_error(value, column))?;
        // Some vendors report DATE with a time part.
        NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .ok()
            .or_else(|| parse_datetime(&text).map(|dt| dt.date()))
            .map(SqlValue::Date)
            .ok_or_else(|| format!("invalid date '{}'", text))
    }
}

pub struct TimestampHandler;

impl ValueHandler for TimestampHandler {
    fn read(&self, value: &RawValue, column: &Column) -> ConvertResult {
        let text = scalar_text(value).ok_or_else(|| type_error(value, column))?;
        parse_datetime(&text)
            .or_else(|| DateTime::parse_from_rfc3339(&text).ok().map(|dt| dt.naive_local()))
            .map(SqlValue::DateTime)
            .ok_or_else(|| format!("invalid timestamp '{}'", text))
    }
}

pub struct TimestampTzHandler;

impl ValueHandler for TimestampTzHandler {
    fn read(&self, value: &RawValue, column: &Column) -> ConvertResult {
        let text = scalar_text(value).ok_or_else(|| type_error(value, column))?;
        DateTime::parse_from_rfc3339(&text)
            .or_else(|_| DateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f %z"))
            .map(SqlValue::DateTimeOffset)
            .map_err(|e| format!("invalid timestamp with time zone '{}': {}", text, e))
    }
}

pub struct TimeHandler;

impl ValueHandler for TimeHandler {
    fn read(&self, value: &RawValue, column: &Column) -> ConvertResult {
        let text = scalar_text(value).ok_or_else(|| type_error(value, column))?;
        NaiveTime::parse_from_str(&text, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(&text, "%H:%M"))
            .map(SqlValue::Time)
            .map_err(|e| format!("invalid time '{}': {}", text, e))
    }
}

/// Binary values arrive hex-encoded (optionally `0x`-prefixed) or as byte arrays.
pub struct BinaryHandler;

impl ValueHandler for BinaryHandler {
    fn read(&self, value: &RawValue, column: &Column) -> ConvertResult {
        match value {
            RawValue::String(s) => {
                let hex_text = s
                    .trim()
                    .strip_prefix("0x")
                    .or_else(|| s.trim().strip_prefix("\\x"))
                    .unwrap_or(s.trim());
                hex::decode(hex_text)
                    .map(SqlValue::Bytes)
                    .map_err(|e| format!("invalid hex data: {}", e))
            }
            RawValue::Array(items) => items
                .iter()
                .map(|v| {
                    v.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| type_error(v, column))
                })
                .collect::<std::result::Result<Vec<u8>, String>>()
                .map(SqlValue::Bytes),
            other => Err(type_error(other, column)),
        }
    }
}

pub struct UuidHandler;

impl ValueHandler for UuidHandler {
    fn read(&self, value: &RawValue, column: &Column) -> ConvertResult {
        let text = scalar_text(value).ok_or_else(|| type_error(value, column))?;
        Uuid::parse_str(&text)
            .map(SqlValue::Uuid)
            .map_err(|e| format!("invalid uuid '{}': {}", text, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn convert(data_type: &str, value: RawValue) -> ConvertResult {
        HandlerRegistry::with_defaults().convert(&value, &Column::new("C", data_type))
    }

    #[test]
    fn test_null_is_always_null() {
        assert_eq!(convert("int", RawValue::Null).unwrap(), SqlValue::Null);
        assert_eq!(convert("whatever", RawValue::Null).unwrap(), SqlValue::Null);
    }

    #[test]
    fn test_integers_and_numbers() {
        assert_eq!(convert("INT", json!(42)).unwrap(), SqlValue::I64(42));
        assert_eq!(convert("bigint", json!("-7")).unwrap(), SqlValue::I64(-7));
        assert!(convert("int", json!("abc")).is_err());

        let registry = HandlerRegistry::with_defaults();
        let id = Column::new("ID", "NUMBER").with_precision(10, 0);
        assert_eq!(registry.convert(&json!(12), &id).unwrap(), SqlValue::I64(12));
        let amount = Column::new("AMOUNT", "NUMBER(12,2)").with_precision(12, 2);
        assert_eq!(
            registry.convert(&json!("12.50"), &amount).unwrap(),
            SqlValue::Decimal(Decimal::from_str("12.50").unwrap())
        );
    }

    #[test]
    fn test_booleans() {
        assert_eq!(convert("bit", json!(1)).unwrap(), SqlValue::Bool(true));
        assert_eq!(convert("boolean", json!("N")).unwrap(), SqlValue::Bool(false));
        assert!(convert("bool", json!("maybe")).is_err());
    }

    #[test]
    fn test_dates_and_times() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(convert("DATE", json!("2024-03-01")).unwrap(), SqlValue::Date(date));
        assert_eq!(
            convert("date", json!("2024-03-01 00:00:00")).unwrap(),
            SqlValue::Date(date)
        );
        assert_eq!(
            convert("TIMESTAMP(6)", json!("2024-03-01T10:15:00")).unwrap(),
            SqlValue::DateTime(date.and_hms_opt(10, 15, 0).unwrap())
        );
        assert!(matches!(
            convert("datetimeoffset", json!("2024-03-01T10:15:00+02:00")).unwrap(),
            SqlValue::DateTimeOffset(_)
        ));
        assert!(convert("date", json!("03/01/2024")).is_err());
    }

    #[test]
    fn test_binary_and_uuid() {
        assert_eq!(
            convert("BLOB", json!("0xDEAD")).unwrap(),
            SqlValue::Bytes(vec![0xde, 0xad])
        );
        assert_eq!(
            convert("varbinary", json!([1, 2, 255])).unwrap(),
            SqlValue::Bytes(vec![1, 2, 255])
        );
        assert!(convert("raw", json!([256])).is_err());
        assert!(matches!(
            convert("uniqueidentifier", json!("6F9619FF-8B86-D011-B42D-00C04FC964FF")).unwrap(),
            SqlValue::Uuid(_)
        ));
    }

    #[test]
    fn test_unknown_types_fall_back_to_text() {
        assert_eq!(
            convert("SDO_GEOMETRY", json!({"x": 1})).unwrap(),
            SqlValue::Text("{\"x\":1}".into())
        );
        assert_eq!(convert("xml", json!("<a/>")).unwrap(), SqlValue::Text("<a/>".into()));
    }
}
