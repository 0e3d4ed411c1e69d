//! Converted values and record batches.
//!
//! Source rows arrive as neutral [`RawValue`]s (JSON values) and are turned
//! into typed [`SqlValue`]s by the per-type value handlers before they are
//! handed to the import side.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

/// An unconverted value as produced by a row source.
pub type RawValue = serde_json::Value;

/// One source row, in source column order.
pub type SourceRow = Vec<RawValue>;

/// SQL value after conversion to the target type.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,

    Bool(bool),

    /// Any integer width.
    I64(i64),

    F64(f64),

    /// Decimal value with arbitrary precision.
    Decimal(Decimal),

    Text(String),

    /// Binary data, written as lower-case hex.
    Bytes(Vec<u8>),

    Uuid(Uuid),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),

    /// Timestamp with timezone offset.
    DateTimeOffset(DateTime<FixedOffset>),

    Date(NaiveDate),

    Time(NaiveTime),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render the value as a text field for file output.
    ///
    /// NULL renders as the empty string.
    pub fn to_field(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Bool(v) => if *v { "true" } else { "false" }.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F64(v) => v.to_string(),
            SqlValue::Decimal(v) => v.to_string(),
            SqlValue::Text(v) => v.clone(),
            SqlValue::Bytes(v) => hex::encode(v),
            SqlValue::Uuid(v) => v.to_string(),
            SqlValue::DateTime(v) => v.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            SqlValue::DateTimeOffset(v) => v.to_rfc3339(),
            SqlValue::Date(v) => v.format("%Y-%m-%d").to_string(),
            SqlValue::Time(v) => v.format("%H:%M:%S%.f").to_string(),
        }
    }

    /// Approximate in-memory size in bytes, used for buffer accounting.
    pub fn byte_size(&self) -> usize {
        match self {
            SqlValue::Text(v) => v.len(),
            SqlValue::Bytes(v) => v.len(),
            SqlValue::Null => 1,
            _ => 16,
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I64(v as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

/// A batch of converted rows for one target table.
///
/// Rows are in target column order. `exported` is the number of rows the
/// export side counted for this batch; records that failed conversion are
/// not part of the batch and not counted.
#[derive(Debug, Clone)]
pub struct Batch {
    pub rows: Vec<Vec<SqlValue>>,

    /// Sequence number of this batch within its export task.
    pub seq: u64,

    /// Whether this is the final batch of its export task.
    pub is_last: bool,
}

impl Batch {
    pub fn new(rows: Vec<Vec<SqlValue>>, seq: u64) -> Self {
        Self {
            rows,
            seq,
            is_last: false,
        }
    }

    /// Mark this as the final batch.
    pub fn mark_final(mut self) -> Self {
        self.is_last = true;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Approximate size of the batch in bytes.
    pub fn byte_size(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.iter().map(SqlValue::byte_size).sum::<usize>())
            .sum()
    }
}

/// A page of raw rows read from a source table.
#[derive(Debug, Clone, Default)]
pub struct RowPage {
    pub rows: Vec<SourceRow>,
    /// Zero-based offset of the first row of this page within the table.
    pub offset: u64,
    /// Whether the source has no more rows after this page.
    pub is_last: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_field_rendering() {
        assert_eq!(SqlValue::Null.to_field(), "");
        assert_eq!(SqlValue::Bool(true).to_field(), "true");
        assert_eq!(SqlValue::I64(-7).to_field(), "-7");
        assert_eq!(
            SqlValue::Decimal(Decimal::from_str("12.50").unwrap()).to_field(),
            "12.50"
        );
        assert_eq!(SqlValue::Bytes(vec![0xde, 0xad]).to_field(), "dead");
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(SqlValue::Date(date).to_field(), "2024-02-29");
        let ts = date.and_hms_opt(13, 5, 9).unwrap();
        assert_eq!(SqlValue::DateTime(ts).to_field(), "2024-02-29 13:05:09");
    }

    #[test]
    fn test_batch_operations() {
        let batch = Batch::new(
            vec![
                vec![SqlValue::I64(1), "a".into()],
                vec![SqlValue::I64(2), "bb".into()],
            ],
            0,
        );
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
        assert!(!batch.is_last);
        assert_eq!(batch.byte_size(), 16 + 1 + 16 + 2);
        assert!(batch.mark_final().is_last);
    }
}
