//! Normalized field values produced by coercion
//!
//! A closed sum over the mapped column types; each variant binds into SQL
//! with its native Postgres type.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A coerced cell value ready for insertion
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Bool(bool),
    Uuid(Uuid),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Duplicate-detection key form: textual values are case-folded to
    /// upper case, everything else goes through its SQL text rendering.
    pub fn key_string(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Text(s) => Some(s.trim().to_uppercase()),
            FieldValue::Int(i) => Some(i.to_string()),
            FieldValue::Float(f) => Some(f.to_string()),
            FieldValue::Decimal(d) => Some(d.normalize().to_string()),
            FieldValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            FieldValue::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
            FieldValue::Bool(b) => Some(b.to_string()),
            FieldValue::Uuid(u) => Some(u.to_string()),
        }
    }
}

/// A fully coerced row bound for the dynamic target table
#[derive(Debug, Clone)]
pub struct MappedRow {
    /// Zero-based source row index, for log messages
    pub row_number: usize,
    /// Values aligned with the mapping's column order
    pub values: Vec<FieldValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_key_string_case_folds_text() {
        assert_eq!(
            FieldValue::Text("  abc1d23 ".to_string()).key_string(),
            Some("ABC1D23".to_string())
        );
    }

    #[test]
    fn test_key_string_null_is_none() {
        assert_eq!(FieldValue::Null.key_string(), None);
        assert!(FieldValue::Null.is_null());
    }

    #[test]
    fn test_key_string_normalizes_decimal() {
        assert_eq!(
            FieldValue::Decimal(dec!(55000.00)).key_string(),
            Some("55000".to_string())
        );
    }
}
