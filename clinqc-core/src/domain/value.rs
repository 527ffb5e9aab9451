// clinqc-core/src/domain/value.rs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single field value as captured during data entry or read from the store.
///
/// `Null` models an explicitly blank answer (the field exists on the form but
/// was left empty), which is distinct from the field being absent from the
/// submitted map altogether.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Date(NaiveDate),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::Date(_) => "date",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            // Dates often arrive as ISO strings from JSON records
            Value::Text(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
            _ => None,
        }
    }

    /// Ordering used by `<`, `between`, etc. Only same-kind ordered values
    /// compare; everything else is None (the caller surfaces Indeterminate
    /// or a semantic error, never a panic).
    pub fn partial_cmp_ordered(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Date(_), _) | (_, Value::Date(_)) => {
                let (a, b) = (self.as_date()?, other.as_date()?);
                Some(a.cmp(&b))
            }
            _ => None,
        }
    }

    /// Loose equality: numbers compare numerically, text case-sensitively,
    /// dates accept ISO text on either side.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Date(_), _) | (_, Value::Date(_)) => {
                match (self.as_date(), other.as_date()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_comparison_numbers() {
        let a = Value::Number(18.0);
        let b = Value::Number(65.0);
        assert_eq!(a.partial_cmp_ordered(&b), Some(Ordering::Less));
        assert_eq!(a.partial_cmp_ordered(&a), Some(Ordering::Equal));
    }

    #[test]
    fn test_ordered_comparison_cross_type_is_none() {
        let a = Value::Number(18.0);
        let b = Value::Text("eighteen".into());
        assert_eq!(a.partial_cmp_ordered(&b), None);
    }

    #[test]
    fn test_date_accepts_iso_text() {
        let a = Value::Text("2024-03-01".into());
        let b = Value::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(a.partial_cmp_ordered(&b), Some(Ordering::Less));
        assert!(!a.loose_eq(&b));
    }
}
