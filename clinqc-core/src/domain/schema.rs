// clinqc-core/src/domain/schema.rs

use crate::ports::schema::FieldResolver;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Number,
    Text,
    Date,
    Bool,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Number => write!(f, "number"),
            FieldType::Text => write!(f, "text"),
            FieldType::Date => write!(f, "date"),
            FieldType::Bool => write!(f, "bool"),
        }
    }
}

impl FieldType {
    /// Ordered types accept `<`, `between`, tolerance comparisons.
    pub fn is_ordered(&self) -> bool {
        matches!(self, FieldType::Number | FieldType::Date | FieldType::Text)
    }
}

/// Declared shape of the captured dataset: one logical table, a subject key,
/// a visit key, and the typed clinical fields. The core never infers this;
/// it is provided by the surrounding application's configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatasetSchema {
    /// Table (or view) name the batch plans run against.
    pub table: String,

    #[serde(default = "default_subject_column")]
    pub subject_column: String,

    #[serde(default = "default_visit_column")]
    pub visit_column: String,

    /// field name -> type. BTreeMap keeps emitted SQL deterministic.
    pub fields: BTreeMap<String, FieldType>,

    /// Known visit codes. Empty = visits are not validated semantically.
    #[serde(default)]
    pub visits: Vec<String>,
}

fn default_subject_column() -> String {
    "subject_id".to_string()
}

fn default_visit_column() -> String {
    "visit".to_string()
}

impl FieldResolver for DatasetSchema {
    fn resolve_field(&self, name: &str) -> Option<FieldType> {
        self.fields.get(name).copied()
    }

    fn knows_visit(&self, visit: &str) -> bool {
        self.visits.is_empty() || self.visits.iter().any(|v| v == visit)
    }
}
