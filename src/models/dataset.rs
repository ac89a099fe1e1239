//! Units of query output.

use super::query::Value;
use serde::{Deserialize, Serialize};

/// Column metadata for a result cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Database-specific type (e.g., "int8", "varchar", "TEXT")
    pub type_name: String,
    pub nullable: bool,
}

impl ColumnMetadata {
    /// Create new column metadata.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
        }
    }
}

/// What a DataSet was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSetKind {
    /// Rows read from a result cursor
    Rows,
    /// One update count; `total` is the running total across the execution
    UpdateCount { affected: i64, total: i64 },
    /// Synthetic name/value table of output parameters
    Parameters,
}

/// One yielded unit of query output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    /// Optional caption, e.g. "Cursor rc" or "Parameters"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub kind: DataSetKind,
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<Vec<Value>>,
    /// True when the cursor had more rows than the row limit
    pub truncated: bool,
}

impl DataSet {
    /// Create a tabular DataSet from cursor rows.
    pub fn rows(columns: Vec<ColumnMetadata>, rows: Vec<Vec<Value>>, truncated: bool) -> Self {
        Self {
            caption: None,
            kind: DataSetKind::Rows,
            columns,
            rows,
            truncated,
        }
    }

    /// Create a DataSet describing one update count.
    pub fn update_count(affected: i64, total: i64) -> Self {
        Self {
            caption: None,
            kind: DataSetKind::UpdateCount { affected, total },
            columns: vec![ColumnMetadata::new("Rows affected", "int8", false)],
            rows: vec![vec![Value::Int(affected)]],
            truncated: false,
        }
    }

    /// Create the synthetic output-parameter table.
    pub fn parameters(rows: Vec<(String, Value)>) -> Self {
        Self {
            caption: Some("Parameters".to_string()),
            kind: DataSetKind::Parameters,
            columns: vec![
                ColumnMetadata::new("Parameter", "text", false),
                ColumnMetadata::new("Value", "text", true),
            ],
            rows: rows
                .into_iter()
                .map(|(name, value)| vec![Value::String(name), value])
                .collect(),
            truncated: false,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Number of rows affected, if this DataSet is an update count.
    pub fn affected_rows(&self) -> Option<i64> {
        match self.kind {
            DataSetKind::UpdateCount { affected, .. } => Some(affected),
            _ => None,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_count_dataset() {
        let ds = DataSet::update_count(7, 7);
        assert_eq!(ds.affected_rows(), Some(7));
        assert_eq!(ds.row_count(), 1);
        assert_eq!(ds.rows[0][0], Value::Int(7));
    }

    #[test]
    fn test_parameters_dataset() {
        let ds = DataSet::parameters(vec![
            ("total".to_string(), Value::Int(3)),
            ("name".to_string(), Value::Null),
        ]);
        assert_eq!(ds.caption.as_deref(), Some("Parameters"));
        assert_eq!(ds.columns.len(), 2);
        assert_eq!(ds.rows[1], vec![Value::String("name".into()), Value::Null]);
        assert_eq!(ds.affected_rows(), None);
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_value(DataSetKind::UpdateCount {
            affected: 2,
            total: 5,
        })
        .unwrap();
        assert_eq!(json["type"], "update_count");
        assert_eq!(json["total"], 5);
    }
}
