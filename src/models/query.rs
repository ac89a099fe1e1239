//! Query-related data models.
//!
//! This module defines the statement handed to an execution, its named
//! bind variables, and the scalar values that flow in and out of drivers.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default row limit for result cursors.
pub const DEFAULT_MAX_ROWS: usize = 100;

/// Maximum allowed row limit.
pub const MAX_ROW_LIMIT: usize = 100_000;

/// A scalar value bound to, or read back from, a statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    /// Typed temporal values, bound with their SQL type
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::DateTime(_) => "datetime",
        }
    }

    /// Render the value as display text; NULL renders as `None`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(v) => Some(v.to_string()),
            Self::Int(v) => Some(v.to_string()),
            Self::Float(v) => Some(v.to_string()),
            Self::String(v) => Some(v.clone()),
            Self::Bytes(v) => Some(String::from_utf8_lossy(v).into_owned()),
            Self::Date(v) => Some(v.to_string()),
            Self::Time(v) => Some(v.to_string()),
            Self::DateTime(v) => Some(v.to_string()),
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Declared kind of a statement, as reported by whoever parsed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    #[default]
    Unknown,
    Select,
    Ddl,
    Dml,
    /// Stored code: procedure calls and anonymous blocks
    Code,
}

impl QueryKind {
    /// Parse a kind name as accepted on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "unknown" => Some(Self::Unknown),
            "select" => Some(Self::Select),
            "ddl" => Some(Self::Ddl),
            "dml" => Some(Self::Dml),
            "code" => Some(Self::Code),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Select => "select",
            Self::Ddl => "ddl",
            Self::Dml => "dml",
            Self::Code => "code",
        };
        f.write_str(name)
    }
}

/// Data kind of a named parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Integer,
    Decimal,
    #[default]
    String,
    Date,
    Time,
    DateTime,
    /// Output parameter that yields a result cursor
    Cursor,
}

impl ParamKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => Some(Self::Integer),
            "decimal" | "float" | "double" => Some(Self::Decimal),
            "string" | "text" | "varchar" => Some(Self::String),
            "date" => Some(Self::Date),
            "time" => Some(Self::Time),
            "datetime" | "timestamp" => Some(Self::DateTime),
            "cursor" => Some(Self::Cursor),
            _ => None,
        }
    }
}

/// Direction of a named parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    In,
    Out,
    InOut,
}

impl Direction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "in" | "input" => Some(Self::In),
            "out" | "output" => Some(Self::Out),
            "inout" => Some(Self::InOut),
            _ => None,
        }
    }
}

/// A `:name` bind variable declared for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedParameter {
    pub name: String,
    pub kind: ParamKind,
    pub direction: Direction,
    /// Input value as entered; converted per `kind` when bound
    #[serde(default)]
    pub value: Option<String>,
    /// Optional conversion argument, e.g. a chrono format string for dates
    #[serde(default)]
    pub format: Option<String>,
}

impl NamedParameter {
    /// Create a parameter without a value.
    pub fn new(name: impl Into<String>, kind: ParamKind, direction: Direction) -> Self {
        Self {
            name: name.into(),
            kind,
            direction,
            value: None,
            format: None,
        }
    }

    /// Shorthand for an input parameter of the given kind and value.
    pub fn input(name: impl Into<String>, kind: ParamKind, value: impl Into<String>) -> Self {
        Self::new(name, kind, Direction::In).with_value(value)
    }

    /// Shorthand for an output parameter of the given kind.
    pub fn output(name: impl Into<String>, kind: ParamKind) -> Self {
        Self::new(name, kind, Direction::Out)
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn is_output(&self) -> bool {
        self.direction != Direction::In
    }

    pub fn is_input(&self) -> bool {
        self.direction != Direction::Out
    }

    pub fn is_cursor(&self) -> bool {
        self.kind == ParamKind::Cursor
    }
}

impl std::fmt::Display for NamedParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            ":{}[{:?} {:?}] = ",
            self.name, self.direction, self.kind
        )?;
        match &self.value {
            Some(value) => write!(f, "\"{}\"", value),
            None => f.write_str("null"),
        }
    }
}

/// One statement to execute, with its declared kind and named parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    pub sql: String,
    pub kind: QueryKind,
    /// 1-based line of the statement within its script; offsets error lines
    #[serde(default = "default_line_no")]
    pub line_no: usize,
    #[serde(default)]
    pub parameters: BTreeMap<String, NamedParameter>,
}

fn default_line_no() -> usize {
    1
}

impl Query {
    /// Create a new query with no parameters.
    pub fn new(sql: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            sql: sql.into(),
            kind,
            line_no: 1,
            parameters: BTreeMap::new(),
        }
    }

    /// Declare a named parameter.
    pub fn with_parameter(mut self, parameter: NamedParameter) -> Self {
        self.parameters.insert(parameter.name.clone(), parameter);
        self
    }

    /// Set the starting line number.
    pub fn with_line_no(mut self, line_no: usize) -> Self {
        self.line_no = line_no.max(1);
        self
    }

    pub fn has_parameters(&self) -> bool {
        !self.parameters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_types() {
        assert!(Value::Null.is_null());
        assert!(!Value::Bool(true).is_null());
        assert_eq!(Value::Int(42).type_name(), "int");
        assert_eq!(Value::String("hello".to_string()).type_name(), "string");
        assert_eq!(Value::Int(7).as_text().as_deref(), Some("7"));
        assert_eq!(Value::Null.as_text(), None);
    }

    #[test]
    fn test_temporal_values_render_as_sql_text() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let value = Value::DateTime(date.and_hms_opt(3, 4, 5).unwrap());
        assert_eq!(value.type_name(), "datetime");
        assert_eq!(value.as_text().as_deref(), Some("2024-02-29 03:04:05"));
        assert_eq!(Value::Date(date).as_text().as_deref(), Some("2024-02-29"));
        assert_eq!(
            serde_json::to_string(&Value::Date(date)).unwrap(),
            "\"2024-02-29\""
        );
    }

    #[test]
    fn test_value_bytes_serialize_as_base64() {
        let json = serde_json::to_string(&Value::Bytes(b"hi".to_vec())).unwrap();
        assert_eq!(json, "\"aGk=\"");
    }

    #[test]
    fn test_parameter_directions() {
        let p = NamedParameter::input("id", ParamKind::Integer, "5");
        assert!(p.is_input());
        assert!(!p.is_output());

        let p = NamedParameter::new("total", ParamKind::Decimal, Direction::InOut);
        assert!(p.is_input());
        assert!(p.is_output());

        let p = NamedParameter::output("rc", ParamKind::Cursor);
        assert!(p.is_cursor());
        assert!(!p.is_input());
    }

    #[test]
    fn test_query_builder() {
        let query = Query::new("SELECT * FROM t WHERE id = :id", QueryKind::Select)
            .with_parameter(NamedParameter::input("id", ParamKind::Integer, "1"))
            .with_line_no(0);
        assert!(query.has_parameters());
        assert_eq!(query.line_no, 1);
        assert!(query.parameters.contains_key("id"));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(QueryKind::from_name("DDL"), Some(QueryKind::Ddl));
        assert_eq!(QueryKind::from_name("bogus"), None);
        assert_eq!(ParamKind::from_name("timestamp"), Some(ParamKind::DateTime));
        assert_eq!(Direction::from_name("INOUT"), Some(Direction::InOut));
    }

    #[test]
    fn test_parameter_display() {
        let p = NamedParameter::input("id", ParamKind::Integer, "5");
        assert_eq!(p.to_string(), ":id[In Integer] = \"5\"");
    }
}
