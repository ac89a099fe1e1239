//! Row decoding for the sqlx driver.
//!
//! This module maps database-specific column values onto the engine's
//! [`Value`] type.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! A value that cannot be decoded as its category falls back to text, and
//! to NULL when even that fails.

use crate::models::{ColumnMetadata, DatabaseType, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Date,
    Time,
    Timestamp,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // Before integers: "interval" contains "int"
    if lower == "interval" {
        return TypeCategory::Unknown;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.starts_with("timestamp") || lower == "datetime" {
        return TypeCategory::Timestamp;
    }
    if lower == "date" {
        return TypeCategory::Date;
    }
    if lower == "time" || lower == "timetz" {
        return TypeCategory::Time;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Row to Values Trait
// =============================================================================

/// Converts a driver row into engine values.
pub trait RowValues {
    fn values(&self) -> Vec<Value>;
    fn column_metadata(&self) -> Vec<ColumnMetadata>;
}

macro_rules! impl_row_values {
    ($row:ty, $db:expr, $decoder:path) => {
        impl RowValues for $row {
            fn values(&self) -> Vec<Value> {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let category = categorize_type(col.type_info().name(), $db);
                        $decoder(self, idx, category)
                    })
                    .collect()
            }

            fn column_metadata(&self) -> Vec<ColumnMetadata> {
                self.columns()
                    .iter()
                    .map(|col| {
                        ColumnMetadata::new(
                            col.name(),
                            col.type_info().name(),
                            !col.type_info().is_null(),
                        )
                    })
                    .collect()
            }
        }
    };
}

impl_row_values!(MySqlRow, DatabaseType::MySQL, mysql::decode_column);
impl_row_values!(PgRow, DatabaseType::PostgreSQL, postgres::decode_column);
impl_row_values!(SqliteRow, DatabaseType::SQLite, sqlite::decode_column);

// =============================================================================
// Database-Specific Decoders
// =============================================================================

/// Decode column `idx` as `T`; a decode error reads as NULL.
fn get<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    usize: sqlx::ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

fn is_null<R>(row: &R, idx: usize) -> bool
where
    R: Row,
    usize: sqlx::ColumnIndex<R>,
{
    row.try_get_raw(idx).map(|raw| raw.is_null()).unwrap_or(true)
}

fn or_null(value: Option<Value>) -> Value {
    value.unwrap_or(Value::Null)
}

/// Temporal values render in their canonical text form.
fn temporal<R>(row: &R, idx: usize) -> Option<Value>
where
    R: Row,
    usize: sqlx::ColumnIndex<R>,
    for<'r> NaiveDateTime: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> DateTime<Utc>: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> NaiveDate: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> NaiveTime: Decode<'r, R::Database> + Type<R::Database>,
{
    get::<_, NaiveDateTime>(row, idx)
        .map(|v| v.to_string())
        .or_else(|| get::<_, DateTime<Utc>>(row, idx).map(|v| v.to_rfc3339()))
        .or_else(|| get::<_, NaiveDate>(row, idx).map(|v| v.to_string()))
        .or_else(|| get::<_, NaiveTime>(row, idx).map(|v| v.to_string()))
        .map(Value::String)
}

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Value {
        if is_null(row, idx) {
            return Value::Null;
        }
        let value = match category {
            TypeCategory::Decimal => decimal(row, idx),
            TypeCategory::Integer => integer(row, idx),
            TypeCategory::Boolean => get(row, idx).map(Value::Bool),
            TypeCategory::Float => get::<_, f64>(row, idx)
                .or_else(|| get::<_, f32>(row, idx).map(f64::from))
                .map(Value::Float),
            TypeCategory::Binary => get(row, idx).map(Value::Bytes),
            TypeCategory::Json => {
                get::<_, serde_json::Value>(row, idx).map(|v| Value::String(v.to_string()))
            }
            TypeCategory::Date | TypeCategory::Time | TypeCategory::Timestamp => {
                temporal(row, idx)
            }
            _ => None,
        };
        or_null(value.or_else(|| get(row, idx).map(Value::String)))
    }

    fn decimal(row: &MySqlRow, idx: usize) -> Option<Value> {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(v) => v.map(|v| Value::String(v.0)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to decode DECIMAL");
                None
            }
        }
    }

    /// MySQL integers come in every width, signed and unsigned.
    fn integer(row: &MySqlRow, idx: usize) -> Option<Value> {
        get::<_, i64>(row, idx)
            .or_else(|| get::<_, i32>(row, idx).map(i64::from))
            .or_else(|| get::<_, i16>(row, idx).map(i64::from))
            .or_else(|| get::<_, i8>(row, idx).map(i64::from))
            .or_else(|| get::<_, u32>(row, idx).map(i64::from))
            .or_else(|| get::<_, u16>(row, idx).map(i64::from))
            .or_else(|| get::<_, u8>(row, idx).map(i64::from))
            .map(Value::Int)
            .or_else(|| {
                // Beyond i64 range keeps its digits as text
                get::<_, u64>(row, idx).map(|v| {
                    i64::try_from(v)
                        .map(Value::Int)
                        .unwrap_or_else(|_| Value::String(v.to_string()))
                })
            })
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> Value {
        if is_null(row, idx) {
            return Value::Null;
        }
        let value = match category {
            TypeCategory::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
                Ok(v) => v.map(|v| Value::String(v.0)),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to decode NUMERIC");
                    None
                }
            },
            TypeCategory::Integer => get::<_, i64>(row, idx)
                .or_else(|| get::<_, i32>(row, idx).map(i64::from))
                .or_else(|| get::<_, i16>(row, idx).map(i64::from))
                .map(Value::Int),
            TypeCategory::Boolean => get(row, idx).map(Value::Bool),
            TypeCategory::Float => get::<_, f64>(row, idx)
                .or_else(|| get::<_, f32>(row, idx).map(f64::from))
                .map(Value::Float),
            TypeCategory::Binary => get(row, idx).map(Value::Bytes),
            TypeCategory::Json => {
                get::<_, serde_json::Value>(row, idx).map(|v| Value::String(v.to_string()))
            }
            TypeCategory::Uuid => uuid(row, idx),
            TypeCategory::Date | TypeCategory::Time | TypeCategory::Timestamp => {
                temporal(row, idx)
            }
            _ => None,
        };
        or_null(value.or_else(|| get(row, idx).map(Value::String)))
    }

    /// Binary results carry the 16 uuid bytes, text results the hyphenated form.
    fn uuid(row: &PgRow, idx: usize) -> Option<Value> {
        let raw = row.try_get_raw(idx).ok()?;
        if let Ok(Ok(id)) = raw.as_bytes().map(uuid::Uuid::from_slice) {
            return Some(Value::String(id.to_string()));
        }
        raw.as_str().ok().map(|s| Value::String(s.to_string()))
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> Value {
        let value = match category {
            TypeCategory::Integer => get(row, idx).map(Value::Int),
            TypeCategory::Boolean => get(row, idx).map(Value::Bool),
            TypeCategory::Float | TypeCategory::Decimal => get(row, idx).map(Value::Float),
            TypeCategory::Binary => get(row, idx).map(Value::Bytes),
            // Expression columns ("NULL", or no declared type) are typed per value
            TypeCategory::Unknown => get(row, idx)
                .map(Value::Int)
                .or_else(|| get(row, idx).map(Value::Float))
                .or_else(|| get(row, idx).map(Value::String))
                .or_else(|| get(row, idx).map(Value::Bytes)),
            _ => get(row, idx).map(Value::String),
        };
        or_null(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INTEGER", DatabaseType::SQLite),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("int8", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("TINYINT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::PostgreSQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(
            categorize_type("timestamptz", DatabaseType::PostgreSQL),
            TypeCategory::Timestamp
        );
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::MySQL),
            TypeCategory::Timestamp
        );
        assert_eq!(
            categorize_type("date", DatabaseType::PostgreSQL),
            TypeCategory::Date
        );
        assert_eq!(
            categorize_type("interval", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_categorize_type_text_and_unknown() {
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySQL),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("NULL", DatabaseType::SQLite),
            TypeCategory::Unknown
        );
    }
}
