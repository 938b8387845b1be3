use std::error::Error;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use uuid::Uuid;

use crate::conversions::numeric::PgNumeric;

/// A single typed column value.
///
/// Cells carry no column name or declared type; both live in the [`crate::types::RowSchema`]
/// shared by every row of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    String(String),
    I16(i16),
    I32(i32),
    U32(u32),
    I64(i64),
    F32(f32),
    F64(f64),
    Numeric(PgNumeric),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl Cell {
    /// Returns `true` if the cell is [`Cell::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Returns the Postgres type a value of this variant is naturally stored as.
    pub fn pg_type(&self) -> Option<Type> {
        let typ = match self {
            Cell::Null => return None,
            Cell::Bool(_) => Type::BOOL,
            Cell::String(_) => Type::TEXT,
            Cell::I16(_) => Type::INT2,
            Cell::I32(_) => Type::INT4,
            Cell::U32(_) => Type::OID,
            Cell::I64(_) => Type::INT8,
            Cell::F32(_) => Type::FLOAT4,
            Cell::F64(_) => Type::FLOAT8,
            Cell::Numeric(_) => Type::NUMERIC,
            Cell::Date(_) => Type::DATE,
            Cell::Time(_) => Type::TIME,
            Cell::Timestamp(_) => Type::TIMESTAMP,
            Cell::TimestampTz(_) => Type::TIMESTAMPTZ,
            Cell::Uuid(_) => Type::UUID,
            Cell::Json(_) => Type::JSONB,
            Cell::Bytes(_) => Type::BYTEA,
        };

        Some(typ)
    }

    /// Returns the cell as a point in time, if it holds one.
    ///
    /// `timestamp` values are interpreted as UTC, matching the session time zone of every
    /// connection the pipeline opens.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Cell::TimestampTz(value) => Some(*value),
            Cell::Timestamp(value) => Some(value.and_utc()),
            _ => None,
        }
    }
}

/// Encodes the cell by delegating to the wrapped value's encoder.
///
/// The statement is expected to declare each parameter with the type of its column, so a cell
/// whose variant does not match the declared type fails with a `WrongType` error instead of
/// sending bytes the server would misinterpret. [`Cell::Numeric`] is sent as text.
impl ToSql for Cell {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Cell::Null => Ok(IsNull::Yes),
            Cell::Bool(value) => value.to_sql_checked(ty, out),
            Cell::String(value) => value.to_sql_checked(ty, out),
            Cell::I16(value) => value.to_sql_checked(ty, out),
            Cell::I32(value) => value.to_sql_checked(ty, out),
            Cell::U32(value) => value.to_sql_checked(ty, out),
            Cell::I64(value) => value.to_sql_checked(ty, out),
            Cell::F32(value) => value.to_sql_checked(ty, out),
            Cell::F64(value) => value.to_sql_checked(ty, out),
            Cell::Numeric(value) => value.to_string().to_sql_checked(ty, out),
            Cell::Date(value) => value.to_sql_checked(ty, out),
            Cell::Time(value) => value.to_sql_checked(ty, out),
            Cell::Timestamp(value) => value.to_sql_checked(ty, out),
            Cell::TimestampTz(value) => value.to_sql_checked(ty, out),
            Cell::Uuid(value) => value.to_sql_checked(ty, out),
            Cell::Json(value) => value.to_sql_checked(ty, out),
            Cell::Bytes(value) => value.to_sql_checked(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::String(value)
    }
}

impl From<i32> for Cell {
    fn from(value: i32) -> Self {
        Cell::I32(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::I64(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::F64(value)
    }
}

impl From<PgNumeric> for Cell {
    fn from(value: PgNumeric) -> Self {
        Cell::Numeric(value)
    }
}

impl From<DateTime<Utc>> for Cell {
    fn from(value: DateTime<Utc>) -> Self {
        Cell::TimestampTz(value)
    }
}

impl From<NaiveDateTime> for Cell {
    fn from(value: NaiveDateTime) -> Self {
        Cell::Timestamp(value)
    }
}

impl From<Uuid> for Cell {
    fn from(value: Uuid) -> Self {
        Cell::Uuid(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map_or(Cell::Null, Into::into)
    }
}
