use std::sync::Arc;

use tokio_postgres::{Column, Row};
use tokio_postgres::types::{FromSql, Type};

use crate::bail;
use crate::conversions::numeric::PgNumeric;
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::types::{Cell, ColumnSchema, RowSchema, TableRow};

/// Returns `true` if values of `typ` can be converted into a [`Cell`].
pub fn is_supported_type(typ: &Type) -> bool {
    matches!(
        *typ,
        Type::BOOL
            | Type::INT2
            | Type::INT4
            | Type::INT8
            | Type::OID
            | Type::FLOAT4
            | Type::FLOAT8
            | Type::NUMERIC
            | Type::TEXT
            | Type::VARCHAR
            | Type::BPCHAR
            | Type::NAME
            | Type::DATE
            | Type::TIME
            | Type::TIMESTAMP
            | Type::TIMESTAMPTZ
            | Type::UUID
            | Type::JSON
            | Type::JSONB
            | Type::BYTEA
    )
}

/// Builds the [`RowSchema`] of a result set from the column metadata of its statement.
///
/// Fails with [`ErrorKind::ConversionError`] when a column has a type rows cannot carry.
pub fn row_schema_from_columns(columns: &[Column]) -> EtlResult<RowSchema> {
    let columns = columns
        .iter()
        .map(|column| {
            if !is_supported_type(column.type_()) {
                bail!(
                    ErrorKind::ConversionError,
                    "Unsupported column type",
                    format!(
                        "column `{}` has type `{}`",
                        column.name(),
                        column.type_().name()
                    )
                );
            }

            Ok(ColumnSchema::new(column.name(), column.type_().clone()))
        })
        .collect::<EtlResult<Vec<_>>>()?;

    RowSchema::new(columns)
}

/// Converts a driver [`Row`] into a [`TableRow`] laid out like `schema`.
pub fn table_row_from_row(schema: &Arc<RowSchema>, row: &Row) -> EtlResult<TableRow> {
    let values = schema
        .columns()
        .iter()
        .enumerate()
        .map(|(i, column)| cell_from_row(row, i, column))
        .collect::<EtlResult<Vec<_>>>()?;

    Ok(TableRow::new(values))
}

fn cell_from_row(row: &Row, i: usize, column: &ColumnSchema) -> EtlResult<Cell> {
    let cell = match column.typ {
        Type::BOOL => get::<bool>(row, i, column)?.map(Cell::Bool),
        Type::INT2 => get::<i16>(row, i, column)?.map(Cell::I16),
        Type::INT4 => get::<i32>(row, i, column)?.map(Cell::I32),
        Type::INT8 => get::<i64>(row, i, column)?.map(Cell::I64),
        Type::OID => get::<u32>(row, i, column)?.map(Cell::U32),
        Type::FLOAT4 => get::<f32>(row, i, column)?.map(Cell::F32),
        Type::FLOAT8 => get::<f64>(row, i, column)?.map(Cell::F64),
        Type::NUMERIC => get::<PgNumeric>(row, i, column)?.map(Cell::Numeric),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            get::<String>(row, i, column)?.map(Cell::String)
        }
        Type::DATE => get(row, i, column)?.map(Cell::Date),
        Type::TIME => get(row, i, column)?.map(Cell::Time),
        Type::TIMESTAMP => get(row, i, column)?.map(Cell::Timestamp),
        Type::TIMESTAMPTZ => get(row, i, column)?.map(Cell::TimestampTz),
        Type::UUID => get(row, i, column)?.map(Cell::Uuid),
        Type::JSON | Type::JSONB => get(row, i, column)?.map(Cell::Json),
        Type::BYTEA => get::<Vec<u8>>(row, i, column)?.map(Cell::Bytes),
        ref other => bail!(
            ErrorKind::ConversionError,
            "Unsupported column type",
            format!("column `{}` has type `{}`", column.name, other.name())
        ),
    };

    Ok(cell.unwrap_or(Cell::Null))
}

fn get<'a, T>(row: &'a Row, i: usize, column: &ColumnSchema) -> EtlResult<Option<T>>
where
    T: FromSql<'a>,
{
    row.try_get::<_, Option<T>>(i).map_err(|err| -> EtlError {
        etl_error!(
            ErrorKind::ConversionError,
            "Failed to decode column value",
            format!("column `{}` of type `{}`: {err}", column.name, column.typ.name()),
            source: err
        )
    })
}
