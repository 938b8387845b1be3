use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_postgres::types::Type;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::Cell;

/// Name and Postgres type of a single column.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ColumnSchema {
    /// The name of the column.
    pub name: String,
    /// The Postgres data type of the column.
    pub typ: Type,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, typ: Type) -> ColumnSchema {
        Self {
            name: name.into(),
            typ,
        }
    }
}

/// Ordered list of columns shared by every row of a [`RowBatch`].
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RowSchema {
    columns: Vec<ColumnSchema>,
}

impl RowSchema {
    /// Creates a schema from its columns.
    ///
    /// Fails with [`ErrorKind::InvalidData`] if a column name appears twice.
    pub fn new(columns: Vec<ColumnSchema>) -> EtlResult<RowSchema> {
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                bail!(
                    ErrorKind::InvalidData,
                    "Duplicate column in row schema",
                    format!("column `{}` appears more than once", column.name)
                );
            }
        }

        Ok(Self { columns })
    }

    /// Returns the columns in order.
    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    /// Returns the column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Returns the position of `name`, if the schema has such a column.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A row of column values ordered like the [`RowSchema`] of its batch.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    values: Vec<Cell>,
}

impl TableRow {
    pub fn new(values: Vec<Cell>) -> Self {
        Self { values }
    }

    /// Returns the row values in column order.
    pub fn values(&self) -> &[Cell] {
        &self.values
    }

    /// Consumes the row and returns its values in column order.
    pub fn into_values(self) -> Vec<Cell> {
        self.values
    }
}

/// A set of rows sharing one [`RowSchema`].
///
/// Every row is guaranteed to have exactly one value per schema column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    schema: Arc<RowSchema>,
    rows: Vec<TableRow>,
}

impl RowBatch {
    /// Creates a batch, checking that every row matches the schema's arity.
    pub fn new(schema: Arc<RowSchema>, rows: Vec<TableRow>) -> EtlResult<RowBatch> {
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.values().len() != schema.len())
        {
            bail!(
                ErrorKind::InvalidData,
                "Row does not match the batch schema",
                format!(
                    "row {index} has {} values but the schema has {} columns",
                    row.values().len(),
                    schema.len()
                )
            );
        }

        Ok(Self { schema, rows })
    }

    /// Creates an empty batch.
    pub fn empty(schema: Arc<RowSchema>) -> RowBatch {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Creates a batch from records of `(column, value)` pairs.
    ///
    /// The column order of the first record becomes the schema; later records may list the same
    /// columns in any order and are reordered to match. A record with a different column set is
    /// rejected with [`ErrorKind::InvalidData`]. Column types are taken from the non-null values
    /// of each column, falling back to `text`; a column mixing value types is rejected as well.
    pub fn from_records<I>(records: I) -> EtlResult<RowBatch>
    where
        I: IntoIterator<Item = Vec<(String, Cell)>>,
    {
        let mut records = records.into_iter();
        let Some(first) = records.next() else {
            return Ok(RowBatch::default());
        };

        let names: Vec<String> = first.iter().map(|(name, _)| name.clone()).collect();
        let positions: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        if positions.len() != names.len() {
            bail!(
                ErrorKind::InvalidData,
                "Duplicate column in record",
                "the first record lists a column more than once"
            );
        }

        let mut rows = vec![TableRow::new(first.into_iter().map(|(_, v)| v).collect())];
        for (index, record) in records.enumerate() {
            let mut values = vec![None; names.len()];
            for (name, value) in record {
                match positions.get(name.as_str()) {
                    Some(&i) if values[i].is_none() => values[i] = Some(value),
                    _ => bail!(
                        ErrorKind::InvalidData,
                        "Heterogeneous record shape",
                        format!(
                            "record {} has column `{name}` which does not match the columns of the first record",
                            index + 1
                        )
                    ),
                }
            }

            let values: Option<Vec<Cell>> = values.into_iter().collect();
            let Some(values) = values else {
                bail!(
                    ErrorKind::InvalidData,
                    "Heterogeneous record shape",
                    format!(
                        "record {} is missing columns of the first record",
                        index + 1
                    )
                );
            };
            rows.push(TableRow::new(values));
        }

        let mut columns = Vec::with_capacity(names.len());
        for (i, name) in names.into_iter().enumerate() {
            let mut column_type: Option<Type> = None;
            for (row_index, row) in rows.iter().enumerate() {
                let Some(typ) = row.values()[i].pg_type() else {
                    continue;
                };
                match &column_type {
                    None => column_type = Some(typ),
                    Some(expected) if *expected != typ => bail!(
                        ErrorKind::InvalidData,
                        "Heterogeneous column types",
                        format!(
                            "record {row_index} holds a `{}` value in column `{name}` which holds `{}` values",
                            typ.name(),
                            expected.name()
                        )
                    ),
                    Some(_) => {}
                }
            }

            columns.push(ColumnSchema::new(name, column_type.unwrap_or(Type::TEXT)));
        }

        RowBatch::new(Arc::new(RowSchema::new(columns)?), rows)
    }

    pub fn schema(&self) -> &Arc<RowSchema> {
        &self.schema
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<TableRow> {
        self.rows
    }

    /// Appends the rows of `other`.
    ///
    /// An empty batch takes over the schema of the batch appended to it. Otherwise both
    /// schemas must be equal.
    pub fn append(&mut self, other: RowBatch) -> EtlResult<()> {
        if self.rows.is_empty() && self.schema.is_empty() {
            *self = other;
            return Ok(());
        }

        if other.is_empty() {
            return Ok(());
        }

        if self.schema != other.schema {
            bail!(
                ErrorKind::InvalidData,
                "Cannot append rows with a different schema"
            );
        }

        self.rows.extend(other.rows);

        Ok(())
    }

    /// Splits the batch into batches of at most `size` rows sharing this schema.
    ///
    /// A `size` of zero is treated as one.
    pub fn chunks(&self, size: usize) -> impl Iterator<Item = RowBatch> + '_ {
        self.rows.chunks(size.max(1)).map(|rows| RowBatch {
            schema: self.schema.clone(),
            rows: rows.to_vec(),
        })
    }

    /// Returns the largest point in time held by `column`, ignoring nulls.
    ///
    /// Returns `None` when the column is missing, holds no timestamps, or the batch is empty.
    pub fn max_timestamp(&self, column: &str) -> Option<DateTime<Utc>> {
        let index = self.schema.index_of(column)?;

        self.rows
            .iter()
            .filter_map(|row| row.values()[index].as_timestamp())
            .max()
    }
}
