//! The outcome of a pipeline run.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every table was processed without errors.
    Success,
    /// Some tables failed but at least one row was loaded.
    Partial,
    /// The run could not start, or every table that had rows failed.
    Failed,
}

/// Status of a single table within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    Skipped,
    Success,
    Error,
}

/// What happened to one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableOutcome {
    pub status: TableStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_extracted: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_loaded: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableOutcome {
    /// The table had no new rows.
    pub fn skipped() -> Self {
        Self {
            status: TableStatus::Skipped,
            rows_extracted: Some(0),
            rows_loaded: Some(0),
            error: None,
        }
    }

    pub fn success(rows_extracted: u64, rows_loaded: u64) -> Self {
        Self {
            status: TableStatus::Success,
            rows_extracted: Some(rows_extracted),
            rows_loaded: Some(rows_loaded),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            status: TableStatus::Error,
            rows_extracted: None,
            rows_loaded: None,
            error: Some(error.into()),
        }
    }
}

/// Per-table outcomes in processing order, serialized as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableOutcomes(Vec<(String, TableOutcome)>);

impl TableOutcomes {
    /// Returns the outcome of `table_name`.
    pub fn get(&self, table_name: &str) -> Option<&TableOutcome> {
        self.0
            .iter()
            .find(|(name, _)| name == table_name)
            .map(|(_, outcome)| outcome)
    }

    /// Iterates over the outcomes in processing order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TableOutcome)> {
        self.0.iter().map(|(name, outcome)| (name.as_str(), outcome))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Records the outcome of `table_name`, replacing an earlier one in place.
    fn insert(&mut self, table_name: &str, outcome: TableOutcome) {
        match self.0.iter_mut().find(|(name, _)| name == table_name) {
            Some((_, existing)) => *existing = outcome,
            None => self.0.push((table_name.to_string(), outcome)),
        }
    }
}

impl Serialize for TableOutcomes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, outcome) in &self.0 {
            map.serialize_entry(name, outcome)?;
        }
        map.end()
    }
}

/// Summary of one pipeline run.
///
/// Produced by [`RunReportBuilder::finish`] and not modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    status: RunStatus,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    tables: TableOutcomes,
    total_rows: u64,
    errors: Vec<String>,
}

impl RunReport {
    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    pub fn tables(&self) -> &TableOutcomes {
        &self.tables
    }

    /// Returns the number of rows loaded across all tables.
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Returns whether the run succeeded for every table.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Accumulates the outcome of a run while it progresses.
#[derive(Debug)]
pub struct RunReportBuilder {
    started_at: DateTime<Utc>,
    tables: TableOutcomes,
    total_rows: u64,
    errors: Vec<String>,
    failed: bool,
}

impl RunReportBuilder {
    /// Starts a report at the current time.
    pub fn start() -> Self {
        Self::start_at(Utc::now())
    }

    pub fn start_at(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            tables: TableOutcomes::default(),
            total_rows: 0,
            errors: Vec::new(),
            failed: false,
        }
    }

    /// Records a skipped table.
    pub fn table_skipped(&mut self, table_name: &str) {
        self.tables.insert(table_name, TableOutcome::skipped());
    }

    /// Records a successfully loaded table and adds its rows to the total.
    pub fn table_succeeded(&mut self, table_name: &str, rows_extracted: u64, rows_loaded: u64) {
        self.tables
            .insert(table_name, TableOutcome::success(rows_extracted, rows_loaded));
        self.total_rows += rows_loaded;
    }

    /// Records a failed table and the matching run error.
    pub fn table_failed(&mut self, table_name: &str, error: impl ToString) {
        let error = error.to_string();
        self.errors
            .push(format!("Error processing table {table_name}: {error}"));
        self.tables.insert(table_name, TableOutcome::error(error));
    }

    /// Records an error that stopped the whole run.
    pub fn run_failed(&mut self, error: impl ToString) {
        self.errors
            .push(format!("ETL process failed: {}", error.to_string()));
        self.failed = true;
    }

    /// Completes the report at the current time.
    pub fn finish(self) -> RunReport {
        self.finish_at(Utc::now())
    }

    pub fn finish_at(self, completed_at: DateTime<Utc>) -> RunReport {
        let status = run_status(self.failed, !self.errors.is_empty(), self.total_rows);

        RunReport {
            status,
            started_at: self.started_at,
            completed_at,
            tables: self.tables,
            total_rows: self.total_rows,
            errors: self.errors,
        }
    }
}

/// Derives the status of a run.
///
/// A run that loaded rows despite table errors is partial. One that loaded nothing and had
/// errors is failed.
fn run_status(failed: bool, has_errors: bool, total_rows: u64) -> RunStatus {
    match (failed, has_errors) {
        (true, _) => RunStatus::Failed,
        (false, true) if total_rows > 0 => RunStatus::Partial,
        (false, true) => RunStatus::Failed,
        (false, false) => RunStatus::Success,
    }
}
