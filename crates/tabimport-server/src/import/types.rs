//! Core types for the chunked import pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identity of the actor who started an import
pub type OwnerId = Uuid;

/// Free-form options passed through to the row importer unchanged
pub type ImportOptions = serde_json::Map<String, serde_json::Value>;

/// Scalar cell value extracted from a spreadsheet-like source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Null or a string containing only whitespace
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Display form stored in failure snapshots; `None` for null cells
    pub fn to_display_string(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Bool(b) => Some(b.to_string()),
            CellValue::Integer(i) => Some(i.to_string()),
            CellValue::Float(f) => Some(f.to_string()),
            CellValue::String(s) => Some(s.clone()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::String(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::String(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Integer(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Float(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Null)
    }
}

/// One extracted source row, keyed by source column
pub type Row = BTreeMap<String, CellValue>;

/// One row after column mapping, keyed by target field
pub type MappedRow = BTreeMap<String, CellValue>;

/// Mapping from target field to source column key (or unmapped)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMap(BTreeMap<String, Option<String>>);

impl ColumnMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `field` to the source column `column`
    pub fn map(mut self, field: impl Into<String>, column: impl Into<String>) -> Self {
        self.0.insert(field.into(), Some(column.into()));
        self
    }

    /// Declare `field` without a source column
    pub fn unmapped(mut self, field: impl Into<String>) -> Self {
        self.0.insert(field.into(), None);
        self
    }

    /// Source column configured for `field`, ignoring blank entries
    pub fn source_for(&self, field: &str) -> Option<&str> {
        self.0
            .get(field)
            .and_then(|c| c.as_deref())
            .filter(|c| !c.trim().is_empty())
    }

    pub fn is_mapped(&self, field: &str) -> bool {
        self.source_for(field).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(f, c)| (f.as_str(), c.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Translate a source row into target fields.
    ///
    /// Fields whose source column is blank or unset are left out entirely.
    /// A mapped column missing from the row yields a null value.
    pub fn apply(&self, row: &Row) -> MappedRow {
        self.0
            .keys()
            .filter_map(|field| {
                let column = self.source_for(field)?;
                let value = row.get(column).cloned().unwrap_or(CellValue::Null);
                Some((field.clone(), value))
            })
            .collect()
    }
}

impl FromIterator<(String, Option<String>)> for ColumnMap {
    fn from_iter<I: IntoIterator<Item = (String, Option<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Field-level validation messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn with(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.add(field, message);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn messages_for(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn message_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl fmt::Display for ValidationErrors {
    /// First message, followed by a count of the remaining ones
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(first) = self.0.values().flatten().next() else {
            return write!(f, "The given data was invalid.");
        };
        write!(f, "{}", first)?;
        match self.message_count() - 1 {
            0 => Ok(()),
            1 => write!(f, " (and 1 more error)"),
            n => write!(f, " (and {} more errors)", n),
        }
    }
}

/// Import job record (maps to import_jobs table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub file_name: String,
    pub file_path: String,
    /// Name of the registered row importer
    pub importer: String,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub imported_rows: u64,
    pub failed_rows: u64,
    pub user_id: Option<OwnerId>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportJob {
    /// Percentage of rows processed so far
    pub fn progress_percentage(&self) -> f64 {
        if self.total_rows == 0 {
            return 0.0;
        }
        (self.processed_rows as f64 / self.total_rows as f64) * 100.0
    }

    /// True once at least one row was processed and every row has been seen
    pub fn is_fully_processed(&self) -> bool {
        self.processed_rows > 0 && self.processed_rows >= self.total_rows
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Parameters for creating a new import job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewImportJob {
    pub file_name: String,
    pub file_path: String,
    pub importer: String,
    pub total_rows: u64,
    pub user_id: Option<OwnerId>,
}

/// Snapshot of a mapped row: stringified values, nulls preserved
pub type RowSnapshot = BTreeMap<String, Option<String>>;

pub fn snapshot_row(row: &MappedRow) -> RowSnapshot {
    row.iter()
        .map(|(field, value)| (field.clone(), value.to_display_string()))
        .collect()
}

/// Failed import row (maps to failed_import_rows table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedImportRow {
    pub id: Uuid,
    pub import_id: Uuid,
    pub data: RowSnapshot,
    pub validation_error: Option<ValidationErrors>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for recording a failed row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFailedImportRow {
    pub import_id: Uuid,
    pub data: RowSnapshot,
    pub validation_error: Option<ValidationErrors>,
    pub error: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, CellValue)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_cell_value_deserializes_scalars() {
        let values: Vec<CellValue> =
            serde_json::from_str(r#"[null, true, 42, 1.5, "text"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                CellValue::Null,
                CellValue::Bool(true),
                CellValue::Integer(42),
                CellValue::Float(1.5),
                CellValue::String("text".to_string()),
            ]
        );
    }

    #[test]
    fn test_display_string() {
        assert_eq!(CellValue::Null.to_display_string(), None);
        assert_eq!(CellValue::Integer(7).to_display_string().as_deref(), Some("7"));
        assert_eq!(CellValue::Float(2.5).to_display_string().as_deref(), Some("2.5"));
        assert_eq!(CellValue::Float(3.0).to_display_string().as_deref(), Some("3"));
        assert_eq!(CellValue::from("x").to_display_string().as_deref(), Some("x"));
    }

    #[test]
    fn test_column_map_skips_blank_sources() {
        let map = ColumnMap::new()
            .map("name", "Full Name")
            .map("email", "  ")
            .unmapped("phone")
            .map("city", "City");

        let source = row(&[
            ("Full Name", CellValue::from("Ada")),
            ("Email", CellValue::from("ada@example.com")),
        ]);
        let mapped = map.apply(&source);

        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped.get("name"), Some(&CellValue::from("Ada")));
        // Mapped but absent in the row -> null, not skipped
        assert_eq!(mapped.get("city"), Some(&CellValue::Null));
        assert!(!mapped.contains_key("email"));
        assert!(!mapped.contains_key("phone"));
    }

    #[test]
    fn test_column_map_deserializes_nulls() {
        let map: ColumnMap =
            serde_json::from_str(r#"{"name": "A", "email": null}"#).unwrap();
        assert!(map.is_mapped("name"));
        assert!(!map.is_mapped("email"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_validation_errors_display() {
        let single = ValidationErrors::new().with("email", "The email field is required.");
        assert_eq!(single.to_string(), "The email field is required.");

        let many = single
            .clone()
            .with("password", "The password must be at least 8 characters.")
            .with("password", "The password must be a string.");
        assert_eq!(
            many.to_string(),
            "The email field is required. (and 2 more errors)"
        );
        assert_eq!(many.messages_for("password").len(), 2);
        assert_eq!(ValidationErrors::new().to_string(), "The given data was invalid.");
    }

    #[test]
    fn test_snapshot_preserves_nulls() {
        let mapped = row(&[
            ("name", CellValue::from("Bob")),
            ("age", CellValue::Integer(31)),
            ("note", CellValue::Null),
        ]);
        let snapshot = snapshot_row(&mapped);
        assert_eq!(snapshot.get("name"), Some(&Some("Bob".to_string())));
        assert_eq!(snapshot.get("age"), Some(&Some("31".to_string())));
        assert_eq!(snapshot.get("note"), Some(&None));
    }

    #[test]
    fn test_job_progress() {
        let now = Utc::now();
        let mut job = ImportJob {
            id: Uuid::new_v4(),
            file_name: "users.xlsx".to_string(),
            file_path: "/tmp/users.xlsx".to_string(),
            importer: "users".to_string(),
            total_rows: 4,
            processed_rows: 0,
            imported_rows: 0,
            failed_rows: 0,
            user_id: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(!job.is_fully_processed());

        job.processed_rows = 2;
        assert_eq!(job.progress_percentage(), 50.0);
        assert!(!job.is_fully_processed());

        job.processed_rows = 4;
        assert!(job.is_fully_processed());
    }
}
