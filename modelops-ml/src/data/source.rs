//! Data source abstraction for loading row-structured data.

use crate::error::MlError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// A batch of data rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl DataBatch {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, MlError> {
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(MlError::invalid_input(format!(
                "row {idx} has {} values, expected {}",
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Build a batch from JSON objects. Columns come from the first object.
    pub fn from_records(records: &[Map<String, Value>]) -> Self {
        let columns: Vec<String> = records
            .first()
            .map(|first| first.keys().cloned().collect())
            .unwrap_or_default();
        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|col| record.get(col).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    /// One JSON object per row.
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

/// Information about a data source for logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceInfo {
    pub source_type: String,
    pub location: String,
    pub accessed_at: chrono::DateTime<chrono::Utc>,
}

/// Trait for loading data from a source.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Load data from this source, optionally limiting the number of rows.
    async fn load(&self, limit: Option<usize>) -> Result<DataBatch, MlError>;

    /// Return metadata about this source.
    fn source_info(&self) -> DataSourceInfo;
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

async fn read_location(location: &str) -> Result<String, MlError> {
    if is_remote(location) {
        debug!(url = location, "Fetching remote data");
        let response = reqwest::get(location).await?.error_for_status()?;
        Ok(response.text().await?)
    } else {
        tokio::fs::read_to_string(location)
            .await
            .map_err(|e| MlError::dataset(format!("Failed to read {location}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// CsvSource
// ---------------------------------------------------------------------------

/// CSV data source backed by a local file or an `http(s)://` URL.
///
/// Cells are loaded as JSON strings; typing happens downstream.
pub struct CsvSource {
    pub location: String,
    pub delimiter: char,
}

impl CsvSource {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            delimiter: ',',
        }
    }

    /// Parse CSV text into a batch.
    pub fn parse(&self, content: &str, limit: Option<usize>) -> Result<DataBatch, MlError> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());

        let columns: Vec<String> = split_record(
            lines
                .next()
                .ok_or_else(|| MlError::dataset(format!("Empty CSV: {}", self.location)))?,
            self.delimiter,
        );

        let mut rows = Vec::new();
        for (idx, line) in lines.enumerate() {
            if limit.is_some_and(|max| rows.len() >= max) {
                break;
            }
            let cells = split_record(line, self.delimiter);
            if cells.len() != columns.len() {
                return Err(MlError::dataset(format!(
                    "{}: line {} has {} fields, header has {}",
                    self.location,
                    idx + 2,
                    cells.len(),
                    columns.len()
                )));
            }
            rows.push(cells.into_iter().map(Value::String).collect());
        }

        Ok(DataBatch { columns, rows })
    }
}

/// Split one CSV record, honouring double-quoted fields and `""` escapes.
fn split_record(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches('\r').chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

#[async_trait]
impl DataSource for CsvSource {
    async fn load(&self, limit: Option<usize>) -> Result<DataBatch, MlError> {
        let content = read_location(&self.location).await?;
        self.parse(&content, limit)
    }

    fn source_info(&self) -> DataSourceInfo {
        DataSourceInfo {
            source_type: "csv".to_string(),
            location: self.location.clone(),
            accessed_at: chrono::Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// JsonSource
// ---------------------------------------------------------------------------

/// JSON data source: an array of objects, or one object.
pub struct JsonSource {
    pub location: String,
}

impl JsonSource {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

#[async_trait]
impl DataSource for JsonSource {
    async fn load(&self, limit: Option<usize>) -> Result<DataBatch, MlError> {
        let content = read_location(&self.location).await?;
        let value: Value = serde_json::from_str(&content)?;

        let items = match value {
            Value::Array(arr) => arr,
            obj @ Value::Object(_) => vec![obj],
            _ => return Err(MlError::dataset("JSON must be an array or object")),
        };

        let records: Vec<Map<String, Value>> = items
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                _ => Err(MlError::dataset("JSON array items must be objects")),
            })
            .collect::<Result<_, _>>()?;

        Ok(DataBatch::from_records(&records))
    }

    fn source_info(&self) -> DataSourceInfo {
        DataSourceInfo {
            source_type: "json".to_string(),
            location: self.location.clone(),
            accessed_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_csv_parse() {
        let src = CsvSource::new("inline.csv");
        let batch = src
            .parse("glucose,bmi,diabetes\n148,33.6,1\n85,26.6,0\n\n", None)
            .unwrap();
        assert_eq!(batch.columns, vec!["glucose", "bmi", "diabetes"]);
        assert_eq!(batch.row_count(), 2);
        assert_eq!(batch.rows[0][1], Value::String("33.6".into()));
    }

    #[test]
    fn test_csv_parse_limit_and_quotes() {
        let src = CsvSource::new("inline.csv");
        let batch = src
            .parse("id,text\n1,\"Hello, world\"\n2,\"say \"\"hi\"\"\"\n3,bye\n", Some(2))
            .unwrap();
        assert_eq!(batch.row_count(), 2);
        assert_eq!(batch.rows[0][1], Value::String("Hello, world".into()));
        assert_eq!(batch.rows[1][1], Value::String("say \"hi\"".into()));
    }

    #[test]
    fn test_csv_ragged_row_is_an_error() {
        let src = CsvSource::new("inline.csv");
        let err = src.parse("a,b\n1,2\n3\n", None).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_csv_empty_is_an_error() {
        let src = CsvSource::new("inline.csv");
        assert!(matches!(src.parse("", None), Err(MlError::Dataset(_))));
    }

    #[tokio::test]
    async fn test_csv_missing_file() {
        let src = CsvSource::new("/nonexistent/diabetes.csv");
        assert!(matches!(src.load(None).await, Err(MlError::Dataset(_))));
    }

    #[tokio::test]
    async fn test_json_source_loads_records() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("input.json");
        std::fs::write(&path, r#"[{"id": 1, "text": "Hello"}, {"id": 2, "text": "Goodbye"}]"#)
            .unwrap();

        let batch = JsonSource::new(path.to_string_lossy())
            .load(None)
            .await
            .unwrap();
        assert_eq!(batch.row_count(), 2);
        let text = batch.column_index("text").unwrap();
        assert_eq!(batch.rows[1][text], Value::String("Goodbye".into()));
        assert_eq!(batch.to_records()[0]["id"], 1);
    }

    #[test]
    fn test_batch_new_rejects_ragged_rows() {
        let err = DataBatch::new(
            vec!["a".into(), "b".into()],
            vec![vec![Value::Null, Value::Null], vec![Value::Null]],
        )
        .unwrap_err();
        assert!(matches!(err, MlError::InvalidInput(_)));
    }
}
