//! Persisted results table with merge-only column upserts.
//!
//! The table is a JSON array of row objects, one per dataset sample in
//! dataset order. Prediction columns are added next to the dataset's own
//! fields. An upsert fills only cells that are absent, `null` or `""`, so a
//! rerun backfills failures from an earlier partial run and never overwrites a
//! prediction that already exists.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde_json::Value;

use crate::dataset::{Dataset, Record};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("results table at {path} is not an array of objects")]
    Shape { path: PathBuf },
    #[error("{values} values for a table of {rows} rows")]
    RowCountMismatch { rows: usize, values: usize },
}

/// Column name for one model/strategy pair.
pub fn column_name(model: &str, strategy: &str) -> String {
    format!("corrected_by_{model}_{strategy}")
}

fn is_empty_cell(cell: Option<&Value>) -> bool {
    match cell {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// Outcome of one upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertSummary {
    pub column: String,
    pub created_column: bool,
    /// Cells that were empty and received a value.
    pub filled: usize,
    /// Cells that already held a value and were left alone.
    pub kept: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultsTable {
    rows: Vec<Record>,
}

impl ResultsTable {
    pub fn from_dataset(dataset: &Dataset) -> Self {
        Self {
            rows: dataset.records().to_vec(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let value: Value = serde_json::from_reader(reader)?;
        let Value::Array(items) = value else {
            return Err(StoreError::Shape {
                path: path.to_path_buf(),
            });
        };
        let rows = items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                _ => Err(StoreError::Shape {
                    path: path.to_path_buf(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rows })
    }

    /// Write the table to a sibling temp file, then rename it over `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = sibling(path, "tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, &self.rows)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.rows.iter().any(|r| r.contains_key(column))
    }

    /// Append the dataset rows this table does not have yet. Existing rows are
    /// never dropped or reordered. Returns the number of rows added.
    pub fn grow_to(&mut self, dataset: &Dataset) -> usize {
        let have = self.rows.len();
        let Some(missing) = dataset.records().get(have..) else {
            return 0;
        };
        self.rows.extend(missing.iter().cloned());
        missing.len()
    }

    /// Write `values[i]` into row `i` of `column` wherever that cell is empty.
    ///
    /// Creates the column (as `null` cells) when missing. Rows beyond
    /// `values.len()` are untouched.
    pub fn upsert(&mut self, column: &str, values: &[String]) -> Result<UpsertSummary, StoreError> {
        if values.len() > self.rows.len() {
            return Err(StoreError::RowCountMismatch {
                rows: self.rows.len(),
                values: values.len(),
            });
        }

        let created_column = !self.has_column(column);
        if created_column {
            for row in &mut self.rows {
                row.insert(column.to_string(), Value::Null);
            }
        }

        let mut filled = 0;
        let mut kept = 0;
        for (row, value) in self.rows.iter_mut().zip(values) {
            if is_empty_cell(row.get(column)) {
                row.insert(column.to_string(), Value::String(value.clone()));
                filled += 1;
            } else {
                kept += 1;
            }
        }

        Ok(UpsertSummary {
            column: column.to_string(),
            created_column,
            filled,
            kept,
        })
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

// =============================================================================
// STORE
// =============================================================================

/// Results file on disk, guarded by an exclusive lock file next to it.
#[derive(Debug, Clone)]
pub struct ResultsStore {
    path: PathBuf,
}

impl ResultsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Existing table, or one derived from `dataset` when the file is missing.
    pub fn load_or_derive(&self, dataset: &Dataset) -> Result<ResultsTable, StoreError> {
        if self.path.exists() {
            ResultsTable::load(&self.path)
        } else {
            Ok(ResultsTable::from_dataset(dataset))
        }
    }

    /// Load (or derive), upsert and save under the lock. Blocking.
    ///
    /// A table saved from a shorter run of the same dataset is extended with
    /// the missing dataset rows first.
    pub fn upsert(
        &self,
        dataset: &Dataset,
        column: &str,
        values: &[String],
    ) -> Result<UpsertSummary, StoreError> {
        let _lock = StoreLock::acquire(&self.path)?;
        let mut table = self.load_or_derive(dataset)?;
        let appended = table.grow_to(dataset);
        if appended > 0 {
            tracing::info!(path = %self.path.display(), appended, "results table extended");
        }
        let summary = table.upsert(column, values)?;
        table.save(&self.path)?;
        tracing::info!(
            path = %self.path.display(),
            column = %summary.column,
            filled = summary.filled,
            kept = summary.kept,
            "results saved"
        );
        Ok(summary)
    }
}

/// Held for the duration of a read-modify-write; released on drop.
struct StoreLock {
    _file: File,
}

impl StoreLock {
    fn acquire(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(sibling(path, "lock"))?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dataset::Sample;

    fn dataset(n: usize) -> Dataset {
        Dataset::from_samples(
            (0..n)
                .map(|i| Sample::new(vec![format!("h{i}")], Some(format!("r{i}"))))
                .collect(),
        )
    }

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn column_names_follow_model_and_strategy() {
        assert_eq!(column_name("gpt-4o", "top1"), "corrected_by_gpt-4o_top1");
    }

    #[test]
    fn upsert_creates_column_and_fills() {
        let mut table = ResultsTable::from_dataset(&dataset(3));
        let summary = table.upsert("c", &strings(&["a", "b", "c"])).unwrap();
        assert!(summary.created_column);
        assert_eq!(summary.filled, 3);
        assert_eq!(table.cell(1, "c"), Some(&json!("b")));
        assert_eq!(table.cell(1, "output"), Some(&json!("r1")));
    }

    #[test]
    fn upsert_only_fills_empty_cells() {
        let mut table = ResultsTable::from_dataset(&dataset(3));
        table.upsert("c", &strings(&["a", "", "c"])).unwrap();

        let summary = table.upsert("c", &strings(&["x", "y", "z"])).unwrap();
        assert!(!summary.created_column);
        assert_eq!(summary.filled, 1);
        assert_eq!(summary.kept, 2);
        assert_eq!(table.cell(0, "c"), Some(&json!("a")));
        assert_eq!(table.cell(1, "c"), Some(&json!("y")));
        assert_eq!(table.cell(2, "c"), Some(&json!("c")));
    }

    #[test]
    fn shorter_values_leave_tail_rows_alone() {
        let mut table = ResultsTable::from_dataset(&dataset(3));
        table.upsert("c", &strings(&["a"])).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.cell(2, "c"), Some(&Value::Null));
    }

    #[test]
    fn too_many_values_is_an_error() {
        let mut table = ResultsTable::from_dataset(&dataset(1));
        let err = table.upsert("c", &strings(&["a", "b"])).unwrap_err();
        assert!(matches!(err, StoreError::RowCountMismatch { rows: 1, values: 2 }));
    }

    #[test]
    fn grow_to_appends_missing_dataset_rows_only() {
        let mut table = ResultsTable::from_dataset(&dataset(2));
        table.upsert("c", &strings(&["a", "b"])).unwrap();

        assert_eq!(table.grow_to(&dataset(4)), 2);
        assert_eq!(table.len(), 4);
        assert_eq!(table.cell(1, "c"), Some(&json!("b")));
        assert_eq!(table.cell(3, "output"), Some(&json!("r3")));
        assert_eq!(table.cell(3, "c"), None);

        // A shorter dataset never shrinks the table.
        assert_eq!(table.grow_to(&dataset(1)), 0);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn save_and_load_preserve_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("results.json");
        let mut table = ResultsTable::from_dataset(&dataset(2));
        table.upsert("c", &strings(&["a", "b"])).unwrap();
        table.save(&path).unwrap();

        let loaded = ResultsTable::load(&path).unwrap();
        assert_eq!(loaded, table);
        assert!(!dir.path().join("nested").join("results.json.tmp").exists());
    }

    #[test]
    fn load_rejects_non_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        std::fs::write(&path, r#"{"not": "rows"}"#).unwrap();
        assert!(matches!(
            ResultsTable::load(&path),
            Err(StoreError::Shape { .. })
        ));
    }
}
