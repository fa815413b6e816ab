//! Benchmark table: one metrics row per evaluated strategy.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::metrics::MetricsRecord;

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkRow {
    pub strategy: String,
    #[serde(flatten)]
    pub metrics: MetricsRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkTable {
    pub model: String,
    pub rows: Vec<BenchmarkRow>,
}

impl BenchmarkTable {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, strategy: impl Into<String>, metrics: MetricsRecord) {
        self.rows.push(BenchmarkRow {
            strategy: strategy.into(),
            metrics,
        });
    }

    pub fn get(&self, strategy: &str) -> Option<&MetricsRecord> {
        self.rows
            .iter()
            .find(|r| r.strategy == strategy)
            .map(|r| &r.metrics)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::from("strategy");
        for col in MetricsRecord::COLUMNS {
            out.push(',');
            out.push_str(col);
        }
        out.push('\n');
        for row in &self.rows {
            out.push_str(&csv_field(&row.strategy));
            for v in row.metrics.values() {
                let _ = write!(out, ",{v}");
            }
            out.push('\n');
        }
        out
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## Benchmark: {}\n", self.model);
        out.push_str("| Strategy |");
        for col in MetricsRecord::COLUMNS {
            let _ = write!(out, " {col} |");
        }
        out.push_str("\n|---|");
        for _ in MetricsRecord::COLUMNS {
            out.push_str("---:|");
        }
        out.push('\n');
        for row in &self.rows {
            let _ = write!(out, "| {} |", row.strategy);
            for v in row.metrics.values() {
                let _ = write!(out, " {v:.3} |");
            }
            out.push('\n');
        }
        out
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }
}

/// `<dir>/<stem>_<model>.csv` next to the results file. Path separators in
/// the model id are replaced so the file stays in that directory.
pub fn csv_path_for(results_path: &Path, model: &str) -> PathBuf {
    let stem = results_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results".to_string());
    let model = model.replace(|c: char| c == '/' || c == '\\', "_");
    results_path.with_file_name(format!("{stem}_{model}.csv"))
}

fn csv_field(s: &str) -> String {
    if s.contains(|c: char| matches!(c, ',' | '"' | '\n')) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(wer: f64) -> MetricsRecord {
        MetricsRecord {
            wer,
            meteor: 0.5,
            bert_precision: 0.9,
            bert_recall: 0.8,
            bert_f1: 0.85,
        }
    }

    #[test]
    fn csv_has_fixed_header_and_rows_in_order() {
        let mut table = BenchmarkTable::new("gpt-test");
        table.push("Oracle", record(0.1));
        table.push("Top 1", record(0.2));
        let csv = table.to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "strategy,WER,METEOR,BERT Precision,BERT Recall,BERT F1");
        assert_eq!(lines[1], "Oracle,0.1,0.5,0.9,0.8,0.85");
        assert!(lines[2].starts_with("Top 1,0.2"));
    }

    #[test]
    fn markdown_lists_every_strategy() {
        let mut table = BenchmarkTable::new("m");
        table.push("Oracle", record(0.1));
        let md = table.to_markdown();
        assert!(md.contains("| Oracle | 0.100 |"));
        assert!(md.contains("| Strategy | WER |"));
    }

    #[test]
    fn csv_path_sits_next_to_results() {
        let p = csv_path_for(Path::new("out/cv_results.json"), "org/model-7b");
        assert_eq!(p, PathBuf::from("out/cv_results_org_model-7b.csv"));
    }

    #[test]
    fn lookup_by_strategy() {
        let mut table = BenchmarkTable::new("m");
        table.push("Top 1", record(0.3));
        assert_eq!(table.get("Top 1").map(|r| r.wer), Some(0.3));
        assert!(table.get("Oracle").is_none());
    }
}
