//! Dataset records and their normalization into [`Sample`]s.
//!
//! Two record shapes are accepted:
//! - `{"source": "hyp one. hyp two.", "target": "..."}`: hypotheses in one
//!   `.`-delimited string
//! - `{"input": ["hyp one", "hyp two"], "output": "..."}`: explicit list
//!
//! Any other fields ride along untouched so the results table can keep them.

use std::path::Path;

use serde_json::{Map, Value};

pub type Record = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("record {index}: invalid JSON: {message}")]
    Json { index: usize, message: String },
    #[error("record {index}: {message}")]
    Shape { index: usize, message: String },
}

/// One utterance: ranked ASR hypotheses plus the ground truth, if known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub hypotheses: Vec<String>,
    pub reference: Option<String>,
}

impl Sample {
    pub fn new(hypotheses: Vec<String>, reference: Option<String>) -> Self {
        Self {
            hypotheses,
            reference,
        }
    }
}

/// Ordered samples. Index is the identity used to realign results.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    samples: Vec<Sample>,
    records: Vec<Record>,
}

impl Dataset {
    /// Build from bare samples; records are synthesized in `input`/`output` shape.
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        let records = samples
            .iter()
            .map(|s| {
                let mut record = Record::new();
                record.insert(
                    "input".to_string(),
                    Value::Array(s.hypotheses.iter().cloned().map(Value::String).collect()),
                );
                record.insert(
                    "output".to_string(),
                    s.reference.clone().map(Value::String).unwrap_or(Value::Null),
                );
                record
            })
            .collect();
        Self { samples, records }
    }

    pub fn from_records(records: Vec<Record>) -> Result<Self, DatasetError> {
        let samples = records
            .iter()
            .enumerate()
            .map(|(index, record)| sample_from_record(index, record))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { samples, records })
    }

    /// Load a JSON array of records, or JSON Lines when the file does not start with `[`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, DatasetError> {
        let records = if raw.trim_start().starts_with('[') {
            let values: Vec<Value> = serde_json::from_str(raw).map_err(|e| DatasetError::Json {
                index: 0,
                message: e.to_string(),
            })?;
            values
                .into_iter()
                .enumerate()
                .map(|(index, v)| into_record(index, v))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            raw.lines()
                .filter(|l| !l.trim().is_empty())
                .enumerate()
                .map(|(index, line)| {
                    let v: Value = serde_json::from_str(line).map_err(|e| DatasetError::Json {
                        index,
                        message: e.to_string(),
                    })?;
                    into_record(index, v)
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        Self::from_records(records)
    }

    /// Keep only the first `n` samples.
    pub fn truncate(&mut self, n: usize) {
        self.samples.truncate(n);
        self.records.truncate(n);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// References in sample order; missing ones become empty strings.
    pub fn references(&self) -> Vec<String> {
        self.samples
            .iter()
            .map(|s| s.reference.clone().unwrap_or_default())
            .collect()
    }
}

fn into_record(index: usize, value: Value) -> Result<Record, DatasetError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(DatasetError::Shape {
            index,
            message: format!("expected an object, got {other}"),
        }),
    }
}

/// Split a `.`-delimited hypothesis string, dropping blanks.
pub fn split_hypotheses(source: &str) -> Vec<String> {
    source
        .split('.')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

fn sample_from_record(index: usize, record: &Record) -> Result<Sample, DatasetError> {
    let shape_err = |message: &str| DatasetError::Shape {
        index,
        message: message.to_string(),
    };

    let (hypotheses, reference_key) = if let Some(source) = record.get("source") {
        let source = source
            .as_str()
            .ok_or_else(|| shape_err("'source' must be a string"))?;
        (split_hypotheses(source), "target")
    } else if let Some(input) = record.get("input") {
        let list = input
            .as_array()
            .ok_or_else(|| shape_err("'input' must be a list of strings"))?;
        let hypotheses = list
            .iter()
            .map(|h| h.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| shape_err("'input' must be a list of strings"))?;
        (hypotheses, "output")
    } else {
        return Err(shape_err("record has neither 'source' nor 'input'"));
    };

    let reference = match record.get(reference_key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(shape_err("reference must be a string")),
    };

    Ok(Sample::new(hypotheses, reference))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_records_split_on_periods() {
        let ds = Dataset::parse(
            r#"[{"source": "the cat sat. the cat sad. .", "target": "the cat sat", "id": 7}]"#,
        )
        .unwrap();
        let s = ds.get(0).unwrap();
        assert_eq!(s.hypotheses, vec!["the cat sat", "the cat sad"]);
        assert_eq!(s.reference.as_deref(), Some("the cat sat"));
        assert_eq!(ds.records()[0]["id"], 7);
    }

    #[test]
    fn input_records_from_jsonl() {
        let raw = "{\"input\": [\"a\", \"b\"], \"output\": \"a\"}\n\n{\"input\": [\"c\"]}\n";
        let ds = Dataset::parse(raw).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get(0).unwrap().hypotheses, vec!["a", "b"]);
        assert_eq!(ds.get(1).unwrap().reference, None);
        assert_eq!(ds.references(), vec!["a".to_string(), String::new()]);
    }

    #[test]
    fn unknown_shape_is_rejected_with_index() {
        let err = Dataset::parse(r#"[{"input": ["a"]}, {"text": "x"}]"#).unwrap_err();
        assert!(matches!(err, DatasetError::Shape { index: 1, .. }), "{err}");
    }

    #[test]
    fn from_samples_synthesizes_records() {
        let ds = Dataset::from_samples(vec![Sample::new(vec!["x".into()], None)]);
        assert_eq!(ds.records()[0]["output"], Value::Null);
        assert_eq!(ds.records()[0]["input"][0], "x");
    }
}
