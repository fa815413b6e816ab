use std::process::Command;

use serde_json::Value;
use tempfile::tempdir;

const DATASET: &str = r#"[
  {"input": ["the band continues to tune nationally", "the band continues to tour nationally"], "output": "The band continues to tour nationally."},
  {"input": ["the hamlet of whitewell lies to the west", "the hamlet of white will lights to the west"], "output": "The hamlet of Whitewell lies to the west."},
  {"input": ["conway was farmed", "conway was formed"], "output": "Conway was formed."}
]"#;

fn asr_ec() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_asr-ec"));
    cmd.env_remove("OPENAI_API_KEY").env("RUST_LOG", "warn");
    cmd
}

#[test]
fn cli_presets_lists_every_preset() {
    let output = asr_ec().arg("presets").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("name,max_tokens,temperature"));
    assert!(stdout.contains("cv,25,0.9"));
    assert!(stdout.contains("deepseek,2500,0.9"));
}

#[test]
fn cli_evaluates_selection_strategies_offline() {
    let dir = tempdir().unwrap();
    let dataset = dir.path().join("cv.json");
    let results = dir.path().join("cv_results.json");
    std::fs::write(&dataset, DATASET).unwrap();

    let run = || {
        asr_ec()
            .args(["evaluate", "--model", "gpt-test", "--strategies", "oracle,top1"])
            .args(["--batch-size", "2", "--progress", "none"])
            .arg("--dataset")
            .arg(&dataset)
            .arg("--results")
            .arg(&results)
            .output()
            .unwrap()
    };

    let output = run();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("| Oracle | 0.000 |"), "{stdout}");
    assert!(stdout.contains("| Top 1 |"), "{stdout}");

    let raw = std::fs::read_to_string(&results).unwrap();
    let table: Vec<Value> = serde_json::from_str(&raw).unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(
        table[0]["corrected_by_gpt-test_oracle"],
        "the band continues to tour nationally"
    );
    assert_eq!(
        table[0]["corrected_by_gpt-test_top1"],
        "the band continues to tune nationally"
    );

    let csv = std::fs::read_to_string(dir.path().join("cv_results_gpt-test.csv")).unwrap();
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("strategy,WER,METEOR,BERT Precision,BERT Recall,BERT F1")
    );
    assert!(lines.next().unwrap().starts_with("Oracle,0,"));

    // A second run merges into the same table without changing it.
    let before = std::fs::read_to_string(&results).unwrap();
    assert!(run().status.success());
    assert_eq!(std::fs::read_to_string(&results).unwrap(), before);
}

#[test]
fn cli_experimental_run_writes_nothing() {
    let dir = tempdir().unwrap();
    let dataset = dir.path().join("cv.json");
    let results = dir.path().join("cv_results.json");
    std::fs::write(&dataset, DATASET).unwrap();

    let output = asr_ec()
        .args(["evaluate", "--model", "m", "--strategies", "top1", "--experimental"])
        .args(["--progress", "none"])
        .arg("--dataset")
        .arg(&dataset)
        .arg("--results")
        .arg(&results)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(!results.exists());
    assert!(!dir.path().join("cv_results_m.csv").exists());
}

#[test]
fn cli_model_strategies_need_credentials() {
    let dir = tempdir().unwrap();
    let dataset = dir.path().join("cv.json");
    std::fs::write(&dataset, DATASET).unwrap();

    let output = asr_ec()
        .args(["evaluate", "--model", "m", "--strategies", "zero-shot-constrained"])
        .arg("--dataset")
        .arg(&dataset)
        .arg("--results")
        .arg(dir.path().join("r.json"))
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("OPENAI_API_KEY"));
}

#[test]
fn cli_scores_an_existing_column() {
    let dir = tempdir().unwrap();
    let dataset = dir.path().join("cv.json");
    let results = dir.path().join("cv_results.json");
    std::fs::write(&dataset, DATASET).unwrap();

    let status = asr_ec()
        .args(["evaluate", "--model", "m", "--strategies", "oracle", "--progress", "none"])
        .arg("--dataset")
        .arg(&dataset)
        .arg("--results")
        .arg(&results)
        .status()
        .unwrap();
    assert!(status.success());

    let output = asr_ec()
        .args(["score", "--column", "corrected_by_m_oracle"])
        .arg("--results")
        .arg(&results)
        .output()
        .unwrap();
    assert!(output.status.success());
    let metrics: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(metrics["WER"], 0.0);
    assert_eq!(metrics["BERT F1"], 1.0);
}
