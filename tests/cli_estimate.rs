use std::fs;
use std::process::Command;

use tempfile::tempdir;

fn epiclock() -> Command {
    Command::new(env!("CARGO_BIN_EXE_epiclock"))
}

#[test]
fn example_output_round_trips_through_estimate() {
    let tmp = tempdir().expect("temporary directory");
    let values_path = tmp.path().join("betas.txt");

    let output = epiclock()
        .args(["example", "--seed", "42"])
        .output()
        .expect("run epiclock example");
    assert!(output.status.success(), "example failed: {output:?}");
    fs::write(&values_path, &output.stdout).expect("write example values");

    let output = epiclock()
        .args(["estimate", "--json", "--input"])
        .arg(&values_path)
        .output()
        .expect("run epiclock estimate");
    assert!(output.status.success(), "estimate failed: {output:?}");
    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("estimate prints JSON");
    assert!(json["epiAge"].as_f64().expect("epiAge is a number").is_finite());
}

#[test]
fn estimate_rounds_for_display() {
    let values = vec!["0.5"; 353].join(",");
    let output = epiclock()
        .args(["estimate", "--values", &values])
        .output()
        .expect("run epiclock estimate");
    assert!(output.status.success(), "estimate failed: {output:?}");
    let stdout = String::from_utf8(output.stdout).expect("utf-8 output");
    assert_eq!(stdout.trim(), "Epigenetic age (Horvath 2013): 39.0 years");
}

#[test]
fn estimate_reports_wrong_count_and_fails() {
    let output = epiclock()
        .args(["estimate", "--values", "0.5, 0.5"])
        .output()
        .expect("run epiclock estimate");
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).expect("utf-8 output");
    assert!(
        stderr.contains("Expected 353 beta values, got 2"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn batch_writes_one_row_per_sample() {
    let tmp = tempdir().expect("temporary directory");
    let matrix_path = tmp.path().join("matrix.tsv");
    let out_path = tmp.path().join("ages.tsv");

    let header = std::iter::once("sample_id".to_string())
        .chain((0..353).map(|i| format!("site_{i:03}")))
        .collect::<Vec<_>>()
        .join("\t");
    let row = |id: &str, value: &str| {
        std::iter::once(id.to_string())
            .chain(std::iter::repeat_n(value.to_string(), 353))
            .collect::<Vec<_>>()
            .join("\t")
    };
    let data = format!("{header}\n{}\n{}\n", row("s1", "0.5"), row("s2", "2.0"));
    fs::write(&matrix_path, data).expect("write matrix");

    let status = epiclock()
        .arg("batch")
        .arg(&matrix_path)
        .arg("--out")
        .arg(&out_path)
        .status()
        .expect("run epiclock batch");
    assert!(status.success(), "batch exited with status {status:?}");

    let results = fs::read_to_string(&out_path).expect("read results");
    let lines: Vec<&str> = results.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("s1\t39.0"));
    assert!(lines[2].starts_with("s2\tNA\t"));
}
