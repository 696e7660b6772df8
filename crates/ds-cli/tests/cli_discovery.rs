use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_discostat"))
}

fn repo_root() -> PathBuf {
    // crates/ds-cli -> repo root
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..").canonicalize().unwrap()
}

fn fixture_path(name: &str) -> String {
    repo_root().join("tests/fixtures").join(name).to_string_lossy().into_owned()
}

fn tmp_path(filename: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("discostat_cli_{}_{}_{}", std::process::id(), nanos, filename));
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

#[test]
fn version_smoke() {
    let out = run(&["version"]);
    assert!(out.status.success(), "version should succeed");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("discostat "), "unexpected stdout: {}", stdout);
}

#[test]
fn evaluate_writes_json_record() {
    let store = fixture_path("discovery_store.json");
    let out = run(&["evaluate", "--input", &store, "--mass", "300"]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert!(v.get("ts").and_then(|x| x.as_f64()).unwrap().is_finite());
    assert!(v.get("muhat").and_then(|x| x.as_f64()).is_some());
    assert_eq!(v.get("mass").and_then(|x| x.as_f64()), Some(300.0));
    assert!(v.get("cond_status").and_then(|x| x.as_i64()).is_some());
}

#[test]
fn evaluate_csv_with_aux_binding() {
    let store = fixture_path("discovery_store.json");
    let aux = fixture_path("aux_globs.json");
    let out_path = tmp_path("eval.csv");
    let out = run(&[
        "evaluate",
        "--input",
        &store,
        "--aux",
        &aux,
        "--aux-index",
        "1",
        "--format",
        "csv",
        "--output",
        out_path.to_string_lossy().as_ref(),
    ]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let text = std::fs::read_to_string(&out_path).unwrap();
    let mut lines = text.lines();
    assert!(lines.next().unwrap().starts_with("index,mass,q0,muhat,"));
    let row = lines.next().unwrap();
    assert!(row.starts_with("1,"), "unexpected row: {}", row);
    assert!(lines.next().is_none());
    let _ = std::fs::remove_file(out_path);
}

#[test]
fn evaluate_missing_workspace_fails_with_record() {
    let store = fixture_path("discovery_store.json");
    let out = run(&["evaluate", "--input", &store, "--workspace", "nope"]);
    assert!(!out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v.get("status").and_then(|x| x.as_str()), Some("failed"));
    assert!(v.get("error").and_then(|x| x.as_str()).unwrap().contains("nope"));
}

#[test]
fn toys_then_significance() {
    let store = fixture_path("discovery_store.json");
    let toys_path = tmp_path("toys.csv");
    let out = run(&[
        "toys",
        "--input",
        &store,
        "--seed",
        "3",
        "--n-toys",
        "4",
        "--output",
        toys_path.to_string_lossy().as_ref(),
    ]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let text = std::fs::read_to_string(&toys_path).unwrap();
    assert_eq!(text.lines().count(), 5);
    let first = text.lines().nth(1).unwrap();
    assert!(first.contains(",10003,0,"), "unexpected row: {}", first);

    let out = run(&[
        "significance",
        "--observed-q0",
        "-1.0",
        "--toys",
        toys_path.to_string_lossy().as_ref(),
    ]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let n_used = v.get("n_used").and_then(|x| x.as_u64()).unwrap();
    let n_failed = v.get("n_failed").and_then(|x| x.as_u64()).unwrap();
    assert_eq!(n_used + n_failed, 4);
    assert!(n_used >= 2, "too many failed toy fits: {}", v);
    let p = v.get("p_value").and_then(|x| x.as_f64()).unwrap();
    assert!(p > 0.0 && p <= 1.0, "p = {}", p);
    // every usable one-sided q0 is at least the observed value
    assert_eq!(p, 1.0);
    assert_eq!(v.get("significance_is_lower_bound").and_then(|x| x.as_bool()), Some(false));

    // nothing reaches an extreme observation: finite lower bound at p = 1/n
    let out = run(&[
        "significance",
        "--observed-q0",
        "1e6",
        "--toys",
        toys_path.to_string_lossy().as_ref(),
    ]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v.get("p_value").and_then(|x| x.as_f64()), Some(0.0));
    assert_eq!(v.get("significance_is_lower_bound").and_then(|x| x.as_bool()), Some(true));
    let z = v.get("significance").and_then(|x| x.as_f64()).expect("finite significance");
    assert!(z > 0.0 && z.is_finite());
    let _ = std::fs::remove_file(toys_path);
}

const SCAN_HEADER: &str = "index,mass,q0,muhat,uncond_status,uncond_minNLL,cond_status,cond_minNLL,\
                           cond_zhf,uncond_zhf,cond_ttbar,uncond_ttbar,uncond_covQual,cond_covQual,mu_range";

fn scan_row(index: usize, mass: f64, q0: f64, muhat: f64, status: i32) -> String {
    format!(
        "{index},{mass},{q0},{muhat},{status},10.0,0,{},1.3,1.35,0.97,0.98,3,3,40.0",
        10.0 + q0 / 2.0
    )
}

fn write_scan(name: &str, rows: &[String]) -> PathBuf {
    let path = tmp_path(name);
    let mut text = String::from(SCAN_HEADER);
    for row in rows {
        text.push('\n');
        text.push_str(row);
    }
    text.push('\n');
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn failed_fits_merge_and_global() {
    let scan = write_scan(
        "scan.csv",
        &[
            scan_row(0, 300.0, 9.0, 1.0, 0),
            scan_row(0, 500.0, 1.0, 0.5, 0),
            scan_row(1, 300.0, 1.0, 0.4, 0),
            scan_row(1, 500.0, 4.0, 0.8, 4),
            scan_row(2, 300.0, 0.25, 0.1, 0),
            scan_row(2, 500.0, 0.0, -0.3, 0),
        ],
    );
    let retry = write_scan("retry.csv", &[scan_row(1, 500.0, 6.25, 0.9, 0)]);
    let scan_arg = scan.to_string_lossy().into_owned();
    let retry_arg = retry.to_string_lossy().into_owned();

    let out = run(&["failed-fits", "--toys", &scan_arg]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "1,500.0");

    let merged = tmp_path("merged.csv");
    let merged_arg = merged.to_string_lossy().into_owned();
    let out = run(&[
        "merge-retries",
        "--toys",
        &scan_arg,
        "--retries",
        &retry_arg,
        "--output",
        &merged_arg,
    ]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let out = run(&["failed-fits", "--toys", &merged_arg]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).trim().is_empty());

    // maxima: toy 0 Z = 3, toy 1 Z = 2.5 after the retry, toy 2 Z = 0.5
    let out = run(&["global", "--observed-z", "2.0", "--toys", &merged_arg]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v.get("n_toys").and_then(|x| x.as_u64()), Some(3));
    assert_eq!(v.get("n_good_toys").and_then(|x| x.as_u64()), Some(3));
    assert_eq!(v.get("n_exceeding").and_then(|x| x.as_u64()), Some(2));
    let p = v.get("p_value").and_then(|x| x.as_f64()).unwrap();
    assert!((p - 2.0 / 3.0).abs() < 1e-12);
    let tf = v.get("trial_factor").and_then(|x| x.as_f64()).unwrap();
    assert!((10.0..=21.0).contains(&tf));
    assert_eq!(v.get("masses").and_then(|x| x.as_array()).map(|m| m.len()), Some(2));

    // without the retry, toy 1 has a failed fit and is dropped
    let out = run(&["global", "--observed-z", "2.0", "--toys", &scan_arg]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v.get("n_good_toys").and_then(|x| x.as_u64()), Some(2));
    assert_eq!(v.get("n_failed_fits").and_then(|x| x.as_u64()), Some(1));

    for path in [scan, retry, merged] {
        let _ = std::fs::remove_file(path);
    }
}

#[test]
fn merge_retries_rejects_incomplete_toys() {
    let scan = write_scan("partial.csv", &[scan_row(0, 300.0, 1.0, 0.5, 0)]);
    let retry = write_scan("partial_retry.csv", &[scan_row(1, 500.0, 1.0, 0.5, 0)]);
    let out = run(&[
        "merge-retries",
        "--toys",
        scan.to_string_lossy().as_ref(),
        "--retries",
        retry.to_string_lossy().as_ref(),
    ]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("mass points"));
    let _ = std::fs::remove_file(scan);
    let _ = std::fs::remove_file(retry);
}

#[test]
fn toys_requires_seed() {
    let store = fixture_path("discovery_store.json");
    let out = run(&["toys", "--input", &store, "--n-toys", "1"]);
    assert!(!out.status.success());
}
