//! Command runs against a small configuration file

use mempool_cli::commands::{info, list, monitor, open_app, run};
use mempool_cli::load_config;
use std::path::Path;

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("mempool.toml");
    let text = format!(
        r#"
[benchmark]
warmup_frames = 1
measure_frames = 2
output = '{}'

[sweep]
heap_types = ["upload", "default"]
thread_group_counts = [2]
input_buffer_sizes = [4096]

[workload]
input_buffer_size_mb = 0
input_buffer_size_kb = 16
num_thread_groups = 2
"#,
        dir.join("configured.csv").display()
    );
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn run_writes_report_to_override_path() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(Some(&write_config(dir.path()))).unwrap();

    let output = dir.path().join("override.csv");
    run::execute(&config, Some(&output), false).unwrap();

    let text = std::fs::read_to_string(&output).unwrap();
    // Header plus Upload and Default rows
    assert_eq!(text.lines().count(), 3);
    assert!(!dir.path().join("configured.csv").exists());
}

#[test]
fn overlong_report_paths_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(Some(&write_config(dir.path()))).unwrap();

    let nested = dir.path().join("d".repeat(200)).join("r".repeat(135));
    assert!(run::execute(&config, Some(&nested), false).is_err());
    assert!(!dir.path().join("configured.csv").exists());

    let path = dir.path().join("long.toml");
    let text = format!("[benchmark]\noutput = '{}'\n", nested.display());
    std::fs::write(&path, text).unwrap();
    assert!(load_config(Some(&path)).is_err());
}

#[test]
fn list_and_info_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(Some(&write_config(dir.path()))).unwrap();
    list::execute(&config).unwrap();
    info::execute(&config).unwrap();
}

#[test]
fn monitor_applies_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(Some(&write_config(dir.path()))).unwrap();

    monitor::execute(&config, 2, &["HeapType=default".to_string()]).unwrap();
    assert!(monitor::execute(&config, 1, &["NoSuchSetting=1".to_string()]).is_err());
    assert!(monitor::execute(&config, 1, &["HeapType".to_string()]).is_err());
}

#[test]
fn open_app_uses_configured_workload() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(Some(&write_config(dir.path()))).unwrap();
    let app = open_app(&config).unwrap();
    assert_eq!(app.runner().configs().len(), 2);
    assert_eq!(app.hud().unwrap().input_buffer_size, 16 * 1024);
}
