//! Loading a run configuration and seeding the settings registry from it

use mempool_config::{
    ConfigLoader, LiveSettings, SettingsRegistry, UploadPath, Validator, names,
    register_app_settings,
};
use mempool_gpu::{BufferRepresentation, HeapType};
use std::io::Write;

#[test]
fn file_config_seeds_registry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mempool.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        r#"
[benchmark]
output = "sweep.csv"

[workload]
heap_type = "default"
input_buffer_type = "structured"
input_buffer_size_mb = 4
upload_path = "upload_copy_queue"
num_thread_groups = 128
"#
    )
    .unwrap();

    let config = ConfigLoader::new().with_file(&path).load().unwrap();
    assert!(Validator::new().validate(&config).is_valid());

    let mut registry = SettingsRegistry::new();
    register_app_settings(
        &mut registry,
        &config.workload,
        &config.benchmark.output.to_string_lossy(),
    )
    .unwrap();

    let live = LiveSettings::read(&registry).unwrap();
    assert_eq!(live.heap_type, HeapType::Default);
    assert_eq!(live.input_buffer_type, BufferRepresentation::Structured);
    assert_eq!(live.input_buffer_size(), 4 * 1024 * 1024);
    assert_eq!(live.upload_path, UploadPath::UploadCopyQueue);
    assert_eq!(live.num_thread_groups, 128);
    assert_eq!(live.csv_name, "sweep.csv");
    assert!(registry.changes().is_empty());
}

#[test]
fn out_of_range_workload_is_clamped_and_reported() {
    let config = ConfigLoader::load_from_str("[workload]\nelems_per_thread = 500\n").unwrap();
    let result = Validator::new().validate(&config);
    assert!(!result.is_valid());
    assert_eq!(result.errors[0].field, "workload.elems_per_thread");

    let mut registry = SettingsRegistry::new();
    register_app_settings(&mut registry, &config.workload, "Benchmark.csv").unwrap();
    assert_eq!(registry.int(names::ELEMS_PER_THREAD).unwrap(), 64);
}
