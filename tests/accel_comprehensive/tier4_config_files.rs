//! Tier 4: Configuration Files
//!
//! `accel.toml` in a data directory drives accelerator construction.

use strata_vector::{AccelError, Accelerator, AcceleratorConfig, BackendKind, CONFIG_FILE_NAME};
use tempfile::TempDir;

use crate::test_utils::*;

#[test]
fn tier4_default_file_builds_working_accelerator() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    AcceleratorConfig::write_default_if_missing(&path).unwrap();

    let config = AcceleratorConfig::from_file(&path).unwrap();
    assert_eq!(config, AcceleratorConfig::default());

    let accel = Accelerator::new(config).unwrap();
    let index = accel.new_embedding_index(2).unwrap();
    index.add("a", &[1.0, 0.0]).unwrap();
    assert_eq!(index.search(&[1.0, 0.0], 1).unwrap()[0].id, "a");
}

#[test]
fn tier4_disabled_file_gives_cpu_only() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "enabled = false\n").unwrap();

    let accel = Accelerator::new(AcceleratorConfig::from_file(&path).unwrap()).unwrap();
    assert!(!accel.is_enabled());
    assert!(!accel.config().enabled);
    assert!(accel.config().fallback_on_error);
}

#[test]
fn tier4_written_config_reloads_identically() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    let config = AcceleratorConfig::strict().with_preferred_backend(BackendKind::Metal);
    config.write_to_file(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("preferred_backend = \"metal\""));
    assert_eq!(AcceleratorConfig::from_file(&path).unwrap(), config);
}

#[test]
fn tier4_malformed_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "enabled = \"sometimes\"\n").unwrap();

    let err = AcceleratorConfig::from_file(&path).unwrap_err();
    assert!(matches!(err, AccelError::Config(_)));
    assert!(!err.is_backend_error());
}
