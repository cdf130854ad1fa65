//! GPU-path routing and failure absorption
//!
//! Searches never surface device errors: a failing kernel answers the same
//! query from the CPU map and counts it as a CPU search.

mod common;

use common::*;
use strata_accel::{AcceleratorConfig, BackendKind};

#[test]
fn accelerator_reports_attached_device() {
    let (accel, _device) = host_accelerator(AcceleratorConfig::default());
    assert!(accel.is_enabled());
    assert_eq!(accel.backend(), BackendKind::OpenCl);
    assert_eq!(accel.device_name(), "host-emulated");
    assert_eq!(accel.device_memory_mb(), 512);
}

#[test]
fn unsynced_index_searches_on_cpu() {
    let (accel, device) = host_accelerator(AcceleratorConfig::default());
    let index = accel.new_embedding_index(4).unwrap();
    populate(&index, 10);

    index.search(&seeded_vector(4, 3), 3).unwrap();
    assert_eq!(device.searches(), 0);
    assert_eq!(index.stats().searches_cpu, 1);
    assert_eq!(index.stats().searches_gpu, 0);
}

#[test]
fn kernel_failure_falls_back_to_cpu() {
    let (accel, device) = host_accelerator(AcceleratorConfig::default());
    let index = accel.new_embedding_index(4).unwrap();
    populate(&index, 20);
    index.sync_to_gpu().unwrap();

    let query = seeded_vector(4, 7);
    let healthy = index.search(&query, 5).unwrap();

    device.fail_kernels(true);
    let degraded = index.search(&query, 5).unwrap();
    assert_eq!(ids(&healthy), ids(&degraded));
    assert!(index.is_gpu_synced(), "a failed search does not drop the mirror");

    let stats = index.stats();
    assert_eq!(stats.searches_gpu, 1);
    assert_eq!(stats.searches_cpu, 1);

    device.fail_kernels(false);
    index.search(&query, 5).unwrap();
    assert_eq!(index.stats().searches_gpu, 2);
}

#[test]
fn normalization_failure_fails_sync() {
    let (accel, device) = host_accelerator(AcceleratorConfig::default());
    let index = accel.new_embedding_index(2).unwrap();
    index.add("a", &[3.0, 4.0]).unwrap();

    device.fail_kernels(true);
    assert!(index.sync_to_gpu().is_err());
    assert!(!index.is_gpu_synced());

    device.fail_kernels(false);
    index.sync_to_gpu().unwrap();
    assert!(index.is_gpu_synced());
}

#[test]
fn raw_mirror_skips_normalization() {
    let config = AcceleratorConfig {
        normalize_on_sync: false,
        ..AcceleratorConfig::default()
    };
    let (accel, device) = host_accelerator(config);
    let index = accel.new_embedding_index(2).unwrap();
    index.add("a", &[3.0, 4.0]).unwrap();

    // Normalization would fail; a raw mirror never calls it.
    device.fail_kernels(true);
    index.sync_to_gpu().unwrap();
    device.fail_kernels(false);

    let hits = index.search(&[3.0, 4.0], 1).unwrap();
    assert!((hits[0].score - 1.0).abs() < 1e-5);
    assert_eq!(index.stats().searches_gpu, 1);
}

#[test]
fn accelerator_stats_aggregate_every_index() {
    let (accel, _device) = host_accelerator(AcceleratorConfig::default());
    let a = accel.new_embedding_index(2).unwrap();
    let b = accel.new_embedding_index(2).unwrap();
    a.add("x", &[1.0, 0.0]).unwrap();
    b.add("y", &[0.0, 1.0]).unwrap();
    a.sync_to_gpu().unwrap();

    a.search(&[1.0, 0.0], 1).unwrap();
    a.search(&[1.0, 0.0], 1).unwrap();
    b.search(&[1.0, 0.0], 1).unwrap();

    let stats = accel.stats();
    assert_eq!(stats.backend, BackendKind::OpenCl);
    assert_eq!(stats.device_name, "host-emulated");
    assert_eq!(stats.indexes_created, 2);
    assert_eq!(stats.searches_gpu, 2);
    assert_eq!(stats.searches_cpu, 1);
    assert_eq!(stats.to_json()["searches_gpu"], 2);
}

#[test]
fn index_keeps_device_after_accelerator_release() {
    let (accel, device) = host_accelerator(AcceleratorConfig::default());
    let index = accel.new_embedding_index(2).unwrap();
    accel.release();

    index.add("a", &[1.0, 0.0]).unwrap();
    index.sync_to_gpu().unwrap();
    index.search(&[1.0, 0.0], 1).unwrap();
    assert_eq!(device.searches(), 1);
}
