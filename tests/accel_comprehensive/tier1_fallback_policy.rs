//! Tier 1: Fallback Policy
//!
//! Construction succeeds whenever fallback is on; queries always return a
//! correct answer whether or not a device is attached.

use crate::test_utils::*;
use strata_vector::{AccelError, Accelerator, AcceleratorConfig, BackendKind};

#[test]
fn tier1_disabled_config_never_probes() {
    let accel = cpu_accelerator();
    assert!(!accel.is_enabled());
    assert_eq!(accel.backend(), BackendKind::None);
    assert_eq!(accel.stats().device_name, "");
}

#[test]
fn tier1_fallback_on_constructs_on_any_host() {
    init_tracing();
    let accel = Accelerator::new(AcceleratorConfig::default()).unwrap();
    let index = accel.new_embedding_index(3).unwrap();
    index.add("a", &[1.0, 0.0, 0.0]).unwrap();
    index.add("b", &[0.0, 1.0, 0.0]).unwrap();

    // Sync may fail on a CPU-only host; search must not.
    let synced = index.sync_to_gpu().is_ok();
    assert_eq!(synced, accel.is_enabled());
    let hits = index.search(&[0.0, 1.0, 0.0], 1).unwrap();
    assert_eq!(hits[0].id, "b");
}

#[test]
fn tier1_strict_config_either_succeeds_or_reports_backend_error() {
    init_tracing();
    match Accelerator::new(AcceleratorConfig::strict()) {
        Ok(accel) => {
            assert!(accel.is_enabled());
            assert!(accel.backend().is_hardware());
        }
        Err(e) => {
            assert!(e.is_backend_error(), "unexpected {:?}", e);
            assert!(!e.is_validation_error());
        }
    }
}

#[test]
fn tier1_uncompiled_preferred_backend_still_falls_back() {
    init_tracing();
    let preferred = [BackendKind::Cuda, BackendKind::Metal, BackendKind::OpenCl]
        .into_iter()
        .find(|kind| !strata_vector::device::compiled_backends().contains(kind));
    let Some(preferred) = preferred else {
        return;
    };

    let config = AcceleratorConfig::default().with_preferred_backend(preferred);
    let accel = Accelerator::new(config).unwrap();
    assert_ne!(accel.backend(), preferred);
}

#[test]
fn tier1_device_loss_after_sync_is_absorbed() {
    let (accel, device) = emulated_accelerator();
    let index = accel.new_embedding_index(8).unwrap();
    for i in 0..50 {
        index.add(format!("v{}", i), &random_vector(8, i)).unwrap();
    }
    index.sync_to_gpu().unwrap();
    let query = random_vector(8, 3);
    let before = index.search(&query, 5).unwrap();

    device.break_device();
    let after = index.search(&query, 5).unwrap();
    assert_eq!(result_ids(&before), result_ids(&after));
    assert_eq!(after[0].id, "v3");

    let err = index.resync_to_gpu().unwrap_err();
    assert!(matches!(err, AccelError::KernelExecution(_)));
    assert!(!index.is_gpu_synced());

    let stats = accel.stats();
    assert_eq!(stats.searches_gpu, 1);
    assert_eq!(stats.searches_cpu, 1);
}

#[test]
fn tier1_dimension_errors_are_never_absorbed() {
    let (accel, _device) = emulated_accelerator();
    let index = accel.new_embedding_index(4).unwrap();
    index.add("a", &[1.0, 0.0, 0.0, 0.0]).unwrap();
    index.sync_to_gpu().unwrap();

    let err = index.search(&[1.0, 0.0], 1).unwrap_err();
    assert_eq!(err, AccelError::InvalidDimensions { expected: 4, got: 2 });
    assert_eq!(index.stats().total_searches(), 0);
}
