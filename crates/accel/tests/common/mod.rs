//! Shared helpers for strata-accel integration tests
//!
//! GPU paths run against `strata_gpu::HostDevice`, which keeps its buffers
//! in host memory and can fail on demand.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use strata_accel::{Accelerator, AcceleratorConfig, EmbeddingIndex};
pub use strata_gpu::HostDevice;

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output to the test harness once per binary.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

// ============================================================================
// Setup
// ============================================================================

/// Accelerator backed by a fresh `HostDevice`, plus a handle to that device.
pub fn host_accelerator(config: AcceleratorConfig) -> (Accelerator, Arc<HostDevice>) {
    init_tracing();
    let device = Arc::new(HostDevice::new());
    let accel = Accelerator::with_device(config, device.clone());
    (accel, device)
}

/// Index on a CPU-only accelerator.
pub fn cpu_index(dims: usize) -> EmbeddingIndex {
    init_tracing();
    Accelerator::cpu_only()
        .new_embedding_index(dims)
        .expect("index creation")
}

// ============================================================================
// Data
// ============================================================================

/// Deterministic pseudo-random vector in [-1, 1).
pub fn seeded_vector(dims: usize, seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..dims)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
        })
        .collect()
}

/// One-hot vector with `1.0` at `hot`.
pub fn unit(dims: usize, hot: usize) -> Vec<f32> {
    let mut v = vec![0.0; dims];
    v[hot] = 1.0;
    v
}

/// Fill `index` with `n` seeded vectors named `node-{i}`.
pub fn populate(index: &EmbeddingIndex, n: usize) {
    let dims = index.dimensions();
    for i in 0..n {
        index
            .add(format!("node-{}", i), &seeded_vector(dims, i as u64))
            .expect("add");
    }
}

/// Ids of a result list, in order.
pub fn ids(results: &[strata_core::SearchResult]) -> Vec<String> {
    results.iter().map(|r| r.id.clone()).collect()
}
