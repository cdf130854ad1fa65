//! Test utilities for the accelerator comprehensive tests
//!
//! Provides:
//! - Accelerators over a host-memory device reporting itself as CUDA
//! - Accelerator and index setup
//! - Deterministic vector generation

#![allow(dead_code)]

use std::sync::{Arc, Once};

use strata_core::BackendKind;
use strata_gpu::HostDevice;
use strata_vector::{Accelerator, AcceleratorConfig, EmbeddingIndex, SearchResult};

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::INFO)
            .try_init();
    });
}

// ============================================================================
// Setup
// ============================================================================

pub fn emulated_accelerator() -> (Accelerator, Arc<HostDevice>) {
    init_tracing();
    let device = Arc::new(HostDevice::with_identity(
        BackendKind::Cuda,
        "emulated",
        8 * 1024 * 1024 * 1024,
    ));
    let accel = Accelerator::with_device(AcceleratorConfig::default(), device.clone());
    (accel, device)
}

pub fn cpu_accelerator() -> Accelerator {
    init_tracing();
    Accelerator::new(AcceleratorConfig::cpu_only()).expect("cpu-only accelerator")
}

pub fn shared_index(accel: &Accelerator, dims: usize) -> Arc<EmbeddingIndex> {
    Arc::new(accel.new_embedding_index(dims).expect("index"))
}

// ============================================================================
// Data
// ============================================================================

/// Simple LCG for deterministic pseudo-random vectors
fn lcg_next(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    *state
}

/// Deterministic vector in [-1, 1]
pub fn random_vector(dims: usize, seed: u64) -> Vec<f32> {
    let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
    (0..dims)
        .map(|_| (lcg_next(&mut state) >> 40) as f32 / (1u64 << 23) as f32 - 1.0)
        .collect()
}

pub fn result_ids(results: &[SearchResult]) -> Vec<String> {
    results.iter().map(|r| r.id.clone()).collect()
}

/// Scores must be non-increasing.
pub fn assert_ranked(results: &[SearchResult]) {
    for w in results.windows(2) {
        assert!(
            w[0].score >= w[1].score,
            "results out of order: {} ({}) before {} ({})",
            w[0].id,
            w[0].score,
            w[1].id,
            w[1].score
        );
    }
}
