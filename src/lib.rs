//! Strata vector core - embedding search with optional GPU acceleration
//!
//! Stores fixed-dimension embeddings keyed by id and answers exact
//! nearest-neighbor queries by cosine similarity. A GPU backend (CUDA, Metal
//! or OpenCL, chosen by cargo feature) serves searches when present; the CPU
//! scorer serves them otherwise.
//!
//! # Quick Start
//!
//! ```ignore
//! use strata_vector::{Accelerator, AcceleratorConfig};
//!
//! let accel = Accelerator::new(AcceleratorConfig::default())?;
//! let index = accel.new_embedding_index(384)?;
//! index.add_batch(&ids, &vectors)?;
//! let _ = index.sync_to_gpu();
//! let hits = index.search(&query, 10)?;
//! ```
//!
//! # Architecture
//!
//! - `strata-core`: errors, value types, configuration, stats
//! - `strata-gpu`: the `ComputeDevice` contract and hardware backends
//! - `strata-accel`: `Accelerator` and `EmbeddingIndex`
//!
//! Device buffers and kernels stay internal; callers only see the index.

pub use strata_accel::*;

/// Device-level access, for diagnostics and backend conformance checks.
pub mod device {
    pub use strata_gpu::{compiled_backends, probe, probe_order, select_device, ComputeDevice};
}
