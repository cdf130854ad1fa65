//! GPU-accelerated embedding search for Strata
//!
//! An [`Accelerator`] picks a compute device once, at construction, and
//! applies the fallback policy: with `fallback_on_error` a missing or broken
//! GPU degrades to CPU-only search instead of failing startup.
//!
//! An [`EmbeddingIndex`] stores `id → vector` on the CPU and optionally
//! mirrors it to the device with `sync_to_gpu`. Searches use the mirror
//! while it is current and the CPU scorer otherwise; they never fail
//! because of the hardware.
//!
//! ```ignore
//! use strata_accel::{Accelerator, AcceleratorConfig};
//!
//! let accel = Accelerator::new(AcceleratorConfig::default())?;
//! let index = accel.new_embedding_index(4)?;
//! index.add("node-1", &[1.0, 0.0, 0.0, 0.0])?;
//! index.add("node-2", &[0.0, 1.0, 0.0, 0.0])?;
//! if accel.is_enabled() {
//!     index.sync_to_gpu()?;
//! }
//! let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 2)?;
//! assert_eq!(hits[0].id, "node-1");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accelerator;
pub mod distance;
pub mod index;

pub use accelerator::Accelerator;
pub use index::EmbeddingIndex;

pub use strata_core::{
    AccelError, AccelResult, AcceleratorConfig, AcceleratorStats, BackendKind, DeviceInfo,
    IndexStats, SearchResult, CONFIG_FILE_NAME,
};
