//! Compute devices for Strata vector search
//!
//! Every hardware family implements [`ComputeDevice`]. Backends are compiled
//! only when their cargo feature is enabled:
//!
//! | Backend | Feature | Memory model |
//! |---------|---------|--------------|
//! | CUDA | `gpu-cuda` | discrete, explicit host/device copies |
//! | Metal | `gpu-metal` (macOS) | unified, shared-storage buffers |
//! | OpenCL | `gpu-opencl` | portable, explicit host/device copies |
//!
//! [`UnavailableDevice`] is always compiled. It answers every operation with
//! `BackendNotAvailable`, so callers are written once against the trait and
//! link identically whichever backends are enabled.
//!
//! # Usage
//!
//! ```ignore
//! use strata_gpu::select_device;
//!
//! let device = select_device(None)?;
//! let embeddings = device.new_buffer(&flat_vectors)?;
//! let hits = device.search(&embeddings, &query, n, dims, 10, false)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod select;
pub mod topk;
pub mod unavailable;

#[cfg(any(feature = "gpu-cuda", feature = "gpu-opencl"))]
mod dl;

#[cfg(feature = "gpu-cuda")]
pub mod cuda;

#[cfg(all(feature = "gpu-metal", target_os = "macos"))]
pub mod metal;

#[cfg(feature = "gpu-opencl")]
pub mod opencl;

#[cfg(any(test, feature = "test-utils"))]
pub mod host;

pub use device::{ComputeDevice, DeviceBuffer};
pub use select::{compiled_backends, probe, probe_order, select_device};
pub use topk::select_top_k;
pub use unavailable::UnavailableDevice;

#[cfg(any(test, feature = "test-utils"))]
pub use host::HostDevice;
