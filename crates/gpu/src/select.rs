//! Device probing and selection.
//!
//! Each backend is probed through a function that exists in every build:
//! when the backend's feature is off, the probe answers with the
//! unavailable stand-in's error instead of touching any driver.

use std::sync::Arc;

use strata_core::{AccelError, AccelResult, BackendKind};

use crate::device::ComputeDevice;
use crate::unavailable::UnavailableDevice;

/// Platform probe order, most preferred first.
///
/// Apple GPUs are reached through Metal; elsewhere CUDA is tried before the
/// portable OpenCL path.
pub fn probe_order() -> &'static [BackendKind] {
    #[cfg(target_os = "macos")]
    {
        &[BackendKind::Metal, BackendKind::OpenCl]
    }
    #[cfg(not(target_os = "macos"))]
    {
        &[BackendKind::Cuda, BackendKind::OpenCl]
    }
}

/// Backends compiled into this build.
pub fn compiled_backends() -> Vec<BackendKind> {
    let mut kinds = Vec::new();
    if cfg!(feature = "gpu-cuda") {
        kinds.push(BackendKind::Cuda);
    }
    if cfg!(all(feature = "gpu-metal", target_os = "macos")) {
        kinds.push(BackendKind::Metal);
    }
    if cfg!(feature = "gpu-opencl") {
        kinds.push(BackendKind::OpenCl);
    }
    kinds
}

/// Try to initialize exactly one backend.
pub fn probe(kind: BackendKind) -> AccelResult<Arc<dyn ComputeDevice>> {
    match kind {
        BackendKind::None => Err(UnavailableDevice::new().error()),
        BackendKind::Cuda => probe_cuda(),
        BackendKind::Metal => probe_metal(),
        BackendKind::OpenCl => probe_opencl(),
    }
}

/// Select the best available device.
///
/// Tries `preferred` first, then the platform order. Returns the first device
/// that initializes, or the error from the last backend tried.
pub fn select_device(preferred: Option<BackendKind>) -> AccelResult<Arc<dyn ComputeDevice>> {
    let mut candidates: Vec<BackendKind> = Vec::with_capacity(3);
    if let Some(kind) = preferred.filter(BackendKind::is_hardware) {
        candidates.push(kind);
    }
    for kind in probe_order() {
        if !candidates.contains(kind) {
            candidates.push(*kind);
        }
    }

    let mut last_err = None;
    for kind in candidates {
        match probe(kind) {
            Ok(device) => {
                tracing::info!(
                    target: "strata::gpu",
                    backend = %kind,
                    device = %device.info().name,
                    memory_mb = device.info().memory_mb(),
                    "Using {} compute backend",
                    kind
                );
                return Ok(device);
            }
            Err(e) => {
                tracing::info!(target: "strata::gpu", backend = %kind, error = %e, "Backend not available, trying next");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| AccelError::not_available("none", "no backends to probe")))
}

#[cfg(feature = "gpu-cuda")]
fn probe_cuda() -> AccelResult<Arc<dyn ComputeDevice>> {
    Ok(Arc::new(crate::cuda::CudaDevice::try_new()?))
}

#[cfg(not(feature = "gpu-cuda"))]
fn probe_cuda() -> AccelResult<Arc<dyn ComputeDevice>> {
    Err(UnavailableDevice::not_compiled(BackendKind::Cuda).error())
}

#[cfg(all(feature = "gpu-metal", target_os = "macos"))]
fn probe_metal() -> AccelResult<Arc<dyn ComputeDevice>> {
    Ok(Arc::new(crate::metal::MetalDevice::try_new()?))
}

#[cfg(all(feature = "gpu-metal", not(target_os = "macos")))]
fn probe_metal() -> AccelResult<Arc<dyn ComputeDevice>> {
    Err(UnavailableDevice::for_backend(BackendKind::Metal, "Metal requires macOS").error())
}

#[cfg(not(feature = "gpu-metal"))]
fn probe_metal() -> AccelResult<Arc<dyn ComputeDevice>> {
    Err(UnavailableDevice::not_compiled(BackendKind::Metal).error())
}

#[cfg(feature = "gpu-opencl")]
fn probe_opencl() -> AccelResult<Arc<dyn ComputeDevice>> {
    Ok(Arc::new(crate::opencl::OpenClDevice::try_new()?))
}

#[cfg(not(feature = "gpu-opencl"))]
fn probe_opencl() -> AccelResult<Arc<dyn ComputeDevice>> {
    Err(UnavailableDevice::not_compiled(BackendKind::OpenCl).error())
}
