//! Accelerator: device ownership and the fallback policy
//!
//! An `Accelerator` selects at most one compute device at construction and
//! hands it to every `EmbeddingIndex` it creates. When no device is wanted
//! or none can be initialized, it holds an [`UnavailableDevice`] and every
//! index serves queries from the CPU.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use strata_core::{AccelError, AccelResult, AcceleratorConfig, AcceleratorStats, BackendKind};
use strata_gpu::{select_device, ComputeDevice, UnavailableDevice};

use crate::index::EmbeddingIndex;

/// Search counters shared by an accelerator and all of its indexes.
#[derive(Debug, Default)]
pub(crate) struct SearchCounters {
    pub(crate) gpu: AtomicU64,
    pub(crate) cpu: AtomicU64,
    pub(crate) indexes: AtomicU64,
}

/// Owner of the selected compute device.
///
/// # Example
///
/// ```ignore
/// let accel = Accelerator::new(AcceleratorConfig::default())?;
/// let index = accel.new_embedding_index(384)?;
/// index.add("node-1", &embedding)?;
/// index.sync_to_gpu().ok();
/// let hits = index.search(&query, 10)?;
/// ```
pub struct Accelerator {
    config: AcceleratorConfig,
    device: Arc<dyn ComputeDevice>,
    counters: Arc<SearchCounters>,
}

impl Accelerator {
    /// Create an accelerator, applying the fallback policy.
    ///
    /// - `enabled == false`: succeeds with no device.
    /// - device found: succeeds with that device.
    /// - no device and `fallback_on_error`: succeeds with no device; the
    ///   underlying error is logged, never returned.
    /// - no device and not `fallback_on_error`: returns the error.
    pub fn new(config: AcceleratorConfig) -> AccelResult<Self> {
        let device: Arc<dyn ComputeDevice> = if !config.enabled {
            tracing::info!(target: "strata::accel", "GPU acceleration disabled, serving searches from CPU");
            Arc::new(UnavailableDevice::new())
        } else {
            match select_device(config.preferred_backend) {
                Ok(device) => device,
                Err(e) if config.fallback_on_error => {
                    tracing::warn!(
                        target: "strata::accel",
                        error = %e,
                        "GPU initialization failed, falling back to CPU"
                    );
                    Arc::new(UnavailableDevice::for_backend(
                        BackendKind::None,
                        format!("GPU initialization failed: {}", e),
                    ))
                }
                Err(e) => return Err(e),
            }
        };
        Ok(Self::with_device(config, device))
    }

    /// An accelerator that never touches a GPU.
    pub fn cpu_only() -> Self {
        Self::with_device(
            AcceleratorConfig::cpu_only(),
            Arc::new(UnavailableDevice::new()),
        )
    }

    /// Build an accelerator around an already-initialized device.
    ///
    /// Skips probing; the caller chose the device. Acceleration is enabled
    /// only if the device is a hardware backend.
    pub fn with_device(config: AcceleratorConfig, device: Arc<dyn ComputeDevice>) -> Self {
        if device.kind().is_hardware() {
            tracing::info!(
                target: "strata::accel",
                backend = %device.kind(),
                device = %device.info().name,
                memory_mb = device.info().memory_mb(),
                "Accelerator ready"
            );
        }
        Accelerator {
            config,
            device,
            counters: Arc::new(SearchCounters::default()),
        }
    }

    /// True when a hardware device is attached.
    pub fn is_enabled(&self) -> bool {
        self.device.kind().is_hardware()
    }

    /// Selected backend; `BackendKind::None` without a device.
    pub fn backend(&self) -> BackendKind {
        if self.is_enabled() {
            self.device.kind()
        } else {
            BackendKind::None
        }
    }

    /// Device name reported by the driver; empty without a device.
    pub fn device_name(&self) -> &str {
        &self.device.info().name
    }

    /// Device memory in MB; 0 without a device.
    pub fn device_memory_mb(&self) -> u64 {
        self.device.info().memory_mb()
    }

    /// Configuration this accelerator was built with.
    pub fn config(&self) -> &AcceleratorConfig {
        &self.config
    }

    /// Create an empty index of fixed dimensionality.
    ///
    /// # Errors
    ///
    /// `InvalidDimension` if `dimensions` is 0.
    pub fn new_embedding_index(&self, dimensions: usize) -> AccelResult<EmbeddingIndex> {
        if dimensions == 0 {
            return Err(AccelError::InvalidDimension { dimension: dimensions });
        }
        self.counters.indexes.fetch_add(1, Ordering::Relaxed);
        Ok(EmbeddingIndex::new(
            dimensions,
            self.config.normalize_on_sync,
            Arc::clone(&self.device),
            Arc::clone(&self.counters),
        ))
    }

    /// Snapshot of device identity and search counts across all indexes.
    pub fn stats(&self) -> AcceleratorStats {
        AcceleratorStats {
            backend: self.backend(),
            device_name: self.device_name().to_string(),
            device_memory_mb: self.device_memory_mb(),
            indexes_created: self.counters.indexes.load(Ordering::Relaxed),
            searches_gpu: self.counters.gpu.load(Ordering::Relaxed),
            searches_cpu: self.counters.cpu.load(Ordering::Relaxed),
        }
    }

    /// Release the accelerator's hold on the device.
    ///
    /// Native resources are freed once the last index created from this
    /// accelerator is dropped as well.
    pub fn release(self) {
        tracing::info!(target: "strata::accel", backend = %self.backend(), "Accelerator released");
        drop(self);
    }
}

impl fmt::Debug for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accelerator")
            .field("backend", &self.backend())
            .field("device_name", &self.device_name())
            .field("config", &self.config)
            .finish()
    }
}
