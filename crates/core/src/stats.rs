//! Read-only statistics snapshots
//!
//! Consumed by metrics and health-check surfaces; any structured format
//! works, so both snapshots serialize to JSON.

use serde::Serialize;

use crate::types::BackendKind;

const BYTES_PER_MB: f64 = 1_000_000.0;

/// Snapshot of one embedding index
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    /// Number of stored embeddings
    pub count: usize,
    /// Index dimensionality
    pub dimensions: usize,
    /// Approximate vector memory: count × dimensions × 4 bytes, in MB
    pub memory_mb: f64,
    /// Whether the GPU mirror is current
    pub gpu_synced: bool,
    /// Searches served by the device
    pub searches_gpu: u64,
    /// Searches served by the CPU scorer
    pub searches_cpu: u64,
}

impl IndexStats {
    /// Approximate memory held by `count` vectors of `dimensions` f32s, in MB
    pub fn estimate_memory_mb(count: usize, dimensions: usize) -> f64 {
        (count * dimensions * std::mem::size_of::<f32>()) as f64 / BYTES_PER_MB
    }

    /// Total searches served by either path
    pub fn total_searches(&self) -> u64 {
        self.searches_gpu + self.searches_cpu
    }

    /// Serialize the snapshot for a metrics endpoint
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Snapshot of an accelerator, aggregated across all of its indexes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceleratorStats {
    /// Selected backend (`none` when serving from CPU only)
    pub backend: BackendKind,
    /// Device name reported by the driver (empty without a device)
    pub device_name: String,
    /// Device memory in MB (0 without a device)
    pub device_memory_mb: u64,
    /// Number of indexes created from this accelerator
    pub indexes_created: u64,
    /// Searches served by the device
    pub searches_gpu: u64,
    /// Searches served by the CPU scorer
    pub searches_cpu: u64,
}

impl AcceleratorStats {
    /// Serialize the snapshot for a metrics endpoint
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
