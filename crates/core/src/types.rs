//! Device identity and search result types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AccelError;

/// Hardware family a compute device belongs to
///
/// `None` is the "no accelerator" backend: every query is served by the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// No device; CPU path only
    #[default]
    None,
    /// Discrete-memory NVIDIA GPUs via the CUDA driver API
    Cuda,
    /// Unified-memory Apple GPUs via Metal
    Metal,
    /// Portable OpenCL devices
    OpenCl,
}

impl BackendKind {
    /// Lowercase name used in config files and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::None => "none",
            BackendKind::Cuda => "cuda",
            BackendKind::Metal => "metal",
            BackendKind::OpenCl => "opencl",
        }
    }

    /// Cargo feature that compiles this backend in
    pub fn feature_name(&self) -> &'static str {
        match self {
            BackendKind::None => "",
            BackendKind::Cuda => "gpu-cuda",
            BackendKind::Metal => "gpu-metal",
            BackendKind::OpenCl => "gpu-opencl",
        }
    }

    /// True for every backend that represents real hardware
    pub fn is_hardware(&self) -> bool {
        !matches!(self, BackendKind::None)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = AccelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "cpu" => Ok(BackendKind::None),
            "cuda" => Ok(BackendKind::Cuda),
            "metal" => Ok(BackendKind::Metal),
            "opencl" => Ok(BackendKind::OpenCl),
            other => Err(AccelError::Config(format!(
                "unknown backend '{}'. Expected \"cuda\", \"metal\" or \"opencl\"",
                other
            ))),
        }
    }
}

/// Identity of a selected compute device
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DeviceInfo {
    /// Device ordinal within its backend
    pub ordinal: u32,
    /// Human-readable device name reported by the driver
    pub name: String,
    /// Device memory in bytes (working-set size on unified-memory devices)
    pub memory_bytes: u64,
}

impl DeviceInfo {
    /// Device memory in mebibytes
    pub fn memory_mb(&self) -> u64 {
        self.memory_bytes / (1024 * 1024)
    }
}

/// One ranked hit returned by an embedding index search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// Caller-supplied identifier of the matching entry
    pub id: String,
    /// Cosine similarity, higher = more similar
    pub score: f32,
}

impl SearchResult {
    /// Create a new search result
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        SearchResult {
            id: id.into(),
            score,
        }
    }
}

/// A score addressed by row position inside a device buffer
///
/// Devices know nothing about identifiers; the index maps `index` back to
/// the id that was uploaded into that row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredSlot {
    /// Row position in the embeddings buffer
    pub index: usize,
    /// Similarity score of that row
    pub score: f32,
}
