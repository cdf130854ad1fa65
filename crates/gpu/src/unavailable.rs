//! Stand-in device for builds or hosts without a usable GPU.
//!
//! Implements the full `ComputeDevice` contract, answering every fallible
//! operation with `BackendNotAvailable`. The accelerator holds one of these
//! when acceleration is disabled or failed, so index code never branches on
//! whether a real device exists.

use strata_core::{AccelError, AccelResult, BackendKind, DeviceInfo, ScoredSlot};

use crate::device::{ComputeDevice, DeviceBuffer};

/// A device that is never available.
#[derive(Debug, Clone)]
pub struct UnavailableDevice {
    /// Backend this stand-in answers for (`None` when acceleration is off).
    kind: BackendKind,
    info: DeviceInfo,
    reason: String,
}

impl UnavailableDevice {
    /// Stand-in used when the accelerator has no device at all.
    pub fn new() -> Self {
        Self::for_backend(BackendKind::None, "GPU acceleration is disabled")
    }

    /// Stand-in for a specific backend, carrying the reason it is missing.
    pub fn for_backend(kind: BackendKind, reason: impl Into<String>) -> Self {
        UnavailableDevice {
            kind,
            info: DeviceInfo::default(),
            reason: reason.into(),
        }
    }

    /// Stand-in for a backend whose cargo feature was not enabled.
    pub fn not_compiled(kind: BackendKind) -> Self {
        Self::for_backend(
            kind,
            format!("not compiled in; enable the `{}` feature", kind.feature_name()),
        )
    }

    /// The error every operation returns.
    pub fn error(&self) -> AccelError {
        AccelError::not_available(self.kind.as_str(), self.reason.clone())
    }

    /// Why this device is unavailable.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl Default for UnavailableDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeDevice for UnavailableDevice {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn new_buffer(&self, _data: &[f32]) -> AccelResult<DeviceBuffer> {
        Err(self.error())
    }

    fn new_empty_buffer(&self, _count: usize) -> AccelResult<DeviceBuffer> {
        Err(self.error())
    }

    fn read_buffer(&self, _buffer: &DeviceBuffer) -> AccelResult<Vec<f32>> {
        Err(self.error())
    }

    fn normalize_vectors(
        &self,
        _buffer: &mut DeviceBuffer,
        _n: usize,
        _dims: usize,
    ) -> AccelResult<()> {
        Err(self.error())
    }

    fn cosine_similarity(
        &self,
        _embeddings: &DeviceBuffer,
        _query: &DeviceBuffer,
        _scores: &mut DeviceBuffer,
        _n: usize,
        _dims: usize,
        _already_normalized: bool,
    ) -> AccelResult<()> {
        Err(self.error())
    }

    fn top_k(
        &self,
        _scores: &DeviceBuffer,
        _n: usize,
        _k: usize,
    ) -> AccelResult<(Vec<usize>, Vec<f32>)> {
        Err(self.error())
    }

    fn search(
        &self,
        _embeddings: &DeviceBuffer,
        _query: &[f32],
        _n: usize,
        _dims: usize,
        _k: usize,
        _normalized: bool,
    ) -> AccelResult<Vec<ScoredSlot>> {
        Err(self.error())
    }
}
