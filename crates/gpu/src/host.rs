//! Host-memory compute device for tests
//!
//! `HostDevice` implements the full device contract with buffers that are
//! plain `Vec<f32>`s, so the GPU path of a caller (mirror upload,
//! normalization, slot mapping, failure handling) runs on machines without
//! a GPU. Failures can be switched on per operation class.
//!
//! Only compiled for this crate's tests and with the `test-utils` feature.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use strata_core::{AccelError, AccelResult, BackendKind, DeviceInfo};

use crate::device::{ComputeDevice, DeviceBuffer};

/// A `ComputeDevice` whose buffers live in host memory.
///
/// Reports whatever hardware `kind` it was built with, so an accelerator
/// treats it as a real GPU.
pub struct HostDevice {
    kind: BackendKind,
    info: DeviceInfo,
    fail_uploads: AtomicBool,
    fail_kernels: AtomicBool,
    lost: AtomicBool,
    uploads: AtomicUsize,
    searches: AtomicUsize,
    launches: AtomicUsize,
}

impl HostDevice {
    /// An OpenCL-flavoured device named `host-emulated` with 512 MB.
    pub fn new() -> Self {
        HostDevice::with_identity(BackendKind::OpenCl, "host-emulated", 512 * 1024 * 1024)
    }

    /// A device reporting the given kind, name and memory size.
    pub fn with_identity(kind: BackendKind, name: &str, memory_bytes: u64) -> Self {
        HostDevice {
            kind,
            info: DeviceInfo {
                ordinal: 0,
                name: name.to_string(),
                memory_bytes,
            },
            fail_uploads: AtomicBool::new(false),
            fail_kernels: AtomicBool::new(false),
            lost: AtomicBool::new(false),
            uploads: AtomicUsize::new(0),
            searches: AtomicUsize::new(0),
            launches: AtomicUsize::new(0),
        }
    }

    /// Make every following `new_buffer` fail (or succeed again).
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Make every following kernel launch fail (or succeed again).
    pub fn fail_kernels(&self, fail: bool) {
        self.fail_kernels.store(fail, Ordering::SeqCst);
    }

    /// Fail every following operation, like a device that fell off the bus.
    pub fn break_device(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }

    /// Number of successful `new_buffer` calls.
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Number of scoring kernels that ran.
    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    /// Number of kernels of any kind that ran.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    fn check_lost(&self) -> AccelResult<()> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(AccelError::KernelExecution("device lost".into()));
        }
        Ok(())
    }

    fn check_uploads(&self) -> AccelResult<()> {
        self.check_lost()?;
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(AccelError::BufferCreation("injected allocation failure".into()));
        }
        Ok(())
    }

    fn check_kernels(&self) -> AccelResult<()> {
        self.check_lost()?;
        if self.fail_kernels.load(Ordering::SeqCst) {
            return Err(AccelError::KernelExecution("injected kernel failure".into()));
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        HostDevice::new()
    }
}

fn host(buffer: &DeviceBuffer) -> AccelResult<&Vec<f32>> {
    buffer.native::<Vec<f32>>()
}

fn norm(row: &[f32]) -> f32 {
    row.iter().map(|x| x * x).sum::<f32>().sqrt()
}

impl ComputeDevice for HostDevice {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn new_buffer(&self, data: &[f32]) -> AccelResult<DeviceBuffer> {
        self.check_uploads()?;
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceBuffer::new(self.kind, data.len(), data.to_vec()))
    }

    fn new_empty_buffer(&self, count: usize) -> AccelResult<DeviceBuffer> {
        self.check_uploads()?;
        Ok(DeviceBuffer::new(self.kind, count, vec![0.0f32; count]))
    }

    fn read_buffer(&self, buffer: &DeviceBuffer) -> AccelResult<Vec<f32>> {
        self.check_lost()?;
        host(buffer).cloned()
    }

    fn normalize_vectors(&self, buffer: &mut DeviceBuffer, n: usize, dims: usize) -> AccelResult<()> {
        self.check_kernels()?;
        buffer.require_len(n * dims, "vectors")?;
        if dims == 0 {
            return Ok(());
        }
        let data = buffer.native_mut::<Vec<f32>>()?;
        for row in data[..n * dims].chunks_mut(dims) {
            let len = norm(row);
            if len > 0.0 {
                row.iter_mut().for_each(|x| *x /= len);
            }
        }
        Ok(())
    }

    fn cosine_similarity(
        &self,
        embeddings: &DeviceBuffer,
        query: &DeviceBuffer,
        scores: &mut DeviceBuffer,
        n: usize,
        dims: usize,
        already_normalized: bool,
    ) -> AccelResult<()> {
        self.check_kernels()?;
        embeddings.require_len(n * dims, "embeddings")?;
        query.require_len(dims, "query")?;
        scores.require_len(n, "scores")?;
        self.searches.fetch_add(1, Ordering::SeqCst);
        if dims == 0 {
            return Ok(());
        }

        let q = host(query)?.clone();
        let rows = host(embeddings)?.clone();
        let out = scores.native_mut::<Vec<f32>>()?;
        let q_norm = norm(&q);
        for (i, row) in rows.chunks(dims).take(n).enumerate() {
            let dot: f32 = row.iter().zip(&q).map(|(a, b)| a * b).sum();
            out[i] = if already_normalized {
                dot
            } else {
                let r_norm = norm(row);
                if q_norm > 0.0 && r_norm > 0.0 {
                    dot / (q_norm * r_norm)
                } else {
                    0.0
                }
            };
        }
        Ok(())
    }
}
