//! Compute device contract
//!
//! Provides the `ComputeDevice` trait that every hardware backend implements,
//! and `DeviceBuffer`, the owning handle for a block of device memory.
//! Backend selection happens once, when the accelerator is constructed.

use std::any::Any;
use std::fmt;

use strata_core::{AccelError, AccelResult, BackendKind, DeviceInfo, ScoredSlot};

use crate::topk::select_top_k;

/// A block of `f32`s living in device memory.
///
/// The inner representation is backend-specific and type-erased. The handle
/// is move-only: dropping it frees the native allocation exactly once.
pub struct DeviceBuffer {
    /// Number of `f32` elements the buffer holds.
    len: usize,
    /// Backend that allocated the buffer.
    backend: BackendKind,
    /// Backend-specific storage.
    inner: Box<dyn Any + Send + Sync>,
}

impl DeviceBuffer {
    /// Wrap a backend allocation.
    ///
    /// For `ComputeDevice` implementors; `len` is the element count the
    /// allocation holds, whatever its native size.
    pub fn new<T: Any + Send + Sync>(backend: BackendKind, len: usize, inner: T) -> Self {
        DeviceBuffer {
            len,
            backend,
            inner: Box::new(inner),
        }
    }

    /// Number of `f32` elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the payload in bytes.
    pub fn size_bytes(&self) -> usize {
        self.len * std::mem::size_of::<f32>()
    }

    /// Backend that owns the allocation.
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Free the device memory now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }

    /// Borrow the backend allocation, failing if it came from another backend.
    pub fn native<T: Any>(&self) -> AccelResult<&T> {
        let backend = self.backend;
        self.inner
            .downcast_ref::<T>()
            .ok_or_else(|| foreign_buffer(backend))
    }

    /// Mutable form of [`DeviceBuffer::native`], for host-backed devices.
    pub fn native_mut<T: Any>(&mut self) -> AccelResult<&mut T> {
        let backend = self.backend;
        self.inner
            .downcast_mut::<T>()
            .ok_or_else(|| foreign_buffer(backend))
    }

    /// Fail unless the buffer holds at least `needed` elements.
    pub fn require_len(&self, needed: usize, what: &str) -> AccelResult<()> {
        if self.len < needed {
            return Err(AccelError::InvalidBuffer(format!(
                "{} buffer holds {} floats, need {}",
                what, self.len, needed
            )));
        }
        Ok(())
    }
}

fn foreign_buffer(backend: BackendKind) -> AccelError {
    AccelError::InvalidBuffer(format!("buffer was allocated by the {} backend", backend))
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("len", &self.len)
            .field("backend", &self.backend)
            .finish()
    }
}

/// Trait for compute devices that execute the similarity kernels.
///
/// Implementations dispatch to CUDA, Metal or OpenCL. Every call blocks until
/// the device work it issued has completed.
///
/// # Implementor Notes
///
/// - Methods take `&self` so a device can be shared as `Arc<dyn ComputeDevice>`
/// - Buffers passed in must come from the same device; anything else is
///   `InvalidBuffer`
/// - Scores are "higher = more similar"; zero-norm vectors score `0.0`
pub trait ComputeDevice: Send + Sync {
    /// Hardware family of this device.
    fn kind(&self) -> BackendKind;

    /// Ordinal, name and memory size of this device.
    fn info(&self) -> &DeviceInfo;

    /// Allocate device memory and upload `data` into it.
    fn new_buffer(&self, data: &[f32]) -> AccelResult<DeviceBuffer>;

    /// Allocate device memory for `count` floats.
    ///
    /// Contents are unspecified until a kernel writes them.
    fn new_empty_buffer(&self, count: usize) -> AccelResult<DeviceBuffer>;

    /// Download the contents of a buffer to the host.
    fn read_buffer(&self, buffer: &DeviceBuffer) -> AccelResult<Vec<f32>>;

    /// L2-normalize `n` vectors of `dims` floats in place.
    fn normalize_vectors(&self, buffer: &mut DeviceBuffer, n: usize, dims: usize)
        -> AccelResult<()>;

    /// Score `query` against each of the `n` rows of `embeddings`.
    ///
    /// Writes `n` scores into `scores`. With `already_normalized` the score is
    /// a plain dot product; otherwise it is full cosine similarity.
    #[allow(clippy::too_many_arguments)]
    fn cosine_similarity(
        &self,
        embeddings: &DeviceBuffer,
        query: &DeviceBuffer,
        scores: &mut DeviceBuffer,
        n: usize,
        dims: usize,
        already_normalized: bool,
    ) -> AccelResult<()>;

    /// Return the `k` highest of the first `n` scores with their row indices.
    ///
    /// Ordered by score descending, ties broken by lower row index first.
    fn top_k(&self, scores: &DeviceBuffer, n: usize, k: usize) -> AccelResult<(Vec<usize>, Vec<f32>)> {
        scores.require_len(n, "scores")?;
        let host = self.read_buffer(scores)?;
        Ok(select_top_k(&host[..n], k))
    }

    /// Normalize, score and select in one call.
    ///
    /// With `normalized` the rows of `embeddings` must already be unit length
    /// (the query is normalized here); otherwise full cosine is computed.
    fn search(
        &self,
        embeddings: &DeviceBuffer,
        query: &[f32],
        n: usize,
        dims: usize,
        k: usize,
        normalized: bool,
    ) -> AccelResult<Vec<ScoredSlot>> {
        if query.len() != dims {
            return Err(AccelError::InvalidDimensions {
                expected: dims,
                got: query.len(),
            });
        }
        if n == 0 || k == 0 {
            return Ok(Vec::new());
        }
        embeddings.require_len(n * dims, "embeddings")?;

        let mut query_buf = self.new_buffer(query)?;
        if normalized {
            self.normalize_vectors(&mut query_buf, 1, dims)?;
        }
        let mut scores = self.new_empty_buffer(n)?;
        self.cosine_similarity(embeddings, &query_buf, &mut scores, n, dims, normalized)?;
        let (indices, values) = self.top_k(&scores, n, k)?;

        Ok(indices
            .into_iter()
            .zip(values)
            .map(|(index, score)| ScoredSlot { index, score })
            .collect())
    }
}

/// Checked conversion of a length to the `u32` kernels take.
#[cfg(any(feature = "gpu-cuda", feature = "gpu-metal", feature = "gpu-opencl"))]
pub(crate) fn kernel_u32(value: usize, what: &str) -> AccelResult<u32> {
    u32::try_from(value).map_err(|_| {
        AccelError::KernelExecution(format!("{} = {} exceeds the kernel's u32 range", what, value))
    })
}
