//! OpenCL compute device.
//!
//! The portable path for AMD, Intel and other GPUs without CUDA or Metal.
//! The ICD loader is opened at runtime and the kernels are built from
//! OpenCL C source for the chosen device.

use std::sync::Arc;

use parking_lot::Mutex;
use strata_core::{AccelError, AccelResult, BackendKind, DeviceInfo};

use crate::device::{kernel_u32, ComputeDevice, DeviceBuffer};
use ffi::{ClKernel, ClMem, ClProgram, OpenClApi};

mod ffi;
mod kernels;

/// One `cl_mem` allocation, released on drop.
struct OpenClBuffer {
    mem: ClMem,
    api: Arc<OpenClApi>,
}

impl Drop for OpenClBuffer {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            if let Err(e) = self.api.release_mem(self.mem) {
                tracing::warn!(target: "strata::gpu", error = %e, "OpenCL: failed to release buffer");
            }
        }
    }
}

// SAFETY: cl_mem handles are reference-counted runtime objects usable from
// any thread.
unsafe impl Send for OpenClBuffer {}
unsafe impl Sync for OpenClBuffer {}

/// A kernel object. Arguments are per-kernel state, so set-and-launch runs
/// under the lock.
struct KernelSlot(Mutex<ClKernel>);

// SAFETY: the handle is only used while the mutex is held.
unsafe impl Send for KernelSlot {}
unsafe impl Sync for KernelSlot {}

/// First OpenCL GPU device with the similarity kernels built.
pub struct OpenClDevice {
    api: Arc<OpenClApi>,
    program: ClProgram,
    normalize_rows: KernelSlot,
    cosine_scores: KernelSlot,
}

// SAFETY: program is immutable after build; kernels are behind mutexes.
unsafe impl Send for OpenClDevice {}
unsafe impl Sync for OpenClDevice {}

impl OpenClDevice {
    /// Open the first GPU and build the kernels.
    pub fn try_new() -> AccelResult<Self> {
        let api = Arc::new(OpenClApi::load()?);
        let program = api
            .build_program(kernels::CL_SOURCE)
            .map_err(AccelError::DeviceCreation)?;

        let normalize_rows = match api.create_kernel(program, c"normalize_rows") {
            Ok(k) => k,
            Err(e) => {
                release_program(&api, program);
                return Err(AccelError::DeviceCreation(e));
            }
        };
        let cosine_scores = match api.create_kernel(program, c"cosine_scores") {
            Ok(k) => k,
            Err(e) => {
                release_kernel(&api, normalize_rows);
                release_program(&api, program);
                return Err(AccelError::DeviceCreation(e));
            }
        };

        tracing::debug!(
            target: "strata::gpu",
            device = %api.info().name,
            memory_mb = api.info().memory_mb(),
            "OpenCL device initialized"
        );

        Ok(Self {
            api,
            program,
            normalize_rows: KernelSlot(Mutex::new(normalize_rows)),
            cosine_scores: KernelSlot(Mutex::new(cosine_scores)),
        })
    }

    fn wrap(&self, mem: ClMem, len: usize) -> DeviceBuffer {
        DeviceBuffer::new(
            BackendKind::OpenCl,
            len,
            OpenClBuffer {
                mem,
                api: Arc::clone(&self.api),
            },
        )
    }
}

impl ComputeDevice for OpenClDevice {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenCl
    }

    fn info(&self) -> &DeviceInfo {
        self.api.info()
    }

    fn new_buffer(&self, data: &[f32]) -> AccelResult<DeviceBuffer> {
        if data.is_empty() {
            return self.new_empty_buffer(0);
        }
        let mem = self
            .api
            .create_buffer(std::mem::size_of_val(data), Some(data))
            .map_err(AccelError::BufferCreation)?;
        Ok(self.wrap(mem, data.len()))
    }

    fn new_empty_buffer(&self, count: usize) -> AccelResult<DeviceBuffer> {
        let bytes = count.max(1) * std::mem::size_of::<f32>();
        let mem = self
            .api
            .create_buffer(bytes, None)
            .map_err(AccelError::BufferCreation)?;
        Ok(self.wrap(mem, count))
    }

    fn read_buffer(&self, buffer: &DeviceBuffer) -> AccelResult<Vec<f32>> {
        let buf = buffer.native::<OpenClBuffer>()?;
        let mut host = vec![0.0f32; buffer.len()];
        if !host.is_empty() {
            self.api
                .read_buffer(buf.mem, &mut host)
                .map_err(AccelError::KernelExecution)?;
        }
        Ok(host)
    }

    fn normalize_vectors(&self, buffer: &mut DeviceBuffer, n: usize, dims: usize) -> AccelResult<()> {
        buffer.require_len(n * dims, "vectors")?;
        let buf = buffer.native::<OpenClBuffer>()?;
        if n == 0 || dims == 0 {
            return Ok(());
        }
        let n32 = kernel_u32(n, "n")?;
        let dims32 = kernel_u32(dims, "dims")?;

        let kernel = self.normalize_rows.0.lock();
        // SAFETY: argument types match normalize_rows(float*, uint, uint) and
        // the kernel lock is held through the launch.
        let bound = unsafe {
            self.api
                .set_arg(*kernel, 0, &buf.mem)
                .and_then(|_| self.api.set_arg(*kernel, 1, &n32))
                .and_then(|_| self.api.set_arg(*kernel, 2, &dims32))
        };
        bound
            .and_then(|_| self.api.run_1d(*kernel, n))
            .map_err(AccelError::KernelExecution)
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
        embeddings.require_len(n * dims, "embeddings")?;
        query.require_len(dims, "query")?;
        scores.require_len(n, "scores")?;
        let emb = embeddings.native::<OpenClBuffer>()?;
        let q = query.native::<OpenClBuffer>()?;
        let out = scores.native::<OpenClBuffer>()?;
        if n == 0 {
            return Ok(());
        }
        let n32 = kernel_u32(n, "n")?;
        let dims32 = kernel_u32(dims, "dims")?;
        let normalized = u32::from(already_normalized);

        let kernel = self.cosine_scores.0.lock();
        // SAFETY: argument types match cosine_scores(float*, float*, float*,
        // uint, uint, uint) and the kernel lock is held through the launch.
        let bound = unsafe {
            self.api
                .set_arg(*kernel, 0, &emb.mem)
                .and_then(|_| self.api.set_arg(*kernel, 1, &q.mem))
                .and_then(|_| self.api.set_arg(*kernel, 2, &out.mem))
                .and_then(|_| self.api.set_arg(*kernel, 3, &n32))
                .and_then(|_| self.api.set_arg(*kernel, 4, &dims32))
                .and_then(|_| self.api.set_arg(*kernel, 5, &normalized))
        };
        bound
            .and_then(|_| self.api.run_1d(*kernel, n))
            .map_err(AccelError::KernelExecution)
    }
}

impl Drop for OpenClDevice {
    fn drop(&mut self) {
        release_kernel(&self.api, *self.normalize_rows.0.get_mut());
        release_kernel(&self.api, *self.cosine_scores.0.get_mut());
        release_program(&self.api, self.program);
    }
}

fn release_kernel(api: &OpenClApi, kernel: ClKernel) {
    if let Err(e) = api.release_kernel(kernel) {
        tracing::warn!(target: "strata::gpu", error = %e, "OpenCL: failed to release kernel");
    }
}

fn release_program(api: &OpenClApi, program: ClProgram) {
    if let Err(e) = api.release_program(program) {
        tracing::warn!(target: "strata::gpu", error = %e, "OpenCL: failed to release program");
    }
}
