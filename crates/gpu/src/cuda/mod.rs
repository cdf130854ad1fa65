//! CUDA compute device.
//!
//! Loads the driver at runtime and runs the similarity kernels from
//! `kernels::PTX_MODULE`. `CudaDevice::try_new()` fails cleanly when there
//! is no driver or no GPU, and the selector moves on to the next backend.

use std::os::raw::c_void;
use std::sync::Arc;

use strata_core::{AccelError, AccelResult, BackendKind, DeviceInfo};

use crate::device::{kernel_u32, ComputeDevice, DeviceBuffer};
use ffi::{CUdeviceptr, CUfunction, CUmodule, CUstream, CudaApi};

pub(crate) mod ffi;
mod kernels;

const BLOCK_SIZE: usize = 256;

/// One device allocation, freed with `cuMemFree` on drop.
struct CudaBuffer {
    ptr: CUdeviceptr,
    api: Arc<CudaApi>,
}

impl Drop for CudaBuffer {
    fn drop(&mut self) {
        if self.ptr != 0 {
            if let Err(e) = self.api.mem_free(self.ptr) {
                tracing::warn!(target: "strata::gpu", error = %e, "CUDA: failed to free device memory");
            }
        }
    }
}

// SAFETY: the device pointer is an integer handle into device memory and
// the API it frees through is thread-safe.
unsafe impl Send for CudaBuffer {}
unsafe impl Sync for CudaBuffer {}

/// CUDA device 0 with its stream and resolved kernels.
pub struct CudaDevice {
    api: Arc<CudaApi>,
    stream: CUstream,
    module: CUmodule,
    fn_normalize_rows: CUfunction,
    fn_cosine_scores: CUfunction,
}

// SAFETY: stream, module and function handles belong to the context, which
// every API call binds before use.
unsafe impl Send for CudaDevice {}
unsafe impl Sync for CudaDevice {}

impl CudaDevice {
    /// Load the driver, create a stream and JIT the PTX module.
    pub fn try_new() -> AccelResult<Self> {
        let api = Arc::new(CudaApi::load()?);
        let stream = api.stream_create().map_err(AccelError::DeviceCreation)?;
        let module = match api.module_load_data(kernels::PTX_MODULE) {
            Ok(module) => module,
            Err(e) => {
                let _ = api.stream_destroy(stream);
                return Err(AccelError::DeviceCreation(e));
            }
        };

        let resolve = |name: &std::ffi::CStr| api.module_get_function(module, name);
        let functions = resolve(c"normalize_rows").and_then(|n| Ok((n, resolve(c"cosine_scores")?)));
        let (fn_normalize_rows, fn_cosine_scores) = match functions {
            Ok(pair) => pair,
            Err(e) => {
                let _ = api.module_unload(module);
                let _ = api.stream_destroy(stream);
                return Err(AccelError::DeviceCreation(e));
            }
        };

        tracing::debug!(
            target: "strata::gpu",
            device = %api.info().name,
            memory_mb = api.info().memory_mb(),
            "CUDA device initialized"
        );

        Ok(Self {
            api,
            stream,
            module,
            fn_normalize_rows,
            fn_cosine_scores,
        })
    }

    fn alloc(&self, count: usize) -> AccelResult<CudaBuffer> {
        let bytes = count.max(1) * std::mem::size_of::<f32>();
        let ptr = self
            .api
            .mem_alloc(bytes)
            .map_err(AccelError::BufferCreation)?;
        Ok(CudaBuffer {
            ptr,
            api: Arc::clone(&self.api),
        })
    }

    fn sync(&self) -> AccelResult<()> {
        self.api
            .stream_synchronize(self.stream)
            .map_err(AccelError::KernelExecution)
    }

    /// Launch `func` over `rows` threads and wait for it.
    ///
    /// # Safety
    ///
    /// `params` must match the kernel's parameter list exactly.
    unsafe fn run(&self, func: CUfunction, rows: usize, params: &mut [*mut c_void]) -> AccelResult<()> {
        let grid = kernel_u32(rows.div_ceil(BLOCK_SIZE), "grid size")?;
        self.api
            .launch_kernel(func, grid, BLOCK_SIZE as u32, self.stream, params)
            .map_err(AccelError::KernelExecution)?;
        self.sync()
    }
}

impl ComputeDevice for CudaDevice {
    fn kind(&self) -> BackendKind {
        BackendKind::Cuda
    }

    fn info(&self) -> &DeviceInfo {
        self.api.info()
    }

    fn new_buffer(&self, data: &[f32]) -> AccelResult<DeviceBuffer> {
        let buf = self.alloc(data.len())?;
        if !data.is_empty() {
            self.api
                .memcpy_h_to_d(buf.ptr, data)
                .map_err(AccelError::BufferCreation)?;
        }
        Ok(DeviceBuffer::new(BackendKind::Cuda, data.len(), buf))
    }

    fn new_empty_buffer(&self, count: usize) -> AccelResult<DeviceBuffer> {
        let buf = self.alloc(count)?;
        Ok(DeviceBuffer::new(BackendKind::Cuda, count, buf))
    }

    fn read_buffer(&self, buffer: &DeviceBuffer) -> AccelResult<Vec<f32>> {
        let buf = buffer.native::<CudaBuffer>()?;
        let mut host = vec![0.0f32; buffer.len()];
        if !host.is_empty() {
            self.sync()?;
            self.api
                .memcpy_d_to_h(&mut host, buf.ptr)
                .map_err(AccelError::KernelExecution)?;
        }
        Ok(host)
    }

    fn normalize_vectors(&self, buffer: &mut DeviceBuffer, n: usize, dims: usize) -> AccelResult<()> {
        buffer.require_len(n * dims, "vectors")?;
        let buf = buffer.native::<CudaBuffer>()?;
        if n == 0 || dims == 0 {
            return Ok(());
        }

        let mut p_data = buf.ptr;
        let mut p_n = kernel_u32(n, "n")?;
        let mut p_dims = kernel_u32(dims, "dims")?;
        let mut params: [*mut c_void; 3] = [
            &mut p_data as *mut _ as *mut c_void,
            &mut p_n as *mut _ as *mut c_void,
            &mut p_dims as *mut _ as *mut c_void,
        ];
        // SAFETY: three params matching normalize_rows(u64, u32, u32); the
        // locals outlive the synchronized launch.
        unsafe { self.run(self.fn_normalize_rows, n, &mut params) }
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
        let emb = embeddings.native::<CudaBuffer>()?;
        let q = query.native::<CudaBuffer>()?;
        let out = scores.native::<CudaBuffer>()?;
        if n == 0 {
            return Ok(());
        }

        let mut p_emb = emb.ptr;
        let mut p_query = q.ptr;
        let mut p_scores = out.ptr;
        let mut p_n = kernel_u32(n, "n")?;
        let mut p_dims = kernel_u32(dims, "dims")?;
        let mut p_normalized = u32::from(already_normalized);
        let mut params: [*mut c_void; 6] = [
            &mut p_emb as *mut _ as *mut c_void,
            &mut p_query as *mut _ as *mut c_void,
            &mut p_scores as *mut _ as *mut c_void,
            &mut p_n as *mut _ as *mut c_void,
            &mut p_dims as *mut _ as *mut c_void,
            &mut p_normalized as *mut _ as *mut c_void,
        ];
        // SAFETY: six params matching cosine_scores(u64, u64, u64, u32, u32,
        // u32); the locals outlive the synchronized launch.
        unsafe { self.run(self.fn_cosine_scores, n, &mut params) }
    }
}

impl Drop for CudaDevice {
    fn drop(&mut self) {
        let _ = self.api.stream_synchronize(self.stream);
        if let Err(e) = self.api.module_unload(self.module) {
            tracing::warn!(target: "strata::gpu", error = %e, "CUDA: failed to unload module");
        }
        if let Err(e) = self.api.stream_destroy(self.stream) {
            tracing::warn!(target: "strata::gpu", error = %e, "CUDA: failed to destroy stream");
        }
        // The context itself is destroyed by CudaApi once the last buffer
        // holding an Arc to it is gone.
    }
}
