//! Metal compute device for Apple GPUs.
//!
//! Talks to Metal.framework through raw Objective-C messages and compiles
//! the MSL kernels at startup. Buffers use shared storage, so uploads and
//! downloads are plain memcpys through `contents`. Every dispatch commits
//! its own command buffer and waits, which keeps the device shareable
//! across threads without an encoder lock.

use std::os::raw::c_void;

use strata_core::{AccelError, AccelResult, BackendKind, DeviceInfo};

use crate::device::{kernel_u32, ComputeDevice, DeviceBuffer};
use ffi::*;

mod ffi;
mod kernels;

const THREADS_PER_GROUP: usize = 256;

/// One retained `MTLBuffer`, released on drop.
struct MetalBuffer {
    buffer: Id,
    release: Sel,
}

// Shared-storage buffers are safe to touch from any thread once the GPU
// work that writes them has completed.
unsafe impl Send for MetalBuffer {}
unsafe impl Sync for MetalBuffer {}

impl Drop for MetalBuffer {
    fn drop(&mut self) {
        if self.buffer != NIL {
            // SAFETY: we own one reference from newBuffer*.
            unsafe { msg_send_void(self.buffer, self.release) }
        }
    }
}

/// The system default Metal device with compiled pipelines.
pub struct MetalDevice {
    device: Id,
    command_queue: Id,
    sels: Selectors,
    pso_normalize_rows: Id,
    pso_cosine_scores: Id,
    info: DeviceInfo,
}

// Command queues are thread-safe, and no encoder outlives a single call.
unsafe impl Send for MetalDevice {}
unsafe impl Sync for MetalDevice {}

impl MetalDevice {
    /// Open the default device and build both compute pipelines.
    pub fn try_new() -> AccelResult<Self> {
        let _pool = AutoreleasePool::new();
        // SAFETY: every object created here is either released on the error
        // path or owned by the returned device.
        unsafe {
            let device = MTLCreateSystemDefaultDevice();
            if device == NIL {
                return Err(AccelError::not_available(
                    BackendKind::Metal.as_str(),
                    "no Metal device available",
                ));
            }
            let sels = Selectors::new();

            let name = string_from_ns(msg_send_id(device, sels.name));
            let memory_bytes = msg_send_u64(device, sels.recommended_max_working_set_size);

            let command_queue = msg_send_id(device, sels.new_command_queue);
            if command_queue == NIL {
                msg_send_void(device, sels.release);
                return Err(AccelError::DeviceCreation(
                    "failed to create Metal command queue".into(),
                ));
            }

            let psos = match Self::build_pipelines(device, &sels) {
                Ok(psos) => psos,
                Err(e) => {
                    msg_send_void(command_queue, sels.release);
                    msg_send_void(device, sels.release);
                    return Err(e);
                }
            };

            tracing::debug!(target: "strata::gpu", device = %name, "Metal device initialized");

            Ok(Self {
                device,
                command_queue,
                sels,
                pso_normalize_rows: psos[0],
                pso_cosine_scores: psos[1],
                info: DeviceInfo {
                    ordinal: 0,
                    name,
                    memory_bytes,
                },
            })
        }
    }

    unsafe fn build_pipelines(device: Id, sels: &Selectors) -> AccelResult<[Id; 2]> {
        let source = ns_string(kernels::MSL_SOURCE);
        let mut error: Id = NIL;
        let library = msg_send_id_id_id_err(device, sels.new_library_with_source, source, NIL, &mut error);
        if library == NIL {
            return Err(AccelError::DeviceCreation(format!(
                "Metal MSL compile error: {}",
                obj_description(error)
            )));
        }

        let mut psos = [NIL; 2];
        let mut failure = None;
        for (slot, name) in psos.iter_mut().zip(kernels::KERNEL_NAMES) {
            let func = msg_send_id_id(library, sels.new_function_with_name, ns_string(name));
            if func == NIL {
                failure = Some(format!("Metal kernel function '{}' not found", name));
                break;
            }
            let mut pso_error: Id = NIL;
            let pso = msg_send_id_id_err(device, sels.new_compute_pipeline, func, &mut pso_error);
            msg_send_void(func, sels.release);
            if pso == NIL {
                failure = Some(format!(
                    "Metal pipeline creation failed for '{}': {}",
                    name,
                    obj_description(pso_error)
                ));
                break;
            }
            *slot = pso;
        }
        msg_send_void(library, sels.release);

        match failure {
            None => Ok(psos),
            Some(msg) => {
                for pso in psos.into_iter().filter(|p| *p != NIL) {
                    msg_send_void(pso, sels.release);
                }
                Err(AccelError::DeviceCreation(msg))
            }
        }
    }

    fn wrap(&self, buffer: Id, len: usize) -> DeviceBuffer {
        DeviceBuffer::new(
            BackendKind::Metal,
            len,
            MetalBuffer {
                buffer,
                release: self.sels.release,
            },
        )
    }

    /// Encode one dispatch over `rows` threads, commit it and wait.
    ///
    /// `buffers` bind at indices 0.., then `constants` continue the index
    /// sequence as `uint` arguments.
    unsafe fn dispatch(&self, pso: Id, rows: usize, buffers: &[Id], constants: &[u32]) -> AccelResult<()> {
        let _pool = AutoreleasePool::new();
        let cmd = msg_send_id(self.command_queue, self.sels.command_buffer);
        if cmd == NIL {
            return Err(AccelError::KernelExecution("Metal commandBuffer returned nil".into()));
        }
        let enc = msg_send_id(cmd, self.sels.compute_command_encoder);
        if enc == NIL {
            return Err(AccelError::KernelExecution(
                "Metal computeCommandEncoder returned nil".into(),
            ));
        }

        msg_send_void_id(enc, self.sels.set_compute_pipeline, pso);
        for (index, buf) in buffers.iter().enumerate() {
            msg_send_set_buffer(enc, self.sels.set_buffer, *buf, 0, index);
        }
        for (offset, value) in constants.iter().enumerate() {
            msg_send_set_bytes(
                enc,
                self.sels.set_bytes,
                (value as *const u32).cast::<c_void>(),
                std::mem::size_of::<u32>(),
                buffers.len() + offset,
            );
        }
        let groups = rows.div_ceil(THREADS_PER_GROUP);
        msg_send_dispatch(enc, self.sels.dispatch_threadgroups, groups, 1, 1, THREADS_PER_GROUP, 1, 1);
        msg_send_void(enc, self.sels.end_encoding);
        msg_send_void(cmd, self.sels.commit);
        msg_send_void(cmd, self.sels.wait_until_completed);

        if msg_send_nsuinteger(cmd, self.sels.status) == MTL_COMMAND_BUFFER_STATUS_ERROR {
            let err = msg_send_id(cmd, self.sels.error);
            return Err(AccelError::KernelExecution(format!(
                "Metal command buffer failed: {}",
                obj_description(err)
            )));
        }
        Ok(())
    }
}

impl ComputeDevice for MetalDevice {
    fn kind(&self) -> BackendKind {
        BackendKind::Metal
    }

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn new_buffer(&self, data: &[f32]) -> AccelResult<DeviceBuffer> {
        if data.is_empty() {
            return self.new_empty_buffer(0);
        }
        // SAFETY: data is a live slice; Metal copies it before returning.
        let buffer = unsafe {
            msg_send_new_buffer(
                self.device,
                self.sels.new_buffer_with_bytes,
                data.as_ptr().cast(),
                std::mem::size_of_val(data),
                MTL_RESOURCE_STORAGE_MODE_SHARED,
            )
        };
        if buffer == NIL {
            return Err(AccelError::BufferCreation(format!(
                "Metal could not allocate {} bytes",
                std::mem::size_of_val(data)
            )));
        }
        Ok(self.wrap(buffer, data.len()))
    }

    fn new_empty_buffer(&self, count: usize) -> AccelResult<DeviceBuffer> {
        let bytes = count.max(1) * std::mem::size_of::<f32>();
        // SAFETY: plain allocation message.
        let buffer = unsafe {
            msg_send_new_buffer_length(
                self.device,
                self.sels.new_buffer_with_length,
                bytes,
                MTL_RESOURCE_STORAGE_MODE_SHARED,
            )
        };
        if buffer == NIL {
            return Err(AccelError::BufferCreation(format!(
                "Metal could not allocate {} bytes",
                bytes
            )));
        }
        Ok(self.wrap(buffer, count))
    }

    fn read_buffer(&self, buffer: &DeviceBuffer) -> AccelResult<Vec<f32>> {
        let buf = buffer.native::<MetalBuffer>()?;
        if buffer.is_empty() {
            return Ok(Vec::new());
        }
        // SAFETY: shared storage holds at least `len` floats, and every
        // dispatch waited for completion before returning.
        unsafe {
            let ptr = msg_send_ptr(buf.buffer, self.sels.contents) as *const f32;
            if ptr.is_null() {
                return Err(AccelError::InvalidBuffer("Metal buffer has no CPU contents".into()));
            }
            Ok(std::slice::from_raw_parts(ptr, buffer.len()).to_vec())
        }
    }

    fn normalize_vectors(&self, buffer: &mut DeviceBuffer, n: usize, dims: usize) -> AccelResult<()> {
        buffer.require_len(n * dims, "vectors")?;
        let buf = buffer.native::<MetalBuffer>()?;
        if n == 0 || dims == 0 {
            return Ok(());
        }
        let constants = [kernel_u32(n, "n")?, kernel_u32(dims, "dims")?];
        // SAFETY: bindings match normalize_rows(data, n, dims).
        unsafe { self.dispatch(self.pso_normalize_rows, n, &[buf.buffer], &constants) }
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
        let emb = embeddings.native::<MetalBuffer>()?;
        let q = query.native::<MetalBuffer>()?;
        let out = scores.native::<MetalBuffer>()?;
        if n == 0 {
            return Ok(());
        }
        let constants = [
            kernel_u32(n, "n")?,
            kernel_u32(dims, "dims")?,
            u32::from(already_normalized),
        ];
        // SAFETY: bindings match cosine_scores(emb, query, scores, n, dims,
        // normalized).
        unsafe {
            self.dispatch(
                self.pso_cosine_scores,
                n,
                &[emb.buffer, q.buffer, out.buffer],
                &constants,
            )
        }
    }
}

impl Drop for MetalDevice {
    fn drop(&mut self) {
        // SAFETY: each object holds exactly one reference owned by self.
        unsafe {
            for obj in [
                self.pso_normalize_rows,
                self.pso_cosine_scores,
                self.command_queue,
                self.device,
            ] {
                if obj != NIL {
                    msg_send_void(obj, self.sels.release);
                }
            }
        }
    }
}
