//! CUDA driver API bindings, resolved at runtime.
//!
//! Opens `libcuda.so.1` (Linux) or `nvcuda.dll` (Windows) through `DynLib`.
//! Only the calls the similarity kernels need are bound. Every wrapper
//! returns the failing call's name with its `CUresult`.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};

use strata_core::{AccelError, AccelResult, BackendKind, DeviceInfo};

use crate::dl::{load_sym, DynLib};

pub type CUresult = c_int;
pub type CUdevice = c_int;
pub type CUcontext = *mut c_void;
pub type CUmodule = *mut c_void;
pub type CUfunction = *mut c_void;
pub type CUdeviceptr = u64;
pub type CUstream = *mut c_void;

pub const CUDA_SUCCESS: CUresult = 0;

type FnCuInit = unsafe extern "C" fn(flags: u32) -> CUresult;
type FnCuDeviceGetCount = unsafe extern "C" fn(count: *mut c_int) -> CUresult;
type FnCuDeviceGet = unsafe extern "C" fn(device: *mut CUdevice, ordinal: c_int) -> CUresult;
type FnCuDeviceGetName =
    unsafe extern "C" fn(name: *mut c_char, len: c_int, dev: CUdevice) -> CUresult;
type FnCuDeviceTotalMem = unsafe extern "C" fn(bytes: *mut usize, dev: CUdevice) -> CUresult;
type FnCuCtxCreate =
    unsafe extern "C" fn(ctx: *mut CUcontext, flags: u32, dev: CUdevice) -> CUresult;
type FnCuCtxDestroy = unsafe extern "C" fn(ctx: CUcontext) -> CUresult;
type FnCuCtxSetCurrent = unsafe extern "C" fn(ctx: CUcontext) -> CUresult;
type FnCuMemAlloc = unsafe extern "C" fn(dptr: *mut CUdeviceptr, bytesize: usize) -> CUresult;
type FnCuMemFree = unsafe extern "C" fn(dptr: CUdeviceptr) -> CUresult;
type FnCuMemcpyHtoD =
    unsafe extern "C" fn(dst: CUdeviceptr, src: *const c_void, bytesize: usize) -> CUresult;
type FnCuMemcpyDtoH =
    unsafe extern "C" fn(dst: *mut c_void, src: CUdeviceptr, bytesize: usize) -> CUresult;
type FnCuModuleLoadData =
    unsafe extern "C" fn(module: *mut CUmodule, image: *const c_void) -> CUresult;
type FnCuModuleGetFunction =
    unsafe extern "C" fn(func: *mut CUfunction, module: CUmodule, name: *const c_char) -> CUresult;
type FnCuModuleUnload = unsafe extern "C" fn(module: CUmodule) -> CUresult;
type FnCuLaunchKernel = unsafe extern "C" fn(
    f: CUfunction,
    grid_x: u32,
    grid_y: u32,
    grid_z: u32,
    block_x: u32,
    block_y: u32,
    block_z: u32,
    shared_mem: u32,
    stream: CUstream,
    params: *mut *mut c_void,
    extra: *mut *mut c_void,
) -> CUresult;
type FnCuStreamCreate = unsafe extern "C" fn(stream: *mut CUstream, flags: u32) -> CUresult;
type FnCuStreamSynchronize = unsafe extern "C" fn(stream: CUstream) -> CUresult;
type FnCuStreamDestroy = unsafe extern "C" fn(stream: CUstream) -> CUresult;

/// Resolved driver entry points plus the context created on device 0.
pub struct CudaApi {
    _lib: DynLib,
    ctx: CUcontext,
    info: DeviceInfo,

    cu_ctx_destroy: FnCuCtxDestroy,
    cu_ctx_set_current: FnCuCtxSetCurrent,
    cu_mem_alloc: FnCuMemAlloc,
    cu_mem_free: FnCuMemFree,
    cu_memcpy_h_to_d: FnCuMemcpyHtoD,
    cu_memcpy_d_to_h: FnCuMemcpyDtoH,
    cu_module_load_data: FnCuModuleLoadData,
    cu_module_get_function: FnCuModuleGetFunction,
    cu_module_unload: FnCuModuleUnload,
    cu_launch_kernel: FnCuLaunchKernel,
    cu_stream_create: FnCuStreamCreate,
    cu_stream_synchronize: FnCuStreamSynchronize,
    cu_stream_destroy: FnCuStreamDestroy,
}

// SAFETY: the driver API is thread-safe. Each wrapper that touches the
// context makes it current on the calling thread first.
unsafe impl Send for CudaApi {}
unsafe impl Sync for CudaApi {}

impl CudaApi {
    /// Load the driver, pick device 0 and create a context on it.
    ///
    /// A missing driver or zero devices is `BackendNotAvailable`; a driver
    /// that loads but refuses to initialize is `DeviceCreation`.
    pub fn load() -> AccelResult<Self> {
        #[cfg(windows)]
        let candidates: &[&CStr] = &[c"nvcuda.dll"];
        #[cfg(not(windows))]
        let candidates: &[&CStr] = &[c"libcuda.so.1", c"libcuda.so"];

        let lib = DynLib::open_first(BackendKind::Cuda, candidates)?;

        let cu_init: FnCuInit = load_sym!(lib, "cuInit");
        let cu_device_get_count: FnCuDeviceGetCount = load_sym!(lib, "cuDeviceGetCount");
        let cu_device_get: FnCuDeviceGet = load_sym!(lib, "cuDeviceGet");
        let cu_device_get_name: FnCuDeviceGetName = load_sym!(lib, "cuDeviceGetName");
        let cu_device_total_mem: FnCuDeviceTotalMem = load_sym!(lib, "cuDeviceTotalMem_v2");
        let cu_ctx_create: FnCuCtxCreate = load_sym!(lib, "cuCtxCreate_v2");
        let cu_ctx_destroy: FnCuCtxDestroy = load_sym!(lib, "cuCtxDestroy_v2");
        let cu_ctx_set_current: FnCuCtxSetCurrent = load_sym!(lib, "cuCtxSetCurrent");
        let cu_mem_alloc: FnCuMemAlloc = load_sym!(lib, "cuMemAlloc_v2");
        let cu_mem_free: FnCuMemFree = load_sym!(lib, "cuMemFree_v2");
        let cu_memcpy_h_to_d: FnCuMemcpyHtoD = load_sym!(lib, "cuMemcpyHtoD_v2");
        let cu_memcpy_d_to_h: FnCuMemcpyDtoH = load_sym!(lib, "cuMemcpyDtoH_v2");
        let cu_module_load_data: FnCuModuleLoadData = load_sym!(lib, "cuModuleLoadData");
        let cu_module_get_function: FnCuModuleGetFunction = load_sym!(lib, "cuModuleGetFunction");
        let cu_module_unload: FnCuModuleUnload = load_sym!(lib, "cuModuleUnload");
        let cu_launch_kernel: FnCuLaunchKernel = load_sym!(lib, "cuLaunchKernel");
        let cu_stream_create: FnCuStreamCreate = load_sym!(lib, "cuStreamCreate");
        let cu_stream_synchronize: FnCuStreamSynchronize = load_sym!(lib, "cuStreamSynchronize");
        let cu_stream_destroy: FnCuStreamDestroy = load_sym!(lib, "cuStreamDestroy_v2");

        // SAFETY: every pointer below is a live out-parameter.
        unsafe {
            check(cu_init(0), "cuInit").map_err(unavailable)?;

            let mut count: c_int = 0;
            check(cu_device_get_count(&mut count), "cuDeviceGetCount").map_err(unavailable)?;
            if count < 1 {
                return Err(unavailable("no CUDA devices found".to_string()));
            }

            let mut device: CUdevice = 0;
            check(cu_device_get(&mut device, 0), "cuDeviceGet").map_err(AccelError::DeviceCreation)?;

            let mut name_buf = [0 as c_char; 256];
            check(
                cu_device_get_name(name_buf.as_mut_ptr(), name_buf.len() as c_int, device),
                "cuDeviceGetName",
            )
            .map_err(AccelError::DeviceCreation)?;
            let name = CStr::from_ptr(name_buf.as_ptr()).to_string_lossy().into_owned();

            let mut memory: usize = 0;
            check(cu_device_total_mem(&mut memory, device), "cuDeviceTotalMem")
                .map_err(AccelError::DeviceCreation)?;

            let mut ctx: CUcontext = std::ptr::null_mut();
            check(cu_ctx_create(&mut ctx, 0, device), "cuCtxCreate")
                .map_err(AccelError::DeviceCreation)?;

            Ok(Self {
                _lib: lib,
                ctx,
                info: DeviceInfo {
                    ordinal: 0,
                    name,
                    memory_bytes: memory as u64,
                },
                cu_ctx_destroy,
                cu_ctx_set_current,
                cu_mem_alloc,
                cu_mem_free,
                cu_memcpy_h_to_d,
                cu_memcpy_d_to_h,
                cu_module_load_data,
                cu_module_get_function,
                cu_module_unload,
                cu_launch_kernel,
                cu_stream_create,
                cu_stream_synchronize,
                cu_stream_destroy,
            })
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Make this API's context current on the calling thread.
    ///
    /// Driver contexts are per-thread state, and callers reach the device
    /// from whichever thread runs the search.
    pub fn bind(&self) -> Result<(), String> {
        check(unsafe { (self.cu_ctx_set_current)(self.ctx) }, "cuCtxSetCurrent")
    }

    pub fn mem_alloc(&self, bytesize: usize) -> Result<CUdeviceptr, String> {
        self.bind()?;
        let mut dptr: CUdeviceptr = 0;
        check(unsafe { (self.cu_mem_alloc)(&mut dptr, bytesize) }, "cuMemAlloc")?;
        Ok(dptr)
    }

    pub fn mem_free(&self, dptr: CUdeviceptr) -> Result<(), String> {
        self.bind()?;
        check(unsafe { (self.cu_mem_free)(dptr) }, "cuMemFree")
    }

    pub fn memcpy_h_to_d(&self, dst: CUdeviceptr, src: &[f32]) -> Result<(), String> {
        self.bind()?;
        let bytes = std::mem::size_of_val(src);
        check(
            unsafe { (self.cu_memcpy_h_to_d)(dst, src.as_ptr().cast(), bytes) },
            "cuMemcpyHtoD",
        )
    }

    pub fn memcpy_d_to_h(&self, dst: &mut [f32], src: CUdeviceptr) -> Result<(), String> {
        self.bind()?;
        let bytes = std::mem::size_of_val(dst);
        check(
            unsafe { (self.cu_memcpy_d_to_h)(dst.as_mut_ptr().cast(), src, bytes) },
            "cuMemcpyDtoH",
        )
    }

    /// Load a NUL-terminated PTX image.
    pub fn module_load_data(&self, image: &str) -> Result<CUmodule, String> {
        if !image.ends_with('\0') {
            return Err("PTX image must be NUL-terminated".to_string());
        }
        self.bind()?;
        let mut module: CUmodule = std::ptr::null_mut();
        check(
            unsafe { (self.cu_module_load_data)(&mut module, image.as_ptr().cast()) },
            "cuModuleLoadData",
        )?;
        Ok(module)
    }

    pub fn module_get_function(&self, module: CUmodule, name: &CStr) -> Result<CUfunction, String> {
        let mut func: CUfunction = std::ptr::null_mut();
        let rc = unsafe { (self.cu_module_get_function)(&mut func, module, name.as_ptr()) };
        check(rc, &format!("cuModuleGetFunction({})", name.to_string_lossy()))?;
        Ok(func)
    }

    pub fn module_unload(&self, module: CUmodule) -> Result<(), String> {
        self.bind()?;
        check(unsafe { (self.cu_module_unload)(module) }, "cuModuleUnload")
    }

    /// Launch a kernel with a 1-D grid.
    ///
    /// # Safety
    ///
    /// `params` must point to one pointer per kernel parameter, each naming a
    /// value of the parameter's exact type, alive until the stream is
    /// synchronized.
    pub unsafe fn launch_kernel(
        &self,
        func: CUfunction,
        grid: u32,
        block: u32,
        stream: CUstream,
        params: &mut [*mut c_void],
    ) -> Result<(), String> {
        self.bind()?;
        let rc = (self.cu_launch_kernel)(
            func,
            grid,
            1,
            1,
            block,
            1,
            1,
            0,
            stream,
            params.as_mut_ptr(),
            std::ptr::null_mut(),
        );
        check(rc, "cuLaunchKernel")
    }

    pub fn stream_create(&self) -> Result<CUstream, String> {
        self.bind()?;
        let mut stream: CUstream = std::ptr::null_mut();
        check(unsafe { (self.cu_stream_create)(&mut stream, 0) }, "cuStreamCreate")?;
        Ok(stream)
    }

    pub fn stream_synchronize(&self, stream: CUstream) -> Result<(), String> {
        self.bind()?;
        check(unsafe { (self.cu_stream_synchronize)(stream) }, "cuStreamSynchronize")
    }

    pub fn stream_destroy(&self, stream: CUstream) -> Result<(), String> {
        self.bind()?;
        check(unsafe { (self.cu_stream_destroy)(stream) }, "cuStreamDestroy")
    }
}

impl Drop for CudaApi {
    fn drop(&mut self) {
        if !self.ctx.is_null() {
            let _ = check(unsafe { (self.cu_ctx_destroy)(self.ctx) }, "cuCtxDestroy");
        }
    }
}

fn check(rc: CUresult, call: &str) -> Result<(), String> {
    if rc == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(format!("{} failed with CUDA error code {}", call, rc))
    }
}

fn unavailable(reason: String) -> AccelError {
    AccelError::not_available(BackendKind::Cuda.as_str(), reason)
}
