//! OpenCL bindings, resolved at runtime from the ICD loader.
//!
//! Opens `libOpenCL.so.1` (Linux), `OpenCL.dll` (Windows) or the OpenCL
//! framework (macOS) through `DynLib`. Loading picks the first GPU device of
//! the first platform that has one and creates a context and in-order queue
//! on it.

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};

use strata_core::{AccelError, AccelResult, BackendKind, DeviceInfo};

use crate::dl::{load_sym, DynLib};

pub type ClInt = i32;
pub type ClUint = u32;
pub type ClBitfield = u64;
pub type ClPlatformId = *mut c_void;
pub type ClDeviceId = *mut c_void;
pub type ClContext = *mut c_void;
pub type ClCommandQueue = *mut c_void;
pub type ClProgram = *mut c_void;
pub type ClKernel = *mut c_void;
pub type ClMem = *mut c_void;

pub const CL_SUCCESS: ClInt = 0;
pub const CL_DEVICE_NOT_FOUND: ClInt = -1;
pub const CL_PLATFORM_NOT_FOUND_KHR: ClInt = -1001;
const CL_DEVICE_TYPE_GPU: ClBitfield = 1 << 2;
const CL_DEVICE_NAME: ClUint = 0x102B;
const CL_DEVICE_GLOBAL_MEM_SIZE: ClUint = 0x101F;
const CL_PROGRAM_BUILD_LOG: ClUint = 0x1183;
const CL_MEM_READ_WRITE: ClBitfield = 1 << 0;
const CL_MEM_COPY_HOST_PTR: ClBitfield = 1 << 5;
const CL_TRUE: ClUint = 1;

type FnGetPlatformIds =
    unsafe extern "C" fn(num_entries: ClUint, platforms: *mut ClPlatformId, num_platforms: *mut ClUint) -> ClInt;
type FnGetDeviceIds = unsafe extern "C" fn(
    platform: ClPlatformId,
    device_type: ClBitfield,
    num_entries: ClUint,
    devices: *mut ClDeviceId,
    num_devices: *mut ClUint,
) -> ClInt;
type FnGetDeviceInfo = unsafe extern "C" fn(
    device: ClDeviceId,
    param_name: ClUint,
    value_size: usize,
    value: *mut c_void,
    value_size_ret: *mut usize,
) -> ClInt;
type FnCreateContext = unsafe extern "C" fn(
    properties: *const isize,
    num_devices: ClUint,
    devices: *const ClDeviceId,
    notify: *const c_void,
    user_data: *mut c_void,
    errcode_ret: *mut ClInt,
) -> ClContext;
type FnCreateCommandQueue = unsafe extern "C" fn(
    context: ClContext,
    device: ClDeviceId,
    properties: ClBitfield,
    errcode_ret: *mut ClInt,
) -> ClCommandQueue;
type FnCreateProgramWithSource = unsafe extern "C" fn(
    context: ClContext,
    count: ClUint,
    strings: *const *const c_char,
    lengths: *const usize,
    errcode_ret: *mut ClInt,
) -> ClProgram;
type FnBuildProgram = unsafe extern "C" fn(
    program: ClProgram,
    num_devices: ClUint,
    devices: *const ClDeviceId,
    options: *const c_char,
    notify: *const c_void,
    user_data: *mut c_void,
) -> ClInt;
type FnGetProgramBuildInfo = unsafe extern "C" fn(
    program: ClProgram,
    device: ClDeviceId,
    param_name: ClUint,
    value_size: usize,
    value: *mut c_void,
    value_size_ret: *mut usize,
) -> ClInt;
type FnCreateKernel =
    unsafe extern "C" fn(program: ClProgram, name: *const c_char, errcode_ret: *mut ClInt) -> ClKernel;
type FnCreateBuffer = unsafe extern "C" fn(
    context: ClContext,
    flags: ClBitfield,
    size: usize,
    host_ptr: *mut c_void,
    errcode_ret: *mut ClInt,
) -> ClMem;
type FnEnqueueReadBuffer = unsafe extern "C" fn(
    queue: ClCommandQueue,
    buffer: ClMem,
    blocking: ClUint,
    offset: usize,
    size: usize,
    ptr: *mut c_void,
    num_events: ClUint,
    wait_list: *const c_void,
    event: *mut c_void,
) -> ClInt;
type FnSetKernelArg =
    unsafe extern "C" fn(kernel: ClKernel, index: ClUint, size: usize, value: *const c_void) -> ClInt;
type FnEnqueueNdRangeKernel = unsafe extern "C" fn(
    queue: ClCommandQueue,
    kernel: ClKernel,
    work_dim: ClUint,
    global_offset: *const usize,
    global_size: *const usize,
    local_size: *const usize,
    num_events: ClUint,
    wait_list: *const c_void,
    event: *mut c_void,
) -> ClInt;
type FnFinish = unsafe extern "C" fn(queue: ClCommandQueue) -> ClInt;
type FnRelease = unsafe extern "C" fn(handle: *mut c_void) -> ClInt;

/// Resolved entry points plus the context and queue of the chosen device.
pub struct OpenClApi {
    _lib: DynLib,
    device: ClDeviceId,
    context: ClContext,
    queue: ClCommandQueue,
    info: DeviceInfo,

    create_program_with_source: FnCreateProgramWithSource,
    build_program: FnBuildProgram,
    get_program_build_info: FnGetProgramBuildInfo,
    create_kernel: FnCreateKernel,
    create_buffer: FnCreateBuffer,
    enqueue_read_buffer: FnEnqueueReadBuffer,
    set_kernel_arg: FnSetKernelArg,
    enqueue_nd_range_kernel: FnEnqueueNdRangeKernel,
    finish: FnFinish,
    release_mem_object: FnRelease,
    release_kernel: FnRelease,
    release_program: FnRelease,
    release_command_queue: FnRelease,
    release_context: FnRelease,
}

// SAFETY: OpenCL entry points are thread-safe except clSetKernelArg on a
// shared kernel, which callers serialize.
unsafe impl Send for OpenClApi {}
unsafe impl Sync for OpenClApi {}

impl OpenClApi {
    /// Load the ICD loader and open a context on the first GPU found.
    pub fn load() -> AccelResult<Self> {
        #[cfg(target_os = "macos")]
        let candidates: &[&CStr] = &[c"/System/Library/Frameworks/OpenCL.framework/OpenCL"];
        #[cfg(windows)]
        let candidates: &[&CStr] = &[c"OpenCL.dll"];
        #[cfg(not(any(target_os = "macos", windows)))]
        let candidates: &[&CStr] = &[c"libOpenCL.so.1", c"libOpenCL.so"];

        let lib = DynLib::open_first(BackendKind::OpenCl, candidates)?;

        let get_platform_ids: FnGetPlatformIds = load_sym!(lib, "clGetPlatformIDs");
        let get_device_ids: FnGetDeviceIds = load_sym!(lib, "clGetDeviceIDs");
        let get_device_info: FnGetDeviceInfo = load_sym!(lib, "clGetDeviceInfo");
        let create_context: FnCreateContext = load_sym!(lib, "clCreateContext");
        let create_command_queue: FnCreateCommandQueue = load_sym!(lib, "clCreateCommandQueue");
        let create_program_with_source: FnCreateProgramWithSource =
            load_sym!(lib, "clCreateProgramWithSource");
        let build_program: FnBuildProgram = load_sym!(lib, "clBuildProgram");
        let get_program_build_info: FnGetProgramBuildInfo = load_sym!(lib, "clGetProgramBuildInfo");
        let create_kernel: FnCreateKernel = load_sym!(lib, "clCreateKernel");
        let create_buffer: FnCreateBuffer = load_sym!(lib, "clCreateBuffer");
        let enqueue_read_buffer: FnEnqueueReadBuffer = load_sym!(lib, "clEnqueueReadBuffer");
        let set_kernel_arg: FnSetKernelArg = load_sym!(lib, "clSetKernelArg");
        let enqueue_nd_range_kernel: FnEnqueueNdRangeKernel = load_sym!(lib, "clEnqueueNDRangeKernel");
        let finish: FnFinish = load_sym!(lib, "clFinish");
        let release_mem_object: FnRelease = load_sym!(lib, "clReleaseMemObject");
        let release_kernel: FnRelease = load_sym!(lib, "clReleaseKernel");
        let release_program: FnRelease = load_sym!(lib, "clReleaseProgram");
        let release_command_queue: FnRelease = load_sym!(lib, "clReleaseCommandQueue");
        let release_context: FnRelease = load_sym!(lib, "clReleaseContext");

        // SAFETY: every pointer passed below is a live out-parameter or a
        // correctly sized buffer.
        unsafe {
            let device = first_gpu(get_platform_ids, get_device_ids)?;

            let mut name_buf = [0u8; 256];
            check(
                get_device_info(
                    device,
                    CL_DEVICE_NAME,
                    name_buf.len(),
                    name_buf.as_mut_ptr().cast(),
                    std::ptr::null_mut(),
                ),
                "clGetDeviceInfo(CL_DEVICE_NAME)",
            )
            .map_err(AccelError::DeviceCreation)?;
            let name = CStr::from_bytes_until_nul(&name_buf)
                .map(|s| s.to_string_lossy().trim().to_string())
                .unwrap_or_default();

            let mut memory_bytes: u64 = 0;
            check(
                get_device_info(
                    device,
                    CL_DEVICE_GLOBAL_MEM_SIZE,
                    std::mem::size_of::<u64>(),
                    (&mut memory_bytes as *mut u64).cast(),
                    std::ptr::null_mut(),
                ),
                "clGetDeviceInfo(CL_DEVICE_GLOBAL_MEM_SIZE)",
            )
            .map_err(AccelError::DeviceCreation)?;

            let mut rc = CL_SUCCESS;
            let context = create_context(
                std::ptr::null(),
                1,
                &device,
                std::ptr::null(),
                std::ptr::null_mut(),
                &mut rc,
            );
            check(rc, "clCreateContext").map_err(AccelError::DeviceCreation)?;

            let queue = create_command_queue(context, device, 0, &mut rc);
            if let Err(e) = check(rc, "clCreateCommandQueue") {
                release_context(context);
                return Err(AccelError::DeviceCreation(e));
            }

            Ok(Self {
                _lib: lib,
                device,
                context,
                queue,
                info: DeviceInfo {
                    ordinal: 0,
                    name,
                    memory_bytes,
                },
                create_program_with_source,
                build_program,
                get_program_build_info,
                create_kernel,
                create_buffer,
                enqueue_read_buffer,
                set_kernel_arg,
                enqueue_nd_range_kernel,
                finish,
                release_mem_object,
                release_kernel,
                release_program,
                release_command_queue,
                release_context,
            })
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Compile `source` for this device. Build failures carry the build log.
    pub fn build_program(&self, source: &str) -> Result<ClProgram, String> {
        let strings = [source.as_ptr().cast::<c_char>()];
        let lengths = [source.len()];
        let mut rc = CL_SUCCESS;
        // SAFETY: one string with an explicit length.
        let program = unsafe {
            (self.create_program_with_source)(self.context, 1, strings.as_ptr(), lengths.as_ptr(), &mut rc)
        };
        check(rc, "clCreateProgramWithSource")?;

        // SAFETY: program and device belong to this context.
        let rc = unsafe {
            (self.build_program)(
                program,
                1,
                &self.device,
                std::ptr::null(),
                std::ptr::null(),
                std::ptr::null_mut(),
            )
        };
        if rc != CL_SUCCESS {
            let log = self.build_log(program);
            self.release_program(program);
            return Err(format!("clBuildProgram failed with error code {}: {}", rc, log));
        }
        Ok(program)
    }

    fn build_log(&self, program: ClProgram) -> String {
        let mut size = 0usize;
        // SAFETY: size query, then a read into a buffer of that size.
        unsafe {
            let rc = (self.get_program_build_info)(
                program,
                self.device,
                CL_PROGRAM_BUILD_LOG,
                0,
                std::ptr::null_mut(),
                &mut size,
            );
            if rc != CL_SUCCESS || size == 0 {
                return String::new();
            }
            let mut log = vec![0u8; size];
            let rc = (self.get_program_build_info)(
                program,
                self.device,
                CL_PROGRAM_BUILD_LOG,
                size,
                log.as_mut_ptr().cast(),
                std::ptr::null_mut(),
            );
            if rc != CL_SUCCESS {
                return String::new();
            }
            String::from_utf8_lossy(&log).trim_end_matches('\0').trim().to_string()
        }
    }

    pub fn create_kernel(&self, program: ClProgram, name: &CStr) -> Result<ClKernel, String> {
        let mut rc = CL_SUCCESS;
        // SAFETY: name is NUL-terminated.
        let kernel = unsafe { (self.create_kernel)(program, name.as_ptr(), &mut rc) };
        check(rc, &format!("clCreateKernel({})", name.to_string_lossy()))?;
        Ok(kernel)
    }

    /// Allocate `bytes` of device memory, copying from `init` when given.
    pub fn create_buffer(&self, bytes: usize, init: Option<&[f32]>) -> Result<ClMem, String> {
        let (flags, host_ptr) = match init {
            Some(data) => (CL_MEM_READ_WRITE | CL_MEM_COPY_HOST_PTR, data.as_ptr() as *mut c_void),
            None => (CL_MEM_READ_WRITE, std::ptr::null_mut()),
        };
        let mut rc = CL_SUCCESS;
        // SAFETY: with COPY_HOST_PTR the runtime reads `bytes` from host_ptr
        // before returning and never writes through it.
        let mem = unsafe { (self.create_buffer)(self.context, flags, bytes, host_ptr, &mut rc) };
        check(rc, "clCreateBuffer")?;
        Ok(mem)
    }

    /// Blocking read of `dst.len()` floats from the start of `mem`.
    pub fn read_buffer(&self, mem: ClMem, dst: &mut [f32]) -> Result<(), String> {
        // SAFETY: blocking read into a live slice of the requested size.
        let rc = unsafe {
            (self.enqueue_read_buffer)(
                self.queue,
                mem,
                CL_TRUE,
                0,
                std::mem::size_of_val(dst),
                dst.as_mut_ptr().cast(),
                0,
                std::ptr::null(),
                std::ptr::null_mut(),
            )
        };
        check(rc, "clEnqueueReadBuffer")
    }

    /// Set argument `index` of `kernel` to the bytes of `value`.
    ///
    /// # Safety
    ///
    /// `T` must match the kernel parameter's type, and no other thread may
    /// set arguments on `kernel` concurrently.
    pub unsafe fn set_arg<T>(&self, kernel: ClKernel, index: u32, value: &T) -> Result<(), String> {
        let rc = (self.set_kernel_arg)(
            kernel,
            index,
            std::mem::size_of::<T>(),
            (value as *const T).cast(),
        );
        check(rc, "clSetKernelArg")
    }

    /// Enqueue `global` work items and wait for the queue to drain.
    ///
    /// The runtime picks the work-group size, so `global` need not be a
    /// multiple of anything.
    pub fn run_1d(&self, kernel: ClKernel, global: usize) -> Result<(), String> {
        // SAFETY: kernel arguments were set by the caller.
        let rc = unsafe {
            (self.enqueue_nd_range_kernel)(
                self.queue,
                kernel,
                1,
                std::ptr::null(),
                &global,
                std::ptr::null(),
                0,
                std::ptr::null(),
                std::ptr::null_mut(),
            )
        };
        check(rc, "clEnqueueNDRangeKernel")?;
        // SAFETY: queue is live.
        check(unsafe { (self.finish)(self.queue) }, "clFinish")
    }

    pub fn release_mem(&self, mem: ClMem) -> Result<(), String> {
        check(unsafe { (self.release_mem_object)(mem) }, "clReleaseMemObject")
    }

    pub fn release_kernel(&self, kernel: ClKernel) -> Result<(), String> {
        // SAFETY: kernel came from create_kernel and is released once.
        check(unsafe { (self.release_kernel)(kernel) }, "clReleaseKernel")
    }

    pub fn release_program(&self, program: ClProgram) -> Result<(), String> {
        // SAFETY: program came from build_program and is released once.
        check(unsafe { (self.release_program)(program) }, "clReleaseProgram")
    }
}

impl Drop for OpenClApi {
    fn drop(&mut self) {
        // SAFETY: queue and context were created by load() and are released
        // once; outstanding buffers hold their own context reference.
        unsafe {
            (self.finish)(self.queue);
            (self.release_command_queue)(self.queue);
            (self.release_context)(self.context);
        }
    }
}

/// First GPU device across all platforms.
unsafe fn first_gpu(get_platform_ids: FnGetPlatformIds, get_device_ids: FnGetDeviceIds) -> AccelResult<ClDeviceId> {
    let mut count: ClUint = 0;
    let rc = get_platform_ids(0, std::ptr::null_mut(), &mut count);
    if rc == CL_PLATFORM_NOT_FOUND_KHR || (rc == CL_SUCCESS && count == 0) {
        return Err(unavailable("no OpenCL platforms installed".to_string()));
    }
    check(rc, "clGetPlatformIDs").map_err(unavailable)?;

    let mut platforms = vec![std::ptr::null_mut(); count as usize];
    check(
        get_platform_ids(count, platforms.as_mut_ptr(), std::ptr::null_mut()),
        "clGetPlatformIDs",
    )
    .map_err(unavailable)?;

    for platform in platforms {
        let mut device: ClDeviceId = std::ptr::null_mut();
        let mut found: ClUint = 0;
        let rc = get_device_ids(platform, CL_DEVICE_TYPE_GPU, 1, &mut device, &mut found);
        if rc == CL_SUCCESS && found > 0 && !device.is_null() {
            return Ok(device);
        }
        if rc != CL_SUCCESS && rc != CL_DEVICE_NOT_FOUND {
            tracing::debug!(target: "strata::gpu", code = rc, "clGetDeviceIDs failed on a platform, skipping");
        }
    }
    Err(unavailable("no OpenCL GPU devices found".to_string()))
}

fn check(rc: ClInt, call: &str) -> Result<(), String> {
    if rc == CL_SUCCESS {
        Ok(())
    } else {
        Err(format!("{} failed with OpenCL error code {}", call, rc))
    }
}

fn unavailable(reason: String) -> AccelError {
    AccelError::not_available(BackendKind::OpenCl.as_str(), reason)
}
