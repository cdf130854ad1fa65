//! Objective-C runtime and Metal.framework bindings.
//!
//! Raw `objc_msgSend` calls, each transmuted to the exact signature of the
//! message being sent. Only the messages the similarity kernels need are
//! wrapped.

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};

pub type Id = *mut c_void;
pub type Sel = *mut c_void;
pub type Class = *mut c_void;
pub type NSUInteger = usize;

pub const NIL: Id = std::ptr::null_mut();

/// `MTLResourceStorageModeShared`: one allocation visible to CPU and GPU.
pub const MTL_RESOURCE_STORAGE_MODE_SHARED: NSUInteger = 0;
/// `MTLCommandBufferStatusError`.
pub const MTL_COMMAND_BUFFER_STATUS_ERROR: NSUInteger = 5;

#[link(name = "objc", kind = "dylib")]
extern "C" {
    fn objc_getClass(name: *const c_char) -> Class;
    fn sel_registerName(name: *const c_char) -> Sel;
    fn objc_msgSend(receiver: Id, selector: Sel, ...) -> Id;
    fn objc_autoreleasePoolPush() -> *mut c_void;
    fn objc_autoreleasePoolPop(pool: *mut c_void);
}

#[link(name = "Metal", kind = "framework")]
extern "C" {
    /// The default Metal device, or nil without Metal support.
    pub fn MTLCreateSystemDefaultDevice() -> Id;
}

#[link(name = "Foundation", kind = "framework")]
extern "C" {}

/// Drains autoreleased objects created while it is alive.
///
/// Command buffers and `NSString`s come back autoreleased; worker threads
/// have no ambient pool, so every entry point opens one.
pub struct AutoreleasePool(*mut c_void);

impl AutoreleasePool {
    pub fn new() -> Self {
        // SAFETY: push/pop are balanced by Drop.
        Self(unsafe { objc_autoreleasePoolPush() })
    }
}

impl Drop for AutoreleasePool {
    fn drop(&mut self) {
        // SAFETY: the token came from the matching push.
        unsafe { objc_autoreleasePoolPop(self.0) }
    }
}

pub unsafe fn sel(name: &CStr) -> Sel {
    sel_registerName(name.as_ptr())
}

/// `[obj sel]` -> `Id`
pub unsafe fn msg_send_id(obj: Id, sel: Sel) -> Id {
    let f: unsafe extern "C" fn(Id, Sel) -> Id = std::mem::transmute(objc_msgSend as *const c_void);
    f(obj, sel)
}

/// `[obj sel:arg]` -> `Id`
pub unsafe fn msg_send_id_id(obj: Id, sel: Sel, arg: Id) -> Id {
    let f: unsafe extern "C" fn(Id, Sel, Id) -> Id =
        std::mem::transmute(objc_msgSend as *const c_void);
    f(obj, sel, arg)
}

/// `[obj sel:a1 options:a2 error:err]` -> `Id`
pub unsafe fn msg_send_id_id_id_err(obj: Id, sel: Sel, a1: Id, a2: Id, err: *mut Id) -> Id {
    let f: unsafe extern "C" fn(Id, Sel, Id, Id, *mut Id) -> Id =
        std::mem::transmute(objc_msgSend as *const c_void);
    f(obj, sel, a1, a2, err)
}

/// `[obj sel:arg error:err]` -> `Id`
pub unsafe fn msg_send_id_id_err(obj: Id, sel: Sel, arg: Id, err: *mut Id) -> Id {
    let f: unsafe extern "C" fn(Id, Sel, Id, *mut Id) -> Id =
        std::mem::transmute(objc_msgSend as *const c_void);
    f(obj, sel, arg, err)
}

/// `[obj sel]` -> `NSUInteger`
pub unsafe fn msg_send_nsuinteger(obj: Id, sel: Sel) -> NSUInteger {
    let f: unsafe extern "C" fn(Id, Sel) -> NSUInteger =
        std::mem::transmute(objc_msgSend as *const c_void);
    f(obj, sel)
}

/// `[obj sel]` -> `uint64_t`
pub unsafe fn msg_send_u64(obj: Id, sel: Sel) -> u64 {
    let f: unsafe extern "C" fn(Id, Sel) -> u64 = std::mem::transmute(objc_msgSend as *const c_void);
    f(obj, sel)
}

/// `newBufferWithBytes:length:options:`
pub unsafe fn msg_send_new_buffer(
    obj: Id,
    sel: Sel,
    ptr: *const c_void,
    len: NSUInteger,
    opts: NSUInteger,
) -> Id {
    let f: unsafe extern "C" fn(Id, Sel, *const c_void, NSUInteger, NSUInteger) -> Id =
        std::mem::transmute(objc_msgSend as *const c_void);
    f(obj, sel, ptr, len, opts)
}

/// `newBufferWithLength:options:`
pub unsafe fn msg_send_new_buffer_length(obj: Id, sel: Sel, len: NSUInteger, opts: NSUInteger) -> Id {
    let f: unsafe extern "C" fn(Id, Sel, NSUInteger, NSUInteger) -> Id =
        std::mem::transmute(objc_msgSend as *const c_void);
    f(obj, sel, len, opts)
}

/// `[obj sel:arg]` with a void return
pub unsafe fn msg_send_void_id(obj: Id, sel: Sel, arg: Id) {
    let f: unsafe extern "C" fn(Id, Sel, Id) = std::mem::transmute(objc_msgSend as *const c_void);
    f(obj, sel, arg);
}

/// `setBuffer:offset:atIndex:`
pub unsafe fn msg_send_set_buffer(obj: Id, sel: Sel, buf: Id, offset: NSUInteger, index: NSUInteger) {
    let f: unsafe extern "C" fn(Id, Sel, Id, NSUInteger, NSUInteger) =
        std::mem::transmute(objc_msgSend as *const c_void);
    f(obj, sel, buf, offset, index);
}

/// `setBytes:length:atIndex:`
pub unsafe fn msg_send_set_bytes(
    obj: Id,
    sel: Sel,
    ptr: *const c_void,
    len: NSUInteger,
    index: NSUInteger,
) {
    let f: unsafe extern "C" fn(Id, Sel, *const c_void, NSUInteger, NSUInteger) =
        std::mem::transmute(objc_msgSend as *const c_void);
    f(obj, sel, ptr, len, index);
}

/// `dispatchThreadgroups:threadsPerThreadgroup:`; each `MTLSize` is passed
/// by value as three `NSUInteger`s.
#[allow(clippy::too_many_arguments)]
pub unsafe fn msg_send_dispatch(
    obj: Id,
    sel: Sel,
    gx: NSUInteger,
    gy: NSUInteger,
    gz: NSUInteger,
    tx: NSUInteger,
    ty: NSUInteger,
    tz: NSUInteger,
) {
    let f: unsafe extern "C" fn(
        Id,
        Sel,
        NSUInteger,
        NSUInteger,
        NSUInteger,
        NSUInteger,
        NSUInteger,
        NSUInteger,
    ) = std::mem::transmute(objc_msgSend as *const c_void);
    f(obj, sel, gx, gy, gz, tx, ty, tz);
}

/// `[obj sel]` with a void return
pub unsafe fn msg_send_void(obj: Id, sel: Sel) {
    let f: unsafe extern "C" fn(Id, Sel) = std::mem::transmute(objc_msgSend as *const c_void);
    f(obj, sel);
}

/// `[obj sel]` -> raw pointer
pub unsafe fn msg_send_ptr(obj: Id, sel: Sel) -> *mut c_void {
    let f: unsafe extern "C" fn(Id, Sel) -> *mut c_void =
        std::mem::transmute(objc_msgSend as *const c_void);
    f(obj, sel)
}

unsafe fn msg_send_class_cstr(cls: Class, sel: Sel, cstr: *const c_char) -> Id {
    let f: unsafe extern "C" fn(Class, Sel, *const c_char) -> Id =
        std::mem::transmute(objc_msgSend as *const c_void);
    f(cls, sel, cstr)
}

/// Selectors registered once per device.
pub struct Selectors {
    pub name: Sel,
    pub recommended_max_working_set_size: Sel,
    pub new_command_queue: Sel,
    pub new_library_with_source: Sel,
    pub new_function_with_name: Sel,
    pub new_compute_pipeline: Sel,
    pub new_buffer_with_bytes: Sel,
    pub new_buffer_with_length: Sel,
    pub command_buffer: Sel,
    pub compute_command_encoder: Sel,
    pub set_compute_pipeline: Sel,
    pub set_buffer: Sel,
    pub set_bytes: Sel,
    pub dispatch_threadgroups: Sel,
    pub end_encoding: Sel,
    pub commit: Sel,
    pub wait_until_completed: Sel,
    pub status: Sel,
    pub error: Sel,
    pub contents: Sel,
    pub retain: Sel,
    pub release: Sel,
}

impl Selectors {
    pub unsafe fn new() -> Self {
        Self {
            name: sel(c"name"),
            recommended_max_working_set_size: sel(c"recommendedMaxWorkingSetSize"),
            new_command_queue: sel(c"newCommandQueue"),
            new_library_with_source: sel(c"newLibraryWithSource:options:error:"),
            new_function_with_name: sel(c"newFunctionWithName:"),
            new_compute_pipeline: sel(c"newComputePipelineStateWithFunction:error:"),
            new_buffer_with_bytes: sel(c"newBufferWithBytes:length:options:"),
            new_buffer_with_length: sel(c"newBufferWithLength:options:"),
            command_buffer: sel(c"commandBuffer"),
            compute_command_encoder: sel(c"computeCommandEncoder"),
            set_compute_pipeline: sel(c"setComputePipelineState:"),
            set_buffer: sel(c"setBuffer:offset:atIndex:"),
            set_bytes: sel(c"setBytes:length:atIndex:"),
            dispatch_threadgroups: sel(c"dispatchThreadgroups:threadsPerThreadgroup:"),
            end_encoding: sel(c"endEncoding"),
            commit: sel(c"commit"),
            wait_until_completed: sel(c"waitUntilCompleted"),
            status: sel(c"status"),
            error: sel(c"error"),
            contents: sel(c"contents"),
            retain: sel(c"retain"),
            release: sel(c"release"),
        }
    }
}

/// Autoreleased `NSString` from a Rust string. Interior NULs truncate.
pub unsafe fn ns_string(s: &str) -> Id {
    let mut buf = Vec::with_capacity(s.len() + 1);
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    let cls = objc_getClass(c"NSString".as_ptr());
    msg_send_class_cstr(cls, sel(c"stringWithUTF8String:"), buf.as_ptr().cast())
}

/// Convert an `NSString` to a Rust `String`.
pub unsafe fn string_from_ns(ns: Id) -> String {
    if ns == NIL {
        return String::new();
    }
    let cstr = msg_send_ptr(ns, sel(c"UTF8String")) as *const c_char;
    if cstr.is_null() {
        return String::new();
    }
    CStr::from_ptr(cstr).to_string_lossy().into_owned()
}

/// `-[NSObject description]`, used to surface `NSError`s.
pub unsafe fn obj_description(obj: Id) -> String {
    if obj == NIL {
        return "<nil>".to_string();
    }
    string_from_ns(msg_send_id(obj, sel(c"description")))
}
