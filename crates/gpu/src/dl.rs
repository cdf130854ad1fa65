//! Runtime loading of vendor driver libraries.
//!
//! The CUDA and OpenCL backends never link against their drivers at build
//! time. The library is opened when a device is probed, so a binary built
//! with the feature still starts on hosts that lack the driver.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};

use strata_core::{AccelError, AccelResult, BackendKind};

/// Handle to an opened shared library. Closed on drop.
pub(crate) struct DynLib {
    handle: *mut c_void,
    name: String,
}

// SAFETY: a library handle is process-global; the driver APIs resolved from
// it (CUDA driver API, OpenCL ICD) are documented as thread-safe.
unsafe impl Send for DynLib {}
unsafe impl Sync for DynLib {}

impl DynLib {
    /// Open the first library in `candidates` that loads.
    ///
    /// Fails with `BackendNotAvailable` naming every candidate tried.
    pub(crate) fn open_first(backend: BackendKind, candidates: &[&CStr]) -> AccelResult<Self> {
        let mut tried = Vec::with_capacity(candidates.len());
        for name in candidates {
            match Self::open(name) {
                Ok(lib) => return Ok(lib),
                Err(e) => tried.push(format!("{}: {}", name.to_string_lossy(), e)),
            }
        }
        Err(AccelError::not_available(
            backend.as_str(),
            format!("driver library not found ({})", tried.join("; ")),
        ))
    }

    fn open(name: &CStr) -> Result<Self, String> {
        let display = name.to_string_lossy().into_owned();

        #[cfg(unix)]
        {
            // SAFETY: name is NUL-terminated. RTLD_NOW surfaces missing
            // symbols here rather than at first call.
            let handle = unsafe { dlopen(name.as_ptr(), RTLD_NOW | RTLD_LOCAL) };
            if handle.is_null() {
                return Err(last_dl_error().unwrap_or_else(|| "dlopen failed".to_string()));
            }
            Ok(Self {
                handle,
                name: display,
            })
        }

        #[cfg(windows)]
        {
            // SAFETY: name is NUL-terminated.
            let handle = unsafe { LoadLibraryA(name.as_ptr()) };
            if handle.is_null() {
                return Err("LoadLibraryA failed".to_string());
            }
            Ok(Self {
                handle,
                name: display,
            })
        }

        #[cfg(not(any(unix, windows)))]
        {
            let _ = display;
            Err("dynamic loading is not supported on this platform".to_string())
        }
    }

    /// Resolve `symbol` as a raw pointer.
    ///
    /// # Safety
    ///
    /// The caller must transmute the pointer to the symbol's real signature.
    pub(crate) unsafe fn sym(&self, symbol: &CStr) -> AccelResult<*mut c_void> {
        let missing = |detail: String| {
            AccelError::DeviceCreation(format!(
                "{} is missing {}: {}",
                self.name,
                symbol.to_string_lossy(),
                detail
            ))
        };

        #[cfg(unix)]
        {
            last_dl_error();
            let ptr = dlsym(self.handle, symbol.as_ptr());
            if let Some(err) = last_dl_error() {
                return Err(missing(err));
            }
            if ptr.is_null() {
                return Err(missing("null address".to_string()));
            }
            Ok(ptr)
        }

        #[cfg(windows)]
        {
            let ptr = GetProcAddress(self.handle, symbol.as_ptr());
            if ptr.is_null() {
                return Err(missing("GetProcAddress failed".to_string()));
            }
            Ok(ptr)
        }

        #[cfg(not(any(unix, windows)))]
        {
            Err(missing("unsupported platform".to_string()))
        }
    }
}

impl Drop for DynLib {
    fn drop(&mut self) {
        if self.handle.is_null() {
            return;
        }
        #[cfg(unix)]
        // SAFETY: handle came from dlopen and is closed once.
        unsafe {
            dlclose(self.handle);
        }
        #[cfg(windows)]
        // SAFETY: handle came from LoadLibraryA and is freed once.
        unsafe {
            FreeLibrary(self.handle);
        }
    }
}

/// Resolve one driver symbol as a typed function pointer.
///
/// Expands to an expression that `?`-propagates a missing symbol as
/// `DeviceCreation`. The binding's declared type must be the symbol's real
/// C signature.
macro_rules! load_sym {
    ($lib:expr, $name:literal) => {{
        let cname = concat!($name, "\0");
        // SAFETY: `cname` is a literal with exactly one trailing NUL.
        let cstr = unsafe { std::ffi::CStr::from_bytes_with_nul_unchecked(cname.as_bytes()) };
        let ptr = unsafe { $lib.sym(cstr) }?;
        // SAFETY: the caller's binding type matches the exported signature.
        unsafe { std::mem::transmute::<*mut std::os::raw::c_void, _>(ptr) }
    }};
}

pub(crate) use load_sym;

#[cfg(unix)]
fn last_dl_error() -> Option<String> {
    // SAFETY: dlerror returns either null or a thread-local C string.
    unsafe {
        let err = dlerror();
        if err.is_null() {
            None
        } else {
            Some(CStr::from_ptr(err).to_string_lossy().into_owned())
        }
    }
}

#[cfg(unix)]
const RTLD_NOW: c_int = 2;
#[cfg(unix)]
const RTLD_LOCAL: c_int = 0;

#[cfg(unix)]
extern "C" {
    fn dlopen(filename: *const c_char, flags: c_int) -> *mut c_void;
    fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
    fn dlclose(handle: *mut c_void) -> c_int;
    fn dlerror() -> *const c_char;
}

#[cfg(windows)]
extern "system" {
    fn LoadLibraryA(name: *const c_char) -> *mut c_void;
    fn GetProcAddress(module: *mut c_void, name: *const c_char) -> *mut c_void;
    fn FreeLibrary(module: *mut c_void) -> c_int;
}
