//! ---
//! twin_section: "03-model-binding"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Raw FMI 1.0 co-simulation types and host callbacks."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
//! C-level declarations for the FMI 1.0 co-simulation interface.
//!
//! Everything here mirrors `fmiFunctions.h` / `fmiPlatformTypes.h` of the 1.0
//! standard. Safe wrappers live in [`crate::binding`].

use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::fmt;

use serde::Serialize;
use tracing::{debug, error, info, warn};

pub type FmiComponent = *mut c_void;
pub type FmiValueReference = c_uint;
pub type FmiReal = f64;
pub type FmiInteger = c_int;
pub type FmiBoolean = c_char;
pub type FmiString = *const c_char;
pub type FmiStatusCode = c_int;
pub type FmiStatusKind = c_int;

pub const FMI_TRUE: FmiBoolean = 1;
pub const FMI_FALSE: FmiBoolean = 0;

pub const MIME_TYPE_SHARED_LIBRARY: &str = "application/x-fmu-sharedlibrary";

pub fn to_fmi_boolean(value: bool) -> FmiBoolean {
    if value {
        FMI_TRUE
    } else {
        FMI_FALSE
    }
}

/// Status codes returned by every FMI call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Warning,
    Discard,
    Error,
    Fatal,
    Pending,
}

impl Status {
    /// Unknown codes are treated as fatal.
    pub fn from_raw(code: FmiStatusCode) -> Self {
        match code {
            0 => Status::Ok,
            1 => Status::Warning,
            2 => Status::Discard,
            3 => Status::Error,
            4 => Status::Fatal,
            5 => Status::Pending,
            _ => Status::Fatal,
        }
    }

    pub fn code(self) -> FmiStatusCode {
        match self {
            Status::Ok => 0,
            Status::Warning => 1,
            Status::Discard => 2,
            Status::Error => 3,
            Status::Fatal => 4,
            Status::Pending => 5,
        }
    }

    /// `Ok` and `Warning` let the run continue; everything else is stricter.
    pub fn is_acceptable(self) -> bool {
        matches!(self, Status::Ok | Status::Warning)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Warning => "warning",
            Status::Discard => "discard",
            Status::Error => "error",
            Status::Fatal => "fatal",
            Status::Pending => "pending",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selector for the `fmiGet*Status` queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    DoStepStatus,
    PendingStatus,
    LastSuccessfulTime,
}

impl StatusKind {
    pub fn raw(self) -> FmiStatusKind {
        match self {
            StatusKind::DoStepStatus => 0,
            StatusKind::PendingStatus => 1,
            StatusKind::LastSuccessfulTime => 2,
        }
    }
}

/// The logger is variadic in C. The printf arguments are not consumed, the
/// format string is forwarded verbatim.
pub type CallbackLogger = extern "C" fn(
    component: FmiComponent,
    instance_name: FmiString,
    status: FmiStatusCode,
    category: FmiString,
    message: FmiString,
);
pub type CallbackAllocateMemory = extern "C" fn(nobj: usize, size: usize) -> *mut c_void;
pub type CallbackFreeMemory = extern "C" fn(obj: *mut c_void);
pub type StepFinished = extern "C" fn(component: FmiComponent, status: FmiStatusCode);

#[repr(C)]
#[derive(Clone, Copy)]
pub struct CallbackFunctions {
    pub logger: CallbackLogger,
    pub allocate_memory: CallbackAllocateMemory,
    pub free_memory: CallbackFreeMemory,
    pub step_finished: Option<StepFinished>,
}

impl CallbackFunctions {
    /// calloc/free allocator, tracing logger, no asynchronous step notification.
    pub fn host() -> Self {
        Self {
            logger: forward_model_log,
            allocate_memory: allocate_zeroed,
            free_memory: release_memory,
            step_finished: None,
        }
    }
}

extern "C" {
    fn calloc(nobj: usize, size: usize) -> *mut c_void;
    fn free(ptr: *mut c_void);
}

extern "C" fn allocate_zeroed(nobj: usize, size: usize) -> *mut c_void {
    // SAFETY: plain libc allocation, ownership passes to the model.
    unsafe { calloc(nobj, size) }
}

extern "C" fn release_memory(obj: *mut c_void) {
    if !obj.is_null() {
        // SAFETY: the model only frees memory it obtained from `allocate_zeroed`.
        unsafe { free(obj) }
    }
}

/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn lossy_string(ptr: FmiString) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

extern "C" fn forward_model_log(
    _component: FmiComponent,
    instance_name: FmiString,
    status: FmiStatusCode,
    category: FmiString,
    message: FmiString,
) {
    // SAFETY: the standard requires NUL-terminated strings or null.
    let (instance, category, message) = unsafe {
        (
            lossy_string(instance_name),
            lossy_string(category),
            lossy_string(message),
        )
    };
    let status = Status::from_raw(status);
    match status {
        Status::Ok => debug!(target: "fmu", instance = %instance, category = %category, %status, "{}", message),
        Status::Warning => warn!(target: "fmu", instance = %instance, category = %category, %status, "{}", message),
        Status::Pending => info!(target: "fmu", instance = %instance, category = %category, %status, "{}", message),
        Status::Discard | Status::Error | Status::Fatal => {
            error!(target: "fmu", instance = %instance, category = %category, %status, "{}", message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_abi_numbering() {
        for code in 0..=5 {
            assert_eq!(Status::from_raw(code).code(), code);
        }
        assert_eq!(Status::from_raw(42), Status::Fatal);
    }

    #[test]
    fn only_ok_and_warning_are_acceptable() {
        assert!(Status::Ok.is_acceptable());
        assert!(Status::Warning.is_acceptable());
        assert!(!Status::Discard.is_acceptable());
        assert!(!Status::Pending.is_acceptable());
    }

    #[test]
    fn host_allocator_returns_zeroed_memory() {
        let callbacks = CallbackFunctions::host();
        let ptr = (callbacks.allocate_memory)(4, std::mem::size_of::<u32>()) as *mut u32;
        assert!(!ptr.is_null());
        let slice = unsafe { std::slice::from_raw_parts(ptr, 4) };
        assert!(slice.iter().all(|value| *value == 0));
        (callbacks.free_memory)(ptr.cast());
    }
}
