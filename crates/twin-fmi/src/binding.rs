//! ---
//! twin_section: "03-model-binding"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Capability table over the FMI 1.0 co-simulation ABI."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
//! The [`FmiApi`] trait and its shared-library implementation.

use std::ffi::{c_char, c_void, CString};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

use libloading::{Library, Symbol};
use tracing::{debug, info, warn};

use crate::ffi::{
    self, lossy_string, CallbackFunctions, FmiBoolean, FmiComponent, FmiInteger, FmiReal,
    FmiStatusCode, FmiStatusKind, FmiString, FmiValueReference, Status, StatusKind,
};
use crate::{BindError, FmiError, Result};

/// Opaque instance returned by a successful instantiate.
///
/// Not `Clone`: exactly one handle exists per instance and it is consumed by
/// [`FmiApi::free_slave_instance`].
#[derive(Debug)]
pub struct ModelHandle(NonNull<c_void>);

impl ModelHandle {
    /// Wrap a raw component pointer; `None` when the model returned null.
    pub fn from_raw(component: FmiComponent) -> Option<Self> {
        NonNull::new(component).map(ModelHandle)
    }

    pub fn as_ptr(&self) -> FmiComponent {
        self.0.as_ptr()
    }
}

/// Arguments of `fmiInstantiateSlave`.
#[derive(Debug, Clone)]
pub struct InstantiateRequest {
    pub instance_name: String,
    pub guid: String,
    pub location: String,
    pub mime_type: String,
    pub timeout_ms: f64,
    pub visible: bool,
    pub interactive: bool,
    pub logging_on: bool,
}

/// Every entry point of the co-simulation interface.
///
/// Status-returning calls report [`Status::Fatal`] once the binding has been
/// released. Batch calls take parallel slices of equal length.
pub trait FmiApi {
    fn model_identifier(&self) -> &str;
    fn is_bound(&self) -> bool;

    fn types_platform(&self) -> Result<String>;
    fn version(&self) -> Result<String>;

    fn instantiate_slave(&mut self, request: &InstantiateRequest) -> Result<ModelHandle>;
    fn set_debug_logging(&mut self, handle: &ModelHandle, logging_on: bool) -> Status;
    fn initialize_slave(
        &mut self,
        handle: &ModelHandle,
        start_time: f64,
        stop_time_defined: bool,
        stop_time: f64,
    ) -> Status;
    fn terminate_slave(&mut self, handle: &ModelHandle) -> Status;
    fn reset_slave(&mut self, handle: &ModelHandle) -> Status;
    fn free_slave_instance(&mut self, handle: ModelHandle);

    fn set_real(&mut self, handle: &ModelHandle, refs: &[u32], values: &[f64]) -> Status;
    fn set_integer(&mut self, handle: &ModelHandle, refs: &[u32], values: &[i32]) -> Status;
    fn set_boolean(&mut self, handle: &ModelHandle, refs: &[u32], values: &[bool]) -> Status;
    fn set_string(&mut self, handle: &ModelHandle, refs: &[u32], values: &[&str]) -> Status;

    fn get_real(&mut self, handle: &ModelHandle, refs: &[u32], values: &mut [f64]) -> Status;
    fn get_integer(&mut self, handle: &ModelHandle, refs: &[u32], values: &mut [i32]) -> Status;
    fn get_boolean(&mut self, handle: &ModelHandle, refs: &[u32], values: &mut [bool]) -> Status;
    fn get_string(&mut self, handle: &ModelHandle, refs: &[u32], values: &mut [String])
        -> Status;

    fn set_real_input_derivatives(
        &mut self,
        handle: &ModelHandle,
        refs: &[u32],
        orders: &[i32],
        values: &[f64],
    ) -> Status;
    fn get_real_output_derivatives(
        &mut self,
        handle: &ModelHandle,
        refs: &[u32],
        orders: &[i32],
        values: &mut [f64],
    ) -> Status;

    fn do_step(
        &mut self,
        handle: &ModelHandle,
        current_time: f64,
        step_size: f64,
        new_step: bool,
    ) -> Status;
    fn cancel_step(&mut self, handle: &ModelHandle) -> Status;

    fn get_status(&mut self, handle: &ModelHandle, kind: StatusKind) -> (Status, Status);
    fn get_real_status(&mut self, handle: &ModelHandle, kind: StatusKind) -> (Status, f64);
    fn get_integer_status(&mut self, handle: &ModelHandle, kind: StatusKind) -> (Status, i32);
    fn get_boolean_status(&mut self, handle: &ModelHandle, kind: StatusKind) -> (Status, bool);
    fn get_string_status(&mut self, handle: &ModelHandle, kind: StatusKind) -> (Status, String);

    /// Release the native module. Idempotent.
    fn unbind(&mut self);
}

type GetStringFn = unsafe extern "C" fn() -> *const c_char;
type ComponentFn = unsafe extern "C" fn(FmiComponent) -> FmiStatusCode;
type SetDebugLoggingFn = unsafe extern "C" fn(FmiComponent, FmiBoolean) -> FmiStatusCode;
type SetRealFn =
    unsafe extern "C" fn(FmiComponent, *const FmiValueReference, usize, *const FmiReal) -> FmiStatusCode;
type SetIntegerFn = unsafe extern "C" fn(
    FmiComponent,
    *const FmiValueReference,
    usize,
    *const FmiInteger,
) -> FmiStatusCode;
type SetBooleanFn = unsafe extern "C" fn(
    FmiComponent,
    *const FmiValueReference,
    usize,
    *const FmiBoolean,
) -> FmiStatusCode;
type SetStringFn =
    unsafe extern "C" fn(FmiComponent, *const FmiValueReference, usize, *const FmiString) -> FmiStatusCode;
type GetRealFn =
    unsafe extern "C" fn(FmiComponent, *const FmiValueReference, usize, *mut FmiReal) -> FmiStatusCode;
type GetIntegerFn =
    unsafe extern "C" fn(FmiComponent, *const FmiValueReference, usize, *mut FmiInteger) -> FmiStatusCode;
type GetBooleanFn =
    unsafe extern "C" fn(FmiComponent, *const FmiValueReference, usize, *mut FmiBoolean) -> FmiStatusCode;
type GetStringValuesFn =
    unsafe extern "C" fn(FmiComponent, *const FmiValueReference, usize, *mut FmiString) -> FmiStatusCode;
type InstantiateSlaveFn = unsafe extern "C" fn(
    FmiString,
    FmiString,
    FmiString,
    FmiString,
    FmiReal,
    FmiBoolean,
    FmiBoolean,
    CallbackFunctions,
    FmiBoolean,
) -> FmiComponent;
type InitializeSlaveFn =
    unsafe extern "C" fn(FmiComponent, FmiReal, FmiBoolean, FmiReal) -> FmiStatusCode;
type FreeSlaveInstanceFn = unsafe extern "C" fn(FmiComponent);
type SetRealInputDerivativesFn = unsafe extern "C" fn(
    FmiComponent,
    *const FmiValueReference,
    usize,
    *const FmiInteger,
    *const FmiReal,
) -> FmiStatusCode;
type GetRealOutputDerivativesFn = unsafe extern "C" fn(
    FmiComponent,
    *const FmiValueReference,
    usize,
    *const FmiInteger,
    *mut FmiReal,
) -> FmiStatusCode;
type DoStepFn = unsafe extern "C" fn(FmiComponent, FmiReal, FmiReal, FmiBoolean) -> FmiStatusCode;
type GetStatusFn =
    unsafe extern "C" fn(FmiComponent, FmiStatusKind, *mut FmiStatusCode) -> FmiStatusCode;
type GetRealStatusFn = unsafe extern "C" fn(FmiComponent, FmiStatusKind, *mut FmiReal) -> FmiStatusCode;
type GetIntegerStatusFn =
    unsafe extern "C" fn(FmiComponent, FmiStatusKind, *mut FmiInteger) -> FmiStatusCode;
type GetBooleanStatusFn =
    unsafe extern "C" fn(FmiComponent, FmiStatusKind, *mut FmiBoolean) -> FmiStatusCode;
type GetStringStatusFn =
    unsafe extern "C" fn(FmiComponent, FmiStatusKind, *mut FmiString) -> FmiStatusCode;

/// Function pointers copied out of the library. Only valid while the
/// owning [`Library`] is loaded.
#[derive(Clone, Copy)]
struct FunctionTable {
    get_types_platform: GetStringFn,
    get_version: GetStringFn,
    set_debug_logging: SetDebugLoggingFn,
    set_real: SetRealFn,
    set_integer: SetIntegerFn,
    set_boolean: SetBooleanFn,
    set_string: SetStringFn,
    get_real: GetRealFn,
    get_integer: GetIntegerFn,
    get_boolean: GetBooleanFn,
    get_string: GetStringValuesFn,
    instantiate_slave: InstantiateSlaveFn,
    initialize_slave: InitializeSlaveFn,
    terminate_slave: ComponentFn,
    reset_slave: ComponentFn,
    free_slave_instance: FreeSlaveInstanceFn,
    set_real_input_derivatives: SetRealInputDerivativesFn,
    get_real_output_derivatives: GetRealOutputDerivativesFn,
    cancel_step: ComponentFn,
    do_step: DoStepFn,
    get_status: GetStatusFn,
    get_real_status: GetRealStatusFn,
    get_integer_status: GetIntegerStatusFn,
    get_boolean_status: GetBooleanStatusFn,
    get_string_status: GetStringStatusFn,
}

/// # Safety
/// `T` must be the function pointer type of the exported symbol.
unsafe fn resolve<T: Copy>(library: &Library, identifier: &str, function: &str) -> Result<T> {
    let name = format!("{identifier}_{function}");
    let mut raw = name.clone().into_bytes();
    raw.push(0);
    let symbol: Symbol<'_, T> = library
        .get(&raw)
        .map_err(|_| BindError::MissingSymbol(name))?;
    Ok(*symbol)
}

impl FunctionTable {
    /// # Safety
    /// The library must export the FMI 1.0 co-simulation signatures.
    unsafe fn load(library: &Library, id: &str) -> Result<Self> {
        Ok(Self {
            get_types_platform: resolve(library, id, "fmiGetTypesPlatform")?,
            get_version: resolve(library, id, "fmiGetVersion")?,
            set_debug_logging: resolve(library, id, "fmiSetDebugLogging")?,
            set_real: resolve(library, id, "fmiSetReal")?,
            set_integer: resolve(library, id, "fmiSetInteger")?,
            set_boolean: resolve(library, id, "fmiSetBoolean")?,
            set_string: resolve(library, id, "fmiSetString")?,
            get_real: resolve(library, id, "fmiGetReal")?,
            get_integer: resolve(library, id, "fmiGetInteger")?,
            get_boolean: resolve(library, id, "fmiGetBoolean")?,
            get_string: resolve(library, id, "fmiGetString")?,
            instantiate_slave: resolve(library, id, "fmiInstantiateSlave")?,
            initialize_slave: resolve(library, id, "fmiInitializeSlave")?,
            terminate_slave: resolve(library, id, "fmiTerminateSlave")?,
            reset_slave: resolve(library, id, "fmiResetSlave")?,
            free_slave_instance: resolve(library, id, "fmiFreeSlaveInstance")?,
            set_real_input_derivatives: resolve(library, id, "fmiSetRealInputDerivatives")?,
            get_real_output_derivatives: resolve(library, id, "fmiGetRealOutputDerivatives")?,
            cancel_step: resolve(library, id, "fmiCancelStep")?,
            do_step: resolve(library, id, "fmiDoStep")?,
            get_status: resolve(library, id, "fmiGetStatus")?,
            get_real_status: resolve(library, id, "fmiGetRealStatus")?,
            get_integer_status: resolve(library, id, "fmiGetIntegerStatus")?,
            get_boolean_status: resolve(library, id, "fmiGetBooleanStatus")?,
            get_string_status: resolve(library, id, "fmiGetStringStatus")?,
        })
    }
}

/// [`FmiApi`] backed by a dynamically loaded shared library.
pub struct NativeBinding {
    model_identifier: String,
    library_path: PathBuf,
    table: Option<FunctionTable>,
    library: Option<Library>,
}

impl NativeBinding {
    /// Load `library_path` and resolve every entry point. A missing symbol
    /// unloads the library again before the error is returned.
    pub fn bind(library_path: &Path, model_identifier: &str) -> Result<Self> {
        if !library_path.is_file() {
            return Err(BindError::LibraryNotFound(library_path.to_path_buf()).into());
        }
        // SAFETY: loading runs the library initialisers of a model package the
        // caller chose to trust.
        let library = unsafe { Library::new(library_path) }.map_err(|source| {
            BindError::LibraryLoad {
                path: library_path.to_path_buf(),
                source,
            }
        })?;
        // SAFETY: symbol types follow the FMI 1.0 co-simulation headers.
        let table = unsafe { FunctionTable::load(&library, model_identifier)? };
        info!(
            library = %library_path.display(),
            model = %model_identifier,
            "bound model function table"
        );
        Ok(Self {
            model_identifier: model_identifier.to_owned(),
            library_path: library_path.to_path_buf(),
            table: Some(table),
            library: Some(library),
        })
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    fn call(&self, operation: impl FnOnce(&FunctionTable) -> Status) -> Status {
        match &self.table {
            Some(table) => operation(table),
            None => Status::Fatal,
        }
    }

    /// Every value slice must match `refs`; the ABI trusts the count.
    fn check_lengths(&self, operation: &'static str, refs: &[u32], lengths: &[usize]) -> bool {
        if lengths.iter().all(|len| *len == refs.len()) {
            return true;
        }
        warn!(
            model = %self.model_identifier,
            operation,
            refs = refs.len(),
            ?lengths,
            "value slices do not match the reference count"
        );
        false
    }
}

fn c_string(value: &str) -> Result<CString> {
    CString::new(value).map_err(|err| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()).into()
    })
}

impl FmiApi for NativeBinding {
    fn model_identifier(&self) -> &str {
        &self.model_identifier
    }

    fn is_bound(&self) -> bool {
        self.table.is_some()
    }

    fn types_platform(&self) -> Result<String> {
        let table = self.table.as_ref().ok_or(FmiError::Unbound)?;
        // SAFETY: returns a static NUL-terminated string.
        Ok(unsafe { lossy_string((table.get_types_platform)()) })
    }

    fn version(&self) -> Result<String> {
        let table = self.table.as_ref().ok_or(FmiError::Unbound)?;
        // SAFETY: returns a static NUL-terminated string.
        Ok(unsafe { lossy_string((table.get_version)()) })
    }

    fn instantiate_slave(&mut self, request: &InstantiateRequest) -> Result<ModelHandle> {
        let table = self.table.as_ref().ok_or(FmiError::Unbound)?;
        let instance_name = c_string(&request.instance_name)?;
        let guid = c_string(&request.guid)?;
        let location = c_string(&request.location)?;
        let mime_type = c_string(&request.mime_type)?;
        debug!(
            instance = %request.instance_name,
            guid = %request.guid,
            location = %request.location,
            "instantiating slave"
        );
        // SAFETY: every string outlives the call; callbacks are 'static.
        let component = unsafe {
            (table.instantiate_slave)(
                instance_name.as_ptr(),
                guid.as_ptr(),
                location.as_ptr(),
                mime_type.as_ptr(),
                request.timeout_ms,
                ffi::to_fmi_boolean(request.visible),
                ffi::to_fmi_boolean(request.interactive),
                CallbackFunctions::host(),
                ffi::to_fmi_boolean(request.logging_on),
            )
        };
        ModelHandle::from_raw(component)
            .ok_or_else(|| FmiError::InstantiationFailed(request.instance_name.clone()))
    }

    fn set_debug_logging(&mut self, handle: &ModelHandle, logging_on: bool) -> Status {
        self.call(|table| {
            // SAFETY: handle is a live component of this library.
            Status::from_raw(unsafe {
                (table.set_debug_logging)(handle.as_ptr(), ffi::to_fmi_boolean(logging_on))
            })
        })
    }

    fn initialize_slave(
        &mut self,
        handle: &ModelHandle,
        start_time: f64,
        stop_time_defined: bool,
        stop_time: f64,
    ) -> Status {
        self.call(|table| {
            // SAFETY: handle is a live component of this library.
            Status::from_raw(unsafe {
                (table.initialize_slave)(
                    handle.as_ptr(),
                    start_time,
                    ffi::to_fmi_boolean(stop_time_defined),
                    stop_time,
                )
            })
        })
    }

    fn terminate_slave(&mut self, handle: &ModelHandle) -> Status {
        // SAFETY: handle is a live component of this library.
        self.call(|table| Status::from_raw(unsafe { (table.terminate_slave)(handle.as_ptr()) }))
    }

    fn reset_slave(&mut self, handle: &ModelHandle) -> Status {
        // SAFETY: handle is a live component of this library.
        self.call(|table| Status::from_raw(unsafe { (table.reset_slave)(handle.as_ptr()) }))
    }

    fn free_slave_instance(&mut self, handle: ModelHandle) {
        match &self.table {
            // SAFETY: the handle is consumed, so it cannot be used afterwards.
            Some(table) => unsafe { (table.free_slave_instance)(handle.as_ptr()) },
            None => warn!(
                model = %self.model_identifier,
                "free requested after unbind; instance leaked"
            ),
        }
    }

    fn set_real(&mut self, handle: &ModelHandle, refs: &[u32], values: &[f64]) -> Status {
        if !self.check_lengths("set_real", refs, &[values.len()]) {
            return Status::Error;
        }
        self.call(|table| {
            // SAFETY: both slices hold `refs.len()` elements.
            Status::from_raw(unsafe {
                (table.set_real)(handle.as_ptr(), refs.as_ptr(), refs.len(), values.as_ptr())
            })
        })
    }

    fn set_integer(&mut self, handle: &ModelHandle, refs: &[u32], values: &[i32]) -> Status {
        if !self.check_lengths("set_integer", refs, &[values.len()]) {
            return Status::Error;
        }
        self.call(|table| {
            // SAFETY: both slices hold `refs.len()` elements.
            Status::from_raw(unsafe {
                (table.set_integer)(handle.as_ptr(), refs.as_ptr(), refs.len(), values.as_ptr())
            })
        })
    }

    fn set_boolean(&mut self, handle: &ModelHandle, refs: &[u32], values: &[bool]) -> Status {
        if !self.check_lengths("set_boolean", refs, &[values.len()]) {
            return Status::Error;
        }
        let raw: Vec<FmiBoolean> = values.iter().copied().map(ffi::to_fmi_boolean).collect();
        self.call(|table| {
            // SAFETY: both slices hold `refs.len()` elements.
            Status::from_raw(unsafe {
                (table.set_boolean)(handle.as_ptr(), refs.as_ptr(), refs.len(), raw.as_ptr())
            })
        })
    }

    fn set_string(&mut self, handle: &ModelHandle, refs: &[u32], values: &[&str]) -> Status {
        if !self.check_lengths("set_string", refs, &[values.len()]) {
            return Status::Error;
        }
        let owned = match values
            .iter()
            .map(|value| c_string(value))
            .collect::<Result<Vec<CString>>>()
        {
            Ok(owned) => owned,
            Err(err) => {
                warn!(error = %err, "string value contains an interior NUL");
                return Status::Error;
            }
        };
        let pointers: Vec<FmiString> = owned.iter().map(|value| value.as_ptr()).collect();
        self.call(|table| {
            // SAFETY: the CStrings outlive the call.
            Status::from_raw(unsafe {
                (table.set_string)(handle.as_ptr(), refs.as_ptr(), refs.len(), pointers.as_ptr())
            })
        })
    }

    fn get_real(&mut self, handle: &ModelHandle, refs: &[u32], values: &mut [f64]) -> Status {
        if !self.check_lengths("get_real", refs, &[values.len()]) {
            return Status::Error;
        }
        self.call(|table| {
            // SAFETY: `values` has room for `refs.len()` elements.
            Status::from_raw(unsafe {
                (table.get_real)(handle.as_ptr(), refs.as_ptr(), refs.len(), values.as_mut_ptr())
            })
        })
    }

    fn get_integer(&mut self, handle: &ModelHandle, refs: &[u32], values: &mut [i32]) -> Status {
        if !self.check_lengths("get_integer", refs, &[values.len()]) {
            return Status::Error;
        }
        self.call(|table| {
            // SAFETY: `values` has room for `refs.len()` elements.
            Status::from_raw(unsafe {
                (table.get_integer)(
                    handle.as_ptr(),
                    refs.as_ptr(),
                    refs.len(),
                    values.as_mut_ptr(),
                )
            })
        })
    }

    fn get_boolean(&mut self, handle: &ModelHandle, refs: &[u32], values: &mut [bool]) -> Status {
        if !self.check_lengths("get_boolean", refs, &[values.len()]) {
            return Status::Error;
        }
        let mut raw = vec![ffi::FMI_FALSE; refs.len()];
        let status = self.call(|table| {
            // SAFETY: `raw` has room for `refs.len()` elements.
            Status::from_raw(unsafe {
                (table.get_boolean)(handle.as_ptr(), refs.as_ptr(), refs.len(), raw.as_mut_ptr())
            })
        });
        for (slot, value) in values.iter_mut().zip(raw) {
            *slot = value != ffi::FMI_FALSE;
        }
        status
    }

    fn get_string(
        &mut self,
        handle: &ModelHandle,
        refs: &[u32],
        values: &mut [String],
    ) -> Status {
        if !self.check_lengths("get_string", refs, &[values.len()]) {
            return Status::Error;
        }
        let mut raw: Vec<FmiString> = vec![ptr::null(); refs.len()];
        let status = self.call(|table| {
            // SAFETY: `raw` has room for `refs.len()` elements.
            Status::from_raw(unsafe {
                (table.get_string)(handle.as_ptr(), refs.as_ptr(), refs.len(), raw.as_mut_ptr())
            })
        });
        for (slot, value) in values.iter_mut().zip(raw) {
            // SAFETY: the model owns the strings until its next call.
            *slot = unsafe { lossy_string(value) };
        }
        status
    }

    fn set_real_input_derivatives(
        &mut self,
        handle: &ModelHandle,
        refs: &[u32],
        orders: &[i32],
        values: &[f64],
    ) -> Status {
        if !self.check_lengths("set_real_input_derivatives", refs, &[orders.len(), values.len()]) {
            return Status::Error;
        }
        self.call(|table| {
            // SAFETY: all slices hold `refs.len()` elements.
            Status::from_raw(unsafe {
                (table.set_real_input_derivatives)(
                    handle.as_ptr(),
                    refs.as_ptr(),
                    refs.len(),
                    orders.as_ptr(),
                    values.as_ptr(),
                )
            })
        })
    }

    fn get_real_output_derivatives(
        &mut self,
        handle: &ModelHandle,
        refs: &[u32],
        orders: &[i32],
        values: &mut [f64],
    ) -> Status {
        if !self.check_lengths("get_real_output_derivatives", refs, &[orders.len(), values.len()]) {
            return Status::Error;
        }
        self.call(|table| {
            // SAFETY: all slices hold `refs.len()` elements.
            Status::from_raw(unsafe {
                (table.get_real_output_derivatives)(
                    handle.as_ptr(),
                    refs.as_ptr(),
                    refs.len(),
                    orders.as_ptr(),
                    values.as_mut_ptr(),
                )
            })
        })
    }

    fn do_step(
        &mut self,
        handle: &ModelHandle,
        current_time: f64,
        step_size: f64,
        new_step: bool,
    ) -> Status {
        self.call(|table| {
            // SAFETY: handle is a live component of this library.
            Status::from_raw(unsafe {
                (table.do_step)(
                    handle.as_ptr(),
                    current_time,
                    step_size,
                    ffi::to_fmi_boolean(new_step),
                )
            })
        })
    }

    fn cancel_step(&mut self, handle: &ModelHandle) -> Status {
        // SAFETY: handle is a live component of this library.
        self.call(|table| Status::from_raw(unsafe { (table.cancel_step)(handle.as_ptr()) }))
    }

    fn get_status(&mut self, handle: &ModelHandle, kind: StatusKind) -> (Status, Status) {
        let mut value: FmiStatusCode = Status::Fatal.code();
        let status = self.call(|table| {
            // SAFETY: `value` is a valid out pointer.
            Status::from_raw(unsafe { (table.get_status)(handle.as_ptr(), kind.raw(), &mut value) })
        });
        (status, Status::from_raw(value))
    }

    fn get_real_status(&mut self, handle: &ModelHandle, kind: StatusKind) -> (Status, f64) {
        let mut value: FmiReal = f64::NAN;
        let status = self.call(|table| {
            // SAFETY: `value` is a valid out pointer.
            Status::from_raw(unsafe {
                (table.get_real_status)(handle.as_ptr(), kind.raw(), &mut value)
            })
        });
        (status, value)
    }

    fn get_integer_status(&mut self, handle: &ModelHandle, kind: StatusKind) -> (Status, i32) {
        let mut value: FmiInteger = 0;
        let status = self.call(|table| {
            // SAFETY: `value` is a valid out pointer.
            Status::from_raw(unsafe {
                (table.get_integer_status)(handle.as_ptr(), kind.raw(), &mut value)
            })
        });
        (status, value)
    }

    fn get_boolean_status(&mut self, handle: &ModelHandle, kind: StatusKind) -> (Status, bool) {
        let mut value: FmiBoolean = ffi::FMI_FALSE;
        let status = self.call(|table| {
            // SAFETY: `value` is a valid out pointer.
            Status::from_raw(unsafe {
                (table.get_boolean_status)(handle.as_ptr(), kind.raw(), &mut value)
            })
        });
        (status, value != ffi::FMI_FALSE)
    }

    fn get_string_status(&mut self, handle: &ModelHandle, kind: StatusKind) -> (Status, String) {
        let mut value: FmiString = ptr::null();
        let status = self.call(|table| {
            // SAFETY: `value` is a valid out pointer.
            Status::from_raw(unsafe {
                (table.get_string_status)(handle.as_ptr(), kind.raw(), &mut value)
            })
        });
        // SAFETY: null or a model-owned NUL-terminated string.
        (status, unsafe { lossy_string(value) })
    }

    fn unbind(&mut self) {
        self.table = None;
        if let Some(library) = self.library.take() {
            if let Err(err) = library.close() {
                warn!(
                    library = %self.library_path.display(),
                    error = %err,
                    "failed to unload model library"
                );
            } else {
                debug!(library = %self.library_path.display(), "unloaded model library");
            }
        }
    }
}

impl Drop for NativeBinding {
    fn drop(&mut self) {
        self.unbind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_is_reported_before_loading() {
        let err = NativeBinding::bind(Path::new("/nonexistent/model.so"), "model")
            .err()
            .expect("bind must fail");
        assert!(matches!(err, FmiError::Bind(BindError::LibraryNotFound(_))));
    }

    fn unbound() -> NativeBinding {
        NativeBinding {
            model_identifier: "model".to_owned(),
            library_path: PathBuf::from("/nonexistent/model.so"),
            table: None,
            library: None,
        }
    }

    #[test]
    fn mismatched_slices_are_refused_before_the_call() {
        let mut binding = unbound();
        let mut slot = 0u8;
        let handle = ModelHandle::from_raw((&mut slot as *mut u8).cast()).unwrap();
        assert_eq!(binding.set_real(&handle, &[0, 1], &[1.0]), Status::Error);
        assert_eq!(binding.set_boolean(&handle, &[0], &[]), Status::Error);
        assert_eq!(binding.set_string(&handle, &[0, 1], &["a"]), Status::Error);
        let mut reals = [0.0];
        assert_eq!(binding.get_real(&handle, &[0, 1], &mut reals), Status::Error);
        let mut integers = [0; 3];
        assert_eq!(binding.get_integer(&handle, &[0, 1], &mut integers), Status::Error);
        let mut texts = vec![String::new()];
        assert_eq!(binding.get_string(&handle, &[0, 1], &mut texts), Status::Error);
        assert_eq!(
            binding.set_real_input_derivatives(&handle, &[0], &[1, 2], &[0.5]),
            Status::Error
        );
        assert_eq!(
            binding.get_real_output_derivatives(&handle, &[0], &[1], &mut []),
            Status::Error
        );
        // Matching slices reach the call, which an unbound table refuses.
        assert_eq!(binding.set_real(&handle, &[0], &[1.0]), Status::Fatal);
    }

    #[test]
    fn null_component_yields_no_handle() {
        assert!(ModelHandle::from_raw(ptr::null_mut()).is_none());
        let mut slot = 0u8;
        let handle = ModelHandle::from_raw((&mut slot as *mut u8).cast()).unwrap();
        assert_eq!(handle.as_ptr(), (&mut slot as *mut u8).cast::<c_void>());
    }
}
