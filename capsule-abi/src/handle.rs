//! C-ABI handle onto a plugin object's parameter back-end
//!
//! Rust trait objects have no stable layout, so a host built by a different
//! toolchain cannot call [`ParamBe`] on an object a plugin created. The plugin
//! instead publishes a [`ParamBeHandle`]: the instance pointer plus a table of
//! `extern "C"` thunks monomorphised for its managed type.

use std::ffi::{CStr, CString, c_char, c_void};
use std::mem::MaybeUninit;

use crate::error::ParamError;
use crate::params::{ParamBe, Parameterized};
use crate::types::STATUS_OK;

/// Status returned by a handle thunk for an unknown parameter
pub const PARAM_UNKNOWN: i32 = -1;

/// Status returned by a handle thunk for a null blob
pub const PARAM_NULL_BLOB: i32 = -2;

type ReportFn = unsafe extern "C" fn(instance: *mut c_void, idents: *mut *const *const c_char) -> i32;
type GetFn = unsafe extern "C" fn(instance: *mut c_void, ident: *const c_char, blob: *mut c_void) -> i32;
type SetFn =
    unsafe extern "C" fn(instance: *mut c_void, ident: *const c_char, blob: *const c_void) -> i32;
type ApiPtrFn = unsafe extern "C" fn(instance: *mut c_void, api: *const c_char) -> *mut c_void;

/// Instance pointer and function table for parameter access across the
/// library boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ParamBeHandle {
    pub instance: *mut c_void,
    /// Stores a pointer to an array of identifiers in `*idents` and returns
    /// its length. The array lives as long as the instance.
    pub report_params: ReportFn,
    pub get: GetFn,
    pub set: SetFn,
    /// Same shape as `report_params`, for the capability identifiers.
    pub get_apis: ReportFn,
    /// Null when the capability is not supported.
    pub get_api_ptr: ApiPtrFn,
}

impl ParamBeHandle {
    /// Build a handle for `target`.
    ///
    /// The handle holds a raw pointer: `target` must stay at its address (boxed
    /// inside the plugin object) for as long as the handle is used.
    pub fn new<M>(target: &mut Parameterized<M>) -> Self {
        Self {
            instance: (target as *mut Parameterized<M>).cast(),
            report_params: report_thunk::<M>,
            get: get_thunk::<M>,
            set: set_thunk::<M>,
            get_apis: apis_thunk::<M>,
            get_api_ptr: api_ptr_thunk::<M>,
        }
    }

    /// Identifiers of the exported parameters, in registration order.
    ///
    /// # Safety
    ///
    /// The instance behind the handle must still be alive.
    pub unsafe fn report_params(&self) -> Vec<String> {
        unsafe { collect_idents(self.report_params, self.instance) }
    }

    /// Capabilities the object supports, in the order they were recorded.
    ///
    /// # Safety
    ///
    /// The instance behind the handle must still be alive.
    pub unsafe fn get_apis(&self) -> Vec<String> {
        unsafe { collect_idents(self.get_apis, self.instance) }
    }

    /// # Safety
    ///
    /// The instance must be alive and `blob` must be storage for the type
    /// documented for `ident`.
    pub unsafe fn get(&self, ident: &str, blob: *mut c_void) -> Result<(), ParamError> {
        let c_ident = CString::new(ident).map_err(|_| ParamError::unknown(ident))?;
        status_to_result(ident, unsafe { (self.get)(self.instance, c_ident.as_ptr(), blob) })
    }

    /// # Safety
    ///
    /// The instance must be alive and `blob` must hold a value of the type
    /// documented for `ident`.
    pub unsafe fn set(&self, ident: &str, blob: *const c_void) -> Result<(), ParamError> {
        let c_ident = CString::new(ident).map_err(|_| ParamError::unknown(ident))?;
        status_to_result(ident, unsafe { (self.set)(self.instance, c_ident.as_ptr(), blob) })
    }

    /// Read a parameter as `V`.
    ///
    /// # Safety
    ///
    /// `V` must be exactly the type documented for `ident`; no check is
    /// possible across the boundary.
    pub unsafe fn get_value<V>(&self, ident: &str) -> Result<V, ParamError> {
        let mut slot = MaybeUninit::<V>::uninit();
        unsafe {
            self.get(ident, slot.as_mut_ptr().cast())?;
            Ok(slot.assume_init())
        }
    }

    /// Write a parameter as `V`.
    ///
    /// # Safety
    ///
    /// Same contract as [`get_value`](Self::get_value).
    pub unsafe fn set_value<V>(&self, ident: &str, value: V) -> Result<(), ParamError> {
        unsafe { self.set(ident, (&value as *const V).cast()) }
    }

    /// # Safety
    ///
    /// The instance behind the handle must still be alive.
    pub unsafe fn get_api_ptr(&self, api: &str) -> Option<*mut c_void> {
        let c_api = CString::new(api).ok()?;
        let ptr = unsafe { (self.get_api_ptr)(self.instance, c_api.as_ptr()) };
        (!ptr.is_null()).then_some(ptr)
    }
}

unsafe fn collect_idents(report: ReportFn, instance: *mut c_void) -> Vec<String> {
    let mut idents: *const *const c_char = std::ptr::null();
    let count = unsafe { report(instance, &mut idents) };
    if idents.is_null() || count <= 0 {
        return Vec::new();
    }
    let idents = unsafe { std::slice::from_raw_parts(idents, count as usize) };
    idents
        .iter()
        .filter(|ident| !ident.is_null())
        .map(|&ident| unsafe { CStr::from_ptr(ident) }.to_string_lossy().into_owned())
        .collect()
}

fn status_to_result(ident: &str, status: i32) -> Result<(), ParamError> {
    match status {
        STATUS_OK => Ok(()),
        PARAM_NULL_BLOB => Err(ParamError::NullBlob(ident.to_string())),
        _ => Err(ParamError::unknown(ident)),
    }
}

fn error_to_status(err: &ParamError) -> i32 {
    match err {
        ParamError::NullBlob(_) => PARAM_NULL_BLOB,
        _ => PARAM_UNKNOWN,
    }
}

unsafe fn c_ident<'a>(ident: *const c_char) -> Option<&'a str> {
    if ident.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ident) }.to_str().ok()
}

unsafe extern "C" fn report_thunk<M>(
    instance: *mut c_void,
    idents: *mut *const *const c_char,
) -> i32 {
    let this = unsafe { &*instance.cast::<Parameterized<M>>() };
    unsafe { publish_idents(this.params().c_params(), idents) }
}

unsafe extern "C" fn apis_thunk<M>(
    instance: *mut c_void,
    idents: *mut *const *const c_char,
) -> i32 {
    let this = unsafe { &*instance.cast::<Parameterized<M>>() };
    unsafe { publish_idents(this.params().c_apis(), idents) }
}

unsafe fn publish_idents(ptrs: &[*const c_char], idents: *mut *const *const c_char) -> i32 {
    if !idents.is_null() {
        unsafe { *idents = ptrs.as_ptr() };
    }
    i32::try_from(ptrs.len()).unwrap_or(i32::MAX)
}

unsafe extern "C" fn get_thunk<M>(
    instance: *mut c_void,
    ident: *const c_char,
    blob: *mut c_void,
) -> i32 {
    let Some(ident) = (unsafe { c_ident(ident) }) else {
        return PARAM_UNKNOWN;
    };
    let this = unsafe { &*instance.cast::<Parameterized<M>>() };
    match unsafe { ParamBe::get(this, ident, blob) } {
        Ok(()) => STATUS_OK,
        Err(err) => error_to_status(&err),
    }
}

unsafe extern "C" fn set_thunk<M>(
    instance: *mut c_void,
    ident: *const c_char,
    blob: *const c_void,
) -> i32 {
    let Some(ident) = (unsafe { c_ident(ident) }) else {
        return PARAM_UNKNOWN;
    };
    let this = unsafe { &mut *instance.cast::<Parameterized<M>>() };
    match unsafe { ParamBe::set(this, ident, blob) } {
        Ok(()) => STATUS_OK,
        Err(err) => error_to_status(&err),
    }
}

unsafe extern "C" fn api_ptr_thunk<M>(instance: *mut c_void, api: *const c_char) -> *mut c_void {
    let Some(api) = (unsafe { c_ident(api) }) else {
        return std::ptr::null_mut();
    };
    let this = unsafe { &*instance.cast::<Parameterized<M>>() };
    this.get_api_ptr(api).unwrap_or(std::ptr::null_mut())
}
