//! `#[repr(C)]` types exchanged between the plugin manager and plugin libraries
//!
//! Nothing in this module may change layout without bumping
//! [`MANAGER_API_VERSION`](crate::MANAGER_API_VERSION).

use serde::{Deserialize, Serialize};
use std::ffi::{CStr, CString, c_char, c_void};
use std::fmt;
use std::path::PathBuf;

use crate::error::PluginError;

// ─── Status codes ────────────────────────────────────────────────────

/// Success status for every integer-returning contract function.
pub const STATUS_OK: i32 = 0;

/// Registration rejected: major version differs from the manager's expectation.
pub const REGISTER_VERSION_MISMATCH: i32 = -1;

/// Registration rejected: the capability identifier is already registered.
pub const REGISTER_DUPLICATE: i32 = -2;

/// Registration rejected: null/invalid identifier, missing factory or
/// destructor, or an unknown plugin id.
pub const REGISTER_MALFORMED: i32 = -3;

/// Returned by the service-invocation callback, which has no services yet.
pub const STATUS_UNIMPLEMENTED: i32 = -4;

/// Outcome of a registration call, as seen from the plugin side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterStatus {
    Ok,
    VersionMismatch,
    Duplicate,
    Malformed,
}

impl RegisterStatus {
    /// Integer code returned across the C boundary
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => STATUS_OK,
            Self::VersionMismatch => REGISTER_VERSION_MISMATCH,
            Self::Duplicate => REGISTER_DUPLICATE,
            Self::Malformed => REGISTER_MALFORMED,
        }
    }

    /// Decode a status returned by a registration callback.
    ///
    /// Any unknown negative value is treated as malformed; any non-negative
    /// value is success.
    pub fn from_code(code: i32) -> Self {
        match code {
            c if c >= 0 => Self::Ok,
            REGISTER_VERSION_MISMATCH => Self::VersionMismatch,
            REGISTER_DUPLICATE => Self::Duplicate,
            _ => Self::Malformed,
        }
    }
}

// ─── Versions and identity ───────────────────────────────────────────

/// Version of the manager API, or of a capability contract.
///
/// Only `major` takes part in compatibility checks.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiVersion {
    pub major: i32,
    pub minor: i32,
}

impl ApiVersion {
    pub const fn new(major: i32, minor: i32) -> Self {
        Self { major, minor }
    }

    /// True when `self` can be accepted where `expected` is required.
    pub fn is_compatible_with(&self, expected: &ApiVersion) -> bool {
        self.major == expected.major
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Implementation language tag carried in a registration.
///
/// Kept as a plain integer so that a plugin passing a value this build does
/// not know about cannot produce an invalid enum.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginLang(pub i32);

impl PluginLang {
    pub const C: PluginLang = PluginLang(0);
    pub const CPP: PluginLang = PluginLang(1);
    pub const RUST: PluginLang = PluginLang(2);
}

impl fmt::Display for PluginLang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::C => f.write_str("C"),
            Self::CPP => f.write_str("C++"),
            Self::RUST => f.write_str("Rust"),
            PluginLang(other) => write!(f, "unknown({other})"),
        }
    }
}

/// Opaque token the manager assigns to a plugin library at load time.
///
/// The plugin must hand it back unchanged in every [`RegisterParams`].
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginUniqueId(*mut c_void);

impl PluginUniqueId {
    pub const NULL: PluginUniqueId = PluginUniqueId(std::ptr::null_mut());

    pub fn from_ptr(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

// ─── Function signatures ─────────────────────────────────────────────

/// Object factory implemented by the plugin. Null means failure.
pub type CreateFunc = unsafe extern "C" fn(params: *const ObjectParams) -> *mut c_void;

/// Object destructor implemented by the plugin. Returns 0 on success.
pub type DestroyFunc = unsafe extern "C" fn(object: *mut c_void, params: *const ObjectParams) -> i32;

/// Registration callback implemented by the manager.
pub type RegisterFunc =
    unsafe extern "C" fn(api: *const c_char, params: *const RegisterParams) -> i32;

/// Service-invocation callback implemented by the manager (reserved).
pub type InvokeServiceFunc =
    unsafe extern "C" fn(service: *const c_char, service_params: *mut c_void) -> i32;

/// Exit function returned by the plugin's init entry point.
pub type ExitFunc = unsafe extern "C" fn(services: *const PlatformServices) -> i32;

/// Init entry point exported by every plugin library.
///
/// Returns the exit function, or `None` if initialisation failed. A plugin
/// that fails must already have released whatever it acquired.
pub type InitFunc = unsafe extern "C" fn(services: *mut PlatformServices) -> Option<ExitFunc>;

// ─── Parameter blocks ────────────────────────────────────────────────

/// What a plugin supplies when registering one capability.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RegisterParams {
    /// Version of the capability contract the plugin implements
    pub version: ApiVersion,
    /// The id handed to the plugin in [`PlatformServices::plugin_id`]
    pub plugin_id: PluginUniqueId,
    pub lang: PluginLang,
    /// Per-capability control state, returned in every [`ObjectParams`]
    pub ctrl_obj: *mut c_void,
    pub create: Option<CreateFunc>,
    pub destroy: Option<DestroyFunc>,
}

/// What the manager passes to a plugin's factory and destructor.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ObjectParams {
    /// The identifier the client asked for (not `"*"` for wildcard dispatch)
    pub api: *const c_char,
    pub platform_services: *const PlatformServices,
    /// The control state supplied at registration
    pub ctrl_obj: *mut c_void,
}

impl ObjectParams {
    /// The requested capability identifier.
    ///
    /// # Safety
    ///
    /// `self.api` must be null or point at a NUL-terminated string that
    /// outlives the returned reference. The manager guarantees this for the
    /// duration of a factory or destructor call.
    pub unsafe fn api_str(&self) -> Option<&str> {
        if self.api.is_null() {
            return None;
        }
        unsafe { CStr::from_ptr(self.api) }.to_str().ok()
    }
}

/// Services block handed to a plugin library at initialisation.
///
/// The block stays at a fixed address until the library is unloaded, so a
/// plugin may keep the pointer it receives.
#[repr(C)]
#[derive(Debug)]
pub struct PlatformServices {
    /// Manager API version
    pub version: ApiVersion,
    /// Default plugin search directory (NUL-terminated)
    pub default_plugin_dir: *const c_char,
    /// Unique id assigned to this library
    pub plugin_id: PluginUniqueId,
    /// Library-wide control state; the plugin may set this during init
    pub ctrl_obj: *mut c_void,
    pub register_object: Option<RegisterFunc>,
    /// Reserved; currently always answers [`STATUS_UNIMPLEMENTED`]
    pub invoke_service: Option<InvokeServiceFunc>,
}

impl PlatformServices {
    /// Register one capability through the manager's callback.
    ///
    /// Returns the raw status; decode with [`RegisterStatus::from_code`].
    ///
    /// # Safety
    ///
    /// `self` must be a services block handed out by a live manager.
    pub unsafe fn register(&self, api: &CStr, params: &RegisterParams) -> i32 {
        match self.register_object {
            Some(register) => unsafe { register(api.as_ptr(), params) },
            None => REGISTER_MALFORMED,
        }
    }

    /// [`register`](Self::register) for Rust plugins, with the status decoded.
    ///
    /// # Safety
    ///
    /// Same as [`PlatformServices::register`].
    pub unsafe fn register_capability(
        &self,
        api: &str,
        params: &RegisterParams,
    ) -> Result<(), PluginError> {
        let c_api = CString::new(api).map_err(|_| PluginError::InvalidIdentifier(api.to_string()))?;
        match RegisterStatus::from_code(unsafe { self.register(&c_api, params) }) {
            RegisterStatus::Ok => Ok(()),
            status => Err(PluginError::Rejected {
                api: api.to_string(),
                status,
            }),
        }
    }

    /// Invoke a manager service by name.
    ///
    /// # Safety
    ///
    /// Same as [`PlatformServices::register`]; `service_params` is passed
    /// through untouched.
    pub unsafe fn invoke(&self, service: &CStr, service_params: *mut c_void) -> i32 {
        match self.invoke_service {
            Some(invoke) => unsafe { invoke(service.as_ptr(), service_params) },
            None => STATUS_UNIMPLEMENTED,
        }
    }

    /// Default plugin directory, if the manager supplied a valid one.
    ///
    /// # Safety
    ///
    /// `default_plugin_dir` must be null or a valid NUL-terminated string.
    pub unsafe fn default_plugin_dir(&self) -> Option<PathBuf> {
        if self.default_plugin_dir.is_null() {
            return None;
        }
        let dir = unsafe { CStr::from_ptr(self.default_plugin_dir) };
        dir.to_str().ok().map(PathBuf::from)
    }
}
