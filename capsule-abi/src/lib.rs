//! capsule-abi - C-linkage contract between the capsule plugin manager and
//! plugin libraries
//!
//! A plugin is a shared library exporting one init function. The manager
//! calls it with a [`PlatformServices`] block; the plugin registers each
//! capability it provides through the block's callback and returns its exit
//! function. Objects are created and destroyed through the factory and
//! destructor supplied at registration, always as opaque pointers.
//!
//! Objects that expose named parameters wrap their state in a
//! [`Parameterized`] and hand out a [`ParamBeHandle`].
//!
//! # Example
//!
//! ```ignore
//! use std::ffi::c_void;
//! use capsule_abi::{
//!     ApiVersion, ExitFunc, ObjectParams, PlatformServices, PluginLang, RegisterParams,
//!     export_plugin,
//! };
//!
//! unsafe extern "C" fn create(_params: *const ObjectParams) -> *mut c_void { /* ... */ }
//! unsafe extern "C" fn destroy(_obj: *mut c_void, _params: *const ObjectParams) -> i32 { 0 }
//! unsafe extern "C" fn exit(_services: *const PlatformServices) -> i32 { 0 }
//!
//! unsafe extern "C" fn init(services: *mut PlatformServices) -> Option<ExitFunc> {
//!     let services = unsafe { services.as_ref()? };
//!     let params = RegisterParams {
//!         version: ApiVersion::new(1, 0),
//!         plugin_id: services.plugin_id,
//!         lang: PluginLang::RUST,
//!         ctrl_obj: std::ptr::null_mut(),
//!         create: Some(create),
//!         destroy: Some(destroy),
//!     };
//!     unsafe { services.register_capability("Greeter", &params) }.ok()?;
//!     Some(exit)
//! }
//!
//! export_plugin!(init);
//! ```

pub mod error;
pub mod handle;
pub mod params;
pub mod types;

pub use error::{ParamError, PluginError};
pub use handle::ParamBeHandle;
pub use params::{ParamBackEnd, ParamBe, ParamEntry, Parameterized};
pub use types::*;

/// Manager API version handed to every plugin in [`PlatformServices::version`].
///
/// A capability registered without a per-identifier override must match its
/// major number.
pub const MANAGER_API_VERSION: ApiVersion = ApiVersion::new(1, 0);

/// Name of the init function every plugin library exports
pub const INIT_SYMBOL: &str = "capsule_init_plugin";

/// Capability identifier that catches requests nothing else registered
pub const WILDCARD_API: &str = "*";

/// Export a plugin init function under [`INIT_SYMBOL`].
///
/// The function must have the [`InitFunc`] signature.
///
/// # Usage
///
/// ```ignore
/// capsule_abi::export_plugin!(my_init);
/// ```
///
/// # Generated Functions
///
/// - `capsule_init_plugin(services)`: forwards to the given init function
#[macro_export]
macro_rules! export_plugin {
    ($init:path) => {
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn capsule_init_plugin(
            services: *mut $crate::PlatformServices,
        ) -> Option<$crate::ExitFunc> {
            let init: $crate::InitFunc = $init;
            unsafe { init(services) }
        }
    };
}
