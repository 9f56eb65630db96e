//! Services block and the manager-side callbacks plugins call into
//!
//! Every library gets its own boxed [`RegistrationContext`]. The address of
//! that box is the library's [`PluginUniqueId`], so the registration callback
//! can find the right registry. The only process-wide state is the set of
//! context addresses currently issued, checked before an id is dereferenced.

use std::collections::BTreeSet;
use std::ffi::{CStr, CString, c_char, c_void};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use capsule_abi::{
    ApiVersion, PlatformServices, PluginUniqueId, RegisterParams, RegisterStatus,
    STATUS_UNIMPLEMENTED,
};

use crate::error::RegistrationError;
use crate::registry::{CapabilityRegistry, PluginId};

pub(crate) type SharedRegistry = Arc<Mutex<CapabilityRegistry>>;

/// Lock the registry, recovering from a poisoned lock.
///
/// The registry is only mutated by whole-entry inserts and removals, so a
/// panic while the lock was held cannot leave it half-updated.
pub(crate) fn lock(registry: &SharedRegistry) -> MutexGuard<'_, CapabilityRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Addresses of every live [`RegistrationContext`]
static ISSUED_CONTEXTS: Mutex<BTreeSet<usize>> = Mutex::new(BTreeSet::new());

fn issued_contexts() -> MutexGuard<'static, BTreeSet<usize>> {
    ISSUED_CONTEXTS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-library state reachable from the plugin through its unique id
#[derive(Debug)]
pub(crate) struct RegistrationContext {
    plugin: PluginId,
    name: String,
    registry: SharedRegistry,
    accepting: AtomicBool,
}

impl RegistrationContext {
    pub(crate) fn new(plugin: PluginId, name: &str, registry: SharedRegistry) -> Box<Self> {
        let context = Box::new(Self {
            plugin,
            name: name.to_string(),
            registry,
            accepting: AtomicBool::new(true),
        });
        issued_contexts().insert(context.address());
        context
    }

    fn address(&self) -> usize {
        (self as *const Self).addr()
    }

    pub(crate) fn unique_id(&self) -> PluginUniqueId {
        PluginUniqueId::from_ptr((self as *const Self).cast_mut().cast())
    }

    /// Refuse any further registrations from this library
    pub(crate) fn close(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    fn register(&self, api: &str, params: &RegisterParams) -> Result<(), RegistrationError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(RegistrationError::UnknownPlugin);
        }
        lock(&self.registry).register(api, self.plugin, params)
    }
}

impl Drop for RegistrationContext {
    fn drop(&mut self) {
        issued_contexts().remove(&self.address());
    }
}

/// Services block plus the storage it points into.
///
/// Boxed so the block keeps its address for the library's whole lifetime.
#[derive(Debug)]
pub(crate) struct ServicesBlock {
    services: Box<PlatformServices>,
    _plugin_dir: CString,
}

impl ServicesBlock {
    pub(crate) fn new(
        version: ApiVersion,
        plugin_dir: &str,
        context: &RegistrationContext,
    ) -> Self {
        let plugin_dir = CString::new(plugin_dir).unwrap_or_default();
        let services = Box::new(PlatformServices {
            version,
            default_plugin_dir: plugin_dir.as_ptr(),
            plugin_id: context.unique_id(),
            ctrl_obj: std::ptr::null_mut(),
            register_object: Some(register_object),
            invoke_service: Some(invoke_service),
        });
        Self {
            services,
            _plugin_dir: plugin_dir,
        }
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut PlatformServices {
        &mut *self.services
    }

    pub(crate) fn as_ptr(&self) -> *const PlatformServices {
        &*self.services
    }
}

/// Registration callback handed to every plugin
pub(crate) unsafe extern "C" fn register_object(
    api: *const c_char,
    params: *const RegisterParams,
) -> i32 {
    let Some(params) = (unsafe { params.as_ref() }) else {
        tracing::warn!("Registration without parameters rejected");
        return RegisterStatus::Malformed.code();
    };
    if params.plugin_id.is_null() {
        tracing::warn!("Registration without plugin id rejected");
        return RegistrationError::UnknownPlugin.status().code();
    }
    // Held until the registration finishes so the context cannot be dropped
    // underneath it.
    let issued = issued_contexts();
    let context_ptr = params.plugin_id.as_ptr().cast::<RegistrationContext>();
    if !issued.contains(&context_ptr.addr()) {
        tracing::warn!("Registration with unknown plugin id rejected");
        return RegistrationError::UnknownPlugin.status().code();
    }
    // SAFETY: the address is in the issued set, so it is a live context.
    let context = unsafe { &*context_ptr };

    let api = if api.is_null() {
        None
    } else {
        unsafe { CStr::from_ptr(api) }.to_str().ok()
    };
    let Some(api) = api else {
        tracing::warn!(plugin = %context.name, "Registration with invalid identifier rejected");
        return RegisterStatus::Malformed.code();
    };

    match context.register(api, params) {
        Ok(()) => {
            tracing::info!(
                plugin = %context.name,
                api = %api,
                version = %params.version,
                lang = %params.lang,
                "Capability registered"
            );
            RegisterStatus::Ok.code()
        }
        Err(e) => {
            tracing::warn!(plugin = %context.name, api = %api, error = %e, "Registration rejected");
            e.status().code()
        }
    }
}

/// Service-invocation callback; no services exist yet
pub(crate) unsafe extern "C" fn invoke_service(
    service: *const c_char,
    _service_params: *mut c_void,
) -> i32 {
    if !service.is_null() {
        let service = unsafe { CStr::from_ptr(service) }.to_string_lossy();
        tracing::debug!(service = %service, "Service invocation not implemented");
    }
    STATUS_UNIMPLEMENTED
}
