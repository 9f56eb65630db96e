//! Hello Capability - a simple example plugin for capsule
//!
//! This plugin demonstrates:
//! - Exporting the init function with the `export_plugin!` macro
//! - Registering a named capability (`Greeter`) and a wildcard (`*`)
//! - Objects that expose named parameters through a `ParamBeHandle`
//!
//! Every object starts with a [`ParamBeHandle`], so a host can call
//! `PluginObject::param_handle` on it. Parameters:
//!
//! | identifier | type     |
//! |------------|----------|
//! | `greeting` | `String` |
//! | `repeat`   | `u32`    |
//! | `loud`     | `bool`   |
//!
//! ## Building
//!
//! ```bash
//! cargo build --release
//! ```
//!
//! ## Installing
//!
//! ```bash
//! mkdir -p ~/.config/capsule/plugins
//! cp target/release/libhello_capability.so ~/.config/capsule/plugins/
//! ```

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

use capsule_abi::{
    ApiVersion, ExitFunc, ObjectParams, ParamBackEnd, ParamBeHandle, ParamError, Parameterized,
    PlatformServices, PluginLang, RegisterParams, STATUS_OK, WILDCARD_API, export_plugin,
};

/// Version of the `Greeter` capability contract
pub const GREETER_VERSION: ApiVersion = ApiVersion::new(1, 0);

/// Objects created and not yet destroyed; handed to the manager as control state
static LIVE_GREETERS: AtomicUsize = AtomicUsize::new(0);

/// State behind one greeter object
#[derive(Debug, Clone, PartialEq)]
pub struct Greeter {
    /// Capability the object was requested as
    pub subject: String,
    pub greeting: String,
    pub repeat: u32,
    pub loud: bool,
}

impl Greeter {
    fn new(subject: &str) -> Self {
        Self {
            subject: subject.to_string(),
            greeting: "Hello".to_string(),
            repeat: 1,
            loud: false,
        }
    }

    pub fn greet(&self) -> String {
        let line = format!("{}, {}!", self.greeting, self.subject);
        let line = if self.loud { line.to_uppercase() } else { line };
        vec![line; self.repeat as usize].join(" ")
    }
}

fn params() -> Result<ParamBackEnd<Greeter>, ParamError> {
    ParamBackEnd::new()
        .with_param(
            "greeting",
            |g: &Greeter| g.greeting.clone(),
            |g: &mut Greeter, v: String| g.greeting = v,
        )?
        .with_param("repeat", |g: &Greeter| g.repeat, |g: &mut Greeter, v: u32| g.repeat = v)?
        .with_param("loud", |g: &Greeter| g.loud, |g: &mut Greeter, v: bool| g.loud = v)
}

/// What a host receives from the factory
#[repr(C)]
pub struct GreeterObject {
    /// Must stay the first field
    pub handle: ParamBeHandle,
    state: Box<Parameterized<Greeter>>,
}

impl GreeterObject {
    fn new(subject: &str) -> Result<Box<Self>, ParamError> {
        let mut state = Box::new(Parameterized::new(Greeter::new(subject), params()?));
        let greeter: *mut Greeter = state.value_mut();
        state.params_mut().add_api_id("Greeter", greeter.cast())?;
        let handle = ParamBeHandle::new(&mut *state);
        Ok(Box::new(Self { handle, state }))
    }

    pub fn greeter(&self) -> &Greeter {
        self.state.value()
    }
}

unsafe extern "C" fn create(params: *const ObjectParams) -> *mut c_void {
    let Some(params) = (unsafe { params.as_ref() }) else {
        return std::ptr::null_mut();
    };
    let Some(subject) = (unsafe { params.api_str() }) else {
        return std::ptr::null_mut();
    };

    let object = match GreeterObject::new(subject) {
        Ok(object) => object,
        Err(e) => {
            tracing::error!(subject = %subject, error = %e, "Greeter parameters rejected");
            return std::ptr::null_mut();
        }
    };

    if let Some(live) = unsafe { params.ctrl_obj.cast::<AtomicUsize>().as_ref() } {
        live.fetch_add(1, Ordering::SeqCst);
    }
    tracing::debug!(subject = %subject, "Greeter created");
    Box::into_raw(object).cast()
}

unsafe extern "C" fn destroy(object: *mut c_void, params: *const ObjectParams) -> i32 {
    if object.is_null() {
        return -1;
    }
    drop(unsafe { Box::from_raw(object.cast::<GreeterObject>()) });

    let live = unsafe { params.as_ref() }
        .and_then(|params| unsafe { params.ctrl_obj.cast::<AtomicUsize>().as_ref() });
    if let Some(live) = live {
        live.fetch_sub(1, Ordering::SeqCst);
    }
    STATUS_OK
}

unsafe extern "C" fn exit(_services: *const PlatformServices) -> i32 {
    tracing::info!(live = LIVE_GREETERS.load(Ordering::SeqCst), "Hello capability exiting");
    STATUS_OK
}

unsafe extern "C" fn init(services: *mut PlatformServices) -> Option<ExitFunc> {
    let services = unsafe { services.as_ref()? };
    let registration = RegisterParams {
        version: GREETER_VERSION,
        plugin_id: services.plugin_id,
        lang: PluginLang::RUST,
        ctrl_obj: (&LIVE_GREETERS as *const AtomicUsize).cast_mut().cast(),
        create: Some(create),
        destroy: Some(destroy),
    };

    if let Err(e) = unsafe { services.register_capability("Greeter", &registration) } {
        tracing::error!(error = %e, "Greeter registration failed");
        return None;
    }
    // Another plugin may already own the wildcard
    if let Err(e) = unsafe { services.register_capability(WILDCARD_API, &registration) } {
        tracing::warn!(error = %e, "Wildcard registration failed");
    }
    Some(exit)
}

export_plugin!(init);
