//! PluginManager - drives each library through its lifecycle and dispatches
//! capability requests to the registered factories

use std::ffi::{CString, c_void};
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use capsule_abi::{ExitFunc, InitFunc, ObjectParams, ParamBeHandle, STATUS_OK};

use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::library::DynamicLibrary;
use crate::registry::{CapabilityRegistry, PluginId};
use crate::services::{RegistrationContext, ServicesBlock, SharedRegistry, lock};

/// Lifecycle state of a plugin library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryState {
    Unloaded,
    /// Image mapped, init not yet run
    Loaded,
    /// Init returned an exit function
    Initialized,
    /// Registrations made during init are visible
    Active,
    ShuttingDown,
}

impl fmt::Display for LibraryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Initialized => "initialized",
            Self::Active => "active",
            Self::ShuttingDown => "shutting down",
        };
        f.write_str(s)
    }
}

/// Information about a loaded library
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryInfo {
    pub id: PluginId,
    pub name: String,
    /// `None` for plugins linked into the host
    pub path: Option<PathBuf>,
    pub state: LibraryState,
    /// Capabilities registered by the library, sorted
    pub capabilities: Vec<String>,
    /// Objects created and not yet destroyed
    pub live_objects: usize,
}

/// An object created by a plugin factory.
///
/// The pointer is opaque to the manager. Hand the object back to
/// [`PluginManager::destroy`]; dropping it leaks the object and keeps its
/// library busy.
#[must_use = "plugin objects must be handed back to PluginManager::destroy"]
#[derive(Debug)]
pub struct PluginObject {
    ptr: NonNull<c_void>,
    api: String,
    registration: String,
    owner: PluginId,
}

impl PluginObject {
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    /// Capability identifier the object was requested as
    pub fn api(&self) -> &str {
        &self.api
    }

    pub fn owner(&self) -> PluginId {
        self.owner
    }

    /// True when the object came from the wildcard registration
    pub fn via_wildcard(&self) -> bool {
        self.registration != self.api
    }

    /// View the object as a parameter back-end handle.
    ///
    /// # Safety
    ///
    /// The capability's contract must state that its objects begin with a
    /// [`ParamBeHandle`].
    pub unsafe fn param_handle(&self) -> &ParamBeHandle {
        unsafe { &*self.ptr.as_ptr().cast::<ParamBeHandle>() }
    }
}

/// A library (or in-process plugin) with its runtime state
#[derive(Debug)]
struct LoadedLibrary {
    id: PluginId,
    name: String,
    path: Option<PathBuf>,
    state: LibraryState,
    exit: Option<ExitFunc>,
    live_objects: usize,
    // Drop order matters: the image goes last.
    services: ServicesBlock,
    context: Box<RegistrationContext>,
    /// Keeps the image mapped; `None` for in-process plugins
    _library: Option<DynamicLibrary>,
}

impl LoadedLibrary {
    fn transition(&mut self, to: LibraryState) {
        tracing::debug!(plugin = %self.name, from = %self.state, to = %to, "Library state change");
        self.state = to;
    }
}

/// Loads plugin libraries, runs their init and exit functions, and creates
/// and destroys capability objects on behalf of the host.
///
/// Owns the [`CapabilityRegistry`]; plugins reach it only through the
/// registration callback in their services block.
pub struct PluginManager {
    config: ManagerConfig,
    registry: SharedRegistry,
    /// In load order
    libraries: Vec<LoadedLibrary>,
    next_id: u64,
}

impl PluginManager {
    pub fn new(config: ManagerConfig) -> Self {
        let registry = CapabilityRegistry::new(config.api_version, config.expected_versions.clone());
        Self {
            config,
            registry: Arc::new(Mutex::new(registry)),
            libraries: Vec::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Load the library at `path` and run its init function.
    ///
    /// Loading a path that is already loaded returns the existing id.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<PluginId, ManagerError> {
        let path = path.as_ref();
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if let Some(existing) = self
            .libraries
            .iter()
            .find(|lib| lib.path.as_ref() == Some(&canonical))
        {
            tracing::warn!(plugin = %existing.name, path = %path.display(), "Library already loaded");
            return Ok(existing.id);
        }

        let library = DynamicLibrary::load(path).inspect_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to load library");
        })?;

        // SAFETY: the init export is documented to have the InitFunc signature.
        let init = unsafe { library.resolve::<InitFunc>(&self.config.init_symbol) }.inspect_err(
            |e| tracing::error!(path = %path.display(), error = %e, "Library has no init function"),
        )?;

        self.initialize(library_name(path), Some(canonical), Some(library), init)
    }

    /// Load a plugin by name from the default plugin directory
    pub fn load_by_name(&mut self, name: &str) -> Result<PluginId, ManagerError> {
        let dir = &self.config.default_plugin_dir;
        let path = capsule_paths::library_file_names(name)
            .into_iter()
            .map(|file| dir.join(file))
            .find(|path| path.exists())
            .ok_or_else(|| ManagerError::LibraryNotFound {
                name: name.to_string(),
                dir: dir.clone(),
            })?;
        self.load(path)
    }

    /// Load every plugin listed in the config's `autoload`.
    ///
    /// Failures are logged and skipped; returns the ids that loaded.
    pub fn load_configured(&mut self) -> Vec<PluginId> {
        let names = self.config.autoload.clone();
        names
            .iter()
            .filter_map(|name| match self.load_by_name(name) {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::error!(plugin = %name, error = %e, "Failed to load configured plugin");
                    None
                }
            })
            .collect()
    }

    /// Run the plugin protocol against an init function linked into the host
    pub fn register_static(&mut self, name: &str, init: InitFunc) -> Result<PluginId, ManagerError> {
        self.initialize(name.to_string(), None, None, init)
    }

    fn initialize(
        &mut self,
        name: String,
        path: Option<PathBuf>,
        library: Option<DynamicLibrary>,
        init: InitFunc,
    ) -> Result<PluginId, ManagerError> {
        let id = PluginId(self.next_id);
        self.next_id += 1;

        let context = RegistrationContext::new(id, &name, self.registry.clone());
        let plugin_dir = self.config.default_plugin_dir.to_string_lossy();
        let services = ServicesBlock::new(self.config.api_version, &plugin_dir, &context);
        let mut lib = LoadedLibrary {
            id,
            name,
            path,
            state: LibraryState::Loaded,
            exit: None,
            live_objects: 0,
            services,
            context,
            _library: library,
        };

        // SAFETY: init has the InitFunc signature and the services block stays
        // at its address until the library is dropped.
        let Some(exit) = (unsafe { init(lib.services.as_mut_ptr()) }) else {
            lib.context.close();
            let discarded = lock(&self.registry).remove_owner(id);
            tracing::error!(
                plugin = %lib.name,
                discarded = ?discarded,
                "Plugin init returned no exit function"
            );
            lib.transition(LibraryState::Unloaded);
            return Err(ManagerError::InitFailed { name: lib.name });
        };

        lib.exit = Some(exit);
        lib.transition(LibraryState::Initialized);
        let capabilities = lock(&self.registry).owned_by(id);
        lib.transition(LibraryState::Active);
        tracing::info!(
            plugin = %lib.name,
            id = %id,
            capabilities = ?capabilities,
            "Plugin loaded"
        );
        self.libraries.push(lib);
        Ok(id)
    }

    /// Run the library's exit function, drop its capabilities and unmap it.
    ///
    /// Refused while objects it created are still alive.
    pub fn unload(&mut self, id: PluginId) -> Result<(), ManagerError> {
        let index = self.index_of(id)?;
        let lib = &self.libraries[index];
        if lib.live_objects > 0 {
            return Err(ManagerError::LibraryBusy {
                name: lib.name.clone(),
                live: lib.live_objects,
            });
        }
        let lib = self.libraries.remove(index);
        self.shutdown_library(lib);
        Ok(())
    }

    /// Unload every library in reverse load order, live objects or not
    pub fn shutdown(&mut self) {
        while let Some(lib) = self.libraries.pop() {
            if lib.live_objects > 0 {
                tracing::warn!(
                    plugin = %lib.name,
                    live = lib.live_objects,
                    "Unloading plugin with live objects"
                );
            }
            self.shutdown_library(lib);
        }
    }

    fn shutdown_library(&self, mut lib: LoadedLibrary) {
        lib.transition(LibraryState::ShuttingDown);
        lib.context.close();

        if let Some(exit) = lib.exit.take() {
            // SAFETY: exit came from this library's init and the image is
            // still mapped.
            let status = unsafe { exit(lib.services.as_ptr()) };
            if status != STATUS_OK {
                tracing::warn!(plugin = %lib.name, status, "Plugin exit function failed");
            }
        }

        let removed = lock(&self.registry).remove_owner(lib.id);
        lib.transition(LibraryState::Unloaded);
        tracing::info!(plugin = %lib.name, id = %lib.id, removed = ?removed, "Plugin unloaded");
    }

    /// Create an object for capability `api`.
    ///
    /// Falls back to the wildcard registration when `api` itself is not
    /// registered; the factory then sees the requested identifier.
    pub fn create(&mut self, api: &str) -> Result<PluginObject, ManagerError> {
        let unavailable = || ManagerError::CapabilityUnavailable {
            api: api.to_string(),
        };

        let (registration, owner, create, ctrl_obj) = {
            let registry = lock(&self.registry);
            let entry = registry.resolve(api).ok_or_else(unavailable)?;
            (entry.api.clone(), entry.owner, entry.create, entry.ctrl_obj)
        };
        if registration != api {
            tracing::debug!(api = %api, via = %registration, "Falling back to wildcard capability");
        }

        let c_api = CString::new(api).map_err(|_| unavailable())?;
        let index = self.index_of(owner)?;
        let lib = &mut self.libraries[index];
        let params = ObjectParams {
            api: c_api.as_ptr(),
            platform_services: lib.services.as_ptr(),
            ctrl_obj,
        };

        // SAFETY: the factory belongs to a library that is still mapped.
        let ptr = unsafe { create(&params) };
        let ptr = NonNull::new(ptr).ok_or_else(|| ManagerError::CreateFailed {
            api: api.to_string(),
        })?;

        lib.live_objects += 1;
        tracing::debug!(api = %api, plugin = %lib.name, "Object created");
        Ok(PluginObject {
            ptr,
            api: api.to_string(),
            registration,
            owner,
        })
    }

    /// Hand an object back to the destructor of the registration that made it
    pub fn destroy(&mut self, object: PluginObject) -> Result<(), ManagerError> {
        let found = lock(&self.registry)
            .get(&object.registration)
            .filter(|entry| entry.owner == object.owner)
            .map(|entry| (entry.destroy, entry.ctrl_obj));
        let Some((destroy, ctrl_obj)) = found else {
            tracing::warn!(api = %object.api, "No destructor registered for object");
            return Err(ManagerError::CapabilityUnavailable { api: object.api });
        };

        let c_api = CString::new(object.api.as_str()).map_err(|_| {
            ManagerError::CapabilityUnavailable {
                api: object.api.clone(),
            }
        })?;
        let index = self.index_of(object.owner)?;
        let lib = &mut self.libraries[index];
        let params = ObjectParams {
            api: c_api.as_ptr(),
            platform_services: lib.services.as_ptr(),
            ctrl_obj,
        };

        // SAFETY: the object came from the matching factory of a library that
        // is still mapped.
        let status = unsafe { destroy(object.as_ptr(), &params) };
        lib.live_objects = lib.live_objects.saturating_sub(1);

        if status != STATUS_OK {
            tracing::warn!(api = %object.api, plugin = %lib.name, status, "Plugin destructor failed");
            return Err(ManagerError::DestroyFailed {
                api: object.api,
                status,
            });
        }
        tracing::debug!(api = %object.api, plugin = %lib.name, "Object destroyed");
        Ok(())
    }

    /// Information about every loaded library, in load order
    pub fn list_libraries(&self) -> Vec<LibraryInfo> {
        let registry = lock(&self.registry);
        self.libraries
            .iter()
            .map(|lib| LibraryInfo {
                id: lib.id,
                name: lib.name.clone(),
                path: lib.path.clone(),
                state: lib.state,
                capabilities: registry.owned_by(lib.id),
                live_objects: lib.live_objects,
            })
            .collect()
    }

    /// Every registered capability identifier, sorted
    pub fn capabilities(&self) -> Vec<String> {
        lock(&self.registry).identifiers()
    }

    /// Exact-match check; the wildcard does not count
    pub fn is_registered(&self, api: &str) -> bool {
        lock(&self.registry).contains(api)
    }

    /// Id of the loaded library called `name`
    pub fn find(&self, name: &str) -> Option<PluginId> {
        self.libraries
            .iter()
            .find(|lib| lib.name == name)
            .map(|lib| lib.id)
    }

    /// Current state; anything not loaded is `Unloaded`
    pub fn state(&self, id: PluginId) -> LibraryState {
        self.libraries
            .iter()
            .find(|lib| lib.id == id)
            .map_or(LibraryState::Unloaded, |lib| lib.state)
    }

    fn index_of(&self, id: PluginId) -> Result<usize, ManagerError> {
        self.libraries
            .iter()
            .position(|lib| lib.id == id)
            .ok_or(ManagerError::NotLoaded { id })
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Plugin name from a library path: the file stem without a `lib` prefix
fn library_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    stem.strip_prefix("lib").unwrap_or(stem).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_abi::{ApiVersion, PlatformServices, PluginLang, RegisterParams};
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn manager(dir: &Path) -> PluginManager {
        PluginManager::new(ManagerConfig {
            default_plugin_dir: dir.to_path_buf(),
            ..Default::default()
        })
    }

    unsafe extern "C" fn create_null(_params: *const ObjectParams) -> *mut c_void {
        std::ptr::null_mut()
    }

    unsafe extern "C" fn create_boxed(_params: *const ObjectParams) -> *mut c_void {
        Box::into_raw(Box::new(42u32)).cast()
    }

    unsafe extern "C" fn destroy_boxed(object: *mut c_void, _params: *const ObjectParams) -> i32 {
        drop(unsafe { Box::from_raw(object.cast::<u32>()) });
        STATUS_OK
    }

    static EXIT_CALLS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn exit_counting(_services: *const PlatformServices) -> i32 {
        EXIT_CALLS.fetch_add(1, Ordering::SeqCst);
        STATUS_OK
    }

    unsafe extern "C" fn exit_failing(_services: *const PlatformServices) -> i32 {
        -7
    }

    unsafe fn register(
        services: *mut PlatformServices,
        api: &std::ffi::CStr,
        create: capsule_abi::CreateFunc,
    ) -> i32 {
        let services = unsafe { &*services };
        let params = RegisterParams {
            version: services.version,
            plugin_id: services.plugin_id,
            lang: PluginLang::RUST,
            ctrl_obj: std::ptr::null_mut(),
            create: Some(create),
            destroy: Some(destroy_boxed),
        };
        unsafe { services.register(api, &params) }
    }

    unsafe extern "C" fn init_empty(_services: *mut PlatformServices) -> Option<ExitFunc> {
        Some(exit_failing)
    }

    unsafe extern "C" fn init_boxed(services: *mut PlatformServices) -> Option<ExitFunc> {
        unsafe { register(services, c"Boxed", create_boxed) };
        Some(exit_counting)
    }

    unsafe extern "C" fn init_null_factory(services: *mut PlatformServices) -> Option<ExitFunc> {
        unsafe { register(services, c"Nothing", create_null) };
        Some(exit_failing)
    }

    static FAILED_INIT_STATUS: AtomicI32 = AtomicI32::new(1);

    unsafe extern "C" fn init_failing(services: *mut PlatformServices) -> Option<ExitFunc> {
        let status = unsafe { register(services, c"Partial", create_boxed) };
        FAILED_INIT_STATUS.store(status, Ordering::SeqCst);
        None
    }

    #[test]
    fn test_library_name() {
        assert_eq!(library_name(Path::new("/opt/libosi_clp.so")), "osi_clp");
        assert_eq!(library_name(Path::new("greeter.dll")), "greeter");
        assert_eq!(library_name(Path::new("")), "");
    }

    #[test]
    fn test_load_nonexistent_path() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(dir.path());

        let err = manager.load(dir.path().join("libmissing.so")).unwrap_err();
        assert!(matches!(err, ManagerError::Library(crate::LibraryError::Load { .. })));
        assert!(manager.list_libraries().is_empty());
    }

    #[test]
    fn test_load_by_name_not_found() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(dir.path());

        let err = manager.load_by_name("osi-clp").unwrap_err();
        match err {
            ManagerError::LibraryNotFound { name, dir: searched } => {
                assert_eq!(name, "osi-clp");
                assert_eq!(searched, dir.path());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_configured_skips_failures() {
        let dir = TempDir::new().unwrap();
        let mut manager = PluginManager::new(ManagerConfig {
            default_plugin_dir: dir.path().to_path_buf(),
            autoload: vec!["missing-one".to_string(), "missing-two".to_string()],
            ..Default::default()
        });

        assert!(manager.load_configured().is_empty());
        assert!(manager.list_libraries().is_empty());
    }

    #[test]
    fn test_static_plugin_with_no_capabilities() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(dir.path());

        let id = manager.register_static("empty", init_empty).unwrap();
        assert_eq!(manager.state(id), LibraryState::Active);
        assert_eq!(manager.find("empty"), Some(id));

        let info = &manager.list_libraries()[0];
        assert_eq!(info.name, "empty");
        assert_eq!(info.path, None);
        assert!(info.capabilities.is_empty());

        // A failing exit function does not stop the unload
        manager.unload(id).unwrap();
        assert_eq!(manager.state(id), LibraryState::Unloaded);
        assert!(matches!(
            manager.unload(id),
            Err(ManagerError::NotLoaded { .. })
        ));
    }

    #[test]
    fn test_create_destroy_tracks_live_objects() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(dir.path());
        let id = manager.register_static("boxed", init_boxed).unwrap();

        let object = manager.create("Boxed").unwrap();
        assert_eq!(object.api(), "Boxed");
        assert_eq!(object.owner(), id);
        assert!(!object.via_wildcard());
        assert_eq!(unsafe { *object.as_ptr().cast::<u32>() }, 42);
        assert_eq!(manager.list_libraries()[0].live_objects, 1);

        let err = manager.unload(id).unwrap_err();
        assert!(matches!(err, ManagerError::LibraryBusy { live: 1, .. }));
        assert!(manager.is_registered("Boxed"));

        manager.destroy(object).unwrap();
        assert_eq!(manager.list_libraries()[0].live_objects, 0);

        let before = EXIT_CALLS.load(Ordering::SeqCst);
        manager.unload(id).unwrap();
        assert!(EXIT_CALLS.load(Ordering::SeqCst) > before);
        assert!(!manager.is_registered("Boxed"));
    }

    #[test]
    fn test_factory_returning_null() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(dir.path());
        manager.register_static("null", init_null_factory).unwrap();

        let err = manager.create("Nothing").unwrap_err();
        assert!(matches!(err, ManagerError::CreateFailed { .. }));
        assert_eq!(manager.list_libraries()[0].live_objects, 0);
    }

    #[test]
    fn test_unknown_capability() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(dir.path());

        let err = manager.create("Osi1").unwrap_err();
        assert!(matches!(err, ManagerError::CapabilityUnavailable { .. }));
        assert!(manager.create("Osi1").ok().is_none());
    }

    #[test]
    fn test_failed_init_leaves_no_registrations() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(dir.path());

        let err = manager.register_static("failing", init_failing).unwrap_err();
        assert!(matches!(err, ManagerError::InitFailed { ref name } if name == "failing"));
        assert_eq!(FAILED_INIT_STATUS.load(Ordering::SeqCst), STATUS_OK);
        assert!(!manager.is_registered("Partial"));
        assert!(manager.capabilities().is_empty());
        assert!(manager.find("failing").is_none());
    }

    #[test]
    fn test_shutdown_forces_unload() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(dir.path());
        manager.register_static("boxed", init_boxed).unwrap();
        manager.register_static("empty", init_empty).unwrap();

        let leaked = manager.create("Boxed").unwrap();
        manager.shutdown();

        assert!(manager.list_libraries().is_empty());
        assert!(manager.capabilities().is_empty());
        // The registration is gone, so the object cannot be handed back
        assert!(matches!(
            manager.destroy(leaked),
            Err(ManagerError::CapabilityUnavailable { .. })
        ));
    }

    #[test]
    fn test_expected_version_from_config() {
        let dir = TempDir::new().unwrap();
        let manager = PluginManager::new(ManagerConfig {
            default_plugin_dir: dir.path().to_path_buf(),
            api_version: ApiVersion::new(3, 1),
            ..Default::default()
        });
        assert_eq!(manager.config().api_version, ApiVersion::new(3, 1));
        assert_eq!(
            lock(&manager.registry).expected_version("Anything"),
            ApiVersion::new(3, 1)
        );
    }
}
