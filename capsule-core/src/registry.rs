//! Capability registry - maps capability identifiers to the plugin that
//! registered them

use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;

use capsule_abi::{
    ApiVersion, CreateFunc, DestroyFunc, PluginLang, RegisterParams, WILDCARD_API,
};

use crate::error::RegistrationError;

/// Host-side id of a loaded plugin library, used for bookkeeping and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(pub u64);

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One registered capability
#[derive(Debug, Clone)]
pub struct CapabilityRegistration {
    pub api: String,
    pub owner: PluginId,
    pub version: ApiVersion,
    pub lang: PluginLang,
    /// Plugin-owned; handed back in every `ObjectParams`, never dereferenced
    pub ctrl_obj: *mut c_void,
    pub create: CreateFunc,
    pub destroy: DestroyFunc,
}

// SAFETY: the registry never dereferences `ctrl_obj`; it only passes it back
// to the plugin that supplied it.
unsafe impl Send for CapabilityRegistration {}

/// Table of registered capabilities.
///
/// Identifiers are unique: a second registration of the same identifier is
/// rejected and leaves the first one untouched.
#[derive(Debug)]
pub struct CapabilityRegistry {
    api_version: ApiVersion,
    expected_versions: HashMap<String, ApiVersion>,
    entries: HashMap<String, CapabilityRegistration>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    ///
    /// Registrations must match the major of `api_version`, or of the entry in
    /// `expected_versions` for their identifier.
    pub fn new(api_version: ApiVersion, expected_versions: HashMap<String, ApiVersion>) -> Self {
        Self {
            api_version,
            expected_versions,
            entries: HashMap::new(),
        }
    }

    /// Version a registration of `api` must be compatible with
    pub fn expected_version(&self, api: &str) -> ApiVersion {
        self.expected_versions
            .get(api)
            .copied()
            .unwrap_or(self.api_version)
    }

    /// Validate and insert one registration
    pub fn register(
        &mut self,
        api: &str,
        owner: PluginId,
        params: &RegisterParams,
    ) -> Result<(), RegistrationError> {
        if api.is_empty() {
            return Err(RegistrationError::Malformed(
                "empty capability identifier".to_string(),
            ));
        }
        let (Some(create), Some(destroy)) = (params.create, params.destroy) else {
            return Err(RegistrationError::Malformed(format!(
                "capability '{api}' is missing its factory or destructor"
            )));
        };

        let expected = self.expected_version(api);
        if !params.version.is_compatible_with(&expected) {
            return Err(RegistrationError::VersionMismatch {
                api: api.to_string(),
                expected,
                found: params.version,
            });
        }

        if let Some(existing) = self.entries.get(api) {
            return Err(RegistrationError::DuplicateCapability {
                api: api.to_string(),
                owner: existing.owner,
            });
        }

        self.entries.insert(
            api.to_string(),
            CapabilityRegistration {
                api: api.to_string(),
                owner,
                version: params.version,
                lang: params.lang,
                ctrl_obj: params.ctrl_obj,
                create,
                destroy,
            },
        );
        Ok(())
    }

    /// Exact-match lookup
    pub fn get(&self, api: &str) -> Option<&CapabilityRegistration> {
        self.entries.get(api)
    }

    /// Exact match, falling back to the wildcard registration
    pub fn resolve(&self, api: &str) -> Option<&CapabilityRegistration> {
        self.entries
            .get(api)
            .or_else(|| self.entries.get(WILDCARD_API))
    }

    pub fn contains(&self, api: &str) -> bool {
        self.entries.contains_key(api)
    }

    /// Remove every registration owned by `owner`, returning the removed
    /// identifiers, sorted
    pub fn remove_owner(&mut self, owner: PluginId) -> Vec<String> {
        let removed = self.owned_by(owner);
        for api in &removed {
            self.entries.remove(api);
        }
        removed
    }

    /// Identifiers registered by `owner`, sorted
    pub fn owned_by(&self, owner: PluginId) -> Vec<String> {
        let mut apis: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.owner == owner)
            .map(|entry| entry.api.clone())
            .collect();
        apis.sort();
        apis
    }

    /// All registered identifiers, sorted
    pub fn identifiers(&self) -> Vec<String> {
        let mut apis: Vec<String> = self.entries.keys().cloned().collect();
        apis.sort();
        apis
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
