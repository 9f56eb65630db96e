//! Error types for capsule-core

use std::path::PathBuf;
use thiserror::Error;

use capsule_abi::{ApiVersion, RegisterStatus};

use crate::registry::PluginId;

/// Errors from opening a shared library or resolving its symbols
#[derive(Error, Debug)]
pub enum LibraryError {
    /// The image could not be mapped
    #[error("Failed to load library {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    /// A required export is missing
    #[error("Symbol '{symbol}' not found in {path}: {reason}")]
    SymbolNotFound {
        symbol: String,
        path: PathBuf,
        reason: String,
    },
}

/// Reasons a capability registration is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Capability '{api}' version {found} is incompatible with expected {expected}")]
    VersionMismatch {
        api: String,
        expected: ApiVersion,
        found: ApiVersion,
    },

    #[error("Capability '{api}' is already registered by plugin {owner}")]
    DuplicateCapability { api: String, owner: PluginId },

    #[error("Malformed registration: {0}")]
    Malformed(String),

    /// The registration carried a plugin id the manager did not hand out, or
    /// one whose library is shutting down
    #[error("Registration from unknown plugin")]
    UnknownPlugin,
}

impl RegistrationError {
    /// Status reported back to the plugin
    pub fn status(&self) -> RegisterStatus {
        match self {
            Self::VersionMismatch { .. } => RegisterStatus::VersionMismatch,
            Self::DuplicateCapability { .. } => RegisterStatus::Duplicate,
            Self::Malformed(_) | Self::UnknownPlugin => RegisterStatus::Malformed,
        }
    }
}

/// Errors that can occur in the plugin manager
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error(transparent)]
    Library(#[from] LibraryError),

    /// No library file for a plugin name in the search directory
    #[error("No library for plugin '{name}' in {dir}")]
    LibraryNotFound { name: String, dir: PathBuf },

    /// The init function returned no exit function
    #[error("Plugin '{name}' failed to initialize")]
    InitFailed { name: String },

    #[error("Plugin {id} is not loaded")]
    NotLoaded { id: PluginId },

    /// Neither the identifier nor the wildcard is registered
    #[error("Capability '{api}' is not available")]
    CapabilityUnavailable { api: String },

    /// The factory returned null
    #[error("Factory for capability '{api}' returned no object")]
    CreateFailed { api: String },

    #[error("Destructor for capability '{api}' failed with status {status}")]
    DestroyFailed { api: String, status: i32 },

    /// Objects created by the library are still alive
    #[error("Plugin '{name}' still owns {live} live object(s)")]
    LibraryBusy { name: String, live: usize },

    /// Config file could not be parsed or written
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_display() {
        let err = LibraryError::Load {
            path: PathBuf::from("/opt/plugins/libosi.so"),
            reason: "cannot open shared object file".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/opt/plugins/libosi.so"));
        assert!(msg.contains("cannot open shared object file"));
    }

    #[test]
    fn test_symbol_not_found_display() {
        let err = LibraryError::SymbolNotFound {
            symbol: "capsule_init_plugin".to_string(),
            path: PathBuf::from("libosi.so"),
            reason: "undefined symbol".to_string(),
        };
        assert!(err.to_string().contains("capsule_init_plugin"));
    }

    #[test]
    fn test_registration_status_mapping() {
        let mismatch = RegistrationError::VersionMismatch {
            api: "Osi1".to_string(),
            expected: ApiVersion::new(1, 0),
            found: ApiVersion::new(2, 0),
        };
        assert_eq!(mismatch.status(), RegisterStatus::VersionMismatch);
        assert!(mismatch.to_string().contains("2.0"));

        let duplicate = RegistrationError::DuplicateCapability {
            api: "Osi1".to_string(),
            owner: PluginId(3),
        };
        assert_eq!(duplicate.status(), RegisterStatus::Duplicate);
        assert!(duplicate.to_string().contains("#3"));

        assert_eq!(
            RegistrationError::UnknownPlugin.status(),
            RegisterStatus::Malformed
        );
    }

    #[test]
    fn test_library_busy_display() {
        let err = ManagerError::LibraryBusy {
            name: "hello-capability".to_string(),
            live: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("hello-capability"));
        assert!(msg.contains("2"));
    }

    #[test]
    fn test_library_error_conversion() {
        let err: ManagerError = LibraryError::Load {
            path: PathBuf::from("x.so"),
            reason: "missing".to_string(),
        }
        .into();
        assert!(matches!(err, ManagerError::Library(LibraryError::Load { .. })));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ManagerError = io_err.into();
        assert!(matches!(err, ManagerError::Io(_)));
    }
}
