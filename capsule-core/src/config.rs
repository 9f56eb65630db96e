//! Plugin manager configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use capsule_abi::{ApiVersion, INIT_SYMBOL, MANAGER_API_VERSION};

use crate::error::ManagerError;

/// Configuration for [`PluginManager`](crate::PluginManager)
///
/// Stored as TOML, by default in `~/.config/capsule/manager.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Directory searched by `load_by_name` and handed to every plugin
    pub default_plugin_dir: PathBuf,
    /// Exported init function every library must provide
    pub init_symbol: String,
    /// Plugins loaded by `load_configured`, by name
    pub autoload: Vec<String>,
    /// Manager API version; also the default expected capability version
    pub api_version: ApiVersion,
    /// Per-capability expected versions
    pub expected_versions: HashMap<String, ApiVersion>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_plugin_dir: capsule_paths::plugin_dir(),
            init_symbol: INIT_SYMBOL.to_string(),
            autoload: Vec::new(),
            api_version: MANAGER_API_VERSION,
            expected_versions: HashMap::new(),
        }
    }
}

impl ManagerConfig {
    /// Default location of the config file
    pub fn default_path() -> PathBuf {
        capsule_paths::config_dir().join("manager.toml")
    }

    /// Load config from a TOML file
    ///
    /// Returns the default config if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, ManagerError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ManagerError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ManagerError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ManagerError::Config(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.init_symbol, "capsule_init_plugin");
        assert_eq!(config.api_version, MANAGER_API_VERSION);
        assert!(config.autoload.is_empty());
        assert!(config.expected_versions.is_empty());
    }

    #[test]
    fn test_config_load_missing_file() {
        let config = ManagerConfig::load(Path::new("/nonexistent/path/manager.toml")).unwrap();
        assert_eq!(config.init_symbol, INIT_SYMBOL);
    }

    #[test]
    fn test_config_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manager.toml");
        std::fs::write(
            &path,
            r#"
default_plugin_dir = "/opt/capsule/plugins"
autoload = ["osi-clp"]

[expected_versions]
Osi2 = { major = 2, minor = 0 }
"#,
        )
        .unwrap();

        let config = ManagerConfig::load(&path).unwrap();
        assert_eq!(config.default_plugin_dir, PathBuf::from("/opt/capsule/plugins"));
        assert_eq!(config.autoload, vec!["osi-clp"]);
        assert_eq!(config.expected_versions["Osi2"], ApiVersion::new(2, 0));
        assert_eq!(config.init_symbol, INIT_SYMBOL);
        assert_eq!(config.api_version, MANAGER_API_VERSION);
    }

    #[test]
    fn test_config_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dir/manager.toml");

        let mut config = ManagerConfig {
            default_plugin_dir: dir.path().join("plugins"),
            ..Default::default()
        };
        config.autoload.push("hello-capability".to_string());
        config
            .expected_versions
            .insert("*".to_string(), ApiVersion::new(1, 4));
        config.save(&path).unwrap();

        assert!(path.exists());
        assert_eq!(ManagerConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_config_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manager.toml");
        std::fs::write(&path, "autoload = 7").unwrap();

        let err = ManagerConfig::load(&path).unwrap_err();
        assert!(matches!(err, ManagerError::Config(_)));
    }
}
