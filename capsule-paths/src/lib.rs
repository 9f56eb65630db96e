//! XDG Base Directory paths for capsule.
//!
//! Plugin hosts embedding capsule get the same directory layout on every
//! platform: configuration and the default plugin search directory live under
//! the XDG config home rather than a platform-native location.

use std::path::PathBuf;

/// Environment variable that overrides the default plugin directory.
pub const PLUGIN_DIR_ENV: &str = "CAPSULE_PLUGIN_DIR";

/// Get the capsule config directory.
///
/// Returns `$XDG_CONFIG_HOME/capsule` if set, otherwise `~/.config/capsule`.
///
/// # Examples
///
/// ```
/// use capsule_paths::config_dir;
///
/// let config = config_dir();
/// let manager_config = config.join("manager.toml");
/// ```
pub fn config_dir() -> PathBuf {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join("capsule")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config/capsule")
    } else {
        PathBuf::from(".config/capsule")
    }
}

/// Get the default plugin search directory.
///
/// Returns `$CAPSULE_PLUGIN_DIR` if set, otherwise `<config_dir>/plugins`.
/// This is the directory handed to every plugin in its services block.
pub fn plugin_dir() -> PathBuf {
    match std::env::var(PLUGIN_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => config_dir().join("plugins"),
    }
}

/// Platform file names a plugin called `name` may be stored under.
///
/// `lib<name>.<ext>` comes first since that is what cargo emits for a
/// `cdylib`, followed by the bare `<name>.<ext>`.
pub fn library_file_names(name: &str) -> Vec<String> {
    let extensions: &[&str] = if cfg!(target_os = "macos") {
        &["dylib", "so"]
    } else if cfg!(target_os = "windows") {
        &["dll"]
    } else {
        &["so"]
    };

    extensions
        .iter()
        .flat_map(|ext| [format!("lib{name}.{ext}"), format!("{name}.{ext}")])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_ends_with_capsule() {
        let path = config_dir();
        assert!(
            path.ends_with("capsule"),
            "config_dir should end with 'capsule'"
        );
    }

    // Both env-var tests live in one function so they cannot race each other.
    #[test]
    fn test_env_overrides() {
        unsafe {
            std::env::set_var("XDG_CONFIG_HOME", "/tmp/test-config");
            std::env::remove_var(PLUGIN_DIR_ENV);
        }
        assert_eq!(config_dir(), PathBuf::from("/tmp/test-config/capsule"));
        assert_eq!(
            plugin_dir(),
            PathBuf::from("/tmp/test-config/capsule/plugins")
        );

        unsafe {
            std::env::set_var(PLUGIN_DIR_ENV, "/opt/capsule/plugins");
        }
        assert_eq!(plugin_dir(), PathBuf::from("/opt/capsule/plugins"));

        unsafe {
            std::env::remove_var(PLUGIN_DIR_ENV);
            std::env::remove_var("XDG_CONFIG_HOME");
        }
    }

    #[test]
    fn test_library_file_names_prefer_lib_prefix() {
        let names = library_file_names("greeter");
        assert!(names[0].starts_with("libgreeter."));
        assert!(names.iter().any(|n| n.starts_with("greeter.")));
    }
}
