//! Dynamic library handle

use libloading::Library;
use std::ffi::c_void;
use std::path::{Path, PathBuf};

use crate::error::LibraryError;

/// One mapped shared-library image.
///
/// The image stays mapped for as long as the value lives. Dropping it unmaps
/// the image; a failure to unmap is logged and otherwise ignored.
#[derive(Debug)]
pub struct DynamicLibrary {
    path: PathBuf,
    library: Option<Library>,
}

impl DynamicLibrary {
    /// Map the image at `path`.
    ///
    /// Running a library's initialisers is inherently unsafe; the manager only
    /// loads paths it was explicitly asked to.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LibraryError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(LibraryError::Load {
                path: PathBuf::new(),
                reason: "empty path".to_string(),
            });
        }

        // SAFETY: loading runs the library's static initialisers; the caller
        // chose this path.
        let library = unsafe { Library::new(path) }.map_err(|e| LibraryError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        tracing::debug!(path = %path.display(), "Library mapped");
        Ok(Self {
            path: path.to_path_buf(),
            library: Some(library),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve an exported symbol as a value of type `T`, usually an
    /// `extern "C"` function pointer.
    ///
    /// # Safety
    ///
    /// `T` must match the real type of the export, and the returned value must
    /// not be used after this library is dropped.
    pub unsafe fn resolve<T: Copy>(&self, symbol: &str) -> Result<T, LibraryError> {
        let library = self.library.as_ref().ok_or_else(|| self.missing(symbol, "library closed"))?;
        let value = unsafe { library.get::<T>(symbol.as_bytes()) }
            .map_err(|e| self.missing(symbol, &e.to_string()))?;
        Ok(*value)
    }

    /// Resolve an exported symbol to its address.
    pub fn resolve_raw(&self, symbol: &str) -> Result<*mut c_void, LibraryError> {
        // SAFETY: a raw pointer is valid for every export; dereferencing it is
        // the caller's business.
        unsafe { self.resolve::<*mut c_void>(symbol) }
    }

    fn missing(&self, symbol: &str, reason: &str) -> LibraryError {
        LibraryError::SymbolNotFound {
            symbol: symbol.to_string(),
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl Drop for DynamicLibrary {
    fn drop(&mut self) {
        if let Some(library) = self.library.take() {
            match library.close() {
                Ok(()) => tracing::debug!(path = %self.path.display(), "Library unmapped"),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to unmap library"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_nonexistent_path() {
        let err = DynamicLibrary::load("/nonexistent/path/libnothing.so").unwrap_err();
        match err {
            LibraryError::Load { path, reason } => {
                assert_eq!(path, PathBuf::from("/nonexistent/path/libnothing.so"));
                assert!(!reason.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_empty_path() {
        let err = DynamicLibrary::load("").unwrap_err();
        assert!(matches!(err, LibraryError::Load { .. }));
    }

    #[test]
    fn test_load_not_a_library() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("libbogus.so");
        std::fs::write(&path, b"definitely not an ELF image").unwrap();

        let err = DynamicLibrary::load(&path).unwrap_err();
        assert!(matches!(err, LibraryError::Load { .. }));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_resolve_from_system_library() {
        let library = DynamicLibrary::load("libc.so.6").unwrap();

        let strlen: unsafe extern "C" fn(*const std::ffi::c_char) -> usize =
            unsafe { library.resolve("strlen") }.unwrap();
        assert_eq!(unsafe { strlen(c"capsule".as_ptr()) }, 7);
        assert!(!library.resolve_raw("strlen").unwrap().is_null());

        let err = library.resolve_raw("capsule_no_such_symbol").unwrap_err();
        match err {
            LibraryError::SymbolNotFound { symbol, path, .. } => {
                assert_eq!(symbol, "capsule_no_such_symbol");
                assert_eq!(path, PathBuf::from("libc.so.6"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
