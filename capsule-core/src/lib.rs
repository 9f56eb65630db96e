//! capsule-core: host side of the capsule plugin framework
//!
//! This crate loads plugin libraries and mediates between them and the host:
//!
//! - **Library loading** - [`DynamicLibrary`] maps one shared-library image and resolves its exports
//! - **Capability registry** - [`CapabilityRegistry`] maps capability identifiers to the factories plugins registered
//! - **Plugin manager** - [`PluginManager`] runs each library's init and exit functions and creates and destroys capability objects
//! - **Configuration** - [`ManagerConfig`] for the search directory, init symbol and expected versions
//!
//! The C-linkage contract itself, and the parameter back-end objects use to
//! expose named parameters, live in `capsule-abi`.
//!
//! # Quick Start
//!
//! ```no_run
//! use capsule_core::{ManagerConfig, PluginManager};
//!
//! fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut manager = PluginManager::new(ManagerConfig::default());
//!
//!     // Load libhello_capability.so from the default plugin directory
//!     let id = manager.load_by_name("hello_capability")?;
//!
//!     // Ask for a capability by identifier
//!     let greeter = manager.create("Greeter")?;
//!     manager.destroy(greeter)?;
//!
//!     manager.unload(id)?;
//!     Ok(())
//! }
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! Unloaded ──load──▶ Loaded ──init──▶ Initialized ──▶ Active
//!     ▲                 │                              │
//!     └──── init failed ┘          unload / shutdown   │
//!     ▲                                                ▼
//!     └───────────── exit, drop capabilities ── ShuttingDown
//! ```

pub mod config;
pub mod error;
pub mod library;
pub mod manager;
pub mod registry;
mod services;

pub use config::ManagerConfig;
pub use error::{LibraryError, ManagerError, RegistrationError};
pub use library::DynamicLibrary;
pub use manager::{LibraryInfo, LibraryState, PluginManager, PluginObject};
pub use registry::{CapabilityRegistration, CapabilityRegistry, PluginId};
