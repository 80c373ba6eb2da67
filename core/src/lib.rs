//! Sandbox Image Core - Foundational Types
//!
//! Errors, configuration and the small value types shared by the template
//! store and its command-line front end.

pub mod config;
pub mod disk;
pub mod env;
pub mod error;
pub mod volume;

// Re-export commonly used types
pub use config::StoreConfig;
pub use disk::DiskFormat;
pub use env::EnvVar;
pub use error::{ErrorKind, Result, TemplateError};
pub use volume::VolumeSpec;

/// Sandbox Image version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
