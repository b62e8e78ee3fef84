//! vault-daemon library: native filesystem backend, file watching, and
//! configuration for the `vault-daemon` binary.
//!
//! Exposed as a library so integration tests can reach the same types.

pub mod config;
pub mod native_fs;
pub mod watcher;

pub use config::{Config, ConfigError};
pub use native_fs::NativeFs;
pub use watcher::{FileEvent, FileEventKind, FileWatcher, WatchConfig};
