//! # slidesync-settings
//!
//! Layered configuration for the slidesync server.
//!
//! Settings are resolved from four layers (in priority order):
//! 1. **Compiled defaults**: [`SlideSyncSettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `SLIDESYNC_*` overrides
//! 4. **CLI flags**: applied by the binary after loading

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, settings_path_from_env};
pub use types::*;
