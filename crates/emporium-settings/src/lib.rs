//! # emporium-settings
//!
//! Layered configuration for the Emporium messaging hub.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`EmporiumSettings::default()`]
//! 2. **User file**: `~/.emporium/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `EMPORIUM_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings, load_settings_from_path, load_settings_required, settings_path,
};
pub use types::*;
