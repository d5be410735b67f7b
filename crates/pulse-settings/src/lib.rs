//! # pulse-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PulseSettings::default()`]
//! 2. **User file**: `~/.pulse/settings.json` or an explicit path,
//!    deep-merged over defaults
//! 3. **Environment variables**: `PULSE_*` overrides (highest priority)
//!
//! The merged result is checked with [`PulseSettings::validate`] before use.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_required_settings, load_settings,
    load_settings_from_path, settings_path,
};
pub use types::*;
