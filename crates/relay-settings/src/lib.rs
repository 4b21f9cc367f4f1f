//! # relay-settings
//!
//! Configuration for the pairing relay, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `$RELAY_CONFIG` or `~/.relay/settings.json`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `PORT`, `REDIS_URL`, `RELAY_*`, ...
//!
//! The daemon applies its CLI flags on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
