//! # carelink-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`CarelinkSettings::default()`]
//! 2. **Settings file**: a JSON file deep-merged over the defaults
//! 3. **Environment variables**: `CARELINK_*`, `AI_*` and provider API keys
//!
//! API keys only ever come from the environment and are never serialized.
//! Call [`CarelinkSettings::validate`] before starting the server.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path};
pub use types::*;
