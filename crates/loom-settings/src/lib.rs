//! # loom-settings
//!
//! Layered configuration for the loom engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`LoomSettings::default()`]
//! 2. **User file**: `~/.loom/settings.json` or an explicit path (deep-merged over defaults)
//! 3. **Environment variables**: `LOOM_*` overrides (highest priority)
//!
//! ```no_run
//! use loom_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("bash timeout: {}ms", settings.bash.default_timeout_ms);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
