//! Configuration for evaluation runs
//!
//! Settings come from an optional YAML file plus the process environment and
//! are resolved once at startup into [`EvalSettings`].

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;

use crate::errors::EvalError;
use std::path::Path;

/// Load and resolve settings, reading `path` if one is given.
pub fn load_settings(path: Option<&Path>) -> Result<EvalSettings, EvalError> {
    SettingsLoader::load(path)
}
