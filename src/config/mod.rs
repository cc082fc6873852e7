//! Bridge configuration management
//!
//! Features:
//! - Settings file in the per-user config directory
//! - Environment overrides for worker count and debug logging

mod paths;
mod settings;

pub use paths::*;
pub use settings::*;
