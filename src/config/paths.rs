//! Configuration file locations

use std::path::PathBuf;

/// Per-user configuration directory
///
/// Falls back to `.crypto-bridge` in the working directory when the platform
/// reports no home directory.
pub fn get_config_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "nineminds", "crypto-bridge")
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".crypto-bridge"))
}

/// Default settings file path
pub fn get_settings_path() -> PathBuf {
    get_config_dir().join("settings.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_path_is_toml() {
        let path = get_settings_path();
        assert_eq!(path.file_name().unwrap(), "settings.toml");
        assert!(path.starts_with(get_config_dir()));
    }
}
