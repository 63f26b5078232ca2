//! Config file location and IO.

use crate::error::ConfigError;
use crate::models::app_config::AppConfig;
use std::path::{Path, PathBuf};

/// File name of the config inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Default data directory: `~/.pr_sentinel`, or `~/.pr_sentinel_dev` in
/// debug builds so development runs do not touch real data.
pub fn default_data_dir() -> Option<PathBuf> {
    let name = if cfg!(debug_assertions) {
        ".pr_sentinel_dev"
    } else {
        ".pr_sentinel"
    };
    dirs::home_dir().map(|home| home.join(name))
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

/// Read the config file. A missing file is an empty config.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => AppConfig::from_json(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("No config at {}, starting empty", path.display());
            Ok(AppConfig::default())
        }
        Err(e) => Err(ConfigError::Io(format!("{}: {}", path.display(), e))),
    }
}

/// Write the config file in the current format.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
    }

    let json = config.to_json()?;

    // Write-then-rename so a crash never leaves a truncated config
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| ConfigError::Io(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| ConfigError::Io(e.to_string()))?;

    log::debug!("Saved config to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::app_config::SourceConfig;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty_config() {
        let dir = tempdir().unwrap();
        let config = load_config(&config_path(dir.path())).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = config_path(&dir.path().join("nested"));
        let config = AppConfig {
            auth_token: Some("ghp_x".to_string()),
            viewer_identity: Some("octocat".to_string()),
            sources: vec![SourceConfig::Repo {
                repo_name: "octo/widgets".to_string(),
                needed_approvals: 2,
            }],
        };

        save_config(&path, &config).unwrap();
        assert_eq!(load_config(&path).unwrap(), config);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_legacy_file_is_upgraded_on_save() {
        let dir = tempdir().unwrap();
        let path = config_path(dir.path());
        std::fs::write(
            &path,
            r#"{"github_token": "ghp_x", "filters": [{"id": "f1", "name": "Mine", "query": "author:@me", "notify": true}]}"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        save_config(&path, &config).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"version\": 3"));
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = config_path(dir.path());
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse(_))));
    }
}
