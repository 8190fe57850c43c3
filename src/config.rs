use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

static SETTINGS_FILE_NAME: &str = "settings.json";

/// Default size boundary below which file content is materialized into the
/// local disk cache instead of streamed live (128 KiB).
pub const DEFAULT_CACHE_THRESHOLD: u64 = 128 * 1024;

/// Project-wide configuration: settings file plus the directory layout
/// (config dir, cache dir for downloaded content, staging dir for writes).
pub struct ProjectConfig {
    pub settings: Settings,
    pub project_dirs: ProjectDirs,
}

impl ProjectConfig {
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("nz", "mega", "mega-vdrive")
            .ok_or_else(|| anyhow!("Failed to determine project directories"))?;
        for dir in [proj_dirs.config_dir(), proj_dirs.cache_dir(), proj_dirs.data_dir()] {
            if !dir.exists() {
                fs::create_dir_all(dir).context("Failed to create project directory")?;
            }
        }

        let settings = Settings::load_or_default(&proj_dirs.config_dir().join(SETTINGS_FILE_NAME))?;
        Ok(Self {
            settings,
            project_dirs: proj_dirs,
        })
    }

    /// Directory holding fully cached remote file content, one file per node id.
    pub fn content_cache_dir(&self) -> PathBuf {
        self.project_dirs.cache_dir().join("content")
    }

    /// Directory holding staged writes awaiting upload.
    pub fn staging_dir(&self) -> PathBuf {
        self.project_dirs.cache_dir().join("staging")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    /// Account email used to log in and shown as the filesystem name
    pub email: String,
    /// Files at or below this size (bytes) are cached on disk; larger
    /// files are streamed from the remote on every read
    pub cache_threshold: u64,
    /// Delete the content cache directory when the drive is unmounted
    pub purge_cache_on_unmount: bool,
    /// Volume label reported to the host
    pub volume_label: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            email: String::new(),
            cache_threshold: DEFAULT_CACHE_THRESHOLD,
            purge_cache_on_unmount: true,
            volume_label: "MEGA.NZ".to_string(),
        }
    }
}

impl Settings {
    pub fn load_or_default(config_file_path: &Path) -> Result<Self> {
        match Self::load_from_file(config_file_path) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!("Error loading settings from file - creating default config: {}", e);
                let default = Self::default();
                default.save_to_file(config_file_path)?;
                Ok(default)
            }
        }
    }

    pub fn load_from_file(config_file_path: &Path) -> Result<Self> {
        if !config_file_path.exists() {
            return Err(anyhow!("Config file not found"));
        }
        let data = fs::read_to_string(config_file_path)?;
        let settings: Self = serde_json::from_str(&data)?;
        Ok(settings)
    }

    pub fn save_to_file(&self, config_file_path: &Path) -> Result<()> {
        if let Some(parent) = config_file_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let data = serde_json::to_string_pretty(self)?;
        fs::write(config_file_path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.cache_threshold, DEFAULT_CACHE_THRESHOLD);
        assert!(settings.purge_cache_on_unmount);
        assert_eq!(settings.volume_label, "MEGA.NZ");
    }

    #[test]
    fn test_settings_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.json");

        let settings = Settings {
            email: "user@example.com".to_string(),
            cache_threshold: 4096,
            purge_cache_on_unmount: false,
            volume_label: "TEST".to_string(),
        };
        settings.save_to_file(&config_path).unwrap();

        let loaded = Settings::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.email, "user@example.com");
        assert_eq!(loaded.cache_threshold, 4096);
        assert!(!loaded.purge_cache_on_unmount);
        assert_eq!(loaded.volume_label, "TEST");
    }

    #[test]
    fn test_load_settings_from_file_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.json");

        let result = Settings::load_from_file(&config_path);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Config file not found"));
    }

    #[test]
    fn test_load_settings_from_file_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.json");
        fs::write(&config_path, "{ invalid json }").unwrap();

        let result = Settings::load_from_file(&config_path);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_or_default_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.json");

        let settings = Settings::load_or_default(&config_path).unwrap();
        assert!(config_path.exists());
        assert_eq!(settings.cache_threshold, DEFAULT_CACHE_THRESHOLD);
    }
}
