//! Configuration management with YAML support

use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub crawl: CrawlConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

/// Defaults recorded with each crawl session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Download file attachments
    #[serde(default = "default_enabled")]
    pub files: bool,

    /// Download user avatars
    #[serde(default)]
    pub avatars: bool,

    /// Skip user rows whose payload has not changed since the last crawl
    #[serde(default = "default_enabled")]
    pub dedupe_users: bool,
}

fn default_database_path() -> String {
    ProjectDirs::from("", "", "packrat")
        .map(|d| d.data_dir().join("packrat.db").to_string_lossy().into_owned())
        .unwrap_or_else(|| "packrat.db".to_string())
}

fn default_enabled() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            files: true,
            avatars: false,
            dedupe_users: true,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./packrat.yaml (current directory)
    /// 3. <config dir>/packrat/packrat.yaml
    pub fn load(path: &str) -> Result<Self> {
        let mut search_paths = vec![PathBuf::from(path), PathBuf::from("packrat.yaml")];
        if let Some(dirs) = ProjectDirs::from("", "", "packrat") {
            search_paths.push(dirs.config_dir().join("packrat.yaml"));
        }

        for search_path in &search_paths {
            if search_path.exists() {
                let content = std::fs::read_to_string(search_path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    pub fn database_path(&self) -> &Path {
        Path::new(&self.database.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.crawl.files);
        assert!(!config.crawl.avatars);
        assert!(config.crawl.dedupe_users);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
database:
  path: /tmp/test.db

crawl:
  files: false
  dedupe_users: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.database.path, "/tmp/test.db");
        assert!(!config.crawl.files);
        assert!(!config.crawl.dedupe_users);
        // unspecified fields fall back to defaults
        assert!(!config.crawl.avatars);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load("/nonexistent/packrat.yaml").unwrap();
        assert!(config.crawl.files);
    }
}
