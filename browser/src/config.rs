use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{BrowserError, Result};

const DEFAULT_CONFIG_ENV: &str = "DBTREE_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub registry_path: PathBuf,
    pub log_level: Option<String>,
    pub log_format: LogFormat,
    pub log_file: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from("databases.xml"),
            log_level: Some(String::from("warn")),
            log_format: LogFormat::Compact,
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Compact,
}

impl BrowserConfig {
    pub fn from_sources(cli_path: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let env_path = std::env::var_os(DEFAULT_CONFIG_ENV).map(PathBuf::from);

        if let Some(path) = cli_path {
            if path.as_os_str().is_empty() {
                return Err(BrowserError::Config(
                    "configuration path must not be empty".into(),
                ));
            }
        }

        let config = if let Some(path) = cli_path {
            Self::load_from_path(path)?
        } else if let Some(path) = env_path.filter(|p| !p.as_os_str().is_empty()) {
            Self::load_from_path(path)?
        } else {
            let mut cfg = Self::default();
            cfg.normalize_paths(&cwd);
            cfg
        };

        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        let raw = fs::read_to_string(&absolute_path)?;
        let mut config: BrowserConfig = toml::from_str(&raw)?;
        let base = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.normalize_paths(&base);
        Ok(config)
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    fn validate(&self) -> Result<()> {
        if self.registry_path.as_os_str().is_empty() {
            return Err(BrowserError::Config(
                "registry_path must not be empty".into(),
            ));
        }
        if let Some(file) = self.log_file() {
            if file.as_os_str().is_empty() {
                return Err(BrowserError::Config("log_file must not be empty".into()));
            }
        }
        Ok(())
    }

    fn normalize_paths(&mut self, base: &Path) {
        if self.registry_path.is_relative() && !self.registry_path.as_os_str().is_empty() {
            self.registry_path = base.join(&self.registry_path);
        }
        normalize_optional_path(&mut self.log_file, base);
    }
}

fn normalize_optional_path(target: &mut Option<PathBuf>, base: &Path) {
    if let Some(path) = target {
        if path.is_relative() && !path.as_os_str().is_empty() {
            *path = base.join(&*path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn relative_paths_follow_the_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dbtree.toml");
        fs::write(
            &path,
            "registry_path = \"state/databases.xml\"\nlog_format = \"json\"\nlog_file = \"dbtree.log\"\n",
        )
        .unwrap();

        let config = BrowserConfig::from_sources(Some(path.as_path())).unwrap();
        assert_eq!(config.registry_path, dir.path().join("state/databases.xml"));
        assert_eq!(config.log_file(), Some(dir.path().join("dbtree.log").as_path()));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.log_level.as_deref(), Some("warn"));
    }

    #[test]
    fn empty_registry_path_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dbtree.toml");
        fs::write(&path, "registry_path = \"\"\n").unwrap();

        assert!(matches!(
            BrowserConfig::from_sources(Some(path.as_path())),
            Err(BrowserError::Config(_))
        ));
        assert!(matches!(
            BrowserConfig::from_sources(Some(Path::new(""))),
            Err(BrowserError::Config(_))
        ));
    }

    #[test]
    fn unknown_log_format_fails_to_parse() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dbtree.toml");
        fs::write(&path, "log_format = \"pretty\"\n").unwrap();

        assert!(matches!(
            BrowserConfig::load_from_path(&path),
            Err(BrowserError::Toml(_))
        ));
    }
}
