use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_cors_any")]
    pub cors_any: bool,
}

fn default_port() -> u16 {
    3151
}

fn default_cors_any() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            cors_any: default_cors_any(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// JSON file the store persists to; `None` keeps everything in memory.
    #[serde(default = "default_data_file")]
    pub data_file: Option<PathBuf>,
    #[serde(default)]
    pub server: ServerConfig,
    /// Allowed team categories. Empty accepts any category.
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    /// Display name for member ids with no user record.
    #[serde(default = "default_unknown_member_name")]
    pub unknown_member_name: String,
}

fn default_data_file() -> Option<PathBuf> {
    Some(PathBuf::from(paths::DEFAULT_DATA_FILE))
}

fn default_categories() -> Vec<String> {
    ["Marketing", "Sales", "Development", "Design"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

pub(crate) fn default_unknown_member_name() -> String {
    "Unknown".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            server: ServerConfig::default(),
            categories: default_categories(),
            unknown_member_name: default_unknown_member_name(),
        }
    }
}

impl Config {
    /// Configuration that keeps the store in memory.
    pub fn in_memory() -> Self {
        Self {
            data_file: None,
            ..Self::default()
        }
    }

    /// Load `teamsync.yaml` from `root`, falling back to defaults when absent.
    pub fn load(root: &Path) -> Result<Self> {
        match crate::io::read_if_exists(&paths::config_path(root))? {
            Some(data) => Ok(serde_yaml::from_str(&data)?),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&paths::config_path(root), data.as_bytes())
    }

    pub fn allows_category(&self, category: &str) -> bool {
        self.categories.is_empty() || self.categories.iter().any(|c| c == category)
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let mut seen = HashSet::new();
        for c in &self.categories {
            if c.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: "categories contains an empty entry".into(),
                });
            } else if !seen.insert(c.as_str()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("category '{c}' is listed more than once"),
                });
            }
        }

        if self.unknown_member_name.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "unknown_member_name is empty; unnamed members will show blank".into(),
            });
        }

        if self.server.port == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "server.port is 0; the OS will pick a port".into(),
            });
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.server.port, 3151);
        assert_eq!(config.categories.len(), 4);
        assert_eq!(
            config.data_file.as_deref(),
            Some(Path::new("teamsync-data.json"))
        );
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("teamsync.yaml"),
            "server:\n  port: 8080\ncategories: []\n",
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.server.cors_any);
        assert!(config.allows_category("Anything"));
        assert_eq!(config.unknown_member_name, "Unknown");
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::in_memory();
        config.unknown_member_name = "No Name".into();
        config.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.unknown_member_name, "No Name");
        assert!(loaded.data_file.is_none());
    }

    #[test]
    fn category_check() {
        let config = Config::default();
        assert!(config.allows_category("Sales"));
        assert!(!config.allows_category("Legal"));
    }

    #[test]
    fn validate_flags_duplicates_and_blanks() {
        let config = Config {
            categories: vec!["Sales".into(), "Sales".into(), " ".into()],
            ..Config::default()
        };
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.level == WarnLevel::Error));
    }
}
