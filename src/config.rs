use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::usecase::refresh::DEFAULT_REFRESH_INTERVAL;

const MAX_REFRESH_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration does not exist: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub demo: bool,
    #[serde(default)]
    pub refresh_interval_minutes: Option<u64>,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum AccountConfig {
    AzureDevops {
        name: Option<String>,
        org_url: String,
        project: String,
        repository: Option<String>,
        pat: Option<String>,
    },
    Github {
        name: Option<String>,
        token: Option<String>,
        api_base: Option<String>,
    },
}

impl AccountConfig {
    /// Label shown next to each pull request from this account.
    pub fn display_name(&self) -> String {
        match self {
            Self::AzureDevops {
                name: Some(name), ..
            }
            | Self::Github {
                name: Some(name), ..
            } => name.clone(),
            Self::AzureDevops {
                project,
                repository,
                ..
            } => match repository {
                Some(repo) => format!("{project}/{repo}"),
                None => project.clone(),
            },
            Self::Github { .. } => "github".to_string(),
        }
    }
}

impl Config {
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval_minutes
            .map(|m| Duration::from_secs(m.saturating_mul(60)))
            .unwrap_or(DEFAULT_REFRESH_INTERVAL)
    }

    pub fn from_json(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(minutes) = self.refresh_interval_minutes
            && !(1..=MAX_REFRESH_INTERVAL_MINUTES).contains(&minutes)
        {
            return Err(ConfigError::Invalid {
                message: format!(
                    "refresh_interval_minutes must be between 1 and {MAX_REFRESH_INTERVAL_MINUTES}, got {minutes}"
                ),
            });
        }
        if !self.demo && self.accounts.is_empty() {
            return Err(ConfigError::Invalid {
                message: "at least one account is required".to_string(),
            });
        }
        for account in &self.accounts {
            if let AccountConfig::AzureDevops { org_url, .. } = account {
                reqwest::Url::parse(org_url).map_err(|e| ConfigError::Invalid {
                    message: format!("org_url '{org_url}' is not a valid URL: {e}"),
                })?;
            }
        }
        Ok(())
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pr-dash")
        .join("config.json")
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Config::from_json(&raw, path)
}
