use crate::utils::error::{AppError, AppResult};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub graph: GraphConfig,
    pub sharepoint: SharePointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub tenant_id: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharePointConfig {
    /// Hostname of the tenant, e.g. "contoso.sharepoint.com".
    pub host: String,
    pub source_site: String,
    pub source_path: String,
    pub dest_site: String,
    pub dest_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            graph: GraphConfig {
                tenant_id: String::new(),
                client_id: String::new(),
                client_secret: None,
            },
            sharepoint: SharePointConfig {
                host: String::new(),
                source_site: String::new(),
                source_path: "/".to_string(),
                dest_site: String::new(),
                dest_path: "/".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load() -> AppResult<Self> {
        Self::load_custom(&Self::config_file_path())
    }

    pub fn ensure_config_exists() -> AppResult<()> {
        let config_path = Self::config_file_path();
        if !config_path.exists() {
            let default_config = Config::default();
            default_config.save()?;
        }
        Ok(())
    }

    pub fn load_custom(config_path: &std::path::Path) -> AppResult<Self> {
        if !config_path.exists() {
            return Err(AppError::System(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content =
            std::fs::read_to_string(config_path).map_err(|e| AppError::Io(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| AppError::System(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.graph.tenant_id.is_empty() {
            return Err(AppError::System("Tenant ID cannot be empty".to_string()));
        }

        if self.graph.client_id.is_empty() {
            return Err(AppError::System("Client ID cannot be empty".to_string()));
        }

        if self.graph.client_secret.is_none() && get_client_secret().is_none() {
            return Err(AppError::System(
                "Client secret is required. Set it in config or use the AVIS_MIRROR_CLIENT_SECRET environment variable".to_string(),
            ));
        }

        if self.sharepoint.host.is_empty() {
            return Err(AppError::System(
                "SharePoint host cannot be empty".to_string(),
            ));
        }

        for (label, value) in [
            ("Source site", &self.sharepoint.source_site),
            ("Source path", &self.sharepoint.source_path),
            ("Destination site", &self.sharepoint.dest_site),
            ("Destination path", &self.sharepoint.dest_path),
        ] {
            if value.is_empty() {
                return Err(AppError::System(format!("{} cannot be empty", label)));
            }
        }

        Ok(())
    }

    pub fn save(&self) -> AppResult<()> {
        let config_path = Self::config_file_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Io(e.to_string()))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::System(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&config_path, content).map_err(|e| AppError::Io(e.to_string()))?;

        Ok(())
    }

    pub fn config_file_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("avis-mirror")
            .join("config.toml")
    }

    /// Client secret from config, falling back to the environment.
    pub fn client_secret(&self) -> Option<String> {
        self.graph.client_secret.clone().or_else(get_client_secret)
    }
}

pub fn get_client_secret() -> Option<String> {
    std::env::var("AVIS_MIRROR_CLIENT_SECRET").ok()
}

/// Process-wide naming/timestamp values, computed once at startup and
/// immutable thereafter.
#[derive(Debug, Clone)]
pub struct RunStamps {
    pub datestamp: String,
    pub timestamp: String,
    pub filestamp: String,
}

impl RunStamps {
    pub fn capture() -> Self {
        Self::from_datetime(Local::now())
    }

    fn from_datetime(now: DateTime<Local>) -> Self {
        Self {
            datestamp: now.format("%Y-%m-%d").to_string(),
            timestamp: now.format("%Y-%m-%d %H:%M:%S %Z").to_string(),
            filestamp: now.format("%Y-%m-%d %H-%M-%S %Z").to_string(),
        }
    }
}
