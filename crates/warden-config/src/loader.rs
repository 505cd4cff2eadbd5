use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use warden_core::WardenError;

use crate::schema::{WardenConfig, data_dir};

/// Loads the Warden configuration and reloads it on request.
pub struct ConfigLoader {
    config: Arc<RwLock<WardenConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > WARDEN_CONFIG env > ~/.warden/warden.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("WARDEN_CONFIG") {
            return PathBuf::from(p);
        }
        data_dir().join("warden.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> warden_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::parse_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            WardenConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => return Err(WardenError::Config(e)),
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> WardenConfig {
        self.config.read().clone()
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn parse_file(path: &Path) -> warden_core::Result<WardenConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<WardenConfig>(&raw).map_err(|e| {
            WardenError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply env var overrides (WARDEN_DB_PATH, WARDEN_LOG_LEVEL, etc.)
    pub fn apply_env_overrides(mut config: WardenConfig) -> WardenConfig {
        if let Ok(v) = std::env::var("WARDEN_DB_PATH") {
            config.database.path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WARDEN_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("WARDEN_ENVIRONMENT") {
            match v.parse() {
                Ok(env) => config.daemon.environment = env,
                Err(e) => warn!(error = %e, "ignoring WARDEN_ENVIRONMENT"),
            }
        }
        if let Ok(v) = std::env::var("WARDEN_NTFY_SERVER") {
            config.channels.ntfy.server = v;
        }
        // Config file takes priority, env is the fallback.
        if config.channels.telegram.bot_token.is_none() {
            if let Ok(v) = std::env::var("WARDEN_TELEGRAM_BOT_TOKEN") {
                config.channels.telegram.bot_token = Some(v);
            }
        }
        config
    }

    /// Reload the config from disk. Invalid files leave the current config in place.
    pub fn reload(&self) -> warden_core::Result<()> {
        if !self.config_path.exists() {
            return Err(WardenError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::parse_file(&self.config_path)?);
        new_config.validate().map_err(WardenError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }
}
