//! Layered settings: built-in defaults, then `config.toml`, then `SORA_*`
//! environment variables.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File, FileFormat};
use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::http::DEFAULT_USER_AGENT;
use crate::quality::BEST;
use crate::types::Translation;

pub const APP_NAME: &str = "sora";
pub const ENV_PREFIX: &str = "SORA";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine a config directory")]
    NoConfigDir,

    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("player.args is not valid shell syntax: {0:?}")]
    PlayerArgs(String),

    #[error("{0} already exists")]
    AlreadyExists(PathBuf),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default)]
    pub translation: Translation,
    #[serde(default)]
    pub player: PlayerSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSettings {
    #[serde(default = "default_player_command")]
    pub command: String,
    /// Extra arguments, written the way a shell would take them.
    #[serde(default)]
    pub args: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_provider() -> String {
    crate::providers::allanime::NAME.to_string()
}

fn default_quality() -> String {
    BEST.to_string()
}

fn default_player_command() -> String {
    "mpv".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            quality: default_quality(),
            translation: Translation::default(),
            player: PlayerSettings::default(),
            http: HttpSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            command: default_player_command(),
            args: String::new(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl PlayerSettings {
    pub fn split_args(&self) -> Result<Vec<String>, ConfigError> {
        shlex::split(&self.args).ok_or_else(|| ConfigError::PlayerArgs(self.args.clone()))
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Settings {
    /// Loads from `path` (or the default location) plus the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().ok(),
        };
        Self::load_from(path.as_deref(), None)
    }

    /// `env` replaces the process environment when given.
    fn load_from(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path.filter(|p| p.exists()) {
            debug!(path = %path.display(), "reading config file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );
        Ok(builder.build()?.try_deserialize()?)
    }

    /// Writes the defaults to `path`, refusing to overwrite unless `force`.
    pub fn write_default(path: &Path, force: bool) -> Result<(), ConfigError> {
        if path.exists() && !force {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let rendered = toml::to_string_pretty(&Settings::default())?;
        fs::write(path, rendered).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "wrote default config");
        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let base = config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(base.join(APP_NAME).join("config.toml"))
}
