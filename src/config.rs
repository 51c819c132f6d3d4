use crate::error::ConfigError;
use crate::message::MessageFormat;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_MESSAGE_FORMAT: &str = "{title}
Zimmer: {rooms}
Größe: {size}
Preis: {price}

{url}";

const DEFAULT_SLEEPING_TIME: u64 = 60 * 10;
const ENV_PREFIX: &str = "LAENDLEHUNTER_";

/// Filter criteria. Shared by the global config and by per-user settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub excluded_titles: Option<Vec<String>>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_size: Option<f64>,
    pub max_size: Option<f64>,
    pub min_rooms: Option<f64>,
    pub max_rooms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub active: bool,
    pub sleeping_time: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            active: false,
            sleeping_time: DEFAULT_SLEEPING_TIME,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub receiver_ids: Vec<i64>,
    /// Also deliver to users registered in storage, using their own filters.
    pub notify_registered_users: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MattermostConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GoogleMapsConfig {
    pub key: Option<String>,
    /// Template with `{origin}`, `{dest}`, `{mode}`, `{key}` and `{arrival}`.
    pub url: Option<String>,
    pub enable: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DurationMode {
    pub gm_id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DurationConfig {
    pub name: String,
    pub destination: String,
    #[serde(default)]
    pub modes: Vec<DurationMode>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub urls: Vec<String>,
    /// Legacy top-level title exclusion, kept next to `filters.excluded_titles`.
    pub excluded_titles: Option<Vec<String>>,
    pub filters: Option<FilterConfig>,
    pub message: Option<String>,
    pub notifiers: Vec<String>,
    pub database_location: Option<PathBuf>,
    pub verbose: bool,
    pub max_pages: Option<usize>,
    pub heartbeat_interval: Option<String>,
    #[serde(rename = "loop")]
    pub hunt_loop: LoopConfig,
    pub telegram: TelegramConfig,
    pub mattermost: MattermostConfig,
    pub google_maps_api: GoogleMapsConfig,
    pub durations: Vec<DurationConfig>,
}

impl Config {
    /// Loads the config file (if any), applies environment overrides and validates.
    pub fn load(path: &Path) -> Result<Self> {
        let target_urls = std::env::var(format!("{}TARGET_URLS", ENV_PREFIX)).ok();
        let mut config = if path.exists() {
            info!(path = %path.display(), "Using config file");
            let content = std::fs::read_to_string(path)
                .context(format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)?
        } else if target_urls.is_some() {
            info!("No config file found, configuring from environment only");
            Self::default()
        } else {
            anyhow::bail!(
                "No config file found at {} and {}TARGET_URLS is not set",
                path.display(),
                ENV_PREFIX
            );
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config")
    }

    /// Overrides config values from environment variables resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(urls) = var("TARGET_URLS") {
            self.urls = urls
                .split(';')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(location) = var("DATABASE_LOCATION") {
            self.database_location = Some(PathBuf::from(location));
        }
        if var("VERBOSE_LOG").is_some() {
            self.verbose = true;
        }
        if let Some(period) = var("LOOP_PERIOD_SECONDS") {
            self.hunt_loop.active = true;
            self.hunt_loop.sleeping_time = period.parse().map_err(|_| ConfigError::InvalidEnv {
                key: format!("{}LOOP_PERIOD_SECONDS", ENV_PREFIX),
                value: period.clone(),
            })?;
        }
        if let Some(format) = var("MESSAGE_FORMAT") {
            self.message = Some(format.split("#CR#").collect::<Vec<_>>().join("\n"));
        }
        if let Some(notifiers) = var("NOTIFIERS") {
            self.notifiers = notifiers.split(',').map(|n| n.trim().to_string()).collect();
        }
        if let Some(token) = var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(ids) = var("TELEGRAM_RECEIVER_IDS") {
            self.telegram.receiver_ids = ids
                .split(',')
                .map(|id| {
                    id.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                        key: format!("{}TELEGRAM_RECEIVER_IDS", ENV_PREFIX),
                        value: ids.clone(),
                    })
                })
                .collect::<Result<_, _>>()?;
        }
        if let Some(url) = var("MATTERMOST_WEBHOOK_URL") {
            self.mattermost.webhook_url = Some(url);
        }
        Ok(())
    }

    /// Everything that would otherwise only fail in the middle of a hunt.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.urls.is_empty() {
            return Err(ConfigError::NoUrls);
        }
        for url in &self.urls {
            reqwest::Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        }

        self.message_format()?;

        for pattern in self.all_excluded_titles() {
            Regex::new(pattern).map_err(|source| ConfigError::InvalidTitlePattern {
                pattern: pattern.clone(),
                source,
            })?;
        }

        for notifier in &self.notifiers {
            match notifier.as_str() {
                "telegram" if self.telegram.bot_token.as_deref().unwrap_or("").is_empty() => {
                    return Err(ConfigError::MissingTelegramToken)
                }
                "mattermost" if self.mattermost.webhook_url.is_none() => {
                    return Err(ConfigError::MissingMattermostWebhook)
                }
                "telegram" | "mattermost" => {}
                other => return Err(ConfigError::UnknownNotifier(other.to_string())),
            }
        }

        if let Some(interval) = &self.heartbeat_interval {
            crate::heartbeat::interval_seconds(interval)?;
            if self.notifiers.is_empty() {
                return Err(ConfigError::HeartbeatWithoutNotifier);
            }
        }

        if self.durations_enabled() && self.google_maps_api.url.is_none() {
            return Err(ConfigError::MissingGoogleMapsUrl);
        }

        Ok(())
    }

    pub fn message_format(&self) -> Result<MessageFormat, ConfigError> {
        MessageFormat::parse(self.message.as_deref().unwrap_or(DEFAULT_MESSAGE_FORMAT))
    }

    pub fn durations_enabled(&self) -> bool {
        self.google_maps_api.enable && !self.durations.is_empty()
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_location
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("processed_ids.db")
    }

    pub fn loop_period_seconds(&self) -> u64 {
        self.hunt_loop.sleeping_time
    }

    fn all_excluded_titles(&self) -> impl Iterator<Item = &String> {
        let nested = self.filters.as_ref().and_then(|f| f.excluded_titles.as_ref());
        self.excluded_titles.iter().chain(nested).flatten()
    }
}
