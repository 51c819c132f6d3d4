//! Error kinds that callers need to tell apart.
//!
//! Everything else travels as `anyhow::Error`.

/// Failure of a single (crawler, url) crawl or an address lookup.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    /// The site answered with a captcha challenge we cannot solve.
    #[error("captcha could not be solved for {url}")]
    Captcha { url: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("failed to parse {url}: {message}")]
    Parse { url: String, message: String },
}

/// Delivery failure of a notification.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The recipient blocked the bot; the subscription should be deactivated.
    #[error("bot was blocked by receiver {receiver}")]
    BotBlocked { receiver: i64 },

    /// The recipient's account no longer exists.
    #[error("receiver {receiver} is deactivated")]
    UserDeactivated { receiver: i64 },

    /// Transport failure. The request URL is stripped since it may carry a bot token.
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("notification API returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        NotifyError::Http(e.without_url())
    }
}

impl NotifyError {
    /// True when retrying delivery to this receiver is pointless.
    pub fn is_receiver_gone(&self) -> bool {
        matches!(self, NotifyError::BotBlocked { .. } | NotifyError::UserDeactivated { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to (de)serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage lock poisoned")]
    LockPoisoned,

    #[error("invalid timestamp in storage: {0}")]
    InvalidTimestamp(i64),
}

/// Problems in the configuration. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no urls configured, nothing to hunt")]
    NoUrls,

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unknown placeholder {{{0}}} in message format")]
    UnknownPlaceholder(String),

    #[error("unbalanced brace in message format at byte {0}")]
    UnbalancedBrace(usize),

    #[error("unknown notifier '{0}'")]
    UnknownNotifier(String),

    #[error("telegram notifier configured without telegram.bot_token")]
    MissingTelegramToken,

    #[error("mattermost notifier configured without mattermost.webhook_url")]
    MissingMattermostWebhook,

    #[error("invalid title pattern '{pattern}': {source}")]
    InvalidTitlePattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid heartbeat interval '{0}', expected hour, day or week")]
    InvalidHeartbeatInterval(String),

    #[error("heartbeat requested but no notifier is configured")]
    HeartbeatWithoutNotifier,

    #[error("durations configured but google_maps_api.url is missing")]
    MissingGoogleMapsUrl,

    #[error("invalid value '{value}' for environment variable {key}")]
    InvalidEnv { key: String, value: String },
}
