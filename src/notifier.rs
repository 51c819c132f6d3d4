//! Message delivery and the pipeline stages that use it.

use crate::config::Config;
use crate::error::{ConfigError, NotifyError};
use crate::filter::FilterBuilder;
use crate::message::MessageFormat;
use crate::models::Expose;
use crate::processor::Processor;
use crate::storage::{Storage, UserSettings};
use anyhow::Result;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const TELEGRAM_API: &str = "https://api.telegram.org";

pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str) -> Result<(), NotifyError>;
}

/// Delivery to a single chat, used to reach registered users.
pub trait ChatSender: Send + Sync {
    fn send_to(&self, chat_id: i64, message: &str) -> Result<(), NotifyError>;
}

fn http_client() -> Result<Client> {
    let client = Client::builder()
        .user_agent("LaendleHunter/1.0")
        .timeout(Duration::from_secs(10))
        .build()?;
    Ok(client)
}

/// Builds the notifiers named in `config.notifiers`, in order.
pub fn from_config(config: &Config) -> Result<Vec<Box<dyn Notifier>>> {
    let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();
    for name in &config.notifiers {
        match name.as_str() {
            "telegram" => {
                if let Some(telegram) = TelegramNotifier::from_config(config)? {
                    notifiers.push(Box::new(telegram));
                }
            }
            "mattermost" => {
                if let Some(mattermost) = MattermostNotifier::from_config(config)? {
                    notifiers.push(Box::new(mattermost));
                }
            }
            other => return Err(ConfigError::UnknownNotifier(other.to_string()).into()),
        }
    }
    Ok(notifiers)
}

#[derive(Serialize)]
struct SendMessage<'m> {
    chat_id: i64,
    text: &'m str,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Maps an unsuccessful Bot API answer to the error callers act upon.
fn telegram_error(receiver: i64, status: u16, body: &str) -> NotifyError {
    let description = serde_json::from_str::<TelegramResponse>(body)
        .ok()
        .and_then(|r| r.description)
        .unwrap_or_else(|| body.to_string());
    let lower = description.to_lowercase();
    if status == 403 && lower.contains("bot was blocked") {
        NotifyError::BotBlocked { receiver }
    } else if status == 403 && lower.contains("user is deactivated") {
        NotifyError::UserDeactivated { receiver }
    } else {
        NotifyError::Api {
            status,
            message: description,
        }
    }
}

/// Telegram Bot API client sending to a fixed list of chats.
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: String,
    receiver_ids: Vec<i64>,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>, receiver_ids: Vec<i64>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_base: TELEGRAM_API.to_string(),
            bot_token: bot_token.into(),
            receiver_ids,
        })
    }

    /// Talks to a different Bot API server, e.g. a self-hosted one.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// `None` when no bot token is configured.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        match config.telegram.bot_token.as_deref() {
            Some(token) if !token.is_empty() => Ok(Some(Self::new(
                token,
                config.telegram.receiver_ids.clone(),
            )?)),
            _ => Ok(None),
        }
    }
}

impl ChatSender for TelegramNotifier {
    fn send_to(&self, chat_id: i64, message: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(&SendMessage {
                chat_id,
                text: message,
            })
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(telegram_error(chat_id, status.as_u16(), &body));
        }
        match serde_json::from_str::<TelegramResponse>(&body) {
            Ok(answer) if !answer.ok => Err(telegram_error(chat_id, status.as_u16(), &body)),
            _ => {
                debug!(chat_id, "Telegram message delivered");
                Ok(())
            }
        }
    }
}

impl Notifier for TelegramNotifier {
    /// Sends to every receiver. A failing receiver does not stop delivery to
    /// the others; the first failure is returned afterwards.
    fn notify(&self, message: &str) -> Result<(), NotifyError> {
        let mut first_error = None;
        for &receiver in &self.receiver_ids {
            if let Err(e) = self.send_to(receiver, message) {
                warn!(receiver, error = %e, "Telegram delivery failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[derive(Serialize)]
struct WebhookMessage<'m> {
    text: &'m str,
}

/// Mattermost incoming webhook.
pub struct MattermostNotifier {
    client: Client,
    webhook_url: String,
}

impl MattermostNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            webhook_url: webhook_url.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        config
            .mattermost
            .webhook_url
            .as_deref()
            .map(Self::new)
            .transpose()
    }
}

impl Notifier for MattermostNotifier {
    fn notify(&self, message: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&WebhookMessage { text: message })
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Api {
                status: status.as_u16(),
                message: response.text().unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// Formats each expose and hands it to every notifier.
pub struct SenderProcessor<'a> {
    format: MessageFormat,
    notifiers: &'a [Box<dyn Notifier>],
}

impl<'a> SenderProcessor<'a> {
    pub fn new(format: MessageFormat, notifiers: &'a [Box<dyn Notifier>]) -> Self {
        Self { format, notifiers }
    }
}

impl Processor for SenderProcessor<'_> {
    fn process_expose(&self, expose: Expose) -> Result<Expose> {
        let message = self.format.render(&expose);
        for notifier in self.notifiers {
            if let Err(e) = notifier.notify(&message) {
                warn!(expose = expose.id, error = %e, "Failed to send notification");
            }
        }
        Ok(expose)
    }
}

/// Sends each expose to every registered, unmuted user whose own filter it passes.
pub struct UserBroadcastProcessor<'a> {
    format: MessageFormat,
    storage: &'a dyn Storage,
    sender: &'a dyn ChatSender,
}

impl<'a> UserBroadcastProcessor<'a> {
    pub fn new(
        format: MessageFormat,
        storage: &'a dyn Storage,
        sender: &'a dyn ChatSender,
    ) -> Self {
        Self {
            format,
            storage,
            sender,
        }
    }

    fn wants(&self, user_id: i64, settings: &UserSettings, expose: &Expose) -> bool {
        let Some(filters) = &settings.filters else {
            return true;
        };
        let filter = match FilterBuilder::new().read_filter_config(filters) {
            Ok(builder) => builder.build(),
            Err(e) => {
                warn!(user_id, error = %e, "Ignoring user with invalid filter settings");
                return false;
            }
        };
        match filter.is_interesting_expose(expose) {
            Ok(interesting) => interesting,
            Err(e) => {
                warn!(user_id, error = %e, "User filter failed");
                false
            }
        }
    }

    fn deactivate(&self, user_id: i64, mut settings: UserSettings) {
        settings.mute = true;
        match self.storage.save_settings_for_user(user_id, &settings) {
            Ok(()) => info!(user_id, "Receiver gone, muted subscription"),
            Err(e) => warn!(user_id, error = %e, "Failed to mute subscription"),
        }
    }
}

impl Processor for UserBroadcastProcessor<'_> {
    fn process_expose(&self, expose: Expose) -> Result<Expose> {
        let users = match self.storage.get_user_settings() {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "Could not load registered users");
                return Ok(expose);
            }
        };

        let message = self.format.render(&expose);
        for (user_id, settings) in users {
            if settings.mute || !self.wants(user_id, &settings, &expose) {
                continue;
            }
            match self.sender.send_to(user_id, &message) {
                Ok(()) => {}
                Err(e) if e.is_receiver_gone() => self.deactivate(user_id, settings),
                Err(e) => warn!(user_id, expose = expose.id, error = %e, "Failed to notify user"),
            }
        }
        Ok(expose)
    }
}
