use crate::error::ConfigError;
use crate::notifier::Notifier;
use tracing::{info, warn};

const HEARTBEAT_MESSAGE: &str =
    "Beep Boop. Das ist eine Heartbeat-Nachricht. Der Hunter sucht noch nach Wohnungen.";

/// Length of a heartbeat interval name in seconds.
pub fn interval_seconds(interval: &str) -> Result<u64, ConfigError> {
    match interval.trim().to_lowercase().as_str() {
        "hour" => Ok(60 * 60),
        "day" => Ok(24 * 60 * 60),
        "week" => Ok(7 * 24 * 60 * 60),
        _ => Err(ConfigError::InvalidHeartbeatInterval(interval.to_string())),
    }
}

/// Periodic "still alive" message, counted in hunt loop iterations.
#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    /// Loop iterations between two messages. `None` disables the heartbeat.
    every: Option<u64>,
}

impl Heartbeat {
    pub fn new(interval: Option<&str>, loop_period_seconds: u64) -> Result<Self, ConfigError> {
        let every = match interval {
            Some(interval) => {
                let seconds = interval_seconds(interval)?;
                Some((seconds / loop_period_seconds.max(1)).max(1))
            }
            None => None,
        };
        Ok(Self { every })
    }

    pub fn disabled() -> Self {
        Self { every: None }
    }

    pub fn iterations(&self) -> Option<u64> {
        self.every
    }

    /// Sends the heartbeat through the first notifier when `counter` hits the
    /// interval. Returns the counter the next loop iteration should continue from.
    pub fn send_heartbeat(&self, notifiers: &[Box<dyn Notifier>], counter: u64) -> u64 {
        let Some(every) = self.every else {
            return counter;
        };
        if counter % every != 0 {
            return counter;
        }
        match notifiers.first() {
            Some(notifier) => match notifier.notify(HEARTBEAT_MESSAGE) {
                Ok(()) => info!("Sent heartbeat"),
                Err(e) => warn!(error = %e, "Failed to send heartbeat"),
            },
            None => warn!("Heartbeat due but no notifier configured"),
        }
        0
    }
}
