use crate::config::Config;
use crate::crawler::{self, Crawler};
use crate::durations::DurationProcessor;
use crate::filter::Filter;
use crate::message::MessageFormat;
use crate::models::{Expose, StoredExpose};
use crate::notifier::{ChatSender, Notifier};
use crate::processor::{ExposeStream, ProcessorChain};
use crate::storage::Storage;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Runs hunt cycles: crawl every source, then push the results through the
/// processing pipeline.
pub struct Hunter {
    config: Config,
    crawlers: Vec<Box<dyn Crawler>>,
    storage: Arc<dyn Storage>,
    notifiers: Vec<Box<dyn Notifier>>,
    format: MessageFormat,
    durations: Option<DurationProcessor>,
    broadcast: Option<Box<dyn ChatSender>>,
}

impl Hunter {
    pub fn new(
        config: Config,
        crawlers: Vec<Box<dyn Crawler>>,
        storage: Arc<dyn Storage>,
        notifiers: Vec<Box<dyn Notifier>>,
    ) -> Result<Self> {
        let format = config.message_format()?;
        Ok(Self {
            config,
            crawlers,
            storage,
            notifiers,
            format,
            durations: None,
            broadcast: None,
        })
    }

    /// Adds travel times to every interesting expose.
    pub fn with_durations(mut self, durations: DurationProcessor) -> Self {
        self.durations = Some(durations);
        self
    }

    /// Also notifies every registered Telegram user according to their own filters.
    pub fn with_user_broadcast(mut self, sender: impl ChatSender + 'static) -> Self {
        self.broadcast = Some(Box::new(sender));
        self
    }

    pub fn crawl_for_exposes(&self, max_pages: Option<usize>) -> ExposeStream<'_> {
        crawler::crawl_for_exposes(&self.crawlers, &self.config.urls, max_pages)
    }

    /// One complete cycle. Returns the exposes that made it through the pipeline.
    pub fn hunt(&self, max_pages: Option<usize>) -> Result<Vec<Expose>> {
        let storage = self.storage.as_ref();
        let filter = Filter::builder()
            .read_config(&self.config)?
            .filter_already_seen(storage)
            .build();

        let mut builder = ProcessorChain::builder()
            .save_all_exposes(storage)
            .apply_filter(filter)
            .resolve_addresses(&self.crawlers);
        if let Some(durations) = &self.durations {
            builder = builder.calculate_durations(durations);
        }
        builder = builder.send_messages(self.format.clone(), &self.notifiers);
        if let Some(sender) = &self.broadcast {
            builder = builder.broadcast_to_users(self.format.clone(), storage, sender.as_ref());
        }
        let chain = builder.build();

        let mut result = Vec::new();
        for expose in chain.process(self.crawl_for_exposes(max_pages)) {
            let expose = expose.context("Hunt aborted")?;
            info!(id = expose.id, title = %expose.title, "New offer");
            result.push(expose);
        }

        let finished = storage.update_last_run_time()?;
        info!(count = result.len(), finished = %finished, "Hunt finished");
        Ok(result)
    }

    pub fn last_run_time(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.storage.get_last_run_time()?)
    }

    /// Most recently saved exposes that match the configured filter criteria.
    pub fn recent_exposes(&self, count: usize) -> Result<Vec<StoredExpose>> {
        let filter = Filter::builder().read_config(&self.config)?.build();
        self.storage.get_recent_exposes(count, Some(&filter))
    }

    pub fn notifiers(&self) -> &[Box<dyn Notifier>] {
        &self.notifiers
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }
}
