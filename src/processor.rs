//! Lazy processing pipeline for crawled exposes.
//!
//! A [`ProcessorChain`] folds its stages over an [`ExposeStream`]. Nothing runs
//! until the caller pulls from the resulting stream, and every expose passes
//! through the stages in the order they were added.

use crate::crawler::Crawler;
use crate::durations::DurationProcessor;
use crate::filter::Filter;
use crate::message::MessageFormat;
use crate::models::Expose;
use crate::notifier::{ChatSender, Notifier, SenderProcessor, UserBroadcastProcessor};
use crate::storage::Storage;
use anyhow::Result;
use tracing::{debug, warn};

pub type ExposeStream<'a> = Box<dyn Iterator<Item = Result<Expose>> + 'a>;

/// One pipeline stage.
///
/// Most stages only implement [`Processor::process_expose`]; stages that drop
/// or reorder exposes override [`Processor::process_exposes`] instead.
pub trait Processor {
    fn process_expose(&self, expose: Expose) -> Result<Expose> {
        Ok(expose)
    }

    fn process_exposes<'s>(&'s self, exposes: ExposeStream<'s>) -> ExposeStream<'s> {
        Box::new(exposes.map(move |expose| expose.and_then(|e| self.process_expose(e))))
    }
}

impl<P: Processor + ?Sized> Processor for &P {
    fn process_expose(&self, expose: Expose) -> Result<Expose> {
        (**self).process_expose(expose)
    }

    fn process_exposes<'s>(&'s self, exposes: ExposeStream<'s>) -> ExposeStream<'s> {
        (**self).process_exposes(exposes)
    }
}

/// Persists every expose it sees, interesting or not.
pub struct SaveAllProcessor<'a> {
    storage: &'a dyn Storage,
}

impl Processor for SaveAllProcessor<'_> {
    fn process_expose(&self, expose: Expose) -> Result<Expose> {
        self.storage.save_expose(&expose)?;
        Ok(expose)
    }
}

pub struct FilterProcessor<'a> {
    filter: Filter<'a>,
}

impl Processor for FilterProcessor<'_> {
    fn process_exposes<'s>(&'s self, exposes: ExposeStream<'s>) -> ExposeStream<'s> {
        self.filter.filter(exposes)
    }
}

/// Replaces URL addresses by the address the matching crawler loads from them.
pub struct AddressResolver<'a> {
    crawlers: &'a [Box<dyn Crawler>],
}

impl<'a> AddressResolver<'a> {
    pub fn new(crawlers: &'a [Box<dyn Crawler>]) -> Self {
        Self { crawlers }
    }
}

impl Processor for AddressResolver<'_> {
    fn process_expose(&self, mut expose: Expose) -> Result<Expose> {
        if !expose.has_unresolved_address() {
            return Ok(expose);
        }
        let url = expose.address.clone();
        let Some(crawler) = self.crawlers.iter().find(|c| c.matches(&url)) else {
            debug!(url = %url, "No crawler can resolve address");
            return Ok(expose);
        };
        match crawler.load_address(&url) {
            Ok(Some(address)) => {
                debug!(url = %url, address = %address, "Loaded address");
                expose.address = address;
            }
            Ok(None) => debug!(url = %url, "No address found on page"),
            Err(e) => warn!(url = %url, error = %e, "Failed to resolve address"),
        }
        Ok(expose)
    }
}

/// Applies a function to every expose.
pub struct MapProcessor<F> {
    func: F,
}

impl<F> Processor for MapProcessor<F>
where
    F: Fn(Expose) -> Result<Expose>,
{
    fn process_expose(&self, expose: Expose) -> Result<Expose> {
        (self.func)(expose)
    }
}

pub struct ProcessorChainBuilder<'a> {
    processors: Vec<Box<dyn Processor + 'a>>,
}

impl<'a> ProcessorChainBuilder<'a> {
    pub fn new() -> Self {
        Self {
            processors: Vec::new(),
        }
    }

    pub fn add<P: Processor + 'a>(mut self, processor: P) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn save_all_exposes(self, storage: &'a dyn Storage) -> Self {
        self.add(SaveAllProcessor { storage })
    }

    pub fn apply_filter(self, filter: Filter<'a>) -> Self {
        self.add(FilterProcessor { filter })
    }

    pub fn resolve_addresses(self, crawlers: &'a [Box<dyn Crawler>]) -> Self {
        self.add(AddressResolver::new(crawlers))
    }

    pub fn calculate_durations(self, durations: &'a DurationProcessor) -> Self {
        self.add(durations)
    }

    pub fn send_messages(self, format: MessageFormat, notifiers: &'a [Box<dyn Notifier>]) -> Self {
        self.add(SenderProcessor::new(format, notifiers))
    }

    pub fn broadcast_to_users(
        self,
        format: MessageFormat,
        storage: &'a dyn Storage,
        sender: &'a dyn ChatSender,
    ) -> Self {
        self.add(UserBroadcastProcessor::new(format, storage, sender))
    }

    pub fn map_exposes<F>(self, func: F) -> Self
    where
        F: Fn(Expose) -> Result<Expose> + 'a,
    {
        self.add(MapProcessor { func })
    }

    pub fn build(self) -> ProcessorChain<'a> {
        ProcessorChain {
            processors: self.processors,
        }
    }
}

impl Default for ProcessorChainBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ProcessorChain<'a> {
    processors: Vec<Box<dyn Processor + 'a>>,
}

impl<'a> ProcessorChain<'a> {
    pub fn builder() -> ProcessorChainBuilder<'a> {
        ProcessorChainBuilder::new()
    }

    pub fn process<'s>(&'s self, exposes: ExposeStream<'s>) -> ExposeStream<'s> {
        self.processors
            .iter()
            .fold(exposes, |stream, processor| processor.process_exposes(stream))
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}
