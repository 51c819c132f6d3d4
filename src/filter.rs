//! Expose filters and the AND-combinator built from them.

use crate::config::{Config, FilterConfig};
use crate::error::ConfigError;
use crate::models::Expose;
use crate::processor::ExposeStream;
use crate::storage::Storage;
use anyhow::Result;
use regex::Regex;

/// A single criterion an expose has to meet.
pub trait ExposeFilter {
    fn is_interesting(&self, expose: &Expose) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Price,
    Size,
    Rooms,
}

impl Quantity {
    fn value(&self, expose: &Expose) -> Option<f64> {
        match self {
            Quantity::Price => expose.price_value(),
            Quantity::Size => expose.size_value(),
            Quantity::Rooms => expose.rooms_value(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Min(f64),
    Max(f64),
}

/// Lower or upper bound on price, size or rooms.
///
/// Exposes without a parseable number always pass, so scraped listings with
/// odd formatting are shown rather than silently dropped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeFilter {
    pub quantity: Quantity,
    pub bound: Bound,
}

impl ExposeFilter for RangeFilter {
    fn is_interesting(&self, expose: &Expose) -> Result<bool> {
        let Some(value) = self.quantity.value(expose) else {
            return Ok(true);
        };
        Ok(match self.bound {
            Bound::Min(min) => value >= min,
            Bound::Max(max) => value <= max,
        })
    }
}

/// Excludes exposes whose lowercased title matches any of the patterns.
#[derive(Debug, Clone)]
pub struct TitleFilter {
    excluded: Regex,
}

impl TitleFilter {
    pub fn new(patterns: &[String]) -> Result<Self, ConfigError> {
        for pattern in patterns {
            Regex::new(pattern).map_err(|source| ConfigError::InvalidTitlePattern {
                pattern: pattern.clone(),
                source,
            })?;
        }
        let combined = format!("({})", patterns.join(")|("));
        let excluded = Regex::new(&combined).map_err(|source| ConfigError::InvalidTitlePattern {
            pattern: combined.clone(),
            source,
        })?;
        Ok(Self { excluded })
    }
}

impl ExposeFilter for TitleFilter {
    fn is_interesting(&self, expose: &Expose) -> Result<bool> {
        Ok(!self.excluded.is_match(&expose.title.to_lowercase()))
    }
}

pub struct PredicateFilter<'a> {
    predicate: Box<dyn Fn(&Expose) -> bool + 'a>,
}

impl ExposeFilter for PredicateFilter<'_> {
    fn is_interesting(&self, expose: &Expose) -> Result<bool> {
        Ok((self.predicate)(expose))
    }
}

/// Passes exposes whose id has not been processed yet.
///
/// Checking marks the id as processed right away, in the same storage call.
/// A second copy of the same expose later in the same crawl is therefore
/// rejected too. The mark is not rolled back if a later stage fails.
pub struct AlreadySeenFilter<'a> {
    storage: &'a dyn Storage,
}

impl<'a> AlreadySeenFilter<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self { storage }
    }
}

impl ExposeFilter for AlreadySeenFilter<'_> {
    fn is_interesting(&self, expose: &Expose) -> Result<bool> {
        Ok(self.storage.mark_if_unseen(expose.id)?)
    }
}

#[derive(Default)]
pub struct FilterBuilder<'a> {
    filters: Vec<Box<dyn ExposeFilter + 'a>>,
}

impl<'a> FilterBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the legacy top-level `excluded_titles` and everything under `filters`.
    pub fn read_config(self, config: &Config) -> Result<Self, ConfigError> {
        let mut builder = self;
        if let Some(titles) = &config.excluded_titles {
            builder = builder.excluded_titles(titles)?;
        }
        if let Some(filters) = &config.filters {
            builder = builder.read_filter_config(filters)?;
        }
        Ok(builder)
    }

    pub fn read_filter_config(self, filters: &FilterConfig) -> Result<Self, ConfigError> {
        let mut builder = self;
        if let Some(titles) = &filters.excluded_titles {
            builder = builder.excluded_titles(titles)?;
        }
        let bounds = [
            (Quantity::Price, filters.min_price.map(Bound::Min)),
            (Quantity::Price, filters.max_price.map(Bound::Max)),
            (Quantity::Size, filters.min_size.map(Bound::Min)),
            (Quantity::Size, filters.max_size.map(Bound::Max)),
            (Quantity::Rooms, filters.min_rooms.map(Bound::Min)),
            (Quantity::Rooms, filters.max_rooms.map(Bound::Max)),
        ];
        for (quantity, bound) in bounds {
            if let Some(bound) = bound {
                builder = builder.range(quantity, bound);
            }
        }
        Ok(builder)
    }

    pub fn excluded_titles(mut self, patterns: &[String]) -> Result<Self, ConfigError> {
        if !patterns.is_empty() {
            self.filters.push(Box::new(TitleFilter::new(patterns)?));
        }
        Ok(self)
    }

    pub fn range(mut self, quantity: Quantity, bound: Bound) -> Self {
        self.filters.push(Box::new(RangeFilter { quantity, bound }));
        self
    }

    pub fn min_price(self, price: f64) -> Self {
        self.range(Quantity::Price, Bound::Min(price))
    }

    pub fn max_price(self, price: f64) -> Self {
        self.range(Quantity::Price, Bound::Max(price))
    }

    pub fn min_size(self, size: f64) -> Self {
        self.range(Quantity::Size, Bound::Min(size))
    }

    pub fn max_size(self, size: f64) -> Self {
        self.range(Quantity::Size, Bound::Max(size))
    }

    pub fn min_rooms(self, rooms: f64) -> Self {
        self.range(Quantity::Rooms, Bound::Min(rooms))
    }

    pub fn max_rooms(self, rooms: f64) -> Self {
        self.range(Quantity::Rooms, Bound::Max(rooms))
    }

    pub fn predicate_filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Expose) -> bool + 'a,
    {
        self.filters.push(Box::new(PredicateFilter {
            predicate: Box::new(predicate),
        }));
        self
    }

    pub fn filter_already_seen(mut self, storage: &'a dyn Storage) -> Self {
        self.filters.push(Box::new(AlreadySeenFilter::new(storage)));
        self
    }

    pub fn build(self) -> Filter<'a> {
        Filter {
            filters: self.filters,
        }
    }
}

/// All configured filters, combined with AND.
pub struct Filter<'a> {
    filters: Vec<Box<dyn ExposeFilter + 'a>>,
}

impl<'a> Filter<'a> {
    pub fn builder() -> FilterBuilder<'a> {
        FilterBuilder::new()
    }

    /// Runs every filter in construction order, without short-circuiting, so
    /// stateful filters see each expose exactly once.
    pub fn is_interesting_expose(&self, expose: &Expose) -> Result<bool> {
        let mut interesting = true;
        for filter in &self.filters {
            interesting &= filter.is_interesting(expose)?;
        }
        Ok(interesting)
    }

    /// Lazily drops exposes that are not interesting. Errors pass through.
    pub fn filter<'s>(&'s self, exposes: ExposeStream<'s>) -> ExposeStream<'s> {
        Box::new(exposes.filter_map(move |expose| match expose {
            Ok(expose) => match self.is_interesting_expose(&expose) {
                Ok(true) => Some(Ok(expose)),
                Ok(false) => None,
                Err(e) => Some(Err(e)),
            },
            Err(e) => Some(Err(e)),
        }))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
