use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static NUMBER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+([.,]\d+)?").expect("number pattern is valid"));

/// A single listing as produced by a crawler and passed through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expose {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub price: String,
    pub size: String,
    pub rooms: String,
    /// Either a human readable address or a URL that still has to be resolved.
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub crawler: String,
    #[serde(default, rename = "from", skip_serializing_if = "Option::is_none")]
    pub available_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durations: Option<String>,
}

impl Expose {
    /// Price as a number. `.` is a thousands separator here, `,` the decimal one.
    pub fn price_value(&self) -> Option<f64> {
        leading_number(&self.price)
            .and_then(|n| n.replace('.', "").replace(',', ".").parse().ok())
    }

    pub fn size_value(&self) -> Option<f64> {
        leading_number(&self.size).and_then(|n| n.replace(',', ".").parse().ok())
    }

    pub fn rooms_value(&self) -> Option<f64> {
        leading_number(&self.rooms).and_then(|n| n.replace(',', ".").parse().ok())
    }

    pub fn has_unresolved_address(&self) -> bool {
        self.address.starts_with("http")
    }
}

/// First integer-or-decimal token in a display string such as "1.250,50 €".
pub fn leading_number(text: &str) -> Option<&str> {
    NUMBER_REGEX.find(text).map(|m| m.as_str())
}

/// An expose as persisted by the storage backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredExpose {
    #[serde(flatten)]
    pub expose: Expose,
    pub created_at: DateTime<Utc>,
}
