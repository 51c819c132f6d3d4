//! Travel times from an expose to configured destinations via the Google
//! Distance Matrix API.

use crate::config::{Config, DurationConfig};
use crate::models::Expose;
use crate::processor::Processor;
use anyhow::{Context, Result};
use chrono::{Datelike, Days, Local, NaiveDateTime};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const MODE_DRIVING: &str = "driving";

#[derive(Debug, Deserialize)]
struct DistanceMatrix {
    status: String,
    #[serde(default)]
    rows: Vec<MatrixRow>,
}

#[derive(Debug, Deserialize)]
struct MatrixRow {
    #[serde(default)]
    elements: Vec<MatrixElement>,
}

#[derive(Debug, Deserialize)]
struct MatrixElement {
    status: String,
    duration: Option<TextValue>,
    distance: Option<TextValue>,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    text: String,
    value: i64,
}

/// Fastest route in a Distance Matrix answer as `"<duration> (<distance>)"`.
fn fastest_route(body: &str) -> Result<Option<String>> {
    let matrix: DistanceMatrix =
        serde_json::from_str(body).context("Invalid distance matrix response")?;
    if matrix.status != "OK" {
        anyhow::bail!("Distance matrix request failed with status {}", matrix.status);
    }

    let fastest = matrix
        .rows
        .iter()
        .flat_map(|row| &row.elements)
        .filter(|element| {
            if element.status != "OK" {
                debug!(status = %element.status, "Skipping route element");
            }
            element.status == "OK"
        })
        .filter_map(|element| Some((element.duration.as_ref()?, element.distance.as_ref()?)))
        .min_by_key(|(duration, _)| duration.value)
        .map(|(duration, distance)| format!("{} ({})", duration.text, distance.text));
    Ok(fastest)
}

/// Next Monday 09:00 strictly after `now`'s date; a Monday yields the week after.
fn next_monday_nine(now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date();
    let days = 7 - u64::from(today.weekday().num_days_from_monday());
    let monday = today + Days::new(days);
    monday.and_hms_opt(9, 0, 0).unwrap_or(monday.and_time(Default::default()))
}

pub struct DurationProcessor {
    client: Client,
    url_template: String,
    key: Option<String>,
    durations: Vec<DurationConfig>,
}

impl DurationProcessor {
    pub fn from_config(config: &Config) -> Result<Self> {
        let url_template = config
            .google_maps_api
            .url
            .clone()
            .context("google_maps_api.url is not configured")?;
        let client = Client::builder()
            .user_agent("LaendleHunter/1.0")
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url_template,
            key: config.google_maps_api.key.clone().filter(|k| !k.is_empty()),
            durations: config.durations.clone(),
        })
    }

    /// Fills in `{origin}`, `{dest}`, `{mode}`, `{arrival}` and `{key}`.
    ///
    /// Without an API key only driving directions are allowed, so other modes
    /// are downgraded and the key parameter is dropped.
    fn request_url(&self, origin: &str, dest: &str, mode: &str, arrival: i64) -> String {
        let (mode, template, key) = match &self.key {
            Some(key) => (mode, self.url_template.clone(), key.as_str()),
            None => {
                if mode != MODE_DRIVING {
                    warn!(mode, "No Google Maps API key, downgrading to driving");
                }
                (MODE_DRIVING, self.url_template.replace("&key={key}", ""), "")
            }
        };
        template
            .replace("{origin}", &urlencoding::encode(origin.trim()))
            .replace("{dest}", &urlencoding::encode(dest.trim()))
            .replace("{mode}", mode)
            .replace("{arrival}", &arrival.to_string())
            .replace("{key}", key)
    }

    fn distance(&self, origin: &str, dest: &str, mode: &str) -> Result<Option<String>> {
        let arrival = next_monday_nine(Local::now().naive_local())
            .and_local_timezone(Local)
            .earliest()
            .map(|t| t.timestamp())
            .context("Arrival time does not exist in local timezone")?;
        let url = self.request_url(origin, dest, mode, arrival);
        // the url carries the API key
        let body = self
            .client
            .get(&url)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .map_err(reqwest::Error::without_url)?;
        fastest_route(&body)
    }

    fn formatted_durations(&self, address: &str) -> String {
        let mut lines = Vec::new();
        for target in &self.durations {
            for mode in &target.modes {
                match self.distance(address, &target.destination, &mode.gm_id) {
                    Ok(Some(duration)) => {
                        lines.push(format!("> {} ({}): {}", target.name, mode.title, duration))
                    }
                    Ok(None) => {
                        debug!(destination = %target.name, mode = %mode.gm_id, "No route found")
                    }
                    Err(e) => warn!(
                        address,
                        destination = %target.name,
                        error = %e,
                        "Failed retrieving distance"
                    ),
                }
            }
        }
        lines.join("\n")
    }
}

/// The address to route from, unless it is still the detail page url.
fn origin(expose: &Expose) -> Option<&str> {
    if expose.has_unresolved_address() {
        return None;
    }
    Some(&expose.address)
}

impl Processor for DurationProcessor {
    fn process_expose(&self, mut expose: Expose) -> Result<Expose> {
        let Some(origin) = origin(&expose) else {
            debug!(id = expose.id, "Address unresolved, skipping durations");
            return Ok(expose);
        };
        let durations = self.formatted_durations(origin);
        if !durations.is_empty() {
            expose.durations = Some(durations);
        }
        Ok(expose)
    }
}
